//! Broker address helpers.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerUrlError {
    #[error("broker url `{0}` has no scheme")]
    MissingScheme(String),
}

/// A parsed `scheme://rest` broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub scheme: String,
    /// Everything after `://`, without the query string.
    pub address: String,
    pub query: Vec<(String, String)>,
}

impl BrokerUrl {
    pub fn parse(url: &str) -> Result<Self, BrokerUrlError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| BrokerUrlError::MissingScheme(url.to_string()))?;
        let (address, query) = rest.split_once('?').unwrap_or((rest, ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (k.to_string(), v.to_string())
            })
            .collect();
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            address: address.to_string(),
            query,
        })
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set `name`, replacing any existing value.
    pub fn set_param(&mut self, name: &str, value: impl ToString) {
        self.query.retain(|(k, _)| k != name);
        self.query.push((name.to_string(), value.to_string()));
    }
}

impl std::fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address)?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{k}={v}")?;
        }
        Ok(())
    }
}

/// `host` with its `heartbeat` query parameter set to `heartbeat` seconds.
pub fn with_heartbeat(host: &str, heartbeat: Option<u64>) -> Result<String, BrokerUrlError> {
    let mut url = BrokerUrl::parse(host)?;
    if let Some(seconds) = heartbeat {
        url.set_param("heartbeat", seconds);
    }
    Ok(url.to_string())
}
