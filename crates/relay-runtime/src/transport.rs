//! Broker resolution by URL scheme.

use std::sync::Arc;

use relay_bus::{BrokerUrl, BrokerUrlError, InMemoryBroker, Transport};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportResolveError {
    #[error(transparent)]
    Url(#[from] BrokerUrlError),

    #[error("unsupported broker scheme `{scheme}` in `{url}` (supported: memory)")]
    UnsupportedScheme { scheme: String, url: String },
}

/// Transport for `url`. `memory://<name>` shares one in-process broker per name.
pub fn resolve_transport(url: &str) -> Result<Arc<dyn Transport>, TransportResolveError> {
    let parsed = BrokerUrl::parse(url)?;
    match parsed.scheme.as_str() {
        "memory" => {
            let name = parsed.address.trim_matches('/');
            let name = if name.is_empty() { "local" } else { name };
            Ok(Arc::new(InMemoryBroker::named(name)))
        }
        other => Err(TransportResolveError::UnsupportedScheme {
            scheme: other.to_string(),
            url: url.to_string(),
        }),
    }
}
