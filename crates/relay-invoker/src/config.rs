//! Component configuration with validation.
//!
//! A component is described by one merged configuration table: the portable
//! manifest naming `func`, overlaid with deployment namespace files that supply
//! the broker `host`, `exchange` and topics.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use relay_bus::{with_heartbeat, BrokerUrlError, ConnectionConfig, DEFAULT_EXCHANGE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the component receives its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Consume from the topic exchange.
    #[default]
    #[serde(alias = "amqp")]
    Bus,
    /// Serve the handler over HTTP.
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => f.write_str("bus"),
            Self::Http => f.write_str("http"),
        }
    }
}

/// Listen address of the HTTP protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
        }
    }
}

impl HttpConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Handler reference, `module:name`.
    pub func: String,
    /// Logical component name; defaults to `func`.
    pub name: Option<String>,
    /// Deployment label attached to log output.
    pub namespace: String,
    pub pubtopic: Option<String>,
    pub subtopic: Option<String>,
    /// Broker URL.
    pub host: String,
    pub exchange: String,
    pub protocol: Protocol,
    /// Broker heartbeat in seconds, written into the `host` query string.
    pub heartbeat: Option<u64>,
    /// Parameter name to lookup path.
    pub args: BTreeMap<String, String>,
    /// Extra destination for failures besides `<name>_error`.
    pub error_pubtopic: Option<String>,
    /// Fixed instance id; generated when absent.
    pub instance_id: Option<String>,
    pub http: HttpConfig,
    /// Concurrent handler invocations across all consume loops.
    pub max_workers: usize,
    /// How long shutdown waits for in-flight invocations.
    pub grace_period_ms: u64,
    pub connection: ConnectionConfig,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            func: String::new(),
            name: None,
            namespace: "local".to_string(),
            pubtopic: None,
            subtopic: None,
            host: "memory://local".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            protocol: Protocol::default(),
            heartbeat: None,
            args: BTreeMap::new(),
            error_pubtopic: None,
            instance_id: None,
            http: HttpConfig::default(),
            max_workers: 4,
            grace_period_ms: 10_000,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ComponentConfig {
    /// Minimal bus component config.
    pub fn new(func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            ..Self::default()
        }
    }

    /// Logical component name: the queue name and error name prefix.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.func)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// `host` with the heartbeat parameter applied.
    pub fn broker_url(&self) -> Result<String, ConfigError> {
        Ok(with_heartbeat(&self.host, self.heartbeat)?)
    }

    pub fn func_ref(&self) -> Result<FuncRef, ConfigError> {
        self.func.parse()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.func_ref()?;

        if self.name().trim().is_empty() {
            return Err(ConfigError::Invalid("component name cannot be empty".into()));
        }

        if self.exchange.trim().is_empty() {
            return Err(ConfigError::Invalid("exchange cannot be empty".into()));
        }

        if self.max_workers == 0 {
            return Err(ConfigError::InvalidLimit("max_workers cannot be 0".into()));
        }

        if self.grace_period_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "grace_period_ms cannot be 0".into(),
            ));
        }

        if self.heartbeat == Some(0) {
            return Err(ConfigError::InvalidTimeout("heartbeat cannot be 0".into()));
        }

        if self.protocol == Protocol::Bus {
            self.broker_url()?;
            self.connection
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        Ok(())
    }
}

/// A `module:name` handler reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncRef {
    pub module: String,
    pub name: String,
}

impl FromStr for FuncRef {
    type Err = ConfigError;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedFuncRef(reference.to_string());
        let (module, name) = reference.split_once(':').ok_or_else(malformed)?;
        let valid = |part: &str| {
            !part.is_empty() && !part.contains(':') && !part.chars().any(char::is_whitespace)
        };
        if !valid(module) || !valid(name) {
            return Err(malformed());
        }
        Ok(Self {
            module: module.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed function reference `{0}` (expected `module:name`)")]
    MalformedFuncRef(String),

    #[error("invalid broker url: {0}")]
    BrokerUrl(#[from] BrokerUrlError),

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
