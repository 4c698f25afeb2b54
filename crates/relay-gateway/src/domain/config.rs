//! Gateway configuration with validation.

use relay_bus::{with_heartbeat, ConnectionConfig, DEFAULT_EXCHANGE};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub http: HttpConfig,
    /// Broker URL
    pub host: String,
    /// Exchange requests are published to
    pub exchange: String,
    /// Broker heartbeat in seconds
    pub heartbeat: Option<u64>,
    /// Deployment label attached to log output
    pub namespace: String,
    /// Fixed instance id; generated when absent
    pub instance_id: Option<String>,
    /// Default wait for a reply (default: 1 hour)
    pub rpc_timeout_ms: u64,
    /// Calls allowed in flight at once
    pub max_concurrent_rpcs: usize,
    /// How often abandoned registrations are swept
    pub cleanup_interval_ms: u64,
    /// Broker connection settings
    pub connection: ConnectionConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            host: "memory://local".to_string(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            heartbeat: None,
            namespace: "local".to_string(),
            instance_id: None,
            rpc_timeout_ms: 3_600_000,
            max_concurrent_rpcs: 10_000,
            cleanup_interval_ms: 10_000,
            connection: ConnectionConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.trim().is_empty() {
            return Err(ConfigError::Invalid("exchange cannot be empty".into()));
        }

        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "rpc_timeout_ms cannot be 0".into(),
            ));
        }

        if self.cleanup_interval_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "cleanup_interval_ms cannot be 0".into(),
            ));
        }

        if self.max_concurrent_rpcs == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_concurrent_rpcs cannot be 0".into(),
            ));
        }

        self.broker_url()?;
        self.connection
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// `host` with the heartbeat parameter applied.
    pub fn broker_url(&self) -> Result<String, ConfigError> {
        with_heartbeat(&self.host, self.heartbeat).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
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

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
