//! # Relay Telemetry
//!
//! Logging setup shared by the `relay` binary and anything embedding the
//! invoker or gateway crates.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_telemetry::{init_tracing, TelemetryConfig};
//!
//! fn main() {
//!     init_tracing(&TelemetryConfig::from_env()).expect("logging");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RELAY_LOG_LEVEL` | `RUST_LOG`, then `info` | Log level filter |
//! | `RELAY_JSON_LOGS` | `false` | JSON lines output |
//! | `RELAY_SERVICE_NAME` | `relay` | Service name |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
}
