//! # Relay Runtime
//!
//! The `relay` command line, as a library so the startup path can be tested.
//!
//! ```text
//! relay start product.toml dev.toml
//!   └─► manifest::load ─► ComponentConfig ─► registry.resolve(func)
//!         ─► resolve_transport(host) ─► BusInvoker::bind ─► run until SIGINT/SIGTERM
//!
//! relay gateway gateway.toml dev.toml
//!   └─► manifest::load ─► GatewayConfig ─► GatewayService::run until SIGINT/SIGTERM
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cli;
pub mod launch;
pub mod manifest;
pub mod registry;
pub mod transport;

pub use cli::{Cli, Command};
pub use launch::{run_component, run_gateway, shutdown_signal};
pub use manifest::ManifestError;
pub use registry::{Registry, RegistryError};
pub use transport::{resolve_transport, TransportResolveError};
