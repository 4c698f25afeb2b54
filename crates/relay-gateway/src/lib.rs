#![allow(missing_docs)]

//! # Relay Gateway
//!
//! Synchronous request/reply over the relay bus.
//!
//! ```text
//!  HTTP GET|POST /a/b ──► GatewayService ──► RpcGateway::call("a.b", payload)
//!                                                 │  register(cid) in PendingReplyStore
//!                                                 │  publish, scope.reply_to = "<instance>.<cid>"
//!                                                 ▼
//!                                           topic exchange ──► responder component
//!                                                 │
//!              reply loop on gateway:<instance> ◄─┘  complete(cid) ──► caller wakes
//! ```
//!
//! A call ends in exactly one of: the reply envelope, an error reply
//! (`502`), a timeout (`504`) after which its registration is removed, or a
//! rejection before publishing (`400`/`503`).
//!
//! # Usage
//!
//! ```ignore
//! let gateway = RpcGateway::new(GatewayConfig::default(), transport)?;
//! gateway.start().await?;
//! let reply = gateway.call("product", json!({"x": 4, "y": 5}), None).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod rpc;
pub mod service;

pub use domain::config::{ConfigError, GatewayConfig, HttpConfig};
pub use domain::correlation::CorrelationId;
pub use domain::error::GatewayError;
pub use domain::pending::{PendingReply, PendingReplyStore, PendingStats};
pub use rpc::RpcGateway;
pub use service::{topic_from_path, GatewayService};
