//! # Relay Invoker
//!
//! Hosts one handler as a component: binds inbound envelopes to the handler's
//! parameters, runs it, and routes every result.
//!
//! ```text
//!            ┌──────────────────────────── BusInvoker ────────────────────────────┐
//!  delivery ─► decode ─► Dispatcher ─► Handler::call(ctx, args) ─► ctx.emit(..)    │
//!            │                                                        │           │
//!            │                  routing::route_output ◄───────────────┘           │
//!            │                          │  scope transition + key selection       │
//!            │                          ▼                                         │
//!            │                 ConnectionManager::publish ─► ack                  │
//!            └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures never crash the consume loop: they become one error envelope on
//! `<component>_error` (plus the requester's `reply_to`, if any).

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod binding;
pub mod bus_invoker;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod http_invoker;
pub mod routing;

pub use binding::{bind, lookup, Args, BindingError, Param, CONTEXT_PARAM};
pub use bus_invoker::{BusInvoker, InvokerState};
pub use config::{ComponentConfig, ConfigError, FuncRef, HttpConfig, Protocol};
pub use context::{Context, Emitted, Output};
pub use dispatch::{Dispatcher, Invocation};
pub use error::{HandlerError, HandlerResult, InvocationError, InvokerError, SourceLocation};
pub use handler::{handler_fn, ContextHandler, FnHandler, Handler};
pub use http_invoker::HttpInvoker;
pub use routing::{route_error, route_output, transition, Identity, Route};
