//! # Relay Bus
//!
//! Topic-exchange plumbing for relay components.
//!
//! ```text
//! ┌──────────────┐  publish / subscribe  ┌───────────────────┐   Transport   ┌────────────┐
//! │ Invoker /    │ ────────────────────► │ ConnectionManager │ ────────────► │   broker   │
//! │ RPC Gateway  │ ◄──── deliveries ──── │  (pool, retry,    │ ◄──────────── │ (exchange, │
//! └──────────────┘                       │   topology replay)│               │  queues)   │
//!                                        └───────────────────┘               └────────────┘
//! ```
//!
//! - `transport`: the broker contract (exchanges, queues, bindings, publish, consume)
//! - `memory`: in-process implementation of that contract
//! - `connection`: retrying connection owner with a bounded channel pool
//! - `shutdown`: cancellation plus in-flight accounting for graceful drain

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod connection;
pub mod error;
pub mod matching;
pub mod memory;
pub mod pool;
pub mod retry;
pub mod shutdown;
pub mod topology;
pub mod transport;
pub mod url;

pub use connection::{ConnectionConfig, ConnectionManager, Subscription};
pub use error::ConnectionError;
pub use matching::topic_matches;
pub use memory::InMemoryBroker;
pub use pool::{ChannelPool, PooledChannel};
pub use retry::{retry, RetryPolicy};
pub use shutdown::{DrainOutcome, InFlightGuard, ShutdownGate};
pub use topology::{Binding, Topology};
pub use transport::{
    Acker, Channel, Connection, Consumer, Delivery, QueueSpec, Transport, TransportError,
    TransportResult,
};
pub use url::{with_heartbeat, BrokerUrl, BrokerUrlError};

/// Exchange used when a component does not name one.
pub const DEFAULT_EXCHANGE: &str = "primary";
