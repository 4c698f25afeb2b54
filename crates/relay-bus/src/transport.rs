//! # Transport Abstraction
//!
//! The minimum a topic-exchange broker has to offer: named exchanges, shared
//! and exclusive queues, wildcard bindings, publish, and an iterator over a
//! queue's deliveries with explicit acknowledgement.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

/// Broker-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("channel closed")]
    ChannelClosed,

    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("resource locked: {0}")]
    ResourceLocked(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl TransportError {
    /// Connectivity faults that a reconnect can cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused(_)
                | Self::ConnectionClosed
                | Self::ChannelClosed
                | Self::HeartbeatTimeout
        )
    }
}

/// Queue declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueSpec {
    pub name: String,
    /// Owned by the declaring connection and removed when it closes.
    pub exclusive: bool,
}

impl QueueSpec {
    pub fn shared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exclusive: false,
        }
    }

    pub fn exclusive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exclusive: true,
        }
    }
}

/// Entry point to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> TransportResult<Box<dyn Connection>>;

    /// Human-readable broker address for logs.
    fn describe(&self) -> String;
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn open_channel(&self) -> TransportResult<Box<dyn Channel>>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare a topic exchange. Idempotent.
    async fn declare_exchange(&self, name: &str) -> TransportResult<()>;

    /// Declare a queue. Idempotent for the same owner.
    async fn declare_queue(&self, spec: &QueueSpec) -> TransportResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, binding_key: &str)
        -> TransportResult<()>;

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> TransportResult<()>;

    /// Publish to an exchange; returns the number of queues the message reached.
    async fn publish(&self, exchange: &str, routing_key: &str, body: Bytes)
        -> TransportResult<usize>;

    async fn consume(&self, queue: &str) -> TransportResult<Box<dyn Consumer>>;

    fn is_open(&self) -> bool;
}

/// Iterator over one queue's deliveries.
#[async_trait]
pub trait Consumer: Send {
    /// `None` once the consumer has been cancelled by the broker.
    async fn next(&mut self) -> Option<TransportResult<Delivery>>;
}

/// Settles a delivery with the broker.
pub trait Acker: Send {
    fn ack(self: Box<Self>) -> TransportResult<()>;

    /// Return the message to the head of its queue.
    fn requeue(self: Box<Self>);
}

/// A message handed to a consumer.
///
/// Dropping a delivery without calling [`Delivery::ack`] requeues it.
pub struct Delivery {
    body: Bytes,
    routing_key: String,
    redelivered: bool,
    acker: Option<Box<dyn Acker>>,
}

impl Delivery {
    pub fn new(
        body: Bytes,
        routing_key: impl Into<String>,
        redelivered: bool,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            body,
            routing_key: routing_key.into(),
            redelivered,
            acker: Some(acker),
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn ack(mut self) -> TransportResult<()> {
        match self.acker.take() {
            Some(acker) => acker.ack(),
            None => Ok(()),
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(acker) = self.acker.take() {
            acker.requeue();
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("len", &self.body.len())
            .finish()
    }
}
