//! Declarative broker topology.
//!
//! Exchanges, queues and bindings are recorded as data so the connection
//! manager can replay them after a reconnect. Every step is idempotent.

use crate::transport::{Channel, QueueSpec, TransportResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    exchanges: Vec<String>,
    queues: Vec<QueueSpec>,
    bindings: Vec<Binding>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exchange(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.exchanges.contains(&name) {
            self.exchanges.push(name);
        }
        self
    }

    #[must_use]
    pub fn queue(mut self, spec: QueueSpec) -> Self {
        if !self.queues.contains(&spec) {
            self.queues.push(spec);
        }
        self
    }

    #[must_use]
    pub fn bind(
        mut self,
        queue: impl Into<String>,
        exchange: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        let binding = Binding {
            queue: queue.into(),
            exchange: exchange.into(),
            key: key.into(),
        };
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
        self
    }

    /// Add everything in `other` that is not already declared.
    pub fn merge(&mut self, other: &Topology) {
        let merged = other
            .exchanges
            .iter()
            .fold(std::mem::take(self), |t, e| t.exchange(e.clone()));
        let merged = other
            .queues
            .iter()
            .fold(merged, |t, q| t.queue(q.clone()));
        *self = other.bindings.iter().fold(merged, |t, b| {
            t.bind(b.queue.clone(), b.exchange.clone(), b.key.clone())
        });
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty() && self.queues.is_empty() && self.bindings.is_empty()
    }

    pub fn exchanges(&self) -> &[String] {
        &self.exchanges
    }

    pub fn queues(&self) -> &[QueueSpec] {
        &self.queues
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Declare exchanges, then queues, then bindings.
    pub async fn apply(&self, channel: &dyn Channel) -> TransportResult<()> {
        for exchange in &self.exchanges {
            channel.declare_exchange(exchange).await?;
        }
        for queue in &self.queues {
            channel.declare_queue(queue).await?;
        }
        for binding in &self.bindings {
            channel
                .bind_queue(&binding.queue, &binding.exchange, &binding.key)
                .await?;
        }
        Ok(())
    }
}
