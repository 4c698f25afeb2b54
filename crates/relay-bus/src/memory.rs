//! # In-Memory Broker
//!
//! A topic-exchange broker living inside the process. It implements the full
//! [`Transport`] contract: durable shared queues with competing consumers,
//! exclusive queues tied to their declaring connection, wildcard bindings,
//! and requeue-on-drop acknowledgement.
//!
//! Suitable for single-process deployments and tests; networked deployments
//! plug another [`Transport`] into the same connection manager.
//!
//! Fault injection hooks (`set_reachable`, `sever_connections`,
//! `fail_publishes`) let tests exercise the reconnect and redelivery paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::matching::topic_matches;
use crate::transport::{
    Acker, Channel, Connection, Consumer, Delivery, QueueSpec, Transport, TransportError,
    TransportResult,
};

/// Process-wide brokers addressed as `memory://<name>`.
static NAMED_BROKERS: OnceLock<DashMap<String, InMemoryBroker>> = OnceLock::new();

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Bytes,
    routing_key: String,
    redelivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BindingEntry {
    exchange: String,
    key: String,
}

struct QueueState {
    ready: VecDeque<StoredMessage>,
    exclusive_owner: Option<u64>,
    bindings: Vec<BindingEntry>,
    notify: Arc<Notify>,
}

impl QueueState {
    fn new(exclusive_owner: Option<u64>) -> Self {
        Self {
            ready: VecDeque::new(),
            exclusive_owner,
            bindings: Vec::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn accessible_by(&self, connection: u64) -> bool {
        self.exclusive_owner.map_or(true, |owner| owner == connection)
    }
}

struct ConnectionState {
    id: u64,
    open: AtomicBool,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    connections: HashMap<u64, Arc<ConnectionState>>,
    /// Remaining publishes to reject, per routing key.
    publish_faults: HashMap<String, usize>,
}

struct BrokerInner {
    name: String,
    state: Mutex<BrokerState>,
    reachable: AtomicBool,
    connect_attempts: AtomicUsize,
    next_connection: AtomicU64,
    published: AtomicU64,
}

/// In-process topic-exchange broker. Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_name("default")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                name: name.into(),
                state: Mutex::new(BrokerState::default()),
                reachable: AtomicBool::new(true),
                connect_attempts: AtomicUsize::new(0),
                next_connection: AtomicU64::new(1),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// The shared broker registered under `name`, created on first use.
    pub fn named(name: &str) -> Self {
        NAMED_BROKERS
            .get_or_init(DashMap::new)
            .entry(name.to_string())
            .or_insert_with(|| Self::with_name(name))
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// While unreachable, `connect` fails with a transient error.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drop every live connection as if the broker had restarted its listener.
    ///
    /// Exclusive queues die with their connections; shared queues and their
    /// messages survive.
    pub fn sever_connections(&self) {
        let ids: Vec<u64> = self.inner.state.lock().connections.keys().copied().collect();
        debug!(broker = %self.inner.name, count = ids.len(), "Severing connections");
        for id in ids {
            self.inner.close_connection(id);
        }
    }

    /// Reject the next `count` publishes with exactly `routing_key` as if
    /// the channel had closed under them. Connections stay up.
    pub fn fail_publishes(&self, routing_key: &str, count: usize) {
        self.inner
            .state
            .lock()
            .publish_faults
            .insert(routing_key.to_string(), count);
    }

    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn messages_published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Ready (unconsumed, unacknowledged-and-returned) messages in `queue`.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.inner.state.lock().queues.get(queue).map(|q| q.ready.len())
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.inner.state.lock().queues.contains_key(queue)
    }

    /// Binding keys of `queue`, in declaration order.
    pub fn bindings(&self, queue: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.bindings.iter().map(|b| b.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove and return every ready message body in `queue`.
    pub fn drain_queue(&self, queue: &str) -> Vec<Bytes> {
        self.inner
            .state
            .lock()
            .queues
            .get_mut(queue)
            .map(|q| q.ready.drain(..).map(|m| m.body).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerInner {
    fn is_live(&self, connection: &ConnectionState) -> bool {
        connection.open.load(Ordering::SeqCst)
    }

    fn close_connection(&self, id: u64) {
        let mut state = self.state.lock();
        let Some(connection) = state.connections.remove(&id) else {
            return;
        };
        connection.open.store(false, Ordering::SeqCst);

        let mut wakeups = Vec::new();
        state.queues.retain(|name, queue| {
            wakeups.push(queue.notify.clone());
            if queue.exclusive_owner == Some(id) {
                debug!(queue = %name, connection = id, "Deleting exclusive queue");
                false
            } else {
                true
            }
        });
        drop(state);

        // wake consumers so they observe the closed connection
        for notify in wakeups {
            notify.notify_waiters();
        }
    }

    fn route(&self, exchange: &str, routing_key: &str, body: Bytes) -> TransportResult<usize> {
        let mut state = self.state.lock();
        if let Some(remaining) = state.publish_faults.get_mut(routing_key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::ChannelClosed);
            }
        }
        if !state.exchanges.contains(exchange) {
            return Err(TransportError::NotFound {
                kind: "exchange",
                name: exchange.to_string(),
            });
        }

        let mut routed = 0;
        for (name, queue) in state.queues.iter_mut() {
            let matched = queue
                .bindings
                .iter()
                .any(|b| b.exchange == exchange && topic_matches(&b.key, routing_key));
            if matched {
                trace!(queue = %name, routing_key, "Routed message");
                queue.ready.push_back(StoredMessage {
                    body: body.clone(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                });
                queue.notify.notify_waiters();
                routed += 1;
            }
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(routed)
    }

    fn requeue(&self, queue: &str, mut message: StoredMessage) {
        let mut state = self.state.lock();
        if let Some(q) = state.queues.get_mut(queue) {
            message.redelivered = true;
            q.ready.push_front(message);
            q.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn connect(&self) -> TransportResult<Box<dyn Connection>> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionRefused(self.describe()));
        }

        let id = self.inner.next_connection.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(ConnectionState {
            id,
            open: AtomicBool::new(true),
        });
        self.inner
            .state
            .lock()
            .connections
            .insert(id, state.clone());
        debug!(broker = %self.inner.name, connection = id, "Connection opened");

        Ok(Box::new(MemoryConnection {
            broker: self.inner.clone(),
            state,
        }))
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.inner.name)
    }
}

struct MemoryConnection {
    broker: Arc<BrokerInner>,
    state: Arc<ConnectionState>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_channel(&self) -> TransportResult<Box<dyn Channel>> {
        if !self.broker.is_live(&self.state) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(Box::new(MemoryChannel {
            broker: self.broker.clone(),
            connection: self.state.clone(),
        }))
    }

    fn is_open(&self) -> bool {
        self.broker.is_live(&self.state)
    }

    async fn close(&self) {
        self.broker.close_connection(self.state.id);
    }
}

struct MemoryChannel {
    broker: Arc<BrokerInner>,
    connection: Arc<ConnectionState>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> TransportResult<()> {
        if self.broker.is_live(&self.connection) {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed)
        }
    }

    fn owner(&self) -> u64 {
        self.connection.id
    }
}

fn queue_not_found(queue: &str) -> TransportError {
    TransportError::NotFound {
        kind: "queue",
        name: queue.to_string(),
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, name: &str) -> TransportResult<()> {
        self.ensure_open()?;
        if name.is_empty() {
            return Err(TransportError::InvalidArgument(
                "exchange name must not be empty".into(),
            ));
        }
        self.broker.state.lock().exchanges.insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> TransportResult<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        match state.queues.get(&spec.name) {
            Some(existing) => {
                let same_kind = existing.exclusive_owner.is_some() == spec.exclusive;
                if !same_kind || !existing.accessible_by(self.owner()) {
                    return Err(TransportError::ResourceLocked(spec.name.clone()));
                }
            }
            None => {
                let owner = spec.exclusive.then_some(self.owner());
                state.queues.insert(spec.name.clone(), QueueState::new(owner));
                debug!(queue = %spec.name, exclusive = spec.exclusive, "Queue declared");
            }
        }
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if !state.exchanges.contains(exchange) {
            return Err(TransportError::NotFound {
                kind: "exchange",
                name: exchange.to_string(),
            });
        }
        let owner = self.owner();
        let q = state.queues.get_mut(queue).ok_or_else(|| queue_not_found(queue))?;
        if !q.accessible_by(owner) {
            return Err(TransportError::ResourceLocked(queue.to_string()));
        }
        let entry = BindingEntry {
            exchange: exchange.to_string(),
            key: binding_key.to_string(),
        };
        if !q.bindings.contains(&entry) {
            q.bindings.push(entry);
        }
        Ok(())
    }

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        let q = state.queues.get_mut(queue).ok_or_else(|| queue_not_found(queue))?;
        q.bindings
            .retain(|b| !(b.exchange == exchange && b.key == binding_key));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Bytes,
    ) -> TransportResult<usize> {
        self.ensure_open()?;
        self.broker.route(exchange, routing_key, body)
    }

    async fn consume(&self, queue: &str) -> TransportResult<Box<dyn Consumer>> {
        self.ensure_open()?;
        let state = self.broker.state.lock();
        let q = state.queues.get(queue).ok_or_else(|| queue_not_found(queue))?;
        if !q.accessible_by(self.owner()) {
            return Err(TransportError::ResourceLocked(queue.to_string()));
        }
        Ok(Box::new(MemoryConsumer {
            broker: self.broker.clone(),
            connection: self.connection.clone(),
            queue: queue.to_string(),
        }))
    }

    fn is_open(&self) -> bool {
        self.broker.is_live(&self.connection)
    }
}

struct MemoryConsumer {
    broker: Arc<BrokerInner>,
    connection: Arc<ConnectionState>,
    queue: String,
}

impl MemoryConsumer {
    fn notifier(&self) -> TransportResult<Arc<Notify>> {
        let state = self.broker.state.lock();
        state
            .queues
            .get(&self.queue)
            .map(|q| q.notify.clone())
            .ok_or_else(|| queue_not_found(&self.queue))
    }

    fn try_take(&self) -> Option<StoredMessage> {
        self.broker
            .state
            .lock()
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.ready.pop_front())
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Option<TransportResult<Delivery>> {
        loop {
            if !self.broker.is_live(&self.connection) {
                return Some(Err(TransportError::ChannelClosed));
            }
            let notify = match self.notifier() {
                Ok(notify) => notify,
                Err(e) => return Some(Err(e)),
            };

            // Register interest before checking the queue so a publish
            // between the check and the await still wakes us.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.broker.is_live(&self.connection) {
                return Some(Err(TransportError::ChannelClosed));
            }
            if let Some(message) = self.try_take() {
                let acker = MemoryAcker {
                    broker: self.broker.clone(),
                    connection: self.connection.clone(),
                    queue: self.queue.clone(),
                    message: message.clone(),
                };
                return Some(Ok(Delivery::new(
                    message.body,
                    message.routing_key,
                    message.redelivered,
                    Box::new(acker),
                )));
            }

            notified.await;
        }
    }
}

struct MemoryAcker {
    broker: Arc<BrokerInner>,
    connection: Arc<ConnectionState>,
    queue: String,
    message: StoredMessage,
}

impl Acker for MemoryAcker {
    fn ack(self: Box<Self>) -> TransportResult<()> {
        if self.broker.is_live(&self.connection) {
            return Ok(());
        }
        // The channel died while the message was unacknowledged, so the
        // broker has already taken it back.
        let MemoryAcker {
            broker,
            queue,
            message,
            ..
        } = *self;
        broker.requeue(&queue, message);
        Err(TransportError::ChannelClosed)
    }

    fn requeue(self: Box<Self>) {
        let MemoryAcker {
            broker,
            queue,
            message,
            ..
        } = *self;
        broker.requeue(&queue, message);
    }
}
