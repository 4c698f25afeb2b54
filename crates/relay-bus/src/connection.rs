//! # Connection / Channel Resilience Manager
//!
//! Owns the broker connection for one component or gateway instance.
//!
//! - **Establish** with retry: transient failures back off per [`RetryPolicy`];
//!   protocol errors fail immediately.
//! - **Pool** channels: consume loops hold one channel each for the lifetime of
//!   their subscription, publishers check one out per operation.
//! - **Recover** after broker-initiated loss: reconnect, bump the connection
//!   generation, and replay the recorded [`Topology`].
//!
//! Recovery is single-flight: concurrent callers that saw the same failed
//! generation wait on one reconnect instead of racing.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::pool::{ChannelPool, PooledChannel};
use crate::retry::{retry, RetryPolicy};
use crate::shutdown::ShutdownGate;
use crate::topology::Topology;
use crate::transport::{Connection, Consumer, Delivery, Transport, TransportError, TransportResult};

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Backoff for establishing (and re-establishing) the connection.
    pub retry: RetryPolicy,
    /// Channels available to publishers and declarations on top of the one
    /// each consume loop holds for its lifetime.
    pub pool_size: usize,
    /// Attempts per publish/declare/subscribe before giving up.
    pub operation_retries: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            pool_size: 4,
            operation_retries: 3,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConnectionError> {
        self.retry.validate().map_err(ConnectionError::Config)?;
        if self.pool_size == 0 {
            return Err(ConnectionError::Config("pool_size must be at least 1".into()));
        }
        if self.operation_retries == 0 {
            return Err(ConnectionError::Config(
                "operation_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

struct Link {
    connection: Option<Arc<dyn Connection>>,
    generation: u64,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    link: Mutex<Link>,
    generation: AtomicU64,
    pool: Arc<ChannelPool>,
    topology: parking_lot::Mutex<Topology>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Arc<Self> {
        Self::with_consumers(transport, config, 0)
    }

    /// Size the pool for `consume_loops` long-lived subscriptions plus
    /// `pool_size` channels left over for publishing.
    pub fn with_consumers(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        consume_loops: usize,
    ) -> Arc<Self> {
        let pool = ChannelPool::new(consume_loops + config.pool_size);
        Arc::new(Self {
            transport,
            config,
            link: Mutex::new(Link {
                connection: None,
                generation: 0,
            }),
            generation: AtomicU64::new(0),
            pool,
            topology: parking_lot::Mutex::new(Topology::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Current connection generation; `0` before the first connect.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Establish the connection if it is not already up.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.connection().await.map(|_| ())
    }

    /// Record `topology` for replay and declare it now.
    pub async fn declare(&self, topology: &Topology) -> Result<(), ConnectionError> {
        self.topology.lock().merge(topology);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let generation = self.generation();
            let failure = match self.checkout().await {
                Ok(channel) => match topology.apply(&*channel).await {
                    Ok(()) => return Ok(()),
                    Err(e) => (channel.generation(), e),
                },
                Err(ConnectionError::Transport(e)) => (generation, e),
                Err(other) => return Err(other),
            };
            self.handle_failure("declare", attempt, failure).await?;
        }
    }

    /// Publish `body`; recovers and retries on transient failures.
    ///
    /// Returns the number of queues the message was routed to.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Bytes,
    ) -> Result<usize, ConnectionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let generation = self.generation();
            let failure = match self.checkout().await {
                Ok(channel) => match channel.publish(exchange, routing_key, body.clone()).await {
                    Ok(routed) => {
                        debug!(exchange, routing_key, routed, "Published");
                        return Ok(routed);
                    }
                    Err(e) => (channel.generation(), e),
                },
                Err(ConnectionError::Transport(e)) => (generation, e),
                Err(other) => return Err(other),
            };
            self.handle_failure("publish", attempt, failure).await?;
        }
    }

    /// Start consuming `queue`. The subscription holds a pooled channel until dropped.
    pub async fn subscribe(&self, queue: &str) -> Result<Subscription, ConnectionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let generation = self.generation();
            let failure = match self.checkout().await {
                Ok(channel) => match channel.consume(queue).await {
                    Ok(consumer) => {
                        debug!(queue, generation = channel.generation(), "Subscribed");
                        return Ok(Subscription {
                            consumer,
                            channel,
                        });
                    }
                    Err(e) => (channel.generation(), e),
                },
                Err(ConnectionError::Transport(e)) => (generation, e),
                Err(other) => return Err(other),
            };
            self.handle_failure("subscribe", attempt, failure).await?;
        }
    }

    /// Consume `queue` until `gate` is triggered, re-subscribing after transient loss.
    ///
    /// Each delivery is admitted through the gate and handled to completion
    /// before the next one is taken, so acknowledgements follow delivery order.
    pub async fn consume_until<F, Fut>(
        &self,
        queue: &str,
        gate: &ShutdownGate,
        mut on_delivery: F,
    ) -> Result<(), ConnectionError>
    where
        F: FnMut(Delivery) -> Fut,
        Fut: Future<Output = ()>,
    {
        let token = gate.token();
        loop {
            let mut subscription = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                subscription = self.subscribe(queue) => subscription?,
            };

            let failed_generation = loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(()),
                    next = subscription.next() => next,
                };
                match next {
                    Some(Ok(delivery)) => {
                        // dropping the delivery requeues it
                        let Some(_guard) = gate.enter() else {
                            return Ok(());
                        };
                        on_delivery(delivery).await;
                    }
                    Some(Err(e)) if e.is_transient() => {
                        warn!(queue, error = %e, "Consumer lost its channel");
                        break subscription.generation();
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        warn!(queue, "Consumer cancelled by broker");
                        break subscription.generation();
                    }
                }
            };

            drop(subscription);
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                recovered = self.recover(failed_generation) => { recovered?; }
            }
        }
    }

    /// Re-establish the connection if `failed_generation` is still current.
    ///
    /// Returns the generation in effect afterwards.
    pub async fn recover(&self, failed_generation: u64) -> Result<u64, ConnectionError> {
        let mut link = self.link.lock().await;
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        let healthy = link.connection.as_ref().is_some_and(|c| c.is_open());
        if healthy && link.generation != failed_generation {
            return Ok(link.generation);
        }
        self.establish(&mut link).await?;
        Ok(link.generation)
    }

    /// Close the connection and stop every pending retry.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.pool.close();
        let mut link = self.link.lock().await;
        if let Some(connection) = link.connection.take() {
            connection.close().await;
            info!(broker = %self.transport.describe(), "Connection closed");
        }
    }

    async fn connection(&self) -> Result<(u64, Arc<dyn Connection>), ConnectionError> {
        let mut link = self.link.lock().await;
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        if let Some(connection) = link.connection.as_ref().filter(|c| c.is_open()) {
            return Ok((link.generation, connection.clone()));
        }
        let connection = self.establish(&mut link).await?;
        Ok((link.generation, connection))
    }

    async fn establish(&self, link: &mut Link) -> Result<Arc<dyn Connection>, ConnectionError> {
        if let Some(stale) = link.connection.take() {
            stale.close().await;
        }

        let broker = self.transport.describe();
        let transport = self.transport.clone();
        let connection: Arc<dyn Connection> = retry(
            &self.config.retry,
            &self.cancel,
            "connect",
            |attempt| {
                let transport = transport.clone();
                debug!(broker = %transport.describe(), attempt, "Connecting");
                async move { transport.connect().await }
            },
        )
        .await?
        .into();

        let generation = link.generation + 1;
        self.pool.reset(generation);

        let topology = self.topology.lock().clone();
        if !topology.is_empty() {
            let channel = connection.open_channel().await?;
            topology.apply(channel.as_ref()).await?;
            debug!(
                queues = topology.queues().len(),
                bindings = topology.bindings().len(),
                "Topology replayed"
            );
        }

        link.generation = generation;
        link.connection = Some(connection.clone());
        self.generation.store(generation, Ordering::SeqCst);
        info!(broker = %broker, generation, "Connected to broker");
        Ok(connection)
    }

    async fn checkout(&self) -> Result<PooledChannel, ConnectionError> {
        let (generation, connection) = self.connection().await?;
        self.pool.checkout(&connection, generation).await
    }

    async fn handle_failure(
        &self,
        operation: &str,
        attempt: u32,
        (generation, error): (u64, TransportError),
    ) -> Result<(), ConnectionError> {
        if !error.is_transient() {
            return Err(error.into());
        }
        if attempt >= self.config.operation_retries {
            return Err(ConnectionError::RetriesExhausted {
                attempts: attempt,
                source: error,
            });
        }
        warn!(operation, attempt, generation, error = %error, "Transient failure, recovering");
        self.recover(generation).await.map(|_| ())
    }
}

/// An active consumer plus the pooled channel it runs on.
pub struct Subscription {
    consumer: Box<dyn Consumer>,
    channel: PooledChannel,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<TransportResult<Delivery>> {
        self.consumer.next().await
    }

    pub fn generation(&self) -> u64 {
        self.channel.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use crate::transport::QueueSpec;
    use std::time::Duration;
    use tokio::time::timeout;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            retry: RetryPolicy::immediate(5),
            ..ConnectionConfig::default()
        }
    }

    fn topology() -> Topology {
        Topology::new()
            .exchange("primary")
            .queue(QueueSpec::shared("work"))
            .bind("work", "primary", "#.work.#")
    }

    #[tokio::test]
    async fn test_connect_retries_until_reachable() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let manager = ConnectionManager::new(Arc::new(broker.clone()), ConnectionConfig {
            retry: RetryPolicy {
                max_attempts: 20,
                initial_delay_ms: 10,
                multiplier: 1.0,
                max_delay_ms: 10,
                jitter_ms: 0,
            },
            ..ConnectionConfig::default()
        });

        let revive = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            revive.set_reachable(true);
        });

        manager.connect().await.unwrap();
        assert!(broker.connect_attempts() > 1);
        assert_eq!(manager.generation(), 1);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_budget() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        let manager = ConnectionManager::new(Arc::new(broker.clone()), config());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::RetriesExhausted { attempts: 5, .. }));
        assert_eq!(broker.connect_attempts(), 5);
    }

    #[tokio::test]
    async fn test_publish_recovers_after_sever() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()), config());
        manager.declare(&topology()).await.unwrap();

        broker.sever_connections();
        let routed = manager
            .publish("primary", "work", Bytes::from_static(b"1"))
            .await
            .unwrap();
        assert_eq!(routed, 1);
        assert_eq!(manager.generation(), 2);
    }

    #[tokio::test]
    async fn test_topology_replayed_on_reconnect() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()), config());
        let private = Topology::new()
            .exchange("primary")
            .queue(QueueSpec::exclusive("me/1"))
            .bind("me/1", "primary", "#.one.#");
        manager.declare(&private).await.unwrap();

        broker.sever_connections();
        assert!(!broker.queue_exists("me/1"));

        manager.recover(1).await.unwrap();
        assert!(broker.queue_exists("me/1"));
        assert_eq!(broker.bindings("me/1"), vec!["#.one.#"]);
    }

    #[tokio::test]
    async fn test_recover_is_single_flight() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()), config());
        manager.connect().await.unwrap();
        broker.sever_connections();

        let (a, b) = tokio::join!(manager.recover(1), manager.recover(1));
        assert_eq!(a.unwrap(), 2);
        assert_eq!(b.unwrap(), 2);
        assert_eq!(broker.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()), config());
        manager.connect().await.unwrap();

        let err = manager
            .publish("no-such-exchange", "k", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Transport(TransportError::NotFound { .. })));
        assert_eq!(manager.generation(), 1);
    }

    #[tokio::test]
    async fn test_consume_until_resubscribes_after_sever() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()), config());
        manager.declare(&topology()).await.unwrap();
        let gate = ShutdownGate::new();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let consumer = {
            let manager = manager.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                manager
                    .consume_until("work", &gate, |delivery| {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(delivery.body().clone());
                            let _ = delivery.ack();
                        }
                    })
                    .await
            })
        };

        manager.publish("primary", "work", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap(), "1");

        broker.sever_connections();
        manager.publish("primary", "work", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap(), "2");

        gate.trigger();
        timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_consumers_do_not_starve_publishers() {
        let broker = InMemoryBroker::new();
        let config = ConnectionConfig {
            pool_size: 1,
            ..config()
        };
        let manager = ConnectionManager::with_consumers(Arc::new(broker.clone()), config, 2);
        assert_eq!(manager.pool().max_size(), 3);
        manager
            .declare(&topology().queue(QueueSpec::shared("side")))
            .await
            .unwrap();

        let _work = manager.subscribe("work").await.unwrap();
        let _side = manager.subscribe("side").await.unwrap();
        assert_eq!(manager.pool().available(), 1);

        let routed = timeout(
            Duration::from_secs(1),
            manager.publish("primary", "work", Bytes::from_static(b"1")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(routed, 1);
    }

    #[tokio::test]
    async fn test_closed_manager_rejects_operations() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(Arc::new(broker.clone()), config());
        manager.connect().await.unwrap();
        manager.close().await;

        assert_eq!(broker.connection_count(), 0);
        assert!(matches!(
            manager.publish("primary", "k", Bytes::new()).await,
            Err(ConnectionError::Closed)
        ));
    }
}
