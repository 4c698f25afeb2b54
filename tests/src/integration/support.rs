//! Shared fixtures: one in-memory broker per test, components launched on it,
//! and observer queues that capture what gets published to a topic.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relay_bus::{
    ConnectionConfig, ConnectionManager, InMemoryBroker, QueueSpec, RetryPolicy, Topology,
    Transport,
};
use relay_gateway::{GatewayConfig, RpcGateway};
use relay_invoker::{BusInvoker, ComponentConfig, Handler, InvokerError, InvokerState};
use relay_types::{decode, encode, Envelope, PubTopic, SubTopic};
use tokio::task::JoinHandle;

pub const EXCHANGE: &str = "primary";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn fast_connection() -> ConnectionConfig {
    ConnectionConfig {
        retry: RetryPolicy::immediate(5),
        ..ConnectionConfig::default()
    }
}

/// Bus component config with test-friendly timings.
pub fn component(
    name: &str,
    instance_id: &str,
    subtopic: Option<&str>,
    pubtopic: Option<&str>,
) -> ComponentConfig {
    ComponentConfig {
        name: Some(name.to_string()),
        instance_id: Some(instance_id.to_string()),
        subtopic: subtopic.map(str::to_string),
        pubtopic: pubtopic.map(str::to_string),
        grace_period_ms: 2_000,
        connection: fast_connection(),
        ..ComponentConfig::new(format!("test:{name}"))
    }
}

pub struct Harness {
    pub broker: InMemoryBroker,
    connection: Arc<ConnectionManager>,
}

impl Harness {
    pub fn new() -> Self {
        let broker = InMemoryBroker::new();
        let connection = ConnectionManager::new(Arc::new(broker.clone()), fast_connection());
        Self { broker, connection }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.broker.clone())
    }

    /// Bind and start consuming; returns once the component is live.
    pub async fn launch(&self, config: ComponentConfig, handler: Arc<dyn Handler>) -> Running {
        let invoker = BusInvoker::new(config, handler, self.transport()).unwrap();
        let mut state = invoker.subscribe_state();
        let runner = invoker.clone();
        let task = tokio::spawn(async move { runner.run().await });
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == InvokerState::Consuming))
            .await
            .unwrap()
            .unwrap();
        Running { invoker, task }
    }

    pub async fn gateway(&self, instance_id: &str) -> Arc<RpcGateway> {
        let config = GatewayConfig {
            instance_id: Some(instance_id.to_string()),
            connection: fast_connection(),
            ..GatewayConfig::default()
        };
        let gateway = RpcGateway::new(config, self.transport()).unwrap();
        gateway.start().await.unwrap();
        gateway
    }

    /// Declare `queue` bound to `topic` so everything published there is kept.
    pub async fn observe(&self, queue: &str, topic: &str) {
        self.connection
            .declare(
                &Topology::new()
                    .exchange(EXCHANGE)
                    .queue(QueueSpec::shared(queue))
                    .bind(queue, EXCHANGE, SubTopic::parse(topic).render()),
            )
            .await
            .unwrap();
    }

    pub async fn publish(&self, topic: &str, envelope: &Envelope) -> usize {
        let key = PubTopic::parse(topic).render();
        self.connection
            .publish(EXCHANGE, &key, Bytes::from(encode(envelope).unwrap()))
            .await
            .unwrap()
    }

    /// Wait until `queue` holds at least `count` messages, then take them all.
    pub async fn collect(&self, queue: &str, count: usize) -> Vec<Envelope> {
        tokio::time::timeout(WAIT, async {
            while self.broker.queue_depth(queue).unwrap_or(0) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "{queue}: expected {count} messages, found {:?}",
                self.broker.queue_depth(queue)
            )
        });
        self.take(queue)
    }

    /// Whatever `queue` holds right now.
    pub fn take(&self, queue: &str) -> Vec<Envelope> {
        self.broker
            .drain_queue(queue)
            .iter()
            .map(|body| decode(body).unwrap())
            .collect()
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.broker.queue_depth(queue).unwrap_or(0)
    }
}

pub struct Running {
    pub invoker: BusInvoker,
    task: JoinHandle<Result<(), InvokerError>>,
}

impl Running {
    pub async fn stop(self) {
        self.invoker.shutdown();
        tokio::time::timeout(WAIT, self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

/// Let in-flight deliveries settle before asserting that something did not happen.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}
