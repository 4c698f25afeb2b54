//! # Bus Invoker
//!
//! Drives one component instance on the topic exchange.
//!
//! ```text
//!   Idle ──bind()──► Bound ──run()──► Consuming ──shutdown──► Draining ──► Closed
//!
//!   shared queue  `<name>`               ◄── #.<subtopic>.#      (load-balanced)
//!   instance queue `<name>/<instance>`   ◄── #.<instance>.#      (directed replies)
//!   error queue   `<name>_error`         ◄── #.<name>_error.#    (declared, not consumed)
//! ```
//!
//! Per delivery: decode → dispatch → route and publish each result as it is
//! emitted → on failure publish one error envelope → acknowledge. The delivery
//! is acknowledged only after everything it caused has been published; if
//! publishing gives up, the delivery is released unacknowledged and the broker
//! redelivers it.

use std::sync::Arc;

use bytes::Bytes;
use relay_bus::{
    ConnectionError, ConnectionManager, Delivery, QueueSpec, ShutdownGate, Topology, Transport,
};
use relay_types::{decode, encode, unique_id, Envelope, PubTopic};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ComponentConfig;
use crate::dispatch::Dispatcher;
use crate::error::{InvocationError, InvokerError};
use crate::handler::Handler;
use crate::routing::{route_error, route_output, Identity, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokerState {
    Idle,
    Bound,
    Consuming,
    Draining,
    Closed,
}

/// Which of the component's queues a delivery came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Shared,
    Instance,
}

struct Inner {
    config: ComponentConfig,
    identity: Arc<Identity>,
    dispatcher: Dispatcher,
    connection: Arc<ConnectionManager>,
    gate: ShutdownGate,
    state: watch::Sender<InvokerState>,
}

#[derive(Clone)]
pub struct BusInvoker {
    inner: Arc<Inner>,
}

impl BusInvoker {
    pub fn new(
        config: ComponentConfig,
        handler: Arc<dyn Handler>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, InvokerError> {
        config.validate()?;
        let instance_id = config.instance_id.clone().unwrap_or_else(unique_id);
        let identity = Arc::new(Identity::new(
            config.name(),
            instance_id,
            config.subtopic.as_deref(),
        ));
        let dispatcher = Dispatcher::new(
            identity.clone(),
            config.pubtopic.clone(),
            handler,
            config.args.clone(),
            config.max_workers,
        );
        // the instance queue, plus the shared queue when subscribed to a topic
        let consume_loops = 1 + usize::from(identity.shared_binding().is_some());
        let connection =
            ConnectionManager::with_consumers(transport, config.connection.clone(), consume_loops);
        let (state, _) = watch::channel(InvokerState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                identity,
                dispatcher,
                connection,
                gate: ShutdownGate::new(),
                state,
            }),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.identity.instance_id
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.connection
    }

    pub fn state(&self) -> InvokerState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<InvokerState> {
        self.inner.state.subscribe()
    }

    pub fn shutdown_gate(&self) -> ShutdownGate {
        self.inner.gate.clone()
    }

    /// Stop intake; `run()` drains and returns.
    pub fn shutdown(&self) {
        self.inner.gate.trigger();
    }

    /// Exchange, queues and bindings this component needs.
    pub fn topology(&self) -> Topology {
        let id = &self.inner.identity;
        let exchange = self.inner.config.exchange.as_str();

        let mut topology = Topology::new()
            .exchange(exchange)
            .queue(QueueSpec::exclusive(id.instance_queue()))
            .bind(id.instance_queue(), exchange, id.instance_binding())
            .queue(QueueSpec::shared(id.error_queue()))
            .bind(id.error_queue(), exchange, id.error_binding());
        if let Some(binding) = id.shared_binding() {
            topology = topology
                .queue(QueueSpec::shared(id.shared_queue()))
                .bind(id.shared_queue(), exchange, binding);
        }
        topology
    }

    /// Declare and bind every queue.
    pub async fn bind(&self) -> Result<(), InvokerError> {
        self.expect_state(InvokerState::Idle)?;
        self.inner.connection.declare(&self.topology()).await?;
        self.inner.state.send_replace(InvokerState::Bound);
        info!(
            component = %self.inner.identity.component,
            instance_id = %self.instance_id(),
            namespace = %self.inner.config.namespace,
            broker = %self.inner.connection.describe(),
            "Queues bound"
        );
        Ok(())
    }

    /// Consume until shutdown, then drain in-flight invocations and close.
    ///
    /// Returns an error if a consume loop failed permanently.
    pub async fn run(&self) -> Result<(), InvokerError> {
        if self.state() == InvokerState::Idle {
            self.bind().await?;
        }
        self.expect_state(InvokerState::Bound)?;

        let mut loops = JoinSet::new();
        for (queue, origin) in self.consumed_queues() {
            let this = self.clone();
            loops.spawn(async move {
                let gate = this.inner.gate.clone();
                let result = this
                    .inner
                    .connection
                    .consume_until(&queue, &gate, |delivery| {
                        let this = this.clone();
                        async move { this.handle(delivery, origin).await }
                    })
                    .await;
                result.map_err(|source| InvokerError::ConsumeLoop { queue, source })
            });
        }
        self.inner.state.send_replace(InvokerState::Consuming);
        info!(component = %self.inner.identity.component, "Consuming");

        let failure = loop {
            tokio::select! {
                _ = self.inner.gate.cancelled() => break None,
                joined = loops.join_next() => match joined {
                    Some(Ok(Ok(()))) => continue,
                    Some(Ok(Err(e))) => {
                        error!(component = %self.inner.identity.component, error = %e, "Consume loop failed");
                        break Some(e);
                    }
                    Some(Err(e)) => {
                        error!(component = %self.inner.identity.component, error = %e, "Consume loop aborted");
                        break None;
                    }
                    None => break None,
                },
            }
        };

        self.inner.state.send_replace(InvokerState::Draining);
        self.inner.gate.drain(self.inner.config.grace_period()).await;
        loops.shutdown().await;
        self.inner.connection.close().await;
        self.inner.state.send_replace(InvokerState::Closed);
        info!(component = %self.inner.identity.component, "Closed");

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn consumed_queues(&self) -> Vec<(String, Origin)> {
        let id = &self.inner.identity;
        let mut queues = vec![(id.instance_queue(), Origin::Instance)];
        if id.shared_binding().is_some() {
            queues.push((id.shared_queue(), Origin::Shared));
        }
        queues
    }

    fn expect_state(&self, expected: InvokerState) -> Result<(), InvokerError> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(InvokerError::InvalidState { actual, expected })
        }
    }

    async fn handle(&self, delivery: Delivery, origin: Origin) {
        let outcome = match decode(delivery.body()) {
            Ok(inbound) if inbound.is_error() && origin == Origin::Instance => {
                self.propagate_error(inbound).await
            }
            Ok(inbound) => self.invoke(&inbound).await,
            Err(e) => {
                let body = String::from_utf8_lossy(delivery.body()).into_owned();
                self.publish_failure(&Envelope::new(Value::String(body)), &e.into())
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                let routing_key = delivery.routing_key().to_string();
                if let Err(e) = delivery.ack() {
                    warn!(routing_key = %routing_key, error = %e, "Acknowledgement failed");
                }
            }
            Err(e) => {
                warn!(
                    component = %self.inner.identity.component,
                    error = %e,
                    "Publishing failed; delivery returned for redelivery"
                );
                drop(delivery);
            }
        }
    }

    async fn invoke(&self, inbound: &Envelope) -> Result<(), ConnectionError> {
        debug!(
            component = %self.inner.identity.component,
            key = ?inbound.key,
            "Invoking handler"
        );
        let mut invocation = self.inner.dispatcher.dispatch(inbound);
        let mut published = Ok(());
        while let Some(emitted) = invocation.next_output().await {
            let route = route_output(&self.inner.identity, &emitted);
            if let Err(e) = self.publish_result(inbound, emitted.output.data, &route).await {
                published = Err(e);
                break;
            }
        }
        let result = invocation.finish().await;

        match (published, result) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => self.publish_failure(inbound, &e).await,
            // broker trouble, not a handler failure: redelivery runs it again
            (Err(e), _) => Err(e),
        }
    }

    async fn publish_result(
        &self,
        inbound: &Envelope,
        data: Value,
        route: &Route,
    ) -> Result<(), ConnectionError> {
        for key in route.destinations() {
            let mut outbound = Envelope {
                data: data.clone(),
                key: Some(key.clone()),
                log: inbound.log.clone(),
                scope: route.scope.clone(),
                error: None,
                traceback: None,
            };
            outbound.stamp();
            self.publish(&key, &outbound).await?;
        }
        Ok(())
    }

    /// Annotate `inbound` with `failure` and send it down the error route.
    async fn publish_failure(
        &self,
        inbound: &Envelope,
        failure: &InvocationError,
    ) -> Result<(), ConnectionError> {
        warn!(
            component = %self.inner.identity.component,
            kind = %failure.kind(),
            error = %failure,
            "Invocation failed"
        );
        let mut annotated = inbound.clone();
        annotated.error = Some(failure.to_record(&self.inner.config.func));
        annotated.traceback = Some(failure.traceback());
        self.propagate_error(annotated).await
    }

    /// Forward an error envelope along this component's error route.
    async fn propagate_error(&self, mut envelope: Envelope) -> Result<(), ConnectionError> {
        let route = route_error(&self.inner.identity, envelope.scope.take());
        envelope.scope = route.scope;

        let mut keys = vec![route.key];
        if let Some(topic) = &self.inner.config.error_pubtopic {
            let key = PubTopic::parse(topic.as_str()).render();
            if !key.is_empty() {
                keys.push(key);
            }
        }
        for key in keys {
            let mut copy = envelope.clone();
            copy.key = Some(key.clone());
            copy.stamp();
            self.publish(&key, &copy).await?;
        }
        Ok(())
    }

    async fn publish(&self, key: &str, envelope: &Envelope) -> Result<(), ConnectionError> {
        let body = match encode(envelope) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                // non-string map keys or a runaway scope chain; redelivery cannot fix either
                error!(routing_key = %key, error = %e, "Dropping unencodable envelope");
                return Ok(());
            }
        };
        let routed = self
            .inner
            .connection
            .publish(&self.inner.config.exchange, key, body)
            .await?;
        debug!(routing_key = %key, routed, error = envelope.is_error(), "Published");
        Ok(())
    }
}
