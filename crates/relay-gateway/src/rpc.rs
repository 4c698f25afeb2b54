//! # RPC Gateway
//!
//! Turns a blocking `call(topic, payload)` into a publish plus a wait for the
//! reply that a component routes back to this gateway instance.
//!
//! ```text
//! call() ──register(cid)──► PendingReplyStore ◄──complete(cid)── reply loop
//!   │                                                              ▲
//!   └─► publish scope{reply_to: "<instance>.<cid>", correlation_id} │
//!                                                                   │
//!        responder ──► key ∪ reply_to ──► gateway:<instance> ◄── #.<instance>.#
//! ```
//!
//! Every call shares the one exclusive reply queue and its consume loop. Each
//! waits on its own oneshot, so a slow responder only delays its own caller.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use relay_bus::{ConnectionManager, Delivery, QueueSpec, ShutdownGate, Topology, Transport};
use relay_types::{
    decode, encode, unique_id, Envelope, PubTopic, Scope, ScopeChain, SubTopic, CORRELATION_ID,
    REPLY_TO,
};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::config::GatewayConfig;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::GatewayError;
use crate::domain::pending::{cleanup_task, PendingReplyStore, Registration};

pub struct RpcGateway {
    config: GatewayConfig,
    instance_id: String,
    connection: Arc<ConnectionManager>,
    pending: Arc<PendingReplyStore>,
    permits: Semaphore,
    gate: ShutdownGate,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RpcGateway {
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, GatewayError> {
        config.validate()?;
        let instance_id = config.instance_id.clone().unwrap_or_else(unique_id);
        // the reply loop keeps one channel for itself
        let connection = ConnectionManager::with_consumers(transport, config.connection.clone(), 1);
        let pending = Arc::new(PendingReplyStore::new(config.rpc_timeout()));
        let permits = Semaphore::new(config.max_concurrent_rpcs);

        Ok(Arc::new(Self {
            config,
            instance_id,
            connection,
            pending,
            permits,
            gate: ShutdownGate::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Private queue replies to this instance land on.
    pub fn reply_queue(&self) -> String {
        format!("gateway:{}", self.instance_id)
    }

    pub fn pending(&self) -> &Arc<PendingReplyStore> {
        &self.pending
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn is_shutting_down(&self) -> bool {
        self.gate.is_shutting_down()
    }

    pub fn topology(&self) -> Topology {
        let queue = self.reply_queue();
        Topology::new()
            .exchange(self.config.exchange.as_str())
            .queue(QueueSpec::exclusive(queue.as_str()))
            .bind(
                queue.as_str(),
                self.config.exchange.as_str(),
                SubTopic::parse(self.instance_id.as_str()).render(),
            )
    }

    /// Declare the reply queue and start the reply loop and the TTL sweep.
    ///
    /// The queue is bound before this returns, so replies to calls made
    /// afterwards are never lost.
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        self.connection.declare(&self.topology()).await?;

        let gateway = Arc::clone(self);
        let reply_loop = tokio::spawn(async move { gateway.reply_loop().await });

        let store = Arc::clone(&self.pending);
        let interval = self.config.cleanup_interval();
        let gate = self.gate.clone();
        let sweeper = tokio::spawn(async move {
            tokio::select! {
                _ = gate.cancelled() => {}
                _ = cleanup_task(store, interval) => {}
            }
        });

        self.tasks.lock().extend([reply_loop, sweeper]);
        info!(
            instance_id = %self.instance_id,
            queue = %self.reply_queue(),
            broker = %self.connection.describe(),
            "RPC gateway started"
        );
        Ok(())
    }

    /// Publish `payload` to `topic` and wait for the reply.
    ///
    /// `timeout` defaults to the configured `rpc_timeout_ms`. Timing out only
    /// abandons this caller's wait; the request stays published.
    pub async fn call(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Envelope, GatewayError> {
        let routing_key = PubTopic::parse(topic).render();
        if routing_key.is_empty() {
            return Err(GatewayError::InvalidRequest("topic cannot be empty".into()));
        }
        if self.gate.is_shutting_down() {
            return Err(GatewayError::ShuttingDown);
        }
        let _permit = self
            .permits
            .try_acquire()
            .map_err(|_| GatewayError::Overloaded {
                limit: self.config.max_concurrent_rpcs,
            })?;

        let timeout = timeout.unwrap_or_else(|| self.config.rpc_timeout());
        // one deadline covers publishing (which may be reconnecting) and waiting
        let deadline = Instant::now() + timeout;
        let (correlation_id, rx) = self.pending.register(&routing_key, Some(timeout));
        let _registration = Registration::new(&self.pending, correlation_id);

        let request = self.request_envelope(payload, &routing_key, correlation_id);
        let body = Bytes::from(encode(&request)?);
        // detached, so an expired deadline abandons only the wait
        let publish = {
            let connection = Arc::clone(&self.connection);
            let exchange = self.config.exchange.clone();
            let key = routing_key.clone();
            tokio::spawn(async move { connection.publish(&exchange, &key, body).await })
        };
        let exchange_and_wait = async {
            let routed = publish.await.map_err(|_| GatewayError::ShuttingDown)??;
            if routed == 0 {
                warn!(topic = routing_key, "No queue bound for request; waiting anyway");
            }
            debug!(correlation_id = %correlation_id, topic = routing_key, "Request published");
            Ok::<_, GatewayError>(rx.await)
        };

        let outcome = tokio::time::timeout_at(deadline, exchange_and_wait).await;
        match outcome {
            Ok(Ok(Ok(reply))) => {
                debug!(
                    correlation_id = %correlation_id,
                    response_time_ms = reply.response_time.as_millis() as u64,
                    "Reply received"
                );
                if reply.envelope.is_error() {
                    Err(GatewayError::ErrorReply {
                        topic: routing_key,
                        envelope: Box::new(reply.envelope),
                    })
                } else {
                    Ok(reply.envelope)
                }
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(Err(_))) if self.gate.is_shutting_down() => Err(GatewayError::ShuttingDown),
            // the TTL sweep got to the registration first
            Ok(Ok(Err(_))) => Err(self.timed_out(routing_key, correlation_id, timeout)),
            Err(_) => Err(self.timed_out(routing_key, correlation_id, timeout)),
        }
    }

    fn timed_out(
        &self,
        routing_key: String,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> GatewayError {
        self.pending.expire(&correlation_id);
        warn!(
            correlation_id = %correlation_id,
            topic = routing_key,
            timeout_ms = timeout.as_millis() as u64,
            "Call timed out"
        );
        GatewayError::Timeout {
            topic: routing_key,
            timeout,
        }
    }

    /// Stop the reply loop, release waiting callers and close the connection.
    pub async fn shutdown(&self) {
        self.gate.trigger();
        let released = self.pending.cancel_all();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Gateway task ended abnormally");
            }
        }
        self.connection.close().await;
        info!(instance_id = %self.instance_id, released, "RPC gateway stopped");
    }

    fn request_envelope(
        &self,
        payload: Value,
        routing_key: &str,
        correlation_id: CorrelationId,
    ) -> Envelope {
        let scope = Scope::new()
            .with_field(
                REPLY_TO,
                format!("{}.{}", self.instance_id, correlation_id.to_key()),
            )
            .with_field(CORRELATION_ID, correlation_id.to_string());
        let mut envelope = Envelope::new(payload)
            .with_key(routing_key)
            .with_scope(Some(ScopeChain::root(scope)));
        envelope.stamp();
        envelope
    }

    async fn reply_loop(&self) {
        let queue = self.reply_queue();
        let result = self
            .connection
            .consume_until(&queue, &self.gate, |delivery| {
                self.on_reply(delivery);
                std::future::ready(())
            })
            .await;
        match result {
            Ok(()) => debug!(queue, "Reply loop stopped"),
            Err(e) => error!(queue, error = %e, "Reply loop failed; pending calls will time out"),
        }
    }

    fn on_reply(&self, delivery: Delivery) {
        match decode(delivery.body()) {
            Ok(envelope) => match envelope.correlation_id().map(str::parse::<CorrelationId>) {
                Some(Ok(correlation_id)) => {
                    self.pending.complete(correlation_id, envelope);
                }
                _ => warn!(
                    routing_key = delivery.routing_key(),
                    "Reply without a usable correlation id"
                ),
            },
            Err(e) => warn!(
                routing_key = delivery.routing_key(),
                error = %e,
                "Undecodable reply"
            ),
        }
        // replies are only meaningful to this instance; never requeue them
        if let Err(e) = delivery.ack() {
            warn!(error = %e, "Failed to acknowledge reply");
        }
    }
}
