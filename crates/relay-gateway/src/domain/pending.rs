//! Pending Reply Store - async-to-sync bridge.
//!
//! Maps correlation IDs to calls blocked on a reply from the bus.

use crate::domain::correlation::CorrelationId;
use dashmap::DashMap;
use relay_types::Envelope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Reply delivered to a waiting call
#[derive(Debug)]
pub struct PendingReply {
    pub correlation_id: CorrelationId,
    pub envelope: Envelope,
    pub response_time: Duration,
}

/// A call waiting for its reply
struct PendingCall {
    sender: oneshot::Sender<PendingReply>,
    created_at: Instant,
    /// Target topic (for logging)
    topic: String,
    timeout: Duration,
}

/// Statistics for the pending reply store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Total calls answered
    pub total_completed: AtomicU64,
    /// Total calls that gave up waiting
    pub total_timeouts: AtomicU64,
    /// Total calls abandoned by their caller
    pub total_cancelled: AtomicU64,
}

/// Pending reply store.
///
/// Flow:
/// 1. `call()` registers and gets a oneshot receiver plus a fresh CorrelationId
/// 2. The request is published with the id in its scope
/// 3. The reply loop reads the id back from the reply and calls `complete()`
/// 4. The caller awaits the receiver or times out and deregisters
pub struct PendingReplyStore {
    pending: DashMap<CorrelationId, PendingCall>,
    default_timeout: Duration,
    stats: Arc<PendingStats>,
}

impl PendingReplyStore {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Register a call and get a receiver for its reply.
    pub fn register(
        &self,
        topic: &str,
        timeout: Option<Duration>,
    ) -> (CorrelationId, oneshot::Receiver<PendingReply>) {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            correlation_id,
            PendingCall {
                sender: tx,
                created_at: Instant::now(),
                topic: topic.to_string(),
                timeout: timeout.unwrap_or(self.default_timeout),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(correlation_id = %correlation_id, topic, "Registered pending call");

        (correlation_id, rx)
    }

    /// Hand `envelope` to the call waiting on `correlation_id`.
    ///
    /// Returns false if no call is waiting (unknown, expired or already answered).
    pub fn complete(&self, correlation_id: CorrelationId, envelope: Envelope) -> bool {
        let Some((_, call)) = self.pending.remove(&correlation_id) else {
            warn!(correlation_id = %correlation_id, "Reply for unknown or expired correlation ID");
            return false;
        };

        let response_time = call.created_at.elapsed();
        let reply = PendingReply {
            correlation_id,
            envelope,
            response_time,
        };

        match call.sender.send(reply) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    topic = call.topic,
                    response_time_ms = response_time.as_millis() as u64,
                    "Completed pending call"
                );
                true
            }
            Err(_) => {
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %correlation_id, topic = call.topic, "Caller went away");
                false
            }
        }
    }

    /// Deregister a call whose caller gave up waiting.
    pub fn expire(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Deregister a call that will not wait for its reply.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        if self.pending.remove(correlation_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Remove registrations older than their timeout (TTL cleanup).
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.pending.retain(|id, call| {
            let elapsed = now.duration_since(call.created_at);
            if elapsed > call.timeout {
                warn!(
                    correlation_id = %id,
                    topic = call.topic,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Removing expired pending call"
                );
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                removed += 1;
                false
            } else {
                true
            }
        });

        removed
    }

    /// Drop every registration; waiting callers observe a closed channel.
    pub fn cancel_all(&self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        self.stats
            .total_cancelled
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }
}

/// Cancels its registration when dropped, so a caller that stops waiting for
/// any reason leaves nothing behind.
pub struct Registration<'a> {
    store: &'a PendingReplyStore,
    correlation_id: CorrelationId,
}

impl<'a> Registration<'a> {
    pub fn new(store: &'a PendingReplyStore, correlation_id: CorrelationId) -> Self {
        Self {
            store,
            correlation_id,
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.store.cancel(&self.correlation_id);
    }
}

/// Background task to clean up expired registrations
pub async fn cleanup_task(store: Arc<PendingReplyStore>, interval: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        let removed = store.remove_expired();
        if removed > 0 {
            debug!(removed, "Cleaned up expired pending calls");
        }
    }
}
