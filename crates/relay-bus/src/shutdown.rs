//! # Shutdown Gate
//!
//! Coordinates graceful shutdown between intake loops and in-flight work:
//!
//! 1. `trigger()` cancels the token; consume loops stop taking deliveries.
//! 2. Work already admitted through `enter()` keeps its guard until done.
//! 3. `drain(grace)` waits for the in-flight count to reach zero, or gives up
//!    when the grace period elapses. Nothing is aborted either way.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    TimedOut { outstanding: usize },
}

struct GateInner {
    token: CancellationToken,
    in_flight: AtomicUsize,
    idle: Notify,
}

#[derive(Clone)]
pub struct ShutdownGate {
    inner: Arc<GateInner>,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Gate cancelled together with `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(GateInner {
                token,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn trigger(&self) {
        self.inner.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Admit one unit of work; `None` once shutdown has begun.
    pub fn enter(&self) -> Option<InFlightGuard> {
        // count first so a concurrent drain never misses admitted work
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            inner: self.inner.clone(),
        };
        if self.inner.token.is_cancelled() {
            drop(guard);
            return None;
        }
        Some(guard)
    }

    /// Stop intake and wait up to `grace` for admitted work to finish.
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.trigger();
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(grace, idle).await {
            Ok(()) => {
                info!("All in-flight work drained");
                DrainOutcome::Drained
            }
            Err(_) => {
                let outstanding = self.in_flight();
                warn!(
                    outstanding,
                    grace_ms = grace.as_millis() as u64,
                    "Grace period elapsed with work still in flight"
                );
                DrainOutcome::TimedOut { outstanding }
            }
        }
    }
}

impl Default for ShutdownGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one admitted unit of work; releases it on drop.
pub struct InFlightGuard {
    inner: Arc<GateInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enter_refused_after_trigger() {
        let gate = ShutdownGate::new();
        let guard = gate.enter();
        assert!(guard.is_some());
        assert_eq!(gate.in_flight(), 1);

        gate.trigger();
        assert!(gate.enter().is_none());
        assert_eq!(gate.in_flight(), 1);
        drop(guard);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_in_flight() {
        let gate = ShutdownGate::new();
        let guard = gate.enter().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });

        let outcome = gate.drain(Duration::from_secs(2)).await;
        assert_eq!(outcome, DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_grace() {
        let gate = ShutdownGate::new();
        let _stuck = gate.enter().unwrap();

        let started = tokio::time::Instant::now();
        let outcome = gate.drain(Duration::from_millis(50)).await;
        assert_eq!(outcome, DrainOutcome::TimedOut { outstanding: 1 });
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_drain_with_nothing_in_flight() {
        let gate = ShutdownGate::new();
        assert_eq!(gate.drain(Duration::from_millis(10)).await, DrainOutcome::Drained);
        assert!(gate.is_shutting_down());
    }
}
