//! # Channel Pool
//!
//! A bounded set of channels shared by consume loops and publishers. Checkout
//! waits on a semaphore when every channel is in use; the returned guard puts
//! the channel back on drop if it is still open and belongs to the current
//! connection generation.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::ConnectionError;
use crate::transport::{Channel, Connection};

struct IdleChannel {
    generation: u64,
    channel: Box<dyn Channel>,
}

pub struct ChannelPool {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleChannel>>,
    generation: AtomicU64,
    max_size: usize,
}

impl ChannelPool {
    pub fn new(max_size: usize) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(max_size)),
            idle: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Channels that can be checked out without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Forget every channel opened before `generation`.
    pub fn reset(&self, generation: u64) {
        self.generation.store(generation, Ordering::SeqCst);
        self.idle.lock().clear();
    }

    /// Reject further checkouts and release idle channels.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().clear();
    }

    /// Take a channel, reusing an idle one or opening a new one on `connection`.
    pub async fn checkout(
        self: &Arc<Self>,
        connection: &Arc<dyn Connection>,
        generation: u64,
    ) -> Result<PooledChannel, ConnectionError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ConnectionError::Closed)?;

        let reused = {
            let mut idle = self.idle.lock();
            let mut found = None;
            while let Some(candidate) = idle.pop() {
                if candidate.generation == generation && candidate.channel.is_open() {
                    found = Some(candidate.channel);
                    break;
                }
            }
            found
        };

        let channel = match reused {
            Some(channel) => channel,
            None => {
                trace!(generation, "Opening pooled channel");
                connection.open_channel().await?
            }
        };

        Ok(PooledChannel {
            channel: Some(channel),
            generation,
            pool: self.clone(),
            _permit: permit,
        })
    }

    fn checkin(&self, generation: u64, channel: Box<dyn Channel>) {
        if generation == self.generation.load(Ordering::SeqCst)
            && channel.is_open()
            && !self.permits.is_closed()
        {
            self.idle.lock().push(IdleChannel {
                generation,
                channel,
            });
        }
    }
}

/// A checked-out channel; returns to the pool on drop.
pub struct PooledChannel {
    channel: Option<Box<dyn Channel>>,
    generation: u64,
    pool: Arc<ChannelPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledChannel {
    /// Connection generation the channel was opened on.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for PooledChannel {
    type Target = dyn Channel;

    fn deref(&self) -> &Self::Target {
        match &self.channel {
            Some(channel) => channel.as_ref(),
            // only taken in Drop
            None => unreachable!("pooled channel used after release"),
        }
    }
}

impl Drop for PooledChannel {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.pool.checkin(self.generation, channel);
        }
    }
}
