//! Bounded queue with adaptive producer backpressure.
//!
//! When the queue is full the producer does not drop the item: it grows a
//! per-queue delay by `step`, sleeps for that delay and retries. Every push
//! that finds room decays the delay by the same step toward zero.
//! Consumers either swap the whole buffer out ([`ThrottledQueue::drain`])
//! or take one item at a time ([`ThrottledQueue::pop`]).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::QueueClosed;

/// Delay above which every throttled push is logged.
const THROTTLE_WARN_MS: u64 = 1_000;

/// Backpressure policy of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    /// Number of items at which producers start throttling.
    pub max_len: usize,
    /// Delay increment (and decay) per observation.
    pub step: Duration,
    /// Upper bound on the producer delay.
    pub max_delay: Duration,
}

impl ThrottlePolicy {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            ..Self::default()
        }
    }
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_len: 100_000,
            step: Duration::from_millis(10),
            max_delay: Duration::from_millis(2_000),
        }
    }
}

/// A multi-producer, multi-consumer queue bounded by producer throttling.
pub struct ThrottledQueue<T> {
    name: &'static str,
    policy: ThrottlePolicy,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
    delay_us: AtomicU64,
    throttled: AtomicU64,
}

impl<T: Send> ThrottledQueue<T> {
    pub fn new(name: &'static str, policy: ThrottlePolicy) -> Self {
        Self {
            name,
            policy,
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            delay_us: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> ThrottlePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current producer delay.
    pub fn current_delay(&self) -> Duration {
        Duration::from_micros(self.delay_us.load(Ordering::Relaxed))
    }

    /// Number of times a producer had to back off.
    pub fn throttle_count(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }

    /// Enqueue `item`, sleeping while the queue is full.
    ///
    /// Fails only when the queue has been closed; the item is handed back.
    pub async fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        loop {
            {
                let mut items = self.lock();
                if self.is_closed() {
                    return Err(QueueClosed(item));
                }
                if items.len() < self.policy.max_len {
                    items.push_back(item);
                    drop(items);
                    self.decay();
                    self.notify.notify_one();
                    return Ok(());
                }
            }
            let delay = self.grow();
            self.throttled.fetch_add(1, Ordering::Relaxed);
            if delay.as_millis() as u64 > THROTTLE_WARN_MS {
                warn!(
                    queue = self.name,
                    delay_ms = delay.as_millis() as u64,
                    "queue full, throttling producer"
                );
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Take everything currently queued, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn drain(&self) -> Option<Vec<T>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut items = self.lock();
                if !items.is_empty() {
                    let batch: Vec<T> = std::mem::take(&mut *items).into();
                    drop(items);
                    if batch.len() > self.policy.max_len / 4 * 3 {
                        warn!(
                            queue = self.name,
                            size = batch.len(),
                            max = self.policy.max_len,
                            "queue above 75% of capacity"
                        );
                    }
                    if self.is_closed() {
                        info!(queue = self.name, size = batch.len(), "draining");
                    }
                    return Some(batch);
                }
                if self.is_closed() {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut items = self.lock();
                if let Some(item) = items.pop_front() {
                    let more = !items.is_empty();
                    drop(items);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if self.is_closed() {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting items and wake every waiting consumer.
    ///
    /// Items already queued stay available to `drain`/`pop`.
    pub fn close(&self) {
        {
            let _items = self.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.notify.notify_waiters();
    }

    fn grow(&self) -> Duration {
        let step = self.policy.step.as_micros() as u64;
        let max = self.policy.max_delay.as_micros() as u64;
        let prev = self
            .delay_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_add(step).min(max))
            })
            .unwrap_or(0);
        Duration::from_micros(prev.saturating_add(step).min(max))
    }

    fn decay(&self) {
        let step = self.policy.step.as_micros() as u64;
        let _ = self
            .delay_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                (d > 0).then(|| d.saturating_sub(step))
            });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}
