//! Dual-trigger batch accumulator.
//!
//! Rows are rendered into value fragments as they arrive. The buffer is
//! flushed as one statement when it reaches `max_rows`, or on a `tick` once
//! its oldest row has waited longer than the staleness window.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::error::QueueClosed;
use crate::queue::ThrottledQueue;
use crate::render::RowRenderer;

/// Destination of rendered statements (the write queue).
#[async_trait]
pub trait StatementSink: Send + Sync {
    async fn submit(&self, statement: String) -> Result<(), QueueClosed<String>>;
}

#[async_trait]
impl StatementSink for ThrottledQueue<String> {
    async fn submit(&self, statement: String) -> Result<(), QueueClosed<String>> {
        self.push(statement).await
    }
}

/// Flush triggers of one batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub max_rows: usize,
    pub staleness: Duration,
}

#[derive(Default)]
struct BatchState {
    values: Vec<String>,
    first_buffered_at: Option<Instant>,
}

/// Buffers rendered rows of one table and flushes them into a sink.
///
/// `count == 0` exactly when `first_buffered_at` is unset; both are reset
/// together under the same lock.
pub struct Batcher<R: RowRenderer> {
    label: &'static str,
    renderer: R,
    policy: BatchPolicy,
    sink: Arc<dyn StatementSink>,
    state: Mutex<BatchState>,
}

impl<R: RowRenderer> Batcher<R> {
    pub fn new(
        label: &'static str,
        renderer: R,
        policy: BatchPolicy,
        sink: Arc<dyn StatementSink>,
    ) -> Self {
        Self {
            label,
            renderer,
            policy,
            sink,
            state: Mutex::new(BatchState::default()),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of buffered rows.
    pub fn pending(&self) -> usize {
        self.lock().values.len()
    }

    /// When the oldest buffered row arrived.
    pub fn first_buffered_at(&self) -> Option<Instant> {
        self.lock().first_buffered_at
    }

    /// Buffer one row. Flushes immediately when the row count threshold is
    /// reached; returns whether a flush happened.
    pub async fn append(&self, row: &R::Row) -> Result<bool, QueueClosed<String>> {
        let fragment = self.renderer.values(row);
        let full = {
            let mut state = self.lock();
            if state.values.is_empty() {
                state.first_buffered_at = Some(Instant::now());
            }
            state.values.push(fragment);
            if state.values.len() >= self.policy.max_rows {
                Some(Self::take(&mut state))
            } else {
                None
            }
        };
        match full {
            Some(values) => self.submit(values).await.map(|_| true),
            None => Ok(false),
        }
    }

    /// Flush if the buffer is non-empty and older than the staleness window.
    /// Returns the number of rows flushed.
    pub async fn tick(&self, now: Instant) -> Result<usize, QueueClosed<String>> {
        let stale = {
            let mut state = self.lock();
            match state.first_buffered_at {
                Some(first) if now.saturating_duration_since(first) > self.policy.staleness => {
                    Some(Self::take(&mut state))
                }
                _ => None,
            }
        };
        match stale {
            Some(values) => self.submit(values).await,
            None => Ok(0),
        }
    }

    /// Flush whatever is buffered. Returns the number of rows flushed.
    pub async fn flush(&self) -> Result<usize, QueueClosed<String>> {
        let values = Self::take(&mut self.lock());
        self.submit(values).await
    }

    /// Final flush at shutdown, after every producer of rows has stopped.
    pub async fn finalize(&self) -> Result<usize, QueueClosed<String>> {
        let flushed = self.flush().await?;
        debug!(batch = self.label, rows = flushed, "finalized");
        Ok(flushed)
    }

    async fn submit(&self, values: Vec<String>) -> Result<usize, QueueClosed<String>> {
        if values.is_empty() {
            return Ok(0);
        }
        let rows = values.len();
        let statement = self.renderer.statement(&values);
        debug!(batch = self.label, rows, "flushing");
        self.sink.submit(statement).await?;
        Ok(rows)
    }

    fn take(state: &mut BatchState) -> Vec<String> {
        state.first_buffered_at = None;
        std::mem::take(&mut state.values)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
