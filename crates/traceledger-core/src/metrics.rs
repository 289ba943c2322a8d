//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters shared by every pipeline task.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    traces_received: AtomicU64,
    traces_skipped: AtomicU64,
    traces_processed: AtomicU64,
    actions_decoded: AtomicU64,
    actions_dropped: AtomicU64,
    actions_suppressed: AtomicU64,
    ledger_rows: AtomicU64,
    authorization_rows: AtomicU64,
    statements_executed: AtomicU64,
    statements_failed: AtomicU64,
    tasks_failed: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub traces_received: u64,
    pub traces_skipped: u64,
    pub traces_processed: u64,
    pub actions_decoded: u64,
    pub actions_dropped: u64,
    pub actions_suppressed: u64,
    pub ledger_rows: u64,
    pub authorization_rows: u64,
    pub statements_executed: u64,
    pub statements_failed: u64,
    /// Extraction, write or ticker tasks that panicked or were cancelled.
    pub tasks_failed: u64,
    /// Producer waits on the intake queue, filled in by the pipeline.
    pub intake_throttles: u64,
    /// Producer waits on the write queue, filled in by the pipeline.
    pub write_throttles: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl PipelineMetrics {
    pub fn record_received(&self) {
        bump(&self.traces_received, 1);
    }

    pub fn record_skipped(&self) {
        bump(&self.traces_skipped, 1);
    }

    pub fn record_processed(&self) {
        bump(&self.traces_processed, 1);
    }

    pub fn record_actions(&self, decoded: u64, dropped: u64, suppressed: u64) {
        bump(&self.actions_decoded, decoded);
        bump(&self.actions_dropped, dropped);
        bump(&self.actions_suppressed, suppressed);
    }

    pub fn record_rows(&self, ledger: u64, authorizations: u64) {
        bump(&self.ledger_rows, ledger);
        bump(&self.authorization_rows, authorizations);
    }

    pub fn record_executed(&self) {
        bump(&self.statements_executed, 1);
    }

    pub fn record_failed(&self) {
        bump(&self.statements_failed, 1);
    }

    pub fn record_task_failed(&self) {
        bump(&self.tasks_failed, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            traces_received: get(&self.traces_received),
            traces_skipped: get(&self.traces_skipped),
            traces_processed: get(&self.traces_processed),
            actions_decoded: get(&self.actions_decoded),
            actions_dropped: get(&self.actions_dropped),
            actions_suppressed: get(&self.actions_suppressed),
            ledger_rows: get(&self.ledger_rows),
            authorization_rows: get(&self.authorization_rows),
            statements_executed: get(&self.statements_executed),
            statements_failed: get(&self.statements_failed),
            tasks_failed: get(&self.tasks_failed),
            intake_throttles: 0,
            write_throttles: 0,
        }
    }
}
