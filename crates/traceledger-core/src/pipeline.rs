//! The ingestion pipeline and its shutdown drain.
//!
//! ```text
//! IntakeHandle ──► intake queue ──► ExtractionWorker × N
//!                                        │
//!                         ┌──────────────┼───────────────┐
//!                   ledger Batcher   deltas/tokens   auth Batcher
//!                         └──────────────┼───────────────┘
//!                                        ▼
//!                                   write queue ──► WriteExecutor × M ──► ConnectionPool
//! ```
//!
//! Shutdown order: close intake, join extraction workers, stop the ticker,
//! finalize both batchers, close the write queue, join the executors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::abi::AbiResolver;
use crate::batch::{Batcher, StatementSink};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, QueueClosed};
use crate::executor::WriteExecutor;
use crate::extract::{Extractor, TraceOutcome};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pool::{ConnectionFactory, ConnectionPool, PoolStatus};
use crate::queue::ThrottledQueue;
use crate::render::{
    balance_delta_statement, token_registration_statement, AuthorizationRows, LedgerRows,
};
use crate::types::TransactionTrace;

/// Traces slower than this are logged.
const SLOW_TRACE: Duration = Duration::from_millis(500);

// ─── Admission ───────────────────────────────────────────────────────────────

/// Why a submitted trace was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    BlockZero,
    BeforeStartBlock,
    AfterEndBlock,
}

/// Result of [`IntakeHandle::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Enqueued,
    Skipped(SkipCause),
    /// The pipeline is shutting down; the trace was not accepted.
    Closed,
}

/// Producer-side block range filter.
#[derive(Debug)]
pub struct BlockGate {
    start_block: u64,
    end_block: u64,
    started: AtomicBool,
    end_logged: AtomicBool,
}

impl BlockGate {
    pub fn new(start_block: u64, end_block: u64) -> Self {
        Self {
            start_block,
            end_block,
            started: AtomicBool::new(false),
            end_logged: AtomicBool::new(false),
        }
    }

    /// `None` if a trace of `block_number` should be enqueued.
    ///
    /// Once a block at or past `start_block` has been seen, later traces are
    /// no longer held back by the start bound.
    pub fn check(&self, block_number: u64) -> Option<SkipCause> {
        if block_number == 0 {
            return Some(SkipCause::BlockZero);
        }
        if !self.started.load(Ordering::Acquire) {
            if block_number < self.start_block {
                return Some(SkipCause::BeforeStartBlock);
            }
            if !self.started.swap(true, Ordering::AcqRel) {
                info!(block = block_number, "start block reached");
            }
        }
        if self.end_block != 0 && block_number > self.end_block {
            if !self.end_logged.swap(true, Ordering::Relaxed) {
                info!(
                    block = block_number,
                    end_block = self.end_block,
                    "end block passed, ignoring later traces"
                );
            }
            return Some(SkipCause::AfterEndBlock);
        }
        None
    }
}

/// Cloneable producer handle feeding the intake queue.
#[derive(Clone)]
pub struct IntakeHandle {
    intake: Arc<ThrottledQueue<TransactionTrace>>,
    gate: Arc<BlockGate>,
    metrics: Arc<PipelineMetrics>,
}

impl IntakeHandle {
    /// Offer one trace. Waits while the intake queue is full.
    pub async fn submit(&self, trace: TransactionTrace) -> Admission {
        self.metrics.record_received();
        if let Some(cause) = self.gate.check(trace.block_number) {
            self.metrics.record_skipped();
            return Admission::Skipped(cause);
        }
        match self.intake.push(trace).await {
            Ok(()) => Admission::Enqueued,
            Err(_) => Admission::Closed,
        }
    }

    pub fn queued(&self) -> usize {
        self.intake.len()
    }
}

// ─── Row emission ────────────────────────────────────────────────────────────

/// Routes extracted rows: ledger and authorization rows into their batchers,
/// balance deltas and token registrations straight into the write sink.
pub struct RowEmitter {
    ledger: Batcher<LedgerRows>,
    authorizations: Batcher<AuthorizationRows>,
    writes: Arc<dyn StatementSink>,
}

/// Rows and statements flushed by [`RowEmitter::finalize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FinalizeReport {
    pub ledger_rows: usize,
    pub authorization_rows: usize,
    pub statements: usize,
}

impl RowEmitter {
    pub fn new(config: &PipelineConfig, writes: Arc<dyn StatementSink>) -> Self {
        Self {
            ledger: Batcher::new("ledger", LedgerRows, config.ledger_batch(), writes.clone()),
            authorizations: Batcher::new(
                "actions_accounts",
                AuthorizationRows,
                config.authorization_batch(),
                writes.clone(),
            ),
            writes,
        }
    }

    pub fn ledger(&self) -> &Batcher<LedgerRows> {
        &self.ledger
    }

    pub fn authorizations(&self) -> &Batcher<AuthorizationRows> {
        &self.authorizations
    }

    pub async fn emit(&self, outcome: &TraceOutcome) -> Result<(), QueueClosed<String>> {
        for row in &outcome.ledger {
            self.ledger.append(row).await?;
        }
        for delta in &outcome.deltas {
            self.writes.submit(balance_delta_statement(delta)).await?;
        }
        for registration in &outcome.registrations {
            self.writes
                .submit(token_registration_statement(registration))
                .await?;
        }
        for row in &outcome.authorizations {
            self.authorizations.append(row).await?;
        }
        Ok(())
    }

    /// Staleness check on both batchers.
    pub async fn tick(&self, now: Instant) -> Result<usize, QueueClosed<String>> {
        Ok(self.ledger.tick(now).await? + self.authorizations.tick(now).await?)
    }

    pub async fn finalize(&self) -> Result<FinalizeReport, QueueClosed<String>> {
        let ledger_rows = self.ledger.finalize().await?;
        let authorization_rows = self.authorizations.finalize().await?;
        Ok(FinalizeReport {
            ledger_rows,
            authorization_rows,
            statements: (ledger_rows > 0) as usize + (authorization_rows > 0) as usize,
        })
    }
}

// ─── Workers ─────────────────────────────────────────────────────────────────

struct ExtractionWorker {
    id: usize,
    intake: Arc<ThrottledQueue<TransactionTrace>>,
    extractor: Arc<Extractor>,
    emitter: Arc<RowEmitter>,
    metrics: Arc<PipelineMetrics>,
}

impl ExtractionWorker {
    async fn run(self) {
        while let Some(traces) = self.intake.drain().await {
            for trace in traces {
                self.process(&trace).await;
            }
        }
        info!(worker = self.id, "extraction worker stopped");
    }

    async fn process(&self, trace: &TransactionTrace) {
        let started = Instant::now();
        let outcome = self.extractor.extract(trace);
        self.metrics.record_actions(
            outcome.decoded() as u64,
            outcome.dropped() as u64,
            outcome.suppressed() as u64,
        );
        self.metrics
            .record_rows(outcome.ledger.len() as u64, outcome.authorizations.len() as u64);

        if let Err(e) = self.emitter.emit(&outcome).await {
            error!(worker = self.id, tx = %trace.id, error = %e, "write queue closed, rows lost");
        }
        self.metrics.record_processed();

        let elapsed = started.elapsed();
        if elapsed > SLOW_TRACE {
            info!(
                worker = self.id,
                tx = %trace.id,
                block = trace.block_number,
                actions = trace.action_count(),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow trace"
            );
        }
    }
}

async fn run_ticker(emitter: Arc<RowEmitter>, period: Duration, stop: Arc<Notify>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = interval.tick() => {
                if let Err(e) = emitter.tick(Instant::now()).await {
                    warn!(error = %e, "stale batch flush failed");
                }
            }
        }
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Summary returned by [`Pipeline::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub traces_processed: u64,
    pub finalized: FinalizeReport,
    pub statements_executed: u64,
    pub statements_failed: u64,
    /// Tasks that ended by panic or cancellation; their in-flight traces or
    /// statements were lost.
    pub tasks_failed: u64,
    pub metrics: MetricsSnapshot,
}

pub struct Pipeline<F: ConnectionFactory> {
    intake: Arc<ThrottledQueue<TransactionTrace>>,
    writes: Arc<ThrottledQueue<String>>,
    emitter: Arc<RowEmitter>,
    pool: Arc<ConnectionPool<F>>,
    metrics: Arc<PipelineMetrics>,
    gate: Arc<BlockGate>,
    stop_ticker: Arc<Notify>,
    ticker: JoinHandle<()>,
    extraction: Vec<JoinHandle<()>>,
    executors: Vec<JoinHandle<()>>,
}

impl<F: ConnectionFactory> Pipeline<F> {
    /// Validate `config` and spawn all pipeline tasks on the current runtime.
    pub fn start(
        config: PipelineConfig,
        resolver: Arc<dyn AbiResolver>,
        pool: Arc<ConnectionPool<F>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let intake = Arc::new(ThrottledQueue::new("intake", config.intake_policy()));
        let writes = Arc::new(ThrottledQueue::new("writes", config.write_policy()));
        let metrics = Arc::new(PipelineMetrics::default());
        let emitter = Arc::new(RowEmitter::new(&config, writes.clone()));
        let extractor = Arc::new(
            Extractor::new(resolver)
                .with_max_depth(config.max_action_depth)
                .with_decode_deadline(config.decode_deadline()),
        );

        let executors = (0..config.write_workers)
            .map(|id| {
                let exec = WriteExecutor::new(id, writes.clone(), pool.clone(), metrics.clone());
                tokio::spawn(exec.run())
            })
            .collect();

        let extraction = (0..config.extraction_workers)
            .map(|id| {
                let worker = ExtractionWorker {
                    id,
                    intake: intake.clone(),
                    extractor: extractor.clone(),
                    emitter: emitter.clone(),
                    metrics: metrics.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let stop_ticker = Arc::new(Notify::new());
        let ticker = tokio::spawn(run_ticker(
            emitter.clone(),
            config.tick_interval(),
            stop_ticker.clone(),
        ));

        info!(
            extraction_workers = config.extraction_workers,
            write_workers = config.write_workers,
            max_queue_size = config.max_queue_size,
            start_block = config.start_block,
            end_block = config.end_block,
            "pipeline started"
        );

        Ok(Self {
            intake,
            writes,
            emitter,
            pool,
            metrics,
            gate: Arc::new(BlockGate::new(config.start_block, config.end_block)),
            stop_ticker,
            ticker,
            extraction,
            executors,
        })
    }

    pub fn intake(&self) -> IntakeHandle {
        IntakeHandle {
            intake: self.intake.clone(),
            gate: self.gate.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        snapshot(&self.metrics, &self.intake, &self.writes)
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Pending rows in the ledger and authorization batchers.
    pub fn pending_rows(&self) -> (usize, usize) {
        (self.emitter.ledger().pending(), self.emitter.authorizations().pending())
    }

    /// Drain everything in flight and stop all tasks.
    pub async fn shutdown(self) -> ShutdownReport {
        info!(queued = self.intake.len(), "shutdown: closing intake");
        self.intake.close();
        join_tasks("extraction", self.extraction, &self.metrics).await;

        self.stop_ticker.notify_one();
        if let Err(e) = self.ticker.await {
            error!(error = %e, "ticker task failed");
            self.metrics.record_task_failed();
        }

        let finalized = match self.emitter.finalize().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "final batch flush failed");
                FinalizeReport::default()
            }
        };
        info!(
            ledger_rows = finalized.ledger_rows,
            authorization_rows = finalized.authorization_rows,
            "shutdown: batches finalized"
        );

        self.writes.close();
        join_tasks("write", self.executors, &self.metrics).await;

        let metrics = snapshot(&self.metrics, &self.intake, &self.writes);
        if metrics.tasks_failed > 0 {
            error!(tasks_failed = metrics.tasks_failed, "pipeline stopped with failed tasks");
        }
        info!(
            traces = metrics.traces_processed,
            executed = metrics.statements_executed,
            failed = metrics.statements_failed,
            "pipeline stopped"
        );
        ShutdownReport {
            traces_processed: metrics.traces_processed,
            finalized,
            statements_executed: metrics.statements_executed,
            statements_failed: metrics.statements_failed,
            tasks_failed: metrics.tasks_failed,
            metrics,
        }
    }
}

fn snapshot(
    metrics: &PipelineMetrics,
    intake: &ThrottledQueue<TransactionTrace>,
    writes: &ThrottledQueue<String>,
) -> MetricsSnapshot {
    MetricsSnapshot {
        intake_throttles: intake.throttle_count(),
        write_throttles: writes.throttle_count(),
        ..metrics.snapshot()
    }
}

async fn join_tasks(kind: &'static str, handles: Vec<JoinHandle<()>>, metrics: &PipelineMetrics) {
    for result in join_all(handles).await {
        if let Err(e) = result {
            error!(kind, error = %e, "worker task failed");
            metrics.record_task_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AbiDef, MemoryAbiRegistry};
    use crate::codec::encode_transfer;
    use crate::error::{ExecutionError, PoolError};
    use crate::name::{Asset, Name};
    use crate::pool::{Connection, PoolConfig};
    use crate::types::{ActionTrace, PermissionLevel};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    struct RecorderConn(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Connection for RecorderConn {
        async fn execute(&mut self, statement: &str) -> Result<u64, ExecutionError> {
            self.0.lock().unwrap().push(statement.to_string());
            Ok(1)
        }
    }

    #[async_trait]
    impl ConnectionFactory for Recorder {
        type Connection = RecorderConn;

        async fn connect(&self) -> Result<RecorderConn, PoolError> {
            Ok(RecorderConn(self.0.clone()))
        }
    }

    fn n(s: &'static str) -> Name {
        Name::from_static(s)
    }

    fn transfer_trace(block: u64, seq: u64) -> TransactionTrace {
        let qty: Asset = "1.0000 TOK".parse().unwrap();
        TransactionTrace {
            id: format!("tx{seq}"),
            block_number: block,
            block_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            action_traces: vec![ActionTrace {
                receiver: n("alice"),
                account: n("eosio.token"),
                name: n("transfer"),
                data: encode_transfer(n("alice"), n("bob"), &qty, ""),
                authorization: vec![PermissionLevel::new(n("alice"), n("active"))],
                global_sequence: seq,
                inline_traces: vec![],
            }],
        }
    }

    fn start(config: PipelineConfig) -> (Pipeline<Recorder>, Recorder) {
        let registry = MemoryAbiRegistry::new();
        registry.set_abi(n("eosio.token"), AbiDef::token());
        let recorder = Recorder::default();
        let pool = Arc::new(ConnectionPool::new(recorder.clone(), PoolConfig::default()));
        let pipeline = Pipeline::start(config, Arc::new(registry), pool).unwrap();
        (pipeline, recorder)
    }

    #[test]
    fn gate_latches_on_start_block() {
        let gate = BlockGate::new(100, 0);
        assert_eq!(gate.check(0), Some(SkipCause::BlockZero));
        assert_eq!(gate.check(99), Some(SkipCause::BeforeStartBlock));
        assert_eq!(gate.check(100), None);
        // once latched, earlier blocks pass too
        assert_eq!(gate.check(99), None);
    }

    #[test]
    fn gate_ignores_blocks_past_end() {
        let gate = BlockGate::new(0, 200);
        assert_eq!(gate.check(1), None);
        assert_eq!(gate.check(200), None);
        assert_eq!(gate.check(201), Some(SkipCause::AfterEndBlock));
        assert_eq!(gate.check(500), Some(SkipCause::AfterEndBlock));
    }

    #[tokio::test]
    async fn invalid_config_is_fatal() {
        let registry = Arc::new(MemoryAbiRegistry::new());
        let pool = Arc::new(ConnectionPool::new(Recorder::default(), PoolConfig::default()));
        let config = PipelineConfig {
            write_workers: 0,
            ..Default::default()
        };
        assert!(Pipeline::start(config, registry, pool).is_err());
    }

    #[tokio::test]
    async fn shutdown_finalizes_partial_batches_before_executors_stop() {
        let (pipeline, recorder) = start(PipelineConfig {
            extraction_workers: 2,
            write_workers: 2,
            staleness_ms: 60_000,
            ..Default::default()
        });
        let intake = pipeline.intake();
        for seq in 1..=3 {
            assert_eq!(intake.submit(transfer_trace(100, seq)).await, Admission::Enqueued);
        }
        assert_eq!(
            intake.submit(transfer_trace(0, 99)).await,
            Admission::Skipped(SkipCause::BlockZero)
        );

        let report = pipeline.shutdown().await;
        assert_eq!(report.traces_processed, 3);
        assert_eq!(report.finalized.ledger_rows, 3);
        assert_eq!(report.finalized.authorization_rows, 3);
        assert_eq!(report.finalized.statements, 2);
        // 6 deltas + 1 ledger insert + 1 authorization insert
        assert_eq!(report.statements_executed, 8);
        assert_eq!(report.metrics.traces_skipped, 1);

        let statements = recorder.0.lock().unwrap().clone();
        let ledger: Vec<_> = statements
            .iter()
            .filter(|s| s.starts_with("INSERT INTO ledger"))
            .collect();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].matches("), (").count() + 1, 3);
        assert_eq!(intake.submit(transfer_trace(100, 4)).await, Admission::Closed);
    }

    /// Resolver that panics when asked to decode for one contract.
    struct PanickingResolver {
        inner: MemoryAbiRegistry,
        poisoned: Name,
    }

    impl AbiResolver for PanickingResolver {
        fn resolve(&self, account: Name) -> Option<Arc<AbiDef>> {
            if account == self.poisoned {
                panic!("resolver failure for {account}");
            }
            self.inner.resolve(account)
        }
    }

    #[tokio::test]
    async fn panicked_worker_is_reported_at_shutdown() {
        let inner = MemoryAbiRegistry::new();
        inner.set_abi(n("eosio.token"), AbiDef::token());
        let resolver = PanickingResolver {
            inner,
            poisoned: n("bad.token"),
        };
        let pool = Arc::new(ConnectionPool::new(Recorder::default(), PoolConfig::default()));
        let config = PipelineConfig {
            extraction_workers: 1,
            ..Default::default()
        };
        let pipeline = Pipeline::start(config, Arc::new(resolver), pool).unwrap();

        let mut bad = transfer_trace(100, 1);
        bad.action_traces[0].account = n("bad.token");
        pipeline.intake().submit(bad).await;

        let report = pipeline.shutdown().await;
        assert_eq!(report.tasks_failed, 1);
        assert_eq!(report.metrics.tasks_failed, 1);
        assert_eq!(report.traces_processed, 0);
    }

    #[tokio::test]
    async fn ticker_flushes_stale_batches() {
        let (pipeline, recorder) = start(PipelineConfig {
            staleness_ms: 20,
            tick_interval_ms: 10,
            ..Default::default()
        });
        pipeline.intake().submit(transfer_trace(100, 1)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pipeline.pending_rows(), (0, 0));
        {
            let statements = recorder.0.lock().unwrap();
            assert!(statements.iter().any(|s| s.starts_with("INSERT INTO ledger")));
            assert!(statements.iter().any(|s| s.starts_with("INSERT INTO actions_accounts")));
        }
        let report = pipeline.shutdown().await;
        assert_eq!(report.finalized, FinalizeReport::default());
    }
}
