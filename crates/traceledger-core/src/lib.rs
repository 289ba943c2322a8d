//! traceledger-core: concurrent ingestion of transaction traces into a token ledger.
//!
//! # Architecture
//!
//! ```text
//! IntakeHandle ──► ThrottledQueue<TransactionTrace>
//!                      └── ExtractionWorker × N   (Extractor + AbiResolver)
//!                             ├── Batcher<LedgerRows>          (count / staleness)
//!                             ├── Batcher<AuthorizationRows>   (count / staleness)
//!                             └── balance deltas, token registrations
//!                                    ▼
//!                  ThrottledQueue<String> ──► WriteExecutor × M ──► ConnectionPool
//! ```
//!
//! Storage backends implement [`pool::ConnectionFactory`]; see the
//! `traceledger-storage` crate.

pub mod abi;
pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod extract;
pub mod metrics;
pub mod name;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod render;
pub mod types;

pub use abi::{AbiDef, AbiResolver, AbiValue, ActionFields, MemoryAbiRegistry};
pub use batch::{BatchPolicy, Batcher, StatementSink};
pub use config::{PipelineConfig, StorageConfig};
pub use error::{
    AssetError, ConfigError, DecodeError, ExecutionError, NameError, PoolError, QueueClosed,
};
pub use executor::{execute_statement, ExecutionOutcome, WriteExecutor};
pub use extract::{ActionOutcome, Extractor, SkipReason, TraceOutcome};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use name::{Asset, Name, Symbol, MAX_AMOUNT};
pub use pipeline::{
    Admission, BlockGate, FinalizeReport, IntakeHandle, Pipeline, RowEmitter, ShutdownReport,
    SkipCause,
};
pub use pool::{
    Connection, ConnectionFactory, ConnectionPool, PoolConfig, PoolStatus, PooledConnection,
};
pub use queue::{ThrottlePolicy, ThrottledQueue};
pub use types::{
    ActionTrace, AuthorizationRow, LedgerEntry, PermissionLevel, TokenBalanceDelta,
    TokenRegistration, TransactionTrace,
};
