//! traceledger-storage: connection backends for the TraceLedger pipeline.
//!
//! Backends:
//! - [`memory`] - records statements in RAM (tests, dry runs)
//! - `sqlite` - SQLite via `sqlx` (feature `sqlite`)
//! - `postgres` - PostgreSQL via `sqlx` (feature `postgres`)
//!
//! Every backend implements [`ConnectionFactory`](traceledger_core::ConnectionFactory)
//! so it can sit behind a [`ConnectionPool`](traceledger_core::ConnectionPool).

pub mod error;
pub mod memory;
pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::StorageError;
pub use memory::{MemoryConnection, MemoryFactory, MemoryStore};
pub use schema::init_schema;

/// Which backend a storage URL selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Sqlite,
    Postgres,
}

impl BackendKind {
    /// Pick a backend from the URL scheme.
    pub fn from_url(url: &str) -> Result<Self, StorageError> {
        if url.starts_with("memory:") {
            Ok(BackendKind::Memory)
        } else if url.starts_with("sqlite:") {
            Ok(BackendKind::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(BackendKind::Postgres)
        } else {
            Err(StorageError::UnsupportedUrl(url.to_string()))
        }
    }
}

/// Map a `sqlx` execution error, separating broken connections from
/// rejected statements.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn execution_error(e: sqlx::Error) -> traceledger_core::ExecutionError {
    use traceledger_core::ExecutionError;
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ExecutionError::ConnectionLost {
            reason: e.to_string(),
        },
        other => ExecutionError::Statement {
            reason: other.to_string(),
        },
    }
}
