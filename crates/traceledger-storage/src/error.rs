use thiserror::Error;
use traceledger_core::{ExecutionError, PoolError};

/// Errors from setting up a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unsupported storage url '{0}' (expected memory:, sqlite: or postgres://)")]
    UnsupportedUrl(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("schema statement failed: {0}")]
    Schema(#[from] ExecutionError),
}
