//! SQLite backend via `sqlx`.
//!
//! # Usage
//! ```rust,no_run
//! use traceledger_core::{ConnectionPool, PoolConfig};
//! use traceledger_storage::sqlite::SqliteFactory;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ConnectionPool::new(SqliteFactory::open("./ledger.db"), PoolConfig::default());
//! traceledger_storage::init_schema(&pool, false).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::Connection as _;
use sqlx::SqliteConnection;
use tracing::debug;
use traceledger_core::{Connection, ConnectionFactory, ExecutionError, PoolError};

use crate::execution_error;

/// Opens connections to one SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteFactory {
    url: String,
}

impl SqliteFactory {
    /// `path` may be a plain file path (`"./ledger.db"`) or a full SQLite URL
    /// (`"sqlite:./ledger.db?mode=rwc"`).
    pub fn open(path: &str) -> Self {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        Self { url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConnectionFactory for SqliteFactory {
    type Connection = SqliteLedgerConnection;

    async fn connect(&self) -> Result<SqliteLedgerConnection, PoolError> {
        let mut conn = SqliteConnection::connect(&self.url)
            .await
            .map_err(|e| PoolError::Connect(e.to_string()))?;
        // WAL for concurrent readers; in-memory databases ignore it
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&mut conn)
            .await
            .map_err(|e| PoolError::Connect(e.to_string()))?;
        debug!(url = %self.url, "sqlite connection opened");
        Ok(SqliteLedgerConnection { conn })
    }
}

pub struct SqliteLedgerConnection {
    conn: SqliteConnection,
}

#[async_trait]
impl Connection for SqliteLedgerConnection {
    async fn execute(&mut self, statement: &str) -> Result<u64, ExecutionError> {
        sqlx::query(statement)
            .persistent(false)
            .execute(&mut self.conn)
            .await
            .map(|done| done.rows_affected())
            .map_err(execution_error)
    }
}
