//! Table layout written by the pipeline.
//!
//! The DDL sticks to the subset shared by Postgres and SQLite so the same
//! rendered statements run against both.

use tracing::info;
use traceledger_core::{Connection, ConnectionFactory, ConnectionPool};

use crate::error::StorageError;

/// Tables in creation order.
pub const TABLES: [&str; 4] = ["ledger", "tokens", "tokenlist", "actions_accounts"];

pub fn create_statements() -> Vec<&'static str> {
    vec![
        "CREATE TABLE IF NOT EXISTS ledger (
            action_id       BIGINT      PRIMARY KEY,
            transaction_id  VARCHAR(64) NOT NULL,
            block_number    BIGINT      NOT NULL,
            timestamp       TIMESTAMP   NOT NULL,
            contract_owner  VARCHAR(13) NOT NULL,
            from_account    VARCHAR(13) NOT NULL,
            to_account      VARCHAR(13) NOT NULL,
            amount          BIGINT      NOT NULL,
            precision       SMALLINT    NOT NULL,
            symbol          VARCHAR(7)  NOT NULL,
            receiver        VARCHAR(13) NOT NULL,
            action_name     VARCHAR(13) NOT NULL,
            created_at      TIMESTAMP   NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS ledger_block_number ON ledger (block_number)",
        "CREATE INDEX IF NOT EXISTS ledger_from_account ON ledger (from_account)",
        "CREATE INDEX IF NOT EXISTS ledger_to_account ON ledger (to_account)",
        "CREATE TABLE IF NOT EXISTS tokens (
            account         VARCHAR(13) NOT NULL,
            symbol          VARCHAR(7)  NOT NULL,
            precision       SMALLINT    NOT NULL,
            contract_owner  VARCHAR(13) NOT NULL,
            amount          BIGINT      NOT NULL DEFAULT 0,
            PRIMARY KEY (account, symbol)
        )",
        "CREATE TABLE IF NOT EXISTS tokenlist (
            contract_owner  VARCHAR(13) NOT NULL,
            symbol          VARCHAR(7)  NOT NULL,
            precision       SMALLINT    NOT NULL,
            maximum_supply  BIGINT      NOT NULL,
            PRIMARY KEY (contract_owner, symbol)
        )",
        "CREATE TABLE IF NOT EXISTS actions_accounts (
            action_id   BIGINT      NOT NULL,
            actor       VARCHAR(13) NOT NULL,
            permission  VARCHAR(13) NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS actions_accounts_action_id ON actions_accounts (action_id)",
        "CREATE INDEX IF NOT EXISTS actions_accounts_actor ON actions_accounts (actor)",
    ]
}

pub fn drop_statements() -> Vec<String> {
    TABLES
        .iter()
        .rev()
        .map(|t| format!("DROP TABLE IF EXISTS {t}"))
        .collect()
}

/// Create the tables, dropping them first when `wipe` is set.
pub async fn init_schema<F: ConnectionFactory>(
    pool: &ConnectionPool<F>,
    wipe: bool,
) -> Result<(), StorageError> {
    let mut conn = pool.acquire().await?;
    if wipe {
        info!("wiping ledger tables");
        for stmt in drop_statements() {
            conn.execute(&stmt).await?;
        }
    }
    for stmt in create_statements() {
        conn.execute(stmt).await?;
    }
    info!(tables = TABLES.len(), "schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryFactory, MemoryStore};
    use traceledger_core::PoolConfig;

    #[tokio::test]
    async fn init_creates_every_table() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(MemoryFactory::new(store.clone()), PoolConfig::default());
        init_schema(&pool, false).await.unwrap();
        let statements = store.statements();
        for table in TABLES {
            let ddl = format!("CREATE TABLE IF NOT EXISTS {table} (");
            assert!(statements.iter().any(|s| s.starts_with(&ddl)), "{table}");
        }
        assert!(!statements.iter().any(|s| s.starts_with("DROP")));
    }

    #[tokio::test]
    async fn wipe_drops_before_creating() {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(MemoryFactory::new(store.clone()), PoolConfig::default());
        init_schema(&pool, true).await.unwrap();
        let statements = store.statements();
        assert_eq!(statements[0], "DROP TABLE IF EXISTS actions_accounts");
        assert_eq!(statements[3], "DROP TABLE IF EXISTS ledger");
        assert!(statements[4].starts_with("CREATE TABLE IF NOT EXISTS ledger"));
    }

    #[tokio::test]
    async fn failing_ddl_is_reported() {
        let store = MemoryStore::new();
        store.fail_when_contains("tokenlist");
        let pool = ConnectionPool::new(MemoryFactory::new(store), PoolConfig::default());
        assert!(matches!(init_schema(&pool, false).await, Err(StorageError::Schema(_))));
    }
}
