//! In-memory backend.
//!
//! Connections append every statement to a shared [`MemoryStore`] instead of
//! running it. Statements can be made to fail by substring, connections can
//! be refused, and a per-statement latency simulates a slow database.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use traceledger_core::{Connection, ConnectionFactory, ExecutionError, PoolError};

#[derive(Default)]
struct StoreState {
    statements: Vec<String>,
    fail_patterns: Vec<String>,
    failed: usize,
}

/// Shared log of executed statements.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successfully executed statement, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Statements that insert into `table`.
    pub fn inserts_into(&self, table: &str) -> Vec<String> {
        let prefix = format!("INSERT INTO {table} ");
        self.lock()
            .statements
            .iter()
            .filter(|s| s.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of statements rejected by a failure pattern.
    pub fn failed(&self) -> usize {
        self.lock().failed
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_when_contains(&self, pattern: impl Into<String>) {
        self.lock().fail_patterns.push(pattern.into());
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.statements.clear();
        state.failed = 0;
    }

    fn record(&self, statement: &str) -> Result<u64, ExecutionError> {
        let mut state = self.lock();
        if let Some(pattern) = state
            .fail_patterns
            .iter()
            .find(|p| statement.contains(p.as_str()))
        {
            let reason = format!("injected failure on '{pattern}'");
            state.failed += 1;
            return Err(ExecutionError::Statement { reason });
        }
        state.statements.push(statement.to_string());
        Ok(value_rows(statement))
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Rows carried by a rendered insert.
fn value_rows(statement: &str) -> u64 {
    if statement.contains(" VALUES ") {
        statement.matches("), (").count() as u64 + 1
    } else {
        0
    }
}

/// Opens [`MemoryConnection`]s onto one [`MemoryStore`].
pub struct MemoryFactory {
    store: MemoryStore,
    latency: Option<Duration>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryFactory {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            latency: None,
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    /// Delay every statement by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Connections opened so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, PoolError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PoolError::Connect("memory backend refusing connections".into()));
        }
        let id = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            id,
            store: self.store.clone(),
            latency: self.latency,
            executed: 0,
        })
    }
}

pub struct MemoryConnection {
    id: usize,
    store: MemoryStore,
    latency: Option<Duration>,
    executed: u64,
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Statements run on this connection.
    pub fn executed(&self) -> u64 {
        self.executed
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, statement: &str) -> Result<u64, ExecutionError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let rows = self.store.record(statement)?;
        self.executed += 1;
        Ok(rows)
    }
}
