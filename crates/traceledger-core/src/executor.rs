//! Write executors: pop one statement, run it on a pooled connection.
//!
//! Execution is best effort. A failed statement is logged and dropped; it is
//! never retried or resubmitted. The connection goes back to the pool unless
//! the backend reported it lost.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::ExecutionError;
use crate::metrics::PipelineMetrics;
use crate::pool::{Connection, ConnectionFactory, ConnectionPool};
use crate::queue::ThrottledQueue;

/// Result of executing one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed { rows_affected: u64 },
    Failed(ExecutionError),
}

impl ExecutionOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed { .. })
    }
}

/// Check out a connection, execute `statement`, check the connection back in
/// unless the backend reported it lost.
pub async fn execute_statement<F: ConnectionFactory>(
    pool: &ConnectionPool<F>,
    statement: &str,
) -> ExecutionOutcome {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "no connection for statement");
            return ExecutionOutcome::Failed(e.into());
        }
    };
    let result = conn.execute(statement).await;
    match result {
        Ok(rows_affected) => ExecutionOutcome::Executed { rows_affected },
        Err(e) => {
            error!(error = %e, statement = %preview(statement), "statement failed");
            if e.is_connection_lost() {
                conn.discard();
            }
            ExecutionOutcome::Failed(e)
        }
    }
}

fn preview(statement: &str) -> &str {
    match statement.char_indices().nth(120) {
        Some((idx, _)) => &statement[..idx],
        None => statement,
    }
}

/// One write worker bound to the shared write queue and pool.
pub struct WriteExecutor<F: ConnectionFactory> {
    id: usize,
    queue: Arc<ThrottledQueue<String>>,
    pool: Arc<ConnectionPool<F>>,
    metrics: Arc<PipelineMetrics>,
}

impl<F: ConnectionFactory> WriteExecutor<F> {
    pub fn new(
        id: usize,
        queue: Arc<ThrottledQueue<String>>,
        pool: Arc<ConnectionPool<F>>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            id,
            queue,
            pool,
            metrics,
        }
    }

    /// Run until the write queue is closed and empty.
    pub async fn run(self) {
        debug!(worker = self.id, "write executor started");
        while let Some(statement) = self.queue.pop().await {
            match execute_statement(&self.pool, &statement).await {
                ExecutionOutcome::Executed { .. } => self.metrics.record_executed(),
                ExecutionOutcome::Failed(_) => self.metrics.record_failed(),
            }
        }
        info!(worker = self.id, "write executor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::CountingFactory;
    use crate::pool::PoolConfig;
    use crate::queue::ThrottlePolicy;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn pool(capacity: usize) -> Arc<ConnectionPool<CountingFactory>> {
        Arc::new(ConnectionPool::new(
            CountingFactory::default(),
            PoolConfig {
                capacity,
                acquire_timeout: Some(Duration::from_millis(50)),
                close_on_release: false,
            },
        ))
    }

    #[tokio::test]
    async fn failure_is_swallowed_and_connection_released() {
        let pool = pool(1);
        let outcome = execute_statement(&pool, "INSERT FAIL").await;
        assert!(matches!(outcome, ExecutionOutcome::Failed(ExecutionError::Statement { .. })));
        assert_eq!(pool.status().checked_out, 0);

        let outcome = execute_statement(&pool, "INSERT ok").await;
        assert_eq!(outcome, ExecutionOutcome::Executed { rows_affected: 1 });
        assert_eq!(pool.factory().opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lost_connection_is_discarded() {
        let pool = pool(1);
        let outcome = execute_statement(&pool, "INSERT LOST").await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed(ExecutionError::ConnectionLost { .. })
        ));
        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().checked_out, 0);

        assert!(execute_statement(&pool, "INSERT ok").await.is_executed());
        assert_eq!(pool.factory().opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn acquire_failure_is_an_outcome() {
        let pool = pool(1);
        let _held = pool.acquire().await.unwrap();
        let outcome = execute_statement(&pool, "INSERT ok").await;
        assert!(matches!(outcome, ExecutionOutcome::Failed(ExecutionError::Acquire(_))));
    }

    #[tokio::test]
    async fn executors_drain_queue_before_stopping() {
        let pool = pool(3);
        let queue = Arc::new(ThrottledQueue::new("writes", ThrottlePolicy::new(100)));
        let metrics = Arc::new(PipelineMetrics::default());
        for i in 0..10 {
            let stmt = if i == 4 { "INSERT FAIL".to_string() } else { format!("INSERT {i}") };
            queue.push(stmt).await.unwrap();
        }
        queue.close();

        let handles: Vec<_> = (0..3)
            .map(|id| {
                let exec = WriteExecutor::new(id, queue.clone(), pool.clone(), metrics.clone());
                tokio::spawn(exec.run())
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.statements_executed, 9);
        assert_eq!(snap.statements_failed, 1);
        assert_eq!(pool.factory().executed.load(Ordering::SeqCst), 9);
        assert!(pool.status().checked_out == 0);
    }

    #[test]
    fn preview_truncates_long_statements() {
        let long = "x".repeat(500);
        assert_eq!(preview(&long).len(), 120);
        assert_eq!(preview("short"), "short");
    }
}
