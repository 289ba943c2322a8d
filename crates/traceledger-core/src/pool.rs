//! Bounded storage connection pool.
//!
//! A semaphore caps the number of checked-out connections at `capacity`.
//! [`ConnectionPool::acquire`] hands out a [`PooledConnection`] guard that
//! checks the connection back in when dropped, so release happens exactly
//! once on every path.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::error::{ExecutionError, PoolError};

/// One open storage connection.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Execute one rendered statement, returning the number of affected rows.
    async fn execute(&mut self, statement: &str) -> Result<u64, ExecutionError>;
}

/// Opens new connections for the pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of simultaneously checked-out connections.
    pub capacity: usize,
    /// Give up waiting for a free connection after this long.
    pub acquire_timeout: Option<Duration>,
    /// Close connections on release instead of keeping them idle.
    pub close_on_release: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            acquire_timeout: None,
            close_on_release: false,
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub capacity: usize,
    pub checked_out: usize,
    pub idle: usize,
}

pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    permits: Semaphore,
    idle: Mutex<Vec<F::Connection>>,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            permits: Semaphore::new(config.capacity),
            factory,
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.config.capacity,
            checked_out: self.config.capacity - self.permits.available_permits(),
            idle: self.idle_len(),
        }
    }

    /// Check out a connection, waiting while all of them are in use.
    pub async fn acquire(&self) -> Result<PooledConnection<'_, F>, PoolError> {
        let permit = match self.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.permits.acquire())
                .await
                .map_err(|_| PoolError::Timeout {
                    ms: limit.as_millis() as u64,
                })?,
            None => self.permits.acquire().await,
        }
        .map_err(|_| PoolError::Closed)?;

        let reused = self.idle.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(checked_out = self.status().checked_out, "opening connection");
                self.factory.connect().await?
            }
        };
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Stop handing out connections and drop the idle ones.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn release(&self, conn: F::Connection) {
        if self.config.close_on_release || self.permits.is_closed() {
            return;
        }
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).push(conn);
    }

    fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A checked-out connection. Returned to the pool on drop.
pub struct PooledConnection<'a, F: ConnectionFactory> {
    pool: &'a ConnectionPool<F>,
    conn: Option<F::Connection>,
    // dropped after the connection is back in the idle set
    _permit: SemaphorePermit<'a>,
}

impl<F: ConnectionFactory> PooledConnection<'_, F> {
    /// Close this connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.conn = None;
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<'_, F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
