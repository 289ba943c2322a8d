//! Error types for the traceledger pipeline.

use std::fmt;

use thiserror::Error;

/// Errors raised while parsing an account/action name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name '{0}' is longer than 13 characters")]
    TooLong(String),

    #[error("name '{name}' contains invalid character '{ch}'")]
    InvalidChar { name: String, ch: char },

    #[error("13th character of name '{0}' must be one of '.12345abcdefghij'")]
    InvalidLastChar(String),
}

/// Errors raised while parsing a symbol or an asset string such as `"10.0000 TOK"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("symbol code '{0}' must be 1-7 uppercase ASCII letters")]
    InvalidSymbolCode(String),

    #[error("precision {0} exceeds the maximum of 18")]
    PrecisionTooLarge(u8),

    #[error("malformed asset '{0}'")]
    Malformed(String),

    #[error("asset amount in '{0}' is out of range")]
    Overflow(String),
}

/// Errors that can occur while decoding a single action payload.
///
/// Every variant leads to the action being dropped; none of them are fatal
/// to the trace or the worker that raised them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no ABI registered for contract '{account}'")]
    AbiNotFound { account: String },

    #[error("action '{action}' is not declared in the contract ABI")]
    UnknownAction { action: String },

    #[error("ABI type '{0}' is not defined")]
    UnknownType(String),

    #[error("unexpected end of payload: needed {needed} bytes at offset {offset}")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("type mismatch for '{field}': expected {expected}")]
    TypeMismatch { field: String, expected: &'static str },

    #[error("ABI nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("decode deadline of {ms}ms exceeded")]
    DeadlineExceeded { ms: u64 },

    #[error("ABI parse error: {0}")]
    AbiParse(String),
}

/// Errors from the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("timed out after {ms}ms waiting for a free connection")]
    Timeout { ms: u64 },

    #[error("connection pool is closed")]
    Closed,

    #[error("failed to open connection: {0}")]
    Connect(String),
}

/// Errors from executing a rendered statement against storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("connection unavailable: {0}")]
    Acquire(#[from] PoolError),

    #[error("statement failed: {reason}")]
    Statement { reason: String },

    /// The connection itself broke; it must not go back to the pool.
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },
}

impl ExecutionError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ExecutionError::ConnectionLost { .. })
    }
}

/// Errors in the startup configuration. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Returned when an item is pushed into a queue that has already been closed.
///
/// The rejected item is handed back so the caller decides what happens to it.
pub struct QueueClosed<T>(pub T);

impl<T> QueueClosed<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is closed")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}
