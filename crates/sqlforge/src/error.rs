//! Error types returned by the query builder.
//!
//! Errors fall into the three categories the compiler is allowed to produce:
//! [`SqlforgeError::Validation`] (malformed input, caught before any SQL is
//! emitted), [`SqlforgeError::Emission`] (an internal compiler bug — the AST
//! reached an unreachable state), and [`SqlforgeError::Execution`] (the
//! executor rejected the compiled statement).

use thiserror::Error;

/// Result type alias for sqlforge operations.
pub type SqlforgeResult<T> = Result<T, SqlforgeError>;

#[derive(Debug, Error)]
pub enum SqlforgeError {
    /// Structural input failed validation before any SQL was built: a bad
    /// identifier, an operator outside the allowed set, a negative limit, a
    /// key-array length mismatch, a missing callback, an empty bulk insert,
    /// a mismatched bulk-row column set, a missing target table, or an
    /// `upsert` without an update payload.
    #[error("{context}: {message}")]
    Validation { context: &'static str, message: String },

    /// The compiler reached a state the AST invariants should have made
    /// unreachable. Indicates a builder-internal bug, not caller error.
    #[error("internal compiler error: {0}")]
    Emission(String),

    /// The executor rejected the compiled statement (connection loss,
    /// constraint violation, deadlock, timeout, ...). Propagated unchanged;
    /// any ambient transaction rolls back before this surfaces to the
    /// caller.
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

impl SqlforgeError {
    pub fn validation(context: &'static str, message: impl Into<String>) -> Self {
        SqlforgeError::Validation { context, message: message.into() }
    }

    pub fn emission(message: impl Into<String>) -> Self {
        SqlforgeError::Emission(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, SqlforgeError::Validation { .. })
    }

    pub fn is_execution(&self) -> bool {
        matches!(self, SqlforgeError::Execution(_))
    }
}

/// Execution-layer failure, independent of the concrete driver backing the
/// [`crate::executor::Executor`] trait. The `sqlx` adapter converts
/// `sqlx::Error` into this via `From`; a mock executor used in tests can
/// construct it directly.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("database rejected statement: {0}")]
    Database(String),
    #[error("row decode error: {0}")]
    Decode(String),
    #[error("no rows returned where exactly one was expected")]
    RowNotFound,
}

#[cfg(feature = "pool")]
impl From<sqlx::Error> for SqlforgeError {
    fn from(err: sqlx::Error) -> Self {
        SqlforgeError::Execution(match err {
            sqlx::Error::RowNotFound => ExecutionError::RowNotFound,
            sqlx::Error::Io(e) => ExecutionError::Connection(e.to_string()),
            sqlx::Error::PoolTimedOut => ExecutionError::Connection("pool timed out".into()),
            sqlx::Error::PoolClosed => ExecutionError::Connection("pool closed".into()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ExecutionError::Decode(err.to_string())
            }
            other => ExecutionError::Database(other.to_string()),
        })
    }
}
