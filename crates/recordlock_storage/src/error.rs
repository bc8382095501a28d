//! Error types for storage gateway operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while talking to the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The engine could not be reached or the connection was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation did not complete before its deadline.
    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// The table does not exist in the engine's schema.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Name of the table that was referenced.
        table: String,
    },

    /// A row with the same primary key already exists.
    #[error("duplicate key {key} in table {table}")]
    DuplicateKey {
        /// The table being written.
        table: String,
        /// The offending key.
        key: String,
    },

    /// A write was staged on a row the transaction does not hold a lock on.
    #[error("row {key} in table {table} is not locked by this transaction")]
    RowNotLocked {
        /// The table being written.
        table: String,
        /// The key that was not locked.
        key: String,
    },

    /// The transaction was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,

    /// The engine rejected a statement.
    #[error("query error: {0}")]
    Query(String),

    /// An argument was rejected before reaching the engine.
    #[error("invalid argument: {0}")]
    Invalid(String),
}

impl StorageError {
    /// Creates a timeout error for `operation`.
    pub fn timeout(operation: &'static str, waited: Duration) -> Self {
        Self::Timeout { operation, waited }
    }

    /// Returns true if this error reports an elapsed deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
