//! Error types for the lock coordinator.

use crate::token::LockToken;
use recordlock_storage::StorageError;
use thiserror::Error;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur while acquiring or releasing record locks.
#[derive(Debug, Error)]
pub enum LockError {
    /// No row matched the key and version: the record is missing or the
    /// caller's version stamp is stale.
    #[error("lock conflict on {table}/{key}: no row with version {version}")]
    LockConflict {
        /// Table of the record.
        table: String,
        /// Primary key of the record.
        key: String,
        /// Version stamp the caller expected.
        version: String,
    },

    /// The locking read matched several rows for one primary key.
    #[error("primary key {key} matched {rows} rows in {table}")]
    SchemaInvariantViolation {
        /// Table of the record.
        table: String,
        /// Primary key that is not unique.
        key: String,
        /// Number of rows returned.
        rows: usize,
    },

    /// Storage engine error (connection, timeout, query, unknown table).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The engine rejected the commit of a locked transaction.
    #[error("commit of lock {token} failed: {source}")]
    CommitFailure {
        /// Token of the released lock.
        token: LockToken,
        /// Engine error.
        #[source]
        source: StorageError,
    },

    /// Release was called with a token that is not registered.
    #[error("lock not found: {}", describe_token(.token))]
    LockNotFound {
        /// The token presented, if the record carried one.
        token: Option<LockToken>,
    },

    /// The record cannot be locked as given.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// A freshly minted token collided with a registered one.
    #[error("lock token {token} is already registered")]
    DuplicateToken {
        /// The colliding token.
        token: LockToken,
    },

    /// The work guarded by the lock failed.
    #[error("critical section failed: {0}")]
    CriticalSection(Box<dyn std::error::Error + Send + Sync>),
}

fn describe_token(token: &Option<LockToken>) -> String {
    match token {
        Some(token) => token.to_string(),
        None => "record carries no token".into(),
    }
}

impl LockError {
    /// Creates a lock conflict error.
    pub fn lock_conflict(
        table: impl Into<String>,
        key: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self::LockConflict {
            table: table.into(),
            key: key.into(),
            version: version.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Wraps a failure of the guarded work.
    pub fn critical_section(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::CriticalSection(err.into())
    }

    /// Returns true if the error is a version or existence conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// Returns true if a deadline elapsed while opening the transaction or
    /// waiting for the row lock.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_timeout())
    }
}
