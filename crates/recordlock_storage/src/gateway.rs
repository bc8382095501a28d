//! Storage gateway trait definition.

use crate::error::StorageResult;
use crate::types::{LockQuery, LockedRow};
use std::fmt;
use std::time::Instant;

/// Transaction isolation level requested at begin time.
///
/// Every level offered here keeps row locks taken by a locking read until
/// the transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Each statement sees data committed before it started.
    #[default]
    ReadCommitted,
    /// All statements see the snapshot taken by the first one.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

impl IsolationLevel {
    /// Returns the SQL spelling of the level.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// Parses a level from its SQL spelling or a snake_case alias.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', " ").as_str() {
            "read committed" => Some(Self::ReadCommitted),
            "repeatable read" => Some(Self::RepeatableRead),
            "serializable" => Some(Self::Serializable),
            _ => None,
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// The transactional storage engine consumed by the lock coordinator.
///
/// A gateway hands out transaction handles, runs a single kind of query
/// (a locking read by key and version) inside them, and commits them.
///
/// # Invariants
///
/// - Rows returned by `lock_rows` stay exclusively locked until the
///   transaction is committed or dropped
/// - `commit` succeeds at most once per transaction; later calls fail with
///   [`crate::StorageError::TransactionClosed`]
/// - Dropping an uncommitted transaction rolls it back
/// - Deadlines are honored by returning [`crate::StorageError::Timeout`]
///
/// # Implementors
///
/// - [`super::InMemoryGateway`] - In-process engine for tests and simulation
/// - `PostgresGateway` - PostgreSQL via a connection pool (feature `postgres`)
pub trait StorageGateway: Send + Sync {
    /// Open transaction handle.
    type Transaction: Send;

    /// Begins a transaction at the given isolation level.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is unreachable or the deadline passes
    /// before a transaction could be opened.
    fn begin_transaction(
        &self,
        isolation: IsolationLevel,
        deadline: Option<Instant>,
    ) -> StorageResult<Self::Transaction>;

    /// Selects the rows matching `query` with an exclusive row lock.
    ///
    /// Blocks while another transaction holds the row, up to `deadline`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown, the statement fails, or the
    /// deadline passes while waiting for the row lock.
    fn lock_rows(
        &self,
        txn: &mut Self::Transaction,
        query: &LockQuery<'_>,
        deadline: Option<Instant>,
    ) -> StorageResult<Vec<LockedRow>>;

    /// Commits the transaction, releasing its row locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the commit or the transaction
    /// is already closed.
    fn commit(&self, txn: &mut Self::Transaction) -> StorageResult<()>;
}
