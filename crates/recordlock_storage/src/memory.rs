//! In-memory row-locking storage engine.

use crate::error::{StorageError, StorageResult};
use crate::gateway::{IsolationLevel, StorageGateway};
use crate::types::{LockQuery, LockedRow, RecordKey, TableName, VersionStamp};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

type RowSlot = (TableName, RecordKey);

#[derive(Debug, Default)]
struct EngineState {
    /// Committed rows: table -> key -> version.
    tables: HashMap<TableName, BTreeMap<RecordKey, VersionStamp>>,
    /// Row locks: slot -> holding transaction.
    locks: HashMap<RowSlot, u64>,
    /// Transactions begun and not yet closed.
    open: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<EngineState>,
    released: Condvar,
    available: AtomicBool,
    next_txid: AtomicU64,
}

impl Shared {
    /// Waits until `slot` is free or held by `owner`.
    fn wait_for_row(
        &self,
        state: &mut MutexGuard<'_, EngineState>,
        slot: &RowSlot,
        owner: u64,
        deadline: Option<Instant>,
    ) -> StorageResult<()> {
        let started = Instant::now();
        loop {
            let blocked = matches!(state.locks.get(slot), Some(&holder) if holder != owner);
            if !blocked {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        tracing::debug!(table = %slot.0, key = %slot.1, "row lock wait timed out");
                        return Err(StorageError::timeout("locking read", started.elapsed()));
                    }
                    self.released.wait_until(state, deadline);
                }
                None => self.released.wait(state),
            }
        }
    }
}

/// State of an in-memory transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTransactionState {
    /// Transaction is open.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction was dropped without commit.
    RolledBack,
}

/// An open transaction on an [`InMemoryGateway`].
///
/// Row locks and staged version changes belong to the transaction. Dropping
/// it without a commit rolls it back.
#[derive(Debug)]
pub struct MemoryTransaction {
    id: u64,
    isolation: IsolationLevel,
    state: MemoryTransactionState,
    held: Vec<RowSlot>,
    staged: HashMap<RowSlot, VersionStamp>,
    shared: Arc<Shared>,
}

impl MemoryTransaction {
    /// Returns the engine-assigned transaction ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the isolation level the transaction was opened with.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> MemoryTransactionState {
        self.state
    }

    /// Checks if the transaction is still open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == MemoryTransactionState::Active
    }

    /// Returns the number of rows this transaction holds locks on.
    #[must_use]
    pub fn locked_rows(&self) -> usize {
        self.held.len()
    }

    fn ensure_active(&self) -> StorageResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(StorageError::TransactionClosed)
        }
    }

    /// Closes the transaction, applying staged writes when `apply` is set.
    fn finish(&mut self, state: &mut EngineState, apply: bool) {
        if apply {
            for ((table, key), version) in self.staged.drain() {
                if let Some(rows) = state.tables.get_mut(&table) {
                    rows.insert(key, version);
                }
            }
        } else {
            self.staged.clear();
        }
        for slot in self.held.drain(..) {
            state.locks.remove(&slot);
        }
        state.open = state.open.saturating_sub(1);
        self.state = if apply {
            MemoryTransactionState::Committed
        } else {
            MemoryTransactionState::RolledBack
        };
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        self.finish(&mut state, false);
        drop(state);
        shared.released.notify_all();
    }
}

/// An in-memory transactional engine with row-level locks.
///
/// Suitable for unit tests, integration tests and simulations. Each table
/// maps primary keys to version stamps; a locking read blocks while another
/// transaction holds the row, and evaluates its predicate against the latest
/// committed data once the lock is granted. Rows that do not match are not
/// kept locked.
///
/// Clones share the same engine.
///
/// # Example
///
/// ```rust
/// use recordlock_storage::{InMemoryGateway, IsolationLevel, LockQuery, StorageGateway};
///
/// let gateway = InMemoryGateway::new();
/// gateway.create_table("account");
/// gateway.insert("account", "42", 5u64).unwrap();
///
/// let mut txn = gateway.begin_transaction(IsolationLevel::ReadCommitted, None).unwrap();
/// let query = LockQuery {
///     table: &"account".into(),
///     key: &"42".into(),
///     version: &5u64.into(),
/// };
/// let rows = gateway.lock_rows(&mut txn, &query, None).unwrap();
/// assert_eq!(rows.len(), 1);
/// gateway.commit(&mut txn).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    shared: Arc<Shared>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::default()),
                released: Condvar::new(),
                available: AtomicBool::new(true),
                next_txid: AtomicU64::new(1),
            }),
        }
    }

    /// Creates a table if it does not exist yet.
    pub fn create_table(&self, table: impl Into<TableName>) {
        self.shared
            .state
            .lock()
            .tables
            .entry(table.into())
            .or_default();
    }

    /// Inserts a committed row.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the key already exists.
    pub fn insert(
        &self,
        table: impl Into<TableName>,
        key: impl Into<RecordKey>,
        version: impl Into<VersionStamp>,
    ) -> StorageResult<()> {
        let table = table.into();
        let key = key.into();
        let mut state = self.shared.state.lock();
        let rows = state
            .tables
            .get_mut(&table)
            .ok_or_else(|| StorageError::UnknownTable {
                table: table.to_string(),
            })?;
        if rows.contains_key(&key) {
            return Err(StorageError::DuplicateKey {
                table: table.to_string(),
                key: key.to_string(),
            });
        }
        rows.insert(key, version.into());
        Ok(())
    }

    /// Overwrites the committed version of a row as an independent writer.
    ///
    /// Waits for any row lock on the record to be released first, the way a
    /// plain `UPDATE` would.
    ///
    /// # Errors
    ///
    /// Returns an error if the table or row does not exist.
    pub fn update_version(
        &self,
        table: impl Into<TableName>,
        key: impl Into<RecordKey>,
        version: impl Into<VersionStamp>,
    ) -> StorageResult<()> {
        let slot = (table.into(), key.into());
        let mut state = self.shared.state.lock();
        // Transaction IDs start at 1, so 0 never owns a lock.
        self.shared.wait_for_row(&mut state, &slot, 0, None)?;
        let rows = state
            .tables
            .get_mut(&slot.0)
            .ok_or_else(|| StorageError::UnknownTable {
                table: slot.0.to_string(),
            })?;
        match rows.get_mut(&slot.1) {
            Some(current) => {
                *current = version.into();
                Ok(())
            }
            None => Err(StorageError::Query(format!(
                "no row with key {} in table {}",
                slot.1, slot.0
            ))),
        }
    }

    /// Stages a version change on a row locked by `txn`.
    ///
    /// The change becomes visible when the transaction commits and is
    /// discarded if it is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or does not hold the
    /// row lock.
    pub fn stage_version(
        &self,
        txn: &mut MemoryTransaction,
        table: impl Into<TableName>,
        key: impl Into<RecordKey>,
        version: impl Into<VersionStamp>,
    ) -> StorageResult<()> {
        txn.ensure_active()?;
        let slot = (table.into(), key.into());
        if !txn.held.contains(&slot) {
            return Err(StorageError::RowNotLocked {
                table: slot.0.to_string(),
                key: slot.1.to_string(),
            });
        }
        txn.staged.insert(slot, version.into());
        Ok(())
    }

    /// Returns the committed version of a row.
    #[must_use]
    pub fn version_of(
        &self,
        table: impl Into<TableName>,
        key: impl Into<RecordKey>,
    ) -> Option<VersionStamp> {
        let table = table.into();
        let key = key.into();
        self.shared
            .state
            .lock()
            .tables
            .get(&table)
            .and_then(|rows| rows.get(&key))
            .cloned()
    }

    /// Returns the number of rows in a table (0 if unknown).
    #[must_use]
    pub fn row_count(&self, table: impl Into<TableName>) -> usize {
        let table = table.into();
        self.shared
            .state
            .lock()
            .tables
            .get(&table)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if some transaction holds the row lock.
    #[must_use]
    pub fn is_locked(&self, table: impl Into<TableName>, key: impl Into<RecordKey>) -> bool {
        let slot = (table.into(), key.into());
        self.shared.state.lock().locks.contains_key(&slot)
    }

    /// Returns the number of row locks currently held.
    #[must_use]
    pub fn locked_row_count(&self) -> usize {
        self.shared.state.lock().locks.len()
    }

    /// Returns the number of open transactions.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.shared.state.lock().open
    }

    /// Simulates losing (or regaining) the connection to the engine.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.shared.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Connection("engine unavailable".into()))
        }
    }
}

impl StorageGateway for InMemoryGateway {
    type Transaction = MemoryTransaction;

    fn begin_transaction(
        &self,
        isolation: IsolationLevel,
        deadline: Option<Instant>,
    ) -> StorageResult<MemoryTransaction> {
        self.ensure_available()?;
        let started = Instant::now();
        let mut state = self.shared.state.lock();
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(StorageError::timeout("begin transaction", started.elapsed()));
        }
        state.open += 1;
        let id = self.shared.next_txid.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            id,
            isolation,
            state: MemoryTransactionState::Active,
            held: Vec::new(),
            staged: HashMap::new(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn lock_rows(
        &self,
        txn: &mut MemoryTransaction,
        query: &LockQuery<'_>,
        deadline: Option<Instant>,
    ) -> StorageResult<Vec<LockedRow>> {
        self.ensure_available()?;
        txn.ensure_active()?;

        let slot = (query.table.clone(), query.key.clone());
        let mut state = self.shared.state.lock();
        if !state.tables.contains_key(query.table) {
            return Err(StorageError::UnknownTable {
                table: query.table.to_string(),
            });
        }

        self.shared.wait_for_row(&mut state, &slot, txn.id, deadline)?;

        let current = state
            .tables
            .get(query.table)
            .and_then(|rows| rows.get(query.key))
            .cloned();

        match current {
            Some(version) if &version == query.version => {
                if state.locks.insert(slot.clone(), txn.id).is_none() {
                    txn.held.push(slot);
                }
                Ok(vec![LockedRow {
                    key: query.key.clone(),
                    version,
                }])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn commit(&self, txn: &mut MemoryTransaction) -> StorageResult<()> {
        txn.ensure_active()?;
        self.ensure_available()?;
        let mut state = self.shared.state.lock();
        txn.finish(&mut state, true);
        drop(state);
        self.shared.released.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn seeded() -> InMemoryGateway {
        let gateway = InMemoryGateway::new();
        gateway.create_table("account");
        gateway.insert("account", "1", 5u64).unwrap();
        gateway
    }

    fn lock(
        gateway: &InMemoryGateway,
        txn: &mut MemoryTransaction,
        key: &str,
        version: u64,
        deadline: Option<Instant>,
    ) -> StorageResult<Vec<LockedRow>> {
        let table = TableName::new("account");
        let key = RecordKey::new(key);
        let version = VersionStamp::from(version);
        let query = LockQuery {
            table: &table,
            key: &key,
            version: &version,
        };
        gateway.lock_rows(txn, &query, deadline)
    }

    fn begin(gateway: &InMemoryGateway) -> MemoryTransaction {
        gateway
            .begin_transaction(IsolationLevel::ReadCommitted, None)
            .unwrap()
    }

    #[test]
    fn matching_row_is_locked() {
        let gateway = seeded();
        let mut txn = begin(&gateway);

        let rows = lock(&gateway, &mut txn, "1", 5, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, VersionStamp::from(5u64));
        assert!(gateway.is_locked("account", "1"));
        assert_eq!(txn.locked_rows(), 1);

        gateway.commit(&mut txn).unwrap();
        assert!(!gateway.is_locked("account", "1"));
        assert_eq!(txn.state(), MemoryTransactionState::Committed);
    }

    #[test]
    fn stale_version_returns_no_rows_and_no_lock() {
        let gateway = seeded();
        let mut txn = begin(&gateway);

        let rows = lock(&gateway, &mut txn, "1", 4, None).unwrap();
        assert!(rows.is_empty());
        assert!(!gateway.is_locked("account", "1"));
    }

    #[test]
    fn missing_row_returns_no_rows() {
        let gateway = seeded();
        let mut txn = begin(&gateway);
        assert!(lock(&gateway, &mut txn, "404", 1, None).unwrap().is_empty());
    }

    #[test]
    fn unknown_table_is_rejected() {
        let gateway = InMemoryGateway::new();
        let mut txn = begin(&gateway);
        let result = lock(&gateway, &mut txn, "1", 1, None);
        assert!(matches!(result, Err(StorageError::UnknownTable { .. })));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let gateway = seeded();
        let result = gateway.insert("account", "1", 9u64);
        assert!(matches!(result, Err(StorageError::DuplicateKey { .. })));
        assert_eq!(gateway.row_count("Account"), 1);
    }

    #[test]
    fn relock_by_same_transaction_is_allowed() {
        let gateway = seeded();
        let mut txn = begin(&gateway);
        lock(&gateway, &mut txn, "1", 5, None).unwrap();
        let rows = lock(&gateway, &mut txn, "1", 5, Some(Instant::now())).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(txn.locked_rows(), 1);
    }

    #[test]
    fn contended_lock_times_out() {
        let gateway = seeded();
        let mut holder = begin(&gateway);
        lock(&gateway, &mut holder, "1", 5, None).unwrap();

        let mut waiter = begin(&gateway);
        let deadline = Instant::now() + Duration::from_millis(30);
        let result = lock(&gateway, &mut waiter, "1", 5, Some(deadline));
        assert!(matches!(result, Err(ref e) if e.is_timeout()));
    }

    #[test]
    fn waiter_sees_committed_version() {
        let gateway = seeded();
        let mut holder = begin(&gateway);
        lock(&gateway, &mut holder, "1", 5, None).unwrap();
        gateway
            .stage_version(&mut holder, "account", "1", 6u64)
            .unwrap();

        let waiter_gateway = gateway.clone();
        let waiter = thread::spawn(move || {
            let mut txn = begin(&waiter_gateway);
            lock(&waiter_gateway, &mut txn, "1", 5, None).unwrap().len()
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        gateway.commit(&mut holder).unwrap();

        assert_eq!(waiter.join().unwrap(), 0);
        assert_eq!(gateway.version_of("account", "1"), Some(VersionStamp::from(6u64)));
    }

    #[test]
    fn drop_rolls_back_staged_changes() {
        let gateway = seeded();
        {
            let mut txn = begin(&gateway);
            lock(&gateway, &mut txn, "1", 5, None).unwrap();
            gateway.stage_version(&mut txn, "account", "1", 6u64).unwrap();
            assert_eq!(gateway.open_transactions(), 1);
        }
        assert_eq!(gateway.open_transactions(), 0);
        assert_eq!(gateway.locked_row_count(), 0);
        assert_eq!(gateway.version_of("account", "1"), Some(VersionStamp::from(5u64)));
    }

    #[test]
    fn stage_requires_row_lock() {
        let gateway = seeded();
        let mut txn = begin(&gateway);
        let result = gateway.stage_version(&mut txn, "account", "1", 6u64);
        assert!(matches!(result, Err(StorageError::RowNotLocked { .. })));
    }

    #[test]
    fn cannot_commit_twice() {
        let gateway = seeded();
        let mut txn = begin(&gateway);
        gateway.commit(&mut txn).unwrap();
        assert!(matches!(
            gateway.commit(&mut txn),
            Err(StorageError::TransactionClosed)
        ));
    }

    #[test]
    fn unavailable_engine_fails_commit_and_keeps_transaction_open() {
        let gateway = seeded();
        let mut txn = begin(&gateway);
        gateway.set_available(false);
        assert!(matches!(
            gateway.commit(&mut txn),
            Err(StorageError::Connection(_))
        ));
        assert!(txn.is_active());
        assert!(gateway
            .begin_transaction(IsolationLevel::ReadCommitted, None)
            .is_err());
    }

    #[test]
    fn begin_after_deadline_times_out() {
        let gateway = seeded();
        let result =
            gateway.begin_transaction(IsolationLevel::Serializable, Some(Instant::now()));
        assert!(matches!(result, Err(ref e) if e.is_timeout()));
        assert_eq!(gateway.open_transactions(), 0);
    }

    #[test]
    fn update_version_waits_for_lock() {
        let gateway = seeded();
        let mut holder = begin(&gateway);
        lock(&gateway, &mut holder, "1", 5, None).unwrap();

        let writer_gateway = gateway.clone();
        let writer = thread::spawn(move || writer_gateway.update_version("account", "1", 9u64));

        thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());
        drop(holder);
        writer.join().unwrap().unwrap();
        assert_eq!(gateway.version_of("account", "1"), Some(VersionStamp::from(9u64)));
    }
}
