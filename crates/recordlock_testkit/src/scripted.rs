//! Scripted storage gateway.
//!
//! A gateway whose answers are set by the test: how many rows a locking read
//! returns, and which engine error the next begin, locking read or commit
//! fails with. It keeps no rows and takes no locks; use it to drive the
//! coordinator through paths a well-behaved engine never takes.

use parking_lot::Mutex;
use recordlock_storage::{
    IsolationLevel, LockQuery, LockedRow, StorageError, StorageGateway, StorageResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
struct Counters {
    begun: AtomicUsize,
    reads: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

/// Transaction handed out by a [`ScriptedGateway`].
#[derive(Debug)]
pub struct ScriptedTransaction {
    id: usize,
    open: bool,
    counters: Arc<Counters>,
}

impl ScriptedTransaction {
    /// Returns the sequence number of the transaction.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Checks if the transaction is still open.
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for ScriptedTransaction {
    fn drop(&mut self) {
        if self.open {
            self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A gateway for fault injection.
#[derive(Debug)]
pub struct ScriptedGateway {
    rows: AtomicUsize,
    begin_error: Mutex<Option<StorageError>>,
    lock_error: Mutex<Option<StorageError>>,
    commit_error: Mutex<Option<StorageError>>,
    counters: Arc<Counters>,
}

impl ScriptedGateway {
    /// Creates a gateway whose locking reads return one row.
    pub fn new() -> Self {
        Self {
            rows: AtomicUsize::new(1),
            begin_error: Mutex::new(None),
            lock_error: Mutex::new(None),
            commit_error: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Sets the number of rows every locking read returns.
    pub fn set_row_count(&self, rows: usize) {
        self.rows.store(rows, Ordering::SeqCst);
    }

    /// Makes the next `begin_transaction` fail with `err`.
    pub fn fail_next_begin(&self, err: StorageError) {
        *self.begin_error.lock() = Some(err);
    }

    /// Makes the next `lock_rows` fail with `err`.
    pub fn fail_next_lock(&self, err: StorageError) {
        *self.lock_error.lock() = Some(err);
    }

    /// Makes the next `commit` fail with `err`.
    pub fn fail_next_commit(&self, err: StorageError) {
        *self.commit_error.lock() = Some(err);
    }

    /// Returns the number of transactions begun.
    pub fn begun(&self) -> usize {
        self.counters.begun.load(Ordering::SeqCst)
    }

    /// Returns the number of locking reads run.
    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    /// Returns the number of successful commits.
    pub fn committed(&self) -> usize {
        self.counters.committed.load(Ordering::SeqCst)
    }

    /// Returns the number of transactions dropped without commit.
    pub fn rolled_back(&self) -> usize {
        self.counters.rolled_back.load(Ordering::SeqCst)
    }

    /// Returns the number of transactions neither committed nor rolled back.
    pub fn open(&self) -> usize {
        self.begun() - self.committed() - self.rolled_back()
    }
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageGateway for ScriptedGateway {
    type Transaction = ScriptedTransaction;

    fn begin_transaction(
        &self,
        _isolation: IsolationLevel,
        _deadline: Option<Instant>,
    ) -> StorageResult<ScriptedTransaction> {
        if let Some(err) = self.begin_error.lock().take() {
            return Err(err);
        }
        let id = self.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedTransaction {
            id,
            open: true,
            counters: Arc::clone(&self.counters),
        })
    }

    fn lock_rows(
        &self,
        txn: &mut ScriptedTransaction,
        query: &LockQuery<'_>,
        _deadline: Option<Instant>,
    ) -> StorageResult<Vec<LockedRow>> {
        if !txn.open {
            return Err(StorageError::TransactionClosed);
        }
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.lock_error.lock().take() {
            return Err(err);
        }
        let rows = self.rows.load(Ordering::SeqCst);
        Ok((0..rows)
            .map(|_| LockedRow {
                key: query.key.clone(),
                version: query.version.clone(),
            })
            .collect())
    }

    fn commit(&self, txn: &mut ScriptedTransaction) -> StorageResult<()> {
        if !txn.open {
            return Err(StorageError::TransactionClosed);
        }
        if let Some(err) = self.commit_error.lock().take() {
            return Err(err);
        }
        txn.open = false;
        self.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
