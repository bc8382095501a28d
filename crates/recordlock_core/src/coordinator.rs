//! Lock coordinator.

use crate::config::LockConfig;
use crate::error::{LockError, LockResult};
use crate::guard::LockGuard;
use crate::record::Lockable;
use crate::registry::TransactionRegistry;
use crate::token::LockToken;
use recordlock_storage::{LockQuery, StorageGateway};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of [`LockCoordinator::release`].
///
/// The passthrough value is handed back whatever happened to the commit.
#[derive(Debug)]
#[must_use]
pub struct Released<T> {
    /// Commit outcome, or the caller's prior error if the commit succeeded.
    pub result: LockResult<()>,
    /// The value the caller asked to have forwarded.
    pub passthrough: T,
}

impl<T> Released<T> {
    /// Returns the passthrough value if the release succeeded.
    ///
    /// # Errors
    ///
    /// Returns the release error, dropping the passthrough value.
    pub fn into_result(self) -> LockResult<T> {
        self.result.map(|()| self.passthrough)
    }

    /// Splits into the release outcome and the passthrough value.
    pub fn into_parts(self) -> (LockResult<()>, T) {
        (self.result, self.passthrough)
    }
}

/// Grants exclusive locks on individual records.
///
/// A lock is a storage transaction that has taken a row lock on the record
/// while checking, in the same predicate, that the record still carries the
/// version stamp the caller read. The transaction stays open between
/// `acquire` and `release`; the coordinator's registry keeps it reachable
/// through the record's lock token in the meantime.
///
/// ## Pairing
///
/// Every `acquire` that assigned a token must be followed by a `release`
/// with that record, whether the acquire succeeded or not. Prefer
/// [`LockCoordinator::lock`] or [`LockCoordinator::with_lock`], which
/// release on every exit path.
///
/// ## Example
///
/// ```rust
/// use recordlock_core::{LockConfig, LockCoordinator, LockRecord};
/// use recordlock_storage::InMemoryGateway;
/// use std::sync::Arc;
///
/// let gateway = Arc::new(InMemoryGateway::new());
/// gateway.create_table("account");
/// gateway.insert("account", "42", 5u64).unwrap();
///
/// let coordinator = LockCoordinator::new(gateway, LockConfig::default());
/// let mut record = LockRecord::new("account", "42", 5u64);
///
/// coordinator.acquire(&mut record).unwrap();
/// let released = coordinator.release(None, &record, "payload");
/// assert_eq!(released.into_result().unwrap(), "payload");
/// ```
pub struct LockCoordinator<G: StorageGateway> {
    gateway: Arc<G>,
    registry: TransactionRegistry<G::Transaction>,
    config: LockConfig,
}

impl<G: StorageGateway> LockCoordinator<G> {
    /// Creates a coordinator with an empty registry.
    pub fn new(gateway: Arc<G>, config: LockConfig) -> Self {
        Self {
            gateway,
            registry: TransactionRegistry::new(),
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Returns the storage gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Returns the number of locks awaiting release.
    #[must_use]
    pub fn active_locks(&self) -> usize {
        self.registry.len()
    }

    /// Checks if `token` refers to a lock awaiting release.
    #[must_use]
    pub fn is_locked(&self, token: &LockToken) -> bool {
        self.registry.contains(token)
    }

    /// Acquires an exclusive lock on `record`.
    ///
    /// Opens a transaction, attaches a fresh token to the record, registers
    /// the transaction under that token, and runs a locking read matching
    /// both the primary key and the expected version.
    ///
    /// # Errors
    ///
    /// - [`LockError::InvalidRecord`] if the record's identity is incomplete
    /// - [`LockError::LockConflict`] if no row matched (missing record or
    ///   stale version)
    /// - [`LockError::SchemaInvariantViolation`] if several rows matched
    /// - [`LockError::Storage`] for engine failures, including timeouts
    ///
    /// If the record carries a new token after an error, the transaction is
    /// still registered and must be released.
    pub fn acquire<R: Lockable + ?Sized>(&self, record: &mut R) -> LockResult<()> {
        self.acquire_inner(record).1
    }

    /// Acquires a lock and returns the token it was registered under, if any,
    /// alongside the outcome.
    fn acquire_inner<R: Lockable + ?Sized>(
        &self,
        record: &mut R,
    ) -> (Option<LockToken>, LockResult<()>) {
        if let Err(err) = record.validate() {
            return (None, Err(err));
        }

        let deadline = self.config.deadline_from(Instant::now());

        let txn = match self.gateway.begin_transaction(self.config.isolation, deadline) {
            Ok(txn) => txn,
            Err(err) => {
                tracing::warn!(
                    table = %record.table(),
                    key = %record.key(),
                    error = %err,
                    "could not start lock transaction"
                );
                return (None, Err(err.into()));
            }
        };

        let token = LockToken::new();
        record.set_lock_token(Some(token));

        let slot = match self.registry.insert(token, txn) {
            Ok(slot) => slot,
            Err(err) => {
                // The token belongs to another lock; never let this record point at it.
                record.set_lock_token(None);
                return (None, Err(err));
            }
        };

        let query = LockQuery {
            table: record.table(),
            key: record.key(),
            version: record.version(),
        };
        let rows = {
            let mut txn = slot.lock();
            self.gateway.lock_rows(&mut txn, &query, deadline)
        };

        let rows = match rows {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(
                    table = %query.table,
                    key = %query.key,
                    %token,
                    error = %err,
                    "locking read failed"
                );
                return (Some(token), Err(err.into()));
            }
        };

        let result = match rows.len() {
            1 => {
                tracing::debug!(
                    table = %query.table,
                    key = %query.key,
                    version = %query.version,
                    %token,
                    "lock acquired"
                );
                Ok(())
            }
            0 => {
                tracing::warn!(
                    table = %query.table,
                    key = %query.key,
                    version = %query.version,
                    "no row with expected version"
                );
                Err(LockError::lock_conflict(
                    query.table.as_str(),
                    query.key.as_str(),
                    query.version.as_str(),
                ))
            }
            n => {
                tracing::error!(
                    table = %query.table,
                    key = %query.key,
                    rows = n,
                    "primary key is not unique"
                );
                Err(LockError::SchemaInvariantViolation {
                    table: query.table.to_string(),
                    key: query.key.to_string(),
                    rows: n,
                })
            }
        };
        (Some(token), result)
    }

    /// Releases the lock held through `record`'s token.
    ///
    /// Removes the registry entry and commits its transaction. The entry is
    /// gone afterwards whether or not the commit succeeded, so a second
    /// release with the same token reports [`LockError::LockNotFound`].
    ///
    /// The result is, in order of precedence:
    /// - [`LockError::LockNotFound`] if the token is not registered
    /// - [`LockError::CommitFailure`] if the commit failed
    /// - `prior_error`, the caller's failure inside the locked section
    /// - `Ok(())`
    ///
    /// `passthrough` is returned unchanged in every case.
    pub fn release<R: Lockable + ?Sized, T>(
        &self,
        prior_error: Option<LockError>,
        record: &R,
        passthrough: T,
    ) -> Released<T> {
        let result = self
            .commit_token(record.lock_token())
            .and_then(|()| prior_error.map_or(Ok(()), Err));
        Released {
            result,
            passthrough,
        }
    }

    /// Removes `token` from the registry and commits its transaction.
    pub(crate) fn commit_token(&self, token: Option<LockToken>) -> LockResult<()> {
        let token = token.ok_or(LockError::LockNotFound { token: None })?;
        let slot = self
            .registry
            .remove(&token)
            .ok_or(LockError::LockNotFound { token: Some(token) })?;

        let committed = {
            let mut txn = slot.lock();
            self.gateway.commit(&mut txn)
        };

        match committed {
            Ok(()) => {
                tracing::debug!(%token, "lock released");
                Ok(())
            }
            Err(source) => {
                tracing::warn!(%token, error = %source, "commit of lock transaction failed");
                Err(LockError::CommitFailure { token, source })
            }
        }
    }

    /// Acquires a lock on `record` and returns a guard that releases it.
    ///
    /// If the acquisition fails after a token was assigned, the registered
    /// transaction is released before the acquisition error is returned.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`LockCoordinator::acquire`].
    pub fn lock<'a, R: Lockable + ?Sized>(
        &'a self,
        record: &'a mut R,
    ) -> LockResult<LockGuard<'a, G, R>> {
        match self.acquire_inner(record) {
            (Some(token), Ok(())) => Ok(LockGuard::new(self, record, token)),
            (token, Err(err)) => {
                if token.is_some() {
                    if let Err(cleanup) = self.commit_token(token) {
                        tracing::warn!(error = %cleanup, "cleanup after failed acquire failed");
                    }
                }
                Err(err)
            }
            (None, Ok(())) => Err(LockError::LockNotFound { token: None }),
        }
    }

    /// Runs `f` while holding a lock on `record`.
    ///
    /// The lock is released on every exit path. A failure of `f` is reported
    /// as [`LockError::CriticalSection`] unless the commit itself failed.
    ///
    /// # Errors
    ///
    /// Returns acquisition errors, commit failures, or the wrapped error of
    /// `f`.
    pub fn with_lock<R, T, E, F>(&self, record: &mut R, f: F) -> LockResult<T>
    where
        R: Lockable + ?Sized,
        F: FnOnce(&mut R) -> Result<T, E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut guard = self.lock(record)?;
        let outcome = f(&mut *guard).map_err(LockError::critical_section);
        guard.finish(outcome)
    }

    /// Runs `f` with the open transaction registered under `token`.
    ///
    /// Use this to do work inside the locked transaction. `f` must not
    /// commit or otherwise close the transaction; `release` does that.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::LockNotFound`] if the token is not registered.
    pub fn with_transaction<U>(
        &self,
        token: &LockToken,
        f: impl FnOnce(&mut G::Transaction) -> U,
    ) -> LockResult<U> {
        let slot = self
            .registry
            .get(token)
            .ok_or(LockError::LockNotFound {
                token: Some(*token),
            })?;
        let mut txn = slot.lock();
        Ok(f(&mut txn))
    }
}

impl<G: StorageGateway> std::fmt::Debug for LockCoordinator<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("config", &self.config)
            .field("active_locks", &self.active_locks())
            .finish_non_exhaustive()
    }
}
