//! Scoped lock guard.

use crate::coordinator::LockCoordinator;
use crate::error::{LockError, LockResult};
use crate::record::Lockable;
use crate::token::LockToken;
use recordlock_storage::StorageGateway;
use std::ops::{Deref, DerefMut};

/// An acquired record lock that is released when dropped.
///
/// Created by [`LockCoordinator::lock`]. The guard dereferences to the
/// locked record. Release it explicitly with [`LockGuard::release`] or
/// [`LockGuard::finish`] to observe the commit outcome; a guard that is
/// simply dropped commits anyway and logs any failure.
pub struct LockGuard<'a, G: StorageGateway, R: Lockable + ?Sized> {
    coordinator: &'a LockCoordinator<G>,
    record: &'a mut R,
    token: LockToken,
    released: bool,
}

impl<'a, G: StorageGateway, R: Lockable + ?Sized> LockGuard<'a, G, R> {
    pub(crate) fn new(
        coordinator: &'a LockCoordinator<G>,
        record: &'a mut R,
        token: LockToken,
    ) -> Self {
        Self {
            coordinator,
            record,
            token,
            released: false,
        }
    }

    /// Returns the token the lock is registered under.
    #[must_use]
    pub fn token(&self) -> LockToken {
        self.token
    }

    /// Runs `f` with the transaction holding the row lock.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::LockNotFound`] if the lock was released behind
    /// the guard's back.
    pub fn with_transaction<U>(&self, f: impl FnOnce(&mut G::Transaction) -> U) -> LockResult<U> {
        self.coordinator.with_transaction(&self.token, f)
    }

    /// Releases the lock, reporting `prior_error` if the commit succeeds.
    ///
    /// # Errors
    ///
    /// Returns the commit failure, else `prior_error`.
    pub fn release(self, prior_error: Option<LockError>) -> LockResult<()> {
        self.finish(prior_error.map_or(Ok(()), Err))
    }

    /// Releases the lock and returns `outcome` if the commit succeeds.
    ///
    /// # Errors
    ///
    /// Returns the commit failure, else the error in `outcome`.
    pub fn finish<T>(mut self, outcome: LockResult<T>) -> LockResult<T> {
        self.released = true;
        self.coordinator.commit_token(Some(self.token))?;
        outcome
    }
}

impl<G: StorageGateway, R: Lockable + ?Sized> Deref for LockGuard<'_, G, R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.record
    }
}

impl<G: StorageGateway, R: Lockable + ?Sized> DerefMut for LockGuard<'_, G, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.record
    }
}

impl<G: StorageGateway, R: Lockable + ?Sized> Drop for LockGuard<'_, G, R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if std::thread::panicking() {
            tracing::warn!(token = %self.token, "releasing lock while unwinding");
        }
        if let Err(err) = self.coordinator.commit_token(Some(self.token)) {
            tracing::warn!(token = %self.token, error = %err, "release on drop failed");
        }
    }
}

impl<G: StorageGateway, R: Lockable + ?Sized> std::fmt::Debug for LockGuard<'_, G, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("token", &self.token)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
