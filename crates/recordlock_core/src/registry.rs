//! Transaction registry.

use crate::error::{LockError, LockResult};
use crate::token::LockToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared slot holding one open transaction.
pub type TransactionSlot<T> = Arc<Mutex<T>>;

/// Maps lock tokens to the open transactions that hold their row locks.
///
/// The registry bridges `acquire`, which opens a transaction, and a later
/// `release`, which must find and commit it. Each coordinator owns one.
///
/// Entries are wrapped in their own mutex so that a transaction can be used
/// (by the locking read) without holding the map lock, and so that a
/// `release` racing an in-flight read waits for the read to finish.
pub struct TransactionRegistry<T> {
    entries: Mutex<HashMap<LockToken, TransactionSlot<T>>>,
}

impl<T> TransactionRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an open transaction under `token`.
    ///
    /// Returns the shared slot now owned by the registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::DuplicateToken`] if the token is already
    /// registered; the existing entry is left untouched.
    pub fn insert(&self, token: LockToken, txn: T) -> LockResult<TransactionSlot<T>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&token) {
            return Err(LockError::DuplicateToken { token });
        }
        let slot = Arc::new(Mutex::new(txn));
        entries.insert(token, Arc::clone(&slot));
        Ok(slot)
    }

    /// Returns the slot registered under `token`.
    #[must_use]
    pub fn get(&self, token: &LockToken) -> Option<TransactionSlot<T>> {
        self.entries.lock().get(token).cloned()
    }

    /// Removes and returns the slot registered under `token`.
    pub fn remove(&self, token: &LockToken) -> Option<TransactionSlot<T>> {
        self.entries.lock().remove(token)
    }

    /// Checks if `token` is registered.
    #[must_use]
    pub fn contains(&self, token: &LockToken) -> bool {
        self.entries.lock().contains_key(token)
    }

    /// Returns the number of registered transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Checks if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns a snapshot of the registered tokens.
    #[must_use]
    pub fn tokens(&self) -> Vec<LockToken> {
        self.entries.lock().keys().copied().collect()
    }
}

impl<T> Default for TransactionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TransactionRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn insert_get_remove() {
        let registry = TransactionRegistry::new();
        let token = LockToken::new();

        registry.insert(token, 7u32).unwrap();
        assert!(registry.contains(&token));
        assert_eq!(*registry.get(&token).unwrap().lock(), 7);

        let slot = registry.remove(&token).unwrap();
        assert_eq!(*slot.lock(), 7);
        assert!(registry.is_empty());
        assert!(registry.remove(&token).is_none());
    }

    #[test]
    fn duplicate_token_is_rejected() {
        let registry = TransactionRegistry::new();
        let token = LockToken::new();
        registry.insert(token, 1u32).unwrap();

        let result = registry.insert(token, 2u32);
        assert!(matches!(result, Err(LockError::DuplicateToken { .. })));
        assert_eq!(*registry.get(&token).unwrap().lock(), 1);
    }

    #[test]
    fn slot_is_shared_with_entry() {
        let registry = TransactionRegistry::new();
        let token = LockToken::new();
        let slot = registry.insert(token, 0u32).unwrap();

        *slot.lock() += 1;
        assert_eq!(*registry.get(&token).unwrap().lock(), 1);
    }

    #[test]
    fn concurrent_inserts_and_removes() {
        let registry = Arc::new(TransactionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for j in 0..100u32 {
                        let token = LockToken::new();
                        registry.insert(token, i * 1000 + j).unwrap();
                        assert!(registry.remove(&token).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn tokens_snapshot() {
        let registry = TransactionRegistry::new();
        let a = LockToken::new();
        let b = LockToken::new();
        registry.insert(a, ()).unwrap();
        registry.insert(b, ()).unwrap();

        let mut tokens = registry.tokens();
        tokens.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(tokens, expected);
        assert_eq!(registry.len(), 2);
    }
}
