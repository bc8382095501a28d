//! Property-based test generators using proptest.
//!
//! Provides strategies for record identities and for sequences of lock
//! operations over a small key space.

use proptest::prelude::*;
use recordlock_storage::{RecordKey, TableName, VersionStamp};

/// Strategy for generating valid table names.
pub fn table_name_strategy() -> impl Strategy<Value = TableName> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}")
        .expect("Invalid regex")
        .prop_map(TableName::new)
}

/// Strategy for generating non-empty primary keys.
pub fn record_key_strategy() -> impl Strategy<Value = RecordKey> {
    prop::string::string_regex("[0-9a-z-]{1,24}")
        .expect("Invalid regex")
        .prop_map(RecordKey::new)
}

/// Strategy for generating counter version stamps.
pub fn version_strategy() -> impl Strategy<Value = VersionStamp> {
    (1u64..1_000_000).prop_map(VersionStamp::from)
}

/// A lock operation against one of a fixed set of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOp {
    /// Acquire a lock on a key.
    Acquire {
        /// Index of the key.
        key: usize,
        /// Present a version that is one behind the committed one.
        stale: bool,
    },
    /// Release whatever lock is held on a key.
    Release {
        /// Index of the key.
        key: usize,
    },
}

impl LockOp {
    /// Returns the key index the operation targets.
    pub fn key(&self) -> usize {
        match self {
            Self::Acquire { key, .. } | Self::Release { key } => *key,
        }
    }
}

/// Strategy for generating lock operations over `key_count` keys.
pub fn lock_op_strategy(key_count: usize) -> impl Strategy<Value = LockOp> {
    prop_oneof![
        3 => (0..key_count, prop::bool::weighted(0.25))
            .prop_map(|(key, stale)| LockOp::Acquire { key, stale }),
        2 => (0..key_count).prop_map(|key| LockOp::Release { key }),
    ]
}

/// Strategy for generating a sequence of lock operations.
pub fn lock_op_sequence_strategy(
    key_count: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<LockOp>> {
    prop::collection::vec(lock_op_strategy(key_count), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
