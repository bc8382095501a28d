//! Test fixtures and coordinator helpers.
//!
//! Provides convenience functions for setting up a seeded in-memory engine
//! with a coordinator on top.

use recordlock_core::{LockConfig, LockCoordinator, LockRecord};
use recordlock_storage::{InMemoryGateway, VersionStamp};
use std::sync::Arc;
use std::time::Duration;

/// Table created by [`TestBed::new`].
pub const TEST_TABLE: &str = "account";

/// Version every seeded row starts at.
pub const INITIAL_VERSION: u64 = 1;

/// An in-memory engine with a coordinator on top.
pub struct TestBed {
    /// The shared engine.
    pub gateway: Arc<InMemoryGateway>,
    /// A coordinator over `gateway`.
    pub coordinator: LockCoordinator<InMemoryGateway>,
}

impl TestBed {
    /// Creates a test bed with an empty [`TEST_TABLE`] and a 5 second lock
    /// timeout.
    pub fn new() -> Self {
        Self::with_config(LockConfig::new().lock_timeout(Duration::from_secs(5)))
    }

    /// Creates a test bed with the given coordinator configuration.
    pub fn with_config(config: LockConfig) -> Self {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.create_table(TEST_TABLE);
        let coordinator = LockCoordinator::new(Arc::clone(&gateway), config);
        Self {
            gateway,
            coordinator,
        }
    }

    /// Creates a test bed whose table holds keys `"0".."count"` at
    /// [`INITIAL_VERSION`].
    pub fn seeded(count: usize) -> Self {
        let bed = Self::new();
        for key in 0..count {
            bed.insert(&key.to_string(), INITIAL_VERSION);
        }
        bed
    }

    /// Inserts a row into [`TEST_TABLE`].
    pub fn insert(&self, key: &str, version: u64) {
        self.gateway
            .insert(TEST_TABLE, key, version)
            .expect("Failed to insert row");
    }

    /// Builds a record carrying the row's current committed version.
    pub fn fresh_record(&self, key: &str) -> LockRecord {
        let version = self.current_version(key).expect("Row should exist");
        LockRecord::new(TEST_TABLE, key, version)
    }

    /// Builds a record with an explicit (possibly stale) version.
    pub fn record(&self, key: &str, version: u64) -> LockRecord {
        LockRecord::new(TEST_TABLE, key, version)
    }

    /// Returns the committed version of a row.
    pub fn current_version(&self, key: &str) -> Option<VersionStamp> {
        self.gateway.version_of(TEST_TABLE, key)
    }

    /// Creates a second coordinator sharing this engine.
    pub fn peer(&self, config: LockConfig) -> LockCoordinator<InMemoryGateway> {
        LockCoordinator::new(Arc::clone(&self.gateway), config)
    }

    /// Checks that no lock, row lock or transaction is left behind.
    pub fn is_quiescent(&self) -> bool {
        self.coordinator.active_locks() == 0
            && self.gateway.locked_row_count() == 0
            && self.gateway.open_transactions() == 0
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestBed {
    type Target = LockCoordinator<InMemoryGateway>;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// Runs a test with a test bed seeded with keys `"0"` to `"9"`.
///
/// # Example
///
/// ```rust
/// use recordlock_testkit::with_test_bed;
///
/// with_test_bed(|bed| {
///     assert_eq!(bed.gateway.row_count("account"), 10);
/// });
/// ```
pub fn with_test_bed<F, R>(f: F) -> R
where
    F: FnOnce(&TestBed) -> R,
{
    let bed = TestBed::seeded(10);
    f(&bed)
}
