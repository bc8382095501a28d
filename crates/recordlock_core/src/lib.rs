//! # recordlock Core
//!
//! Record-level lock coordinator for recordlock.
//!
//! This crate provides:
//! - [`LockCoordinator`] for acquiring and releasing exclusive record locks
//! - Version checking in the same locking read that takes the row lock
//! - A registry of open lock transactions keyed by [`LockToken`]
//! - Scoped acquisition through [`LockGuard`] and [`LockCoordinator::with_lock`]
//!
//! A lock is granted only if the record still carries the version stamp the
//! caller read. Two callers that read the same version cannot both succeed:
//! the second blocks on the row lock and then, once the first has committed
//! a new version, finds no matching row.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod guard;
mod record;
mod registry;
mod token;

pub use config::LockConfig;
pub use coordinator::{LockCoordinator, Released};
pub use error::{LockError, LockResult};
pub use guard::LockGuard;
pub use record::{LockRecord, Lockable};
pub use registry::{TransactionRegistry, TransactionSlot};
pub use token::LockToken;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use recordlock_storage::{
    InMemoryGateway, IsolationLevel, RecordKey, StorageError, StorageGateway, TableName,
    VersionStamp,
};
#[cfg(feature = "postgres")]
pub use recordlock_storage::{PostgresConfig, PostgresGateway};
