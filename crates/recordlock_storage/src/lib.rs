//! # recordlock Storage
//!
//! Storage gateway trait and implementations for recordlock.
//!
//! This crate is the lowest layer of recordlock. A gateway knows how to open
//! a transaction, run a locking read against one record, and commit. It
//! knows nothing about lock tokens or registries; those live in
//! `recordlock_core`.
//!
//! ## Design Principles
//!
//! - One locking read checks existence and version in a single predicate
//! - Row locks live for the whole transaction
//! - Deadlines are reported as errors, never as panics
//! - Gateways must be `Send + Sync` for concurrent access
//!
//! ## Available Gateways
//!
//! - [`InMemoryGateway`] - For testing and simulation
//! - `PostgresGateway` - PostgreSQL through an r2d2 pool (feature `postgres`)

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod gateway;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod types;

pub use error::{StorageError, StorageResult};
pub use gateway::{IsolationLevel, StorageGateway};
pub use memory::{InMemoryGateway, MemoryTransaction, MemoryTransactionState};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresGateway, PostgresTransaction};
pub use types::{LockQuery, LockedRow, RecordKey, TableName, VersionStamp};
