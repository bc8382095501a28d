//! # recordlock Testkit
//!
//! Test utilities for recordlock.
//!
//! This crate provides:
//! - Test fixtures with a seeded in-memory engine and coordinator
//! - A scripted gateway for injecting engine faults and odd row counts
//! - Property-based test generators using proptest
//! - Stress testing utilities for contended and uncontended locking
//!
//! ## Usage
//!
//! ```rust
//! use recordlock_testkit::prelude::*;
//!
//! with_test_bed(|bed| {
//!     let mut record = bed.fresh_record("1");
//!     bed.coordinator.acquire(&mut record).unwrap();
//!     bed.coordinator.release(None, &record, ()).result.unwrap();
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod scripted;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::scripted::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use scripted::*;
pub use stress::*;
