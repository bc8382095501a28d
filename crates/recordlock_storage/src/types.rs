//! Record identity types shared by gateways and the coordinator.

use std::fmt;

/// Name of a table (or collection) holding lockable records.
///
/// Names are normalized to lower case so that a model called `Account`
/// resolves to the `account` table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName(String);

impl TableName {
    /// Creates a table name, lowering its case.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().to_lowercase())
    }

    /// Returns the normalized name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TableName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Primary key of a record, in its textual form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    /// Creates a record key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for RecordKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<u64> for RecordKey {
    fn from(key: u64) -> Self {
        Self(key.to_string())
    }
}

/// Opaque version stamp used for optimistic concurrency checks.
///
/// Stamps are compared by their textual form. Counter-style stamps can be
/// built from integers and advanced with [`VersionStamp::next`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionStamp(String);

impl VersionStamp {
    /// Creates a version stamp.
    #[must_use]
    pub fn new(stamp: impl Into<String>) -> Self {
        Self(stamp.into())
    }

    /// Returns the stamp as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the stamp is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the numeric value for counter stamps.
    #[must_use]
    pub fn as_counter(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// Returns the following counter stamp, or `None` for non-numeric stamps.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        self.as_counter()
            .and_then(|n| n.checked_add(1))
            .map(Self::from)
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for VersionStamp {
    fn from(counter: u64) -> Self {
        Self(counter.to_string())
    }
}

impl From<&str> for VersionStamp {
    fn from(stamp: &str) -> Self {
        Self::new(stamp)
    }
}

impl From<String> for VersionStamp {
    fn from(stamp: String) -> Self {
        Self(stamp)
    }
}

/// Predicate for a locking read: one key, one expected version.
#[derive(Debug, Clone, Copy)]
pub struct LockQuery<'a> {
    /// Table to read from.
    pub table: &'a TableName,
    /// Primary key to match.
    pub key: &'a RecordKey,
    /// Version stamp the row must currently carry.
    pub version: &'a VersionStamp,
}

/// A row returned (and locked) by a locking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedRow {
    /// Primary key of the row.
    pub key: RecordKey,
    /// Version stamp stored in the row.
    pub version: VersionStamp,
}
