//! Lockable records.

use crate::error::{LockError, LockResult};
use crate::token::LockToken;
use recordlock_storage::{RecordKey, TableName, VersionStamp};

/// A record that can be locked by a [`crate::LockCoordinator`].
///
/// Implementors expose the record's identity and a slot where the
/// coordinator stores the lock token minted by `acquire`.
pub trait Lockable {
    /// Table holding the record.
    fn table(&self) -> &TableName;

    /// Primary key of the record.
    fn key(&self) -> &RecordKey;

    /// Version stamp the caller last read.
    fn version(&self) -> &VersionStamp;

    /// Token of the most recent lock attempt, if any.
    fn lock_token(&self) -> Option<LockToken>;

    /// Stores the token of a lock attempt.
    fn set_lock_token(&mut self, token: Option<LockToken>);

    /// Checks that the record can be locked at all.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidRecord`] if the table, key or version is
    /// empty.
    fn validate(&self) -> LockResult<()> {
        if self.table().is_empty() {
            return Err(LockError::invalid_record("table name is empty"));
        }
        if self.key().is_empty() {
            return Err(LockError::invalid_record("primary key is empty"));
        }
        if self.version().is_empty() {
            return Err(LockError::invalid_record("version stamp is empty"));
        }
        Ok(())
    }
}

/// Plain lockable record reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    table: TableName,
    key: RecordKey,
    version: VersionStamp,
    token: Option<LockToken>,
}

impl LockRecord {
    /// Creates a record reference without a lock token.
    #[must_use]
    pub fn new(
        table: impl Into<TableName>,
        key: impl Into<RecordKey>,
        version: impl Into<VersionStamp>,
    ) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            version: version.into(),
            token: None,
        }
    }

    /// Replaces the expected version, e.g. after re-reading the record.
    pub fn set_version(&mut self, version: impl Into<VersionStamp>) {
        self.version = version.into();
    }
}

impl Lockable for LockRecord {
    fn table(&self) -> &TableName {
        &self.table
    }

    fn key(&self) -> &RecordKey {
        &self.key
    }

    fn version(&self) -> &VersionStamp {
        &self.version
    }

    fn lock_token(&self) -> Option<LockToken> {
        self.token
    }

    fn set_lock_token(&mut self, token: Option<LockToken>) {
        self.token = token;
    }
}
