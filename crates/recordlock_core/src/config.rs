//! Coordinator configuration.

use recordlock_storage::IsolationLevel;
use std::time::{Duration, Instant};

/// Configuration for a [`crate::LockCoordinator`].
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Isolation level of lock transactions.
    pub isolation: IsolationLevel,

    /// Bound on opening the transaction plus the locking read
    /// (`None` = wait indefinitely).
    pub lock_timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            lock_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl LockConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration from environment variables, falling back to
    /// defaults for unset or unparsable values.
    ///
    /// # Environment Variables
    /// - `RECORDLOCK_ISOLATION` - `read_committed`, `repeatable_read` or `serializable`
    /// - `RECORDLOCK_LOCK_TIMEOUT_MS` - lock timeout in milliseconds (`0` disables it)
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(isolation) = std::env::var("RECORDLOCK_ISOLATION")
            .ok()
            .and_then(|v| IsolationLevel::parse(&v))
        {
            config.isolation = isolation;
        }

        if let Some(ms) = std::env::var("RECORDLOCK_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.lock_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config
    }

    /// Sets the isolation level.
    #[must_use]
    pub const fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Disables the lock timeout.
    #[must_use]
    pub const fn without_timeout(mut self) -> Self {
        self.lock_timeout = None;
        self
    }

    /// Returns the deadline for an acquisition starting at `start`.
    #[must_use]
    pub fn deadline_from(&self, start: Instant) -> Option<Instant> {
        self.lock_timeout.map(|timeout| start + timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LockConfig::default();
        assert_eq!(config.isolation, IsolationLevel::ReadCommitted);
        assert_eq!(config.lock_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn builder_pattern() {
        let config = LockConfig::new()
            .isolation(IsolationLevel::Serializable)
            .lock_timeout(Duration::from_millis(250));

        assert_eq!(config.isolation, IsolationLevel::Serializable);
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(250)));
        assert!(config.without_timeout().lock_timeout.is_none());
    }

    #[test]
    fn deadline_tracks_timeout() {
        let start = Instant::now();
        let config = LockConfig::new().lock_timeout(Duration::from_secs(1));
        assert_eq!(config.deadline_from(start), Some(start + Duration::from_secs(1)));
        assert!(config.without_timeout().deadline_from(start).is_none());
    }
}
