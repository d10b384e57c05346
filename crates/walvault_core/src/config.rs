//! Server configuration.

use crate::retention::{RetentionPolicy, WalRetentionMode};
use crate::types::DEFAULT_WAL_SEGMENT_SIZE;
use std::time::Duration;

/// Configuration for opening a backup server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the server directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Size of one WAL segment, fixed for the server's lifetime.
    pub wal_segment_size: u64,

    /// How long a mutation waits for the catalog lock before giving
    /// up with `LockTimeout`.
    pub lock_timeout: Duration,

    /// Retention policy applied by `run_retention`, if any.
    pub retention_policy: Option<RetentionPolicy>,

    /// How aggressively WAL beyond backup chains is reclaimed.
    pub wal_retention_mode: WalRetentionMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            wal_segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            lock_timeout: Duration::from_secs(30),
            retention_policy: None,
            wal_retention_mode: WalRetentionMode::Main,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the server directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the WAL segment size.
    #[must_use]
    pub const fn wal_segment_size(mut self, size: u64) -> Self {
        self.wal_segment_size = size;
        self
    }

    /// Sets the catalog lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub const fn retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.retention_policy = Some(policy);
        self
    }

    /// Sets the WAL retention mode.
    #[must_use]
    pub const fn wal_retention_mode(mut self, mode: WalRetentionMode) -> Self {
        self.wal_retention_mode = mode;
        self
    }
}
