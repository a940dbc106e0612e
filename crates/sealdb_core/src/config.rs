//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether table and index files are encrypted at rest.
    ///
    /// When false the codec stores cleartext JSON; this exists only as
    /// a compatibility fallback.
    pub encrypt: bool,

    /// Whether to gzip file contents after encryption.
    pub compression: bool,

    /// Whether mutations are logged to the write-ahead log.
    ///
    /// When false, durability is weaker and recovery is a no-op.
    pub wal_enabled: bool,

    /// Whether each operation flushes the WAL before returning.
    pub sync_writes: bool,

    /// Bytes-equivalent WAL threshold that triggers an async checkpoint.
    pub max_wal_size: u64,

    /// Cadence of the background checkpoint task.
    pub checkpoint_interval: Duration,

    /// Maximum time a transaction waits on a table lock.
    pub lock_timeout: Duration,

    /// Base block size for WAL plaintext padding.
    pub wal_padding_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            encrypt: true,
            compression: false,
            wal_enabled: true,
            sync_writes: true,
            max_wal_size: 10 * 1024 * 1024, // 10 MB
            checkpoint_interval: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(10),
            wal_padding_size: 1024,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether files are encrypted at rest.
    #[must_use]
    pub const fn encrypt(mut self, value: bool) -> Self {
        self.encrypt = value;
        self
    }

    /// Sets whether file contents are gzipped.
    #[must_use]
    pub const fn compression(mut self, value: bool) -> Self {
        self.compression = value;
        self
    }

    /// Sets whether the write-ahead log is active.
    #[must_use]
    pub const fn wal_enabled(mut self, value: bool) -> Self {
        self.wal_enabled = value;
        self
    }

    /// Sets whether each operation flushes the WAL before returning.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the WAL size threshold for async checkpoints.
    #[must_use]
    pub const fn max_wal_size(mut self, bytes: u64) -> Self {
        self.max_wal_size = bytes;
        self
    }

    /// Sets the background checkpoint cadence.
    #[must_use]
    pub const fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Sets the lock wait deadline.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the WAL padding block size.
    #[must_use]
    pub const fn wal_padding_size(mut self, bytes: usize) -> Self {
        self.wal_padding_size = bytes;
        self
    }
}
