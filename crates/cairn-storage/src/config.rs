use std::path::PathBuf;
use std::time::Duration;

/// Typed configuration for [`crate::FsStorage`] (§10.4): storage root and
/// the lock-contention retry budget, mirroring the chainable-builder shape
/// `cairn-uplink`'s `UplinkConfig` uses.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// Number of `try_lock_exclusive` attempts before surfacing contention
    /// as [`crate::StorageError::ResourceUnavailable`] (§4.3).
    pub lock_retries: u32,
    pub lock_retry_delay: Duration,
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StorageConfig {
            root: root.into(),
            lock_retries: 20,
            lock_retry_delay: Duration::from_millis(25),
        }
    }

    pub fn lock_retries(mut self, lock_retries: u32) -> Self {
        self.lock_retries = lock_retries;
        self
    }

    pub fn lock_retry_delay(mut self, lock_retry_delay: Duration) -> Self {
        self.lock_retry_delay = lock_retry_delay;
        self
    }
}
