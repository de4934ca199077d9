//! Cache configuration

use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for `max_concurrent_downloads`.
pub const MAX_CONCURRENT_DOWNLOADS_LIMIT: usize = 8;

/// Configuration for the content cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one subdirectory per downloaded book.
    pub downloads_root: PathBuf,

    /// Maximum bytes on disk across all downloads (default: 10GB). `0`
    /// disables the capacity guard.
    pub max_cache_size_bytes: u64,

    /// Number of concurrent book downloads allowed (default: 2). Further
    /// requests queue.
    pub max_concurrent_downloads: usize,

    /// Timeout for a single asset transfer (default: 300s)
    pub download_timeout: Duration,

    /// Retries per asset after the first attempt (default: 3)
    pub max_retries: u32,

    /// Base delay of the exponential backoff between attempts (default: 100ms)
    pub retry_backoff: Duration,

    /// Verify sha256 checksums when the catalog reports one (default: true)
    pub verify_checksums: bool,
}

impl CacheConfig {
    /// Create a configuration rooted at `downloads_root` with default values.
    pub fn new(downloads_root: impl Into<PathBuf>) -> Self {
        Self {
            downloads_root: downloads_root.into(),
            max_cache_size_bytes: 10 * 1024 * 1024 * 1024,
            max_concurrent_downloads: 2,
            download_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            verify_checksums: true,
        }
    }

    /// Set maximum cache size.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    /// Set maximum concurrent downloads.
    pub fn with_max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    /// Set per-asset download timeout.
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_checksum_verification(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Whether the capacity guard is active.
    pub fn has_size_limit(&self) -> bool {
        self.max_cache_size_bytes > 0
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.downloads_root.as_os_str().is_empty() {
            return Err("downloads_root cannot be empty".to_string());
        }

        if self.max_concurrent_downloads == 0
            || self.max_concurrent_downloads > MAX_CONCURRENT_DOWNLOADS_LIMIT
        {
            return Err(format!(
                "max_concurrent_downloads must be between 1 and {}",
                MAX_CONCURRENT_DOWNLOADS_LIMIT
            ));
        }

        if self.download_timeout.is_zero() {
            return Err("download_timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Delay before retry `attempt` (1-based): `backoff * 2^(attempt-1)`.
    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}
