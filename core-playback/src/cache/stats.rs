//! Cache statistics and download progress

use serde::{Deserialize, Serialize};

/// Statistics about the content cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Books with a verified completion record
    pub downloaded_books: usize,

    /// Books queued or transferring
    pub active_downloads: usize,

    /// Bytes on disk under the downloads root
    pub total_bytes: u64,

    /// Configured limit, `0` when unlimited
    pub max_bytes: u64,
}

impl CacheStats {
    /// Cache usage as a percentage of the configured limit.
    pub fn usage_percentage(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / self.max_bytes as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    /// Bytes still available under the limit, `u64::MAX` when unlimited.
    pub fn available_bytes(&self) -> u64 {
        if self.max_bytes == 0 {
            u64::MAX
        } else {
            self.max_bytes.saturating_sub(self.total_bytes)
        }
    }

    /// Returns average bytes per downloaded book.
    pub fn average_book_size(&self) -> u64 {
        if self.downloaded_books == 0 {
            0
        } else {
            self.total_bytes / self.downloaded_books as u64
        }
    }
}

/// State of one book download, published on the handle's watch channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    /// Waiting for a transfer slot.
    Queued,
    /// Fraction of assets transferred, `0.0..=1.0`.
    Downloading(f64),
    Completed { total_bytes: u64 },
    Failed(String),
}

impl DownloadState {
    pub fn progress(&self) -> f64 {
        match self {
            DownloadState::Queued | DownloadState::Failed(_) => 0.0,
            DownloadState::Downloading(progress) => progress.clamp(0.0, 1.0),
            DownloadState::Completed { .. } => 1.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed { .. } | DownloadState::Failed(_)
        )
    }
}

/// Percentage (0-100) for progress events.
pub(crate) fn percent(progress: f64) -> u8 {
    (progress.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percentage() {
        let stats = CacheStats {
            downloaded_books: 2,
            active_downloads: 0,
            total_bytes: 950,
            max_bytes: 1000,
        };
        assert_eq!(stats.usage_percentage(), 95.0);
        assert!(stats.is_near_capacity());
        assert_eq!(stats.available_bytes(), 50);
        assert_eq!(stats.average_book_size(), 475);
    }

    #[test]
    fn unlimited_cache_never_fills() {
        let stats = CacheStats {
            total_bytes: 1 << 40,
            ..Default::default()
        };
        assert_eq!(stats.usage_percentage(), 0.0);
        assert_eq!(stats.available_bytes(), u64::MAX);
    }

    #[test]
    fn download_state_progress() {
        assert_eq!(DownloadState::Queued.progress(), 0.0);
        assert_eq!(DownloadState::Downloading(0.5).progress(), 0.5);
        assert_eq!(DownloadState::Completed { total_bytes: 1 }.progress(), 1.0);
        assert!(DownloadState::Failed("boom".into()).is_terminal());
        assert_eq!(percent(0.333), 33);
    }
}
