//! # Core Configuration
//!
//! Builder-based configuration for the audioshelf core.
//!
//! ## Overview
//!
//! `CoreConfig` carries every bridge the core talks to plus the tuning
//! values for downloads, auto-save, sync and connectivity probing. The
//! builder fails fast: a missing bridge is reported as
//! [`Error::CapabilityMissing`] with a message naming what to inject, and
//! out-of-range tuning values are reported as [`Error::Config`].
//!
//! ## Required bridges
//!
//! - `HttpClient` - catalog API and content transfers
//! - `FileSystemAccess` - the downloads directory
//! - `SettingsStore` - playback positions, bookmarks, sync checkpoints
//! - `NetworkMonitor` - device connectivity
//! - `PlayerService` - the host audio player
//!
//! `ImageCache` is optional; without it cover preloading is skipped.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .http_client(Arc::new(http))
//!     .file_system(Arc::new(fs))
//!     .settings_store(Arc::new(settings))
//!     .network_monitor(Arc::new(monitor))
//!     .player(Arc::new(player))
//!     .max_concurrent_downloads(3)
//!     .autosave_interval(Duration::from_secs(15))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    FileSystemAccess, HttpClient, ImageCache, NetworkMonitor, PlayerService, SettingsStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 2;
pub const MAX_CONCURRENT_DOWNLOADS_LIMIT: usize = 8;
pub const DEFAULT_CACHE_SIZE_MB: u64 = 10_240;
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_SYNC_PULL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_COVER_PRELOAD_LIMIT: usize = 20;

/// Runtime configuration for the audioshelf core.
///
/// Construct through [`CoreConfig::builder`].
#[derive(Clone)]
pub struct CoreConfig {
    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub network_monitor: Arc<dyn NetworkMonitor>,
    pub player: Arc<dyn PlayerService>,
    pub image_cache: Option<Arc<dyn ImageCache>>,

    /// Root of the downloaded books. `None` means `<data dir>/downloads`.
    pub downloads_dir: Option<PathBuf>,
    /// Transfers allowed to run at the same time.
    pub max_concurrent_downloads: usize,
    /// Upper bound for the downloads directory. `0` disables the check.
    pub cache_size_mb: u64,
    /// Period of the shared auto-save tick.
    pub autosave_interval: Duration,
    /// Minimum time between two pulls of server progress.
    pub sync_pull_interval: Duration,
    /// Deadline for the catalog reachability probe.
    pub probe_timeout: Duration,
    /// Covers requested per `preload_covers` call.
    pub cover_preload_limit: usize,
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("downloads_dir", &self.downloads_dir)
            .field("max_concurrent_downloads", &self.max_concurrent_downloads)
            .field("cache_size_mb", &self.cache_size_mb)
            .field("autosave_interval", &self.autosave_interval)
            .field("sync_pull_interval", &self.sync_pull_interval)
            .field("probe_timeout", &self.probe_timeout)
            .field("cover_preload_limit", &self.cover_preload_limit)
            .field("has_image_cache", &self.image_cache.is_some())
            .finish_non_exhaustive()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Checks the tuning values. Bridges are guaranteed by the builder.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0
            || self.max_concurrent_downloads > MAX_CONCURRENT_DOWNLOADS_LIMIT
        {
            return Err(Error::Config(format!(
                "max_concurrent_downloads must be between 1 and {}, got {}",
                MAX_CONCURRENT_DOWNLOADS_LIMIT, self.max_concurrent_downloads
            )));
        }

        if self.cache_size_mb > 1_000_000 {
            return Err(Error::Config(
                "Cache size exceeds maximum of 1TB (1,000,000 MB)".to_string(),
            ));
        }

        if self.autosave_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "autosave_interval must be at least one second".to_string(),
            ));
        }

        if self.probe_timeout.is_zero() {
            return Err(Error::Config("probe_timeout must be non-zero".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }

        if let Some(dir) = &self.downloads_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config(
                    "downloads_dir cannot be empty; omit it to use the data directory"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn missing(capability: &str, message: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    player: Option<Arc<dyn PlayerService>>,
    image_cache: Option<Arc<dyn ImageCache>>,
    downloads_dir: Option<PathBuf>,
    max_concurrent_downloads: Option<usize>,
    cache_size_mb: Option<u64>,
    autosave_interval: Option<Duration>,
    sync_pull_interval: Option<Duration>,
    probe_timeout: Option<Duration>,
    cover_preload_limit: Option<usize>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn player(mut self, player: Arc<dyn PlayerService>) -> Self {
        self.player = Some(player);
        self
    }

    pub fn image_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.image_cache = Some(cache);
        self
    }

    pub fn downloads_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.downloads_dir = Some(path.into());
        self
    }

    pub fn max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.max_concurrent_downloads = Some(limit);
        self
    }

    pub fn cache_size_mb(mut self, size_mb: u64) -> Self {
        self.cache_size_mb = Some(size_mb);
        self
    }

    pub fn autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = Some(interval);
        self
    }

    pub fn sync_pull_interval(mut self, interval: Duration) -> Self {
        self.sync_pull_interval = Some(interval);
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    pub fn cover_preload_limit(mut self, limit: usize) -> Self {
        self.cover_preload_limit = Some(limit);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a required bridge was not injected
    /// - [`Error::Config`] when a tuning value is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let http_client = self.http_client.ok_or_else(|| {
            missing(
                "HttpClient",
                "HttpClient is required for catalog requests and downloads. \
                 Desktop: enable 'desktop-shims' for ReqwestHttpClient. \
                 Mobile: inject a URLSession/OkHttp adapter.",
            )
        })?;
        let file_system = self.file_system.ok_or_else(|| {
            missing(
                "FileSystemAccess",
                "FileSystemAccess is required for the downloads directory. \
                 Desktop: enable 'desktop-shims' for TokioFileSystem.",
            )
        })?;
        let settings_store = self.settings_store.ok_or_else(|| {
            missing(
                "SettingsStore",
                "SettingsStore is required for playback positions and sync checkpoints. \
                 Desktop: enable 'desktop-shims' for SqliteSettingsStore. \
                 Mobile: inject UserDefaults/DataStore.",
            )
        })?;
        let network_monitor = self.network_monitor.ok_or_else(|| {
            missing(
                "NetworkMonitor",
                "NetworkMonitor is required to choose between offline and streaming playback. \
                 Desktop: enable 'desktop-shims' for DesktopNetworkMonitor.",
            )
        })?;
        let player = self.player.ok_or_else(|| {
            missing(
                "PlayerService",
                "PlayerService is required to load books. Inject the host audio player.",
            )
        })?;

        let config = CoreConfig {
            http_client,
            file_system,
            settings_store,
            network_monitor,
            player,
            image_cache: self.image_cache,
            downloads_dir: self.downloads_dir,
            max_concurrent_downloads: self
                .max_concurrent_downloads
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS),
            cache_size_mb: self.cache_size_mb.unwrap_or(DEFAULT_CACHE_SIZE_MB),
            autosave_interval: self.autosave_interval.unwrap_or(DEFAULT_AUTOSAVE_INTERVAL),
            sync_pull_interval: self
                .sync_pull_interval
                .unwrap_or(DEFAULT_SYNC_PULL_INTERVAL),
            probe_timeout: self.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT),
            cover_preload_limit: self
                .cover_preload_limit
                .unwrap_or(DEFAULT_COVER_PRELOAD_LIMIT),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::network::NetworkInfo;
    use bridge_traits::testing::{
        InMemorySettingsStore, RecordingPlayer, ScriptedHttpClient, ScriptedNetworkMonitor,
    };
    use bridge_desktop::TokioFileSystem;

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .http_client(Arc::new(ScriptedHttpClient::new()))
            .file_system(Arc::new(TokioFileSystem::rooted_at(std::env::temp_dir())))
            .settings_store(Arc::new(InMemorySettingsStore::new()))
            .network_monitor(Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::offline())))
            .player(Arc::new(RecordingPlayer::new()))
    }

    #[test]
    fn defaults_applied() {
        let config = complete_builder().build().unwrap();
        assert_eq!(config.max_concurrent_downloads, DEFAULT_MAX_CONCURRENT_DOWNLOADS);
        assert_eq!(config.autosave_interval, Duration::from_secs(30));
        assert_eq!(config.sync_pull_interval, DEFAULT_SYNC_PULL_INTERVAL);
        assert!(config.downloads_dir.is_none());
        assert!(config.image_cache.is_none());
    }

    #[test]
    fn missing_player_names_capability() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(ScriptedHttpClient::new()))
            .file_system(Arc::new(TokioFileSystem::rooted_at(std::env::temp_dir())))
            .settings_store(Arc::new(InMemorySettingsStore::new()))
            .network_monitor(Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::offline())))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "PlayerService")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn empty_builder_reports_http_first() {
        let err = CoreConfig::builder().build().unwrap_err();
        assert!(matches!(
            err,
            Error::CapabilityMissing { ref capability, .. } if capability == "HttpClient"
        ));
    }

    #[test]
    fn rejects_out_of_range_tuning() {
        assert!(matches!(
            complete_builder().max_concurrent_downloads(0).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            complete_builder().max_concurrent_downloads(9).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            complete_builder()
                .autosave_interval(Duration::from_millis(200))
                .build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            complete_builder().probe_timeout(Duration::ZERO).build(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            complete_builder().downloads_dir("").build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn debug_output_omits_bridges() {
        let config = complete_builder().downloads_dir("/books").build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("/books"));
        assert!(!debug.contains("http_client"));
    }
}
