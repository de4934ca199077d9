//! Core service façade.
//!
//! [`CoreService`] builds every component once from a [`CoreConfig`], passes
//! them to each other explicitly and tears them down in
//! [`CoreService::shutdown`]. Desktop apps enable the `desktop-shims` feature
//! to get ready-made bridges from `bridge-desktop` (see [`desktop`]).
//!
//! ```text
//! CoreService
//!   ├── ConnectivityMonitor   (background task, probes the catalog)
//!   ├── ContentCache          (<downloads_dir>/<book_id>/...)
//!   ├── PlaybackStateStore ─┐
//!   ├── AutoSaveTimer ──────┴── PlaybackSession (one per loaded book)
//!   ├── PlaybackModeResolver
//!   └── SyncCoordinator
//! ```

pub mod error;

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub mod desktop;

pub use error::{Result, ServiceError};

use bridge_traits::image::{ImagePreloadRequest, ImageSource};
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::Mutex;
use core_library::{
    Book, BookId, CatalogSession, ContentSource, RemoteCatalog, SettingsBookmarkRepository,
};
use core_playback::{
    AutoSaveTimer, CacheConfig, ConnectivityMonitor, ContentCache, DownloadHandle, PlaybackMode,
    PlaybackModeResolver, PlaybackSession, PlaybackStateStore, ResolvedPlayback,
};
use core_runtime::events::{CoreEvent, EventBus};
use core_runtime::CoreConfig;
use core_sync::{OrphanReport, SyncConfig, SyncCoordinator, SyncReport};
use provider_catalog::HttpCatalogClient;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const DOWNLOADS_DIR_NAME: &str = "downloads";

/// Primary façade exposed to host applications.
pub struct CoreService {
    config: CoreConfig,
    event_bus: EventBus,
    catalog: Arc<dyn RemoteCatalog>,
    content: Arc<dyn ContentSource>,
    connectivity: Arc<ConnectivityMonitor>,
    cache: Arc<ContentCache>,
    state_store: Arc<PlaybackStateStore>,
    bookmarks: Arc<SettingsBookmarkRepository>,
    resolver: PlaybackModeResolver,
    sync: SyncCoordinator,
    autosave: AutoSaveTimer,
    session: Mutex<Option<Arc<PlaybackSession>>>,
    clock: Arc<dyn Clock>,
}

impl CoreService {
    /// Start the core against an Audiobookshelf-compatible catalog server.
    ///
    /// # Errors
    ///
    /// Fails if the downloads directory cannot be resolved or the content
    /// cache cannot be initialized.
    pub async fn start(config: CoreConfig, session: CatalogSession) -> Result<Self> {
        let catalog = Arc::new(HttpCatalogClient::new(config.http_client.clone(), session));
        Self::start_with_catalog(config, catalog).await
    }

    /// Start the core with an explicit catalog implementation.
    #[instrument(skip_all)]
    pub async fn start_with_catalog<C>(config: CoreConfig, catalog: Arc<C>) -> Result<Self>
    where
        C: RemoteCatalog + ContentSource + 'static,
    {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let event_bus = EventBus::new(config.event_buffer_size);
        let remote: Arc<dyn RemoteCatalog> = catalog.clone();
        let content: Arc<dyn ContentSource> = catalog;

        let connectivity = Arc::new(
            ConnectivityMonitor::new(config.network_monitor.clone())
                .with_catalog(remote.clone())
                .with_probe_timeout(config.probe_timeout)
                .with_event_bus(event_bus.clone()),
        );

        let downloads_root = Self::downloads_root(&config).await?;
        let cache_config = CacheConfig::new(&downloads_root)
            .with_max_size(config.cache_size_mb * 1024 * 1024)
            .with_max_concurrent_downloads(config.max_concurrent_downloads);
        let cache = Arc::new(
            ContentCache::new(cache_config, config.file_system.clone())?
                .with_event_bus(event_bus.clone())
                .with_clock(clock.clone()),
        );
        let restored = cache.initialize().await?;

        let state_store = Arc::new(
            PlaybackStateStore::new(config.settings_store.clone())
                .with_event_bus(event_bus.clone()),
        );
        let bookmarks = Arc::new(SettingsBookmarkRepository::new(
            config.settings_store.clone(),
        ));

        let resolver = PlaybackModeResolver::new(
            cache.clone(),
            connectivity.clone(),
            remote.clone(),
            config.player.clone(),
            state_store.clone(),
        )
        .with_event_bus(event_bus.clone());

        let sync = SyncCoordinator::new(
            remote.clone(),
            state_store.clone(),
            bookmarks.clone(),
            cache.clone(),
            config.settings_store.clone(),
        )
        .with_config(SyncConfig {
            pull_interval: config.sync_pull_interval,
            ..SyncConfig::default()
        })
        .with_clock(clock.clone())
        .with_event_bus(event_bus.clone());

        let autosave = AutoSaveTimer::new(config.autosave_interval);

        connectivity.start_monitoring();
        autosave.start();

        info!(
            downloads_root = ?downloads_root,
            restored_downloads = restored,
            "Core service started"
        );

        Ok(Self {
            config,
            event_bus,
            catalog: remote,
            content,
            connectivity,
            cache,
            state_store,
            bookmarks,
            resolver,
            sync,
            autosave,
            session: Mutex::new(None),
            clock,
        })
    }

    async fn downloads_root(config: &CoreConfig) -> Result<PathBuf> {
        match &config.downloads_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config
                .file_system
                .get_data_directory()
                .await?
                .join(DOWNLOADS_DIR_NAME)),
        }
    }

    /// Resolve the playback mode for `book`, load it into the player and
    /// start persisting its position.
    ///
    /// The session of the previously loaded book is flushed and ended first.
    /// The session lock is only held to swap sessions, never across mode
    /// resolution or player loading.
    #[instrument(skip(self, book), fields(book_id = %book.id))]
    pub async fn play_book(&self, book: &Book, restore_state: bool) -> Result<ResolvedPlayback> {
        let previous = self.session.lock().await.take();
        if let Some(previous) = previous {
            Self::end_session(&previous).await;
        }

        let resolved = self.resolver.play(book, restore_state).await?;

        let session = Arc::new(PlaybackSession::new(
            book.id.clone(),
            self.config.player.clone(),
            self.state_store.clone(),
            self.clock.clone(),
        ));
        session.spawn_autosave(&self.autosave);
        // A concurrent play_book may have installed its session meanwhile.
        let replaced = self.session.lock().await.replace(session);
        if let Some(replaced) = replaced {
            Self::end_session(&replaced).await;
        }

        Ok(resolved)
    }

    async fn end_session(session: &PlaybackSession) {
        if let Err(e) = session.end().await {
            warn!(book_id = %session.book_id(), error = %e, "Final save of previous book failed");
        }
    }

    /// Where `book_id` would play from right now.
    pub async fn playback_mode(&self, book_id: &BookId) -> PlaybackMode {
        self.resolver.resolve_mode(book_id).await
    }

    /// Save the current position and stop auto-saving it. Returns whether a
    /// record was written; `false` when nothing is playing.
    pub async fn stop_playback(&self) -> Result<bool> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => Ok(session.end().await?),
            None => Ok(false),
        }
    }

    /// Save the current position now.
    pub async fn save_position(&self) -> Result<bool> {
        let session = self.session.lock().await.clone();
        match session {
            Some(session) => Ok(session.flush().await?),
            None => Ok(false),
        }
    }

    /// Queue a whole-book download.
    pub async fn download_book(&self, book: &Book) -> Result<DownloadHandle> {
        Ok(self.cache.download(book, self.content.clone()).await?)
    }

    pub async fn delete_download(&self, book_id: &BookId) -> Result<()> {
        Ok(self.cache.delete_book(book_id).await?)
    }

    /// Reconcile playback progress with the server.
    pub async fn sync_now(&self, force_pull: bool) -> Result<SyncReport> {
        Ok(self.sync.sync_playback_progress(force_pull).await?)
    }

    pub async fn reconcile_bookmarks(&self) -> Result<OrphanReport> {
        Ok(self.sync.reconcile_bookmarks().await?)
    }

    /// Ask the host image cache to warm the covers of `books`.
    ///
    /// Runs in the background; failures are only logged.
    pub fn preload_covers(&self, books: &[Book]) {
        let Some(image_cache) = self.config.image_cache.clone() else {
            debug!("No image cache configured; skipping cover preload");
            return;
        };

        let session = self.catalog.session();
        let requests: Vec<ImagePreloadRequest> = books
            .iter()
            .filter(|book| book.cover.is_some())
            .map(|book| ImagePreloadRequest {
                key: format!("cover:{}", book.id),
                source: ImageSource::Remote {
                    url: format!("{}/api/items/{}/cover", session.base_url, book.id),
                    auth_token: session.token.clone(),
                },
            })
            .collect();
        if requests.is_empty() {
            return;
        }

        let limit = self.config.cover_preload_limit;
        core_async::spawn(async move {
            let count = requests.len();
            if let Err(e) = image_cache.preload(requests, limit).await {
                debug!(error = %e, count, "Cover preload failed");
            }
        });
    }

    /// Flush the playing book, stop background tasks and refuse new
    /// downloads.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop_playback().await {
            warn!(error = %e, "Final position save failed during shutdown");
        }
        self.autosave.stop().await;
        self.connectivity.stop_monitoring().await;
        self.cache.shutdown();
        info!("Core service stopped");
    }

    pub fn subscribe_events(&self) -> core_async::sync::broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn RemoteCatalog> {
        &self.catalog
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    pub fn state_store(&self) -> &Arc<PlaybackStateStore> {
        &self.state_store
    }

    pub fn bookmarks(&self) -> &Arc<SettingsBookmarkRepository> {
        &self.bookmarks
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn autosave(&self) -> &AutoSaveTimer {
        &self.autosave
    }

    /// Book currently bound to a playback session.
    pub async fn playing_book(&self) -> Option<BookId> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.book_id().clone())
    }
}
