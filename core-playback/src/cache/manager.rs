//! # Content Cache
//!
//! Downloads whole books to local storage and answers "is this book playable
//! offline".
//!
//! Each book lives in `<downloads_root>/<book_id>/`:
//!
//! ```text
//! 001-Part 1.mp3
//! 002-Part 2.mp3
//! metadata.json   serialized Book (the manifest)
//! download.json   DownloadedBookRecord, written last
//! ```
//!
//! A directory without a readable `download.json` is an interrupted download
//! and is removed by [`ContentCache::initialize`]. The in-memory index is the
//! only record of completion during a session; it is rebuilt from the
//! completion markers at startup.

use crate::cache::config::CacheConfig;
use crate::cache::stats::{percent, CacheStats, DownloadState};
use crate::error::{PlaybackError, Result};
use bridge_traits::error::BridgeError;
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::{Clock, SystemClock};
use bytes::Bytes;
use core_async::sync::{watch, Mutex, RwLock, Semaphore};
use core_async::time::{sleep, timeout};
use core_library::{AudioTrack, Book, BookId, ContentSource, DownloadedBookRecord};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Serialized [`Book`] inside a book directory.
pub const MANIFEST_FILE: &str = "metadata.json";

/// Completion record inside a book directory, written last.
pub const COMPLETION_MARKER: &str = "download.json";

/// Outcome of reading a downloaded book's manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestRead {
    Present(Book),
    Absent,
    /// The file exists but could not be read or decoded.
    Corrupt(String),
}

/// Handle to a running (or finished) book download.
///
/// Handles for the same book share one transfer.
#[derive(Debug, Clone)]
pub struct DownloadHandle {
    book_id: BookId,
    state: watch::Receiver<DownloadState>,
}

impl DownloadHandle {
    pub fn book_id(&self) -> &BookId {
        &self.book_id
    }

    /// Current state.
    pub fn state(&self) -> DownloadState {
        self.state.borrow().clone()
    }

    /// Progress stream.
    pub fn progress(&self) -> watch::Receiver<DownloadState> {
        self.state.clone()
    }

    /// Wait for the transfer to finish. Returns the bytes stored.
    pub async fn wait(mut self) -> Result<u64> {
        loop {
            let state = self.state.borrow_and_update().clone();
            match state {
                DownloadState::Completed { total_bytes } => return Ok(total_bytes),
                DownloadState::Failed(message) => {
                    return Err(PlaybackError::Download {
                        book_id: self.book_id.to_string(),
                        message,
                    })
                }
                DownloadState::Queued | DownloadState::Downloading(_) => {}
            }

            if self.state.changed().await.is_err() {
                let last = self.state.borrow().clone();
                return match last {
                    DownloadState::Completed { total_bytes } => Ok(total_bytes),
                    DownloadState::Failed(message) => Err(PlaybackError::Download {
                        book_id: self.book_id.to_string(),
                        message,
                    }),
                    _ => Err(PlaybackError::Download {
                        book_id: self.book_id.to_string(),
                        message: "download task ended unexpectedly".to_string(),
                    }),
                };
            }
        }
    }
}

/// Content cache for downloaded books.
pub struct ContentCache {
    config: CacheConfig,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    index: RwLock<HashMap<BookId, DownloadedBookRecord>>,
    active_downloads: Mutex<HashMap<BookId, watch::Receiver<DownloadState>>>,
    download_semaphore: Arc<Semaphore>,
}

impl ContentCache {
    /// Create a content cache.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use core_playback::cache::{CacheConfig, ContentCache};
    /// use std::sync::Arc;
    ///
    /// let cache = Arc::new(ContentCache::new(CacheConfig::new(root), filesystem)?);
    /// cache.initialize().await?;
    /// let handle = cache.download(&book, catalog).await?;
    /// handle.wait().await?;
    /// ```
    pub fn new(config: CacheConfig, fs: Arc<dyn FileSystemAccess>) -> Result<Self> {
        config.validate().map_err(|e| {
            PlaybackError::InvalidConfig(format!("Invalid cache configuration: {}", e))
        })?;
        let download_semaphore = Arc::new(Semaphore::new(config.max_concurrent_downloads));

        Ok(Self {
            config,
            fs,
            clock: Arc::new(SystemClock),
            event_bus: None,
            index: RwLock::new(HashMap::new()),
            active_downloads: Mutex::new(HashMap::new()),
            download_semaphore,
        })
    }

    /// Set event bus for download events.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Clock used for completion timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Directory holding every downloaded book.
    pub fn root(&self) -> &Path {
        &self.config.downloads_root
    }

    fn book_dir(&self, book_id: &BookId) -> PathBuf {
        self.config.downloads_root.join(book_id.as_str())
    }

    /// Create the downloads root and rebuild the index from disk.
    ///
    /// Directories without a valid completion marker and manifest are
    /// removed. Returns the number of books restored.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<usize> {
        info!("Initializing content cache");

        let root = &self.config.downloads_root;
        self.fs.create_dir_all(root).await.map_err(|e| {
            error!("Failed to create downloads directory: {}", e);
            e
        })?;

        let in_flight: HashSet<BookId> = self
            .active_downloads
            .lock()
            .await
            .keys()
            .cloned()
            .collect();

        let mut restored = HashMap::new();
        for entry in self.fs.list_directory(root).await? {
            match self.fs.metadata(&entry).await {
                Ok(metadata) if metadata.is_directory => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = ?entry, error = %e, "Skipping unreadable cache entry");
                    continue;
                }
            }
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let book_id = BookId::new(name);
            if in_flight.contains(&book_id) {
                continue;
            }

            match self.load_completion_record(&book_id, &entry).await {
                Some(record) => {
                    restored.insert(book_id, record);
                }
                None => {
                    warn!(book_id = %book_id, "Removing interrupted download");
                    self.remove_dir_quietly(&entry).await;
                }
            }
        }

        let count = restored.len();
        self.index.write().await.extend(restored);
        info!(count, "Content cache initialized");
        Ok(count)
    }

    async fn load_completion_record(
        &self,
        book_id: &BookId,
        dir: &Path,
    ) -> Option<DownloadedBookRecord> {
        let bytes = self.fs.read_file(&dir.join(COMPLETION_MARKER)).await.ok()?;
        let mut record: DownloadedBookRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!(book_id = %book_id, error = %e, "Unreadable completion marker");
                return None;
            }
        };
        if !record.completed || record.book_id != *book_id {
            return None;
        }
        if !matches!(self.read_manifest(book_id).await, ManifestRead::Present(_)) {
            return None;
        }
        record.directory = dir.to_path_buf();
        self.files_present(&record).await.then_some(record)
    }

    async fn files_present(&self, record: &DownloadedBookRecord) -> bool {
        for name in &record.files {
            if !self
                .fs
                .exists(&record.directory.join(name))
                .await
                .unwrap_or(false)
            {
                return false;
            }
        }
        true
    }

    /// True iff a completed record exists and its audio files are present.
    ///
    /// A record whose files were removed behind the cache's back is dropped.
    #[instrument(skip(self))]
    pub async fn is_book_downloaded(&self, book_id: &BookId) -> bool {
        let record = self.index.read().await.get(book_id).cloned();
        let Some(record) = record else {
            return false;
        };

        if record.completed && self.files_present(&record).await {
            return true;
        }

        warn!(book_id = %book_id, "Downloaded files missing; dropping record");
        self.index.write().await.remove(book_id);
        false
    }

    /// Completion record of a downloaded book.
    pub async fn downloaded_record(&self, book_id: &BookId) -> Option<DownloadedBookRecord> {
        self.index.read().await.get(book_id).cloned()
    }

    /// Ids of every book with a completion record, sorted.
    pub async fn downloaded_book_ids(&self) -> Vec<BookId> {
        let ids: BTreeSet<BookId> = self.index.read().await.keys().cloned().collect();
        ids.into_iter().collect()
    }

    /// Read the manifest written at download time.
    pub async fn read_manifest(&self, book_id: &BookId) -> ManifestRead {
        if !book_id.is_path_safe() {
            return ManifestRead::Absent;
        }

        let path = self.book_dir(book_id).join(MANIFEST_FILE);
        match self.fs.read_file(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Book>(&bytes) {
                Ok(book) if book.id == *book_id => ManifestRead::Present(book),
                Ok(book) => ManifestRead::Corrupt(format!("manifest belongs to {}", book.id)),
                Err(e) => ManifestRead::Corrupt(e.to_string()),
            },
            Err(BridgeError::NotFound(_)) => ManifestRead::Absent,
            Err(e) => ManifestRead::Corrupt(e.to_string()),
        }
    }

    /// Local path of every track of `book`, in track order.
    pub async fn local_track_paths(&self, book: &Book) -> Vec<PathBuf> {
        let dir = self
            .index
            .read()
            .await
            .get(&book.id)
            .map(|record| record.directory.clone())
            .unwrap_or_else(|| self.book_dir(&book.id));

        book.tracks
            .iter()
            .map(|track| dir.join(track.local_file_name()))
            .collect()
    }

    /// Start downloading `book`.
    ///
    /// Returns immediately. A request for a book that is already downloading
    /// joins the running transfer; a request for a downloaded book returns a
    /// completed handle.
    #[instrument(skip(self, book, source), fields(book_id = %book.id))]
    pub async fn download(
        self: &Arc<Self>,
        book: &Book,
        source: Arc<dyn ContentSource>,
    ) -> Result<DownloadHandle> {
        let book_id = book.id.clone();
        if !book_id.is_path_safe() {
            return Err(PlaybackError::Download {
                book_id: book_id.to_string(),
                message: "book id cannot be used as a directory name".to_string(),
            });
        }
        if book.tracks.is_empty() {
            return Err(PlaybackError::Download {
                book_id: book_id.to_string(),
                message: "book has no audio tracks".to_string(),
            });
        }

        let mut active = self.active_downloads.lock().await;
        if let Some(state) = active.get(&book_id) {
            info!("Download already in progress; joining it");
            return Ok(DownloadHandle {
                book_id,
                state: state.clone(),
            });
        }

        if self.is_book_downloaded(&book_id).await {
            info!("Book is already downloaded");
            let total_bytes = self
                .downloaded_record(&book_id)
                .await
                .map_or(0, |record| record.total_bytes);
            let (_tx, state) = watch::channel(DownloadState::Completed { total_bytes });
            return Ok(DownloadHandle { book_id, state });
        }

        self.ensure_capacity(book).await?;

        let (tx, state) = watch::channel(DownloadState::Queued);
        active.insert(book_id.clone(), state.clone());
        drop(active);

        info!(tracks = book.tracks.len(), "Download queued");
        self.emit(DownloadEvent::Queued {
            book_id: book_id.to_string(),
        });

        let cache = Arc::clone(self);
        let book = book.clone();
        core_async::spawn(async move {
            cache.run_download(book, source, tx).await;
        });

        Ok(DownloadHandle { book_id, state })
    }

    async fn ensure_capacity(&self, book: &Book) -> Result<()> {
        if !self.config.has_size_limit() {
            return Ok(());
        }
        let Some(required) = book.declared_size() else {
            debug!("Declared size unknown; skipping capacity check");
            return Ok(());
        };

        let used = self.get_total_download_size().await?;
        let available = self.config.max_cache_size_bytes.saturating_sub(used);
        if required > available {
            warn!(required, available, "Not enough cache space for download");
            return Err(PlaybackError::CacheFull {
                required,
                available,
            });
        }
        Ok(())
    }

    async fn run_download(
        self: Arc<Self>,
        book: Book,
        source: Arc<dyn ContentSource>,
        state: watch::Sender<DownloadState>,
    ) {
        let book_id = book.id.clone();

        let result = match self.download_semaphore.clone().acquire_owned().await {
            Ok(permit) => {
                let result = self.transfer(&book, source.as_ref(), &state).await;
                drop(permit);
                result
            }
            Err(_) => Err(PlaybackError::Download {
                book_id: book_id.to_string(),
                message: "content cache is shut down".to_string(),
            }),
        };

        match result {
            Ok(record) => {
                let total_bytes = record.total_bytes;
                self.index.write().await.insert(book_id.clone(), record);
                self.active_downloads.lock().await.remove(&book_id);

                info!(book_id = %book_id, total_bytes, "Download completed");
                self.emit(DownloadEvent::Completed {
                    book_id: book_id.to_string(),
                    total_bytes,
                });
                state.send_replace(DownloadState::Completed { total_bytes });
            }
            Err(e) => {
                error!(book_id = %book_id, error = %e, "Download failed");
                self.remove_dir_quietly(&self.book_dir(&book_id)).await;

                let message = match e {
                    PlaybackError::Download { message, .. } => message,
                    other => other.to_string(),
                };
                self.active_downloads.lock().await.remove(&book_id);
                self.emit(DownloadEvent::Failed {
                    book_id: book_id.to_string(),
                    message: message.clone(),
                });
                state.send_replace(DownloadState::Failed(message));
            }
        }
    }

    async fn transfer(
        &self,
        book: &Book,
        source: &dyn ContentSource,
        state: &watch::Sender<DownloadState>,
    ) -> Result<DownloadedBookRecord> {
        let dir = self.book_dir(&book.id);
        if self.fs.exists(&dir).await? {
            debug!(path = ?dir, "Clearing stale book directory");
            self.fs.delete_dir_all(&dir).await?;
        }
        self.fs.create_dir_all(&dir).await?;

        let total_tracks = book.tracks.len();
        info!(book_id = %book.id, total_tracks, "Download started");
        self.emit(DownloadEvent::Started {
            book_id: book.id.to_string(),
            total_tracks: total_tracks as u32,
        });
        state.send_replace(DownloadState::Downloading(0.0));

        let mut files = Vec::with_capacity(total_tracks);
        let mut total_bytes = 0u64;

        for (position, track) in book.tracks.iter().enumerate() {
            let data = self.fetch_with_retry(book, track, source).await?;
            let name = track.local_file_name();
            let path = dir.join(&name);
            let len = data.len() as u64;

            self.fs.write_file(&path, data).await?;
            self.verify_on_disk(&book.id, &path, len).await?;

            total_bytes += len;
            files.push(name);

            let progress = (position + 1) as f64 / total_tracks as f64;
            state.send_replace(DownloadState::Downloading(progress));
            self.emit(DownloadEvent::Progress {
                book_id: book.id.to_string(),
                percent: percent(progress),
            });
        }

        let manifest = serde_json::to_vec_pretty(book).map_err(|e| PlaybackError::Download {
            book_id: book.id.to_string(),
            message: format!("failed to encode manifest: {}", e),
        })?;
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_len = manifest.len() as u64;
        self.fs
            .write_file(&manifest_path, Bytes::from(manifest))
            .await?;
        self.verify_on_disk(&book.id, &manifest_path, manifest_len)
            .await?;
        total_bytes += manifest_len;

        let record = DownloadedBookRecord {
            book_id: book.id.clone(),
            directory: dir.clone(),
            total_bytes,
            completed: true,
            completed_at: self.clock.unix_timestamp_millis(),
            files,
        };
        let marker = serde_json::to_vec_pretty(&record).map_err(|e| PlaybackError::Download {
            book_id: book.id.to_string(),
            message: format!("failed to encode completion record: {}", e),
        })?;
        self.fs
            .write_file(&dir.join(COMPLETION_MARKER), Bytes::from(marker))
            .await?;

        Ok(record)
    }

    /// Fetch one asset with timeout, verification and exponential backoff.
    async fn fetch_with_retry(
        &self,
        book: &Book,
        track: &AudioTrack,
        source: &dyn ContentSource,
    ) -> Result<Bytes> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            debug!(
                "Fetch attempt {}/{} for track {} of {}",
                attempt, attempts, track.index, book.id
            );

            match timeout(self.config.download_timeout, source.fetch_track(book, track)).await {
                Ok(Ok(data)) => match self.verify_payload(track, &data) {
                    Ok(()) => return Ok(data),
                    Err(message) => {
                        warn!("Fetch attempt {} returned bad data: {}", attempt, message);
                        last_error = message;
                    }
                },
                Ok(Err(e)) => {
                    warn!("Fetch attempt {} failed: {}", attempt, e);
                    let transient = e.is_transient();
                    last_error = e.to_string();
                    if !transient {
                        break;
                    }
                }
                Err(_) => {
                    warn!("Fetch attempt {} timed out", attempt);
                    last_error = "transfer timed out".to_string();
                }
            }

            if attempt < attempts {
                sleep(self.config.backoff_for(attempt)).await;
            }
        }

        Err(PlaybackError::Download {
            book_id: book.id.to_string(),
            message: format!("track {}: {}", track.index, last_error),
        })
    }

    fn verify_payload(&self, track: &AudioTrack, data: &[u8]) -> std::result::Result<(), String> {
        if let Some(expected) = track.size {
            if data.len() as u64 != expected {
                return Err(format!(
                    "size mismatch: expected {} bytes, got {}",
                    expected,
                    data.len()
                ));
            }
        }

        if self.config.verify_checksums {
            if let Some(expected) = &track.sha256 {
                let actual = calculate_hash(data);
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(format!(
                        "checksum mismatch: expected {}, got {}",
                        expected, actual
                    ));
                }
            }
        }

        Ok(())
    }

    async fn verify_on_disk(&self, book_id: &BookId, path: &Path, expected: u64) -> Result<()> {
        let metadata = self.fs.metadata(path).await?;
        if metadata.size != expected {
            return Err(PlaybackError::Download {
                book_id: book_id.to_string(),
                message: format!(
                    "{} has {} bytes on disk, expected {}",
                    path.display(),
                    metadata.size,
                    expected
                ),
            });
        }
        Ok(())
    }

    /// Fraction downloaded: `1.0` for downloaded books, `0.0` when unknown.
    pub async fn get_download_progress(&self, book_id: &BookId) -> f64 {
        if let Some(state) = self.active_downloads.lock().await.get(book_id) {
            return state.borrow().progress();
        }
        if self.index.read().await.contains_key(book_id) {
            1.0
        } else {
            0.0
        }
    }

    pub async fn is_downloading_book(&self, book_id: &BookId) -> bool {
        self.active_downloads.lock().await.contains_key(book_id)
    }

    /// Remove a downloaded book. Deleting an absent book is a no-op.
    ///
    /// Fails while the book is still downloading.
    #[instrument(skip(self))]
    pub async fn delete_book(&self, book_id: &BookId) -> Result<()> {
        if self.is_downloading_book(book_id).await {
            return Err(PlaybackError::Download {
                book_id: book_id.to_string(),
                message: "download in progress".to_string(),
            });
        }

        let removed_record = self.index.write().await.remove(book_id).is_some();
        let removed_dir = if book_id.is_path_safe() {
            self.delete_dir_if_present(&self.book_dir(book_id)).await?
        } else {
            false
        };

        if removed_record || removed_dir {
            info!(book_id = %book_id, "Deleted downloaded book");
            self.emit(DownloadEvent::Deleted {
                book_id: book_id.to_string(),
            });
        } else {
            debug!(book_id = %book_id, "Nothing to delete");
        }
        Ok(())
    }

    /// Remove every downloaded book except those still downloading. Returns
    /// the number of books removed.
    #[instrument(skip(self))]
    pub async fn delete_all_books(&self) -> Result<usize> {
        let mut ids: BTreeSet<BookId> = self.index.read().await.keys().cloned().collect();

        let root = &self.config.downloads_root;
        if self.fs.exists(root).await? {
            for entry in self.fs.list_directory(root).await? {
                let is_dir = self
                    .fs
                    .metadata(&entry)
                    .await
                    .map(|m| m.is_directory)
                    .unwrap_or(false);
                if let Some(name) = entry.file_name().and_then(|n| n.to_str()) {
                    if is_dir {
                        ids.insert(BookId::new(name));
                    }
                }
            }
        }

        let in_flight: HashSet<BookId> = self
            .active_downloads
            .lock()
            .await
            .keys()
            .cloned()
            .collect();

        let mut removed = 0;
        for book_id in ids.into_iter().filter(|id| !in_flight.contains(id)) {
            self.delete_book(&book_id).await?;
            removed += 1;
        }

        info!(removed, "Cleared downloaded books");
        Ok(removed)
    }

    /// Bytes on disk for one book, `0` when absent.
    pub async fn get_book_storage_size(&self, book_id: &BookId) -> Result<u64> {
        if !book_id.is_path_safe() {
            return Ok(0);
        }
        let dir = self.book_dir(book_id);
        if !self.fs.exists(&dir).await? {
            return Ok(0);
        }
        Ok(self.fs.directory_size(&dir).await?)
    }

    /// Bytes on disk under the downloads root.
    pub async fn get_total_download_size(&self) -> Result<u64> {
        let root = &self.config.downloads_root;
        if !self.fs.exists(root).await? {
            return Ok(0);
        }
        Ok(self.fs.directory_size(root).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            downloaded_books: self.index.read().await.len(),
            active_downloads: self.active_downloads.lock().await.len(),
            total_bytes: self.get_total_download_size().await?,
            max_bytes: self.config.max_cache_size_bytes,
        })
    }

    /// Refuse new transfers. Queued downloads fail; running ones finish.
    pub fn shutdown(&self) {
        self.download_semaphore.close();
    }

    async fn delete_dir_if_present(&self, dir: &Path) -> Result<bool> {
        if !self.fs.exists(dir).await? {
            return Ok(false);
        }
        match self.fs.delete_dir_all(dir).await {
            Ok(()) => Ok(true),
            Err(BridgeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_dir_quietly(&self, dir: &Path) {
        if let Err(e) = self.delete_dir_if_present(dir).await {
            warn!(path = ?dir, error = %e, "Failed to remove directory");
        }
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Download(event)).ok();
        }
    }
}

/// Lowercase hex SHA-256 of `data`.
fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_lowercase_hex() {
        assert_eq!(
            calculate_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn completed_handle_resolves_immediately() {
        let (_tx, state) = watch::channel(DownloadState::Completed { total_bytes: 42 });
        let handle = DownloadHandle {
            book_id: BookId::new("li_1"),
            state,
        };
        assert_eq!(handle.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropped_sender_without_result_is_an_error() {
        let (tx, state) = watch::channel(DownloadState::Downloading(0.5));
        let handle = DownloadHandle {
            book_id: BookId::new("li_1"),
            state,
        };
        drop(tx);
        assert!(matches!(
            handle.wait().await,
            Err(PlaybackError::Download { .. })
        ));
    }
}
