//! Content cache against a real filesystem in a temporary directory.

use bridge_desktop::TokioFileSystem;
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::testing::ManualClock;
use bytes::Bytes;
use core_library::testing::{sample_book, FakeCatalog};
use core_library::{BookId, ContentSource};
use core_playback::cache::{
    CacheConfig, ContentCache, DownloadState, ManifestRead, COMPLETION_MARKER, MANIFEST_FILE,
};
use core_playback::PlaybackError;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    fs: Arc<TokioFileSystem>,
    catalog: Arc<FakeCatalog>,
    bus: EventBus,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("downloads");
        Self {
            fs: Arc::new(TokioFileSystem::rooted_at(dir.path())),
            _dir: dir,
            root,
            catalog: Arc::new(FakeCatalog::new()),
            bus: EventBus::new(256),
        }
    }

    fn config(&self) -> CacheConfig {
        CacheConfig::new(&self.root)
            .with_retry_backoff(Duration::from_millis(1))
            .with_max_retries(1)
    }

    fn cache_with(&self, config: CacheConfig) -> Arc<ContentCache> {
        Arc::new(
            ContentCache::new(config, self.fs.clone())
                .unwrap()
                .with_event_bus(self.bus.clone())
                .with_clock(Arc::new(ManualClock::at_millis(1_700_000_000_000))),
        )
    }

    async fn cache(&self) -> Arc<ContentCache> {
        let cache = self.cache_with(self.config());
        cache.initialize().await.unwrap();
        cache
    }

    fn source(&self) -> Arc<dyn ContentSource> {
        self.catalog.clone()
    }
}

fn drain_downloads(rx: &mut core_async::sync::broadcast::Receiver<CoreEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Download(event) = event {
            events.push(event);
        }
    }
    events
}

#[tokio::test]
async fn download_writes_assets_manifest_and_marker() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let book = sample_book("li_1", "Dune", 3, 128);
    fx.catalog.add_book(book.clone()).await;
    let mut events = fx.bus.subscribe();

    let handle = cache.download(&book, fx.source()).await.unwrap();
    let total = handle.wait().await.unwrap();

    let dir = fx.root.join("li_1");
    for track in &book.tracks {
        assert!(fx.fs.exists(&dir.join(track.local_file_name())).await.unwrap());
    }
    assert!(fx.fs.exists(&dir.join(MANIFEST_FILE)).await.unwrap());
    assert!(fx.fs.exists(&dir.join(COMPLETION_MARKER)).await.unwrap());
    assert!(total > 3 * 128);

    assert!(cache.is_book_downloaded(&book.id).await);
    assert_eq!(cache.get_download_progress(&book.id).await, 1.0);
    assert!(!cache.is_downloading_book(&book.id).await);

    let record = cache.downloaded_record(&book.id).await.unwrap();
    assert!(record.completed);
    assert_eq!(record.completed_at, 1_700_000_000_000);
    assert_eq!(record.files.len(), 3);

    let events = drain_downloads(&mut events);
    assert!(matches!(events.first(), Some(DownloadEvent::Queued { .. })));
    assert!(matches!(events.last(), Some(DownloadEvent::Completed { .. })));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, DownloadEvent::Progress { .. }))
            .count(),
        3
    );
}

#[tokio::test]
async fn duplicate_requests_share_one_transfer() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let book = sample_book("li_1", "Dune", 2, 64);
    fx.catalog.add_book(book.clone()).await;
    fx.catalog
        .set_track_delay(Some(Duration::from_millis(30)))
        .await;
    let mut events = fx.bus.subscribe();

    let first = cache.download(&book, fx.source()).await.unwrap();
    let second = cache.download(&book, fx.source()).await.unwrap();
    assert!(cache.is_downloading_book(&book.id).await);

    first.wait().await.unwrap();
    second.wait().await.unwrap();

    assert_eq!(fx.catalog.calls("fetch_track").await, 2);
    let completions = drain_downloads(&mut events)
        .into_iter()
        .filter(|e| matches!(e, DownloadEvent::Completed { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn downloads_beyond_the_limit_queue() {
    let fx = Fixture::new();
    let cache = fx.cache_with(fx.config().with_max_concurrent_downloads(1));
    cache.initialize().await.unwrap();
    fx.catalog
        .set_track_delay(Some(Duration::from_millis(10)))
        .await;

    let mut handles = Vec::new();
    for id in ["li_1", "li_2", "li_3"] {
        let book = sample_book(id, id, 2, 32);
        fx.catalog.add_book(book.clone()).await;
        handles.push(cache.download(&book, fx.source()).await.unwrap());
    }
    for handle in handles {
        handle.wait().await.unwrap();
    }

    assert_eq!(fx.catalog.max_concurrent_fetches(), 1);
    assert_eq!(cache.downloaded_book_ids().await.len(), 3);
}

#[tokio::test]
async fn failed_transfer_is_isolated_and_cleaned_up() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let broken = sample_book("li_broken", "Broken", 2, 32);
    let healthy = sample_book("li_ok", "Healthy", 2, 32);
    fx.catalog.add_book(broken.clone()).await;
    fx.catalog.add_book(healthy.clone()).await;
    fx.catalog.fail_track(&broken.id, 2).await;

    let failing = cache.download(&broken, fx.source()).await.unwrap();
    let succeeding = cache.download(&healthy, fx.source()).await.unwrap();

    let err = failing.wait().await.unwrap_err();
    assert!(matches!(err, PlaybackError::Download { .. }));
    succeeding.wait().await.unwrap();

    assert!(!cache.is_book_downloaded(&broken.id).await);
    assert!(!fx.fs.exists(&fx.root.join("li_broken")).await.unwrap());
    assert!(cache.is_book_downloaded(&healthy.id).await);
    // one attempt plus one retry for the failing track
    assert_eq!(fx.catalog.calls("fetch_track").await, 2 + 1 + 2);
}

#[tokio::test]
async fn checksum_mismatch_fails_the_download() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let mut book = sample_book("li_1", "Dune", 1, 16);
    book.tracks[0].sha256 = Some("00".repeat(32));
    fx.catalog.add_book(book.clone()).await;

    let handle = cache.download(&book, fx.source()).await.unwrap();
    let mut progress = handle.progress();
    assert!(handle.wait().await.is_err());

    assert!(matches!(&*progress.borrow_and_update(), DownloadState::Failed(message) if message.contains("checksum")));
}

#[tokio::test]
async fn matching_checksum_is_accepted() {
    use sha2::{Digest, Sha256};

    let fx = Fixture::new();
    let cache = fx.cache().await;
    let mut book = sample_book("li_1", "Dune", 1, 4);
    let content = Bytes::from_static(b"flac");
    book.tracks[0].sha256 = Some(format!("{:X}", Sha256::digest(&content)));
    fx.catalog.add_book(book.clone()).await;
    fx.catalog.set_track_content(&book.id, 1, content).await;

    cache.download(&book, fx.source()).await.unwrap().wait().await.unwrap();
    assert!(cache.is_book_downloaded(&book.id).await);
}

#[tokio::test]
async fn capacity_guard_rejects_before_transferring() {
    let fx = Fixture::new();
    let cache = fx.cache_with(fx.config().with_max_size(100));
    cache.initialize().await.unwrap();
    let book = sample_book("li_big", "Big", 2, 64);
    fx.catalog.add_book(book.clone()).await;

    let err = cache.download(&book, fx.source()).await.unwrap_err();
    assert!(matches!(
        err,
        PlaybackError::CacheFull {
            required: 128,
            available: 100
        }
    ));
    assert_eq!(fx.catalog.calls("fetch_track").await, 0);
    assert!(!cache.is_downloading_book(&book.id).await);
}

#[tokio::test]
async fn initialize_restores_completed_and_removes_partial_downloads() {
    let fx = Fixture::new();
    let book = sample_book("li_1", "Dune", 2, 32);
    fx.catalog.add_book(book.clone()).await;
    {
        let cache = fx.cache().await;
        cache.download(&book, fx.source()).await.unwrap().wait().await.unwrap();
    }

    let partial = fx.root.join("li_partial");
    fx.fs
        .write_file(&partial.join("001-part.mp3"), Bytes::from_static(b"half"))
        .await
        .unwrap();

    let cache = fx.cache_with(fx.config());
    assert_eq!(cache.initialize().await.unwrap(), 1);
    assert!(cache.is_book_downloaded(&book.id).await);
    assert!(!fx.fs.exists(&partial).await.unwrap());
    assert_eq!(cache.downloaded_book_ids().await, vec![BookId::new("li_1")]);
}

#[tokio::test]
async fn externally_removed_files_drop_the_record() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let book = sample_book("li_1", "Dune", 2, 32);
    fx.catalog.add_book(book.clone()).await;
    cache.download(&book, fx.source()).await.unwrap().wait().await.unwrap();

    let track = fx.root.join("li_1").join(book.tracks[1].local_file_name());
    fx.fs.delete_file(&track).await.unwrap();

    assert!(!cache.is_book_downloaded(&book.id).await);
    assert!(cache.downloaded_record(&book.id).await.is_none());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let book = sample_book("li_1", "Dune", 1, 32);
    fx.catalog.add_book(book.clone()).await;
    cache.download(&book, fx.source()).await.unwrap().wait().await.unwrap();
    let mut events = fx.bus.subscribe();

    cache.delete_book(&book.id).await.unwrap();
    cache.delete_book(&book.id).await.unwrap();
    cache.delete_book(&BookId::new("never_downloaded")).await.unwrap();

    assert!(!cache.is_book_downloaded(&book.id).await);
    assert_eq!(cache.get_book_storage_size(&book.id).await.unwrap(), 0);
    let deleted = drain_downloads(&mut events)
        .into_iter()
        .filter(|e| matches!(e, DownloadEvent::Deleted { .. }))
        .count();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn delete_all_books_clears_everything() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    for id in ["li_1", "li_2"] {
        let book = sample_book(id, id, 1, 16);
        fx.catalog.add_book(book.clone()).await;
        cache.download(&book, fx.source()).await.unwrap().wait().await.unwrap();
    }

    assert_eq!(cache.delete_all_books().await.unwrap(), 2);
    assert_eq!(cache.delete_all_books().await.unwrap(), 0);
    assert!(cache.downloaded_book_ids().await.is_empty());
    assert_eq!(cache.get_total_download_size().await.unwrap(), 0);
}

#[tokio::test]
async fn manifest_reads_distinguish_absent_and_corrupt() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let book = sample_book("li_1", "Dune", 1, 16);
    fx.catalog.add_book(book.clone()).await;

    assert_eq!(cache.read_manifest(&book.id).await, ManifestRead::Absent);

    cache.download(&book, fx.source()).await.unwrap().wait().await.unwrap();
    assert_eq!(
        cache.read_manifest(&book.id).await,
        ManifestRead::Present(book.clone())
    );

    fx.fs
        .write_file(
            &fx.root.join("li_1").join(MANIFEST_FILE),
            Bytes::from_static(b"{truncated"),
        )
        .await
        .unwrap();
    assert!(matches!(
        cache.read_manifest(&book.id).await,
        ManifestRead::Corrupt(_)
    ));
}

#[tokio::test]
async fn storage_sizes_come_from_disk() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let book = sample_book("li_1", "Dune", 2, 100);
    fx.catalog.add_book(book.clone()).await;
    let total = cache.download(&book, fx.source()).await.unwrap().wait().await.unwrap();

    let book_size = cache.get_book_storage_size(&book.id).await.unwrap();
    assert!(book_size >= total);
    assert_eq!(cache.get_total_download_size().await.unwrap(), book_size);

    let stats = cache.get_stats().await.unwrap();
    assert_eq!(stats.downloaded_books, 1);
    assert_eq!(stats.active_downloads, 0);
    assert_eq!(stats.total_bytes, book_size);
}

#[tokio::test]
async fn local_track_paths_follow_track_order() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let book = sample_book("li_1", "Dune", 2, 16);

    let paths = cache.local_track_paths(&book).await;
    assert_eq!(paths.len(), 2);
    assert!(paths[0].ends_with(book.tracks[0].local_file_name()));
    assert!(paths[1].starts_with(fx.root.join("li_1")));
}

#[tokio::test]
async fn shutdown_fails_queued_downloads() {
    let fx = Fixture::new();
    let cache = fx.cache().await;
    let book = sample_book("li_1", "Dune", 1, 16);
    fx.catalog.add_book(book.clone()).await;

    cache.shutdown();
    let handle = cache.download(&book, fx.source()).await.unwrap();
    assert!(handle.wait().await.is_err());
    assert!(!cache.is_downloading_book(&book.id).await);
}
