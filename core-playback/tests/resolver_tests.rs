//! Mode resolution and player loading across connectivity states.

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::network::{NetworkInfo, NetworkStatus, NetworkType};
use bridge_traits::player::{AudioSource, PlayerConfiguration, PlayerLoadRequest, PlayerService};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::testing::{InMemorySettingsStore, RecordingPlayer, ScriptedNetworkMonitor};
use core_library::testing::{sample_book, FakeCatalog};
use core_library::{Book, PlaybackState};
use core_playback::cache::{CacheConfig, ContentCache, MANIFEST_FILE};
use core_playback::{
    ConnectivityMonitor, PlaybackError, PlaybackMode, PlaybackModeResolver, PlaybackStateStore,
};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use mockall::mock;
use std::sync::Arc;
use tempfile::TempDir;

mock! {
    Player {}

    #[async_trait]
    impl PlayerService for Player {
        async fn configure(&self, configuration: PlayerConfiguration) -> BridgeResult<()>;
        async fn load(&self, request: PlayerLoadRequest) -> BridgeResult<()>;
        async fn play(&self) -> BridgeResult<()>;
        async fn pause(&self) -> BridgeResult<()>;
        async fn seek(&self, position: f64) -> BridgeResult<()>;
        async fn next_chapter(&self) -> BridgeResult<()>;
        async fn previous_chapter(&self) -> BridgeResult<()>;
        async fn current_time(&self) -> f64;
        async fn duration(&self) -> f64;
        async fn is_playing(&self) -> bool;
        async fn current_chapter_index(&self) -> usize;
        async fn loaded_book_id(&self) -> Option<String>;
    }
}

#[derive(Clone, Copy, Debug)]
enum Link {
    /// Monitoring never started.
    Unknown,
    Offline,
    /// Device online, catalog answering.
    Reachable,
    /// Device online, catalog down.
    ServerDown,
}

struct Harness {
    _dir: TempDir,
    fs: Arc<TokioFileSystem>,
    catalog: Arc<FakeCatalog>,
    cache: Arc<ContentCache>,
    store: Arc<PlaybackStateStore>,
    player: Arc<RecordingPlayer>,
    bus: EventBus,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(TokioFileSystem::rooted_at(dir.path()));
        let cache = Arc::new(
            ContentCache::new(CacheConfig::new(dir.path().join("downloads")), fs.clone()).unwrap(),
        );
        cache.initialize().await.unwrap();

        Self {
            _dir: dir,
            fs,
            catalog: Arc::new(FakeCatalog::new()),
            cache,
            store: Arc::new(PlaybackStateStore::new(Arc::new(InMemorySettingsStore::new()))),
            player: Arc::new(RecordingPlayer::new()),
            bus: EventBus::new(64),
        }
    }

    async fn catalog_book(&self, id: &str, title: &str) -> Book {
        let book = sample_book(id, title, 2, 32);
        self.catalog.add_book(book.clone()).await;
        book
    }

    async fn downloaded_book(&self, id: &str, title: &str) -> Book {
        let book = self.catalog_book(id, title).await;
        self.cache
            .download(&book, self.catalog.clone())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        self.catalog.reset_calls().await;
        book
    }

    async fn monitor(&self, link: Link) -> Arc<ConnectivityMonitor> {
        let initial = match link {
            Link::Offline | Link::Unknown => NetworkInfo::offline(),
            Link::Reachable | Link::ServerDown => NetworkInfo::online(NetworkType::WiFi),
        };
        let monitor = Arc::new(
            ConnectivityMonitor::new(Arc::new(ScriptedNetworkMonitor::new(initial)))
                .with_catalog(self.catalog.clone()),
        );
        if matches!(link, Link::ServerDown) {
            self.catalog.set_offline(true);
        }

        match link {
            Link::Unknown => {}
            Link::Offline => {
                monitor.start_monitoring();
                monitor
                    .subscribe()
                    .wait_for(|s| *s == NetworkStatus::Offline)
                    .await
                    .unwrap();
            }
            Link::Reachable => {
                monitor.start_monitoring();
                monitor.subscribe_reachability().wait_for(|r| *r).await.unwrap();
            }
            Link::ServerDown => {
                monitor.start_monitoring();
                monitor
                    .subscribe()
                    .wait_for(|s| *s == NetworkStatus::Online)
                    .await
                    .unwrap();
            }
        }
        self.catalog.reset_calls().await;
        monitor
    }

    fn resolver_with(
        &self,
        monitor: Arc<ConnectivityMonitor>,
        player: Arc<dyn PlayerService>,
    ) -> PlaybackModeResolver {
        PlaybackModeResolver::new(
            self.cache.clone(),
            monitor,
            self.catalog.clone(),
            player,
            self.store.clone(),
        )
        .with_event_bus(self.bus.clone())
    }

    async fn resolver(&self, link: Link) -> PlaybackModeResolver {
        let monitor = self.monitor(link).await;
        self.resolver_with(monitor, self.player.clone())
    }
}

fn playback_events(rx: &mut core_async::sync::broadcast::Receiver<CoreEvent>) -> Vec<PlaybackEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Playback(event) = event {
            events.push(event);
        }
    }
    events
}

#[tokio::test]
async fn downloaded_book_plays_offline_regardless_of_connectivity() {
    for link in [Link::Unknown, Link::Offline, Link::Reachable, Link::ServerDown] {
        let h = Harness::new().await;
        let book = h.downloaded_book("li_1", "Dune").await;
        let resolver = h.resolver(link).await;

        assert_eq!(resolver.resolve_mode(&book.id).await, PlaybackMode::Offline);
        let resolved = resolver.play(&book, false).await.unwrap();

        assert_eq!(resolved.mode, PlaybackMode::Offline, "{:?}", link);
        assert_eq!(h.catalog.network_calls().await, 0, "{:?}", link);

        let loads = h.player.loads().await;
        let request = loads.last().unwrap();
        assert!(request.is_offline);
        assert_eq!(request.tracks.len(), 2);
        for track in &request.tracks {
            assert!(matches!(track.source, AudioSource::LocalFile { .. }));
        }
        assert_eq!(request.tracks[1].start_offset, 600.0);
    }
}

#[tokio::test]
async fn not_downloaded_streams_when_server_is_reachable() {
    let h = Harness::new().await;
    let book = h.catalog_book("li_2", "Hyperion").await;
    let resolver = h.resolver(Link::Reachable).await;
    let mut events = h.bus.subscribe();

    let resolved = resolver.play(&book, false).await.unwrap();

    assert_eq!(resolved.mode, PlaybackMode::Online);
    assert_eq!(h.catalog.calls("fetch_book_details").await, 1);

    let configs = h.player.configurations().await;
    assert_eq!(configs[0].base_url, "http://catalog.test");
    assert_eq!(configs[0].auth_token, "test-token");

    let request = &h.player.loads().await[0];
    assert!(!request.is_offline);
    match &request.tracks[0].source {
        AudioSource::RemoteStream { url, headers } => {
            assert_eq!(url, "http://catalog.test/api/items/li_2/file/li_2-ino-1");
            assert_eq!(
                headers.get("Authorization").map(String::as_str),
                Some("Bearer test-token")
            );
        }
        other => panic!("expected a remote stream, got {:?}", other),
    }

    let events = playback_events(&mut events);
    assert_eq!(
        events[0],
        PlaybackEvent::ModeResolved {
            book_id: "li_2".to_string(),
            mode: "online".to_string(),
        }
    );
    assert!(matches!(events[1], PlaybackEvent::Loaded { offline: false, .. }));
}

#[tokio::test]
async fn offline_and_not_downloaded_fails_without_network() {
    let h = Harness::new().await;
    let book = h.catalog_book("li_3", "Solaris").await;
    let resolver = h.resolver(Link::Offline).await;
    let mut events = h.bus.subscribe();

    let err = resolver.play(&book, true).await.unwrap_err();

    assert!(matches!(err, PlaybackError::NotAvailableOffline(ref title) if title == "Solaris"));
    assert_eq!(err.to_string(), "\"Solaris\" is not available offline");
    assert_eq!(h.catalog.network_calls().await, 0);
    assert_eq!(h.catalog.calls("ping").await, 0);
    assert!(h.player.loads().await.is_empty());
    assert!(playback_events(&mut events)
        .iter()
        .any(|e| matches!(e, PlaybackEvent::Unavailable { .. })));
}

#[tokio::test]
async fn online_with_unreachable_server_is_unavailable() {
    let h = Harness::new().await;
    let book = h.catalog_book("li_4", "Ubik").await;
    let resolver = h.resolver(Link::ServerDown).await;

    assert_eq!(resolver.resolve_mode(&book.id).await, PlaybackMode::Unavailable);
    let err = resolver.play(&book, false).await.unwrap_err();
    assert!(matches!(err, PlaybackError::NotAvailableOffline(_)));
    assert_eq!(h.catalog.calls("fetch_book_details").await, 0);
}

#[tokio::test]
async fn metadata_fetch_failure_is_reported() {
    let h = Harness::new().await;
    // Reachable, but the catalog does not know the book.
    let book = sample_book("li_missing", "Ghost", 1, 8);
    let resolver = h.resolver(Link::Reachable).await;

    let err = resolver.play(&book, false).await.unwrap_err();

    assert!(matches!(err, PlaybackError::FetchFailed(_)));
    assert_eq!(h.catalog.calls("fetch_book_details").await, 1);
    assert!(h.player.loads().await.is_empty());
}

#[tokio::test]
async fn missing_manifest_falls_back_to_catalog_when_online() {
    let h = Harness::new().await;
    let book = h.downloaded_book("li_5", "Neuromancer").await;
    let manifest = h.cache.root().join("li_5").join(MANIFEST_FILE);
    h.fs.delete_file(&manifest).await.unwrap();
    let resolver = h.resolver(Link::Reachable).await;

    let resolved = resolver.play(&book, false).await.unwrap();

    assert_eq!(resolved.mode, PlaybackMode::Offline);
    assert_eq!(resolved.book.title, "Neuromancer");
    assert_eq!(h.catalog.calls("fetch_book_details").await, 1);
    assert!(h.player.loads().await[0].is_offline);
}

#[tokio::test]
async fn missing_manifest_while_offline_is_an_error() {
    let h = Harness::new().await;
    let book = h.downloaded_book("li_6", "Anathem").await;
    let manifest = h.cache.root().join("li_6").join(MANIFEST_FILE);
    h.fs.delete_file(&manifest).await.unwrap();
    let resolver = h.resolver(Link::Offline).await;

    let err = resolver.play(&book, false).await.unwrap_err();

    assert!(matches!(err, PlaybackError::LocalMetadataMissing(ref id) if id == "li_6"));
    assert_eq!(h.catalog.network_calls().await, 0);
}

#[tokio::test]
async fn restore_state_resumes_at_saved_position() {
    let h = Harness::new().await;
    let book = h.downloaded_book("li_7", "Foundation").await;
    h.store
        .save(PlaybackState::new(book.id.clone(), 900.0, 1200.0, 1_000).with_chapter(1))
        .await
        .unwrap();
    let resolver = h.resolver(Link::Offline).await;

    let resolved = resolver.play(&book, true).await.unwrap();

    assert_eq!(resolved.start_position, Some(900.0));
    assert_eq!(resolved.start_chapter, Some(1));
    let request = &h.player.loads().await[0];
    assert_eq!(request.start_position, Some(900.0));
    assert_eq!(request.start_chapter, Some(1));
}

#[tokio::test]
async fn finished_or_ignored_state_starts_from_the_beginning() {
    let h = Harness::new().await;
    let book = h.downloaded_book("li_8", "Dune Messiah").await;
    h.store
        .save(
            PlaybackState::new(book.id.clone(), 1199.5, 1200.0, 1_000)
                .with_chapter(1)
                .finished(true),
        )
        .await
        .unwrap();
    let resolver = h.resolver(Link::Offline).await;

    let resolved = resolver.play(&book, true).await.unwrap();
    assert_eq!(resolved.start_position, None);

    let other = h.downloaded_book("li_9", "Children of Dune").await;
    h.store
        .save(PlaybackState::new(other.id.clone(), 300.0, 1200.0, 1_000))
        .await
        .unwrap();
    let resolved = resolver.play(&other, false).await.unwrap();
    assert_eq!(resolved.start_position, None);
    assert_eq!(resolved.start_chapter, None);
}

#[tokio::test]
async fn player_failure_is_surfaced() {
    let h = Harness::new().await;
    let book = h.downloaded_book("li_10", "Blindsight").await;

    let mut player = MockPlayer::new();
    player.expect_configure().times(1).returning(|_| Ok(()));
    player
        .expect_load()
        .times(1)
        .returning(|_| Err(BridgeError::OperationFailed("decoder unavailable".to_string())));

    let monitor = h.monitor(Link::Offline).await;
    let resolver = h.resolver_with(monitor, Arc::new(player));

    let err = resolver.play(&book, false).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Player(ref message) if message.contains("decoder unavailable")));
}
