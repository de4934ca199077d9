//! # Playback Mode Resolver
//!
//! Decides where a book plays from and hands it to the host player.
//!
//! ```text
//! resolving ──> offline      downloaded (wins over connectivity)
//!           ├─> online       device online and server reachable
//!           └─> unavailable  neither; fails with NotAvailableOffline
//! ```
//!
//! Metadata comes from the local manifest for downloaded books and from the
//! catalog otherwise. A call makes at most one catalog metadata fetch, holds
//! no lock across it and never writes to the cache or the state store, so
//! dropping the future midway leaves nothing behind.

use crate::cache::{ContentCache, ManifestRead};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{PlaybackError, Result};
use crate::state::PlaybackStateStore;
use bridge_traits::player::{
    AudioSource, ChapterMarker, PlayerConfiguration, PlayerLoadRequest, PlayerService, PlayerTrack,
};
use core_library::{Book, BookId, RemoteCatalog};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where a book is played from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackMode {
    Offline,
    Online,
    Unavailable,
}

impl PlaybackMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackMode::Offline => "offline",
            PlaybackMode::Online => "online",
            PlaybackMode::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision rule, without any I/O.
pub fn decide_mode(downloaded: bool, device_online: bool, server_reachable: bool) -> PlaybackMode {
    if downloaded {
        PlaybackMode::Offline
    } else if device_online && server_reachable {
        PlaybackMode::Online
    } else {
        PlaybackMode::Unavailable
    }
}

/// Outcome of a successful [`PlaybackModeResolver::play`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlayback {
    pub mode: PlaybackMode,
    /// Metadata the player was loaded with.
    pub book: Book,
    pub start_position: Option<f64>,
    pub start_chapter: Option<usize>,
}

pub struct PlaybackModeResolver {
    cache: Arc<ContentCache>,
    connectivity: Arc<ConnectivityMonitor>,
    catalog: Arc<dyn RemoteCatalog>,
    player: Arc<dyn PlayerService>,
    state_store: Arc<PlaybackStateStore>,
    event_bus: Option<EventBus>,
}

impl PlaybackModeResolver {
    pub fn new(
        cache: Arc<ContentCache>,
        connectivity: Arc<ConnectivityMonitor>,
        catalog: Arc<dyn RemoteCatalog>,
        player: Arc<dyn PlayerService>,
        state_store: Arc<PlaybackStateStore>,
    ) -> Self {
        Self {
            cache,
            connectivity,
            catalog,
            player,
            state_store,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Resolve the mode for `book` without touching the player.
    pub async fn resolve_mode(&self, book_id: &BookId) -> PlaybackMode {
        if self.cache.is_book_downloaded(book_id).await {
            return PlaybackMode::Offline;
        }
        let online = self.connectivity.is_online();
        decide_mode(false, online, online && self.server_reachable().await)
    }

    /// Device online and catalog reachable, probing once if no probe has
    /// succeeded yet.
    async fn connection_usable(&self) -> bool {
        self.connectivity.is_online() && self.server_reachable().await
    }

    async fn server_reachable(&self) -> bool {
        self.connectivity.is_server_reachable()
            || self.connectivity.check_server_reachability().await
    }

    /// Resolve, configure the player and load `book`.
    ///
    /// `book` only needs its id and title; full metadata is read from the
    /// local manifest or fetched. With `restore_state`, playback starts at
    /// the saved position.
    #[instrument(skip(self, book), fields(book_id = %book.id))]
    pub async fn play(&self, book: &Book, restore_state: bool) -> Result<ResolvedPlayback> {
        let book_id = &book.id;

        let (mode, metadata) = if self.cache.is_book_downloaded(book_id).await {
            let metadata = match self.cache.read_manifest(book_id).await {
                ManifestRead::Present(metadata) => metadata,
                other => {
                    warn!(manifest = ?other, "Local manifest unusable");
                    if !self.connection_usable().await {
                        return Err(PlaybackError::LocalMetadataMissing(book_id.to_string()));
                    }
                    self.fetch_metadata(book_id).await?
                }
            };
            (decide_mode(true, false, false), metadata)
        } else {
            let online = self.connectivity.is_online();
            let reachable = online && self.server_reachable().await;
            match decide_mode(false, online, reachable) {
                PlaybackMode::Online => (PlaybackMode::Online, self.fetch_metadata(book_id).await?),
                mode => {
                    info!(online, reachable, "Book not downloaded and no usable connection");
                    self.emit(PlaybackEvent::ModeResolved {
                        book_id: book_id.to_string(),
                        mode: mode.as_str().to_string(),
                    });
                    self.emit(PlaybackEvent::Unavailable {
                        book_id: book_id.to_string(),
                        title: book.title.clone(),
                    });
                    return Err(PlaybackError::NotAvailableOffline(book.title.clone()));
                }
            }
        };

        info!(mode = %mode, "Playback mode resolved");
        self.emit(PlaybackEvent::ModeResolved {
            book_id: book_id.to_string(),
            mode: mode.as_str().to_string(),
        });

        let (start_position, start_chapter) = if restore_state {
            self.saved_position(&metadata).await
        } else {
            (None, None)
        };

        let request = self
            .build_request(&metadata, mode, start_position, start_chapter)
            .await;

        let session = self.catalog.session();
        self.player
            .configure(PlayerConfiguration {
                base_url: session.base_url.clone(),
                auth_token: session.token.clone().unwrap_or_default(),
                offline_root: Some(self.cache.root().to_path_buf()),
            })
            .await
            .map_err(|e| PlaybackError::Player(e.to_string()))?;
        self.player
            .load(request)
            .await
            .map_err(|e| PlaybackError::Player(e.to_string()))?;

        self.emit(PlaybackEvent::Loaded {
            book_id: book_id.to_string(),
            title: metadata.title.clone(),
            offline: mode == PlaybackMode::Offline,
            start_position_ms: start_position.map(|p| (p * 1000.0).round() as u64),
        });

        Ok(ResolvedPlayback {
            mode,
            book: metadata,
            start_position,
            start_chapter,
        })
    }

    async fn fetch_metadata(&self, book_id: &BookId) -> Result<Book> {
        debug!("Fetching book details from catalog");
        self.catalog
            .fetch_book_details(book_id)
            .await
            .map_err(|e| {
                warn!(error = %e, "Book details fetch failed");
                PlaybackError::FetchFailed(e)
            })
    }

    /// Saved position to resume from. Finished books start over; an
    /// unreadable record is ignored.
    async fn saved_position(&self, book: &Book) -> (Option<f64>, Option<usize>) {
        match self.state_store.load(&book.id).await {
            Ok(Some(state)) if !state.is_finished && state.current_time > 0.0 => {
                let chapter = (!book.chapters.is_empty()).then(|| book.chapter_at(state.current_time));
                (Some(state.current_time), chapter)
            }
            Ok(_) => (None, None),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable saved position");
                (None, None)
            }
        }
    }

    async fn build_request(
        &self,
        book: &Book,
        mode: PlaybackMode,
        start_position: Option<f64>,
        start_chapter: Option<usize>,
    ) -> PlayerLoadRequest {
        let sources: Vec<AudioSource> = if mode == PlaybackMode::Offline {
            self.cache
                .local_track_paths(book)
                .await
                .into_iter()
                .map(|path| AudioSource::LocalFile { path })
                .collect()
        } else {
            let mut headers = HashMap::new();
            if let Some(token) = &self.catalog.session().token {
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
            }
            book.tracks
                .iter()
                .map(|track| AudioSource::RemoteStream {
                    url: self.catalog.stream_url(book, track),
                    headers: headers.clone(),
                })
                .collect()
        };

        let mut offset = 0.0;
        let tracks = book
            .tracks
            .iter()
            .zip(sources)
            .map(|(track, source)| {
                let start_offset = offset;
                offset += track.duration;
                PlayerTrack {
                    source,
                    start_offset,
                    duration: track.duration,
                    mime_type: Some(track.mime_type.clone()),
                }
            })
            .collect();

        PlayerLoadRequest {
            book_id: book.id.to_string(),
            title: book.title.clone(),
            author: book.author.clone(),
            tracks,
            chapters: book
                .chapters
                .iter()
                .map(|c| ChapterMarker {
                    start: c.start,
                    end: c.end,
                    title: c.title.clone(),
                })
                .collect(),
            is_offline: mode == PlaybackMode::Offline,
            start_position,
            start_chapter,
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Playback(event)).ok();
        }
    }
}
