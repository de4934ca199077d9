//! Player bridge trait and supporting types.
//!
//! Decoding and audio transport belong to the host. The core only configures
//! the player, hands it a book to load, issues transport commands, and reads
//! back the position it needs to persist.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;

/// Where the player pulls audio from.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Downloaded file on local storage.
    LocalFile { path: PathBuf },
    /// Remote HTTP(S) stream fetched by the host.
    RemoteStream {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl AudioSource {
    pub fn is_remote(&self) -> bool {
        matches!(self, AudioSource::RemoteStream { .. })
    }
}

/// One audio track of a book as the player sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerTrack {
    pub source: AudioSource,
    /// Offset of this track within the whole book, in seconds.
    pub start_offset: f64,
    pub duration: f64,
    pub mime_type: Option<String>,
}

/// Chapter marker surfaced to the player for chapter navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterMarker {
    pub start: f64,
    pub end: f64,
    pub title: String,
}

/// Session-wide player settings.
///
/// `offline_root` is the cache provider: the directory under which local
/// sources live. Base URL and token are opaque strings supplied by the host's
/// session collaborator.
#[derive(Clone, PartialEq)]
pub struct PlayerConfiguration {
    pub base_url: String,
    pub auth_token: String,
    pub offline_root: Option<PathBuf>,
}

impl std::fmt::Debug for PlayerConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerConfiguration")
            .field("base_url", &self.base_url)
            .field("auth_token", &"<redacted>")
            .field("offline_root", &self.offline_root)
            .finish()
    }
}

/// Everything the player needs to start a book.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerLoadRequest {
    pub book_id: String,
    pub title: String,
    pub author: Option<String>,
    pub tracks: Vec<PlayerTrack>,
    pub chapters: Vec<ChapterMarker>,
    pub is_offline: bool,
    /// Position to resume from, in seconds. `None` starts at the beginning.
    pub start_position: Option<f64>,
    pub start_chapter: Option<usize>,
}

/// Host audio player.
///
/// # Example
///
/// ```ignore
/// async fn resume(player: &dyn PlayerService, request: PlayerLoadRequest) -> Result<()> {
///     player.load(request).await?;
///     player.play().await
/// }
/// ```
#[async_trait::async_trait]
pub trait PlayerService: Send + Sync {
    /// Apply session-wide settings before any load.
    async fn configure(&self, configuration: PlayerConfiguration) -> Result<()>;

    /// Replace whatever is loaded with the given book.
    async fn load(&self, request: PlayerLoadRequest) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    /// Seek to an absolute book position in seconds.
    async fn seek(&self, position: f64) -> Result<()>;

    async fn next_chapter(&self) -> Result<()>;

    async fn previous_chapter(&self) -> Result<()>;

    /// Current book position in seconds.
    async fn current_time(&self) -> f64;

    /// Total duration of the loaded book in seconds.
    async fn duration(&self) -> f64;

    async fn is_playing(&self) -> bool;

    async fn current_chapter_index(&self) -> usize;

    /// Id of the loaded book, if any.
    async fn loaded_book_id(&self) -> Option<String>;
}
