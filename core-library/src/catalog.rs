//! Remote catalog abstractions.
//!
//! The core never talks HTTP directly; it goes through [`RemoteCatalog`] for
//! metadata and progress, and [`ContentSource`] for audio bytes. Both are
//! implemented by `provider-catalog` and by [`crate::testing::FakeCatalog`].

use crate::error::Result;
use crate::models::{AudioTrack, Book, BookId, Bookmark, Library, PlaybackState};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Server location and credential, both opaque to the core.
#[derive(Clone, PartialEq, Eq)]
pub struct CatalogSession {
    pub base_url: String,
    pub token: Option<String>,
}

impl CatalogSession {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }
}

impl fmt::Debug for CatalogSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogSession")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Metadata and progress operations against the catalog server.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    fn session(&self) -> &CatalogSession;

    /// Full book metadata including tracks and chapters.
    async fn fetch_book_details(&self, id: &BookId) -> Result<Book>;

    async fn fetch_libraries(&self) -> Result<Vec<Library>>;

    /// Number of items the server reports for a library.
    async fn fetch_library_stats(&self, library_id: &str) -> Result<u64>;

    /// Ids of every item in a library, across all pages.
    async fn fetch_library_book_ids(&self, library_id: &str) -> Result<Vec<BookId>>;

    async fn push_playback_progress(&self, state: &PlaybackState) -> Result<()>;

    /// Push several states in one request where the server supports it.
    async fn push_playback_progress_batch(&self, states: &[PlaybackState]) -> Result<()> {
        for state in states {
            self.push_playback_progress(state).await?;
        }
        Ok(())
    }

    async fn pull_playback_progress(&self) -> Result<Vec<PlaybackState>>;

    async fn pull_bookmarks(&self) -> Result<Vec<Bookmark>>;

    /// `Ok(true)` when the server answered its health check.
    async fn ping(&self) -> Result<bool>;

    /// URL the player streams `track` from.
    fn stream_url(&self, book: &Book, track: &AudioTrack) -> String;
}

/// Source of downloadable audio content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_track(&self, book: &Book, track: &AudioTrack) -> Result<Bytes>;
}
