//! In-memory catalog for tests.
//!
//! Enabled with the `test-support` feature.

use crate::catalog::{CatalogSession, ContentSource, RemoteCatalog};
use crate::error::{LibraryError, Result};
use crate::models::{AudioTrack, Book, BookId, Bookmark, Chapter, Library, PlaybackState};
use async_trait::async_trait;
use bytes::Bytes;
use core_async::sync::Mutex;
use core_async::time::{sleep, Duration};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct CatalogState {
    books: HashMap<BookId, Book>,
    libraries: Vec<(Library, Vec<BookId>, Option<u64>)>,
    progress: BTreeMap<BookId, PlaybackState>,
    bookmarks: Vec<Bookmark>,
    pushed: Vec<PlaybackState>,
    content: HashMap<(BookId, u32), Bytes>,
    failing_tracks: HashSet<(BookId, u32)>,
    calls: BTreeMap<&'static str, usize>,
}

/// `RemoteCatalog` and `ContentSource` over in-memory data.
///
/// Every trait call is counted. While offline every call fails with
/// `LibraryError::Network`; `ping` reports `false` instead.
#[derive(Clone)]
pub struct FakeCatalog {
    session: CatalogSession,
    state: Arc<Mutex<CatalogState>>,
    offline: Arc<AtomicBool>,
    track_delay: Arc<Mutex<Option<Duration>>>,
    ping_delay: Arc<Mutex<Option<Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for FakeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self {
            session: CatalogSession::new("http://catalog.test", Some("test-token".to_string())),
            state: Arc::new(Mutex::new(CatalogState::default())),
            offline: Arc::new(AtomicBool::new(false)),
            track_delay: Arc::new(Mutex::new(None)),
            ping_delay: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Registers a book and deterministic content for each of its tracks.
    pub async fn add_book(&self, book: Book) {
        let mut state = self.state.lock().await;
        for track in &book.tracks {
            let len = track.size.unwrap_or(64) as usize;
            let fill = (track.index % 251) as u8;
            state
                .content
                .insert((book.id.clone(), track.index), Bytes::from(vec![fill; len]));
        }
        state.books.insert(book.id.clone(), book);
    }

    pub async fn set_track_content(&self, book_id: &BookId, index: u32, content: Bytes) {
        self.state
            .lock()
            .await
            .content
            .insert((book_id.clone(), index), content);
    }

    /// `reported_count` overrides the stats count (defaults to the id count).
    pub async fn add_library(&self, library: Library, ids: Vec<BookId>, reported_count: Option<u64>) {
        self.state
            .lock()
            .await
            .libraries
            .push((library, ids, reported_count));
    }

    pub async fn set_remote_progress(&self, state: PlaybackState) {
        self.state
            .lock()
            .await
            .progress
            .insert(state.book_id.clone(), state);
    }

    pub async fn add_remote_bookmark(&self, bookmark: Bookmark) {
        self.state.lock().await.bookmarks.push(bookmark);
    }

    pub async fn fail_track(&self, book_id: &BookId, index: u32) {
        self.state
            .lock()
            .await
            .failing_tracks
            .insert((book_id.clone(), index));
    }

    pub async fn set_track_delay(&self, delay: Option<Duration>) {
        *self.track_delay.lock().await = delay;
    }

    pub async fn set_ping_delay(&self, delay: Option<Duration>) {
        *self.ping_delay.lock().await = delay;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Everything received through `push_playback_progress*`.
    pub async fn pushed(&self) -> Vec<PlaybackState> {
        self.state.lock().await.pushed.clone()
    }

    pub async fn calls(&self, method: &str) -> usize {
        self.state.lock().await.calls.get(method).copied().unwrap_or(0)
    }

    /// Total calls that would have hit the network, `ping` excluded.
    pub async fn network_calls(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(name, _)| **name != "ping")
            .map(|(_, count)| count)
            .sum()
    }

    pub async fn reset_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Highest number of `fetch_track` calls observed running at once.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn record(&self, method: &'static str) -> Result<()> {
        *self.state.lock().await.calls.entry(method).or_default() += 1;
        if self.offline.load(Ordering::SeqCst) {
            return Err(LibraryError::Network("catalog unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCatalog for FakeCatalog {
    fn session(&self) -> &CatalogSession {
        &self.session
    }

    async fn fetch_book_details(&self, id: &BookId) -> Result<Book> {
        self.record("fetch_book_details").await?;
        self.state
            .lock()
            .await
            .books
            .get(id)
            .cloned()
            .ok_or_else(|| LibraryError::Remote {
                status: 404,
                message: format!("item {} not found", id),
            })
    }

    async fn fetch_libraries(&self) -> Result<Vec<Library>> {
        self.record("fetch_libraries").await?;
        Ok(self
            .state
            .lock()
            .await
            .libraries
            .iter()
            .map(|(library, _, _)| library.clone())
            .collect())
    }

    async fn fetch_library_stats(&self, library_id: &str) -> Result<u64> {
        self.record("fetch_library_stats").await?;
        let state = self.state.lock().await;
        state
            .libraries
            .iter()
            .find(|(library, _, _)| library.id == library_id)
            .map(|(_, ids, reported)| reported.unwrap_or(ids.len() as u64))
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "library".to_string(),
                id: library_id.to_string(),
            })
    }

    async fn fetch_library_book_ids(&self, library_id: &str) -> Result<Vec<BookId>> {
        self.record("fetch_library_book_ids").await?;
        let state = self.state.lock().await;
        state
            .libraries
            .iter()
            .find(|(library, _, _)| library.id == library_id)
            .map(|(_, ids, _)| ids.clone())
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "library".to_string(),
                id: library_id.to_string(),
            })
    }

    async fn push_playback_progress(&self, state: &PlaybackState) -> Result<()> {
        self.record("push_playback_progress").await?;
        let mut inner = self.state.lock().await;
        inner.pushed.push(state.clone());
        inner.progress.insert(state.book_id.clone(), state.clone());
        Ok(())
    }

    async fn push_playback_progress_batch(&self, states: &[PlaybackState]) -> Result<()> {
        self.record("push_playback_progress_batch").await?;
        let mut inner = self.state.lock().await;
        for state in states {
            inner.pushed.push(state.clone());
            inner.progress.insert(state.book_id.clone(), state.clone());
        }
        Ok(())
    }

    async fn pull_playback_progress(&self) -> Result<Vec<PlaybackState>> {
        self.record("pull_playback_progress").await?;
        Ok(self.state.lock().await.progress.values().cloned().collect())
    }

    async fn pull_bookmarks(&self) -> Result<Vec<Bookmark>> {
        self.record("pull_bookmarks").await?;
        Ok(self.state.lock().await.bookmarks.clone())
    }

    async fn ping(&self) -> Result<bool> {
        *self.state.lock().await.calls.entry("ping").or_default() += 1;
        let delay = *self.ping_delay.lock().await;
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        Ok(!self.offline.load(Ordering::SeqCst))
    }

    fn stream_url(&self, book: &Book, track: &AudioTrack) -> String {
        format!(
            "{}/api/items/{}/file/{}",
            self.session.base_url, book.id, track.file_id
        )
    }
}

#[async_trait]
impl ContentSource for FakeCatalog {
    async fn fetch_track(&self, book: &Book, track: &AudioTrack) -> Result<Bytes> {
        self.record("fetch_track").await?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.track_delay.lock().await;
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let state = self.state.lock().await;
        let key = (book.id.clone(), track.index);
        if state.failing_tracks.contains(&key) {
            return Err(LibraryError::Remote {
                status: 500,
                message: format!("track {} failed", track.index),
            });
        }
        state.content.get(&key).cloned().ok_or_else(|| LibraryError::Remote {
            status: 404,
            message: format!("no content for track {}", track.index),
        })
    }
}

/// Book with `tracks` tracks of `track_size` bytes and one chapter per
/// track.
pub fn sample_book(id: &str, title: &str, tracks: u32, track_size: u64) -> Book {
    let audio: Vec<AudioTrack> = (1..=tracks)
        .map(|index| AudioTrack {
            index,
            file_id: format!("{}-ino-{}", id, index),
            filename: format!("{} - Part {:02}.mp3", title, index),
            duration: 600.0,
            size: Some(track_size),
            sha256: None,
            mime_type: "audio/mpeg".to_string(),
        })
        .collect();
    let chapters = (0..tracks)
        .map(|i| Chapter {
            id: i,
            start: f64::from(i) * 600.0,
            end: f64::from(i + 1) * 600.0,
            title: format!("Chapter {}", i + 1),
        })
        .collect();

    Book {
        id: BookId::new(id),
        title: title.to_string(),
        author: Some("Test Author".to_string()),
        chapters,
        cover: Some(format!("/metadata/items/{}/cover.jpg", id)),
        tracks: audio,
        library_id: Some("lib_main".to_string()),
        duration: f64::from(tracks) * 600.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_calls_and_fails_offline() {
        let catalog = FakeCatalog::new();
        catalog.add_book(sample_book("A", "Alpha", 2, 16)).await;

        let book = catalog.fetch_book_details(&BookId::new("A")).await.unwrap();
        let bytes = catalog.fetch_track(&book, &book.tracks[0]).await.unwrap();
        assert_eq!(bytes.len(), 16);

        catalog.set_offline(true);
        assert!(matches!(
            catalog.fetch_book_details(&BookId::new("A")).await,
            Err(LibraryError::Network(_))
        ));
        assert!(!catalog.ping().await.unwrap());

        assert_eq!(catalog.calls("fetch_book_details").await, 2);
        assert_eq!(catalog.network_calls().await, 3);
    }

    #[tokio::test]
    async fn stats_can_disagree_with_listing() {
        let catalog = FakeCatalog::new();
        catalog
            .add_library(
                Library {
                    id: "lib".to_string(),
                    name: "Main".to_string(),
                    media_type: "book".to_string(),
                },
                vec![BookId::new("A")],
                Some(3),
            )
            .await;
        assert_eq!(catalog.fetch_library_stats("lib").await.unwrap(), 3);
        assert_eq!(catalog.fetch_library_book_ids("lib").await.unwrap().len(), 1);
    }
}
