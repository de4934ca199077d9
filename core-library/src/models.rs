//! Domain models for the audiobook library
//!
//! Books are immutable snapshots of what the catalog server returned. A later
//! fetch for the same id replaces the whole value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// =============================================================================
// ID Types
// =============================================================================

/// Catalog-assigned book identifier. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id can be used as a single directory name.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(['/', '\\', '\0'])
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BookId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for BookId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// Chapter boundaries in seconds from the start of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub title: String,
}

impl Chapter {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}

/// One audio file of a book, in playback order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// 1-based position within the book.
    pub index: u32,
    /// Server file identifier used for streaming and download URLs.
    pub file_id: String,
    pub filename: String,
    /// Seconds.
    pub duration: f64,
    /// Bytes, when the server reports it.
    pub size: Option<u64>,
    /// Lowercase hex SHA-256, when the server reports it.
    pub sha256: Option<String>,
    pub mime_type: String,
}

impl AudioTrack {
    /// File name used inside the book's download directory.
    ///
    /// Prefixed with the index so two tracks sharing a server file name do
    /// not collide.
    pub fn local_file_name(&self) -> String {
        let name = self
            .filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            .unwrap_or("track");
        format!("{:03}-{}", self.index, name)
    }
}

/// An audiobook as returned by the catalog server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: Option<String>,
    pub chapters: Vec<Chapter>,
    /// Server-side cover reference, resolved by the image cache.
    pub cover: Option<String>,
    pub tracks: Vec<AudioTrack>,
    pub library_id: Option<String>,
    /// Seconds.
    pub duration: f64,
}

impl Book {
    /// Sum of the declared track sizes, or `None` if any size is unknown or the
    /// total does not fit in a `u64`.
    pub fn declared_size(&self) -> Option<u64> {
        self.tracks
            .iter()
            .map(|t| t.size)
            .try_fold(0u64, |acc, size| size.and_then(|s| acc.checked_add(s)))
    }

    /// Index of the chapter containing `position`, clamped to the last one.
    pub fn chapter_at(&self, position: f64) -> usize {
        self.chapters
            .iter()
            .position(|c| c.contains(position))
            .unwrap_or_else(|| self.chapters.len().saturating_sub(1))
    }
}

/// A library (collection of books) on the catalog server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    /// `book` or `podcast`.
    pub media_type: String,
}

/// Record of a fully downloaded book.
///
/// Written by the content cache only, as the last step of a verified
/// download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedBookRecord {
    pub book_id: BookId,
    pub directory: PathBuf,
    pub total_bytes: u64,
    pub completed: bool,
    /// Unix milliseconds.
    pub completed_at: i64,
    /// Local file names of the audio assets, in track order.
    pub files: Vec<String>,
}

/// Listening position of one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub book_id: BookId,
    pub chapter_index: usize,
    /// Seconds.
    pub current_time: f64,
    /// Seconds.
    pub duration: f64,
    /// Unix milliseconds; the last-write-wins key.
    pub last_played_at: i64,
    pub is_finished: bool,
}

impl PlaybackState {
    pub fn new(book_id: BookId, current_time: f64, duration: f64, last_played_at: i64) -> Self {
        Self {
            book_id,
            chapter_index: 0,
            current_time,
            duration,
            last_played_at,
            is_finished: false,
        }
    }

    pub fn with_chapter(mut self, chapter_index: usize) -> Self {
        self.chapter_index = chapter_index;
        self
    }

    pub fn finished(mut self, is_finished: bool) -> Self {
        self.is_finished = is_finished;
        self
    }

    /// Fraction listened, `0.0` when the duration is unknown.
    pub fn progress(&self) -> f64 {
        if self.duration <= 0.0 {
            0.0
        } else {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        }
    }

    /// Whether `self` should replace `other` under last-write-wins.
    pub fn supersedes(&self, other: &PlaybackState) -> bool {
        self.last_played_at > other.last_played_at
    }
}

/// A named position inside a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub book_id: BookId,
    /// Seconds.
    pub time: f64,
    pub title: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

impl Bookmark {
    /// Position rounded to milliseconds, the identity of a bookmark within a
    /// book.
    pub fn position_ms(&self) -> i64 {
        (self.time * 1000.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(index: u32, size: Option<u64>) -> AudioTrack {
        AudioTrack {
            index,
            file_id: format!("ino-{}", index),
            filename: format!("Part {}.mp3", index),
            duration: 600.0,
            size,
            sha256: None,
            mime_type: "audio/mpeg".to_string(),
        }
    }

    fn book(tracks: Vec<AudioTrack>) -> Book {
        Book {
            id: BookId::new("li_1"),
            title: "Dune".to_string(),
            author: Some("Frank Herbert".to_string()),
            chapters: vec![
                Chapter {
                    id: 0,
                    start: 0.0,
                    end: 600.0,
                    title: "One".to_string(),
                },
                Chapter {
                    id: 1,
                    start: 600.0,
                    end: 1200.0,
                    title: "Two".to_string(),
                },
            ],
            cover: None,
            tracks,
            library_id: Some("lib_main".to_string()),
            duration: 1200.0,
        }
    }

    #[test]
    fn progress_is_zero_without_duration() {
        let state = PlaybackState::new(BookId::new("a"), 42.0, 0.0, 1);
        assert_eq!(state.progress(), 0.0);

        let half = PlaybackState::new(BookId::new("a"), 50.0, 100.0, 1);
        assert!((half.progress() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn supersedes_is_strictly_newer() {
        let old = PlaybackState::new(BookId::new("a"), 10.0, 100.0, 1_000);
        let new = PlaybackState::new(BookId::new("a"), 5.0, 100.0, 2_000);
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
        assert!(!old.supersedes(&old.clone()));
    }

    #[test]
    fn declared_size_requires_every_track() {
        assert_eq!(book(vec![track(1, Some(10)), track(2, Some(5))]).declared_size(), Some(15));
        assert_eq!(book(vec![track(1, Some(10)), track(2, None)]).declared_size(), None);
    }

    #[test]
    fn declared_size_overflow_is_unknown() {
        let b = book(vec![track(1, Some(u64::MAX)), track(2, Some(1))]);
        assert_eq!(b.declared_size(), None);
    }

    #[test]
    fn chapter_lookup_clamps() {
        let b = book(vec![]);
        assert_eq!(b.chapter_at(0.0), 0);
        assert_eq!(b.chapter_at(700.0), 1);
        assert_eq!(b.chapter_at(5_000.0), 1);
    }

    #[test]
    fn local_file_name_strips_directories() {
        let mut t = track(7, None);
        t.filename = "../../etc/passwd".to_string();
        assert_eq!(t.local_file_name(), "007-passwd");
        t.filename = "disc1/".to_string();
        assert_eq!(t.local_file_name(), "007-track");
    }

    #[test]
    fn book_id_path_safety() {
        assert!(BookId::new("li_8f2c").is_path_safe());
        assert!(!BookId::new("../x").is_path_safe());
        assert!(!BookId::new("").is_path_safe());
        assert!(!BookId::new("..").is_path_safe());
    }

    #[test]
    fn book_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&BookId::new("li_1")).unwrap();
        assert_eq!(json, "\"li_1\"");
    }
}
