//! Catalog API wire types
//!
//! Shapes of the JSON documents exchanged with the server, converted into
//! `core_library` models at the edge.

use core_library::{AudioTrack, Book, BookId, Bookmark, Chapter, Library, PlaybackState};
use serde::{Deserialize, Serialize};

/// `GET /api/items/{id}?expanded=1`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    pub id: String,
    pub library_id: Option<String>,
    pub media: BookMedia,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMedia {
    pub metadata: BookMetadata,
    pub cover_path: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterDto>,
    #[serde(default)]
    pub audio_files: Vec<AudioFileDto>,
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    pub title: Option<String>,
    pub author_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChapterDto {
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFileDto {
    pub index: u32,
    pub ino: String,
    pub metadata: FileMetadataDto,
    #[serde(default)]
    pub duration: f64,
    pub mime_type: Option<String>,
    /// Excluded files are not part of playback.
    #[serde(default)]
    pub exclude: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataDto {
    pub filename: String,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

/// `GET /api/libraries`
#[derive(Debug, Deserialize)]
pub struct LibrariesResponse {
    pub libraries: Vec<LibraryDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDto {
    pub id: String,
    pub name: String,
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

fn default_media_type() -> String {
    "book".to_string()
}

/// `GET /api/libraries/{id}/stats`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryStatsResponse {
    pub total_items: u64,
}

/// `GET /api/libraries/{id}/items`
#[derive(Debug, Deserialize)]
pub struct LibraryItemsPage {
    pub results: Vec<ItemRef>,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct ItemRef {
    pub id: String,
}

/// Progress record as sent and received by `/api/me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaProgressDto {
    pub library_item_id: String,
    /// Podcast episodes carry one; books never do.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    pub current_time: f64,
    pub duration: f64,
    pub progress: f64,
    pub is_finished: bool,
    /// Unix milliseconds.
    pub last_update: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkDto {
    pub library_item_id: String,
    pub time: f64,
    pub title: String,
    pub created_at: i64,
}

/// `GET /api/me`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(default)]
    pub media_progress: Vec<MediaProgressDto>,
    #[serde(default)]
    pub bookmarks: Vec<BookmarkDto>,
}

/// `GET /ping`
#[derive(Debug, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub success: bool,
}

impl From<LibraryItem> for Book {
    fn from(item: LibraryItem) -> Self {
        let media = item.media;
        let mut files: Vec<AudioFileDto> =
            media.audio_files.into_iter().filter(|f| !f.exclude).collect();
        files.sort_by_key(|f| f.index);

        let tracks = files
            .into_iter()
            .map(|file| AudioTrack {
                index: file.index,
                file_id: file.ino,
                filename: file.metadata.filename,
                duration: file.duration,
                size: file.metadata.size,
                sha256: file.metadata.sha256.map(|s| s.to_ascii_lowercase()),
                mime_type: file.mime_type.unwrap_or_else(|| "audio/mpeg".to_string()),
            })
            .collect::<Vec<_>>();

        let duration = if media.duration > 0.0 {
            media.duration
        } else {
            tracks.iter().map(|t| t.duration).sum()
        };

        Book {
            title: media
                .metadata
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| item.id.clone()),
            id: BookId::new(item.id),
            author: media.metadata.author_name,
            chapters: media
                .chapters
                .into_iter()
                .map(|c| Chapter {
                    id: c.id,
                    start: c.start,
                    end: c.end,
                    title: c.title,
                })
                .collect(),
            cover: media.cover_path,
            tracks,
            library_id: item.library_id,
            duration,
        }
    }
}

impl From<LibraryDto> for Library {
    fn from(dto: LibraryDto) -> Self {
        Library {
            id: dto.id,
            name: dto.name,
            media_type: dto.media_type,
        }
    }
}

impl From<&PlaybackState> for MediaProgressDto {
    fn from(state: &PlaybackState) -> Self {
        MediaProgressDto {
            library_item_id: state.book_id.to_string(),
            episode_id: None,
            current_time: state.current_time,
            duration: state.duration,
            progress: state.progress(),
            is_finished: state.is_finished,
            last_update: state.last_played_at,
        }
    }
}

impl From<MediaProgressDto> for PlaybackState {
    fn from(dto: MediaProgressDto) -> Self {
        PlaybackState::new(
            BookId::new(dto.library_item_id),
            dto.current_time,
            dto.duration,
            dto.last_update,
        )
        .finished(dto.is_finished)
    }
}

impl From<BookmarkDto> for Bookmark {
    fn from(dto: BookmarkDto) -> Self {
        Bookmark {
            book_id: BookId::new(dto.library_item_id),
            time: dto.time,
            title: dto.title,
            created_at: dto.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM: &str = r#"{
        "id": "li_dune",
        "libraryId": "lib_main",
        "media": {
            "metadata": { "title": "Dune", "authorName": "Frank Herbert" },
            "coverPath": "/metadata/items/li_dune/cover.jpg",
            "chapters": [
                { "id": 0, "start": 0, "end": 1800.5, "title": "Book One" }
            ],
            "audioFiles": [
                { "index": 2, "ino": "222", "duration": 900.25, "mimeType": "audio/mp4",
                  "metadata": { "filename": "02.m4b", "size": 2048, "sha256": "ABCD" } },
                { "index": 1, "ino": "111", "duration": 900.25,
                  "metadata": { "filename": "01.m4b", "size": 1024 } },
                { "index": 3, "ino": "333", "duration": 5, "exclude": true,
                  "metadata": { "filename": "sample.mp3" } }
            ],
            "duration": 1800.5
        }
    }"#;

    #[test]
    fn library_item_converts_to_book() {
        let item: LibraryItem = serde_json::from_str(ITEM).unwrap();
        let book = Book::from(item);

        assert_eq!(book.id.as_str(), "li_dune");
        assert_eq!(book.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(book.chapters.len(), 1);
        let inos: Vec<_> = book.tracks.iter().map(|t| t.file_id.as_str()).collect();
        assert_eq!(inos, vec!["111", "222"]);
        assert_eq!(book.tracks[0].mime_type, "audio/mpeg");
        assert_eq!(book.tracks[1].sha256.as_deref(), Some("abcd"));
        assert_eq!(book.declared_size(), Some(3072));
    }

    #[test]
    fn missing_title_falls_back_to_id() {
        let item: LibraryItem = serde_json::from_str(
            r#"{"id":"li_x","media":{"metadata":{"title":"  "},"duration":0}}"#,
        )
        .unwrap();
        let book = Book::from(item);
        assert_eq!(book.title, "li_x");
        assert_eq!(book.duration, 0.0);
    }

    #[test]
    fn progress_round_trips_through_wire_shape() {
        let state = PlaybackState::new(BookId::new("li_dune"), 450.0, 1800.0, 1_700_000_000_000)
            .finished(false);
        let dto = MediaProgressDto::from(&state);
        assert_eq!(dto.progress, 0.25);

        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["libraryItemId"], "li_dune");
        assert!(json.get("episodeId").is_none());

        let back = PlaybackState::from(dto);
        assert_eq!(back, state);
    }
}
