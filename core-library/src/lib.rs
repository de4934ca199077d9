//! # Core Library
//!
//! Domain model of the audiobook client and the seams to the catalog
//! server.
//!
//! - [`models`]: `Book`, `Chapter`, `AudioTrack`, `PlaybackState`,
//!   `Bookmark`, `Library`, `DownloadedBookRecord`
//! - [`catalog`]: `RemoteCatalog` and `ContentSource` traits
//! - [`bookmarks`]: bookmark repository over the settings store
//! - `testing` (feature `test-support`): an in-memory `FakeCatalog`

pub mod bookmarks;
pub mod catalog;
pub mod error;
pub mod models;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bookmarks::{BookmarkRepository, SettingsBookmarkRepository};
pub use catalog::{CatalogSession, ContentSource, RemoteCatalog};
pub use error::{LibraryError, Result};
pub use models::{
    AudioTrack, Book, BookId, Bookmark, Chapter, DownloadedBookRecord, Library, PlaybackState,
};
