//! # Content Cache Module
//!
//! Whole-book downloads for offline playback.
//!
//! ## Overview
//!
//! - Persistent storage through the `FileSystemAccess` bridge
//! - Bounded concurrency: downloads beyond the limit queue on a semaphore
//! - Per-asset retry with exponential backoff and a timeout
//! - Size and SHA-256 verification before a book counts as downloaded
//! - Capacity guard against the configured cache size
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     ContentCache                       │
//! │  - download()  -> DownloadHandle       │
//! │  - is_book_downloaded()                │
//! │  - delete_book() / delete_all_books()  │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> ContentSource (catalog asset transfer)
//!          ├──> FileSystemAccess (book directories)
//!          └──> EventBus (DownloadEvent)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{CacheConfig, ContentCache};
//!
//! let cache = Arc::new(ContentCache::new(CacheConfig::new(root), fs)?);
//! cache.initialize().await?;
//!
//! let handle = cache.download(&book, catalog.clone()).await?;
//! handle.wait().await?;
//!
//! if cache.is_book_downloaded(&book.id).await {
//!     println!("{} is available offline", book.title);
//! }
//! ```

pub mod config;
pub mod manager;
pub mod stats;

pub use config::CacheConfig;
pub use manager::{ContentCache, DownloadHandle, ManifestRead, COMPLETION_MARKER, MANIFEST_FILE};
pub use stats::{CacheStats, DownloadState};
