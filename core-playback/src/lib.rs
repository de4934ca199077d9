//! # Offline-aware Playback
//!
//! Everything between "the user tapped play" and the host player starting a
//! book.
//!
//! ## Overview
//!
//! - [`connectivity`]: device and server reachability, published as
//!   `online` / `offline` / `unknown`
//! - [`cache`]: whole-book downloads and the "is this book playable offline"
//!   answer
//! - [`state`]: durable playback positions, the auto-save timer and the
//!   playback session that feeds them
//! - [`resolver`]: picks offline, online or unavailable and loads the player
//!
//! ```text
//! play(book) ──> PlaybackModeResolver
//!                  ├──> ContentCache.is_book_downloaded / read_manifest
//!                  ├──> ConnectivityMonitor.is_online / is_server_reachable
//!                  ├──> RemoteCatalog.fetch_book_details   (at most once)
//!                  ├──> PlaybackStateStore.load            (restore_state)
//!                  └──> PlayerService.configure + load
//! ```

pub mod cache;
pub mod connectivity;
pub mod error;
pub mod resolver;
pub mod state;

pub use cache::{CacheConfig, CacheStats, ContentCache, DownloadHandle, DownloadState, ManifestRead};
pub use connectivity::{ConnectivityMonitor, StatusCallbackId};
pub use error::{PlaybackError, Result};
pub use resolver::{decide_mode, PlaybackMode, PlaybackModeResolver, ResolvedPlayback};
pub use state::{
    AutoSaveSignal, AutoSaveSubscription, AutoSaveTimer, PlaybackSession, PlaybackStateStore,
};
