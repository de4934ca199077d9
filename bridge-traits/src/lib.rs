//! # Host Bridge Traits
//!
//! Capabilities the audioshelf core needs from its host platform.
//!
//! ## Overview
//!
//! Each trait is a seam between the core and a platform-specific
//! implementation. The core never talks to the OS, the network stack or the
//! audio engine directly; it goes through these traits.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP with bearer auth and retry
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for downloaded books
//! - [`NetworkMonitor`](network::NetworkMonitor) - Device connectivity and change stream
//!
//! ### Storage
//! - [`SettingsStore`](storage::SettingsStore) - Durable key-value namespace with transactions
//!
//! ### Media
//! - [`PlayerService`](player::PlayerService) - Opaque audio player the core configures and commands
//! - [`ImageCache`](image::ImageCache) - Cover image cache the core warms best-effort
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic ordering in tests
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | iOS      | host-provided       |
//! | Android  | host-provided       |
//!
//! The player and image cache are always host-provided.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep the context (paths, status codes)
//! in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across async tasks behind `Arc<dyn Trait>`.

pub mod error;
pub mod http;
pub mod image;
pub mod network;
pub mod player;
pub mod storage;
pub mod time;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use image::{ImageCache, ImagePreloadRequest, ImageSource};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use player::{
    AudioSource, ChapterMarker, PlayerConfiguration, PlayerLoadRequest, PlayerService,
    PlayerTrack,
};
pub use storage::{FileMetadata, FileSystemAccess, SettingsStore, SettingsTransaction};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
