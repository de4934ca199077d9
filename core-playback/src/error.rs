//! # Playback Error Types
//!
//! Errors surfaced by the connectivity monitor, content cache, playback state
//! store and mode resolver.

use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Resolution Errors
    // ========================================================================
    /// The book is not downloaded and there is no usable connection. No
    /// remote fetch was attempted.
    #[error("\"{0}\" is not available offline")]
    NotAvailableOffline(String),

    /// Remote metadata fetch failed while the connection looked usable.
    #[error("Failed to fetch book details: {0}")]
    FetchFailed(#[source] LibraryError),

    /// The book is downloaded but its manifest is missing or unreadable and
    /// no connection is available to fetch it again.
    #[error("Local metadata missing for downloaded book {0}")]
    LocalMetadataMissing(String),

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// A write to the settings store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored record could not be read or decoded.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    // ========================================================================
    // Cache Errors
    // ========================================================================
    #[error("Download of {book_id} failed: {message}")]
    Download { book_id: String, message: String },

    /// Cache storage is full.
    #[error("Cache full: {required} bytes needed, {available} bytes available")]
    CacheFull { required: u64, available: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Platform Errors
    // ========================================================================
    /// The host player rejected a command.
    #[error("Player error: {0}")]
    Player(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::FetchFailed(cause) => cause.is_transient(),
            PlaybackError::Download { .. } => true,
            PlaybackError::Bridge(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` when the failure is caused by missing connectivity
    /// rather than by local state.
    pub fn is_network_error(&self) -> bool {
        match self {
            PlaybackError::NotAvailableOffline(_) => true,
            PlaybackError::FetchFailed(cause) => matches!(cause, LibraryError::Network(_)),
            _ => false,
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
