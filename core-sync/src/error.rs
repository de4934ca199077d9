use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use core_playback::PlaybackError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Push or pull against the catalog failed. Nothing local was written.
    #[error("Sync failed: {0}")]
    SyncFailed(#[source] LibraryError),

    #[error("Sync already in progress")]
    SyncInProgress,

    #[error("Sync storage error: {0}")]
    Storage(String),

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    /// Whether running the sync again later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::SyncFailed(e) => e.is_transient(),
            SyncError::SyncInProgress => true,
            SyncError::Bridge(e) => e.is_transient(),
            SyncError::Storage(_) | SyncError::InvalidJobId(_) => false,
        }
    }
}

impl From<PlaybackError> for SyncError {
    fn from(err: PlaybackError) -> Self {
        match err {
            PlaybackError::Bridge(e) => SyncError::Bridge(e),
            other => SyncError::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
