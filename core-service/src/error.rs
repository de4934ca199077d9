use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),
}

impl ServiceError {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Playback(e) => e.to_string(),
            ServiceError::Sync(core_sync::SyncError::SyncInProgress) => {
                "A sync is already running".to_string()
            }
            ServiceError::Sync(e) if e.is_recoverable() => {
                "Could not reach the server; progress will sync later".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
