use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Catalog server returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse catalog response: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl LibraryError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LibraryError::Network(_) => true,
            LibraryError::Remote { status, .. } => *status == 429 || *status >= 500,
            LibraryError::Bridge(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
