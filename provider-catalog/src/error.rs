//! Error types for the catalog provider

use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// Token rejected by the server
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Catalog API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error(transparent)]
    BridgeError(#[from] bridge_traits::error::BridgeError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl From<CatalogError> for LibraryError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::AuthenticationFailed(message) => LibraryError::Remote {
                status: 401,
                message,
            },
            CatalogError::ApiError {
                status_code,
                message,
            } => LibraryError::Remote {
                status: status_code,
                message,
            },
            CatalogError::ItemNotFound { item_id } => LibraryError::NotFound {
                entity_type: "item".to_string(),
                id: item_id,
            },
            CatalogError::ParseError(message) => LibraryError::Parse(message),
            CatalogError::NetworkError(message) => LibraryError::Network(message),
            CatalogError::BridgeError(e) => LibraryError::Bridge(e),
        }
    }
}
