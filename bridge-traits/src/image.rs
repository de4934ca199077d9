//! Cover image cache bridge.

use std::path::PathBuf;

use crate::error::Result;

/// Where a cover can be loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Remote { url: String, auth_token: Option<String> },
    Local { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePreloadRequest {
    /// Cache key, normally the book id.
    pub key: String,
    pub source: ImageSource,
}

/// Host image cache.
///
/// The core only asks it to warm entries; callers treat every failure as
/// non-fatal.
#[async_trait::async_trait]
pub trait ImageCache: Send + Sync {
    /// Warm the cache for up to `limit` of the given requests.
    async fn preload(&self, requests: Vec<ImagePreloadRequest>, limit: usize) -> Result<()>;
}
