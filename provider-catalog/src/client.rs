//! HTTP implementation of the catalog API
//!
//! Implements `RemoteCatalog` and `ContentSource` against an
//! Audiobookshelf-style REST server.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bytes::Bytes;
use core_async::time::Duration;
use core_library::catalog::{CatalogSession, ContentSource, RemoteCatalog};
use core_library::{AudioTrack, Book, BookId, Bookmark, Library, PlaybackState};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{CatalogError, Result};
use crate::types::{
    LibrariesResponse, LibraryItem, LibraryItemsPage, LibraryStatsResponse, MeResponse,
    MediaProgressDto, PingResponse,
};

/// Items requested per page when listing a library.
const PAGE_SIZE: u64 = 500;

/// Attempts per metadata request (first try included).
const MAX_ATTEMPTS: u32 = 3;

const API_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Catalog server client
///
/// # Example
///
/// ```ignore
/// use core_library::CatalogSession;
/// use provider_catalog::HttpCatalogClient;
///
/// let session = CatalogSession::new("https://abs.example.org", Some(token));
/// let client = HttpCatalogClient::new(http_client, session);
/// let book = client.fetch_book_details(&"li_123".into()).await?;
/// ```
pub struct HttpCatalogClient {
    http_client: Arc<dyn HttpClient>,
    session: CatalogSession,
}

impl HttpCatalogClient {
    pub fn new(http_client: Arc<dyn HttpClient>, session: CatalogSession) -> Self {
        Self {
            http_client,
            session,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.session.base_url, path)
    }

    fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        let request = HttpRequest::new(method, self.url(path))
            .header("Accept", "application/json")
            .timeout(API_TIMEOUT);
        match &self.session.token {
            Some(token) => request.bearer_token(token.clone()),
            None => request,
        }
    }

    fn status_error(response: &HttpResponse, item_id: Option<&str>) -> CatalogError {
        let message = String::from_utf8_lossy(&response.body).trim().to_string();
        match (response.status, item_id) {
            (401, _) | (403, _) => CatalogError::AuthenticationFailed(message),
            (404, Some(id)) => CatalogError::ItemNotFound {
                item_id: id.to_string(),
            },
            (status, _) => CatalogError::ApiError {
                status_code: status,
                message,
            },
        }
    }

    /// Send a metadata request through the transport's retry policy and map
    /// anything but 2xx to a catalog error.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest, item_id: Option<&str>) -> Result<HttpResponse> {
        let response = self
            .http_client
            .execute_with_retry(request, Self::retry_policy())
            .await
            .map_err(|e| {
                warn!(error = %e, "API request failed");
                CatalogError::NetworkError(e.to_string())
            })?;
        if !response.is_success() {
            warn!(status = response.status, "API request rejected");
            return Err(Self::status_error(&response, item_id));
        }
        debug!(status = response.status, "API request succeeded");
        Ok(response)
    }

    fn retry_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            use_exponential_backoff: true,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, item_id: Option<&str>) -> Result<T> {
        let response = self
            .send(self.request(HttpMethod::Get, path), item_id)
            .await?;
        serde_json::from_slice(&response.body)
            .map_err(|e| CatalogError::ParseError(format!("{}: {}", path, e)))
    }

    async fn fetch_me(&self) -> Result<MeResponse> {
        self.get_json("/api/me", None).await
    }

    async fn list_library_items(&self, library_id: &str) -> Result<Vec<BookId>> {
        let mut ids = Vec::new();
        let mut page = 0u64;

        loop {
            let path = format!(
                "/api/libraries/{}/items?limit={}&page={}&minified=1",
                urlencoding::encode(library_id),
                PAGE_SIZE,
                page
            );
            let items: LibraryItemsPage = self.get_json(&path, None).await?;
            let received = items.results.len() as u64;
            ids.extend(items.results.into_iter().map(|r| BookId::new(r.id)));

            if received == 0 || ids.len() as u64 >= items.total {
                break;
            }
            page += 1;
        }

        Ok(ids)
    }
}

#[async_trait]
impl RemoteCatalog for HttpCatalogClient {
    fn session(&self) -> &CatalogSession {
        &self.session
    }

    #[instrument(skip(self), fields(book_id = %id))]
    async fn fetch_book_details(&self, id: &BookId) -> core_library::Result<Book> {
        let path = format!("/api/items/{}?expanded=1", urlencoding::encode(id.as_str()));
        let item: LibraryItem = self.get_json(&path, Some(id.as_str())).await?;
        let book = Book::from(item);
        info!(tracks = book.tracks.len(), "Fetched book details");
        Ok(book)
    }

    #[instrument(skip(self))]
    async fn fetch_libraries(&self) -> core_library::Result<Vec<Library>> {
        let response: LibrariesResponse = self.get_json("/api/libraries", None).await?;
        Ok(response.libraries.into_iter().map(Library::from).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_library_stats(&self, library_id: &str) -> core_library::Result<u64> {
        let path = format!("/api/libraries/{}/stats", urlencoding::encode(library_id));
        let stats: LibraryStatsResponse = self.get_json(&path, None).await?;
        Ok(stats.total_items)
    }

    #[instrument(skip(self))]
    async fn fetch_library_book_ids(&self, library_id: &str) -> core_library::Result<Vec<BookId>> {
        let ids = self.list_library_items(library_id).await?;
        debug!(count = ids.len(), "Listed library items");
        Ok(ids)
    }

    #[instrument(skip(self, state), fields(book_id = %state.book_id))]
    async fn push_playback_progress(&self, state: &PlaybackState) -> core_library::Result<()> {
        let path = format!(
            "/api/me/progress/{}",
            urlencoding::encode(state.book_id.as_str())
        );
        let request = self
            .request(HttpMethod::Patch, &path)
            .json(&MediaProgressDto::from(state))?;
        self.send(request, None).await?;
        Ok(())
    }

    #[instrument(skip(self, states), fields(count = states.len()))]
    async fn push_playback_progress_batch(
        &self,
        states: &[PlaybackState],
    ) -> core_library::Result<()> {
        if states.is_empty() {
            return Ok(());
        }
        let body: Vec<MediaProgressDto> = states.iter().map(MediaProgressDto::from).collect();
        let request = self
            .request(HttpMethod::Patch, "/api/me/progress/batch/update")
            .json(&body)?;
        self.send(request, None).await?;
        info!("Pushed playback progress");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn pull_playback_progress(&self) -> core_library::Result<Vec<PlaybackState>> {
        let me = self.fetch_me().await?;
        Ok(me
            .media_progress
            .into_iter()
            .filter(|p| p.episode_id.is_none())
            .map(PlaybackState::from)
            .collect())
    }

    #[instrument(skip(self))]
    async fn pull_bookmarks(&self) -> core_library::Result<Vec<Bookmark>> {
        let me = self.fetch_me().await?;
        Ok(me.bookmarks.into_iter().map(Bookmark::from).collect())
    }

    async fn ping(&self) -> core_library::Result<bool> {
        let request = HttpRequest::new(HttpMethod::Get, self.url("/ping")).timeout(PING_TIMEOUT);
        match self.http_client.execute(request).await {
            Ok(response) if response.is_success() => Ok(response
                .json::<PingResponse>()
                .map(|p| p.success)
                .unwrap_or(false)),
            Ok(response) => {
                debug!(status = response.status, "Ping rejected");
                Ok(false)
            }
            Err(e) => {
                debug!(error = %e, "Ping failed");
                Ok(false)
            }
        }
    }

    fn stream_url(&self, book: &Book, track: &AudioTrack) -> String {
        self.url(&format!(
            "/api/items/{}/file/{}",
            urlencoding::encode(book.id.as_str()),
            urlencoding::encode(&track.file_id)
        ))
    }
}

#[async_trait]
impl ContentSource for HttpCatalogClient {
    #[instrument(skip(self, book, track), fields(book_id = %book.id, track = track.index))]
    async fn fetch_track(&self, book: &Book, track: &AudioTrack) -> core_library::Result<Bytes> {
        let path = format!(
            "/api/items/{}/file/{}/download",
            urlencoding::encode(book.id.as_str()),
            urlencoding::encode(&track.file_id)
        );
        let request = self
            .request(HttpMethod::Get, &path)
            .header("Accept", "*/*")
            .timeout(DOWNLOAD_TIMEOUT);

        let response = self.http_client.execute(request).await.map_err(|e| {
            CatalogError::NetworkError(format!("download of track {}: {}", track.index, e))
        })?;
        if !response.is_success() {
            return Err(Self::status_error(&response, Some(book.id.as_str())).into());
        }

        debug!(bytes = response.body.len(), "Downloaded track");
        Ok(response.body)
    }
}
