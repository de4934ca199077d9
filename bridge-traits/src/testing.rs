//! In-memory bridge implementations for tests.
//!
//! Enabled with the `test-support` feature. Nothing here touches the real
//! filesystem, network or audio stack.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use core_async::sync::{mpsc, Mutex};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::image::{ImageCache, ImagePreloadRequest};
use crate::network::{NetworkChangeStream, NetworkInfo, NetworkMonitor};
use crate::player::{PlayerConfiguration, PlayerLoadRequest, PlayerService};
use crate::storage::{SettingsStore, SettingsTransaction};
use crate::time::Clock;

// ============================================================================
// Settings
// ============================================================================

/// `SettingsStore` backed by a shared `BTreeMap`.
#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write (including commits) fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of the raw contents.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().await.clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::DatabaseError("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.get_string(key).await?.and_then(|v| v.parse().ok()))
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get_string(key).await?.and_then(|v| v.parse().ok()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().await.contains_key(key))
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn SettingsTransaction + Send>> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            pending: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    store: InMemorySettingsStore,
    pending: Vec<(String, Option<String>)>,
}

#[async_trait]
impl SettingsTransaction for InMemoryTransaction {
    async fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.pending
            .push((key.to_string(), Some(value.to_string())));
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        self.pending.push((key.to_string(), None));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.store.check_writable()?;
        let mut entries = self.store.entries.lock().await;
        for (key, value) in self.pending {
            match value {
                Some(value) => entries.insert(key, value),
                None => entries.remove(&key),
            };
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Network
// ============================================================================

/// `NetworkMonitor` driven by the test through [`ScriptedNetworkMonitor::push`].
#[derive(Clone)]
pub struct ScriptedNetworkMonitor {
    current: Arc<Mutex<NetworkInfo>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<NetworkInfo>>>>,
}

impl ScriptedNetworkMonitor {
    pub fn new(initial: NetworkInfo) -> Self {
        Self {
            current: Arc::new(Mutex::new(initial)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report a new network state to every subscriber.
    pub async fn push(&self, info: NetworkInfo) {
        *self.current.lock().await = info.clone();
        self.subscribers
            .lock()
            .await
            .retain(|tx| tx.send(info.clone()).is_ok());
    }

    /// Close every change stream.
    pub async fn close(&self) {
        self.subscribers.lock().await.clear();
    }
}

#[async_trait]
impl NetworkMonitor for ScriptedNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        Ok(self.current.lock().await.clone())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        Ok(Box::new(ChannelChangeStream { rx }))
    }
}

struct ChannelChangeStream {
    rx: mpsc::UnboundedReceiver<NetworkInfo>,
}

#[async_trait]
impl NetworkChangeStream for ChannelChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.rx.recv().await
    }
}

// ============================================================================
// Player
// ============================================================================

#[derive(Debug, Default)]
struct PlayerLog {
    configurations: Vec<PlayerConfiguration>,
    loads: Vec<PlayerLoadRequest>,
    position: f64,
    duration: f64,
    chapter: usize,
    playing: bool,
}

/// `PlayerService` that records every command.
#[derive(Clone, Default)]
pub struct RecordingPlayer {
    log: Arc<Mutex<PlayerLog>>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn configurations(&self) -> Vec<PlayerConfiguration> {
        self.log.lock().await.configurations.clone()
    }

    pub async fn loads(&self) -> Vec<PlayerLoadRequest> {
        self.log.lock().await.loads.clone()
    }

    /// Simulate playback progress.
    pub async fn set_position(&self, position: f64, chapter: usize) {
        let mut log = self.log.lock().await;
        log.position = position;
        log.chapter = chapter;
    }
}

#[async_trait]
impl PlayerService for RecordingPlayer {
    async fn configure(&self, configuration: PlayerConfiguration) -> Result<()> {
        self.log.lock().await.configurations.push(configuration);
        Ok(())
    }

    async fn load(&self, request: PlayerLoadRequest) -> Result<()> {
        let mut log = self.log.lock().await;
        log.position = request.start_position.unwrap_or(0.0);
        log.chapter = request.start_chapter.unwrap_or(0);
        log.duration = request.tracks.iter().map(|t| t.duration).sum();
        log.playing = false;
        log.loads.push(request);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.log.lock().await.playing = true;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.log.lock().await.playing = false;
        Ok(())
    }

    async fn seek(&self, position: f64) -> Result<()> {
        self.log.lock().await.position = position;
        Ok(())
    }

    async fn next_chapter(&self) -> Result<()> {
        self.log.lock().await.chapter += 1;
        Ok(())
    }

    async fn previous_chapter(&self) -> Result<()> {
        let mut log = self.log.lock().await;
        log.chapter = log.chapter.saturating_sub(1);
        Ok(())
    }

    async fn current_time(&self) -> f64 {
        self.log.lock().await.position
    }

    async fn duration(&self) -> f64 {
        self.log.lock().await.duration
    }

    async fn is_playing(&self) -> bool {
        self.log.lock().await.playing
    }

    async fn current_chapter_index(&self) -> usize {
        self.log.lock().await.chapter
    }

    async fn loaded_book_id(&self) -> Option<String> {
        self.log
            .lock()
            .await
            .loads
            .last()
            .map(|request| request.book_id.clone())
    }
}

// ============================================================================
// Images
// ============================================================================

/// `ImageCache` that records requests and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingImageCache {
    requests: Arc<Mutex<Vec<ImagePreloadRequest>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingImageCache {
    pub fn failing() -> Self {
        let cache = Self::default();
        cache.fail.store(true, Ordering::SeqCst);
        cache
    }

    pub async fn requests(&self) -> Vec<ImagePreloadRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ImageCache for RecordingImageCache {
    async fn preload(&self, requests: Vec<ImagePreloadRequest>, limit: usize) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("image cache offline".to_string()));
        }
        self.requests
            .lock()
            .await
            .extend(requests.into_iter().take(limit));
        Ok(())
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn at_millis(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    pub fn advance_millis(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_default()
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Default)]
struct HttpScript {
    routes: Vec<(HttpMethod, String, HttpResponse)>,
    requests: Vec<HttpRequest>,
}

/// `HttpClient` answering from canned responses.
///
/// A route matches when the method is equal and the request URL contains the
/// registered fragment; the first match wins. Unmatched requests get a 404.
/// While unreachable every request fails like a refused connection.
#[derive(Clone, Default)]
pub struct ScriptedHttpClient {
    script: Arc<Mutex<HttpScript>>,
    unreachable: Arc<AtomicBool>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn respond(&self, method: HttpMethod, url_fragment: &str, status: u16, body: &str) {
        let response = HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        };
        self.script
            .lock()
            .await
            .routes
            .push((method, url_fragment.to_string(), response));
    }

    pub async fn respond_bytes(&self, method: HttpMethod, url_fragment: &str, body: Bytes) {
        let response = HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body,
        };
        self.script
            .lock()
            .await
            .routes
            .push((method, url_fragment.to_string(), response));
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every request seen so far, including failed ones.
    pub async fn requests(&self) -> Vec<HttpRequest> {
        self.script.lock().await.requests.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.script.lock().await.requests.len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut script = self.script.lock().await;
        script.requests.push(request.clone());
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed(format!(
                "connection refused: {}",
                request.url
            )));
        }

        let matched = script
            .routes
            .iter()
            .find(|(method, fragment, _)| {
                *method == request.method && request.url.contains(fragment.as_str())
            })
            .map(|(_, _, response)| response.clone());

        Ok(matched.unwrap_or_else(|| HttpResponse {
            status: 404,
            headers: HashMap::new(),
            body: Bytes::new(),
        }))
    }
}
