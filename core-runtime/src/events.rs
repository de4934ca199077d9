//! # Event Bus System
//!
//! Typed, broadcast-based events for the audioshelf core, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain (connectivity, downloads, playback, sync)
//! - **EventBus**: cloneable handle to the broadcast channel
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Connectivity ├────────>│           ├────────────>│ UI / host  │
//! ├──────────────┤         │ EventBus  │             └────────────┘
//! │ ContentCache ├────────>│ (broadcast│  subscribe  ┌────────────┐
//! ├──────────────┤         │  channel) ├────────────>│ Diagnostics│
//! │ Sync         ├────────>│           │             └────────────┘
//! └──────────────┘         └───────────┘
//! ```
//!
//! Connectivity transitions are the only events that should make a UI switch
//! its data source between live and cached content without a new request.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut sub = bus.subscribe();
//!
//! bus.emit(CoreEvent::Download(DownloadEvent::Queued {
//!     book_id: "li_42".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(sub.recv().await, Ok(CoreEvent::Download(_))));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep going.
//! - **`RecvError::Closed`**: every sender was dropped; shut the subscriber down.
//!
//! `emit` fails only when nobody is subscribed. Publishers ignore that with
//! `.ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Connectivity(ConnectivityEvent),
    Download(DownloadEvent),
    Playback(PlaybackEvent),
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Connectivity(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Download(DownloadEvent::Failed { .. })
            | CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::OrphanedBookmarks { .. })
            | CoreEvent::Playback(PlaybackEvent::Unavailable { .. }) => EventSeverity::Warning,
            CoreEvent::Connectivity(ConnectivityEvent::StatusChanged { .. })
            | CoreEvent::Download(DownloadEvent::Completed { .. })
            | CoreEvent::Sync(SyncEvent::Completed { .. })
            | CoreEvent::Playback(PlaybackEvent::Loaded { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Connectivity Events
// ============================================================================

/// Device and server reachability transitions.
///
/// Statuses are carried as their lowercase names (`online`, `offline`,
/// `unknown`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConnectivityEvent {
    /// Device connectivity moved to a different value. Never emitted for a
    /// repeated identical observation.
    StatusChanged { previous: String, current: String },
    /// Result of a catalog server probe changed.
    ServerReachabilityChanged { reachable: bool },
}

impl ConnectivityEvent {
    fn description(&self) -> &str {
        match self {
            ConnectivityEvent::StatusChanged { .. } => "Network status changed",
            ConnectivityEvent::ServerReachabilityChanged { .. } => {
                "Server reachability changed"
            }
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

/// Lifecycle of a book download in the content cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// Accepted and waiting for a transfer slot.
    Queued { book_id: String },
    /// Holding a slot and transferring.
    Started { book_id: String, total_tracks: u32 },
    Progress {
        book_id: String,
        /// 0-100.
        percent: u8,
    },
    /// Content and manifest written and verified. Emitted once per transfer.
    Completed { book_id: String, total_bytes: u64 },
    Failed { book_id: String, message: String },
    Deleted { book_id: String },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Queued { .. } => "Download queued",
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Progress { .. } => "Download in progress",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Deleted { .. } => "Downloaded book deleted",
        }
    }

    /// Book the event refers to.
    pub fn book_id(&self) -> &str {
        match self {
            DownloadEvent::Queued { book_id }
            | DownloadEvent::Started { book_id, .. }
            | DownloadEvent::Progress { book_id, .. }
            | DownloadEvent::Completed { book_id, .. }
            | DownloadEvent::Failed { book_id, .. }
            | DownloadEvent::Deleted { book_id } => book_id,
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A playback request was resolved; `mode` is `offline`, `online` or
    /// `unavailable`.
    ModeResolved { book_id: String, mode: String },
    /// The player was configured and loaded.
    Loaded {
        book_id: String,
        title: String,
        offline: bool,
        start_position_ms: Option<u64>,
    },
    /// Neither cached content nor a usable connection.
    Unavailable { book_id: String, title: String },
    /// A position record was written.
    PositionSaved { book_id: String, position_ms: u64 },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::ModeResolved { .. } => "Playback mode resolved",
            PlaybackEvent::Loaded { .. } => "Book loaded into player",
            PlaybackEvent::Unavailable { .. } => "Book unavailable offline",
            PlaybackEvent::PositionSaved { .. } => "Playback position saved",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Progress reconciliation with the catalog server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    Started { job_id: String },
    Completed {
        job_id: String,
        pushed: u64,
        pulled: u64,
        applied: u64,
        duration_ms: u64,
    },
    /// Nothing local was changed.
    Failed {
        job_id: String,
        message: String,
        recoverable: bool,
    },
    /// Bookmarks reference books in neither the library nor the cache.
    OrphanedBookmarks { count: u64, book_ids: Vec<String> },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::OrphanedBookmarks { .. } => "Orphaned bookmarks detected",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable handle to the core broadcast channel.
///
/// Every clone publishes into the same channel; subscribers only see events
/// emitted after they subscribed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus. Subscribers that fall more than `capacity`
    /// events behind receive `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers and returns how many received
    /// it. Fails only when there are no subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(100);
/// let downloads = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned from `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if nothing matching is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
