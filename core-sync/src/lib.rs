//! # Progress Sync
//!
//! Keeps listening positions and bookmarks consistent with the catalog
//! server.
//!
//! ## Components
//!
//! - **Sync Coordinator** (`coordinator`): push/pull of playback progress
//!   with last-write-wins, bookmark merge and orphan detection
//! - **Checkpoint** (`checkpoint`): per-book server timestamps and last pull time,
//!   committed atomically with pulled states
//! - **Sync Runs** (`job`): run ids and outcome reports

pub mod checkpoint;
pub mod coordinator;
pub mod error;
pub mod job;

pub use checkpoint::{SyncCheckpoint, CHECKPOINT_KEY};
pub use coordinator::{find_orphaned_bookmarks, SyncConfig, SyncCoordinator};
pub use error::{Result, SyncError};
pub use job::{OrphanReport, SyncJobId, SyncReport};
