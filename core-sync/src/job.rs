//! # Sync Runs
//!
//! Identifiers and outcome reports for one reconciliation run.
//!
//! ```text
//! Started ──> push dirty states ──> pull (if due) ──> commit ──> Completed
//!     │              │                    │              │
//!     └──────────────┴────────────────────┴──────────────┴──> Failed
//! ```
//!
//! A run that fails before the commit leaves local state untouched.

use crate::{Result, SyncError};
use core_library::BookId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job id from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a successful progress sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub job_id: SyncJobId,
    /// Local states sent to the server.
    pub pushed: usize,
    /// Remote states received. `0` when the pull was skipped.
    pub pulled: usize,
    /// Remote states that replaced (or created) a local record.
    pub applied: usize,
    pub pull_skipped: bool,
    pub duration: Duration,
}

impl SyncReport {
    /// `true` when the run neither sent nor received anything.
    pub fn is_noop(&self) -> bool {
        self.pushed == 0 && self.pulled == 0
    }
}

/// Bookmarks pointing at books in neither the library nor the cache.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrphanReport {
    pub orphaned: BTreeSet<BookId>,
    /// A library listed fewer ids than its stats reported, so some orphans
    /// may be false positives.
    pub library_listing_incomplete: bool,
    pub library_books: usize,
    pub downloaded_books: usize,
    pub bookmarked_books: usize,
}

impl OrphanReport {
    pub fn has_orphans(&self) -> bool {
        !self.orphaned.is_empty()
    }
}
