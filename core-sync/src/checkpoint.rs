//! Persisted progress of the last successful sync.
//!
//! Stored as JSON under [`CHECKPOINT_KEY`] in the settings namespace and
//! written in the same transaction as the pulled playback states.

use crate::{Result, SyncError};
use bridge_traits::storage::SettingsStore;
use chrono::{DateTime, Utc};
use core_library::{BookId, PlaybackState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::warn;

pub const CHECKPOINT_KEY: &str = "sync.checkpoint";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Per book, the `last_played_at` (unix ms) of the record the server is
    /// known to hold. A local state with any other timestamp is dirty.
    #[serde(default)]
    pub synced: BTreeMap<BookId, i64>,
    /// When server progress was last pulled.
    pub last_pull_at: Option<DateTime<Utc>>,
}

impl SyncCheckpoint {
    /// Whether `state` differs from what the server was last seen holding.
    pub fn is_dirty(&self, state: &PlaybackState) -> bool {
        self.synced.get(&state.book_id) != Some(&state.last_played_at)
    }

    pub fn mark_synced(&mut self, state: &PlaybackState) {
        self.synced
            .insert(state.book_id.clone(), state.last_played_at);
    }

    /// Drop entries for books that no longer have a local record.
    pub fn retain_books<'a>(&mut self, present: impl IntoIterator<Item = &'a BookId>) {
        let present: BTreeSet<&BookId> = present.into_iter().collect();
        self.synced.retain(|id, _| present.contains(id));
    }

    /// Read the checkpoint. A missing or unreadable record starts from
    /// scratch, which only costs a full push.
    pub async fn load(settings: &dyn SettingsStore) -> Result<Self> {
        let raw = settings
            .get_string(CHECKPOINT_KEY)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;

        match raw.map(|raw| serde_json::from_str::<SyncCheckpoint>(&raw)) {
            None => Ok(Self::default()),
            Some(Ok(checkpoint)) => Ok(checkpoint),
            Some(Err(e)) => {
                warn!(error = %e, "Sync checkpoint unreadable; starting over");
                Ok(Self::default())
            }
        }
    }

    /// Whether a pull is due at `now`.
    pub fn pull_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_pull_at {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed.num_milliseconds() < 0
                    || elapsed.num_milliseconds() as u128 >= interval.as_millis()
            }
        }
    }

    /// Key and encoded value for a settings transaction.
    pub fn entry(&self) -> Result<(String, String)> {
        let value = serde_json::to_string(self)
            .map_err(|e| SyncError::Storage(format!("failed to encode checkpoint: {}", e)))?;
        Ok((CHECKPOINT_KEY.to_string(), value))
    }
}
