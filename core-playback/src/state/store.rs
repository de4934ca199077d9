//! Durable playback positions, one record per book.
//!
//! Layout in the settings namespace:
//!
//! | key                       | value                          |
//! |---------------------------|--------------------------------|
//! | `playback_state.<id>`     | JSON `PlaybackState`           |
//! | `playback_state.index`    | JSON array of known book ids   |
//!
//! Writes are last-write-wins by `last_played_at` and serialized by the
//! store's write lock.

use crate::error::{PlaybackError, Result};
use bridge_traits::storage::SettingsStore;
use core_async::sync::Mutex;
use core_library::{BookId, PlaybackState};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const KEY_PREFIX: &str = "playback_state.";
const INDEX_KEY: &str = "playback_state.index";
const RESERVED_ID: &str = "index";

/// Playback state store over the settings bridge.
pub struct PlaybackStateStore {
    settings: Arc<dyn SettingsStore>,
    write_lock: Mutex<()>,
    event_bus: Option<EventBus>,
}

impl PlaybackStateStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            write_lock: Mutex::new(()),
            event_bus: None,
        }
    }

    /// Publish `PositionSaved` on every accepted save.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn key(book_id: &BookId) -> String {
        format!("{}{}", KEY_PREFIX, book_id)
    }

    fn check_id(book_id: &BookId) -> Result<()> {
        if book_id.as_str() == RESERVED_ID {
            return Err(PlaybackError::Storage(format!(
                "book id \"{}\" is reserved",
                RESERVED_ID
            )));
        }
        Ok(())
    }

    async fn read_record(&self, book_id: &BookId) -> Result<Option<PlaybackState>> {
        let raw = self
            .settings
            .get_string(&Self::key(book_id))
            .await
            .map_err(|e| PlaybackError::Retrieval(e.to_string()))?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                PlaybackError::Retrieval(format!("corrupt playback state for {}: {}", book_id, e))
            }),
        }
    }

    async fn read_index(&self) -> Result<BTreeSet<BookId>> {
        let raw = self
            .settings
            .get_string(INDEX_KEY)
            .await
            .map_err(|e| PlaybackError::Retrieval(e.to_string()))?;

        match raw.map(|raw| serde_json::from_str::<BTreeSet<BookId>>(&raw)) {
            None => Ok(BTreeSet::new()),
            Some(Ok(ids)) => Ok(ids),
            Some(Err(e)) => {
                warn!(error = %e, "Playback state index unreadable, rebuilding from keys");
                let keys = self
                    .settings
                    .list_keys()
                    .await
                    .map_err(|e| PlaybackError::Retrieval(e.to_string()))?;
                Ok(keys
                    .iter()
                    .filter(|k| k.as_str() != INDEX_KEY)
                    .filter_map(|k| k.strip_prefix(KEY_PREFIX))
                    .map(BookId::from)
                    .collect())
            }
        }
    }

    /// Save a position.
    ///
    /// # Returns
    /// - `Ok(true)` if the record was written
    /// - `Ok(false)` if the stored record is newer and the save was discarded
    #[instrument(skip(self, state), fields(book_id = %state.book_id))]
    pub async fn save(&self, state: PlaybackState) -> Result<bool> {
        Self::check_id(&state.book_id)?;
        let _guard = self.write_lock.lock().await;

        match self.read_record(&state.book_id).await {
            Ok(Some(existing)) if existing.supersedes(&state) => {
                debug!(
                    stored = existing.last_played_at,
                    incoming = state.last_played_at,
                    "Discarding older playback state"
                );
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Overwriting unreadable playback state"),
        }

        let mut index = self.read_index().await?;
        index.insert(state.book_id.clone());

        let mut tx = self
            .settings
            .begin_transaction()
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        tx.set_string(&Self::key(&state.book_id), &encode(&state)?)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        tx.set_string(INDEX_KEY, &encode(&index)?)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;

        self.emit_saved(&state);
        Ok(true)
    }

    /// `Ok(None)` when no record exists, `Err(Retrieval)` when it cannot be
    /// decoded.
    pub async fn load(&self, book_id: &BookId) -> Result<Option<PlaybackState>> {
        self.read_record(book_id).await
    }

    /// Every readable record. Corrupt records are skipped.
    pub async fn get_all(&self) -> Result<Vec<PlaybackState>> {
        let index = self.read_index().await?;
        let mut states = Vec::with_capacity(index.len());

        for book_id in index {
            match self.read_record(&book_id).await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => debug!(book_id = %book_id, "Indexed playback state missing"),
                Err(e) => warn!(book_id = %book_id, error = %e, "Skipping corrupt playback state"),
            }
        }

        Ok(states)
    }

    /// At most `limit` records, most recently played first.
    pub async fn get_recently_played(&self, limit: usize) -> Result<Vec<PlaybackState>> {
        let mut states = self.get_all().await?;
        states.sort_by(|a, b| b.last_played_at.cmp(&a.last_played_at));
        states.truncate(limit);
        Ok(states)
    }

    /// Remove a book's record. Deleting an absent record is a no-op.
    #[instrument(skip(self))]
    pub async fn delete(&self, book_id: &BookId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut index = self.read_index().await?;
        let key = Self::key(book_id);
        let stored = self
            .settings
            .has_key(&key)
            .await
            .map_err(|e| PlaybackError::Retrieval(e.to_string()))?;
        if !index.remove(book_id) && !stored {
            return Ok(());
        }

        let mut tx = self
            .settings
            .begin_transaction()
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        tx.delete(&key)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        tx.set_string(INDEX_KEY, &encode(&index)?)
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;

        debug!("Deleted playback state");
        Ok(())
    }

    /// Remove every record and the index.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let keys = self
            .settings
            .list_keys()
            .await
            .map_err(|e| PlaybackError::Retrieval(e.to_string()))?;

        let mut tx = self
            .settings
            .begin_transaction()
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        for key in keys.iter().filter(|k| k.starts_with(KEY_PREFIX)) {
            tx.delete(key)
                .await
                .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;

        debug!("Cleared all playback state");
        Ok(())
    }

    /// Write `states`, the index and `extra_entries` in one transaction.
    ///
    /// Each state still goes through last-write-wins against the stored
    /// record, so a position saved while the batch was being prepared is
    /// not overwritten by an older one. Returns how many states were written.
    #[instrument(skip(self, states, extra_entries), fields(states = states.len()))]
    pub async fn commit_batch(
        &self,
        states: Vec<PlaybackState>,
        extra_entries: Vec<(String, String)>,
    ) -> Result<usize> {
        for state in &states {
            Self::check_id(&state.book_id)?;
        }
        let _guard = self.write_lock.lock().await;

        let mut index = self.read_index().await?;
        let mut accepted = Vec::with_capacity(states.len());
        for state in states {
            match self.read_record(&state.book_id).await {
                Ok(Some(existing)) if existing.supersedes(&state) => {
                    debug!(book_id = %state.book_id, "Batch entry older than stored record");
                }
                _ => accepted.push(state),
            }
        }

        let mut tx = self
            .settings
            .begin_transaction()
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        for state in &accepted {
            index.insert(state.book_id.clone());
            tx.set_string(&Self::key(&state.book_id), &encode(state)?)
                .await
                .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        }
        if !accepted.is_empty() {
            tx.set_string(INDEX_KEY, &encode(&index)?)
                .await
                .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        }
        for (key, value) in &extra_entries {
            tx.set_string(key, value)
                .await
                .map_err(|e| PlaybackError::Storage(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| PlaybackError::Storage(e.to_string()))?;

        Ok(accepted.len())
    }

    fn emit_saved(&self, state: &PlaybackState) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Playback(PlaybackEvent::PositionSaved {
                book_id: state.book_id.to_string(),
                position_ms: (state.current_time.max(0.0) * 1000.0).round() as u64,
            }))
            .ok();
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| PlaybackError::Storage(e.to_string()))
}
