//! # Sync Coordinator
//!
//! Reconciles local playback progress and bookmarks with the catalog server.
//!
//! ## Progress Sync
//!
//! 1. Load the checkpoint (per-book server timestamps, last pull time)
//! 2. Pull server progress if the pull interval has elapsed
//! 3. Push every local state that differs from what the server was last
//!    seen holding, unless the pull returned the same or a newer record, in
//!    one batch
//! 4. Keep the newer record per book (last-write-wins on `last_played_at`)
//! 5. Commit the accepted records and the new checkpoint in one transaction
//!
//! Any network failure aborts the run before step 5, so local state and the
//! checkpoint are left as they were. A run with nothing dirty and no pull due
//! makes no network calls.
//!
//! ## Bookmark Reconciliation
//!
//! Bookmarks whose book is neither in a catalog library nor downloaded are
//! reported as orphans. They are never deleted: a stale or truncated library
//! listing would otherwise destroy user data.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncCoordinator};
//!
//! let coordinator = SyncCoordinator::new(catalog, state_store, bookmarks, cache, settings)
//!     .with_config(SyncConfig::default())
//!     .with_event_bus(event_bus);
//!
//! let report = coordinator.sync_playback_progress(false).await?;
//! println!("pushed {} pulled {}", report.pushed, report.pulled);
//! ```

use crate::checkpoint::SyncCheckpoint;
use crate::job::{OrphanReport, SyncJobId, SyncReport};
use crate::{Result, SyncError};
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::{Clock, SystemClock};
use core_async::sync::Mutex;
use core_async::time::Instant;
use core_library::{BookId, BookmarkRepository, PlaybackState, RemoteCatalog};
use core_playback::{ContentCache, PlaybackStateStore};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Sync coordinator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum time between two pulls of server progress.
    pub pull_interval: Duration,
    /// Also pull server bookmarks during reconciliation.
    pub pull_bookmarks_on_reconcile: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_interval: Duration::from_secs(5 * 60),
            pull_bookmarks_on_reconcile: false,
        }
    }
}

/// Bookmark book ids absent from both the library and the download set.
pub fn find_orphaned_bookmarks(
    library: &BTreeSet<BookId>,
    downloaded: &BTreeSet<BookId>,
    bookmarked: &BTreeSet<BookId>,
) -> BTreeSet<BookId> {
    bookmarked
        .iter()
        .filter(|id| !library.contains(*id) && !downloaded.contains(*id))
        .cloned()
        .collect()
}

/// Sync coordinator for playback progress and bookmarks
pub struct SyncCoordinator {
    config: SyncConfig,
    catalog: Arc<dyn RemoteCatalog>,
    state_store: Arc<PlaybackStateStore>,
    bookmarks: Arc<dyn BookmarkRepository>,
    cache: Arc<ContentCache>,
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    /// Held for the duration of a progress sync.
    running: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        state_store: Arc<PlaybackStateStore>,
        bookmarks: Arc<dyn BookmarkRepository>,
        cache: Arc<ContentCache>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            config: SyncConfig::default(),
            catalog,
            state_store,
            bookmarks,
            cache,
            settings,
            clock: Arc::new(SystemClock),
            event_bus: None,
            running: Mutex::new(()),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether a progress sync is running right now.
    pub fn is_syncing(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Push local progress and pull server progress.
    ///
    /// `force_pull` ignores the pull interval.
    ///
    /// # Errors
    ///
    /// - [`SyncError::SyncInProgress`] if another sync is running
    /// - [`SyncError::SyncFailed`] if the catalog could not be reached or
    ///   rejected a request; nothing local was written
    /// - [`SyncError::Storage`] if local state could not be read or committed
    #[instrument(skip(self))]
    pub async fn sync_playback_progress(&self, force_pull: bool) -> Result<SyncReport> {
        let _running = self.running.try_lock().map_err(|_| {
            warn!("Progress sync requested while another is running");
            SyncError::SyncInProgress
        })?;

        let job_id = SyncJobId::new();
        let started = Instant::now();
        info!(job_id = %job_id, "Progress sync started");
        self.emit(SyncEvent::Started {
            job_id: job_id.to_string(),
        });

        match self.run_progress_sync(job_id, force_pull, started).await {
            Ok(report) => {
                info!(
                    job_id = %job_id,
                    pushed = report.pushed,
                    pulled = report.pulled,
                    applied = report.applied,
                    pull_skipped = report.pull_skipped,
                    "Progress sync completed"
                );
                self.emit(SyncEvent::Completed {
                    job_id: job_id.to_string(),
                    pushed: report.pushed as u64,
                    pulled: report.pulled as u64,
                    applied: report.applied as u64,
                    duration_ms: report.duration.as_millis() as u64,
                });
                Ok(report)
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Progress sync failed");
                self.emit(SyncEvent::Failed {
                    job_id: job_id.to_string(),
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                });
                Err(e)
            }
        }
    }

    async fn run_progress_sync(
        &self,
        job_id: SyncJobId,
        force_pull: bool,
        started: Instant,
    ) -> Result<SyncReport> {
        let checkpoint = SyncCheckpoint::load(self.settings.as_ref()).await?;
        let local = self.state_store.get_all().await?;

        let now = self.clock.now();
        let pull_due = force_pull || checkpoint.pull_due(now, self.config.pull_interval);
        let remote = if pull_due {
            debug!("Pulling server progress");
            Some(
                self.catalog
                    .pull_playback_progress()
                    .await
                    .map_err(SyncError::SyncFailed)?,
            )
        } else {
            debug!(last_pull_at = ?checkpoint.last_pull_at, "Pull interval not elapsed");
            None
        };
        let remote_by_id: HashMap<&BookId, &PlaybackState> = remote
            .iter()
            .flatten()
            .map(|state| (&state.book_id, state))
            .collect();

        // A local state is pushed when it differs from what the server was
        // last seen holding, unless the pull just returned the same record
        // or a newer one.
        let mut dirty: Vec<PlaybackState> = local
            .iter()
            .filter(|state| checkpoint.is_dirty(state))
            .filter(|state| {
                remote_by_id
                    .get(&state.book_id)
                    .map_or(true, |held| state.supersedes(held))
            })
            .cloned()
            .collect();
        dirty.sort_by(|a, b| a.book_id.cmp(&b.book_id));

        if !dirty.is_empty() {
            debug!(count = dirty.len(), "Pushing local progress");
            self.catalog
                .push_playback_progress_batch(&dirty)
                .await
                .map_err(SyncError::SyncFailed)?;
        }

        let pushed = dirty.len();
        let pulled = remote.as_ref().map_or(0, Vec::len);

        if dirty.is_empty() && remote.is_none() {
            return Ok(SyncReport {
                job_id,
                pushed,
                pulled,
                applied: 0,
                pull_skipped: true,
                duration: started.elapsed(),
            });
        }

        let local_by_id: HashMap<&BookId, &PlaybackState> =
            local.iter().map(|state| (&state.book_id, state)).collect();
        let accepted: Vec<PlaybackState> = remote_by_id
            .values()
            .filter(|incoming| {
                local_by_id
                    .get(&incoming.book_id)
                    .map_or(true, |existing| incoming.supersedes(existing))
            })
            .map(|incoming| (*incoming).clone())
            .collect();

        let mut next = checkpoint.clone();
        for state in dirty.iter().chain(accepted.iter()) {
            next.mark_synced(state);
        }
        for state in &local {
            if remote_by_id
                .get(&state.book_id)
                .is_some_and(|held| held.last_played_at == state.last_played_at)
            {
                next.mark_synced(state);
            }
        }
        next.retain_books(
            local
                .iter()
                .chain(accepted.iter())
                .map(|state| &state.book_id),
        );
        if pull_due {
            next.last_pull_at = Some(now);
        }

        let applied = self
            .state_store
            .commit_batch(accepted, vec![next.entry()?])
            .await?;

        Ok(SyncReport {
            job_id,
            pushed,
            pulled,
            applied,
            pull_skipped: !pull_due,
            duration: started.elapsed(),
        })
    }

    /// Merge server bookmarks into the local repository. Returns how many
    /// were new.
    #[instrument(skip(self))]
    pub async fn pull_bookmarks(&self) -> Result<usize> {
        let remote = self
            .catalog
            .pull_bookmarks()
            .await
            .map_err(SyncError::SyncFailed)?;
        let received = remote.len();
        let added = self
            .bookmarks
            .merge(remote)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?;
        info!(received, added, "Merged server bookmarks");
        Ok(added)
    }

    /// Report bookmarks whose book is in no library and not downloaded.
    ///
    /// Orphans are logged and published, never removed.
    #[instrument(skip(self))]
    pub async fn reconcile_bookmarks(&self) -> Result<OrphanReport> {
        if self.config.pull_bookmarks_on_reconcile {
            self.pull_bookmarks().await?;
        }

        let (library, listing_incomplete) = self.library_book_ids().await?;
        let downloaded: BTreeSet<BookId> =
            self.cache.downloaded_book_ids().await.into_iter().collect();
        let bookmarked: BTreeSet<BookId> = self
            .bookmarks
            .bookmarked_book_ids()
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))?
            .into_iter()
            .collect();

        let orphaned = find_orphaned_bookmarks(&library, &downloaded, &bookmarked);
        let report = OrphanReport {
            library_listing_incomplete: listing_incomplete,
            library_books: library.len(),
            downloaded_books: downloaded.len(),
            bookmarked_books: bookmarked.len(),
            orphaned,
        };

        if report.has_orphans() {
            let ids: Vec<String> = report.orphaned.iter().map(ToString::to_string).collect();
            warn!(
                count = ids.len(),
                book_ids = ?ids,
                listing_incomplete,
                "Bookmarks reference books missing from the library and the cache"
            );
            self.emit(SyncEvent::OrphanedBookmarks {
                count: ids.len() as u64,
                book_ids: ids,
            });
        } else {
            debug!(bookmarked = report.bookmarked_books, "No orphaned bookmarks");
        }

        Ok(report)
    }

    /// Book ids across all libraries, and whether any listing came back
    /// shorter than the library's reported count.
    async fn library_book_ids(&self) -> Result<(BTreeSet<BookId>, bool)> {
        let libraries = self
            .catalog
            .fetch_libraries()
            .await
            .map_err(SyncError::SyncFailed)?;

        let mut ids = BTreeSet::new();
        let mut incomplete = false;
        for library in libraries {
            let listed = self
                .catalog
                .fetch_library_book_ids(&library.id)
                .await
                .map_err(SyncError::SyncFailed)?;
            let expected = self
                .catalog
                .fetch_library_stats(&library.id)
                .await
                .map_err(SyncError::SyncFailed)?;
            if (listed.len() as u64) < expected {
                warn!(
                    library_id = %library.id,
                    listed = listed.len(),
                    expected,
                    "Library listing shorter than reported count"
                );
                incomplete = true;
            }
            ids.extend(listed);
        }
        Ok((ids, incomplete))
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> BTreeSet<BookId> {
        values.iter().map(|v| BookId::new(*v)).collect()
    }

    #[test]
    fn orphans_are_bookmarks_outside_library_and_downloads() {
        let orphans = find_orphaned_bookmarks(&ids(&["A", "B"]), &ids(&["C"]), &ids(&["A", "D"]));
        assert_eq!(orphans, ids(&["D"]));
    }

    #[test]
    fn downloaded_books_are_not_orphans() {
        let orphans = find_orphaned_bookmarks(&ids(&[]), &ids(&["C"]), &ids(&["C"]));
        assert!(orphans.is_empty());
    }

    #[test]
    fn no_bookmarks_no_orphans() {
        let orphans = find_orphaned_bookmarks(&ids(&["A"]), &ids(&["B"]), &ids(&[]));
        assert!(orphans.is_empty());
    }

    #[test]
    fn default_pull_interval_is_five_minutes() {
        assert_eq!(SyncConfig::default().pull_interval, Duration::from_secs(300));
    }
}
