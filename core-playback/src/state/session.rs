//! Binding between a loaded book, the host player and the state store.

use crate::error::Result;
use crate::state::autosave::AutoSaveTimer;
use crate::state::store::PlaybackStateStore;
use bridge_traits::player::PlayerService;
use bridge_traits::time::Clock;
use core_async::sync::CancellationToken;
use core_async::task::JoinHandle;
use core_library::{BookId, PlaybackState};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Positions within this many seconds of the end count as finished.
const FINISHED_THRESHOLD_SECS: f64 = 1.0;

/// Persists the player position of one book.
///
/// The session is live until [`end`](Self::end) is called. Flushes are
/// skipped once the player has moved on to another book.
pub struct PlaybackSession {
    book_id: BookId,
    player: Arc<dyn PlayerService>,
    store: Arc<PlaybackStateStore>,
    clock: Arc<dyn Clock>,
    ended: CancellationToken,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSession {
    pub fn new(
        book_id: BookId,
        player: Arc<dyn PlayerService>,
        store: Arc<PlaybackStateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            book_id,
            player,
            store,
            clock,
            ended: CancellationToken::new(),
            autosave: Mutex::new(None),
        }
    }

    pub fn book_id(&self) -> &BookId {
        &self.book_id
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    /// Read the position from the player and save it.
    ///
    /// Returns `Ok(false)` when nothing was written: the player holds a
    /// different book, or the store kept a newer record.
    #[instrument(skip(self), fields(book_id = %self.book_id))]
    pub async fn flush(&self) -> Result<bool> {
        match self.player.loaded_book_id().await {
            Some(loaded) if loaded == self.book_id.as_str() => {}
            other => {
                debug!(loaded = ?other, "Player no longer holds this book; skipping save");
                return Ok(false);
            }
        }

        let current_time = self.player.current_time().await;
        let duration = self.player.duration().await;
        let chapter = self.player.current_chapter_index().await;
        let finished = duration > 0.0 && current_time >= duration - FINISHED_THRESHOLD_SECS;

        let state = PlaybackState::new(
            self.book_id.clone(),
            current_time,
            duration,
            self.clock.unix_timestamp_millis(),
        )
        .with_chapter(chapter)
        .finished(finished);

        self.store.save(state).await
    }

    /// Flush on every auto-save signal until the session ends.
    ///
    /// Replaces a previously spawned auto-save loop.
    pub fn spawn_autosave(self: &Arc<Self>, timer: &AutoSaveTimer) {
        let mut subscription = timer.subscribe();
        let session = Arc::clone(self);
        let ended = self.ended.clone();

        let handle = core_async::spawn(async move {
            loop {
                core_async::select! {
                    _ = ended.cancelled() => break,
                    signal = subscription.recv() => {
                        let Some(signal) = signal else { break };
                        if let Err(e) = session.flush().await {
                            warn!(sequence = signal.sequence, error = %e, "Auto-save failed");
                        }
                    }
                }
            }
            subscription.unsubscribe();
        });

        if let Some(previous) = self.autosave.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Final flush, then stop auto-saving.
    pub async fn end(&self) -> Result<bool> {
        let saved = self.flush().await;
        self.ended.cancel();
        let handle = self.autosave.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Auto-save loop ended abnormally");
                }
            }
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::player::PlayerLoadRequest;
    use bridge_traits::testing::{InMemorySettingsStore, ManualClock, RecordingPlayer};
    use core_async::time::Duration;

    async fn loaded_player(book_id: &str) -> Arc<RecordingPlayer> {
        let player = Arc::new(RecordingPlayer::new());
        player
            .load(PlayerLoadRequest {
                book_id: book_id.to_string(),
                title: "Dune".to_string(),
                author: None,
                tracks: vec![bridge_traits::player::PlayerTrack {
                    source: bridge_traits::player::AudioSource::LocalFile {
                        path: "/books/li_1/001-a.mp3".into(),
                    },
                    start_offset: 0.0,
                    duration: 1200.0,
                    mime_type: None,
                }],
                chapters: Vec::new(),
                is_offline: true,
                start_position: None,
                start_chapter: None,
            })
            .await
            .unwrap();
        player
    }

    fn store() -> Arc<PlaybackStateStore> {
        Arc::new(PlaybackStateStore::new(Arc::new(
            InMemorySettingsStore::new(),
        )))
    }

    #[tokio::test]
    async fn flush_saves_player_position() {
        let player = loaded_player("li_1").await;
        player.set_position(421.5, 2).await;
        let store = store();
        let session = PlaybackSession::new(
            BookId::new("li_1"),
            player,
            store.clone(),
            Arc::new(ManualClock::at_millis(7_000)),
        );

        assert!(session.flush().await.unwrap());
        let saved = store.load(&BookId::new("li_1")).await.unwrap().unwrap();
        assert_eq!(saved.current_time, 421.5);
        assert_eq!(saved.chapter_index, 2);
        assert_eq!(saved.duration, 1200.0);
        assert_eq!(saved.last_played_at, 7_000);
        assert!(!saved.is_finished);
    }

    #[tokio::test]
    async fn position_at_the_end_is_finished() {
        let player = loaded_player("li_1").await;
        player.set_position(1199.5, 0).await;
        let store = store();
        let session = PlaybackSession::new(
            BookId::new("li_1"),
            player,
            store.clone(),
            Arc::new(ManualClock::at_millis(1)),
        );

        session.flush().await.unwrap();
        assert!(store.load(&BookId::new("li_1")).await.unwrap().unwrap().is_finished);
    }

    #[tokio::test]
    async fn flush_skips_when_another_book_is_loaded() {
        let player = loaded_player("li_other").await;
        let store = store();
        let session = PlaybackSession::new(
            BookId::new("li_1"),
            player,
            store.clone(),
            Arc::new(ManualClock::at_millis(1)),
        );

        assert!(!session.flush().await.unwrap());
        assert!(store.load(&BookId::new("li_1")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_flushes_until_the_session_ends() {
        let player = loaded_player("li_1").await;
        let store = store();
        let clock = ManualClock::at_millis(1_000);
        let timer = AutoSaveTimer::new(Duration::from_secs(30));
        let session = Arc::new(PlaybackSession::new(
            BookId::new("li_1"),
            player.clone(),
            store.clone(),
            Arc::new(clock.clone()),
        ));

        session.spawn_autosave(&timer);
        timer.start();

        player.set_position(30.0, 0).await;
        core_async::time::sleep(Duration::from_secs(31)).await;
        core_async::task::yield_now().await;
        let saved = store.load(&BookId::new("li_1")).await.unwrap().unwrap();
        assert_eq!(saved.current_time, 30.0);

        clock.advance_millis(60_000);
        player.set_position(95.0, 0).await;
        session.end().await.unwrap();
        assert!(session.is_ended());
        assert_eq!(timer.subscriber_count(), 0);

        let saved = store.load(&BookId::new("li_1")).await.unwrap().unwrap();
        assert_eq!(saved.current_time, 95.0);
        timer.stop().await;
    }
}
