//! Periodic auto-save signal.
//!
//! The timer owns one task that ticks every interval and broadcasts an
//! [`AutoSaveSignal`]. Listeners subscribe and unsubscribe explicitly; a
//! tick with no listeners is dropped.

use core_async::sync::{broadcast, CancellationToken};
use core_async::task::JoinHandle;
use core_async::time::{periodic, Duration};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Default auto-save period.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

const SIGNAL_BUFFER: usize = 16;

/// One auto-save tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSaveSignal {
    /// Ticks since the timer was created, starting at 1.
    pub sequence: u64,
}

/// Receiving end of the auto-save broadcast.
pub struct AutoSaveSubscription {
    receiver: broadcast::Receiver<AutoSaveSignal>,
}

impl AutoSaveSubscription {
    /// Next signal, or `None` once the timer is dropped.
    ///
    /// A listener that fell behind skips to the newest signal.
    pub async fn recv(&mut self) -> Option<AutoSaveSignal> {
        loop {
            match self.receiver.recv().await {
                Ok(signal) => return Some(signal),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Auto-save listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving signals.
    pub fn unsubscribe(self) {}
}

struct TimerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Interval timer broadcasting auto-save signals.
pub struct AutoSaveTimer {
    interval: Duration,
    sender: broadcast::Sender<AutoSaveSignal>,
    sequence: Arc<AtomicU64>,
    task: Mutex<Option<TimerTask>>,
}

impl AutoSaveTimer {
    pub fn new(interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_BUFFER);
        Self {
            interval,
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscribe(&self) -> AutoSaveSubscription {
        AutoSaveSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Start ticking. The first signal fires one interval from now.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("Auto-save timer already running");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sender = self.sender.clone();
        let sequence = self.sequence.clone();
        let interval = self.interval;

        let handle = core_async::spawn(async move {
            let mut ticker = periodic(interval);
            loop {
                core_async::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let signal = AutoSaveSignal {
                            sequence: sequence.fetch_add(1, Ordering::Relaxed) + 1,
                        };
                        if sender.send(signal).is_err() {
                            trace!("Auto-save tick without listeners");
                        }
                    }
                }
            }
        });

        *task = Some(TimerTask { cancel, handle });
        info!(interval_secs = interval.as_secs(), "Auto-save timer started");
    }

    /// Stop ticking and wait for the timer task to end.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Auto-save timer task ended abnormally");
        }
        info!("Auto-save timer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

impl Default for AutoSaveTimer {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOSAVE_INTERVAL)
    }
}

impl Drop for AutoSaveTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}
