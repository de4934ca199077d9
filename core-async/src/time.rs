//! Time utilities.

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
pub use tokio::time::{
    error::Elapsed, interval, sleep, sleep_until, timeout, Interval, MissedTickBehavior,
};

/// Milliseconds since the Unix epoch, saturating to zero if the clock is
/// before 1970.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Builds an interval whose first tick happens one `period` from now and which
/// delays (rather than bursts) ticks that were missed while the task was busy.
pub fn periodic(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
