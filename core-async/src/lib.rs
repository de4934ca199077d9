//! Async runtime primitives for the audioshelf core.
//!
//! Core crates depend on this crate instead of reaching for tokio directly,
//! so the scheduling model (cooperative tasks, one connectivity observer,
//! one auto-save timer) is expressed through a single set of primitives.
//!
//! # Modules
//!
//! - `task`: task spawning and join handles
//! - `time`: sleep, intervals, timeouts and wall-clock helpers
//! - `sync`: async-aware locks, channels and cancellation
//! - `runtime`: handles and `block_on` for synchronous callers
//!
//! `select!` is re-exported for tasks that wait on a cancellation token
//! alongside their work.
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let handle = task::spawn(async {
//!         sleep(Duration::from_millis(10)).await;
//!         42
//!     });
//!     assert_eq!(handle.await.unwrap(), 42);
//! }
//! ```

pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use tokio::select;
pub use time::{sleep, Duration, Instant};
