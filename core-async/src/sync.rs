//! Synchronization primitives.
//!
//! All primitives are `Send + Sync` and async-aware: holding a guard across an
//! `.await` does not block the executor thread.
//!
//! ```rust
//! use core_async::sync::{Mutex, RwLock};
//!
//! async fn example() {
//!     let mutex = Mutex::new(42);
//!     *mutex.lock().await += 1;
//!
//!     let index = RwLock::new(vec![1, 2, 3]);
//!     assert_eq!(index.read().await.len(), 3);
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedSemaphorePermit, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit, TryLockError,
};

/// Cooperative cancellation for long-lived background tasks
/// (connectivity observation, auto-save timer).
pub use tokio_util::sync::CancellationToken;
