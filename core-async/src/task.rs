//! Task spawning.

pub use tokio::task::{spawn_blocking, yield_now, JoinError, JoinHandle};

/// Spawns a new asynchronous task on the ambient runtime.
///
/// The spawned task may run on a different worker thread, so the future must
/// be `Send + 'static`.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Result type for joined tasks.
pub type Result<T> = std::result::Result<T, JoinError>;
