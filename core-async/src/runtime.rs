//! Runtime handles for code that sits outside an async context.

use std::future::Future;
use std::io;

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Drives `future` to completion on a fresh current-thread runtime.
///
/// Must not be called from inside a runtime; use `Handle::try_current` to
/// check first.
pub fn block_on<F: Future>(future: F) -> io::Result<F::Output> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}
