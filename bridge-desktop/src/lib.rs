//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs` and the platform app directories
//! - `SettingsStore` using a SQLite-backed key-value table
//! - `NetworkMonitor` using a TCP reachability probe
//!
//! The player and image cache have no desktop default; hosts inject their own.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteSettingsStore, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let fs = TokioFileSystem::new();
//!     let store = SqliteSettingsStore::new("/tmp/audioshelf/core.db".into()).await?;
//!     Ok(())
//! }
//! ```

mod filesystem;
mod http;
mod network;
mod settings;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;
pub use settings::SqliteSettingsStore;
