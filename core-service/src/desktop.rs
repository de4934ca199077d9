//! Desktop bootstrap using the `bridge-desktop` implementations.

use crate::{CoreService, Result};
use bridge_desktop::{DesktopNetworkMonitor, ReqwestHttpClient, SqliteSettingsStore, TokioFileSystem};
use bridge_traits::player::PlayerService;
use bridge_traits::storage::FileSystemAccess;
use core_library::CatalogSession;
use core_runtime::CoreConfigBuilder;
use std::sync::Arc;
use tracing::info;

const SETTINGS_DB_FILE: &str = "settings.db";

/// Builder pre-filled with the desktop bridges.
///
/// The player is always host-provided. Settings live in
/// `<data dir>/settings.db`.
pub async fn desktop_config(player: Arc<dyn PlayerService>) -> Result<CoreConfigBuilder> {
    let file_system = Arc::new(TokioFileSystem::new());
    let data_dir = file_system.get_data_directory().await?;
    let settings = SqliteSettingsStore::new(data_dir.join(SETTINGS_DB_FILE)).await?;
    let http_client = ReqwestHttpClient::new()?;

    info!(data_dir = ?data_dir, "Using desktop bridges");

    Ok(CoreConfigBuilder::default()
        .http_client(Arc::new(http_client))
        .file_system(file_system)
        .settings_store(Arc::new(settings))
        .network_monitor(Arc::new(DesktopNetworkMonitor::new()))
        .player(player))
}

/// Start the core with desktop bridges and default tuning.
///
/// ```rust,ignore
/// use core_library::CatalogSession;
///
/// let session = CatalogSession::new("https://abs.example.org", Some(token));
/// let core = core_service::desktop::bootstrap_desktop(player, session).await?;
/// core.play_book(&book, true).await?;
/// ```
pub async fn bootstrap_desktop(
    player: Arc<dyn PlayerService>,
    session: CatalogSession,
) -> Result<CoreService> {
    let config = desktop_config(player).await?.build()?;
    CoreService::start(config, session).await
}
