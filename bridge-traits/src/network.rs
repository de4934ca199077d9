//! Network Monitoring Abstraction
//!
//! Provides device connectivity information and a change stream the core
//! observes to decide between cached and live content.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

/// Three-valued device connectivity.
///
/// `Unknown` is the state before the platform has reported anything. Values
/// are published as transitions and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        matches!(self, NetworkStatus::Online)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetworkStatus::Online => "online",
            NetworkStatus::Offline => "offline",
            NetworkStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn online(network_type: NetworkType) -> Self {
        Self {
            status: NetworkStatus::Online,
            network_type: Some(network_type),
            is_metered: matches!(network_type, NetworkType::Cellular),
        }
    }

    pub fn offline() -> Self {
        Self {
            status: NetworkStatus::Offline,
            network_type: None,
            is_metered: false,
        }
    }
}

/// Network monitor trait
///
/// Reports whether the device has a usable network path. This says nothing
/// about whether a particular server answers; server reachability is probed
/// separately by the core.
///
/// # Platform Support
///
/// - **Desktop**: TCP probe against a well-known resolver
/// - **iOS**: `NWPathMonitor`
/// - **Android**: `ConnectivityManager`
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn can_download(monitor: &dyn NetworkMonitor) -> bool {
///     match monitor.get_network_info().await {
///         Ok(info) => info.status.is_online() && !info.is_metered,
///         Err(_) => false,
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Online,
                ..
            })
        )
    }

    /// Subscribe to network status changes
    ///
    /// Implementations should emit an update whenever the network path
    /// changes. Consumers tolerate repeated identical updates.
    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>>;
}

/// Stream of network status changes
#[async_trait::async_trait]
pub trait NetworkChangeStream: Send {
    /// Get the next network info update
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<NetworkInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_unknown() {
        assert_eq!(NetworkStatus::default(), NetworkStatus::Unknown);
        assert!(!NetworkStatus::Unknown.is_online());
    }

    #[test]
    fn cellular_is_metered() {
        let info = NetworkInfo::online(NetworkType::Cellular);
        assert_eq!(info.status, NetworkStatus::Online);
        assert!(info.is_metered);
        assert!(!NetworkInfo::online(NetworkType::WiFi).is_metered);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&NetworkStatus::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
        assert_eq!(NetworkStatus::Online.to_string(), "online");
    }
}
