//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::time::Duration;
use tracing::debug;

const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:53";
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Desktop network monitor implementation
///
/// Desktop has no portable path-change API, so connectivity is inferred from a
/// TCP connect against a well-known resolver and changes are detected by
/// polling.
#[derive(Debug, Clone)]
pub struct DesktopNetworkMonitor {
    probe_addr: String,
    probe_timeout: Duration,
    poll_interval: Duration,
}

impl DesktopNetworkMonitor {
    pub fn new() -> Self {
        Self {
            probe_addr: DEFAULT_PROBE_ADDR.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Probe a different `host:port`.
    pub fn with_probe_addr(mut self, addr: impl Into<String>) -> Self {
        self.probe_addr = addr.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            self.probe_timeout,
            tokio::net::TcpStream::connect(self.probe_addr.as_str()),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Online,
            Ok(Err(_)) | Err(_) => NetworkStatus::Offline,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let status = self.check_connectivity().await;
        debug!(status = %status, probe = %self.probe_addr, "Network probe finished");

        Ok(match status {
            // Ethernet and WiFi are indistinguishable without platform APIs.
            NetworkStatus::Online => NetworkInfo::online(NetworkType::Other),
            _ => NetworkInfo::offline(),
        })
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(DesktopNetworkChangeStream {
            monitor: self.clone(),
            last_status: None,
        }))
    }
}

/// Change stream that polls and yields only when the status differs from the
/// previous observation. The first poll always yields.
struct DesktopNetworkChangeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        loop {
            if self.last_status.is_some() {
                tokio::time::sleep(self.monitor.poll_interval).await;
            }

            if let Ok(info) = self.monitor.get_network_info().await {
                if self.last_status != Some(info.status) {
                    self.last_status = Some(info.status);
                    return Some(info);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_monitor() -> DesktopNetworkMonitor {
        // Port 1 on loopback refuses connections immediately.
        DesktopNetworkMonitor::new()
            .with_probe_addr("127.0.0.1:1")
            .with_probe_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn refused_probe_reports_offline() {
        let monitor = unreachable_monitor();
        let info = monitor.get_network_info().await.unwrap();
        assert_eq!(info.status, NetworkStatus::Offline);
        assert!(!monitor.is_connected().await);
    }

    #[tokio::test]
    async fn listening_probe_reports_online() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let monitor = DesktopNetworkMonitor::new().with_probe_addr(addr.to_string());

        let info = monitor.get_network_info().await.unwrap();
        assert_eq!(info.status, NetworkStatus::Online);
    }

    #[tokio::test]
    async fn change_stream_yields_first_observation() {
        let monitor = unreachable_monitor();
        let mut stream = monitor.subscribe_changes().await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.status, NetworkStatus::Offline);
    }
}
