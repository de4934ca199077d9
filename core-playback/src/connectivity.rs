//! # Connectivity Monitor
//!
//! Observes the platform network path and the catalog server, and publishes
//! a three-valued [`NetworkStatus`].
//!
//! One monitoring task owns every status write. Platform changes arrive
//! through the `NetworkMonitor` bridge's change stream; hosts that push
//! status themselves go through [`ConnectivityMonitor::report_status`],
//! which enqueues into the same task. Repeated identical observations are
//! swallowed, so callbacks and `StatusChanged` events fire once per distinct
//! transition.
//!
//! Server probes may run on the caller's task (the resolver probes on
//! demand). A reachability answer is only recorded if the device status did not
//! change while the ping was in flight.
//!
//! Nothing here can fail. If the platform never answers the status stays at
//! `unknown`.

use bridge_traits::network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus};
use core_async::sync::{mpsc, watch, CancellationToken, Mutex as AsyncMutex};
use core_async::task::JoinHandle;
use core_async::time::{timeout, Duration};
use core_library::RemoteCatalog;
use core_runtime::events::{ConnectivityEvent, CoreEvent, EventBus};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Default bound on a catalog server probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Invoked with `(previous, current)` on every distinct transition.
pub type StatusCallback = Arc<dyn Fn(NetworkStatus, NetworkStatus) + Send + Sync>;

/// Handle returned by [`ConnectivityMonitor::on_status_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCallbackId(u64);

struct Shared {
    status: watch::Sender<NetworkStatus>,
    reachable: watch::Sender<bool>,
    /// Bumped on every status transition. Reachability writes hold it.
    generation: Mutex<u64>,
    callbacks: RwLock<Vec<(StatusCallbackId, StatusCallback)>>,
    next_callback_id: AtomicU64,
    reports_tx: mpsc::UnboundedSender<NetworkStatus>,
    reports_rx: AsyncMutex<mpsc::UnboundedReceiver<NetworkStatus>>,
}

#[derive(Clone)]
struct Context {
    network: Arc<dyn NetworkMonitor>,
    catalog: Option<Arc<dyn RemoteCatalog>>,
    probe_timeout: Duration,
    events: Option<EventBus>,
    shared: Arc<Shared>,
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Device and server reachability observer.
pub struct ConnectivityMonitor {
    ctx: Context,
    task: Mutex<Option<MonitorTask>>,
}

impl ConnectivityMonitor {
    /// Create a monitor over the platform network bridge.
    ///
    /// Without a catalog (see [`with_catalog`](Self::with_catalog)) the
    /// server is never considered reachable.
    pub fn new(network: Arc<dyn NetworkMonitor>) -> Self {
        let (status, _) = watch::channel(NetworkStatus::Unknown);
        let (reachable, _) = watch::channel(false);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        Self {
            ctx: Context {
                network,
                catalog: None,
                probe_timeout: DEFAULT_PROBE_TIMEOUT,
                events: None,
                shared: Arc::new(Shared {
                    status,
                    reachable,
                    generation: Mutex::new(0),
                    callbacks: RwLock::new(Vec::new()),
                    next_callback_id: AtomicU64::new(1),
                    reports_tx,
                    reports_rx: AsyncMutex::new(reports_rx),
                }),
            },
            task: Mutex::new(None),
        }
    }

    /// Catalog used for server reachability probes.
    pub fn with_catalog(mut self, catalog: Arc<dyn RemoteCatalog>) -> Self {
        self.ctx.catalog = Some(catalog);
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.ctx.probe_timeout = probe_timeout;
        self
    }

    /// Set event bus for transition events.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.ctx.events = Some(event_bus);
        self
    }

    /// Last observed device status, `unknown` before the first observation.
    pub fn current_status(&self) -> NetworkStatus {
        *self.ctx.shared.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current_status().is_online()
    }

    /// Result of the most recent catalog probe. `false` until a probe
    /// succeeds.
    pub fn is_server_reachable(&self) -> bool {
        *self.ctx.shared.reachable.borrow()
    }

    /// Watch the device status.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.ctx.shared.status.subscribe()
    }

    /// Watch the server reachability flag.
    pub fn subscribe_reachability(&self) -> watch::Receiver<bool> {
        self.ctx.shared.reachable.subscribe()
    }

    /// Register a callback fired once per distinct status transition.
    ///
    /// Callbacks run on the monitoring task and must not block.
    pub fn on_status_change<F>(&self, callback: F) -> StatusCallbackId
    where
        F: Fn(NetworkStatus, NetworkStatus) + Send + Sync + 'static,
    {
        let id = StatusCallbackId(
            self.ctx
                .shared
                .next_callback_id
                .fetch_add(1, Ordering::Relaxed),
        );
        self.ctx
            .shared
            .callbacks
            .write()
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns `false` if the id was not registered.
    pub fn remove_status_callback(&self, id: StatusCallbackId) -> bool {
        let mut callbacks = self.ctx.shared.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    /// Push a status observed by the host.
    ///
    /// The value is applied by the monitoring task; reports made while
    /// monitoring is stopped are applied once it starts.
    pub fn report_status(&self, status: NetworkStatus) {
        if self.ctx.shared.reports_tx.send(status).is_err() {
            warn!(status = %status, "Status report dropped");
        }
    }

    /// Probe the catalog server now and record the result.
    ///
    /// Skips the probe and reports `false` while the device is offline.
    #[instrument(skip(self))]
    pub async fn check_server_reachability(&self) -> bool {
        if self.current_status() == NetworkStatus::Offline {
            return false;
        }
        self.ctx.probe().await
    }

    /// Start observing the platform network path. No-op if already running.
    pub fn start_monitoring(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("Connectivity monitoring already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = core_async::spawn(run(self.ctx.clone(), cancel.clone()));
        *task = Some(MonitorTask { cancel, handle });
        info!("Connectivity monitoring started");
    }

    /// Stop observing and wait for the monitoring task to finish.
    ///
    /// The last observed status is kept.
    pub async fn stop_monitoring(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Connectivity monitoring task ended abnormally");
        }
        info!("Connectivity monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.task.lock().is_some()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

impl Context {
    async fn apply(&self, status: NetworkStatus) {
        let mut previous = status;
        let changed = self.shared.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                previous = *current;
                *current = status;
                true
            }
        });
        if !changed {
            trace!(status = %status, "Repeated network status ignored");
            return;
        }

        info!(previous = %previous, current = %status, "Network status changed");

        {
            let mut generation = self.shared.generation.lock();
            *generation += 1;
            if status == NetworkStatus::Offline {
                self.set_reachable(false);
            }
        }

        let callbacks: Vec<StatusCallback> = self
            .shared
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(previous, status);
        }

        self.emit(ConnectivityEvent::StatusChanged {
            previous: previous.as_str().to_string(),
            current: status.as_str().to_string(),
        });

        if status == NetworkStatus::Online {
            self.probe().await;
        }
    }

    async fn probe(&self) -> bool {
        let started_at = *self.shared.generation.lock();
        let reachable = match &self.catalog {
            None => {
                debug!("No catalog configured; server treated as unreachable");
                false
            }
            Some(catalog) => match timeout(self.probe_timeout, catalog.ping()).await {
                Ok(Ok(reachable)) => reachable,
                Ok(Err(e)) => {
                    debug!(error = %e, "Catalog ping failed");
                    false
                }
                Err(_) => {
                    debug!(
                        timeout_ms = self.probe_timeout.as_millis() as u64,
                        "Catalog ping timed out"
                    );
                    false
                }
            },
        };

        let generation = self.shared.generation.lock();
        if *generation != started_at {
            debug!(reachable, "Network status changed while pinging the server; result dropped");
            return *self.shared.reachable.borrow();
        }
        self.set_reachable(reachable);
        reachable
    }

    fn set_reachable(&self, reachable: bool) {
        let changed = self.shared.reachable.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            info!(reachable, "Server reachability changed");
            self.emit(ConnectivityEvent::ServerReachabilityChanged { reachable });
        }
    }

    fn emit(&self, event: ConnectivityEvent) {
        if let Some(bus) = &self.events {
            bus.emit(CoreEvent::Connectivity(event)).ok();
        }
    }
}

async fn next_change(changes: &mut Option<Box<dyn NetworkChangeStream>>) -> Option<NetworkInfo> {
    match changes {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn run(ctx: Context, cancel: CancellationToken) {
    let mut reports = ctx.shared.reports_rx.lock().await;

    // Subscribe before the first read so no change between the two is lost.
    let mut changes = match ctx.network.subscribe_changes().await {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "Network change stream unavailable; relying on reported status");
            None
        }
    };

    match ctx.network.get_network_info().await {
        Ok(info) => ctx.apply(info.status).await,
        Err(e) => warn!(error = %e, "Initial network status unavailable"),
    }

    loop {
        core_async::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(status) = reports.recv() => ctx.apply(status).await,
            change = next_change(&mut changes) => match change {
                Some(info) => ctx.apply(info.status).await,
                None => {
                    debug!("Network change stream closed");
                    changes = None;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::network::NetworkType;
    use bridge_traits::testing::ScriptedNetworkMonitor;
    use core_async::time::sleep;
    use core_library::testing::FakeCatalog;

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn status_is_unknown_before_first_observation() {
        let network = Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::offline()));
        let monitor = ConnectivityMonitor::new(network);

        assert_eq!(monitor.current_status(), NetworkStatus::Unknown);
        assert!(!monitor.is_online());
        assert!(!monitor.is_server_reachable());
    }

    #[tokio::test]
    async fn callback_fires_once_per_distinct_transition() {
        let network = Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::offline()));
        let monitor = ConnectivityMonitor::new(network.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        monitor.on_status_change(move |previous, current| sink.lock().push((previous, current)));

        monitor.start_monitoring();
        let mut rx = monitor.subscribe();
        rx.wait_for(|s| *s == NetworkStatus::Offline).await.unwrap();

        network.push(NetworkInfo::online(NetworkType::WiFi)).await;
        network.push(NetworkInfo::online(NetworkType::WiFi)).await;
        network.push(NetworkInfo::offline()).await;
        network.push(NetworkInfo::online(NetworkType::Ethernet)).await;

        wait_until(|| seen.lock().len() >= 4).await;
        monitor.stop_monitoring().await;

        use NetworkStatus::*;
        assert_eq!(
            *seen.lock(),
            vec![
                (Unknown, Offline),
                (Offline, Online),
                (Online, Offline),
                (Offline, Online)
            ]
        );
    }

    #[tokio::test]
    async fn online_transition_probes_the_server() {
        let network = Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::offline()));
        let catalog = Arc::new(FakeCatalog::new());
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let monitor = ConnectivityMonitor::new(network)
            .with_catalog(catalog.clone())
            .with_event_bus(bus);

        monitor.start_monitoring();
        monitor.report_status(NetworkStatus::Online);

        let mut reachable = monitor.subscribe_reachability();
        reachable.wait_for(|r| *r).await.unwrap();
        assert!(monitor.is_online());

        monitor.report_status(NetworkStatus::Offline);
        reachable.wait_for(|r| !*r).await.unwrap();
        monitor.stop_monitoring().await;

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert!(received.contains(&CoreEvent::Connectivity(
            ConnectivityEvent::ServerReachabilityChanged { reachable: true }
        )));
        assert!(received.contains(&CoreEvent::Connectivity(
            ConnectivityEvent::StatusChanged {
                previous: "online".to_string(),
                current: "offline".to_string(),
            }
        )));
    }

    #[tokio::test]
    async fn unreachable_catalog_reports_false() {
        let network = Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::online(
            NetworkType::WiFi,
        )));
        let catalog = Arc::new(FakeCatalog::new());
        catalog.set_offline(true);
        let monitor = ConnectivityMonitor::new(network).with_catalog(catalog);

        assert!(!monitor.check_server_reachability().await);
        assert!(!monitor.is_server_reachable());
    }

    #[tokio::test]
    async fn reachability_answer_arriving_after_going_offline_is_dropped() {
        let network = Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::online(
            NetworkType::WiFi,
        )));
        let catalog = Arc::new(FakeCatalog::new());
        let monitor = ConnectivityMonitor::new(network).with_catalog(catalog.clone());
        monitor.start_monitoring();
        monitor
            .subscribe_reachability()
            .wait_for(|r| *r)
            .await
            .unwrap();

        catalog.set_ping_delay(Some(Duration::from_millis(200))).await;
        let (reachable, _) = tokio::join!(monitor.check_server_reachability(), async {
            sleep(Duration::from_millis(50)).await;
            monitor.report_status(NetworkStatus::Offline);
            monitor
                .subscribe()
                .wait_for(|s| *s == NetworkStatus::Offline)
                .await
                .unwrap();
        });

        assert!(!reachable);
        assert!(!monitor.is_server_reachable());

        monitor.report_status(NetworkStatus::Unknown);
        monitor
            .subscribe()
            .wait_for(|s| *s == NetworkStatus::Unknown)
            .await
            .unwrap();
        assert!(!monitor.is_server_reachable());
        monitor.stop_monitoring().await;
    }

    #[tokio::test]
    async fn without_catalog_server_is_never_reachable() {
        let network = Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::online(
            NetworkType::WiFi,
        )));
        let monitor = ConnectivityMonitor::new(network);

        assert!(!monitor.check_server_reachability().await);
    }

    #[tokio::test]
    async fn reports_made_while_stopped_apply_after_restart() {
        let network = Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::offline()));
        let monitor = ConnectivityMonitor::new(network);

        monitor.start_monitoring();
        let mut rx = monitor.subscribe();
        rx.wait_for(|s| *s == NetworkStatus::Offline).await.unwrap();
        monitor.stop_monitoring().await;
        assert!(!monitor.is_monitoring());

        monitor.report_status(NetworkStatus::Online);
        assert_eq!(monitor.current_status(), NetworkStatus::Offline);

        monitor.start_monitoring();
        rx.wait_for(|s| *s == NetworkStatus::Online).await.unwrap();
        monitor.stop_monitoring().await;
    }

    #[tokio::test]
    async fn removed_callback_is_not_invoked() {
        let network = Arc::new(ScriptedNetworkMonitor::new(NetworkInfo::offline()));
        let monitor = ConnectivityMonitor::new(network);
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let id = monitor.on_status_change(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(monitor.remove_status_callback(id));
        assert!(!monitor.remove_status_callback(id));

        monitor.start_monitoring();
        monitor
            .subscribe()
            .wait_for(|s| *s == NetworkStatus::Offline)
            .await
            .unwrap();
        monitor.stop_monitoring().await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
