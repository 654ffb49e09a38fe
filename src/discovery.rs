//! Device discovery via periodic broadcast.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info};

use crate::registry::DeviceRegistry;
use crate::runtime::{self, JoinHandle};
use crate::transport::{Query, Transport};

/// Periodic broadcast discovery.
///
/// Idle until [`start`](DiscoveryLoop::start); while running it pumps
/// every transport announcement into the device registry and sends a
/// [`Query::GetService`] broadcast on a fixed interval. There is no
/// retry or backoff at this layer: lost packets are simply covered by
/// the next broadcast, and the same cadence drives the staleness sweep.
///
/// # Examples
///
/// ```ignore
/// let client = Client::new(transport);
/// client.start_discovery();
/// runtime::sleep(Duration::from_secs(2)).await;
/// println!("{} devices known", client.registry().len().await);
/// client.stop_discovery();
/// ```
pub struct DiscoveryLoop {
    transport: Arc<dyn Transport>,
    registry: Arc<DeviceRegistry>,
    interval: Duration,
    stale_after: Duration,
    running: Arc<AtomicBool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryLoop {
    /// Broadcast cadence while running.
    pub const DEFAULT_INTERVAL_MS: u64 = 5000;
    /// Delay before the boot-time repeat broadcast.
    const REPEAT_DELAY_MS: u64 = 500;
    /// How often the broadcaster re-checks the stop flag while waiting.
    const STOP_POLL_MS: u64 = 250;

    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<DeviceRegistry>,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        DiscoveryLoop {
            transport,
            registry,
            interval,
            stale_after,
            running: Arc::new(AtomicBool::new(false)),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Whether the periodic broadcast is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start discovering. Idempotent while already running.
    ///
    /// Sends one broadcast immediately, a repeat shortly after to catch
    /// devices that were mid-boot, then one per interval.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("discovery already running");
            return;
        }
        info!("starting discovery, broadcasting every {:?}", self.interval);

        let pump = {
            let running = Arc::clone(&self.running);
            let registry = Arc::clone(&self.registry);
            let mut announcements = self.transport.announcements();
            runtime::spawn(async move {
                while let Some(announcement) = announcements.next().await {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    registry
                        .register(
                            &announcement.serial,
                            announcement.addr,
                            announcement.port,
                            announcement.target,
                        )
                        .await;
                }
                debug!("announcement stream ended");
            })
        };

        let broadcaster = {
            let running = Arc::clone(&self.running);
            let registry = Arc::clone(&self.registry);
            let transport = Arc::clone(&self.transport);
            let interval = self.interval;
            let stale_after = self.stale_after;
            runtime::spawn(async move {
                send_query(transport.as_ref()).await;
                if !wait_while_running(&running, Duration::from_millis(Self::REPEAT_DELAY_MS)).await
                {
                    return;
                }
                send_query(transport.as_ref()).await;

                loop {
                    if !wait_while_running(&running, interval).await {
                        return;
                    }
                    send_query(transport.as_ref()).await;
                    let evicted = registry.evict_stale(stale_after).await;
                    if evicted > 0 {
                        debug!("discovery sweep evicted {evicted} stale device(s)");
                    }
                }
            })
        };

        self.tasks.lock().unwrap().extend([pump, broadcaster]);
    }

    /// Stop the periodic broadcast.
    ///
    /// Only the discovery workers are affected; attribute fetches and
    /// dispatches already in flight complete or fail on their own. The
    /// registry keeps its contents and discovery can be started again.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stopping discovery");
        // Workers poll the flag and exit before the next broadcast;
        // dropping the handles also hard-cancels them on runtimes that
        // cancel on drop.
        self.tasks.lock().unwrap().clear();
    }
}

impl Drop for DiscoveryLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn send_query(transport: &dyn Transport) {
    if let Err(e) = transport.broadcast(Query::GetService).await {
        error!("discovery broadcast failed: {e}");
    }
}

/// Sleep for `total`, polling the stop flag in short slices.
///
/// Returns `false` as soon as the flag clears.
async fn wait_while_running(running: &AtomicBool, total: Duration) -> bool {
    let step = Duration::from_millis(DiscoveryLoop::STOP_POLL_MS);
    let mut waited = Duration::ZERO;
    while waited < total {
        runtime::sleep(step.min(total - waited)).await;
        waited += step;
        if !running.load(Ordering::SeqCst) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Announcement;
    use crate::transport::mock::MockTransport;
    use std::net::Ipv4Addr;

    const INTERVAL: Duration = Duration::from_millis(100);
    const STALE: Duration = Duration::from_secs(60);

    fn discovery(transport: &Arc<MockTransport>) -> (DiscoveryLoop, Arc<DeviceRegistry>) {
        let (registry, _events) = DeviceRegistry::new();
        let registry = Arc::new(registry);
        let transport: Arc<dyn Transport> = transport.clone();
        (
            DiscoveryLoop::new(transport, registry.clone(), INTERVAL, STALE),
            registry,
        )
    }

    async fn wait_until(mut condition: impl AsyncFnMut() -> bool) -> bool {
        for _ in 0..100 {
            if condition().await {
                return true;
            }
            runtime::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let transport = Arc::new(MockTransport::new());
        let (discovery, _registry) = discovery(&transport);
        assert!(!discovery.is_running());
        assert_eq!(transport.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_start_broadcasts_immediately() {
        let transport = Arc::new(MockTransport::new());
        let (discovery, _registry) = discovery(&transport);

        discovery.start();
        assert!(discovery.is_running());
        assert!(wait_until(async || transport.broadcast_count() >= 1).await);
        discovery.stop();
    }

    #[tokio::test]
    async fn test_announcements_land_in_the_registry() {
        let transport = Arc::new(MockTransport::new());
        let (discovery, registry) = discovery(&transport);

        discovery.start();
        transport.announce(Announcement {
            serial: "d073d5112233".into(),
            target: 1,
            addr: Ipv4Addr::new(10, 0, 0, 9),
            port: 56700,
        });

        assert!(wait_until(async || registry.contains("d073d5112233").await).await);
        discovery.stop();
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let transport = Arc::new(MockTransport::new());
        let (discovery, _registry) = discovery(&transport);

        discovery.start();
        discovery.start();
        assert_eq!(discovery.tasks.lock().unwrap().len(), 2);
        discovery.stop();
    }

    #[tokio::test]
    async fn test_stop_halts_broadcasting() {
        let transport = Arc::new(MockTransport::new());
        let (discovery, _registry) = discovery(&transport);

        discovery.start();
        assert!(wait_until(async || transport.broadcast_count() >= 2).await);
        discovery.stop();
        assert!(!discovery.is_running());

        // Let any broadcast already in flight finish before sampling.
        runtime::sleep(Duration::from_millis(50)).await;
        let settled = transport.broadcast_count();
        runtime::sleep(INTERVAL * 4).await;
        assert_eq!(transport.broadcast_count(), settled);
    }
}
