//! Authoritative store of discovered devices and their attributes.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use log::{debug, warn};

use crate::errors::Error;
use crate::runtime::{Instant, Mutex};
use crate::types::{Hsbk, PowerState};

type Result<T> = std::result::Result<T, Error>;

/// A discovered light on the network.
///
/// The serial is the device's stable identity; address and port may
/// change between discovery cycles and are updated in place.
#[derive(Debug, Clone)]
pub struct Device {
    serial: String,
    addr: Ipv4Addr,
    port: u16,
    target: u64,
    last_seen: Instant,
}

impl Device {
    pub(crate) fn new(serial: &str, addr: Ipv4Addr, port: u16, target: u64) -> Self {
        Device {
            serial: serial.to_string(),
            addr,
            port,
            target,
            last_seen: Instant::now(),
        }
    }

    /// Stable serial identifier (hex, e.g. `d073d5112233`).
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Address the device was last seen at.
    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Service port the device listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wire-protocol target id.
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Time since the last discovery response from this device.
    pub fn seen_ago(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Mutable attribute bag for a device.
///
/// Fields are populated independently after discovery; each update is
/// last-write-wins with no cross-field transaction.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub label: Option<String>,
    /// Canonical group label string.
    pub group: Option<String>,
    /// Canonical location label string.
    pub location: Option<String>,
    pub power: PowerState,
    pub color: Option<Hsbk>,
    pub capabilities: Option<HashMap<String, bool>>,
}

/// Event emitted by the registry when the device set changes.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A never-before-seen serial was registered. Emitted exactly once
    /// per serial; re-discovery does not repeat it.
    Added(Device),
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    device: Device,
    info: DeviceInfo,
}

/// The in-memory device registry, keyed by serial.
///
/// All mutation goes through one async mutex, so concurrent
/// registrations of the same serial collapse into a single entry.
pub struct DeviceRegistry {
    entries: Mutex<HashMap<String, DeviceEntry>>,
    events: UnboundedSender<DeviceEvent>,
}

impl DeviceRegistry {
    /// Create a registry and the event stream fed by it.
    ///
    /// The receiver yields one [`DeviceEvent::Added`] per new serial;
    /// the subscriber is expected to run the one-time attribute fetch
    /// batch for it (see [`crate::Client`]).
    pub fn new() -> (Self, UnboundedReceiver<DeviceEvent>) {
        let (events, receiver) = mpsc::unbounded();
        (
            DeviceRegistry {
                entries: Mutex::new(HashMap::new()),
                events,
            },
            receiver,
        )
    }

    /// Idempotent upsert from a discovery response.
    ///
    /// A later registration of a known serial refreshes address, port,
    /// target and the last-seen timestamp in place; it never creates a
    /// duplicate entry and never re-triggers attribute fetches.
    pub async fn register(&self, serial: &str, addr: Ipv4Addr, port: u16, target: u64) -> Device {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(serial) {
            if entry.device.addr != addr || entry.device.port != port {
                debug!("device {serial} moved to {addr}:{port}");
            }
            entry.device.addr = addr;
            entry.device.port = port;
            entry.device.target = target;
            entry.device.last_seen = Instant::now();
            return entry.device.clone();
        }

        debug!("registered new device {serial} at {addr}:{port}");
        let device = Device::new(serial, addr, port, target);
        entries.insert(
            serial.to_string(),
            DeviceEntry {
                device: device.clone(),
                info: DeviceInfo::default(),
            },
        );
        if self
            .events
            .unbounded_send(DeviceEvent::Added(device.clone()))
            .is_err()
        {
            warn!("device event receiver dropped; {serial} will not be enriched");
        }
        device
    }

    /// Look up a device by serial.
    ///
    /// Fails fast with [`Error::DeviceNotFound`] when the serial has
    /// never been seen (or has been evicted); it never blocks waiting
    /// for a registration.
    pub async fn get(&self, serial: &str) -> Result<Device> {
        self.entries
            .lock()
            .await
            .get(serial)
            .map(|entry| entry.device.clone())
            .ok_or_else(|| Error::DeviceNotFound(serial.to_string()))
    }

    /// Snapshot the attributes of one device.
    pub async fn info(&self, serial: &str) -> Option<DeviceInfo> {
        self.entries
            .lock()
            .await
            .get(serial)
            .map(|entry| entry.info.clone())
    }

    /// Point-in-time snapshot of every device and its attributes.
    ///
    /// The returned clones are detached from the registry; mutating
    /// them does not affect it, and taking the snapshot does not block
    /// concurrent registration beyond the copy itself.
    pub async fn list(&self) -> Vec<(Device, DeviceInfo)> {
        self.entries
            .lock()
            .await
            .values()
            .map(|entry| (entry.device.clone(), entry.info.clone()))
            .collect()
    }

    /// Number of known devices.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no devices are known.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Whether a serial is currently registered.
    pub async fn contains(&self, serial: &str) -> bool {
        self.entries.lock().await.contains_key(serial)
    }

    pub async fn set_label(&self, serial: &str, label: &str) {
        self.update(serial, |info| info.label = Some(label.to_string()))
            .await;
    }

    pub async fn set_group(&self, serial: &str, group: &str) {
        self.update(serial, |info| info.group = Some(group.to_string()))
            .await;
    }

    pub async fn set_location(&self, serial: &str, location: &str) {
        self.update(serial, |info| info.location = Some(location.to_string()))
            .await;
    }

    pub async fn set_power(&self, serial: &str, power: PowerState) {
        self.update(serial, |info| info.power = power).await;
    }

    pub async fn set_color(&self, serial: &str, color: Hsbk) {
        self.update(serial, |info| info.color = Some(color)).await;
    }

    pub async fn set_capabilities(&self, serial: &str, capabilities: HashMap<String, bool>) {
        self.update(serial, |info| info.capabilities = Some(capabilities))
            .await;
    }

    /// Drop devices that have not answered a discovery cycle recently.
    ///
    /// Returns the number of evicted entries. Called by the discovery
    /// loop after each broadcast.
    pub async fn evict_stale(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|serial, entry| {
            let fresh = entry.device.seen_ago() <= max_age;
            if !fresh {
                warn!("evicting stale device {serial} (last seen {:?} ago)", entry.device.seen_ago());
            }
            fresh
        });
        before - entries.len()
    }

    async fn update<F>(&self, serial: &str, apply: F)
    where
        F: FnOnce(&mut DeviceInfo),
    {
        match self.entries.lock().await.get_mut(serial) {
            Some(entry) => apply(&mut entry.info),
            // Lost a race with eviction; the next discovery cycle
            // re-registers the device and starts a fresh fetch batch.
            None => debug!("dropping attribute update for unknown device {serial}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let (registry, _events) = DeviceRegistry::new();
        registry.register("d073d5112233", ADDR, 56700, 1).await;
        registry.register("d073d5112233", ADDR, 56700, 1).await;
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_re_registration_updates_address_in_place() {
        let (registry, _events) = DeviceRegistry::new();
        registry.register("d073d5112233", ADDR, 56700, 1).await;

        let moved = Ipv4Addr::new(192, 168, 1, 99);
        let device = registry.register("d073d5112233", moved, 56701, 1).await;
        assert_eq!(device.addr(), moved);
        assert_eq!(device.port(), 56701);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_added_event_fires_once_per_serial() {
        let (registry, mut events) = DeviceRegistry::new();
        registry.register("d073d5112233", ADDR, 56700, 1).await;
        registry.register("d073d5112233", ADDR, 56700, 1).await;
        registry.register("d073d5aabbcc", ADDR, 56700, 2).await;

        let DeviceEvent::Added(first) = events.next().await.unwrap();
        let DeviceEvent::Added(second) = events.next().await.unwrap();
        assert_eq!(first.serial(), "d073d5112233");
        assert_eq!(second.serial(), "d073d5aabbcc");
        // No third event: the re-registration emitted nothing.
        assert!(events.try_next().is_err());
    }

    #[tokio::test]
    async fn test_get_unknown_serial_fails_fast() {
        let (registry, _events) = DeviceRegistry::new();
        let err = registry.get("d073d5ffffff").await.unwrap_err();
        assert_eq!(err, Error::DeviceNotFound("d073d5ffffff".into()));
    }

    #[tokio::test]
    async fn test_list_is_a_detached_snapshot() {
        let (registry, _events) = DeviceRegistry::new();
        registry.register("d073d5112233", ADDR, 56700, 1).await;
        registry.set_label("d073d5112233", "Desk").await;

        let snapshot = registry.list().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.label.as_deref(), Some("Desk"));

        // Mutating the registry afterwards does not change the snapshot.
        registry.set_label("d073d5112233", "Shelf").await;
        assert_eq!(snapshot[0].1.label.as_deref(), Some("Desk"));
    }

    #[tokio::test]
    async fn test_attribute_updates_are_last_write_wins() {
        let (registry, _events) = DeviceRegistry::new();
        registry.register("d073d5112233", ADDR, 56700, 1).await;
        registry.set_power("d073d5112233", PowerState::On).await;
        registry.set_power("d073d5112233", PowerState::Off).await;
        registry.set_color("d073d5112233", Hsbk::new(0, 0, 65535, 3500)).await;

        let info = registry.info("d073d5112233").await.unwrap();
        assert_eq!(info.power, PowerState::Off);
        assert_eq!(info.color, Some(Hsbk::new(0, 0, 65535, 3500)));
        assert_eq!(info.label, None);
    }

    #[tokio::test]
    async fn test_capability_map_is_stored_whole() {
        let (registry, _events) = DeviceRegistry::new();
        registry.register("d073d5112233", ADDR, 56700, 1).await;
        registry
            .set_capabilities("d073d5112233", HashMap::from([("color".to_string(), true)]))
            .await;

        let info = registry.info("d073d5112233").await.unwrap();
        assert_eq!(info.capabilities.unwrap().get("color"), Some(&true));
    }

    #[tokio::test]
    async fn test_update_for_unknown_serial_is_ignored() {
        let (registry, _events) = DeviceRegistry::new();
        registry.set_label("d073d5ffffff", "ghost").await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_evict_stale_drops_only_old_devices() {
        let (registry, _events) = DeviceRegistry::new();
        registry.register("d073d5112233", ADDR, 56700, 1).await;

        assert_eq!(registry.evict_stale(Duration::from_secs(60)).await, 0);
        assert!(registry.contains("d073d5112233").await);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.evict_stale(Duration::from_millis(1)).await, 1);
        assert!(!registry.contains("d073d5112233").await);
    }
}
