//! Server context tying discovery, registries and dispatch together.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::discovery::DiscoveryLoop;
use crate::dispatch::{CommandResult, Dispatcher, Operation};
use crate::errors::Error;
use crate::fetch;
use crate::groups::GroupRegistry;
use crate::registry::{Device, DeviceRegistry};
use crate::runtime::{self, JoinHandle};
use crate::selector::{self, Selector};
use crate::transport::Transport;
use crate::types::{Hsbk, PowerState};

type Result<T> = std::result::Result<T, Error>;

/// Tunables for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Broadcast cadence of the discovery loop.
    pub discovery_interval: Duration,
    /// Age after which a silent device is evicted.
    pub stale_after: Duration,
    /// Deadline applied to every remote device call.
    pub call_timeout: Duration,
    /// Fan-out width of batch dispatch.
    pub dispatch_concurrency: usize,
    /// Fan-out width of post-discovery attribute fetches.
    pub fetch_concurrency: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let interval = Duration::from_millis(DiscoveryLoop::DEFAULT_INTERVAL_MS);
        ClientOptions {
            discovery_interval: interval,
            stale_after: interval * Client::STALE_CYCLES,
            call_timeout: Duration::from_millis(Dispatcher::DEFAULT_CALL_TIMEOUT_MS),
            dispatch_concurrency: Dispatcher::DEFAULT_CONCURRENCY,
            fetch_concurrency: Client::DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

/// One light in a [`LightsReport`].
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct LightEntry {
    pub serial: String,
    pub label: Option<String>,
    pub group: Option<String>,
    pub location: Option<String>,
    pub power: PowerState,
    pub color: Option<Hsbk>,
}

/// Result of [`Client::list_lights`].
#[derive(Debug, Clone, Serialize)]
pub struct LightsReport {
    pub lights: Vec<LightEntry>,
    pub count: usize,
}

/// Result of [`Client::set_brightness`].
#[derive(Debug, Clone, Serialize)]
pub struct BrightnessReport {
    pub results: Vec<CommandResult>,
    pub selector: String,
    pub brightness: f32,
}

/// Result of [`Client::set_color`].
#[derive(Debug, Clone, Serialize)]
pub struct ColorReport {
    pub results: Vec<CommandResult>,
    pub selector: String,
    /// The codec-resolved, write-clamped color actually sent.
    pub color: Hsbk,
}

/// Result of [`Client::toggle`].
#[derive(Debug, Clone, Serialize)]
pub struct ToggleReport {
    pub results: Vec<CommandResult>,
}

/// Owns the registries, discovery loop and dispatcher for one network.
///
/// Every `Client` is fully independent, so several can coexist in one
/// process (each against its own transport), which is also what makes
/// the crate testable without a network.
///
/// # Examples
///
/// ```ignore
/// use std::sync::Arc;
/// use std::time::Duration;
/// use lifx_lights_rs::{Client, PowerState};
///
/// let client = Client::new(transport);
/// client.start_discovery();
/// // Give the first discovery cycle a moment to land.
/// tokio::time::sleep(Duration::from_secs(2)).await;
///
/// let report = client.list_lights("all").await;
/// println!("{} lights", report.count);
///
/// client.set_power("group:Kitchen", PowerState::On, 500).await?;
/// client.toggle("label:Desk", 0).await?;
/// ```
pub struct Client {
    devices: Arc<DeviceRegistry>,
    groups: Arc<GroupRegistry>,
    dispatcher: Dispatcher,
    discovery: DiscoveryLoop,
    _fetcher: JoinHandle<()>,
}

impl Client {
    /// Default fan-out width for post-discovery attribute fetches.
    pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;
    /// Discovery cycles a device may miss before it is evicted.
    pub const STALE_CYCLES: u32 = 6;

    /// Create a client with default options.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Create a client with explicit tunables.
    pub fn with_options(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let (devices, events) = DeviceRegistry::new();
        let devices = Arc::new(devices);
        let groups = Arc::new(GroupRegistry::new());

        let fetcher = runtime::spawn(fetch::run(
            events,
            Arc::clone(&transport),
            Arc::downgrade(&devices),
            Arc::downgrade(&groups),
            options.call_timeout,
            options.fetch_concurrency.max(1),
        ));

        let dispatcher = Dispatcher::with_limits(
            Arc::clone(&transport),
            Arc::clone(&devices),
            options.dispatch_concurrency,
            options.call_timeout,
        );
        let discovery = DiscoveryLoop::new(
            transport,
            Arc::clone(&devices),
            options.discovery_interval,
            options.stale_after,
        );

        Client {
            devices,
            groups,
            dispatcher,
            discovery,
            _fetcher: fetcher,
        }
    }

    /// Start the periodic discovery broadcast.
    pub fn start_discovery(&self) {
        self.discovery.start();
    }

    /// Stop the periodic discovery broadcast. Known devices are kept.
    pub fn stop_discovery(&self) {
        self.discovery.stop();
    }

    /// The discovery loop, for state inspection.
    pub fn discovery(&self) -> &DiscoveryLoop {
        &self.discovery
    }

    /// The device registry backing this client.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// The group index backing this client.
    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// List the lights matched by `selector` with their last known
    /// attributes, sorted by serial.
    pub async fn list_lights(&self, selector: &str) -> LightsReport {
        let parsed = Selector::parse(selector);
        let resolved = selector::resolve(&parsed, &self.devices, &self.groups).await;

        let mut lights = Vec::with_capacity(resolved.len());
        for device in resolved {
            let Some(info) = self.devices.info(device.serial()).await else {
                continue;
            };
            lights.push(LightEntry {
                serial: device.serial().to_string(),
                label: info.label,
                group: info.group,
                location: info.location,
                power: info.power,
                color: info.color,
            });
        }
        lights.sort_by(|a, b| a.serial.cmp(&b.serial));
        LightsReport {
            count: lights.len(),
            lights,
        }
    }

    /// Set power on every matched light.
    pub async fn set_power(
        &self,
        selector: &str,
        power: PowerState,
        duration_ms: u32,
    ) -> Result<Vec<CommandResult>> {
        let on = match power {
            PowerState::On => true,
            PowerState::Off => false,
            PowerState::Unknown => {
                return Err(Error::InvalidRequest(
                    "power must be \"on\" or \"off\"".into(),
                ));
            }
        };
        let devices = self.resolve_for_command(selector).await?;
        Ok(self
            .dispatcher
            .dispatch(devices, &Operation::SetPower { on, duration_ms })
            .await)
    }

    /// Set brightness (in `[0, 1]`) on every matched light, keeping
    /// each light's current hue, saturation and kelvin.
    pub async fn set_brightness(
        &self,
        selector: &str,
        brightness: f32,
        duration_ms: u32,
    ) -> Result<BrightnessReport> {
        if !(0.0..=1.0).contains(&brightness) {
            return Err(Error::InvalidRequest(format!(
                "brightness must be within [0, 1], got {brightness}"
            )));
        }
        let devices = self.resolve_for_command(selector).await?;
        let results = self
            .dispatcher
            .dispatch(devices, &Operation::SetBrightness {
                brightness,
                duration_ms,
            })
            .await;
        Ok(BrightnessReport {
            results,
            selector: selector.to_string(),
            brightness,
        })
    }

    /// Set a color (name, `#RRGGBB` or partial HSBK object) on every
    /// matched light, replacing all four channels.
    pub async fn set_color(
        &self,
        selector: &str,
        color: &Value,
        duration_ms: u32,
    ) -> Result<ColorReport> {
        let resolved = Hsbk::parse(color)?.clamped_for_write();
        let devices = self.resolve_for_command(selector).await?;
        let results = self
            .dispatcher
            .dispatch(devices, &Operation::SetColor {
                color: resolved,
                duration_ms,
            })
            .await;
        Ok(ColorReport {
            results,
            selector: selector.to_string(),
            color: resolved,
        })
    }

    /// Toggle power on every matched light.
    pub async fn toggle(&self, selector: &str, duration_ms: u32) -> Result<ToggleReport> {
        let devices = self.resolve_for_command(selector).await?;
        let results = self
            .dispatcher
            .dispatch(devices, &Operation::Toggle { duration_ms })
            .await;
        Ok(ToggleReport { results })
    }

    /// Resolve a selector for a command operation.
    ///
    /// A command aimed at one explicit serial that matches nothing is
    /// an error; every other empty resolution is a valid empty batch.
    async fn resolve_for_command(&self, selector: &str) -> Result<Vec<Device>> {
        let parsed = Selector::parse(selector);
        let devices = selector::resolve(&parsed, &self.devices, &self.groups).await;
        if devices.is_empty()
            && let Selector::Serial(serial) = &parsed
        {
            return Err(Error::DeviceNotFound(serial.clone()));
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::{Announcement, Response};
    use serde_json::json;
    use std::net::Ipv4Addr;
    use uuid::Uuid;

    const ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);

    fn options() -> ClientOptions {
        ClientOptions {
            discovery_interval: Duration::from_millis(100),
            stale_after: Duration::from_secs(60),
            call_timeout: Duration::from_millis(200),
            ..ClientOptions::default()
        }
    }

    fn client(transport: &Arc<MockTransport>) -> Client {
        let transport: Arc<dyn Transport> = transport.clone();
        Client::with_options(transport, options())
    }

    /// Script full attribute replies, announce the device, and wait for
    /// the fetch batch to finish.
    async fn seed_device(transport: &Arc<MockTransport>, client: &Client, serial: &str, label: &str, group: &str) {
        transport.on(serial, "GetLabel", Ok(Response::Label(label.into())));
        transport.on(
            serial,
            "GetGroup",
            Ok(Response::Group {
                id: Uuid::new_v4(),
                label: group.into(),
            }),
        );
        transport.on(
            serial,
            "GetLocation",
            Ok(Response::Location {
                id: Uuid::new_v4(),
                label: "Home".into(),
            }),
        );
        transport.on(
            serial,
            "GetColor",
            Ok(Response::LightState {
                color: Hsbk::new(0, 0, 65535, 3500),
                power: 65535,
                label: label.into(),
            }),
        );

        transport.announce(Announcement {
            serial: serial.into(),
            target: 1,
            addr: ADDR,
            port: 56700,
        });

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(info) = client.registry().info(serial).await
                && info.label.is_some()
                && info.group.is_some()
            {
                return;
            }
        }
        panic!("device {serial} was never fully enriched");
    }

    #[tokio::test]
    async fn test_discovered_devices_are_listed_with_attributes() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        client.start_discovery();
        seed_device(&transport, &client, "d073d5000001", "Desk", "Office").await;
        seed_device(&transport, &client, "d073d5000002", "Shelf", "Office").await;

        let report = client.list_lights("all").await;
        assert_eq!(report.count, 2);
        assert_eq!(report.lights[0].serial, "d073d5000001");
        assert_eq!(report.lights[0].label.as_deref(), Some("Desk"));
        assert_eq!(report.lights[0].group.as_deref(), Some("Office"));
        assert_eq!(report.lights[0].power, PowerState::On);

        let by_group = client.list_lights("group:Office").await;
        assert_eq!(by_group.count, 2);
        let by_label = client.list_lights("label:Shelf").await;
        assert_eq!(by_label.count, 1);

        client.stop_discovery();
    }

    #[tokio::test]
    async fn test_list_with_no_matches_is_empty_not_an_error() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        let report = client.list_lights("label:Nothing").await;
        assert_eq!(report.count, 0);
        assert!(report.lights.is_empty());
    }

    #[tokio::test]
    async fn test_set_power_round_trip() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        client.start_discovery();
        seed_device(&transport, &client, "d073d5000001", "Desk", "Office").await;

        let results = client.set_power("all", PowerState::Off, 0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(
            client.registry().info("d073d5000001").await.unwrap().power,
            PowerState::Off
        );
        client.stop_discovery();
    }

    #[tokio::test]
    async fn test_set_power_rejects_unknown_state() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        assert!(client.set_power("all", PowerState::Unknown, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_explicit_serial_is_device_not_found() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);

        let err = client.toggle("d073d5ffffff", 0).await.unwrap_err();
        assert_eq!(err, Error::DeviceNotFound("d073d5ffffff".into()));

        let err = client
            .set_power("serial:d073d5ffffff", PowerState::On, 0)
            .await
            .unwrap_err();
        assert_eq!(err, Error::DeviceNotFound("d073d5ffffff".into()));

        // Batch selectors return an empty batch instead.
        assert!(client.toggle("label:Nothing", 0).await.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn test_set_color_reports_the_resolved_color() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        client.start_discovery();
        seed_device(&transport, &client, "d073d5000001", "Desk", "Office").await;

        let report = client
            .set_color("label:Desk", &json!("red"), 100)
            .await
            .unwrap();
        assert_eq!(report.color, Hsbk::new(0, 65535, 65535, 3500));
        assert_eq!(report.selector, "label:Desk");
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].success);
        client.stop_discovery();
    }

    #[tokio::test]
    async fn test_set_color_rejects_malformed_input() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        let err = client.set_color("all", &json!(42), 0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidColorFormat(_)));
    }

    #[tokio::test]
    async fn test_set_brightness_validates_the_range() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport);
        assert!(client.set_brightness("all", 1.5, 0).await.is_err());
        assert!(client.set_brightness("all", -0.1, 0).await.is_err());

        let report = client.set_brightness("all", 0.5, 0).await.unwrap();
        assert_eq!(report.brightness, 0.5);
        assert_eq!(report.selector, "all");
        assert!(report.results.is_empty());
    }
}
