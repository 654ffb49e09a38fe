//! One-time attribute enrichment for newly discovered devices.
//!
//! Consumes the registry's [`DeviceEvent`] stream and, for each device
//! seen for the first time, fetches label, group, location and color in
//! one concurrent batch. Each fetch fails independently; a device whose
//! label times out still gets its color. Re-discovery never lands here,
//! which is what bounds network chatter.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use futures::join;
use log::{debug, warn};

use crate::groups::GroupRegistry;
use crate::registry::{Device, DeviceEvent, DeviceRegistry};
use crate::transport::{Request, Response, Transport, unicast_with_deadline};
use crate::types::PowerState;

/// Drive the fetch batch for every added device, at most `concurrency`
/// devices at a time.
///
/// Holds the registries weakly: the registry owns the event sender, so
/// a strong handle here would keep the stream (and this task) alive
/// forever. Returns once every strong registry handle is gone.
pub(crate) async fn run(
    events: UnboundedReceiver<DeviceEvent>,
    transport: Arc<dyn Transport>,
    devices: Weak<DeviceRegistry>,
    groups: Weak<GroupRegistry>,
    call_timeout: Duration,
    concurrency: usize,
) {
    events
        .for_each_concurrent(concurrency, |event| {
            let transport = Arc::clone(&transport);
            let devices = devices.upgrade();
            let groups = groups.upgrade();
            async move {
                let (Some(devices), Some(groups)) = (devices, groups) else {
                    return;
                };
                let DeviceEvent::Added(device) = event;
                enrich(transport.as_ref(), &devices, &groups, &device, call_timeout).await;
            }
        })
        .await;
    debug!("attribute fetcher stopped; registry event channel closed");
}

async fn enrich(
    transport: &dyn Transport,
    devices: &DeviceRegistry,
    groups: &GroupRegistry,
    device: &Device,
    call_timeout: Duration,
) {
    let serial = device.serial();
    debug!("fetching initial attributes for {serial}");

    let (label, group, location, color) = join!(
        unicast_with_deadline(transport, device, Request::GetLabel, call_timeout),
        unicast_with_deadline(transport, device, Request::GetGroup, call_timeout),
        unicast_with_deadline(transport, device, Request::GetLocation, call_timeout),
        unicast_with_deadline(transport, device, Request::GetColor, call_timeout),
    );

    match label {
        Ok(Response::Label(label)) => devices.set_label(serial, &label).await,
        Ok(_) => warn!("unexpected reply to GetLabel from {serial}"),
        Err(e) => warn!("label fetch failed for {serial}: {e}"),
    }

    match group {
        Ok(Response::Group { id, label }) => {
            devices.set_group(serial, &label).await;
            groups.register(serial, id, &label).await;
        }
        Ok(_) => warn!("unexpected reply to GetGroup from {serial}"),
        Err(e) => warn!("group fetch failed for {serial}: {e}"),
    }

    match location {
        Ok(Response::Location { label, .. }) => devices.set_location(serial, &label).await,
        Ok(_) => warn!("unexpected reply to GetLocation from {serial}"),
        Err(e) => warn!("location fetch failed for {serial}: {e}"),
    }

    match color {
        Ok(Response::LightState { color, power, label }) => {
            devices.set_color(serial, color).await;
            devices.set_power(serial, PowerState::from_level(power)).await;
            if !label.is_empty() {
                devices.set_label(serial, &label).await;
            }
        }
        Ok(_) => warn!("unexpected reply to GetColor from {serial}"),
        Err(e) => warn!("color fetch failed for {serial}: {e}"),
    }
}
