//! Concurrent command fan-out with per-device outcomes.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use log::warn;
use serde::Serialize;
use serde_json::Value;

use crate::errors::Error;
use crate::registry::{Device, DeviceRegistry};
use crate::transport::{Request, Response, Transport, unicast_ack_with_deadline, unicast_with_deadline};
use crate::types::{Hsbk, PowerState};

type Result<T> = std::result::Result<T, Error>;

/// A logical operation to fan out to a set of devices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    /// Set power with a fade over `duration_ms`.
    SetPower { on: bool, duration_ms: u32 },
    /// Replace only the brightness channel, keeping the device's
    /// current hue/saturation/kelvin (read live, never guessed).
    SetBrightness { brightness: f32, duration_ms: u32 },
    /// Replace all four color channels.
    SetColor { color: Hsbk, duration_ms: u32 },
    /// Read power, write back its negation.
    Toggle { duration_ms: u32 },
}

impl Operation {
    /// Operation name as exposed to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::SetPower { .. } => "set_power",
            Operation::SetBrightness { .. } => "set_brightness",
            Operation::SetColor { .. } => "set_color",
            Operation::Toggle { .. } => "toggle",
        }
    }

    /// Parse an operation name plus JSON parameters.
    ///
    /// This is the seam the outer request layer calls; an unrecognized
    /// name fails with [`Error::UnknownOperation`], missing or mistyped
    /// parameters with [`Error::InvalidRequest`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::Operation;
    /// use serde_json::json;
    ///
    /// let op = Operation::parse("set_power", &json!({"power": "on"})).unwrap();
    /// assert_eq!(op, Operation::SetPower { on: true, duration_ms: 0 });
    ///
    /// assert!(Operation::parse("strobe", &json!({})).is_err());
    /// ```
    pub fn parse(kind: &str, params: &Value) -> Result<Self> {
        let duration_ms = params
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        match kind {
            "set_power" => {
                let power = params
                    .get("power")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::InvalidRequest("set_power requires a power field".into()))?;
                let on = match power.parse::<PowerState>() {
                    Ok(PowerState::On) => true,
                    Ok(PowerState::Off) => false,
                    _ => {
                        return Err(Error::InvalidRequest(format!(
                            "power must be \"on\" or \"off\", got {power:?}"
                        )));
                    }
                };
                Ok(Operation::SetPower { on, duration_ms })
            }
            "set_brightness" => {
                let brightness = params
                    .get("brightness")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        Error::InvalidRequest("set_brightness requires a numeric brightness".into())
                    })?;
                if !(0.0..=1.0).contains(&brightness) {
                    return Err(Error::InvalidRequest(format!(
                        "brightness must be within [0, 1], got {brightness}"
                    )));
                }
                Ok(Operation::SetBrightness {
                    brightness: brightness as f32,
                    duration_ms,
                })
            }
            "set_color" => {
                let color = params
                    .get("color")
                    .ok_or_else(|| Error::InvalidRequest("set_color requires a color field".into()))?;
                Ok(Operation::SetColor {
                    color: Hsbk::parse(color)?,
                    duration_ms,
                })
            }
            "toggle" => Ok(Operation::Toggle { duration_ms }),
            other => Err(Error::UnknownOperation(other.to_string())),
        }
    }
}

/// Typed payload carried by a successful [`CommandResult`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Power { power: PowerState },
    Brightness { brightness: f32 },
    Color { color: Hsbk },
    Toggle {
        previous_state: PowerState,
        new_state: PowerState,
    },
}

/// Per-device outcome of a batch dispatch.
///
/// Serializes flat: `{"serial": ..., "success": true, "power": "on"}`
/// on success, `{"serial": ..., "success": false, "error": ...}` on
/// failure.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub serial: String,
    pub success: bool,
    #[serde(flatten)]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    fn ok(serial: &str, outcome: Outcome) -> Self {
        CommandResult {
            serial: serial.to_string(),
            success: true,
            outcome: Some(outcome),
            error: None,
        }
    }

    fn failed(serial: &str, error: &Error) -> Self {
        CommandResult {
            serial: serial.to_string(),
            success: false,
            outcome: None,
            error: Some(error.to_string()),
        }
    }
}

/// Fans one logical operation out to a resolved device set.
///
/// Fan-out is concurrent but bounded, every remote call carries a
/// deadline, and one device's failure never aborts its siblings: the
/// batch always yields exactly one result per input device.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    registry: Arc<DeviceRegistry>,
    concurrency: usize,
    call_timeout: Duration,
}

impl Dispatcher {
    /// Default fan-out width.
    pub const DEFAULT_CONCURRENCY: usize = 8;
    /// Default per-call deadline.
    pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 2000;

    pub fn new(transport: Arc<dyn Transport>, registry: Arc<DeviceRegistry>) -> Self {
        Self::with_limits(
            transport,
            registry,
            Self::DEFAULT_CONCURRENCY,
            Duration::from_millis(Self::DEFAULT_CALL_TIMEOUT_MS),
        )
    }

    pub fn with_limits(
        transport: Arc<dyn Transport>,
        registry: Arc<DeviceRegistry>,
        concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        Dispatcher {
            transport,
            registry,
            concurrency: concurrency.max(1),
            call_timeout,
        }
    }

    /// Dispatch `operation` to every device, concurrently.
    ///
    /// Completion order is arbitrary; the returned batch is keyed and
    /// sorted by serial and always contains one entry per input device,
    /// failures included.
    pub async fn dispatch(&self, devices: Vec<Device>, operation: &Operation) -> Vec<CommandResult> {
        let mut results: Vec<CommandResult> = stream::iter(devices)
            .map(|device| async move { self.run_one(device, operation).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.serial.cmp(&b.serial));
        results
    }

    async fn run_one(&self, device: Device, operation: &Operation) -> CommandResult {
        match self.execute(&device, operation).await {
            Ok(outcome) => CommandResult::ok(device.serial(), outcome),
            Err(e) => {
                warn!("{} failed for {}: {e}", operation.kind(), device.serial());
                CommandResult::failed(device.serial(), &e)
            }
        }
    }

    async fn execute(&self, device: &Device, operation: &Operation) -> Result<Outcome> {
        match *operation {
            Operation::SetPower { on, duration_ms } => {
                let state = if on { PowerState::On } else { PowerState::Off };
                self.ack(device, Request::SetLightPower {
                    level: state.level(),
                    duration_ms,
                })
                .await?;
                self.registry.set_power(device.serial(), state).await;
                Ok(Outcome::Power { power: state })
            }
            Operation::SetBrightness {
                brightness,
                duration_ms,
            } => {
                let current = match self.call(device, Request::GetColor).await? {
                    Response::LightState { color, .. } => color,
                    _ => return Err(Error::unexpected(device.serial(), "LightState")),
                };
                let level =
                    (brightness.clamp(0.0, 1.0) * f32::from(Hsbk::CHANNEL_MAX)).round() as u16;
                let next = current.with_brightness(level).clamped_for_write();
                self.ack(device, Request::SetColor {
                    color: next,
                    duration_ms,
                })
                .await?;
                self.registry.set_color(device.serial(), next).await;
                Ok(Outcome::Brightness { brightness })
            }
            Operation::SetColor { color, duration_ms } => {
                let next = color.clamped_for_write();
                self.ack(device, Request::SetColor {
                    color: next,
                    duration_ms,
                })
                .await?;
                self.registry.set_color(device.serial(), next).await;
                Ok(Outcome::Color { color: next })
            }
            Operation::Toggle { duration_ms } => {
                let previous = match self.call(device, Request::GetPower).await? {
                    Response::Power { level } => PowerState::from_level(level),
                    _ => return Err(Error::unexpected(device.serial(), "Power")),
                };
                let new_state = previous.toggled();
                self.ack(device, Request::SetLightPower {
                    level: new_state.level(),
                    duration_ms,
                })
                .await?;
                self.registry.set_power(device.serial(), new_state).await;
                Ok(Outcome::Toggle {
                    previous_state: previous,
                    new_state,
                })
            }
        }
    }

    async fn call(&self, device: &Device, request: Request) -> Result<Response> {
        unicast_with_deadline(self.transport.as_ref(), device, request, self.call_timeout).await
    }

    async fn ack(&self, device: &Device, request: Request) -> Result<()> {
        unicast_ack_with_deadline(self.transport.as_ref(), device, request, self.call_timeout).await
    }
}
