//! Power state for light control.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Power state of a light as last observed or commanded.
///
/// `Unknown` is the state of a freshly discovered device whose first
/// power report has not arrived yet.
///
/// # Examples
///
/// ```
/// use lifx_lights_rs::PowerState;
///
/// let on: PowerState = "on".parse().unwrap();
/// assert_eq!(on, PowerState::On);
/// assert_eq!(on.to_string(), "on");
/// assert_eq!(on.toggled(), PowerState::Off);
/// ```
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PowerState {
    /// The light is emitting
    On,
    /// The light is off
    Off,
    /// The light has not reported power yet
    #[default]
    Unknown,
}

impl PowerState {
    /// Interpret a device-native power level (0 = off, anything else = on).
    pub fn from_level(level: u16) -> Self {
        if level == 0 {
            PowerState::Off
        } else {
            PowerState::On
        }
    }

    /// The device-native power level for this state.
    pub fn level(&self) -> u16 {
        match self {
            PowerState::On => 65535,
            PowerState::Off | PowerState::Unknown => 0,
        }
    }

    /// Whether this state counts as emitting.
    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::On)
    }

    /// The logical negation used by toggle: `On` becomes `Off`,
    /// anything else becomes `On`.
    pub fn toggled(&self) -> Self {
        match self {
            PowerState::On => PowerState::Off,
            PowerState::Off | PowerState::Unknown => PowerState::On,
        }
    }
}
