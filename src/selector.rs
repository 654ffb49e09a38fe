//! Selector parsing and resolution to concrete device sets.

use std::fmt;

use log::warn;

use crate::groups::GroupRegistry;
use crate::registry::{Device, DeviceRegistry};

/// A parsed filter expression identifying a subset of known devices.
///
/// Grammar: the literal `all`; `serial:<id>`, `label:<name>`,
/// `group:<name>` or `location:<name>`; or a bare string, which is
/// shorthand for `serial:<id>`. Unrecognized prefixes parse
/// successfully but match zero devices.
///
/// # Examples
///
/// ```
/// use lifx_lights_rs::Selector;
///
/// assert_eq!(Selector::parse("group:Kitchen"), Selector::Group("Kitchen".into()));
/// assert_eq!(Selector::parse("d073d5112233"), Selector::Serial("d073d5112233".into()));
/// assert_eq!(Selector::parse(""), Selector::All);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selector {
    /// Every known device.
    #[default]
    All,
    /// Exact serial match.
    Serial(String),
    /// Exact device label match.
    Label(String),
    /// Exact group label match.
    Group(String),
    /// Exact location label match.
    Location(String),
    /// Syntactically valid but unrecognized prefix; matches nothing.
    Unknown { prefix: String, value: String },
}

impl Selector {
    /// Parse a selector expression. Empty input means `all`.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() || text == "all" {
            return Selector::All;
        }
        match text.split_once(':') {
            Some(("serial", value)) => Selector::Serial(value.to_string()),
            Some(("label", value)) => Selector::Label(value.to_string()),
            Some(("group", value)) => Selector::Group(value.to_string()),
            Some(("location", value)) => Selector::Location(value.to_string()),
            Some((prefix, value)) => Selector::Unknown {
                prefix: prefix.to_string(),
                value: value.to_string(),
            },
            None => Selector::Serial(text.to_string()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::All => write!(f, "all"),
            Selector::Serial(value) => write!(f, "serial:{value}"),
            Selector::Label(value) => write!(f, "label:{value}"),
            Selector::Group(value) => write!(f, "group:{value}"),
            Selector::Location(value) => write!(f, "location:{value}"),
            Selector::Unknown { prefix, value } => write!(f, "{prefix}:{value}"),
        }
    }
}

/// Resolve a selector against the current registry state.
///
/// Serial, label and location selectors filter a point-in-time snapshot
/// by exact string equality; group selectors go through the
/// [`GroupRegistry`] member index. Every logical match is then
/// re-fetched live from the device registry; a candidate that was
/// evicted between snapshot and re-fetch is dropped with a warning, not
/// an error. An empty result is a valid outcome.
pub async fn resolve(
    selector: &Selector,
    devices: &DeviceRegistry,
    groups: &GroupRegistry,
) -> Vec<Device> {
    let candidates: Vec<String> = match selector {
        Selector::All => devices
            .list()
            .await
            .into_iter()
            .map(|(device, _)| device.serial().to_string())
            .collect(),
        Selector::Serial(serial) => devices
            .list()
            .await
            .into_iter()
            .filter(|(device, _)| device.serial() == serial)
            .map(|(device, _)| device.serial().to_string())
            .collect(),
        Selector::Label(label) => devices
            .list()
            .await
            .into_iter()
            .filter(|(_, info)| info.label.as_deref() == Some(label.as_str()))
            .map(|(device, _)| device.serial().to_string())
            .collect(),
        Selector::Location(location) => devices
            .list()
            .await
            .into_iter()
            .filter(|(_, info)| info.location.as_deref() == Some(location.as_str()))
            .map(|(device, _)| device.serial().to_string())
            .collect(),
        Selector::Group(label) => groups.members_of(label).await,
        Selector::Unknown { prefix, .. } => {
            warn!("selector prefix {prefix:?} is not recognized; matching no devices");
            Vec::new()
        }
    };

    let mut resolved = Vec::with_capacity(candidates.len());
    for serial in candidates {
        match devices.get(&serial).await {
            Ok(device) => resolved.push(device),
            Err(_) => warn!("device {serial} disappeared during resolution; dropping it"),
        }
    }
    resolved
}
