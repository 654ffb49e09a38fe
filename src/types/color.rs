//! HSBK color representation and parsing.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Error;

/// A device-native HSBK color.
///
/// All channels are integers in device units: hue, saturation and
/// brightness span the full `0..=65535` range (hue is *not* stored in
/// degrees), and kelvin is clamped into `1500..=9000` on construction.
/// Structured color input uses these native units directly; only the
/// named and `#RRGGBB` forms convert from degrees and unit floats.
///
/// # Examples
///
/// ```
/// use lifx_lights_rs::Hsbk;
///
/// let red: Hsbk = "red".parse().unwrap();
/// assert_eq!(red.hue(), 0);
/// assert_eq!(red.saturation(), 65535);
/// assert_eq!(red.brightness(), 65535);
/// assert_eq!(red.kelvin(), 3500);
///
/// // Hex and named forms agree on the primaries.
/// assert_eq!("#FF0000".parse::<Hsbk>().unwrap(), red);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hsbk {
    hue: u16,
    saturation: u16,
    brightness: u16,
    kelvin: u16,
}

/// Partial HSBK object accepted as structured color input.
///
/// Unknown fields are rejected so arbitrary objects do not silently
/// parse as colors.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HsbkInput {
    hue: Option<u16>,
    saturation: Option<u16>,
    brightness: Option<u16>,
    kelvin: Option<u16>,
}

impl Hsbk {
    /// Minimum storable kelvin value.
    pub const KELVIN_MIN: u16 = 1500;
    /// Maximum kelvin value.
    pub const KELVIN_MAX: u16 = 9000;
    /// Kelvin applied when a color expression does not specify one.
    pub const KELVIN_DEFAULT: u16 = 3500;
    /// Minimum kelvin devices will actually display; write commands clamp to it.
    pub const KELVIN_WRITE_MIN: u16 = 2500;
    /// Full scale for the hue/saturation/brightness channels.
    pub const CHANNEL_MAX: u16 = 65535;

    /// Create a color from native channel values.
    ///
    /// Kelvin is clamped into `1500..=9000`; the other channels already
    /// cover their whole `u16` range.
    pub fn new(hue: u16, saturation: u16, brightness: u16, kelvin: u16) -> Self {
        Hsbk {
            hue,
            saturation,
            brightness,
            kelvin: kelvin.clamp(Self::KELVIN_MIN, Self::KELVIN_MAX),
        }
    }

    /// Get the hue channel.
    pub fn hue(&self) -> u16 {
        self.hue
    }

    /// Get the saturation channel.
    pub fn saturation(&self) -> u16 {
        self.saturation
    }

    /// Get the brightness channel.
    pub fn brightness(&self) -> u16 {
        self.brightness
    }

    /// Get the kelvin channel.
    pub fn kelvin(&self) -> u16 {
        self.kelvin
    }

    /// Return the same color with only the brightness channel replaced.
    pub fn with_brightness(self, brightness: u16) -> Self {
        Hsbk { brightness, ..self }
    }

    /// Return the color with kelvin raised into the displayable write
    /// range `2500..=9000`.
    pub fn clamped_for_write(self) -> Self {
        Hsbk {
            kelvin: self.kelvin.max(Self::KELVIN_WRITE_MIN),
            ..self
        }
    }

    /// Look up a named color (case-insensitive).
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::Hsbk;
    ///
    /// assert!(Hsbk::from_name("CYAN").is_some());
    /// assert!(Hsbk::from_name("chartreuse").is_none());
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        // Hue literals are degrees scaled by 65535/360.
        let (hue, saturation, kelvin) = match name.to_ascii_lowercase().as_str() {
            "red" => (0, 65535, Self::KELVIN_DEFAULT),
            "orange" => (5461, 65535, Self::KELVIN_DEFAULT),
            "yellow" => (10923, 65535, Self::KELVIN_DEFAULT),
            "green" => (21845, 65535, Self::KELVIN_DEFAULT),
            "cyan" => (32768, 65535, Self::KELVIN_DEFAULT),
            "blue" => (43690, 65535, Self::KELVIN_DEFAULT),
            "purple" => (50972, 65535, Self::KELVIN_DEFAULT),
            "magenta" => (54613, 65535, Self::KELVIN_DEFAULT),
            "pink" => (63715, 16384, Self::KELVIN_DEFAULT),
            "white" => (0, 0, Self::KELVIN_DEFAULT),
            "warm_white" => (0, 0, 2700),
            "cool_white" => (0, 0, 6500),
            _ => return None,
        };
        Some(Hsbk::new(hue, saturation, 65535, kelvin))
    }

    /// Parse a `#RRGGBB` hex string.
    ///
    /// Each byte is decoded into `[0, 1]`, converted with the standard
    /// six-sector max/min/diff RGB-to-HSB formula (hue in degrees,
    /// wrapped into `[0, 360)`), then scaled to native units. Kelvin
    /// defaults to 3500.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidColorFormat(hex.to_string()));
        }

        let byte = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).unwrap_or(0);
        let r = byte(0) as f64 / 255.0;
        let g = byte(2) as f64 / 255.0;
        let b = byte(4) as f64 / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let diff = max - min;

        let hue_deg = if diff == 0.0 {
            0.0
        } else if max == r {
            60.0 * ((g - b) / diff).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / diff + 2.0)
        } else {
            60.0 * ((r - g) / diff + 4.0)
        };
        let saturation = if max == 0.0 { 0.0 } else { diff / max };

        Ok(Hsbk::new(
            (hue_deg * 65535.0 / 360.0).round() as u16,
            (saturation * 65535.0).round() as u16,
            (max * 65535.0).round() as u16,
            Self::KELVIN_DEFAULT,
        ))
    }

    /// Parse any supported color expression from JSON.
    ///
    /// Accepts a color name string, a `#RRGGBB` string, or a partial
    /// HSBK object whose unspecified channels default to hue 0,
    /// saturation/brightness 65535 and kelvin 3500. Anything else fails
    /// with [`Error::InvalidColorFormat`].
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::Hsbk;
    /// use serde_json::json;
    ///
    /// let dim = Hsbk::parse(&json!({"brightness": 16384})).unwrap();
    /// assert_eq!(dim.hue(), 0);
    /// assert_eq!(dim.saturation(), 65535);
    /// assert_eq!(dim.brightness(), 16384);
    /// assert_eq!(dim.kelvin(), 3500);
    ///
    /// assert!(Hsbk::parse(&json!(42)).is_err());
    /// ```
    pub fn parse(value: &Value) -> Result<Self, Error> {
        match value {
            Value::String(text) => text.parse(),
            Value::Object(_) => {
                let input: HsbkInput = serde_json::from_value(value.clone())
                    .map_err(|_| Error::InvalidColorFormat(value.to_string()))?;
                Ok(Hsbk::new(
                    input.hue.unwrap_or(0),
                    input.saturation.unwrap_or(Self::CHANNEL_MAX),
                    input.brightness.unwrap_or(Self::CHANNEL_MAX),
                    input.kelvin.unwrap_or(Self::KELVIN_DEFAULT),
                ))
            }
            other => Err(Error::InvalidColorFormat(other.to_string())),
        }
    }
}

impl FromStr for Hsbk {
    type Err = Error;

    /// Parse a color name or a `#RRGGBB` hex string.
    fn from_str(s: &str) -> Result<Self, Error> {
        let text = s.trim();
        if text.starts_with('#') {
            return Hsbk::from_hex(text);
        }
        Hsbk::from_name(text).ok_or_else(|| Error::InvalidColorFormat(s.to_string()))
    }
}
