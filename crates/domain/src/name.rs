//! Typed instance names — the sequential `deviceN` / `sensorN` identifiers.
//!
//! Names are assigned at config load (1-based, no gaps) and are immutable
//! for the lifetime of the node. They double as timer-owner keys and as
//! argument values in the ApiTarget grammar, so parsing must be strict:
//! `device3` is a name, `device03` and `device` are not.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

/// Identifier of a configured device or sensor (`device3`, `sensor1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceName {
    /// An output instance (`deviceN`).
    Device(u16),
    /// An input instance (`sensorN`).
    Sensor(u16),
}

impl InstanceName {
    /// Whether this name refers to a device.
    #[must_use]
    pub fn is_device(self) -> bool {
        matches!(self, Self::Device(_))
    }

    /// Whether this name refers to a sensor.
    #[must_use]
    pub fn is_sensor(self) -> bool {
        matches!(self, Self::Sensor(_))
    }

    /// The 1-based index within its kind.
    #[must_use]
    pub fn index(self) -> u16 {
        match self {
            Self::Device(n) | Self::Sensor(n) => n,
        }
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(n) => write!(f, "device{n}"),
            Self::Sensor(n) => write!(f, "sensor{n}"),
        }
    }
}

impl FromStr for InstanceName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |digits: &str, wrap: fn(u16) -> Self| {
            // Reject leading zeros and empty suffixes so names stay canonical.
            if digits.is_empty() || digits.starts_with('0') {
                return Err(ValidationError::Message(format!(
                    "invalid instance name: {s}"
                )));
            }
            digits
                .parse::<u16>()
                .map(wrap)
                .map_err(|_| ValidationError::Message(format!("invalid instance name: {s}")))
        };
        if let Some(digits) = s.strip_prefix("device") {
            parse(digits, Self::Device)
        } else if let Some(digits) = s.strip_prefix("sensor") {
            parse(digits, Self::Sensor)
        } else {
            Err(ValidationError::Message(format!(
                "invalid instance name: {s}"
            )))
        }
    }
}

impl Serialize for InstanceName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InstanceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
