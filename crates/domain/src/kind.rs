//! Instance kinds — the static registry behind the `_type` config tag.
//!
//! The original platform resolved `_type` strings to driver classes at
//! runtime; here the mapping is a closed enum resolved once at config
//! load. Each kind selects a driver (an external collaborator behind the
//! `app` port traits) and a validator pair (see [`crate::validate`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Discriminator selecting the driver + validator pair for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceKind {
    // ── Device kinds ───────────────────────────────────────────────
    /// Plain on/off output (GPIO relay).
    Relay,
    /// Dimmable PWM output, hardware range 0–1023.
    LedStrip,
    /// TP-Link smart dimmer/plug, range 1–100.
    Tplink,
    /// WLED controller, range 1–255.
    Wled,
    /// Device whose rule is a chained remote command pair.
    ApiTarget,
    /// Desktop integration target (turns a monitor on/off).
    DesktopTarget,

    // ── Sensor kinds ───────────────────────────────────────────────
    /// Motion sensor; rule is the reset delay in minutes.
    Pir,
    /// Manual boolean condition injected via the API (`on`/`off` rule).
    Dummy,
    /// Temperature sensor with target/tolerance/mode semantics.
    Thermostat,
    /// Desktop integration trigger (screen on/off state, polled).
    DesktopTrigger,
    /// Load cell; condition when the reading exceeds the rule threshold.
    LoadCell,
}

impl InstanceKind {
    /// Resolve a config `_type` tag. The same tag (`desktop`) maps to a
    /// different kind depending on whether it appears under a `deviceN`
    /// or `sensorN` key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownType`] for unrecognized tags and for
    /// tags used on the wrong side (e.g. `pir` as a device).
    pub fn from_tag(tag: &str, is_device: bool) -> Result<Self, ConfigError> {
        let kind = match (tag, is_device) {
            ("relay", true) => Self::Relay,
            ("led-strip", true) => Self::LedStrip,
            ("tplink", true) => Self::Tplink,
            ("wled", true) => Self::Wled,
            ("api-target", true) => Self::ApiTarget,
            ("desktop", true) => Self::DesktopTarget,
            ("pir", false) => Self::Pir,
            ("dummy", false) => Self::Dummy,
            ("thermostat", false) => Self::Thermostat,
            ("desktop", false) => Self::DesktopTrigger,
            ("load-cell", false) => Self::LoadCell,
            _ => {
                return Err(ConfigError::UnknownType {
                    tag: tag.to_string(),
                    is_device,
                });
            }
        };
        Ok(kind)
    }

    /// The config `_type` tag for this kind.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::LedStrip => "led-strip",
            Self::Tplink => "tplink",
            Self::Wled => "wled",
            Self::ApiTarget => "api-target",
            Self::DesktopTarget | Self::DesktopTrigger => "desktop",
            Self::Pir => "pir",
            Self::Dummy => "dummy",
            Self::Thermostat => "thermostat",
            Self::LoadCell => "load-cell",
        }
    }

    /// Whether this kind is an output (device).
    #[must_use]
    pub fn is_device(self) -> bool {
        matches!(
            self,
            Self::Relay
                | Self::LedStrip
                | Self::Tplink
                | Self::Wled
                | Self::ApiTarget
                | Self::DesktopTarget
        )
    }

    /// Whether instances of this kind take a dimmable numeric rule.
    #[must_use]
    pub fn is_dimmable(self) -> bool {
        matches!(self, Self::LedStrip | Self::Tplink | Self::Wled)
    }

    /// Absolute hardware limits for dimmable kinds; config-supplied
    /// `min_rule`/`max_rule` must fall inside these.
    #[must_use]
    pub fn hardware_range(self) -> Option<(f64, f64)> {
        match self {
            Self::LedStrip => Some((0.0, 1023.0)),
            Self::Tplink => Some((1.0, 100.0)),
            Self::Wled => Some((1.0, 255.0)),
            _ => None,
        }
    }

    /// Whether this sensor kind runs a polling monitor loop (no hardware
    /// interrupt available). Event-driven kinds (`pir`, `dummy`) are
    /// triggered through the API instead.
    #[must_use]
    pub fn has_monitor(self) -> bool {
        matches!(self, Self::Thermostat | Self::DesktopTrigger | Self::LoadCell)
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
