//! The node config schema consumed by the core.
//!
//! A config file is a JSON object with an optional `metadata` section and
//! a flat set of `deviceN`/`sensorN` keys (1-based, sequential, no gaps).
//! Structural errors — gapped numbering, duplicate nicknames, unknown
//! sensor targets, out-of-range limits — are surfaced here as descriptive
//! [`ConfigError`]s before the core ever starts; the runtime assumes a
//! validated config.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::kind::InstanceKind;
use crate::name::InstanceName;
use crate::rule::Rule;
use crate::schedule::{self, ScheduleKeywords};
use crate::validate::{
    RuleLimits, RuleValidator, TemperatureUnits, ThermostatMode, ThermostatParams,
};

/// Raw per-instance entry as it appears in the file.
#[derive(Debug, Clone, Deserialize)]
struct RawInstance {
    #[serde(rename = "_type")]
    type_tag: String,
    #[serde(default)]
    nickname: Option<String>,
    default_rule: Value,
    #[serde(default)]
    schedule: BTreeMap<String, Value>,
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    min_rule: Option<f64>,
    #[serde(default)]
    max_rule: Option<f64>,
    #[serde(default)]
    tolerance: Option<f64>,
    #[serde(default)]
    mode: Option<ThermostatMode>,
    #[serde(default)]
    units: Option<TemperatureUnits>,
    /// Peer address for network-backed kinds (`host` or `host:port`).
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    schedule_keywords: HashMap<String, String>,
}

/// A validated device entry.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: InstanceName,
    pub kind: InstanceKind,
    pub nickname: String,
    pub default_rule: Rule,
    pub schedule: BTreeMap<String, Value>,
    pub limits: Option<RuleLimits>,
    pub ip: Option<String>,
}

impl DeviceConfig {
    /// The validator pair for this device.
    #[must_use]
    pub fn validator(&self) -> RuleValidator {
        let mut validator = RuleValidator::new(self.kind);
        if let Some(limits) = self.limits {
            validator = validator.with_limits(limits);
        }
        validator
    }
}

/// A validated sensor entry.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub name: InstanceName,
    pub kind: InstanceKind,
    pub nickname: String,
    pub default_rule: Rule,
    pub schedule: BTreeMap<String, Value>,
    pub targets: Vec<InstanceName>,
    pub thermostat: Option<ThermostatParams>,
    pub ip: Option<String>,
}

impl SensorConfig {
    /// The validator pair for this sensor.
    #[must_use]
    pub fn validator(&self) -> RuleValidator {
        let mut validator = RuleValidator::new(self.kind);
        if let Some(params) = self.thermostat {
            validator = validator.with_thermostat(params);
        }
        validator
    }
}

/// The whole validated node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Display name of this node.
    pub id: String,
    pub keywords: ScheduleKeywords,
    pub devices: Vec<DeviceConfig>,
    pub sensors: Vec<SensorConfig>,
}

impl NodeConfig {
    /// Parse and structurally validate a config document.
    ///
    /// # Errors
    ///
    /// Returns a descriptive [`ConfigError`] on the first structural
    /// problem found.
    pub fn parse(value: &Value) -> Result<Self, ConfigError> {
        let root = value.as_object().ok_or_else(|| ConfigError::Invalid {
            key: "<root>".to_string(),
            message: "config must be a JSON object".to_string(),
        })?;

        let metadata: RawMetadata = match root.get("metadata") {
            Some(meta) => {
                serde_json::from_value(meta.clone()).map_err(|err| ConfigError::Invalid {
                    key: "metadata".to_string(),
                    message: err.to_string(),
                })?
            }
            None => RawMetadata::default(),
        };
        let keywords =
            schedule::parse_keywords(&metadata.schedule_keywords).map_err(|err| {
                ConfigError::Invalid {
                    key: "metadata.schedule_keywords".to_string(),
                    message: err.to_string(),
                }
            })?;

        let mut raw_devices: BTreeMap<u16, RawInstance> = BTreeMap::new();
        let mut raw_sensors: BTreeMap<u16, RawInstance> = BTreeMap::new();
        for (key, entry) in root {
            if key == "metadata" {
                continue;
            }
            let name: InstanceName = key.parse().map_err(|_| ConfigError::Invalid {
                key: key.clone(),
                message: "keys must be metadata, deviceN, or sensorN".to_string(),
            })?;
            let raw: RawInstance =
                serde_json::from_value(entry.clone()).map_err(|err| ConfigError::Invalid {
                    key: key.clone(),
                    message: err.to_string(),
                })?;
            match name {
                InstanceName::Device(n) => raw_devices.insert(n, raw),
                InstanceName::Sensor(n) => raw_sensors.insert(n, raw),
            };
        }

        check_sequential(&raw_devices, "device")?;
        check_sequential(&raw_sensors, "sensor")?;

        let mut nicknames = HashSet::new();
        let mut devices = Vec::with_capacity(raw_devices.len());
        for (index, raw) in raw_devices {
            devices.push(build_device(InstanceName::Device(index), raw, &mut nicknames)?);
        }
        let device_names: HashSet<InstanceName> = devices.iter().map(|d| d.name).collect();

        let mut sensors = Vec::with_capacity(raw_sensors.len());
        for (index, raw) in raw_sensors {
            sensors.push(build_sensor(
                InstanceName::Sensor(index),
                raw,
                &mut nicknames,
                &device_names,
            )?);
        }

        Ok(Self {
            id: metadata.id.unwrap_or_else(|| "homenode".to_string()),
            keywords,
            devices,
            sensors,
        })
    }
}

fn check_sequential(entries: &BTreeMap<u16, RawInstance>, prefix: &str) -> Result<(), ConfigError> {
    for (position, index) in entries.keys().enumerate() {
        let expected = u16::try_from(position + 1).unwrap_or(u16::MAX);
        if *index != expected {
            return Err(ConfigError::NonSequential {
                expected: format!("{prefix}{expected}"),
                found: format!("{prefix}{index}"),
            });
        }
    }
    Ok(())
}

fn claim_nickname(
    key: InstanceName,
    raw: &RawInstance,
    nicknames: &mut HashSet<String>,
) -> Result<String, ConfigError> {
    let nickname = raw.nickname.clone().ok_or(ConfigError::MissingField {
        key: key.to_string(),
        field: "nickname",
    })?;
    if !nicknames.insert(nickname.clone()) {
        return Err(ConfigError::DuplicateNickname(nickname));
    }
    Ok(nickname)
}

fn parse_limits(
    key: InstanceName,
    kind: InstanceKind,
    raw: &RawInstance,
) -> Result<Option<RuleLimits>, ConfigError> {
    let limits = match (raw.min_rule, raw.max_rule) {
        (Some(min), Some(max)) => RuleLimits { min, max },
        (None, None) => return Ok(None),
        _ => {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                message: "min_rule and max_rule must be supplied together".to_string(),
            });
        }
    };
    if limits.min > limits.max {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("min_rule {} exceeds max_rule {}", limits.min, limits.max),
        });
    }
    if let Some((hw_min, hw_max)) = kind.hardware_range() {
        if limits.min < hw_min || limits.max > hw_max {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                message: format!(
                    "limits {}-{} exceed the hardware range {hw_min}-{hw_max}",
                    limits.min, limits.max
                ),
            });
        }
    } else {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("{kind} does not take rule limits"),
        });
    }
    Ok(Some(limits))
}

fn build_device(
    name: InstanceName,
    raw: RawInstance,
    nicknames: &mut HashSet<String>,
) -> Result<DeviceConfig, ConfigError> {
    let kind = InstanceKind::from_tag(&raw.type_tag, true)?;
    let nickname = claim_nickname(name, &raw, nicknames)?;
    let limits = parse_limits(name, kind, &raw)?;

    if matches!(kind, InstanceKind::ApiTarget | InstanceKind::Tplink | InstanceKind::Wled)
        && raw.ip.is_none()
    {
        return Err(ConfigError::MissingField {
            key: name.to_string(),
            field: "ip",
        });
    }

    let mut validator = RuleValidator::new(kind);
    if let Some(limits) = limits {
        validator = validator.with_limits(limits);
    }
    let default_rule = Rule::from_value(&raw.default_rule)
        .and_then(|rule| validator.validate_default(rule))
        .map_err(|source| ConfigError::DefaultRule {
            key: name.to_string(),
            source,
        })?;

    Ok(DeviceConfig {
        name,
        kind,
        nickname,
        default_rule,
        schedule: raw.schedule,
        limits,
        ip: raw.ip,
    })
}

fn build_sensor(
    name: InstanceName,
    raw: RawInstance,
    nicknames: &mut HashSet<String>,
    device_names: &HashSet<InstanceName>,
) -> Result<SensorConfig, ConfigError> {
    let kind = InstanceKind::from_tag(&raw.type_tag, false)?;
    let nickname = claim_nickname(name, &raw, nicknames)?;

    let mut targets = Vec::with_capacity(raw.targets.len());
    for target in &raw.targets {
        let target_name: InstanceName =
            target.parse().map_err(|_| ConfigError::UnknownTarget {
                sensor: name.to_string(),
                target: target.clone(),
            })?;
        if !device_names.contains(&target_name) {
            return Err(ConfigError::UnknownTarget {
                sensor: name.to_string(),
                target: target.clone(),
            });
        }
        targets.push(target_name);
    }

    let thermostat = if kind == InstanceKind::Thermostat {
        let params = ThermostatParams {
            tolerance: raw.tolerance.ok_or(ConfigError::MissingField {
                key: name.to_string(),
                field: "tolerance",
            })?,
            mode: raw.mode.ok_or(ConfigError::MissingField {
                key: name.to_string(),
                field: "mode",
            })?,
            units: raw.units.ok_or(ConfigError::MissingField {
                key: name.to_string(),
                field: "units",
            })?,
        };
        params.check().map_err(|err| ConfigError::Invalid {
            key: name.to_string(),
            message: err.to_string(),
        })?;
        Some(params)
    } else {
        None
    };

    let mut validator = RuleValidator::new(kind);
    if let Some(params) = thermostat {
        validator = validator.with_thermostat(params);
    }
    let default_rule = Rule::from_value(&raw.default_rule)
        .and_then(|rule| validator.validate_default(rule))
        .map_err(|source| ConfigError::DefaultRule {
            key: name.to_string(),
            source,
        })?;

    Ok(SensorConfig {
        name,
        kind,
        nickname,
        default_rule,
        schedule: raw.schedule,
        targets,
        thermostat,
        ip: raw.ip,
    })
}
