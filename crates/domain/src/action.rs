//! The ApiTarget command grammar.
//!
//! An api-target device's rule is a pair of chained remote commands, one
//! fired when the device turns on and one when it turns off. Each command
//! is a JSON array whose first element selects the verb; the remaining
//! elements are checked against that verb's argument shape here, at
//! validation time, so a node never fires a request its peer is known to
//! reject. The one exception is `set_rule`: the rule payload is opaque
//! locally and validated by the receiving node.

use serde_json::Value;

use crate::error::ValidationError;
use crate::name::InstanceName;

/// A single recognized remote command.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    /// Do nothing on this transition.
    Ignore,
    /// Reboot the target node.
    Reboot,
    /// Clear the target node's log file.
    ClearLog,
    /// Enable a device or sensor.
    Enable(InstanceName),
    /// Disable a device or sensor.
    Disable(InstanceName),
    /// Reset a device or sensor to its scheduled rule.
    ResetRule(InstanceName),
    /// Query a sensor's condition (sensor-only).
    ConditionMet(InstanceName),
    /// Manually trigger a sensor (sensor-only).
    TriggerSensor(InstanceName),
    /// Turn a device on (device-only).
    TurnOn(InstanceName),
    /// Turn a device off (device-only).
    TurnOff(InstanceName),
    /// Enable a device or sensor after a delay in minutes.
    EnableIn(InstanceName, f64),
    /// Disable a device or sensor after a delay in minutes.
    DisableIn(InstanceName, f64),
    /// Set a rule on a device or sensor; the payload is validated by the
    /// receiving node, not locally.
    SetRule(InstanceName, Value),
    /// Send an IR key: remote name + key name, both free-form.
    IrKey { remote: String, key: String },
}

impl ActionSpec {
    /// Parse one command from its JSON array form.
    ///
    /// # Errors
    ///
    /// Returns a descriptive [`ValidationError`] for unknown verbs, wrong
    /// argument counts, wrong target kinds (e.g. `turn_on` on a sensor),
    /// and non-numeric delays.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let parts = value
            .as_array()
            .ok_or_else(|| ValidationError::Message("command must be an array".to_string()))?;
        let (verb, args) = parts
            .split_first()
            .ok_or_else(|| ValidationError::Message("empty command".to_string()))?;
        let verb = verb
            .as_str()
            .ok_or_else(|| ValidationError::Message("command verb must be a string".to_string()))?;

        let spec = match verb {
            "ignore" => arity(verb, args, 0).map(|()| Self::Ignore)?,
            "reboot" => arity(verb, args, 0).map(|()| Self::Reboot)?,
            "clear_log" => arity(verb, args, 0).map(|()| Self::ClearLog)?,
            "enable" => Self::Enable(any_instance(verb, args)?),
            "disable" => Self::Disable(any_instance(verb, args)?),
            "reset_rule" => Self::ResetRule(any_instance(verb, args)?),
            "condition_met" => Self::ConditionMet(sensor_only(verb, args)?),
            "trigger_sensor" => Self::TriggerSensor(sensor_only(verb, args)?),
            "turn_on" => Self::TurnOn(device_only(verb, args)?),
            "turn_off" => Self::TurnOff(device_only(verb, args)?),
            "enable_in" => {
                let (name, delay) = delayed(verb, args)?;
                Self::EnableIn(name, delay)
            }
            "disable_in" => {
                let (name, delay) = delayed(verb, args)?;
                Self::DisableIn(name, delay)
            }
            "set_rule" => {
                arity(verb, args, 2)?;
                let name = instance_arg(verb, &args[0])?;
                Self::SetRule(name, args[1].clone())
            }
            "ir_key" => {
                arity(verb, args, 2)?;
                let remote = string_arg(verb, &args[0])?;
                let key = string_arg(verb, &args[1])?;
                Self::IrKey { remote, key }
            }
            other => {
                return Err(ValidationError::Message(format!(
                    "unknown command {other:?}"
                )));
            }
        };
        Ok(spec)
    }

    /// Encode as the JSON array sent over the wire.
    #[must_use]
    pub fn to_request(&self) -> Vec<Value> {
        fn req(parts: &[Value]) -> Vec<Value> {
            parts.to_vec()
        }
        match self {
            Self::Ignore => req(&[Value::from("ignore")]),
            Self::Reboot => req(&[Value::from("reboot")]),
            Self::ClearLog => req(&[Value::from("clear_log")]),
            Self::Enable(n) => req(&[Value::from("enable"), Value::from(n.to_string())]),
            Self::Disable(n) => req(&[Value::from("disable"), Value::from(n.to_string())]),
            Self::ResetRule(n) => req(&[Value::from("reset_rule"), Value::from(n.to_string())]),
            Self::ConditionMet(n) => {
                req(&[Value::from("condition_met"), Value::from(n.to_string())])
            }
            Self::TriggerSensor(n) => {
                req(&[Value::from("trigger_sensor"), Value::from(n.to_string())])
            }
            Self::TurnOn(n) => req(&[Value::from("turn_on"), Value::from(n.to_string())]),
            Self::TurnOff(n) => req(&[Value::from("turn_off"), Value::from(n.to_string())]),
            Self::EnableIn(n, delay) => req(&[
                Value::from("enable_in"),
                Value::from(n.to_string()),
                Value::from(*delay),
            ]),
            Self::DisableIn(n, delay) => req(&[
                Value::from("disable_in"),
                Value::from(n.to_string()),
                Value::from(*delay),
            ]),
            Self::SetRule(n, rule) => req(&[
                Value::from("set_rule"),
                Value::from(n.to_string()),
                rule.clone(),
            ]),
            Self::IrKey { remote, key } => req(&[
                Value::from("ir_key"),
                Value::from(remote.clone()),
                Value::from(key.clone()),
            ]),
        }
    }

    /// Whether firing this command is a no-op.
    #[must_use]
    pub fn is_ignore(&self) -> bool {
        matches!(self, Self::Ignore)
    }
}

fn arity(verb: &str, args: &[Value], expected: usize) -> Result<(), ValidationError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ValidationError::Message(format!(
            "{verb} takes {expected} argument(s), got {}",
            args.len()
        )))
    }
}

fn instance_arg(verb: &str, arg: &Value) -> Result<InstanceName, ValidationError> {
    arg.as_str()
        .ok_or_else(|| {
            ValidationError::Message(format!("{verb} target must be an instance name"))
        })?
        .parse()
        .map_err(|_| ValidationError::Message(format!("{verb} target must be an instance name")))
}

fn any_instance(verb: &str, args: &[Value]) -> Result<InstanceName, ValidationError> {
    arity(verb, args, 1)?;
    instance_arg(verb, &args[0])
}

fn sensor_only(verb: &str, args: &[Value]) -> Result<InstanceName, ValidationError> {
    let name = any_instance(verb, args)?;
    if name.is_sensor() {
        Ok(name)
    } else {
        Err(ValidationError::Message(format!(
            "{verb} only takes a sensor, got {name}"
        )))
    }
}

fn device_only(verb: &str, args: &[Value]) -> Result<InstanceName, ValidationError> {
    let name = any_instance(verb, args)?;
    if name.is_device() {
        Ok(name)
    } else {
        Err(ValidationError::Message(format!(
            "{verb} only takes a device, got {name}"
        )))
    }
}

fn delayed(verb: &str, args: &[Value]) -> Result<(InstanceName, f64), ValidationError> {
    arity(verb, args, 2)?;
    let name = instance_arg(verb, &args[0])?;
    let delay = args[1]
        .as_f64()
        .ok_or_else(|| ValidationError::Message(format!("{verb} delay must be numeric")))?;
    if delay < 0.0 {
        return Err(ValidationError::Message(format!(
            "{verb} delay must not be negative"
        )));
    }
    Ok((name, delay))
}

fn string_arg(verb: &str, arg: &Value) -> Result<String, ValidationError> {
    arg.as_str()
        .map(ToString::to_string)
        .ok_or_else(|| ValidationError::Message(format!("{verb} arguments must be strings")))
}
