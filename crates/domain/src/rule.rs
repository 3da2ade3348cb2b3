//! The tagged rule value.
//!
//! Rules arrive as untyped JSON (config files, the wire envelope) in a
//! handful of shapes: the universal strings `"enabled"`/`"disabled"`,
//! plain numbers, the `"fade/<target>/<period_s>"` string form, the
//! 2-key `{on, off}` api-action map, and free-form symbolic strings
//! (`"on"`/`"off"` for dummy sensors). [`Rule::from_value`] is the single
//! place that shape is decoded; per-kind acceptance lives in
//! [`crate::validate`].

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::action::ActionSpec;
use crate::error::ValidationError;

/// A rule value, the unit of all scheduling and API overrides.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Universal rule: the instance behaves normally.
    Enabled,
    /// Universal rule: the instance is switched off and ignores events.
    Disabled,
    /// Numeric rule (brightness level, threshold, delay minutes, …).
    Numeric(f64),
    /// Timed brightness transition toward `target` over `period_s`.
    Fade { target: f64, period_s: u32 },
    /// Chained remote commands fired on on/off transitions.
    ApiAction(Box<ApiActionRule>),
    /// Type-specific symbolic rule (e.g. `"on"`/`"off"` for dummy).
    Custom(String),
}

/// The `on`/`off` command pair carried by an api-target rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiActionRule {
    pub on: ActionSpec,
    pub off: ActionSpec,
}

impl Rule {
    /// Decode a rule from its JSON wire/config shape.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for shapes no instance kind accepts:
    /// booleans (a deliberate rejection — truthy coercion is a trap),
    /// arrays, null, malformed fade strings, and malformed action maps.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        match value {
            Value::Bool(_) => Err(ValidationError::Message(
                "bool rules are not accepted".to_string(),
            )),
            Value::Number(n) => {
                let num = n
                    .as_f64()
                    .ok_or_else(|| ValidationError::Message("non-finite rule".to_string()))?;
                Ok(Self::Numeric(num))
            }
            Value::String(s) => Self::from_str_form(s),
            Value::Object(map) => {
                if map.len() != 2 || !map.contains_key("on") || !map.contains_key("off") {
                    return Err(ValidationError::Message(
                        "api-target rule must have exactly the keys \"on\" and \"off\""
                            .to_string(),
                    ));
                }
                let on = ActionSpec::from_value(&map["on"])?;
                let off = ActionSpec::from_value(&map["off"])?;
                Ok(Self::ApiAction(Box::new(ApiActionRule { on, off })))
            }
            Value::Array(_) | Value::Null => Err(ValidationError::Rejected),
        }
    }

    fn from_str_form(s: &str) -> Result<Self, ValidationError> {
        if s.eq_ignore_ascii_case("enabled") {
            return Ok(Self::Enabled);
        }
        if s.eq_ignore_ascii_case("disabled") {
            return Ok(Self::Disabled);
        }
        if let Some(rest) = s.strip_prefix("fade/") {
            let (target, period) = rest.split_once('/').ok_or_else(|| {
                ValidationError::Message(format!("malformed fade rule {s:?}"))
            })?;
            let target: f64 = target
                .parse()
                .map_err(|_| ValidationError::Message(format!("malformed fade rule {s:?}")))?;
            let period_s: u32 = period
                .parse()
                .map_err(|_| ValidationError::Message(format!("malformed fade rule {s:?}")))?;
            if period_s == 0 {
                return Err(ValidationError::Message(
                    "fade period must be greater than zero".to_string(),
                ));
            }
            return Ok(Self::Fade { target, period_s });
        }
        Ok(Self::Custom(s.to_string()))
    }

    /// Whether this is one of the two universal rules.
    #[must_use]
    pub fn is_universal(&self) -> bool {
        matches!(self, Self::Enabled | Self::Disabled)
    }

    /// The numeric payload, if any.
    #[must_use]
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    /// Encode back to the JSON wire/config shape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Enabled => Value::String("enabled".to_string()),
            Self::Disabled => Value::String("disabled".to_string()),
            Self::Numeric(n) => serde_json::json!(n),
            Self::Fade { target, period_s } => {
                Value::String(format!("fade/{target}/{period_s}"))
            }
            Self::ApiAction(rule) => serde_json::json!({
                "on": rule.on.to_request(),
                "off": rule.off.to_request(),
            }),
            Self::Custom(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => f.write_str("enabled"),
            Self::Disabled => f.write_str("disabled"),
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Fade { target, period_s } => write!(f, "fade/{target}/{period_s}"),
            Self::ApiAction(_) => f.write_str("api-action"),
            Self::Custom(s) => f.write_str(s),
        }
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_decode_universal_rules_case_insensitively() {
        for s in ["enabled", "Enabled", "ENABLED"] {
            assert_eq!(Rule::from_value(&serde_json::json!(s)).unwrap(), Rule::Enabled);
        }
        assert_eq!(
            Rule::from_value(&serde_json::json!("Disabled")).unwrap(),
            Rule::Disabled
        );
    }

    #[test]
    fn should_decode_numbers_as_numeric() {
        assert_eq!(
            Rule::from_value(&serde_json::json!(512)).unwrap(),
            Rule::Numeric(512.0)
        );
        assert_eq!(
            Rule::from_value(&serde_json::json!(25.5)).unwrap(),
            Rule::Numeric(25.5)
        );
    }

    #[test]
    fn should_reject_bool_rules() {
        let err = Rule::from_value(&serde_json::json!(true)).unwrap_err();
        assert!(matches!(err, ValidationError::Message(_)));
    }

    #[test]
    fn should_decode_fade_strings() {
        let rule = Rule::from_value(&serde_json::json!("fade/512/1800")).unwrap();
        assert_eq!(
            rule,
            Rule::Fade {
                target: 512.0,
                period_s: 1800
            }
        );
    }

    #[test]
    fn should_reject_malformed_fade_strings() {
        for bad in ["fade/512", "fade/high/10", "fade/512/ten", "fade/512/0"] {
            assert!(
                Rule::from_value(&serde_json::json!(bad)).is_err(),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn should_decode_other_strings_as_custom() {
        assert_eq!(
            Rule::from_value(&serde_json::json!("on")).unwrap(),
            Rule::Custom("on".to_string())
        );
    }

    #[test]
    fn should_decode_on_off_maps_as_api_action() {
        let value = serde_json::json!({
            "on": ["turn_on", "device2"],
            "off": ["turn_off", "device2"],
        });
        let rule = Rule::from_value(&value).unwrap();
        assert!(matches!(rule, Rule::ApiAction(_)));
    }

    #[test]
    fn should_reject_maps_without_both_keys() {
        let value = serde_json::json!({"on": ["ignore"]});
        assert!(Rule::from_value(&value).is_err());
    }

    #[test]
    fn should_reject_arrays_and_null() {
        assert_eq!(
            Rule::from_value(&serde_json::json!([1, 2])).unwrap_err(),
            ValidationError::Rejected
        );
        assert_eq!(
            Rule::from_value(&Value::Null).unwrap_err(),
            ValidationError::Rejected
        );
    }

    #[test]
    fn should_roundtrip_through_wire_shape() {
        let rules = [
            Rule::Enabled,
            Rule::Disabled,
            Rule::Numeric(768.0),
            Rule::Fade {
                target: 128.0,
                period_s: 600,
            },
            Rule::Custom("on".to_string()),
        ];
        for rule in rules {
            let wire = rule.to_value();
            assert_eq!(Rule::from_value(&wire).unwrap(), rule);
        }
    }

    #[test]
    fn should_roundtrip_api_action_through_wire_shape() {
        let value = serde_json::json!({
            "on": ["ir_key", "ac", "start"],
            "off": ["ignore"],
        });
        let rule = Rule::from_value(&value).unwrap();
        assert_eq!(Rule::from_value(&rule.to_value()).unwrap(), rule);
    }
}
