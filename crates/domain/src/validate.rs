//! Per-kind rule validation.
//!
//! Every instance kind pairs a *default* validator with a *schedule*
//! validator. Both accept the two universal rules transparently — except
//! as the default rule for kinds whose rule space is concrete (numeric or
//! action rules), because `default_rule` must always be directly usable.
//!
//! Validators are total functions `Rule -> Result<Rule, ValidationError>`.
//! Acceptance may return a *replacement* value (a string cast to a
//! number, case normalization); validation is idempotent, so feeding an
//! accepted rule back in yields it unchanged.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::kind::InstanceKind;
use crate::rule::Rule;

/// Config-supplied numeric rule bounds, themselves bounded by the
/// hardware-absolute range of the kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleLimits {
    pub min: f64,
    pub max: f64,
}

/// Thermostat operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermostatMode {
    Heat,
    Cool,
}

/// Temperature units the thermostat rule is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnits {
    Fahrenheit,
    Celsius,
    Kelvin,
}

impl TemperatureUnits {
    /// Convert a reading in these units to degrees Celsius.
    #[must_use]
    pub fn to_celsius(self, value: f64) -> f64 {
        match self {
            Self::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
            Self::Celsius => value,
            Self::Kelvin => value - 273.15,
        }
    }
}

/// Attributes a thermostat instance must carry for its rules to be
/// meaningful. Missing or out-of-range values produce descriptive
/// errors that callers surface verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermostatParams {
    pub tolerance: f64,
    pub mode: ThermostatMode,
    pub units: TemperatureUnits,
}

impl ThermostatParams {
    /// Physical target range in Celsius.
    pub const RANGE_CELSIUS: (f64, f64) = (18.0, 27.0);

    /// Check the tolerance bound.
    ///
    /// # Errors
    ///
    /// Returns a descriptive [`ValidationError::Message`].
    pub fn check(&self) -> Result<(), ValidationError> {
        if !(0.1..=10.0).contains(&self.tolerance) || self.tolerance.is_nan() {
            return Err(ValidationError::Message(format!(
                "thermostat tolerance must be between 0.1 and 10.0, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// The validator pair for one configured instance.
#[derive(Debug, Clone)]
pub struct RuleValidator {
    kind: InstanceKind,
    limits: Option<RuleLimits>,
    thermostat: Option<ThermostatParams>,
}

impl RuleValidator {
    /// Validator for a kind with no extra attributes.
    #[must_use]
    pub fn new(kind: InstanceKind) -> Self {
        Self {
            kind,
            limits: None,
            thermostat: None,
        }
    }

    /// Attach config-supplied numeric limits (dimmable kinds).
    #[must_use]
    pub fn with_limits(mut self, limits: RuleLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Attach thermostat attributes.
    #[must_use]
    pub fn with_thermostat(mut self, params: ThermostatParams) -> Self {
        self.thermostat = Some(params);
        self
    }

    #[must_use]
    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    /// Numeric bounds in effect: config limits, else the hardware range.
    #[must_use]
    pub fn limits(&self) -> Option<RuleLimits> {
        self.limits.or_else(|| {
            self.kind
                .hardware_range()
                .map(|(min, max)| RuleLimits { min, max })
        })
    }

    /// Validate a schedule or API rule. Universal rules pass transparently.
    ///
    /// # Errors
    ///
    /// [`ValidationError::Rejected`] for rules this kind does not accept,
    /// [`ValidationError::Message`] where a descriptive reason exists.
    pub fn validate(&self, rule: Rule) -> Result<Rule, ValidationError> {
        if rule.is_universal() {
            return Ok(rule);
        }
        self.validate_concrete(rule)
    }

    /// Validate a default rule. Universal rules are rejected for kinds
    /// that require a concrete operable value; fades are never valid
    /// defaults (there is no level to start from at boot).
    ///
    /// # Errors
    ///
    /// See [`Self::validate`].
    pub fn validate_default(&self, rule: Rule) -> Result<Rule, ValidationError> {
        if rule.is_universal() {
            if self.requires_concrete_default() {
                return Err(ValidationError::Message(format!(
                    "default_rule for {} must be a concrete value, not {rule}",
                    self.kind
                )));
            }
            return Ok(rule);
        }
        if matches!(rule, Rule::Fade { .. }) {
            return Err(ValidationError::Message(
                "default_rule must not be a fade".to_string(),
            ));
        }
        self.validate_concrete(rule)
    }

    fn requires_concrete_default(&self) -> bool {
        self.kind.is_dimmable()
            || matches!(
                self.kind,
                InstanceKind::Pir
                    | InstanceKind::LoadCell
                    | InstanceKind::Thermostat
                    | InstanceKind::Dummy
                    | InstanceKind::ApiTarget
            )
    }

    fn validate_concrete(&self, rule: Rule) -> Result<Rule, ValidationError> {
        match self.kind {
            // Binary kinds take no rules beyond the universal pair.
            InstanceKind::Relay | InstanceKind::DesktopTarget | InstanceKind::DesktopTrigger => {
                Err(ValidationError::Rejected)
            }
            InstanceKind::LedStrip | InstanceKind::Tplink | InstanceKind::Wled => {
                self.validate_dimmable(rule)
            }
            InstanceKind::Pir => {
                let minutes = numeric_payload(&rule)?;
                if minutes < 0.0 {
                    return Err(ValidationError::Message(
                        "pir delay must not be negative".to_string(),
                    ));
                }
                Ok(Rule::Numeric(minutes))
            }
            InstanceKind::LoadCell => Ok(Rule::Numeric(numeric_payload(&rule)?)),
            InstanceKind::Dummy => match rule {
                Rule::Custom(s) if s.eq_ignore_ascii_case("on") => {
                    Ok(Rule::Custom("on".to_string()))
                }
                Rule::Custom(s) if s.eq_ignore_ascii_case("off") => {
                    Ok(Rule::Custom("off".to_string()))
                }
                _ => Err(ValidationError::Rejected),
            },
            InstanceKind::Thermostat => self.validate_thermostat(rule),
            InstanceKind::ApiTarget => match rule {
                Rule::ApiAction(r) => Ok(Rule::ApiAction(r)),
                // Wire form: a string-encoded JSON object.
                Rule::Custom(s) => {
                    let decoded: serde_json::Value = serde_json::from_str(&s)
                        .map_err(|_| ValidationError::Rejected)?;
                    match Rule::from_value(&decoded)? {
                        Rule::ApiAction(r) => Ok(Rule::ApiAction(r)),
                        _ => Err(ValidationError::Rejected),
                    }
                }
                _ => Err(ValidationError::Rejected),
            },
        }
    }

    fn validate_dimmable(&self, rule: Rule) -> Result<Rule, ValidationError> {
        let Some(limits) = self.limits() else {
            return Err(ValidationError::Message(format!(
                "{} has no rule limits configured",
                self.kind
            )));
        };
        let in_range = |value: f64| -> Result<f64, ValidationError> {
            if value.is_nan() {
                return Err(ValidationError::Message(
                    "rule must not be NaN".to_string(),
                ));
            }
            if value < limits.min || value > limits.max {
                return Err(ValidationError::Message(format!(
                    "rule {value} is outside limits {}-{}",
                    limits.min, limits.max
                )));
            }
            Ok(value)
        };
        match rule {
            Rule::Fade { target, period_s } => Ok(Rule::Fade {
                target: in_range(target)?,
                period_s,
            }),
            other => Ok(Rule::Numeric(in_range(numeric_payload(&other)?)?)),
        }
    }

    fn validate_thermostat(&self, rule: Rule) -> Result<Rule, ValidationError> {
        let Some(params) = self.thermostat else {
            return Err(ValidationError::Message(
                "thermostat attributes (tolerance, mode, units) are missing".to_string(),
            ));
        };
        params.check()?;
        let target = numeric_payload(&rule)?;
        let celsius = params.units.to_celsius(target);
        let (min, max) = ThermostatParams::RANGE_CELSIUS;
        if celsius.is_nan() || celsius < min || celsius > max {
            return Err(ValidationError::Message(format!(
                "thermostat rule {target} is outside the supported range \
                 ({min}-{max} celsius equivalent)"
            )));
        }
        Ok(Rule::Numeric(target))
    }
}

/// Extract a numeric payload, casting numeric strings (replacement-value
/// contract) and rejecting everything else.
fn numeric_payload(rule: &Rule) -> Result<f64, ValidationError> {
    match rule {
        Rule::Numeric(n) => Ok(*n),
        Rule::Custom(s) => s.trim().parse().map_err(|_| ValidationError::Rejected),
        _ => Err(ValidationError::Rejected),
    }
}
