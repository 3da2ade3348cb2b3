//! Shared rule lifecycle for devices and sensors.
//!
//! [`InstanceCore`] is the state machine every instance embeds: enabled
//! flag, default/scheduled/current rule, and the day's rule queue. It is
//! deliberately synchronous — lifecycle side effects that need IO
//! (re-sending device state, starting monitor tasks) are described by the
//! returned [`RuleApplied`] directive and performed by the embedding
//! device/sensor, so no lock is ever held across an await.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, info};

use homenode_domain::error::ValidationError;
use homenode_domain::kind::InstanceKind;
use homenode_domain::name::InstanceName;
use homenode_domain::rule::Rule;
use homenode_domain::schedule::{BuiltSchedule, QueueEntry};
use homenode_domain::time::Timestamp;
use homenode_domain::validate::RuleValidator;

/// Outcome of a successful rule change: the rule now in force plus the
/// lifecycle transition the embedding instance must carry out.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleApplied {
    pub rule: Rule,
    /// The new rule is `disabled`; the instance must switch itself off.
    pub should_disable: bool,
    /// The instance was disabled and the new rule is usable; it must
    /// re-enable itself.
    pub should_enable: bool,
}

#[derive(Debug)]
struct RuleState {
    enabled: bool,
    current: Rule,
    scheduled: Option<Rule>,
    queue: Vec<QueueEntry>,
}

/// The lifecycle state shared by every device and sensor.
pub struct InstanceCore {
    name: InstanceName,
    nickname: String,
    validator: RuleValidator,
    default_rule: Rule,
    /// The raw schedule map, kept for the daily queue rebuild.
    schedule: BTreeMap<String, Value>,
    state: Mutex<RuleState>,
}

impl InstanceCore {
    #[must_use]
    pub fn new(
        name: InstanceName,
        nickname: String,
        validator: RuleValidator,
        default_rule: Rule,
        schedule: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            name,
            nickname,
            validator,
            default_rule: default_rule.clone(),
            schedule,
            state: Mutex::new(RuleState {
                enabled: true,
                current: default_rule,
                scheduled: None,
                queue: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> InstanceName {
        self.name
    }

    #[must_use]
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    #[must_use]
    pub fn kind(&self) -> InstanceKind {
        self.validator.kind()
    }

    #[must_use]
    pub fn validator(&self) -> &RuleValidator {
        &self.validator
    }

    #[must_use]
    pub fn schedule(&self) -> &BTreeMap<String, Value> {
        &self.schedule
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    #[must_use]
    pub fn current_rule(&self) -> Rule {
        self.lock().current.clone()
    }

    #[must_use]
    pub fn scheduled_rule(&self) -> Option<Rule> {
        self.lock().scheduled.clone()
    }

    #[must_use]
    pub fn default_rule(&self) -> &Rule {
        &self.default_rule
    }

    /// The rule actually consulted by `send`/`condition_met`.
    ///
    /// A universal `current_rule` is resolved here: `enabled` falls
    /// through to the scheduled rule, then the default. Callers never see
    /// a universal value.
    #[must_use]
    pub fn operative_rule(&self) -> Rule {
        let state = self.lock();
        Self::resolve(&state.current, state.scheduled.as_ref(), &self.default_rule)
    }

    fn resolve(current: &Rule, scheduled: Option<&Rule>, default: &Rule) -> Rule {
        if !current.is_universal() {
            return current.clone();
        }
        match scheduled {
            Some(rule) if !rule.is_universal() => rule.clone(),
            _ => default.clone(),
        }
    }

    /// Mark enabled, resolving a universal `current_rule` to the
    /// scheduled rule, then the default, so the instance is never enabled
    /// with an unusable rule in force.
    pub fn mark_enabled(&self) {
        let mut state = self.lock();
        state.enabled = true;
        if state.current.is_universal() {
            state.current =
                Self::resolve(&state.current, state.scheduled.as_ref(), &self.default_rule);
        }
        debug!(name = %self.name, rule = %state.current, "instance enabled");
    }

    pub fn mark_disabled(&self) {
        let mut state = self.lock();
        state.enabled = false;
        debug!(name = %self.name, "instance disabled");
    }

    /// Validate and apply a rule supplied over the wire.
    ///
    /// On success `current_rule` is updated and the caller receives the
    /// lifecycle directive; on failure nothing changes.
    ///
    /// # Errors
    ///
    /// Propagates the validator's [`ValidationError`] untouched, so
    /// descriptive messages reach the API caller verbatim.
    pub fn set_rule_value(&self, raw: &Value) -> Result<RuleApplied, ValidationError> {
        let rule = self.validator.validate(Rule::from_value(raw)?)?;
        Ok(self.apply(rule, false))
    }

    /// Apply an already-validated rule (queue entries, resets).
    pub fn apply_rule(&self, rule: Rule) -> RuleApplied {
        self.apply(rule, false)
    }

    /// Apply a rule coming from the schedule, so `scheduled_rule` tracks
    /// it and `reset_rule` keeps its "undo API override" meaning.
    pub fn apply_schedule_rule(&self, rule: Rule) -> RuleApplied {
        self.apply(rule, true)
    }

    /// Pop the head of the rule queue without applying it. Devices use
    /// this to run their fade gate between pop and apply.
    pub fn pop_rule(&self) -> Option<Rule> {
        let mut state = self.lock();
        if state.queue.is_empty() {
            None
        } else {
            Some(state.queue.remove(0).rule)
        }
    }

    fn apply(&self, rule: Rule, from_schedule: bool) -> RuleApplied {
        let mut state = self.lock();
        let was_enabled = state.enabled;
        state.current = rule.clone();
        if from_schedule {
            state.scheduled = Some(rule.clone());
        }
        info!(name = %self.name, rule = %rule, "rule changed");
        RuleApplied {
            should_disable: rule == Rule::Disabled,
            should_enable: !was_enabled && rule != Rule::Disabled,
            rule,
        }
    }

    /// Pop the head of the rule queue and apply it, keeping
    /// `scheduled_rule` in sync so a later `reset_rule` undoes any API
    /// override made in the meantime.
    pub fn next_rule(&self) -> Option<RuleApplied> {
        self.pop_rule().map(|rule| self.apply(rule, true))
    }

    /// Revert an API override: `current_rule` becomes `scheduled_rule`.
    /// No-op when no schedule entry is in force.
    pub fn reset_rule(&self) -> Option<RuleApplied> {
        let scheduled = self.lock().scheduled.clone()?;
        Some(self.apply(scheduled, true))
    }

    /// Install a freshly built schedule (daily rebuild or boot).
    ///
    /// The queue and `scheduled_rule` are always replaced; `current_rule`
    /// follows the new scheduled rule only when it was not overridden via
    /// API (i.e. it still equals the previous scheduled rule) or when
    /// `apply_current` forces it (boot).
    pub fn load_schedule(&self, built: BuiltSchedule, apply_current: bool) -> Option<RuleApplied> {
        let apply = {
            let mut state = self.lock();
            let overridden = state
                .scheduled
                .as_ref()
                .is_some_and(|old| state.current != *old);
            state.queue = built.queue;
            state.scheduled.clone_from(&built.current);
            match &built.current {
                Some(rule) if apply_current || !overridden => Some(rule.clone()),
                _ => None,
            }
        };
        apply.map(|rule| self.apply(rule, true))
    }

    /// Expiration of the next queued rule change, if any.
    #[must_use]
    pub fn next_boundary(&self) -> Option<Timestamp> {
        self.lock().queue.first().map(|entry| entry.at)
    }

    /// Expirations of every queued rule change, ascending.
    #[must_use]
    pub fn boundaries(&self) -> Vec<Timestamp> {
        self.lock().queue.iter().map(|entry| entry.at).collect()
    }

    /// Status fragment reported by the `status` endpoint.
    #[must_use]
    pub fn status(&self) -> Value {
        let state = self.lock();
        serde_json::json!({
            "nickname": self.nickname,
            "type": self.kind().tag(),
            "enabled": state.enabled,
            "current_rule": state.current.to_value(),
            "scheduled_rule": state.scheduled.as_ref().map(Rule::to_value),
            "default_rule": self.default_rule.to_value(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RuleState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InstanceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCore")
            .field("name", &self.name)
            .field("nickname", &self.nickname)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}
