//! Device — an output instance driven through its driver port.
//!
//! A device layers three things on [`InstanceCore`]: the last known
//! on/off state (`None` until the first action, and deliberately left
//! stale when a driver reports failure so the next group evaluation
//! retries), the fade gate, and the translation from the operative rule
//! to a [`DeviceCommand`].

use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use homenode_domain::error::ValidationError;
use homenode_domain::rule::Rule;

use crate::fade::{self, FadeState, Gate};
use crate::group::Group;
use crate::instance::{InstanceCore, RuleApplied};
use crate::ports::{DeviceCommand, DeviceDriver};
use crate::timer::SoftwareTimer;

pub struct Device {
    core: InstanceCore,
    driver: Box<dyn DeviceDriver>,
    timer: Arc<SoftwareTimer>,
    state: Mutex<Option<bool>>,
    fade: Mutex<Option<FadeState>>,
    group: Mutex<Weak<Group>>,
}

impl Device {
    #[must_use]
    pub fn new(core: InstanceCore, driver: Box<dyn DeviceDriver>, timer: Arc<SoftwareTimer>) -> Self {
        Self {
            core,
            driver,
            timer,
            state: Mutex::new(None),
            fade: Mutex::new(None),
            group: Mutex::new(Weak::new()),
        }
    }

    #[must_use]
    pub fn core(&self) -> &InstanceCore {
        &self.core
    }

    /// Last known on/off state; `None` before the first action.
    #[must_use]
    pub fn state(&self) -> Option<bool> {
        *lock(&self.state)
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        self.state() == Some(true)
    }

    pub(crate) fn attach_group(&self, group: &Arc<Group>) {
        *lock(&self.group) = Arc::downgrade(group);
    }

    #[must_use]
    pub fn group(&self) -> Option<Arc<Group>> {
        lock(&self.group).upgrade()
    }

    /// Drive the output to `desired`, translating the operative rule into
    /// a driver command.
    ///
    /// Returns the driver's verdict: `true` means accepted (don't
    /// retry); on `false` the cached state is left untouched so the next
    /// group evaluation retries.
    pub async fn send(&self, desired: bool) -> bool {
        let command = self.command_for(desired);
        let accepted = self.driver.send(command).await;
        if accepted {
            *lock(&self.state) = Some(desired);
            debug!(name = %self.core.name(), desired, "device state updated");
        } else {
            warn!(name = %self.core.name(), desired, "driver rejected command, will retry");
        }
        accepted
    }

    fn command_for(&self, desired: bool) -> DeviceCommand {
        let rule = self.core.operative_rule();
        match (&rule, desired) {
            (Rule::ApiAction(action), true) => DeviceCommand::Action(action.on.clone()),
            (Rule::ApiAction(action), false) => DeviceCommand::Action(action.off.clone()),
            (_, false) => DeviceCommand::Off,
            (_, true) => DeviceCommand::On {
                level: if self.core.kind().is_dimmable() {
                    Some(self.current_level())
                } else {
                    None
                },
            },
        }
    }

    /// The brightness level in force: the in-flight fade level, the
    /// operative numeric rule, or the configured minimum.
    #[must_use]
    pub fn current_level(&self) -> f64 {
        if let Some(fade) = self.fade_state() {
            return fade.current;
        }
        if let Some(level) = self.core.operative_rule().as_numeric() {
            return level;
        }
        self.core
            .validator()
            .limits()
            .map_or(0.0, |limits| limits.min)
    }

    /// Enable and, when the owning group already holds a true aggregate,
    /// re-send the on command so the output matches reality.
    pub async fn enable(&self) {
        self.core.mark_enabled();
        if self.group().and_then(|g| g.state()) == Some(true) {
            self.send(true).await;
        }
    }

    /// Turn the output off (when on), then disable. An active fade is
    /// collapsed to its in-flight level first.
    pub async fn disable(&self) {
        if let Some(level) = self.abort_fade() {
            let _ = self.core.apply_rule(Rule::Numeric(level));
        }
        if self.is_on() {
            self.send(false).await;
        }
        self.core.mark_disabled();
    }

    /// Re-issue the on command so a fresh rule takes effect immediately.
    pub async fn apply_new_rule(&self) {
        if self.is_on() {
            self.send(true).await;
        }
    }

    /// Validate and apply an API-supplied rule.
    ///
    /// # Errors
    ///
    /// Propagates the validator's error verbatim; state is untouched on
    /// rejection.
    pub async fn set_rule(self: &Arc<Self>, raw: &Value) -> Result<Rule, ValidationError> {
        let incoming = self.core.validator().validate(Rule::from_value(raw)?)?;
        Ok(self.apply_gated(incoming, false).await)
    }

    /// Consume the next schedule boundary, if one is queued.
    pub async fn next_rule(self: &Arc<Self>) {
        if let Some(rule) = self.core.pop_rule() {
            self.apply_gated(rule, true).await;
        }
    }

    /// Revert an API override to the scheduled rule.
    pub async fn reset_rule(self: &Arc<Self>) {
        if let Some(rule) = self.core.scheduled_rule() {
            self.apply_gated(rule, true).await;
        }
    }

    /// Install a freshly built schedule (see [`InstanceCore::load_schedule`])
    /// and carry out the resulting transition.
    pub async fn load_schedule(
        self: &Arc<Self>,
        built: homenode_domain::schedule::BuiltSchedule,
        apply_current: bool,
    ) {
        if let Some(applied) = self.core.load_schedule(built, apply_current) {
            self.follow_up(applied, self.current_level()).await;
        }
    }

    async fn apply_gated(self: &Arc<Self>, incoming: Rule, from_schedule: bool) -> Rule {
        match fade::gate(self.fade_state(), &incoming) {
            // The fade keeps running toward its original target; the
            // caller still sees success.
            Gate::Continue => return self.core.current_rule(),
            Gate::Abort { level } => {
                self.abort_fade();
                let _ = self.core.apply_rule(Rule::Numeric(level));
            }
            Gate::Idle => {}
        }
        let from_level = self.current_level();
        let applied = if from_schedule {
            self.core.apply_schedule_rule(incoming)
        } else {
            self.core.apply_rule(incoming)
        };
        let rule = applied.rule.clone();
        self.follow_up(applied, from_level).await;
        rule
    }

    async fn follow_up(self: &Arc<Self>, applied: RuleApplied, from_level: f64) {
        if applied.should_disable {
            self.disable().await;
            return;
        }
        if applied.should_enable {
            self.enable().await;
        }
        match applied.rule {
            Rule::Fade { target, period_s } => {
                fade::start(self, &self.timer, target, period_s, from_level);
                // Degenerate fades settle immediately; push the level out.
                if self.fade_state().is_none() {
                    self.apply_new_rule().await;
                }
            }
            _ => self.apply_new_rule().await,
        }
    }

    // -- fade bookkeeping, used by the executor --------------------------

    #[must_use]
    pub(crate) fn fade_state(&self) -> Option<FadeState> {
        *lock(&self.fade)
    }

    pub(crate) fn begin_fade(&self, fade: FadeState) {
        *lock(&self.fade) = Some(fade);
    }

    /// Clear the fade rule down to its target once the ramp completes.
    pub(crate) fn settle_fade(&self, target: f64) {
        *lock(&self.fade) = None;
        let _ = self.core.apply_rule(Rule::Numeric(target));
    }

    /// Stop an active fade, returning the in-flight level.
    pub(crate) fn abort_fade(&self) -> Option<f64> {
        let fade = lock(&self.fade).take()?;
        self.timer.cancel(&fade::owner(self));
        Some(fade.current)
    }

    /// Advance the active fade by one brightness unit. Returns `None`
    /// when no fade is running (aborted between firing and execution),
    /// otherwise whether the target has been reached.
    pub(crate) fn advance_fade(&self) -> Option<bool> {
        let mut guard = lock(&self.fade);
        let fade = guard.as_mut()?;
        let direction = if fade.target >= fade.current { 1.0 } else { -1.0 };
        fade.current += direction;
        if (fade.target - fade.current) * direction <= 0.0 {
            let target = fade.target;
            *guard = None;
            drop(guard);
            let _ = self.core.apply_rule(Rule::Numeric(target));
            Some(true)
        } else {
            Some(false)
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("core", &self.core)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use homenode_domain::kind::InstanceKind;
    use homenode_domain::validate::{RuleLimits, RuleValidator};

    struct SpyDriver {
        accept: AtomicBool,
        sent: Mutex<Vec<DeviceCommand>>,
    }

    impl SpyDriver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                accept: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<DeviceCommand> {
            self.sent.lock().unwrap().clone()
        }
    }

    struct SpyHandle(Arc<SpyDriver>);

    #[async_trait]
    impl DeviceDriver for SpyHandle {
        async fn send(&self, command: DeviceCommand) -> bool {
            self.0.sent.lock().unwrap().push(command);
            self.0.accept.load(Ordering::SeqCst)
        }
    }

    fn dimmer(spy: &Arc<SpyDriver>, timer: &Arc<SoftwareTimer>) -> Arc<Device> {
        let core = InstanceCore::new(
            "device1".parse().unwrap(),
            "Overhead".to_string(),
            RuleValidator::new(InstanceKind::LedStrip)
                .with_limits(RuleLimits { min: 0.0, max: 1023.0 }),
            Rule::Numeric(512.0),
            BTreeMap::new(),
        );
        Arc::new(Device::new(core, Box::new(SpyHandle(Arc::clone(spy))), Arc::clone(timer)))
    }

    fn relay(spy: &Arc<SpyDriver>, timer: &Arc<SoftwareTimer>) -> Arc<Device> {
        let core = InstanceCore::new(
            "device2".parse().unwrap(),
            "Heater".to_string(),
            RuleValidator::new(InstanceKind::Relay),
            Rule::Enabled,
            BTreeMap::new(),
        );
        Arc::new(Device::new(core, Box::new(SpyHandle(Arc::clone(spy))), Arc::clone(timer)))
    }

    #[tokio::test]
    async fn should_send_brightness_level_for_dimmable_kinds() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let device = dimmer(&spy, &timer);

        assert!(device.send(true).await);
        assert_eq!(spy.sent(), vec![DeviceCommand::On { level: Some(512.0) }]);
        assert_eq!(device.state(), Some(true));
    }

    #[tokio::test]
    async fn should_send_plain_on_for_binary_kinds() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let device = relay(&spy, &timer);

        device.send(true).await;
        assert_eq!(spy.sent(), vec![DeviceCommand::On { level: None }]);
    }

    #[tokio::test]
    async fn should_keep_stale_state_when_driver_rejects() {
        let spy = SpyDriver::new();
        spy.accept.store(false, Ordering::SeqCst);
        let timer = Arc::new(SoftwareTimer::new());
        let device = dimmer(&spy, &timer);

        assert!(!device.send(true).await);
        assert_eq!(device.state(), None);
    }

    #[tokio::test]
    async fn should_turn_off_before_disabling() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let device = dimmer(&spy, &timer);

        device.send(true).await;
        device.disable().await;
        assert!(!device.core().is_enabled());
        assert_eq!(device.state(), Some(false));
        assert_eq!(spy.sent().last(), Some(&DeviceCommand::Off));
    }

    #[tokio::test]
    async fn should_disable_when_rule_disabled_arrives() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let device = dimmer(&spy, &timer);

        device.set_rule(&serde_json::json!("disabled")).await.unwrap();
        assert!(!device.core().is_enabled());
    }

    #[tokio::test]
    async fn should_reissue_send_when_rule_changes_while_on() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let device = dimmer(&spy, &timer);

        device.send(true).await;
        device.set_rule(&serde_json::json!(100)).await.unwrap();
        assert_eq!(
            spy.sent(),
            vec![
                DeviceCommand::On { level: Some(512.0) },
                DeviceCommand::On { level: Some(100.0) },
            ]
        );
    }

    #[tokio::test]
    async fn should_not_resend_while_off() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let device = dimmer(&spy, &timer);

        device.set_rule(&serde_json::json!(100)).await.unwrap();
        assert!(spy.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn should_step_a_fade_toward_its_target() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let loop_timer = Arc::clone(&timer);
        tokio::spawn(async move { loop_timer.run().await });

        let device = dimmer(&spy, &timer);
        device.send(true).await;
        // 512 -> 500 over 12 s: one unit per second.
        device.set_rule(&serde_json::json!("fade/500/12")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(device.current_level(), 509.0);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(device.core().current_rule(), Rule::Numeric(500.0));
        assert!(device.fade_state().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn should_continue_fade_on_same_direction_rule() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let loop_timer = Arc::clone(&timer);
        tokio::spawn(async move { loop_timer.run().await });

        let device = dimmer(&spy, &timer);
        device.set_rule(&serde_json::json!("fade/500/12")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // Still downward: accepted, but the fade is not retargeted.
        let rule = device.set_rule(&serde_json::json!(505)).await.unwrap();
        assert_eq!(rule, Rule::Fade { target: 500.0, period_s: 12 });
        assert!(device.fade_state().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn should_abort_fade_on_opposing_rule() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let loop_timer = Arc::clone(&timer);
        tokio::spawn(async move { loop_timer.run().await });

        let device = dimmer(&spy, &timer);
        device.set_rule(&serde_json::json!("fade/500/12")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let rule = device.set_rule(&serde_json::json!(600)).await.unwrap();
        assert_eq!(rule, Rule::Numeric(600.0));
        assert!(device.fade_state().is_none());

        // No further steps run once aborted.
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(device.core().current_rule(), Rule::Numeric(600.0));
    }

    #[tokio::test(start_paused = true)]
    async fn should_abort_fade_on_disable() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let loop_timer = Arc::clone(&timer);
        tokio::spawn(async move { loop_timer.run().await });

        let device = dimmer(&spy, &timer);
        device.set_rule(&serde_json::json!("fade/500/12")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        device.disable().await;
        assert!(device.fade_state().is_none());
        assert_eq!(device.core().current_rule(), Rule::Numeric(509.0));
    }

    #[tokio::test]
    async fn should_settle_degenerate_fade_immediately() {
        let spy = SpyDriver::new();
        let timer = Arc::new(SoftwareTimer::new());
        let device = dimmer(&spy, &timer);

        device.set_rule(&serde_json::json!("fade/512/60")).await.unwrap();
        assert_eq!(device.core().current_rule(), Rule::Numeric(512.0));
        assert!(device.fade_state().is_none());
    }
}
