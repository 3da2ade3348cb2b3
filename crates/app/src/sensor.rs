//! Sensor — an input instance voting into its group.
//!
//! The per-kind `condition_met` translation lives here: motion flags,
//! dummy on/off rules, thermostat deadband votes, load-cell thresholds
//! and desktop screen state all collapse to the tri-state vote the group
//! aggregates. Polled kinds additionally own a monitor task, started by
//! `enable` and stopped by `disable`.

use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use homenode_domain::error::ValidationError;
use homenode_domain::kind::InstanceKind;
use homenode_domain::name::InstanceName;
use homenode_domain::rule::Rule;
use homenode_domain::validate::{ThermostatMode, ThermostatParams};

use crate::group::Group;
use crate::instance::{InstanceCore, RuleApplied};
use crate::monitor;
use crate::ports::{DriverError, SensorDriver, SensorReading};
use crate::timer::SoftwareTimer;

pub struct Sensor {
    core: InstanceCore,
    driver: Option<Box<dyn SensorDriver>>,
    timer: Arc<SoftwareTimer>,
    thermostat: Option<ThermostatParams>,
    targets: Vec<InstanceName>,
    cache: Mutex<Option<SensorReading>>,
    group: Mutex<Weak<Group>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Sensor {
    #[must_use]
    pub fn new(
        core: InstanceCore,
        driver: Option<Box<dyn SensorDriver>>,
        thermostat: Option<ThermostatParams>,
        targets: Vec<InstanceName>,
        timer: Arc<SoftwareTimer>,
    ) -> Self {
        // Motion starts in the "no motion" state rather than unknown, so
        // a freshly booted node can settle its groups to off.
        let cache = match core.kind() {
            InstanceKind::Pir => Some(SensorReading::Boolean(false)),
            _ => None,
        };
        Self {
            core,
            driver,
            timer,
            thermostat,
            targets,
            cache: Mutex::new(cache),
            group: Mutex::new(Weak::new()),
            monitor: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn core(&self) -> &InstanceCore {
        &self.core
    }

    #[must_use]
    pub fn targets(&self) -> &[InstanceName] {
        &self.targets
    }

    pub(crate) fn attach_group(&self, group: &Arc<Group>) {
        *lock(&self.group) = Arc::downgrade(group);
    }

    #[must_use]
    pub fn group(&self) -> Option<Arc<Group>> {
        lock(&self.group).upgrade()
    }

    #[must_use]
    pub fn reading(&self) -> Option<SensorReading> {
        *lock(&self.cache)
    }

    /// The tri-state group vote: `None` means "does not participate"
    /// (disabled, no reading yet, or inside a thermostat deadband).
    #[must_use]
    pub fn condition_met(&self) -> Option<bool> {
        if !self.core.is_enabled() {
            return None;
        }
        match self.core.kind() {
            InstanceKind::Pir => match self.reading() {
                Some(SensorReading::Boolean(motion)) => Some(motion),
                _ => Some(false),
            },
            InstanceKind::Dummy => match self.core.operative_rule() {
                Rule::Custom(s) if s == "on" => Some(true),
                Rule::Custom(s) if s == "off" => Some(false),
                _ => None,
            },
            InstanceKind::DesktopTrigger => match self.reading() {
                Some(SensorReading::Boolean(screen_on)) => Some(screen_on),
                _ => None,
            },
            InstanceKind::LoadCell => match (self.reading(), self.core.operative_rule()) {
                (Some(SensorReading::Numeric(weight)), Rule::Numeric(threshold)) => {
                    Some(weight >= threshold)
                }
                _ => None,
            },
            InstanceKind::Thermostat => self.thermostat_vote(),
            _ => None,
        }
    }

    fn thermostat_vote(&self) -> Option<bool> {
        let params = self.thermostat?;
        let Some(SensorReading::Numeric(temperature)) = self.reading() else {
            return None;
        };
        let setpoint = self.core.operative_rule().as_numeric()?;
        let tolerance = params.tolerance;
        match params.mode {
            ThermostatMode::Heat if temperature < setpoint - tolerance => Some(true),
            ThermostatMode::Heat if temperature > setpoint + tolerance => Some(false),
            ThermostatMode::Cool if temperature > setpoint + tolerance => Some(true),
            ThermostatMode::Cool if temperature < setpoint - tolerance => Some(false),
            // Inside the deadband: no vote, so the group holds its state.
            _ => None,
        }
    }

    /// Report a motion event (hardware interrupt or API trigger).
    ///
    /// Sets the motion flag, refreshes the group, and arms the reset
    /// timer for the configured delay (the numeric rule, in minutes). A
    /// zero or non-numeric delay leaves motion latched until reset
    /// externally.
    pub async fn motion_detected(self: &Arc<Self>) {
        if !self.core.is_enabled() {
            return;
        }
        info!(name = %self.core.name(), "motion detected");
        *lock(&self.cache) = Some(SensorReading::Boolean(true));
        self.refresh_group().await;

        let delay_minutes = self.core.operative_rule().as_numeric().unwrap_or(0.0);
        if delay_minutes > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let delay_ms = (delay_minutes * 60_000.0) as u64;
            let sensor = Arc::clone(self);
            self.timer
                .schedule(delay_ms, &self.core.name().to_string(), move || {
                    let sensor = Arc::clone(&sensor);
                    async move {
                        sensor.reset_motion().await;
                    }
                });
        }
    }

    async fn reset_motion(self: &Arc<Self>) {
        debug!(name = %self.core.name(), "motion reset");
        *lock(&self.cache) = Some(SensorReading::Boolean(false));
        self.refresh_group().await;
    }

    /// Force the sensor's condition on, for kinds that support it.
    /// Returns `false` for kinds whose condition cannot be injected
    /// (thermostat, load-cell).
    pub async fn trigger(self: &Arc<Self>) -> bool {
        match self.core.kind() {
            InstanceKind::Pir => {
                self.motion_detected().await;
                true
            }
            InstanceKind::Dummy => {
                let _ = self.core.apply_rule(Rule::Custom("on".to_string()));
                self.refresh_group().await;
                true
            }
            InstanceKind::DesktopTrigger => {
                *lock(&self.cache) = Some(SensorReading::Boolean(true));
                self.refresh_group().await;
                true
            }
            _ => false,
        }
    }

    pub async fn enable(self: &Arc<Self>) {
        self.core.mark_enabled();
        self.start_monitor();
        self.refresh_group().await;
    }

    pub async fn disable(self: &Arc<Self>) {
        self.stop_monitor();
        self.core.mark_disabled();
        self.refresh_group().await;
    }

    /// Validate and apply an API-supplied rule.
    ///
    /// # Errors
    ///
    /// Propagates the validator's error verbatim.
    pub async fn set_rule(self: &Arc<Self>, raw: &Value) -> Result<Rule, ValidationError> {
        let applied = self.core.set_rule_value(raw)?;
        let rule = applied.rule.clone();
        self.follow_up(applied).await;
        Ok(rule)
    }

    pub async fn next_rule(self: &Arc<Self>) {
        if let Some(applied) = self.core.next_rule() {
            self.follow_up(applied).await;
        }
    }

    pub async fn reset_rule(self: &Arc<Self>) {
        if let Some(applied) = self.core.reset_rule() {
            self.follow_up(applied).await;
        }
    }

    pub async fn load_schedule(
        self: &Arc<Self>,
        built: homenode_domain::schedule::BuiltSchedule,
        apply_current: bool,
    ) {
        if let Some(applied) = self.core.load_schedule(built, apply_current) {
            self.follow_up(applied).await;
        }
    }

    async fn follow_up(self: &Arc<Self>, applied: RuleApplied) {
        if applied.should_disable {
            self.disable().await;
            return;
        }
        if applied.should_enable {
            self.enable().await;
        }
        // The rule feeds directly into the vote for most kinds.
        self.refresh_group().await;
    }

    async fn refresh_group(&self) {
        if let Some(group) = self.group() {
            group.refresh().await;
        }
    }

    fn start_monitor(self: &Arc<Self>) {
        if self.driver.is_none() || !self.core.kind().has_monitor() {
            return;
        }
        let mut guard = lock(&self.monitor);
        if guard.is_some() {
            return;
        }
        *guard = Some(monitor::spawn(Arc::clone(self)));
    }

    fn stop_monitor(&self) {
        if let Some(handle) = lock(&self.monitor).take() {
            handle.abort();
        }
    }

    // -- monitor loop plumbing -------------------------------------------

    pub(crate) async fn poll(&self) -> Option<Result<SensorReading, DriverError>> {
        let driver = self.driver.as_ref()?;
        Some(driver.read().await)
    }

    pub(crate) async fn update_reading(self: &Arc<Self>, reading: SensorReading) {
        let changed = {
            let mut cache = lock(&self.cache);
            if *cache == Some(reading) {
                false
            } else {
                *cache = Some(reading);
                true
            }
        };
        if changed {
            debug!(name = %self.core.name(), ?reading, "reading changed");
            self.refresh_group().await;
        }
    }

    /// Permanent shutdown after a protocol failure; operator must
    /// re-enable via the API.
    pub(crate) fn monitor_failed(&self) {
        lock(&self.monitor).take();
        self.core.mark_disabled();
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("core", &self.core)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
