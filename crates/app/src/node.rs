//! Node assembly and the command surface.
//!
//! `Node::build` turns a validated [`NodeConfig`] into live instances:
//! drivers come from the [`DriverFactory`] (api-target devices are wired
//! to the remote envelope instead), sensors and their target devices are
//! clustered into connected-component groups, and every schedule map is
//! materialized into boundary timers. `dispatch` is the transport-neutral
//! command surface the API adapter routes requests through.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info, warn};

use homenode_domain::config::NodeConfig;
use homenode_domain::error::{ConfigError, ValidationError};
use homenode_domain::kind::InstanceKind;
use homenode_domain::name::InstanceName;
use homenode_domain::rule::Rule;
use homenode_domain::schedule::{self, ScheduleKeywords};
use homenode_domain::time::{self, TimeOfDay, Timestamp};

use crate::device::Device;
use crate::group::Group;
use crate::instance::InstanceCore;
use crate::ports::{ApiClient, DeviceCommand, DeviceDriver, DriverFactory};
use crate::sensor::Sensor;
use crate::timer::{OWNER_API, OWNER_SCHEDULER, SoftwareTimer};

/// Hour of the nightly queue rebuild (UTC).
const REBUILD_HOUR: u8 = 3;

/// The shared collaborators every instance sees: one timer scheduler and
/// one remote-envelope client per node.
#[derive(Clone)]
pub struct NodeContext {
    pub timer: Arc<SoftwareTimer>,
    pub api: Arc<dyn ApiClient>,
}

/// A configured device or sensor, unified for the command surface.
#[derive(Clone)]
pub enum Member {
    Device(Arc<Device>),
    Sensor(Arc<Sensor>),
}

impl Member {
    #[must_use]
    pub fn core(&self) -> &InstanceCore {
        match self {
            Self::Device(d) => d.core(),
            Self::Sensor(s) => s.core(),
        }
    }

    pub async fn enable(&self) {
        match self {
            Self::Device(d) => d.enable().await,
            Self::Sensor(s) => s.enable().await,
        }
    }

    pub async fn disable(&self) {
        match self {
            Self::Device(d) => d.disable().await,
            Self::Sensor(s) => s.disable().await,
        }
    }

    /// # Errors
    ///
    /// Propagates the validator's error verbatim.
    pub async fn set_rule(&self, raw: &Value) -> Result<Rule, ValidationError> {
        match self {
            Self::Device(d) => d.set_rule(raw).await,
            Self::Sensor(s) => s.set_rule(raw).await,
        }
    }

    pub async fn reset_rule(&self) {
        match self {
            Self::Device(d) => d.reset_rule().await,
            Self::Sensor(s) => s.reset_rule().await,
        }
    }

    pub async fn next_rule(&self) {
        match self {
            Self::Device(d) => d.next_rule().await,
            Self::Sensor(s) => s.next_rule().await,
        }
    }

    async fn load_schedule(&self, built: schedule::BuiltSchedule, apply_current: bool) {
        match self {
            Self::Device(d) => d.load_schedule(built, apply_current).await,
            Self::Sensor(s) => s.load_schedule(built, apply_current).await,
        }
    }

    fn status(&self) -> Value {
        match self {
            Self::Device(d) => {
                let mut status = d.core().status();
                status["turned_on"] = serde_json::json!(d.state());
                status
            }
            Self::Sensor(s) => {
                let mut status = s.core().status();
                status["condition_met"] = serde_json::json!(s.condition_met());
                status["targets"] = serde_json::json!(
                    s.targets().iter().map(ToString::to_string).collect::<Vec<_>>()
                );
                status
            }
        }
    }
}

pub struct Node {
    id: String,
    keywords: ScheduleKeywords,
    context: NodeContext,
    devices: Vec<Arc<Device>>,
    sensors: Vec<Arc<Sensor>>,
    groups: Vec<Arc<Group>>,
    log_path: Option<PathBuf>,
}

impl Node {
    /// Assemble a node from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the factory cannot realize a
    /// configured driver.
    pub fn build(
        config: NodeConfig,
        factory: &dyn DriverFactory,
        context: NodeContext,
        log_path: Option<PathBuf>,
    ) -> Result<Arc<Self>, ConfigError> {
        let mut devices = Vec::with_capacity(config.devices.len());
        for entry in &config.devices {
            let core = InstanceCore::new(
                entry.name,
                entry.nickname.clone(),
                entry.validator(),
                entry.default_rule.clone(),
                entry.schedule.clone(),
            );
            let driver: Box<dyn DeviceDriver> = if entry.kind == InstanceKind::ApiTarget {
                // Presence of `ip` is enforced at config validation.
                let target = entry.ip.clone().unwrap_or_default();
                Box::new(ApiTargetDriver {
                    api: Arc::clone(&context.api),
                    target,
                })
            } else {
                factory.device_driver(entry)?
            };
            devices.push(Arc::new(Device::new(
                core,
                driver,
                Arc::clone(&context.timer),
            )));
        }

        let mut sensors = Vec::with_capacity(config.sensors.len());
        for entry in &config.sensors {
            let core = InstanceCore::new(
                entry.name,
                entry.nickname.clone(),
                entry.validator(),
                entry.default_rule.clone(),
                entry.schedule.clone(),
            );
            let driver = if entry.kind.has_monitor() {
                Some(factory.sensor_driver(entry)?)
            } else {
                None
            };
            sensors.push(Arc::new(Sensor::new(
                core,
                driver,
                entry.thermostat,
                entry.targets.clone(),
                Arc::clone(&context.timer),
            )));
        }

        let groups = form_groups(&devices, &sensors);
        info!(
            id = %config.id,
            devices = devices.len(),
            sensors = sensors.len(),
            groups = groups.len(),
            "node assembled"
        );

        Ok(Arc::new(Self {
            id: config.id,
            keywords: config.keywords,
            context,
            devices,
            sensors,
            groups,
            log_path,
        }))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    #[must_use]
    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    #[must_use]
    pub fn find(&self, name: InstanceName) -> Option<Member> {
        if name.is_device() {
            self.devices
                .iter()
                .find(|d| d.core().name() == name)
                .map(|d| Member::Device(Arc::clone(d)))
        } else {
            self.sensors
                .iter()
                .find(|s| s.core().name() == name)
                .map(|s| Member::Sensor(Arc::clone(s)))
        }
    }

    fn members(&self) -> Vec<Member> {
        self.devices
            .iter()
            .map(|d| Member::Device(Arc::clone(d)))
            .chain(self.sensors.iter().map(|s| Member::Sensor(Arc::clone(s))))
            .collect()
    }

    /// Bring the node to life: start monitors, materialize schedules and
    /// arm the boundary timers plus the nightly rebuild. The caller is
    /// responsible for spawning `context.timer.run()`.
    pub async fn start(self: &Arc<Self>) {
        for sensor in &self.sensors {
            sensor.enable().await;
        }
        self.rebuild_schedules(true).await;
    }

    /// Rebuild every instance's rule queue from its schedule map.
    ///
    /// `apply_current` forces `current_rule` to the scheduled rule
    /// (boot); the nightly rebuild passes `false` so API overrides
    /// survive until the next boundary or an explicit reset.
    pub async fn rebuild_schedules(self: &Arc<Self>, apply_current: bool) {
        self.rebuild_schedules_at(time::now(), apply_current).await;
    }

    async fn rebuild_schedules_at(self: &Arc<Self>, now: Timestamp, apply_current: bool) {
        self.context.timer.cancel(OWNER_SCHEDULER);
        for member in self.members() {
            let core = member.core();
            let built = match schedule::build(core.schedule(), &self.keywords, core.validator(), now)
            {
                Ok(built) => built,
                Err(err) => {
                    // Configs are validated up front; this means a bad
                    // keyword file edit. Keep the old queue.
                    error!(name = %core.name(), %err, "schedule rebuild failed");
                    continue;
                }
            };
            member.load_schedule(built, apply_current).await;
            for boundary in member.core().boundaries() {
                let target = member.clone();
                self.context.timer.schedule_at(
                    epoch_ms(boundary),
                    OWNER_SCHEDULER,
                    move || {
                        let target = target.clone();
                        async move {
                            target.next_rule().await;
                        }
                    },
                );
            }
        }
        self.arm_nightly_rebuild(now);
    }

    fn arm_nightly_rebuild(self: &Arc<Self>, now: Timestamp) {
        // 03:00 is always a valid time of day.
        let Ok(rebuild_at) = TimeOfDay::new(REBUILD_HOUR, 0) else {
            return;
        };
        let node = Arc::downgrade(self);
        self.context.timer.schedule_at(
            epoch_ms(rebuild_at.next_occurrence(now)),
            OWNER_SCHEDULER,
            move || {
                let node = Weak::clone(&node);
                async move {
                    if let Some(node) = node.upgrade() {
                        info!("nightly schedule rebuild");
                        node.rebuild_schedules(false).await;
                    }
                }
            },
        );
    }

    /// Full node status, the `status` endpoint payload.
    #[must_use]
    pub fn status(&self) -> Value {
        let devices: serde_json::Map<String, Value> = self
            .devices
            .iter()
            .map(|d| (d.core().name().to_string(), Member::Device(Arc::clone(d)).status()))
            .collect();
        let sensors: serde_json::Map<String, Value> = self
            .sensors
            .iter()
            .map(|s| (s.core().name().to_string(), Member::Sensor(Arc::clone(s)).status()))
            .collect();
        serde_json::json!({
            "metadata": { "id": self.id },
            "devices": devices,
            "sensors": sensors,
        })
    }

    /// Route one decoded request envelope (`[endpoint, arg1, ...]`).
    ///
    /// # Errors
    ///
    /// Returns the message the transport wraps as `{"ERROR": ...}`;
    /// validation messages pass through verbatim.
    pub async fn dispatch(self: &Arc<Self>, request: &[Value]) -> Result<Value, String> {
        let endpoint = request
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| "Empty request".to_string())?;
        let args = &request[1..];

        match endpoint {
            "status" => Ok(self.status()),
            "ignore" => Ok(Value::Null),
            "reboot" => {
                warn!("reboot requested via API");
                Ok(Value::String("Rebooting".to_string()))
            }
            "clear_log" => {
                if let Some(path) = &self.log_path {
                    std::fs::write(path, b"").map_err(|err| format!("clear_log failed: {err}"))?;
                }
                Ok(Value::String("clear_log".to_string()))
            }
            "enable" => {
                self.member_arg(args, 0)?.enable().await;
                Ok(Value::String("Enabled".to_string()))
            }
            "disable" => {
                self.member_arg(args, 0)?.disable().await;
                Ok(Value::String("Disabled".to_string()))
            }
            "enable_in" => self.delayed(args, true).await,
            "disable_in" => self.delayed(args, false).await,
            "set_rule" => {
                let member = self.member_arg(args, 0)?;
                let raw = args.get(1).ok_or_else(|| "Missing rule".to_string())?;
                let rule = member.set_rule(raw).await.map_err(|err| err.to_string())?;
                Ok(rule.to_value())
            }
            "reset_rule" => {
                self.member_arg(args, 0)?.reset_rule().await;
                Ok(Value::String("Reverted to scheduled rule".to_string()))
            }
            "get_schedule_rule" => self.schedule_rule(args),
            "condition_met" => match self.member_arg(args, 0)? {
                Member::Sensor(sensor) => {
                    Ok(serde_json::json!({ "condition_met": sensor.condition_met() }))
                }
                Member::Device(_) => Err("Must specify sensor".to_string()),
            },
            "trigger_sensor" => match self.member_arg(args, 0)? {
                Member::Sensor(sensor) => {
                    if sensor.trigger().await {
                        Ok(Value::String("Triggered".to_string()))
                    } else {
                        Err(format!("Cannot trigger {} sensor type", sensor.core().kind()))
                    }
                }
                Member::Device(_) => Err("Must specify sensor".to_string()),
            },
            "turn_on" => self.turn(args, true).await,
            "turn_off" => self.turn(args, false).await,
            _ => Err("Invalid command".to_string()),
        }
    }

    async fn turn(&self, args: &[Value], desired: bool) -> Result<Value, String> {
        let verb = if desired { "turn on" } else { "turn off" };
        let Member::Device(device) = self.member_arg(args, 0)? else {
            return Err("Can only turn devices on and off".to_string());
        };
        if !device.core().is_enabled() {
            return Err(format!(
                "Unable to {verb}, {} is disabled",
                device.core().name()
            ));
        }
        if device.send(desired).await {
            Ok(Value::String(format!("{}: {verb}", device.core().name())))
        } else {
            Err(format!("Unable to {verb} {}", device.core().name()))
        }
    }

    async fn delayed(self: &Arc<Self>, args: &[Value], enable: bool) -> Result<Value, String> {
        let member = self.member_arg(args, 0)?;
        let minutes = args
            .get(1)
            .and_then(delay_minutes)
            .ok_or_else(|| "Delay must be a positive number of minutes".to_string())?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_ms = (minutes * 60_000.0) as u64;
        let name = member.core().name();
        self.context.timer.schedule(delay_ms, OWNER_API, move || {
            let member = member.clone();
            async move {
                if enable {
                    member.enable().await;
                } else {
                    member.disable().await;
                }
            }
        });
        let verb = if enable { "Enabling" } else { "Disabling" };
        Ok(Value::String(format!("{verb} {name} in {minutes} minutes")))
    }

    fn schedule_rule(&self, args: &[Value]) -> Result<Value, String> {
        let member = self.member_arg(args, 0)?;
        let spec = args
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| "Missing timestamp".to_string())?;
        // The schedule map is keyed by the raw spec (keyword or literal);
        // fall back to the resolved literal form.
        let schedule = member.core().schedule();
        if let Some(rule) = schedule.get(spec) {
            return Ok(rule.clone());
        }
        let resolved = schedule::resolve(spec, &self.keywords).map_err(|err| err.to_string())?;
        schedule
            .get(&resolved.to_string())
            .cloned()
            .ok_or_else(|| format!("No rule at {spec}"))
    }

    fn member_arg(&self, args: &[Value], index: usize) -> Result<Member, String> {
        let raw = args
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| "Missing instance name".to_string())?;
        let name: InstanceName = raw
            .parse()
            .map_err(|_| format!("Invalid instance name {raw}"))?;
        self.find(name)
            .ok_or_else(|| format!("Instance not found: {name}"))
    }
}

fn delay_minutes(value: &Value) -> Option<f64> {
    let minutes = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (minutes.is_finite() && minutes >= 0.0).then_some(minutes)
}

fn epoch_ms(at: Timestamp) -> u64 {
    u64::try_from(at.timestamp_millis()).unwrap_or(0)
}

/// Cluster devices and sensors into connected components: sensors
/// sharing any target device land in the same group, so one refresh
/// sees every vote that matters for a device.
fn form_groups(devices: &[Arc<Device>], sensors: &[Arc<Sensor>]) -> Vec<Arc<Group>> {
    let mut components: Vec<HashSet<InstanceName>> = Vec::new();
    for sensor in sensors {
        if sensor.targets().is_empty() {
            continue;
        }
        let targets: HashSet<InstanceName> = sensor.targets().iter().copied().collect();
        let (mut merged, rest): (Vec<_>, Vec<_>) = components
            .drain(..)
            .partition(|component| !component.is_disjoint(&targets));
        let mut component = targets;
        for hit in &mut merged {
            component.extend(hit.drain());
        }
        components = rest;
        components.push(component);
    }

    components
        .iter()
        .enumerate()
        .map(|(index, component)| {
            let group_devices: Vec<Arc<Device>> = devices
                .iter()
                .filter(|d| component.contains(&d.core().name()))
                .map(Arc::clone)
                .collect();
            let group_sensors: Vec<Arc<Sensor>> = sensors
                .iter()
                .filter(|s| s.targets().iter().any(|t| component.contains(t)))
                .map(Arc::clone)
                .collect();
            Group::new(format!("group{}", index + 1), group_sensors, group_devices)
        })
        .collect()
}

/// Device driver for `api-target` kinds: forwards the rule's chained
/// command through the remote envelope.
struct ApiTargetDriver {
    api: Arc<dyn ApiClient>,
    target: String,
}

#[async_trait]
impl DeviceDriver for ApiTargetDriver {
    async fn send(&self, command: DeviceCommand) -> bool {
        let spec = match command {
            DeviceCommand::Action(spec) => spec,
            // No action configured for this transition.
            DeviceCommand::On { .. } | DeviceCommand::Off => return true,
        };
        if spec.is_ignore() {
            return true;
        }
        match self.api.call(&self.target, spec.to_request()).await {
            Ok(_) => true,
            Err(err) if err.is_transient() => {
                warn!(target = %self.target, %err, "remote command failed, will retry");
                false
            }
            Err(err) => {
                // The peer answered; retrying the same command will not
                // help, so the transition is considered delivered.
                error!(target = %self.target, %err, "remote command rejected");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use homenode_domain::config::{DeviceConfig, SensorConfig};
    use homenode_domain::error::ApiError;

    use crate::ports::{SensorDriver, SensorReading};

    struct FakeApi {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
        fail_transient: std::sync::atomic::AtomicBool,
    }

    impl FakeApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail_transient: std::sync::atomic::AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ApiClient for FakeApi {
        async fn call(&self, target: &str, request: Vec<Value>) -> Result<Value, ApiError> {
            if self.fail_transient.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ApiError::Timeout);
            }
            self.calls
                .lock()
                .unwrap()
                .push((target.to_string(), request));
            Ok(Value::String("OK".to_string()))
        }
    }

    struct FakeFactory;

    struct AlwaysOk;

    #[async_trait]
    impl DeviceDriver for AlwaysOk {
        async fn send(&self, _command: DeviceCommand) -> bool {
            true
        }
    }

    struct NoReading;

    #[async_trait]
    impl SensorDriver for NoReading {
        async fn read(&self) -> Result<SensorReading, crate::ports::DriverError> {
            Err(crate::ports::DriverError::Transient("virtual".to_string()))
        }
    }

    impl DriverFactory for FakeFactory {
        fn device_driver(
            &self,
            _config: &DeviceConfig,
        ) -> Result<Box<dyn DeviceDriver>, ConfigError> {
            Ok(Box::new(AlwaysOk))
        }

        fn sensor_driver(
            &self,
            _config: &SensorConfig,
        ) -> Result<Box<dyn SensorDriver>, ConfigError> {
            Ok(Box::new(NoReading))
        }
    }

    fn config() -> NodeConfig {
        NodeConfig::parse(&serde_json::json!({
            "metadata": { "id": "test-node", "schedule_keywords": {} },
            "device1": {
                "_type": "relay",
                "nickname": "Heater",
                "default_rule": "enabled",
                "schedule": {},
            },
            "device2": {
                "_type": "led-strip",
                "nickname": "Overhead",
                "default_rule": 512,
                "min_rule": 0,
                "max_rule": 1023,
                "schedule": { "08:00": 1023, "22:00": 64 },
            },
            "sensor1": {
                "_type": "pir",
                "nickname": "Hall motion",
                "default_rule": 5,
                "schedule": {},
                "targets": ["device1", "device2"],
            },
            "sensor2": {
                "_type": "dummy",
                "nickname": "Override",
                "default_rule": "off",
                "schedule": {},
                "targets": ["device2"],
            },
        }))
        .unwrap()
    }

    fn node() -> (Arc<Node>, Arc<FakeApi>) {
        let api = FakeApi::new();
        let context = NodeContext {
            timer: Arc::new(SoftwareTimer::new()),
            api: api.clone(),
        };
        let node = Node::build(config(), &FakeFactory, context, None).unwrap();
        (node, api)
    }

    #[tokio::test]
    async fn should_cluster_sensors_sharing_targets_into_one_group() {
        let (node, _) = node();
        assert_eq!(node.groups().len(), 1);
        let group = &node.groups()[0];
        assert_eq!(group.devices().len(), 2);
        assert_eq!(group.sensors().len(), 2);
    }

    #[tokio::test]
    async fn should_split_disjoint_target_sets_into_separate_groups() {
        let api = FakeApi::new();
        let context = NodeContext {
            timer: Arc::new(SoftwareTimer::new()),
            api,
        };
        let config = NodeConfig::parse(&serde_json::json!({
            "metadata": { "id": "t", "schedule_keywords": {} },
            "device1": { "_type": "relay", "nickname": "A", "default_rule": "enabled", "schedule": {} },
            "device2": { "_type": "relay", "nickname": "B", "default_rule": "enabled", "schedule": {} },
            "sensor1": { "_type": "dummy", "nickname": "SA", "default_rule": "off", "schedule": {}, "targets": ["device1"] },
            "sensor2": { "_type": "dummy", "nickname": "SB", "default_rule": "off", "schedule": {}, "targets": ["device2"] },
        }))
        .unwrap();
        let node = Node::build(config, &FakeFactory, context, None).unwrap();
        assert_eq!(node.groups().len(), 2);
    }

    #[tokio::test]
    async fn should_report_status_for_every_instance() {
        let (node, _) = node();
        let status = node.status();
        assert_eq!(status["metadata"]["id"], "test-node");
        assert_eq!(status["devices"]["device2"]["type"], "led-strip");
        assert_eq!(status["sensors"]["sensor1"]["nickname"], "Hall motion");
    }

    #[tokio::test]
    async fn should_dispatch_enable_and_disable() {
        let (node, _) = node();
        node.dispatch(&[
            serde_json::json!("disable"),
            serde_json::json!("device1"),
        ])
        .await
        .unwrap();
        assert!(!node.find("device1".parse().unwrap()).unwrap().core().is_enabled());

        node.dispatch(&[serde_json::json!("enable"), serde_json::json!("device1")])
            .await
            .unwrap();
        assert!(node.find("device1".parse().unwrap()).unwrap().core().is_enabled());
    }

    #[tokio::test]
    async fn should_reject_unknown_instances_and_commands() {
        let (node, _) = node();
        assert!(
            node.dispatch(&[serde_json::json!("enable"), serde_json::json!("device9")])
                .await
                .is_err()
        );
        assert!(node.dispatch(&[serde_json::json!("explode")]).await.is_err());
    }

    #[tokio::test]
    async fn should_surface_validation_messages_verbatim() {
        let (node, _) = node();
        let err = node
            .dispatch(&[
                serde_json::json!("set_rule"),
                serde_json::json!("device2"),
                serde_json::json!(4096),
            ])
            .await
            .unwrap_err();
        assert!(err.contains("outside limits"));
    }

    #[tokio::test]
    async fn should_queue_delayed_commands_under_the_api_owner() {
        let (node, _) = node();
        node.dispatch(&[
            serde_json::json!("disable_in"),
            serde_json::json!("device1"),
            serde_json::json!(5),
        ])
        .await
        .unwrap();
        node.dispatch(&[
            serde_json::json!("enable_in"),
            serde_json::json!("device1"),
            serde_json::json!(10),
        ])
        .await
        .unwrap();
        assert_eq!(node.context().timer.pending(OWNER_API), 2);
    }

    #[tokio::test]
    async fn should_reject_non_numeric_delay() {
        let (node, _) = node();
        let err = node
            .dispatch(&[
                serde_json::json!("enable_in"),
                serde_json::json!("device1"),
                serde_json::json!("five"),
            ])
            .await
            .unwrap_err();
        assert!(err.contains("minutes"));
    }

    #[tokio::test]
    async fn should_answer_condition_met_for_sensors_only() {
        let (node, _) = node();
        let value = node
            .dispatch(&[
                serde_json::json!("condition_met"),
                serde_json::json!("sensor2"),
            ])
            .await
            .unwrap();
        assert_eq!(value["condition_met"], false);

        assert!(
            node.dispatch(&[
                serde_json::json!("condition_met"),
                serde_json::json!("device1"),
            ])
            .await
            .is_err()
        );
    }

    #[tokio::test]
    async fn should_trigger_sensors_via_api() {
        let (node, _) = node();
        node.dispatch(&[
            serde_json::json!("trigger_sensor"),
            serde_json::json!("sensor2"),
        ])
        .await
        .unwrap();
        let value = node
            .dispatch(&[
                serde_json::json!("condition_met"),
                serde_json::json!("sensor2"),
            ])
            .await
            .unwrap();
        assert_eq!(value["condition_met"], true);
    }

    #[tokio::test]
    async fn should_turn_devices_on_and_off() {
        let (node, _) = node();
        node.dispatch(&[serde_json::json!("turn_on"), serde_json::json!("device1")])
            .await
            .unwrap();
        let Member::Device(device) = node.find("device1".parse().unwrap()).unwrap() else {
            unreachable!()
        };
        assert_eq!(device.state(), Some(true));

        node.dispatch(&[serde_json::json!("turn_off"), serde_json::json!("device1")])
            .await
            .unwrap();
        assert_eq!(device.state(), Some(false));
    }

    #[tokio::test]
    async fn should_refuse_turning_on_disabled_devices() {
        let (node, _) = node();
        node.dispatch(&[serde_json::json!("disable"), serde_json::json!("device1")])
            .await
            .unwrap();
        let err = node
            .dispatch(&[serde_json::json!("turn_on"), serde_json::json!("device1")])
            .await
            .unwrap_err();
        assert!(err.contains("disabled"));
    }

    #[tokio::test]
    async fn should_look_up_schedule_rules() {
        let (node, _) = node();
        let value = node
            .dispatch(&[
                serde_json::json!("get_schedule_rule"),
                serde_json::json!("device2"),
                serde_json::json!("08:00"),
            ])
            .await
            .unwrap();
        assert_eq!(value, 1023);

        assert!(
            node.dispatch(&[
                serde_json::json!("get_schedule_rule"),
                serde_json::json!("device2"),
                serde_json::json!("09:00"),
            ])
            .await
            .is_err()
        );
    }

    #[tokio::test]
    async fn should_arm_boundary_timers_on_start() {
        let (node, _) = node();
        node.start().await;
        // Two boundaries for device2 plus the nightly rebuild.
        assert_eq!(node.context().timer.pending(OWNER_SCHEDULER), 3);
    }

    #[tokio::test]
    async fn should_send_api_target_actions_through_the_envelope() {
        let api = FakeApi::new();
        let context = NodeContext {
            timer: Arc::new(SoftwareTimer::new()),
            api: api.clone(),
        };
        let config = NodeConfig::parse(&serde_json::json!({
            "metadata": { "id": "t", "schedule_keywords": {} },
            "device1": {
                "_type": "api-target",
                "nickname": "Remote lamp",
                "ip": "192.168.1.20",
                "default_rule": {
                    "on": ["turn_on", "device3"],
                    "off": ["turn_off", "device3"],
                },
                "schedule": {},
            },
            "sensor1": {
                "_type": "dummy",
                "nickname": "Switch",
                "default_rule": "off",
                "schedule": {},
                "targets": ["device1"],
            },
        }))
        .unwrap();
        let node = Node::build(config, &FakeFactory, context, None).unwrap();

        let group = &node.groups()[0];
        let Member::Sensor(sensor) = node.find("sensor1".parse().unwrap()).unwrap() else {
            unreachable!()
        };
        sensor.set_rule(&serde_json::json!("on")).await.unwrap();
        group.refresh().await;

        let calls = api.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "192.168.1.20");
        assert_eq!(
            calls[0].1,
            vec![serde_json::json!("turn_on"), serde_json::json!("device3")]
        );
    }

    #[tokio::test]
    async fn should_retry_transient_api_target_failures() {
        let api = FakeApi::new();
        let driver = ApiTargetDriver {
            api: api.clone(),
            target: "192.168.1.20".to_string(),
        };
        api.fail_transient
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let spec = homenode_domain::action::ActionSpec::from_value(&serde_json::json!([
            "turn_on", "device1"
        ]))
        .unwrap();
        assert!(!driver.send(DeviceCommand::Action(spec.clone())).await);

        api.fail_transient
            .store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(driver.send(DeviceCommand::Action(spec)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn should_execute_delayed_disable() {
        let (node, _) = node();
        let timer = Arc::clone(&node.context().timer);
        tokio::spawn(async move { timer.run().await });

        node.dispatch(&[
            serde_json::json!("disable_in"),
            serde_json::json!("device1"),
            serde_json::json!(1),
        ])
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!node.find("device1".parse().unwrap()).unwrap().core().is_enabled());
    }
}
