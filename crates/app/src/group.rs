//! Group — aggregates sensor votes into device on/off actions.
//!
//! The aggregate is an OR over the enabled sensors' votes: true as soon
//! as one votes true, false only when at least one votes false and none
//! vote true, and undecided (no action) when nobody votes. The cached
//! group state only advances when every enabled device accepted its
//! command, so a rejected send is retried by the next refresh — there is
//! no dedicated retry timer; triggers recur often enough.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::device::Device;
use crate::sensor::Sensor;

pub struct Group {
    name: String,
    sensors: Vec<Arc<Sensor>>,
    devices: Vec<Arc<Device>>,
    state: Mutex<Option<bool>>,
}

impl Group {
    /// Build a group and wire the member back-references.
    #[must_use]
    pub fn new(name: String, sensors: Vec<Arc<Sensor>>, devices: Vec<Arc<Device>>) -> Arc<Self> {
        let group = Arc::new(Self {
            name,
            sensors,
            devices,
            state: Mutex::new(None),
        });
        for device in &group.devices {
            device.attach_group(&group);
        }
        for sensor in &group.sensors {
            sensor.attach_group(&group);
        }
        group
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn sensors(&self) -> &[Arc<Sensor>] {
        &self.sensors
    }

    #[must_use]
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// The last state successfully pushed to all devices; `None` before
    /// the first decision or after [`Self::reset_state`].
    #[must_use]
    pub fn state(&self) -> Option<bool> {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Forget the cached state so the next refresh re-sends
    /// unconditionally. Used when an external collaborator reports a
    /// state change the group did not cause.
    pub fn reset_state(&self) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// OR-aggregate of the member sensors' votes.
    #[must_use]
    pub fn aggregate(&self) -> Option<bool> {
        let mut any_false = false;
        for sensor in &self.sensors {
            match sensor.condition_met() {
                Some(true) => return Some(true),
                Some(false) => any_false = true,
                None => {}
            }
        }
        any_false.then_some(false)
    }

    /// Recompute the aggregate and drive the member devices to it.
    ///
    /// Devices are only commanded on a state *change*; a device whose
    /// driver rejects the command keeps the group state un-advanced so
    /// the next refresh retries.
    pub async fn refresh(&self) {
        let Some(target) = self.aggregate() else {
            return;
        };
        if self.state() == Some(target) {
            return;
        }
        debug!(group = %self.name, target, "group state changing");

        let mut all_accepted = true;
        for device in &self.devices {
            if !device.core().is_enabled() {
                continue;
            }
            if !device.send(target).await {
                all_accepted = false;
            }
        }
        if all_accepted {
            *self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(target);
        } else {
            warn!(group = %self.name, target, "some devices rejected, keeping state for retry");
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("sensors", &self.sensors.len())
            .field("devices", &self.devices.len())
            .field("state", &self.state())
            .finish()
    }
}
