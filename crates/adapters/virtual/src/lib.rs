//! # homenode-adapter-virtual
//!
//! Virtual drivers for testing and demonstration: outputs that record
//! the commands they receive (with a reachability toggle to simulate an
//! offline peer) and sensors whose readings are injected through a
//! shared handle.
//!
//! ## Dependency rule
//!
//! Depends on `homenode-app` (port traits) and `homenode-domain` only.

mod outputs;
mod readings;

pub use outputs::OutputHandle;
pub use readings::ReadingHandle;

use std::collections::HashMap;
use std::sync::Mutex;

use homenode_app::ports::{DeviceDriver, DriverFactory, SensorDriver};
use homenode_domain::config::{DeviceConfig, SensorConfig};
use homenode_domain::error::ConfigError;
use homenode_domain::name::InstanceName;

use outputs::VirtualOutput;
use readings::VirtualSensor;

/// Factory handing out virtual drivers and keeping a handle to each, so
/// a test or demo harness can inspect outputs and inject readings.
#[derive(Default)]
pub struct VirtualDriverFactory {
    outputs: Mutex<HashMap<InstanceName, OutputHandle>>,
    readings: Mutex<HashMap<InstanceName, ReadingHandle>>,
}

impl VirtualDriverFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to a device created by this factory.
    #[must_use]
    pub fn output(&self, name: InstanceName) -> Option<OutputHandle> {
        self.lock_outputs().get(&name).cloned()
    }

    /// Handle to a sensor created by this factory.
    #[must_use]
    pub fn reading(&self, name: InstanceName) -> Option<ReadingHandle> {
        self.lock_readings().get(&name).cloned()
    }

    fn lock_outputs(&self) -> std::sync::MutexGuard<'_, HashMap<InstanceName, OutputHandle>> {
        self.outputs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_readings(&self) -> std::sync::MutexGuard<'_, HashMap<InstanceName, ReadingHandle>> {
        self.readings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl DriverFactory for VirtualDriverFactory {
    fn device_driver(&self, config: &DeviceConfig) -> Result<Box<dyn DeviceDriver>, ConfigError> {
        let handle = OutputHandle::default();
        self.lock_outputs().insert(config.name, handle.clone());
        Ok(Box::new(VirtualOutput::new(handle)))
    }

    fn sensor_driver(&self, config: &SensorConfig) -> Result<Box<dyn SensorDriver>, ConfigError> {
        let handle = ReadingHandle::default();
        self.lock_readings().insert(config.name, handle.clone());
        Ok(Box::new(VirtualSensor::new(handle)))
    }
}
