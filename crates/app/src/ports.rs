//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the runtime core and the outside
//! world: hardware/network drivers, the remote command envelope, and the
//! driver factory used at node assembly. They are `dyn`-compatible
//! (drivers are selected from config at runtime), hence `async_trait`.

use async_trait::async_trait;
use serde_json::Value;

use homenode_domain::action::ActionSpec;
use homenode_domain::config::{DeviceConfig, SensorConfig};
use homenode_domain::error::{ApiError, ConfigError};

/// What a device driver is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Turn on; `level` carries the current numeric rule for dimmable
    /// kinds and is `None` for binary outputs.
    On { level: Option<f64> },
    /// Turn off.
    Off,
    /// Fire a chained remote command (api-target kinds).
    Action(ActionSpec),
}

/// Outbound port for device hardware/network drivers.
///
/// The boolean result signals *retryability*, not physical truth:
/// `true` means "accepted, don't retry" (even if the physical state was
/// already correct); `false` means "retry on the next group evaluation".
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    async fn send(&self, command: DeviceCommand) -> bool;
}

/// A raw value fetched from a sensor's external collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    Boolean(bool),
    Numeric(f64),
}

/// Failure modes of a sensor poll, mapped to the core's error taxonomy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// Peer unreachable or timed out — keep the cached reading and retry
    /// on the next iteration.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The response was well-formed but not a real reading (e.g. a lock
    /// screen reported instead of monitor state) — keep the cache.
    #[error("invalid reading: {0}")]
    Invalid(String),

    /// The peer answered with an unexpected shape — it is assumed
    /// misconfigured, and the instance is permanently disabled.
    #[error("protocol failure: {0}")]
    Protocol(String),
}

/// Outbound port for polled sensor drivers.
#[async_trait]
pub trait SensorDriver: Send + Sync {
    async fn read(&self) -> Result<SensorReading, DriverError>;
}

/// Outbound port for the remote command envelope.
///
/// Implementations must bound the round trip with a timeout so one
/// unreachable peer cannot stall the caller.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Send `[endpoint, arg1, ...]` to `target` and return the decoded
    /// JSON response.
    async fn call(&self, target: &str, request: Vec<Value>) -> Result<Value, ApiError>;
}

/// Constructs drivers for configured instances at node assembly.
///
/// `api-target` devices never reach the factory — their driver is built
/// by the core around the [`ApiClient`] port.
pub trait DriverFactory: Send + Sync {
    /// Build the driver for a device entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the entry cannot be realized (e.g. an
    /// unsupported kind for this factory).
    fn device_driver(&self, config: &DeviceConfig) -> Result<Box<dyn DeviceDriver>, ConfigError>;

    /// Build the driver for a sensor entry.
    ///
    /// # Errors
    ///
    /// See [`Self::device_driver`].
    fn sensor_driver(&self, config: &SensorConfig) -> Result<Box<dyn SensorDriver>, ConfigError>;
}
