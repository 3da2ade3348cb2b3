//! Virtual sensors — readings injected through a shared handle.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use homenode_app::ports::{DriverError, SensorDriver, SensorReading};

/// Shared handle feeding a virtual sensor. Until a reading is injected
/// the driver reports a transient failure, like a real peer that has not
/// answered yet.
#[derive(Clone)]
pub struct ReadingHandle {
    inner: Arc<Mutex<Result<SensorReading, DriverError>>>,
}

impl Default for ReadingHandle {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Err(DriverError::Transient(
                "no reading injected".to_string(),
            )))),
        }
    }
}

impl ReadingHandle {
    pub fn set_numeric(&self, value: f64) {
        *self.lock() = Ok(SensorReading::Numeric(value));
    }

    pub fn set_boolean(&self, value: bool) {
        *self.lock() = Ok(SensorReading::Boolean(value));
    }

    /// Make the next polls fail with `error` (transient, invalid, or
    /// protocol) until a new reading is injected.
    pub fn set_error(&self, error: DriverError) {
        *self.lock() = Err(error);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Result<SensorReading, DriverError>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Driver reading from a [`ReadingHandle`].
pub(crate) struct VirtualSensor {
    handle: ReadingHandle,
}

impl VirtualSensor {
    pub(crate) fn new(handle: ReadingHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl SensorDriver for VirtualSensor {
    async fn read(&self) -> Result<SensorReading, DriverError> {
        self.handle.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_fail_transiently_before_first_injection() {
        let sensor = VirtualSensor::new(ReadingHandle::default());
        assert!(matches!(
            sensor.read().await,
            Err(DriverError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn should_serve_injected_readings() {
        let handle = ReadingHandle::default();
        let sensor = VirtualSensor::new(handle.clone());

        handle.set_numeric(21.5);
        assert_eq!(sensor.read().await.unwrap(), SensorReading::Numeric(21.5));

        handle.set_boolean(true);
        assert_eq!(sensor.read().await.unwrap(), SensorReading::Boolean(true));
    }

    #[tokio::test]
    async fn should_serve_injected_errors() {
        let handle = ReadingHandle::default();
        let sensor = VirtualSensor::new(handle.clone());

        handle.set_error(DriverError::Protocol("bad shape".to_string()));
        assert!(matches!(
            sensor.read().await,
            Err(DriverError::Protocol(_))
        ));
    }
}
