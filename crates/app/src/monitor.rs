//! The monitor loop — cooperative polling standing in for an interrupt.
//!
//! Thermostats, load cells and desktop triggers have no hardware
//! interrupt: their condition is an external value that must be polled.
//! The loop sleeps a fixed interval between iterations (cancellation is
//! observed there, never mid-read), keeps the cached reading across
//! transient or semantically invalid responses, and treats a protocol
//! failure as a misconfigured peer: the sensor is disabled permanently
//! until an operator re-enables it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::ports::DriverError;
use crate::sensor::Sensor;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) fn spawn(sensor: Arc<Sensor>) -> JoinHandle<()> {
    tokio::spawn(async move { run(sensor).await })
}

async fn run(sensor: Arc<Sensor>) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let Some(result) = sensor.poll().await else {
            return;
        };
        match result {
            Ok(reading) => sensor.update_reading(reading).await,
            Err(DriverError::Transient(reason)) => {
                debug!(name = %sensor.core().name(), reason, "poll failed, keeping cached reading");
            }
            Err(DriverError::Invalid(reason)) => {
                debug!(name = %sensor.core().name(), reason, "reading not usable, keeping cache");
            }
            Err(DriverError::Protocol(reason)) => {
                error!(
                    name = %sensor.core().name(),
                    reason, "protocol failure, disabling until operator intervention"
                );
                sensor.monitor_failed();
                return;
            }
        }
    }
}
