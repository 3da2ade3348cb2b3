//! # homenode-app
//!
//! Runtime core — the automation state machine and **port definitions**.
//!
//! ## Responsibilities
//! - The **software timer** scheduler every time-based behavior runs
//!   through (schedule boundaries, delayed enable/disable, fade steps)
//! - The shared **instance lifecycle** for devices and sensors
//!   (enable / disable / `set_rule` / `next_rule` / `reset_rule`)
//! - **Group** coordination — aggregate sensor conditions into device
//!   on/off actions with retry-on-next-evaluation semantics
//! - The **monitor loop** pattern for sensors whose condition must be
//!   polled rather than interrupt-driven
//! - The **fade executor** — scheduler-driven, abortable brightness ramps
//! - **Node assembly** — config → instances → groups → rule queues
//! - Define **port traits** that adapters implement: [`ports::DeviceDriver`],
//!   [`ports::SensorDriver`], [`ports::ApiClient`], [`ports::DriverFactory`]
//!
//! ## Concurrency model
//! All instance/group state lives behind short, scoped `std::sync::Mutex`
//! sections; no lock is ever held across an await. Network IO (device
//! sends, sensor polls) happens through the ports with bounded timeouts
//! so an unreachable peer cannot stall the scheduler. Cancellation is
//! cooperative: monitor tasks are aborted and observe it at their next
//! suspension point.
//!
//! ## Dependency rule
//! Depends on `homenode-domain` only (plus tokio). Never imports adapter
//! crates — adapters depend on *this* crate, not the reverse.

pub mod device;
pub mod fade;
pub mod group;
pub mod instance;
pub mod monitor;
pub mod node;
pub mod ports;
pub mod sensor;
pub mod timer;
