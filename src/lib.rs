//! GPU Fan Curve Daemon
//!
//! Keeps GPU fan speed on a user-defined temperature curve, overriding the
//! firmware's automatic fan control while running and handing control back on exit.

pub mod args;
pub mod curve;
pub mod daemon;
pub mod device;
pub mod errors;
pub mod events;
pub mod hwmon;
pub mod logging;
pub mod nvml;
pub mod profile;
pub mod telemetry;

pub const APP_NAME: &str = "gpu-fan-curve";

// Re-export commonly used types
pub use curve::{Breakpoint, SpeedCurve};
pub use daemon::{run_control_loop, ControlLoop, DeviceRegistration, ExitOutcome, LoopState};
pub use device::{AppliedChange, DeviceController};
pub use errors::{FanControlError, Result};
pub use events::{ControlEvent, EventSink, LogSink};
pub use telemetry::{DeviceHandle, FanTelemetry};
