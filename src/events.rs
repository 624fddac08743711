//! Observability events emitted by the control core

use crate::curve::Breakpoint;
use crate::device::AppliedChange;
use crate::errors::FanControlError;
use crate::telemetry::DeviceHandle;
use log::{debug, error, info, warn};

/// Something worth reporting that happened in the control loop
#[derive(Debug)]
pub enum ControlEvent<'a> {
    /// A device was registered with the loop
    DeviceRegistered {
        device: &'a DeviceHandle,
        breakpoints: &'a [Breakpoint],
    },
    /// A new fan speed was written
    SpeedApplied(&'a AppliedChange),
    /// Reading temperature or fan speed failed; the device is skipped this tick
    ReadFailed {
        index: u32,
        name: &'a str,
        error: &'a FanControlError,
    },
    /// Writing a new fan speed failed; the fans may be left at a stale speed
    WriteFailed {
        index: u32,
        name: &'a str,
        error: &'a FanControlError,
    },
    /// A device error that ends the loop
    DeviceFailed {
        index: u32,
        name: &'a str,
        error: &'a FanControlError,
    },
    /// A termination signal arrived between ticks
    ShutdownRequested,
    /// Draining started
    RestoreStarted { devices: usize },
    /// Restoring one device to the firmware policy failed
    RestoreFailed {
        index: u32,
        name: &'a str,
        error: &'a FanControlError,
    },
    /// Draining finished
    RestoreFinished { devices: usize, failures: usize },
}

/// Destination for control loop events
pub trait EventSink {
    fn emit(&self, event: ControlEvent<'_>);
}

/// Forwards events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: ControlEvent<'_>) {
        match event {
            ControlEvent::DeviceRegistered {
                device,
                breakpoints,
            } => {
                info!("{}", device);
                let points: Vec<String> = breakpoints.iter().map(|p| p.to_string()).collect();
                debug!("Fan speed set points: [{}]", points.join(", "));
            }
            ControlEvent::SpeedApplied(change) => info!(
                "{}:{}\ttemp:{}\tspeed: {}>>{}",
                change.device_index,
                change.device_name,
                change.temperature,
                change.old_speed,
                change.new_speed
            ),
            ControlEvent::ReadFailed { index, name, error } => {
                warn!("{}:{}\tskipping this tick: {}", index, name, error)
            }
            ControlEvent::WriteFailed { index, name, error } => {
                warn!("{}:{}\tfan speed may be stale: {}", index, name, error)
            }
            ControlEvent::DeviceFailed { index, name, error } => {
                error!("{}:{}\tstopping fan control: {}", index, name, error)
            }
            ControlEvent::ShutdownRequested => info!("Termination requested"),
            ControlEvent::RestoreStarted { devices } => {
                info!("Reset to the default fan control policy! ({} devices)", devices)
            }
            ControlEvent::RestoreFailed { index, name, error } => {
                error!("{}:{}\tfailed to restore default policy: {}", index, name, error)
            }
            ControlEvent::RestoreFinished { devices, failures } => {
                if failures == 0 {
                    info!("All {} devices returned to the default fan policy", devices)
                } else {
                    error!(
                        "{} of {} devices could not be returned to the default fan policy",
                        failures, devices
                    )
                }
            }
        }
    }
}
