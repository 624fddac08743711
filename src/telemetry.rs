//! Hardware access seam: temperature and fan readings, fan writes, device enumeration

use crate::errors::Result;
use std::fmt;

/// Identity and fan bounds of one GPU, fixed at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub index: u32,
    pub name: String,
    pub fan_min: u32,
    pub fan_max: u32,
    pub fan_count: u32,
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Device {}] {}\tfan_groups: {}\tfan_speed: {}-{}",
            self.index, self.name, self.fan_count, self.fan_min, self.fan_max
        )
    }
}

/// Telemetry and actuation for fan-equipped devices.
///
/// Implementations are not required to be thread-safe; the control loop calls
/// them from a single task, one device at a time.
pub trait FanTelemetry {
    /// Enumerate controllable devices.
    fn enumerate_devices(&self) -> Result<Vec<DeviceHandle>>;

    /// Current chip temperature in °C.
    fn temperature(&self, device: &DeviceHandle) -> Result<f64>;

    /// Current speed percentage of every fan group, in group order.
    fn fan_group_speeds(&self, device: &DeviceHandle) -> Result<Vec<u32>>;

    /// Put one fan group under manual control at `percent`.
    fn set_fan_speed(&self, device: &DeviceHandle, group: u32, percent: u32) -> Result<()>;

    /// Hand one fan group back to the firmware's automatic policy.
    fn reset_fan_group_to_default(&self, device: &DeviceHandle, group: u32) -> Result<()>;

    /// Minimum and maximum settable speed percentage.
    fn min_max_fan_speed(&self, device: &DeviceHandle) -> Result<(u32, u32)>;
}
