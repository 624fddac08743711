//! NVML backend for GPUs on the proprietary NVIDIA driver
//!
//! The driver does not expose hwmon PWM files, so fan speed goes through the
//! NVIDIA Management Library instead. `libnvidia-ml.so` is loaded at runtime by
//! [`NvmlTelemetry::init`]; nothing links against it at build time.

use crate::errors::{FanControlError, Result};
use crate::telemetry::{DeviceHandle, FanTelemetry};
use log::{debug, info};
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};

/// Fan telemetry for NVIDIA GPUs
pub struct NvmlTelemetry {
    nvml: Nvml,
}

impl NvmlTelemetry {
    /// Load and initialise NVML
    pub fn init() -> Result<Self> {
        let nvml = Nvml::init()
            .map_err(|e| FanControlError::Hardware(format!("cannot initialise NVML: {}", e)))?;
        Ok(Self { nvml })
    }

    pub fn driver_version(&self) -> Result<String> {
        self.nvml
            .sys_driver_version()
            .map_err(|e| FanControlError::Hardware(format!("cannot read driver version: {}", e)))
    }

    fn device(&self, handle: &DeviceHandle) -> std::result::Result<Device<'_>, NvmlError> {
        self.nvml.device_by_index(handle.index)
    }
}

/// Map an NVML failure on `device` to our error kinds. A GPU that fell off the
/// bus is lost for good; everything else goes through `other`.
fn classify(
    device: u32,
    error: NvmlError,
    other: impl FnOnce(String) -> FanControlError,
) -> FanControlError {
    match error {
        NvmlError::GpuLost => FanControlError::DeviceLost { device },
        error => other(error.to_string()),
    }
}

fn read_error(device: u32) -> impl FnOnce(String) -> FanControlError {
    move |reason| FanControlError::TelemetryRead { device, reason }
}

impl FanTelemetry for NvmlTelemetry {
    fn enumerate_devices(&self) -> Result<Vec<DeviceHandle>> {
        let count = self
            .nvml
            .device_count()
            .map_err(|e| FanControlError::Hardware(format!("cannot count GPUs: {}", e)))?;

        let mut handles = Vec::new();
        for index in 0..count {
            let device = self
                .nvml
                .device_by_index(index)
                .map_err(|e| classify(index, e, FanControlError::Hardware))?;
            let name = device.name().map_err(|e| classify(index, e, read_error(index)))?;
            let fan_count = device
                .num_fans()
                .map_err(|e| classify(index, e, read_error(index)))?;
            if fan_count == 0 {
                info!("Skipping GPU {} ({}): no controllable fans", index, name);
                continue;
            }

            let mut handle = DeviceHandle {
                index,
                name,
                fan_min: 0,
                fan_max: 100,
                fan_count,
            };
            let (fan_min, fan_max) = self.min_max_fan_speed(&handle)?;
            handle.fan_min = fan_min;
            handle.fan_max = fan_max;
            handles.push(handle);
        }
        Ok(handles)
    }

    fn temperature(&self, handle: &DeviceHandle) -> Result<f64> {
        let index = handle.index;
        let device = self
            .device(handle)
            .map_err(|e| classify(index, e, read_error(index)))?;
        let celsius = device
            .temperature(TemperatureSensor::Gpu)
            .map_err(|e| classify(index, e, read_error(index)))?;
        Ok(celsius as f64)
    }

    fn fan_group_speeds(&self, handle: &DeviceHandle) -> Result<Vec<u32>> {
        let index = handle.index;
        let device = self
            .device(handle)
            .map_err(|e| classify(index, e, read_error(index)))?;
        (0..handle.fan_count)
            .map(|fan| {
                device
                    .fan_speed(fan)
                    .map_err(|e| classify(index, e, read_error(index)))
            })
            .collect()
    }

    fn set_fan_speed(&self, handle: &DeviceHandle, group: u32, percent: u32) -> Result<()> {
        let index = handle.index;
        let write_error = |reason: String| FanControlError::ActuationWrite {
            device: index,
            group,
            reason,
        };
        let mut device = self
            .device(handle)
            .map_err(|e| classify(index, e, write_error))?;
        device
            .set_fan_speed(group, percent)
            .map_err(|e| classify(index, e, write_error))?;
        debug!("Set GPU {} fan {} to {}%", index, group, percent);
        Ok(())
    }

    fn reset_fan_group_to_default(&self, handle: &DeviceHandle, group: u32) -> Result<()> {
        let index = handle.index;
        let restore_error = |reason: String| FanControlError::Restore {
            device: index,
            reason: format!("fan {}: {}", group, reason),
        };
        let mut device = self
            .device(handle)
            .map_err(|e| classify(index, e, restore_error))?;
        device
            .set_default_fan_speed(group)
            .map_err(|e| classify(index, e, restore_error))?;
        debug!("Reset GPU {} fan {} to the default policy", index, group);
        Ok(())
    }

    fn min_max_fan_speed(&self, handle: &DeviceHandle) -> Result<(u32, u32)> {
        let index = handle.index;
        let device = self
            .device(handle)
            .map_err(|e| classify(index, e, read_error(index)))?;
        match device.min_max_fan_speed() {
            Ok(bounds) => Ok(bounds),
            Err(NvmlError::NotSupported) => {
                debug!("GPU {} does not report fan speed limits, assuming 0-100", index);
                Ok((0, 100))
            }
            Err(e) => Err(classify(index, e, read_error(index))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_gpu_ends_control() {
        let error = classify(1, NvmlError::GpuLost, read_error(1));
        assert!(matches!(error, FanControlError::DeviceLost { device: 1 }));
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_other_failures_keep_their_kind() {
        let error = classify(0, NvmlError::NoPermission, read_error(0));
        assert!(matches!(error, FanControlError::TelemetryRead { device: 0, .. }));
        assert!(error.is_recoverable());

        let error = classify(2, NvmlError::NotSupported, |reason| {
            FanControlError::ActuationWrite {
                device: 2,
                group: 1,
                reason,
            }
        });
        assert!(matches!(
            error,
            FanControlError::ActuationWrite {
                device: 2,
                group: 1,
                ..
            }
        ));
    }
}
