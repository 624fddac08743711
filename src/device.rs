//! Per-device fan control: read, decide, apply

use crate::curve::SpeedCurve;
use crate::errors::{FanControlError, Result};
use crate::telemetry::{DeviceHandle, FanTelemetry};

/// Record of a fan speed change written to a device
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    pub device_index: u32,
    pub device_name: String,
    pub temperature: f64,
    pub old_speed: u32,
    pub new_speed: u32,
}

/// Drives the fans of one device from its own speed curve.
///
/// Nothing is cached between ticks: the current fan speed is read back from the
/// device each time, so a change made by another process is noticed and corrected.
#[derive(Debug, Clone)]
pub struct DeviceController {
    handle: DeviceHandle,
    curve: SpeedCurve,
}

impl DeviceController {
    pub fn new(handle: DeviceHandle, curve: SpeedCurve) -> Self {
        Self { handle, curve }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    pub fn index(&self) -> u32 {
        self.handle.index
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    pub fn curve(&self) -> &SpeedCurve {
        &self.curve
    }

    /// Curve speed for `temperature`, kept within the device's settable range
    pub fn target_speed(&self, temperature: f64) -> u32 {
        let speed = self.curve.interpolate(temperature);
        if self.handle.fan_min <= self.handle.fan_max {
            speed.clamp(self.handle.fan_min, self.handle.fan_max)
        } else {
            speed
        }
    }

    /// Mean speed over all fan groups, truncated
    pub fn current_speed<T: FanTelemetry + ?Sized>(&self, hw: &T) -> Result<u32> {
        let speeds = hw
            .fan_group_speeds(&self.handle)
            .map_err(|e| self.read_error(e))?;
        if speeds.is_empty() {
            return Err(FanControlError::TelemetryRead {
                device: self.handle.index,
                reason: "device reports no fan groups".to_string(),
            });
        }
        let total: u64 = speeds.iter().map(|s| *s as u64).sum();
        Ok((total / speeds.len() as u64) as u32)
    }

    /// Calculate the target speed and write it to every fan group if it differs
    /// from what the fans are doing now.
    ///
    /// Returns `None` when no write was needed.
    pub fn evaluate_and_apply<T: FanTelemetry + ?Sized>(
        &self,
        hw: &T,
    ) -> Result<Option<AppliedChange>> {
        let temperature = hw
            .temperature(&self.handle)
            .map_err(|e| self.read_error(e))?;
        let new_speed = self.target_speed(temperature);
        let old_speed = self.current_speed(hw)?;

        if new_speed == old_speed {
            return Ok(None);
        }

        for group in 0..self.handle.fan_count {
            hw.set_fan_speed(&self.handle, group, new_speed)
                .map_err(|e| self.write_error(group, e))?;
        }

        Ok(Some(AppliedChange {
            device_index: self.handle.index,
            device_name: self.handle.name.clone(),
            temperature,
            old_speed,
            new_speed,
        }))
    }

    /// Hand every fan group back to the firmware policy.
    ///
    /// Every group is attempted even if an earlier one fails. Safe to call on a
    /// device that was never put under manual control.
    pub fn restore_default<T: FanTelemetry + ?Sized>(&self, hw: &T) -> Result<()> {
        let failures: Vec<String> = (0..self.handle.fan_count)
            .filter_map(|group| {
                hw.reset_fan_group_to_default(&self.handle, group)
                    .err()
                    .map(|e| format!("fan group {}: {}", group, e))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FanControlError::Restore {
                device: self.handle.index,
                reason: failures.join("; "),
            })
        }
    }

    fn read_error(&self, err: FanControlError) -> FanControlError {
        match err {
            FanControlError::TelemetryRead { .. } | FanControlError::DeviceLost { .. } => err,
            other => FanControlError::TelemetryRead {
                device: self.handle.index,
                reason: other.to_string(),
            },
        }
    }

    fn write_error(&self, group: u32, err: FanControlError) -> FanControlError {
        match err {
            FanControlError::ActuationWrite { .. } | FanControlError::DeviceLost { .. } => err,
            other => FanControlError::ActuationWrite {
                device: self.handle.index,
                group,
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::Breakpoint;
    use crate::telemetry::mock::{MockTelemetry, Write};

    fn reference_curve() -> SpeedCurve {
        SpeedCurve::new(vec![
            Breakpoint::new(30.0, 30),
            Breakpoint::new(40.0, 50),
            Breakpoint::new(50.0, 80),
            Breakpoint::new(60.0, 100),
        ])
        .unwrap()
    }

    #[test]
    fn test_applies_new_speed_to_every_group() {
        let hw = MockTelemetry::new().with_device("gpu0", 2, 45.0, 30);
        let controller = DeviceController::new(hw.handle(0), reference_curve());

        let change = controller.evaluate_and_apply(&hw).unwrap().unwrap();
        assert_eq!(
            change,
            AppliedChange {
                device_index: 0,
                device_name: "gpu0".to_string(),
                temperature: 45.0,
                old_speed: 30,
                new_speed: 65,
            }
        );
        assert_eq!(
            hw.writes(),
            vec![
                Write::Speed { device: 0, group: 0, percent: 65 },
                Write::Speed { device: 0, group: 1, percent: 65 },
            ]
        );
        assert!(hw.is_manual(0));
    }

    #[test]
    fn test_no_write_when_speed_matches() {
        let hw = MockTelemetry::new().with_device("gpu0", 1, 45.0, 0);
        let controller = DeviceController::new(hw.handle(0), reference_curve());

        assert!(controller.evaluate_and_apply(&hw).unwrap().is_some());
        for _ in 0..5 {
            assert!(controller.evaluate_and_apply(&hw).unwrap().is_none());
        }
        assert_eq!(hw.speed_writes(), 1);
    }

    #[test]
    fn test_current_speed_is_truncated_mean() {
        let hw = MockTelemetry::new().with_device("gpu0", 3, 45.0, 0);
        hw.set_group_speeds(0, vec![60, 65, 71]);
        let controller = DeviceController::new(hw.handle(0), reference_curve());

        assert_eq!(controller.current_speed(&hw).unwrap(), 65);
        // Mean already equals the 65% target, so nothing is written
        assert!(controller.evaluate_and_apply(&hw).unwrap().is_none());
        assert_eq!(hw.speed_writes(), 0);
    }

    #[test]
    fn test_external_change_is_corrected() {
        let hw = MockTelemetry::new().with_device("gpu0", 1, 45.0, 65);
        let controller = DeviceController::new(hw.handle(0), reference_curve());
        assert!(controller.evaluate_and_apply(&hw).unwrap().is_none());

        hw.set_group_speeds(0, vec![20]);
        let change = controller.evaluate_and_apply(&hw).unwrap().unwrap();
        assert_eq!((change.old_speed, change.new_speed), (20, 65));
    }

    #[test]
    fn test_target_clamped_to_device_bounds() {
        let hw = MockTelemetry::new().with_device("gpu0", 1, 20.0, 0);
        hw.set_bounds(0, 40, 90);
        let controller = DeviceController::new(hw.handle(0), reference_curve());

        assert_eq!(controller.target_speed(20.0), 40);
        assert_eq!(controller.target_speed(45.0), 65);
        assert_eq!(controller.target_speed(75.0), 90);
    }

    #[test]
    fn test_read_failure_writes_nothing() {
        let hw = MockTelemetry::new().with_device("gpu0", 1, 45.0, 0);
        hw.fail_reads(0);
        let controller = DeviceController::new(hw.handle(0), reference_curve());

        assert!(matches!(
            controller.evaluate_and_apply(&hw),
            Err(FanControlError::TelemetryRead { device: 0, .. })
        ));
        assert!(hw.writes().is_empty());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let hw = MockTelemetry::new().with_device("gpu0", 1, 45.0, 0);
        hw.fail_writes(0);
        let controller = DeviceController::new(hw.handle(0), reference_curve());

        assert!(matches!(
            controller.evaluate_and_apply(&hw),
            Err(FanControlError::ActuationWrite { device: 0, group: 0, .. })
        ));
    }

    #[test]
    fn test_restore_default_is_idempotent() {
        let hw = MockTelemetry::new().with_device("gpu0", 2, 45.0, 0);
        let controller = DeviceController::new(hw.handle(0), reference_curve());

        // Never overridden
        controller.restore_default(&hw).unwrap();

        controller.evaluate_and_apply(&hw).unwrap();
        assert!(hw.is_manual(0));
        controller.restore_default(&hw).unwrap();
        controller.restore_default(&hw).unwrap();
        assert!(!hw.is_manual(0));
        assert_eq!(hw.resets_for(0), 6);
    }

    #[test]
    fn test_restore_attempts_every_group() {
        let hw = MockTelemetry::new().with_device("gpu0", 3, 45.0, 0);
        hw.fail_resets(0);
        let controller = DeviceController::new(hw.handle(0), reference_curve());

        match controller.restore_default(&hw) {
            Err(FanControlError::Restore { device, reason }) => {
                assert_eq!(device, 0);
                assert!(reason.contains("fan group 0"));
                assert!(reason.contains("fan group 2"));
            }
            other => panic!("expected restore error, got {:?}", other),
        }
        assert_eq!(hw.resets_for(0), 3);
    }
}
