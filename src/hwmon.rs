//! sysfs hwmon backend for GPU fans exposed under /sys/class/drm

use crate::errors::{FanControlError, Result};
use crate::telemetry::{DeviceHandle, FanTelemetry};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default location of DRM cards
pub const DRM_CLASS_PATH: &str = "/sys/class/drm";

const PWM_ENABLE_MANUAL: &str = "1";
const PWM_ENABLE_AUTO: &str = "2";

/// Convert a percentage (0-100) to a PWM value (0-255)
fn pwm_from_percent(percent: u32) -> u8 {
    ((percent.min(100) as f64 / 100.0) * 255.0).round() as u8
}

/// Convert a PWM value (0-255) to a percentage (0-100)
fn pwm_to_percent(value: u8) -> u32 {
    ((value as f64 / 255.0) * 100.0).round() as u32
}

fn read_value<T: FromStr>(path: &Path) -> std::result::Result<T, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    content
        .trim()
        .parse()
        .map_err(|_| format!("{}: unparseable value {:?}", path.display(), content.trim()))
}

/// One GPU with a hwmon directory that exposes PWM files
#[derive(Debug, Clone)]
struct HwmonDevice {
    card: String,
    hwmon_path: PathBuf,
    fan_count: u32,
}

impl HwmonDevice {
    fn pwm_path(&self, group: u32) -> PathBuf {
        self.hwmon_path.join(format!("pwm{}", group + 1))
    }

    fn pwm_enable_path(&self, group: u32) -> PathBuf {
        self.hwmon_path.join(format!("pwm{}_enable", group + 1))
    }

    fn is_present(&self) -> bool {
        self.hwmon_path.is_dir()
    }
}

/// Fan telemetry for GPUs driven through hwmon PWM files
pub struct HwmonTelemetry {
    devices: Vec<HwmonDevice>,
}

impl HwmonTelemetry {
    /// Scan `drm_root` for cards with PWM fan control
    pub fn discover(drm_root: &Path) -> Result<Self> {
        info!("Scanning {} for GPU fan controls...", drm_root.display());

        if !drm_root.is_dir() {
            return Err(FanControlError::Config(format!(
                "DRM class directory not found: {}",
                drm_root.display()
            )));
        }

        let mut cards: Vec<(u32, String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(drm_root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            // Connector entries look like card0-DP-1
            if !name.starts_with("card") || name.contains('-') {
                continue;
            }
            match name["card".len()..].parse::<u32>() {
                Ok(number) => cards.push((number, name, entry.path())),
                Err(_) => debug!("Skipping unrecognised DRM entry {}", name),
            }
        }
        cards.sort_by_key(|(number, _, _)| *number);

        let mut devices = Vec::new();
        for (_, card, card_path) in cards {
            let Some(hwmon_path) = Self::find_hwmon(&card_path.join("device")) else {
                debug!("{} has no hwmon directory", card);
                continue;
            };

            let fan_count = Self::count_pwm_groups(&hwmon_path);
            if fan_count == 0 {
                debug!("{} has no PWM fan control", card);
                continue;
            }

            devices.push(HwmonDevice {
                card,
                hwmon_path,
                fan_count,
            });
        }

        if devices.is_empty() {
            warn!("No GPU with PWM fan control found under {}", drm_root.display());
        }

        Ok(Self { devices })
    }

    fn find_hwmon(device_path: &Path) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = fs::read_dir(device_path.join("hwmon"))
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Count contiguous pwm1, pwm2, ... files
    fn count_pwm_groups(hwmon_path: &Path) -> u32 {
        let mut count = 0;
        while hwmon_path.join(format!("pwm{}", count + 1)).exists() {
            count += 1;
        }
        count
    }

    fn device(&self, handle: &DeviceHandle) -> Result<&HwmonDevice> {
        let device = self
            .devices
            .get(handle.index as usize)
            .ok_or(FanControlError::DeviceLost {
                device: handle.index,
            })?;
        if !device.is_present() {
            return Err(FanControlError::DeviceLost {
                device: handle.index,
            });
        }
        Ok(device)
    }

    fn check_group(handle: &DeviceHandle, device: &HwmonDevice, group: u32) -> Result<()> {
        if group >= device.fan_count {
            return Err(FanControlError::Hardware(format!(
                "device {} has no fan group {}",
                handle.index, group
            )));
        }
        Ok(())
    }

    fn read_name(hwmon_path: &Path) -> String {
        fs::read_to_string(hwmon_path.join("name"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

impl FanTelemetry for HwmonTelemetry {
    fn enumerate_devices(&self) -> Result<Vec<DeviceHandle>> {
        let mut handles = Vec::with_capacity(self.devices.len());
        for (index, device) in self.devices.iter().enumerate() {
            let mut handle = DeviceHandle {
                index: index as u32,
                name: format!("{} ({})", device.card, Self::read_name(&device.hwmon_path)),
                fan_min: 0,
                fan_max: 100,
                fan_count: device.fan_count,
            };
            let (fan_min, fan_max) = self.min_max_fan_speed(&handle)?;
            handle.fan_min = fan_min;
            handle.fan_max = fan_max;
            handles.push(handle);
        }
        Ok(handles)
    }

    fn temperature(&self, handle: &DeviceHandle) -> Result<f64> {
        let device = self.device(handle)?;
        let millidegrees: f64 = read_value(&device.hwmon_path.join("temp1_input")).map_err(
            |reason| FanControlError::TelemetryRead {
                device: handle.index,
                reason,
            },
        )?;
        Ok(millidegrees / 1000.0)
    }

    fn fan_group_speeds(&self, handle: &DeviceHandle) -> Result<Vec<u32>> {
        let device = self.device(handle)?;
        (0..device.fan_count)
            .map(|group| {
                read_value::<u8>(&device.pwm_path(group))
                    .map(pwm_to_percent)
                    .map_err(|reason| FanControlError::TelemetryRead {
                        device: handle.index,
                        reason,
                    })
            })
            .collect()
    }

    fn set_fan_speed(&self, handle: &DeviceHandle, group: u32, percent: u32) -> Result<()> {
        let device = self.device(handle)?;
        Self::check_group(handle, device, group)?;

        let write_error = |e: std::io::Error| FanControlError::ActuationWrite {
            device: handle.index,
            group,
            reason: e.to_string(),
        };

        let enable_path = device.pwm_enable_path(group);
        if enable_path.exists() {
            fs::write(&enable_path, PWM_ENABLE_MANUAL).map_err(write_error)?;
        }

        let pwm_value = pwm_from_percent(percent);
        fs::write(device.pwm_path(group), pwm_value.to_string()).map_err(write_error)?;

        debug!(
            "Set {} fan group {} to {}% (PWM: {})",
            device.card, group, percent, pwm_value
        );
        Ok(())
    }

    fn reset_fan_group_to_default(&self, handle: &DeviceHandle, group: u32) -> Result<()> {
        let device = self.device(handle)?;
        Self::check_group(handle, device, group)?;

        let enable_path = device.pwm_enable_path(group);
        if !enable_path.exists() {
            debug!("{} fan group {} has no pwm_enable, nothing to reset", device.card, group);
            return Ok(());
        }

        fs::write(&enable_path, PWM_ENABLE_AUTO).map_err(|e| FanControlError::Restore {
            device: handle.index,
            reason: format!("fan group {}: {}", group, e),
        })?;
        debug!("Reset {} fan group {} to automatic control", device.card, group);
        Ok(())
    }

    fn min_max_fan_speed(&self, handle: &DeviceHandle) -> Result<(u32, u32)> {
        let device = self.device(handle)?;
        let bound = |file: &str, fallback: u32| -> Result<u32> {
            let path = device.hwmon_path.join(file);
            if !path.exists() {
                return Ok(fallback);
            }
            read_value::<u8>(&path)
                .map(pwm_to_percent)
                .map_err(|reason| FanControlError::TelemetryRead {
                    device: handle.index,
                    reason,
                })
        };
        Ok((bound("pwm1_min", 0)?, bound("pwm1_max", 100)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// card0: two fan groups, card0-DP-1 connector, card1 without hwmon, card2: one group with bounds
    fn fake_drm_tree() -> TempDir {
        let root = tempfile::tempdir().unwrap();
        let hwmon0 = root.path().join("card0/device/hwmon/hwmon3");
        write(&hwmon0.join("name"), "amdgpu\n");
        write(&hwmon0.join("temp1_input"), "45000\n");
        write(&hwmon0.join("pwm1"), "128\n");
        write(&hwmon0.join("pwm1_enable"), "2\n");
        write(&hwmon0.join("pwm2"), "255\n");
        write(&hwmon0.join("pwm2_enable"), "2\n");

        fs::create_dir_all(root.path().join("card0-DP-1")).unwrap();
        fs::create_dir_all(root.path().join("card1/device")).unwrap();

        let hwmon2 = root.path().join("card2/device/hwmon/hwmon5");
        write(&hwmon2.join("name"), "radeon\n");
        write(&hwmon2.join("temp1_input"), "61500\n");
        write(&hwmon2.join("pwm1"), "0\n");
        write(&hwmon2.join("pwm1_min"), "51\n");
        write(&hwmon2.join("pwm1_max"), "255\n");
        root
    }

    #[test]
    fn test_pwm_conversion() {
        assert_eq!(pwm_from_percent(0), 0);
        assert_eq!(pwm_from_percent(50), 128);
        assert_eq!(pwm_from_percent(100), 255);
        assert_eq!(pwm_from_percent(150), 255);
        assert_eq!(pwm_to_percent(0), 0);
        assert_eq!(pwm_to_percent(255), 100);

        for percent in 0..=100 {
            assert_eq!(pwm_to_percent(pwm_from_percent(percent)), percent);
        }
    }

    #[test]
    fn test_discover_devices() {
        let root = fake_drm_tree();
        let hw = HwmonTelemetry::discover(root.path()).unwrap();
        let devices = hw.enumerate_devices().unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].name, "card0 (amdgpu)");
        assert_eq!(devices[0].fan_count, 2);
        assert_eq!((devices[0].fan_min, devices[0].fan_max), (0, 100));

        assert_eq!(devices[1].index, 1);
        assert_eq!(devices[1].name, "card2 (radeon)");
        assert_eq!(devices[1].fan_count, 1);
        assert_eq!((devices[1].fan_min, devices[1].fan_max), (20, 100));
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let root = tempfile::tempdir().unwrap();
        let result = HwmonTelemetry::discover(&root.path().join("missing"));
        assert!(matches!(result, Err(FanControlError::Config(_))));
    }

    #[test]
    fn test_read_temperature_and_speeds() {
        let root = fake_drm_tree();
        let hw = HwmonTelemetry::discover(root.path()).unwrap();
        let devices = hw.enumerate_devices().unwrap();

        assert_eq!(hw.temperature(&devices[0]).unwrap(), 45.0);
        assert_eq!(hw.temperature(&devices[1]).unwrap(), 61.5);
        assert_eq!(hw.fan_group_speeds(&devices[0]).unwrap(), vec![50, 100]);
    }

    #[test]
    fn test_set_and_reset_fan_group() {
        let root = fake_drm_tree();
        let hw = HwmonTelemetry::discover(root.path()).unwrap();
        let devices = hw.enumerate_devices().unwrap();
        let hwmon0 = root.path().join("card0/device/hwmon/hwmon3");

        hw.set_fan_speed(&devices[0], 1, 40).unwrap();
        assert_eq!(fs::read_to_string(hwmon0.join("pwm2")).unwrap(), "102");
        assert_eq!(fs::read_to_string(hwmon0.join("pwm2_enable")).unwrap(), "1");
        assert_eq!(hw.fan_group_speeds(&devices[0]).unwrap(), vec![50, 40]);

        hw.reset_fan_group_to_default(&devices[0], 1).unwrap();
        hw.reset_fan_group_to_default(&devices[0], 1).unwrap();
        assert_eq!(fs::read_to_string(hwmon0.join("pwm2_enable")).unwrap(), "2");

        // card2 has no pwm1_enable, reset is a no-op
        hw.reset_fan_group_to_default(&devices[1], 0).unwrap();

        assert!(matches!(
            hw.set_fan_speed(&devices[0], 2, 40),
            Err(FanControlError::Hardware(_))
        ));
    }

    #[test]
    fn test_unreadable_temperature() {
        let root = fake_drm_tree();
        let hw = HwmonTelemetry::discover(root.path()).unwrap();
        let devices = hw.enumerate_devices().unwrap();
        fs::write(root.path().join("card0/device/hwmon/hwmon3/temp1_input"), "n/a").unwrap();

        assert!(matches!(
            hw.temperature(&devices[0]),
            Err(FanControlError::TelemetryRead { device: 0, .. })
        ));
    }

    #[test]
    fn test_removed_device_is_lost() {
        let root = fake_drm_tree();
        let hw = HwmonTelemetry::discover(root.path()).unwrap();
        let devices = hw.enumerate_devices().unwrap();
        fs::remove_dir_all(root.path().join("card2")).unwrap();

        assert!(matches!(
            hw.temperature(&devices[1]),
            Err(FanControlError::DeviceLost { device: 1 })
        ));
    }
}
