//! Fan speed profile files
//!
//! A profile maps temperatures to fan speed percentages. The file is JSON and
//! takes one of two shapes:
//!
//! ```json
//! {"30": 30, "40": 50, "50": 80, "60": 100}
//! ```
//!
//! which applies to every device, or
//!
//! ```json
//! {"default": {"30": 30, "60": 100}, "devices": {"1": {"40": 40, "70": 100}}}
//! ```
//!
//! which overrides the curve for individual devices by index.

use crate::curve::{Breakpoint, SpeedCurve};
use crate::errors::{FanControlError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Highest speed a profile may ask for
pub const MAX_SPEED_PERCENT: u32 = 100;

type SetPoints = BTreeMap<String, u32>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ProfileFile {
    PerDevice {
        default: SetPoints,
        #[serde(default)]
        devices: BTreeMap<String, SetPoints>,
    },
    Flat(SetPoints),
}

/// Validated fan speed profile
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    default: Vec<Breakpoint>,
    devices: BTreeMap<u32, Vec<Breakpoint>>,
}

impl Profile {
    /// Profile used when none exists yet
    pub fn builtin() -> Self {
        Self {
            default: vec![
                Breakpoint::new(30.0, 30),
                Breakpoint::new(40.0, 50),
                Breakpoint::new(50.0, 80),
                Breakpoint::new(60.0, 100),
            ],
            devices: BTreeMap::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: ProfileFile = serde_json::from_str(json)?;
        let (default, overrides) = match file {
            ProfileFile::PerDevice { default, devices } => (default, devices),
            ProfileFile::Flat(points) => (points, BTreeMap::new()),
        };

        let default = parse_set_points(&default)?;
        let mut devices = BTreeMap::new();
        for (key, points) in &overrides {
            let index: u32 = key.trim().parse().map_err(|_| {
                FanControlError::Config(format!("invalid device index {:?} in profile", key))
            })?;
            devices.insert(index, parse_set_points(points)?);
        }

        Ok(Self { default, devices })
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            FanControlError::Config(format!("cannot read profile {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Load `path`, writing the built-in profile there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No profile at {}, writing the built-in one", path.display());
            Self::builtin().save_to_file(path)?;
        }
        Self::load_from_file(path)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = ProfileFile::PerDevice {
            default: to_set_points(&self.default),
            devices: self
                .devices
                .iter()
                .map(|(index, points)| (index.to_string(), to_set_points(points)))
                .collect(),
        };
        let file = match file {
            ProfileFile::PerDevice { default, devices } if devices.is_empty() => {
                ProfileFile::Flat(default)
            }
            other => other,
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Breakpoints for devices without their own curve
    pub fn default_breakpoints(&self) -> &[Breakpoint] {
        &self.default
    }

    /// Breakpoints for the device at `index`
    pub fn breakpoints_for(&self, index: u32) -> &[Breakpoint] {
        self.devices.get(&index).unwrap_or(&self.default)
    }

    /// Device indexes with their own curve
    pub fn overridden_devices(&self) -> impl Iterator<Item = u32> + '_ {
        self.devices.keys().copied()
    }

    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home)
            .join(".config")
            .join(crate::APP_NAME)
            .join("profiles")
            .join("default.json")
    }
}

fn parse_set_points(points: &SetPoints) -> Result<Vec<Breakpoint>> {
    let mut breakpoints = Vec::with_capacity(points.len());
    for (key, &speed) in points {
        let temperature: f64 = key.trim().parse().map_err(|_| {
            FanControlError::Config(format!("invalid temperature {:?} in profile", key))
        })?;
        if !temperature.is_finite() || speed > MAX_SPEED_PERCENT {
            return Err(FanControlError::InvalidBreakpoint { temperature, speed });
        }
        breakpoints.push(Breakpoint::new(temperature, speed));
    }

    // Catches empty sets and keys like "40" and "40.0" naming the same temperature
    let curve = SpeedCurve::new(breakpoints)?;
    Ok(curve.points().to_vec())
}

fn to_set_points(points: &[Breakpoint]) -> SetPoints {
    points
        .iter()
        .map(|p| (p.temperature.to_string(), p.speed))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_profile() {
        let profile = Profile::from_json(r#"{"60": 100, "30": 30, "50": 80, "40": 50}"#).unwrap();
        assert_eq!(profile.breakpoints_for(0), Profile::builtin().breakpoints_for(0));
        assert_eq!(profile.breakpoints_for(7), profile.breakpoints_for(0));
        assert_eq!(profile.overridden_devices().count(), 0);
    }

    #[test]
    fn test_per_device_profile() {
        let profile = Profile::from_json(
            r#"{"default": {"30": 30, "60": 100}, "devices": {"1": {"45.5": 40, "70": 100}}}"#,
        )
        .unwrap();

        assert_eq!(
            profile.breakpoints_for(0),
            &[Breakpoint::new(30.0, 30), Breakpoint::new(60.0, 100)]
        );
        assert_eq!(
            profile.breakpoints_for(1),
            &[Breakpoint::new(45.5, 40), Breakpoint::new(70.0, 100)]
        );
        assert_eq!(profile.overridden_devices().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_rejects_bad_profiles() {
        assert!(matches!(
            Profile::from_json("{}"),
            Err(FanControlError::EmptyCurve)
        ));
        assert!(matches!(
            Profile::from_json(r#"{"hot": 100}"#),
            Err(FanControlError::Config(_))
        ));
        assert!(matches!(
            Profile::from_json(r#"{"40": 50, "40.0": 60}"#),
            Err(FanControlError::DuplicateTemperature { .. })
        ));
        assert!(matches!(
            Profile::from_json(r#"{"40": 150}"#),
            Err(FanControlError::InvalidBreakpoint { speed: 150, .. })
        ));
        assert!(matches!(
            Profile::from_json(r#"{"default": {"40": 50}, "devices": {"gpu": {"40": 50}}}"#),
            Err(FanControlError::Config(_))
        ));
        assert!(matches!(
            Profile::from_json("[1, 2]"),
            Err(FanControlError::Serialization(_))
        ));
    }

    #[test]
    fn test_load_or_create_writes_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles").join("default.json");

        let created = Profile::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, Profile::builtin());

        fs::write(&path, r#"{"20": 25}"#).unwrap();
        let loaded = Profile::load_or_create(&path).unwrap();
        assert_eq!(loaded.breakpoints_for(0), &[Breakpoint::new(20.0, 25)]);
    }

    #[test]
    fn test_save_and_load_per_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpu.json");
        let profile = Profile::from_json(
            r#"{"default": {"30": 30, "60": 100}, "devices": {"2": {"50": 60}}}"#,
        )
        .unwrap();

        profile.save_to_file(&path).unwrap();
        assert_eq!(Profile::load_from_file(&path).unwrap(), profile);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Profile::load_from_file(&dir.path().join("nope.json")),
            Err(FanControlError::Config(_))
        ));
    }
}
