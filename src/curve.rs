//! Temperature to fan speed curve

use crate::errors::{FanControlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One point on a fan curve: at `temperature` °C the fans run at `speed` percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub temperature: f64,
    pub speed: u32,
}

impl Breakpoint {
    pub fn new(temperature: f64, speed: u32) -> Self {
        Self { temperature, speed }
    }
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°C -> {}%", self.temperature, self.speed)
    }
}

/// Piecewise-linear mapping from temperature to fan speed.
///
/// Breakpoints are sorted by temperature once at construction and never change
/// afterwards. Below the first breakpoint the curve holds the first speed, above
/// the last it holds the last speed.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedCurve {
    points: Vec<Breakpoint>,
}

impl SpeedCurve {
    /// Build a curve from breakpoints in any order.
    ///
    /// Fails when there are no breakpoints, when a temperature is not finite, or
    /// when two breakpoints share a temperature.
    pub fn new(mut points: Vec<Breakpoint>) -> Result<Self> {
        if points.is_empty() {
            return Err(FanControlError::EmptyCurve);
        }

        if let Some(bad) = points.iter().find(|p| !p.temperature.is_finite()) {
            return Err(FanControlError::InvalidBreakpoint {
                temperature: bad.temperature,
                speed: bad.speed,
            });
        }

        points.sort_by(|a, b| a.temperature.total_cmp(&b.temperature));

        if let Some(pair) = points
            .windows(2)
            .find(|pair| pair[0].temperature == pair[1].temperature)
        {
            return Err(FanControlError::DuplicateTemperature {
                temperature: pair[0].temperature,
            });
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[Breakpoint] {
        &self.points
    }

    /// Calculate fan speed percentage for a given temperature using linear interpolation.
    ///
    /// A temperature equal to a breakpoint belongs to the bracket to its right, so
    /// an exact hit on an interior breakpoint interpolates from that breakpoint.
    /// The interpolated value is truncated toward zero.
    pub fn interpolate(&self, temperature: f64) -> u32 {
        let idx = self.points.partition_point(|p| p.temperature <= temperature);

        if idx == 0 {
            return self.points[0].speed;
        }
        if idx == self.points.len() {
            return self.points[idx - 1].speed;
        }

        let left = &self.points[idx - 1];
        let right = &self.points[idx];
        let slope = (right.speed as f64 - left.speed as f64) / (right.temperature - left.temperature);
        let speed = left.speed as f64 + slope * (temperature - left.temperature);

        speed.trunc() as u32
    }
}
