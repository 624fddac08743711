//! Error types for the GPU fan curve daemon

use thiserror::Error;

/// Result type alias for the GPU fan curve daemon
pub type Result<T> = std::result::Result<T, FanControlError>;

/// Main error type for the GPU fan curve daemon
#[derive(Error, Debug)]
pub enum FanControlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Speed curve has no breakpoints")]
    EmptyCurve,

    #[error("Speed curve has more than one breakpoint at {temperature}°C")]
    DuplicateTemperature { temperature: f64 },

    #[error("Invalid breakpoint: temperature {temperature}°C, speed {speed}%")]
    InvalidBreakpoint { temperature: f64, speed: u32 },

    #[error("Device {device}: failed to read telemetry: {reason}")]
    TelemetryRead { device: u32, reason: String },

    #[error("Device {device}: failed to set fan group {group}: {reason}")]
    ActuationWrite {
        device: u32,
        group: u32,
        reason: String,
    },

    #[error("Device {device}: failed to restore default fan policy: {reason}")]
    Restore { device: u32, reason: String },

    #[error("Device {device} is no longer present")]
    DeviceLost { device: u32 },

    #[error("Hardware error: {0}")]
    Hardware(String),
}

impl FanControlError {
    /// True for the startup configuration errors that abort before any device is touched.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            FanControlError::Config(_)
                | FanControlError::EmptyCurve
                | FanControlError::DuplicateTemperature { .. }
                | FanControlError::InvalidBreakpoint { .. }
        )
    }

    /// Whether a failure during a tick can be retried on the next tick.
    ///
    /// Read and write failures are isolated to one device for one tick. A device
    /// that vanished, or an error of any other kind, ends the loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FanControlError::TelemetryRead { .. }
                | FanControlError::ActuationWrite { .. }
                | FanControlError::Io(_)
                | FanControlError::Hardware(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(FanControlError::EmptyCurve.is_config());
        assert!(FanControlError::DuplicateTemperature { temperature: 40.0 }.is_config());
        assert!(!FanControlError::DeviceLost { device: 0 }.is_config());

        let read = FanControlError::TelemetryRead {
            device: 0,
            reason: "busy".to_string(),
        };
        assert!(read.is_recoverable());
        assert!(!FanControlError::DeviceLost { device: 1 }.is_recoverable());
        assert!(!FanControlError::EmptyCurve.is_recoverable());
    }

    #[test]
    fn test_error_messages_name_the_device() {
        let err = FanControlError::ActuationWrite {
            device: 2,
            group: 1,
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Device 2: failed to set fan group 1: permission denied"
        );
    }
}
