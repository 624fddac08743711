//! Command line argument parsing for the GPU fan curve daemon

use crate::hwmon::DRM_CLASS_PATH;
use crate::logging;
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

/// GPU Fan Curve Daemon
///
/// Drives GPU fan speed from a temperature curve and restores automatic fan
/// control on exit.
#[derive(Parser, Debug)]
#[command(name = "gpu-fan-curve")]
#[command(about = "GPU fan curve daemon")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log level name (error, warn, info, debug, trace); overrides -v
    #[arg(short, long, global = true, value_parser = parse_log_level)]
    pub log_level: Option<LevelFilter>,

    /// Also write logs to fan_speed.log in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Fan speed profile file
    #[arg(short, long, global = true)]
    pub profile: Option<PathBuf>,

    /// Fan control interval in seconds
    #[arg(short = 'i', long, global = true, default_value = "1", value_parser = parse_interval)]
    pub control_interval: Duration,

    /// How to reach the GPU fans
    #[arg(short, long, global = true, value_enum, default_value_t = Backend::Hwmon)]
    pub backend: Backend,

    /// Root of the DRM class directory to scan for GPUs (hwmon backend)
    #[arg(long, global = true, default_value = DRM_CLASS_PATH)]
    pub sysfs_root: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Fan control backends
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// sysfs hwmon pwm files (amdgpu, radeon, nouveau)
    Hwmon,
    /// NVIDIA Management Library (proprietary NVIDIA driver)
    Nvml,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the fan control loop (default)
    Run,
    /// List controllable GPUs
    List,
    /// Validate the profile and show the resulting speeds
    Check {
        /// Temperatures to evaluate, comma separated
        #[arg(long, value_delimiter = ',')]
        temps: Vec<f64>,
    },
    /// Hand every GPU fan back to automatic control
    Reset,
}

impl Args {
    pub fn level(&self) -> LevelFilter {
        self.log_level
            .unwrap_or_else(|| logging::level_from_verbosity(self.verbose))
    }

    pub fn interval(&self) -> Duration {
        self.control_interval
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

fn parse_log_level(value: &str) -> Result<LevelFilter, String> {
    logging::parse_level(value).ok_or_else(|| format!("unknown log level: {}", value))
}

fn parse_interval(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("not a number: {}", value))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("interval must be a positive number of seconds, got {}", value));
    }
    let interval = Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("interval is out of range: {}", value))?;
    if interval.is_zero() {
        return Err(format!("interval is too small: {}", value));
    }
    Ok(interval)
}
