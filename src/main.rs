//! Main entry point for the GPU fan curve daemon

use anyhow::{bail, Context};
use clap::Parser;
use gpu_fan_curve::{
    args::{Args, Backend, Commands},
    daemon::{self, DeviceRegistration, ExitOutcome},
    hwmon::HwmonTelemetry,
    logging,
    nvml::NvmlTelemetry,
    profile::Profile,
    FanTelemetry, LogSink, SpeedCurve,
};
use log::{error, info, warn};
use std::process::ExitCode;

/// Sample temperatures for `check` when none are given
const CHECK_TEMPERATURES: [f64; 9] = [20.0, 30.0, 40.0, 45.0, 50.0, 55.0, 60.0, 70.0, 80.0];

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::setup(args.level(), args.log_dir.as_deref()) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::from(2);
    }

    info!(
        "gpu-fan-curve v{} (git {} / {}) built {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_HASH").unwrap_or("unknown"),
        option_env!("GIT_DESC").unwrap_or("unknown"),
        option_env!("BUILD_TIME").unwrap_or("unknown")
    );
    log::debug!("{:?}", args);

    let result = match args.command() {
        Commands::Run => run_daemon(&args).await,
        Commands::List => list_devices(&args),
        Commands::Check { temps } => check_profile(&args, &temps),
        Commands::Reset => reset_devices(&args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

fn load_profile(args: &Args) -> anyhow::Result<Profile> {
    match &args.profile {
        Some(path) => Profile::load_from_file(path)
            .with_context(|| format!("invalid profile {}", path.display())),
        None => {
            let path = Profile::default_path();
            Profile::load_or_create(&path)
                .with_context(|| format!("invalid profile {}", path.display()))
        }
    }
}

fn open_backend(args: &Args) -> anyhow::Result<Box<dyn FanTelemetry>> {
    match args.backend {
        Backend::Hwmon => {
            let hw = HwmonTelemetry::discover(&args.sysfs_root)
                .with_context(|| format!("cannot scan {}", args.sysfs_root.display()))?;
            Ok(Box::new(hw))
        }
        Backend::Nvml => {
            let hw = NvmlTelemetry::init()?;
            info!("Driver Version: {}", hw.driver_version()?);
            Ok(Box::new(hw))
        }
    }
}

async fn run_daemon(args: &Args) -> anyhow::Result<u8> {
    // Handlers must exist before any fan is switched to manual control
    let shutdown = daemon::shutdown_signal().context("cannot install signal handlers")?;

    let profile = load_profile(args)?;
    let hw = open_backend(args)?;
    let devices = hw.enumerate_devices().context("cannot enumerate GPUs")?;
    if devices.is_empty() {
        bail!("no GPU with controllable fans found");
    }

    for index in profile.overridden_devices() {
        if !devices.iter().any(|d| d.index == index) {
            warn!("Profile has a curve for device {} which is not present", index);
        }
    }

    let registrations = devices
        .into_iter()
        .map(|handle| DeviceRegistration {
            breakpoints: profile.breakpoints_for(handle.index).to_vec(),
            handle,
        })
        .collect();

    info!("Starting fan control every {:?}", args.interval());
    let outcome =
        daemon::run_control_loop(&*hw, registrations, args.interval(), &LogSink, shutdown).await;

    match &outcome {
        ExitOutcome::NormalShutdown => info!("Fan control stopped, all devices restored"),
        ExitOutcome::ShutdownWithRestoreErrors(failures) => {
            for failure in failures {
                error!(
                    "Device {} ({}) may still be under manual fan control: {}",
                    failure.device_index, failure.device_name, failure.error
                );
            }
        }
        ExitOutcome::AbortedOnDeviceError {
            error,
            restore_errors,
        } => {
            error!("Fan control aborted: {}", error);
            for failure in restore_errors {
                error!(
                    "Device {} ({}) may still be under manual fan control: {}",
                    failure.device_index, failure.device_name, failure.error
                );
            }
        }
        ExitOutcome::FatalStartupError(error) => error!("Fan control did not start: {}", error),
    }

    Ok(outcome.exit_code())
}

fn list_devices(args: &Args) -> anyhow::Result<u8> {
    let hw = open_backend(args)?;
    let devices = hw.enumerate_devices().context("cannot enumerate GPUs")?;
    if devices.is_empty() {
        println!("No GPU with controllable fans found");
        return Ok(0);
    }

    for device in &devices {
        println!("{}", device);
        match (hw.temperature(device), hw.fan_group_speeds(device)) {
            (Ok(temperature), Ok(speeds)) => {
                println!("    temperature: {:.1}°C\tfan groups: {:?}%", temperature, speeds)
            }
            (Err(e), _) | (_, Err(e)) => println!("    unreadable: {}", e),
        }
    }
    Ok(0)
}

fn check_profile(args: &Args, temps: &[f64]) -> anyhow::Result<u8> {
    let profile = load_profile(args)?;
    let temps = if temps.is_empty() {
        &CHECK_TEMPERATURES[..]
    } else {
        temps
    };

    let mut curves = vec![("default".to_string(), profile.default_breakpoints())];
    curves.extend(
        profile
            .overridden_devices()
            .map(|index| (format!("device {}", index), profile.breakpoints_for(index))),
    );

    for (label, points) in curves {
        let curve = SpeedCurve::new(points.to_vec())?;
        let points: Vec<String> = curve.points().iter().map(|p| p.to_string()).collect();
        println!("{}: [{}]", label, points.join(", "));
        for t in temps {
            println!("    {:>6.1}°C -> {:>3}%", t, curve.interpolate(*t));
        }
    }
    Ok(0)
}

fn reset_devices(args: &Args) -> anyhow::Result<u8> {
    let hw = open_backend(args)?;
    let devices = hw.enumerate_devices().context("cannot enumerate GPUs")?;

    let mut failures = 0;
    for device in &devices {
        for group in 0..device.fan_count {
            if let Err(e) = hw.reset_fan_group_to_default(device, group) {
                error!("{}:{}\tfan group {}: {}", device.index, device.name, group, e);
                failures += 1;
            }
        }
    }

    if failures == 0 {
        info!("Reset {} devices to the default fan control policy", devices.len());
        Ok(0)
    } else {
        Ok(1)
    }
}
