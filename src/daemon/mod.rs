//! Fan control loop: sample, act, sleep, and restore the firmware policy on exit

use crate::{
    curve::{Breakpoint, SpeedCurve},
    device::{AppliedChange, DeviceController},
    errors::{FanControlError, Result},
    events::{ControlEvent, EventSink},
    telemetry::{DeviceHandle, FanTelemetry},
};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Lifecycle of a [`ControlLoop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    Draining,
    Terminated,
}

/// A device paired with the breakpoints its curve is built from
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub handle: DeviceHandle,
    pub breakpoints: Vec<Breakpoint>,
}

/// A device that could not be handed back to the firmware policy
#[derive(Debug)]
pub struct RestoreFailure {
    pub device_index: u32,
    pub device_name: String,
    pub error: FanControlError,
}

/// How the control loop ended
#[derive(Debug)]
pub enum ExitOutcome {
    /// Stopped on request and every device was restored
    NormalShutdown,
    /// Stopped on request but some devices could not be restored
    ShutdownWithRestoreErrors(Vec<RestoreFailure>),
    /// A device failed in a way that cannot be retried; all devices were still drained
    AbortedOnDeviceError {
        error: FanControlError,
        restore_errors: Vec<RestoreFailure>,
    },
    /// Setup failed before any device was touched
    FatalStartupError(FanControlError),
}

impl ExitOutcome {
    /// True when every device is back under firmware control
    pub fn restored_all(&self) -> bool {
        match self {
            ExitOutcome::NormalShutdown | ExitOutcome::FatalStartupError(_) => true,
            ExitOutcome::ShutdownWithRestoreErrors(_) => false,
            ExitOutcome::AbortedOnDeviceError { restore_errors, .. } => restore_errors.is_empty(),
        }
    }

    /// Process exit status
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitOutcome::NormalShutdown => 0,
            ExitOutcome::ShutdownWithRestoreErrors(_) | ExitOutcome::AbortedOnDeviceError { .. } => 1,
            ExitOutcome::FatalStartupError(_) => 2,
        }
    }
}

/// Polls every registered device at a fixed interval.
///
/// Devices are visited one after another in registration order. Once
/// constructed, the loop owns the obligation to restore every device: it is
/// discharged by [`ControlLoop::drain`], and dropping an undrained loop (for
/// instance while unwinding from a panic) drains it.
pub struct ControlLoop<'a, T: FanTelemetry + ?Sized, S: EventSink + ?Sized> {
    hw: &'a T,
    sink: &'a S,
    controllers: Vec<DeviceController>,
    interval: Duration,
    state: LoopState,
}

impl<'a, T: FanTelemetry + ?Sized, S: EventSink + ?Sized> ControlLoop<'a, T, S> {
    /// Build a controller per device. Any invalid curve fails the whole setup.
    pub fn initialize(
        hw: &'a T,
        sink: &'a S,
        registrations: Vec<DeviceRegistration>,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(FanControlError::Config(
                "control interval must be greater than zero".to_string(),
            ));
        }

        let controllers = registrations
            .into_iter()
            .map(|registration| {
                SpeedCurve::new(registration.breakpoints)
                    .map(|curve| DeviceController::new(registration.handle, curve))
            })
            .collect::<Result<Vec<_>>>()?;

        for controller in &controllers {
            sink.emit(ControlEvent::DeviceRegistered {
                device: controller.handle(),
                breakpoints: controller.curve().points(),
            });
        }

        Ok(Self {
            hw,
            sink,
            controllers,
            interval,
            state: LoopState::Initializing,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn controllers(&self) -> &[DeviceController] {
        &self.controllers
    }

    /// Evaluate every device once.
    ///
    /// Read and write failures are reported and the device is skipped until the
    /// next tick. Any other device error stops the tick and is returned.
    pub fn tick(&mut self) -> Result<Vec<AppliedChange>> {
        if self.state == LoopState::Initializing {
            self.state = LoopState::Running;
        }

        let mut applied = Vec::new();
        for controller in &self.controllers {
            let index = controller.index();
            let name = controller.name();

            match controller.evaluate_and_apply(self.hw) {
                Ok(Some(change)) => {
                    self.sink.emit(ControlEvent::SpeedApplied(&change));
                    applied.push(change);
                }
                Ok(None) => {}
                Err(error) if !error.is_recoverable() => {
                    self.sink.emit(ControlEvent::DeviceFailed {
                        index,
                        name,
                        error: &error,
                    });
                    return Err(error);
                }
                Err(error @ FanControlError::ActuationWrite { .. }) => {
                    self.sink.emit(ControlEvent::WriteFailed {
                        index,
                        name,
                        error: &error,
                    })
                }
                Err(error) => self.sink.emit(ControlEvent::ReadFailed {
                    index,
                    name,
                    error: &error,
                }),
            }
        }
        Ok(applied)
    }

    /// Restore the firmware policy on every device, in registration order.
    ///
    /// Runs at most once per loop; later calls return no failures and touch nothing.
    pub fn drain(&mut self) -> Vec<RestoreFailure> {
        if matches!(self.state, LoopState::Draining | LoopState::Terminated) {
            return Vec::new();
        }
        self.state = LoopState::Draining;
        self.sink.emit(ControlEvent::RestoreStarted {
            devices: self.controllers.len(),
        });

        let mut failures = Vec::new();
        for controller in &self.controllers {
            if let Err(error) = controller.restore_default(self.hw) {
                self.sink.emit(ControlEvent::RestoreFailed {
                    index: controller.index(),
                    name: controller.name(),
                    error: &error,
                });
                failures.push(RestoreFailure {
                    device_index: controller.index(),
                    device_name: controller.name().to_string(),
                    error,
                });
            }
        }

        self.sink.emit(ControlEvent::RestoreFinished {
            devices: self.controllers.len(),
            failures: failures.len(),
        });
        self.state = LoopState::Terminated;
        failures
    }

    /// Tick until `shutdown` resolves or a device fails for good, then drain.
    ///
    /// `shutdown` is only observed while sleeping between ticks, so a tick that
    /// has started always finishes. A slow tick delays the next one; missed
    /// intervals are not made up.
    pub async fn run<F>(mut self, shutdown: F) -> ExitOutcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let abort = loop {
            if let Err(error) = self.tick() {
                break Some(error);
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.sink.emit(ControlEvent::ShutdownRequested);
                    break None;
                }
                _ = sleep(self.interval) => {}
            }
        };

        let restore_errors = self.drain();
        match abort {
            Some(error) => ExitOutcome::AbortedOnDeviceError {
                error,
                restore_errors,
            },
            None if restore_errors.is_empty() => ExitOutcome::NormalShutdown,
            None => ExitOutcome::ShutdownWithRestoreErrors(restore_errors),
        }
    }
}

impl<T: FanTelemetry + ?Sized, S: EventSink + ?Sized> Drop for ControlLoop<'_, T, S> {
    fn drop(&mut self) {
        self.drain();
    }
}

/// Set up the devices, run until `shutdown` resolves, and hand every device back
/// to the firmware policy.
pub async fn run_control_loop<T, S, F>(
    hw: &T,
    registrations: Vec<DeviceRegistration>,
    interval: Duration,
    sink: &S,
    shutdown: F,
) -> ExitOutcome
where
    T: FanTelemetry + ?Sized,
    S: EventSink + ?Sized,
    F: Future<Output = ()>,
{
    match ControlLoop::initialize(hw, sink, registrations, interval) {
        Ok(control) => control.run(shutdown).await,
        Err(error) => ExitOutcome::FatalStartupError(error),
    }
}

/// Install the Ctrl-C and SIGTERM handlers and return a future that resolves
/// when either arrives.
///
/// The handlers exist from the moment this returns, not from the first poll, so
/// call it before any device is switched to manual control. Until then those
/// signals end the process without unwinding and nothing gets restored.
#[cfg(unix)]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => log::info!("Received Ctrl-C"),
            _ = terminate.recv() => log::info!("Received SIGTERM"),
        }
    })
}

/// Install the Ctrl-C handler and return a future that resolves when it fires
#[cfg(windows)]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;

    Ok(async move {
        ctrl_c.recv().await;
        log::info!("Received Ctrl-C");
    })
}
