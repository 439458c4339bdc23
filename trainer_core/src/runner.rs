//! Drives `TrainerCore::step()` until asked to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use trainer_traits::{LimitSwitch, StepperDriver};

use crate::core::TrainerCore;
use crate::error::Result;

/// After the first error of a streak, only every Nth one is logged.
const ERROR_LOG_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub step_errors: u64,
    pub elapsed_ms: u64,
}

/// Run until `shutdown` is set.
pub fn run<D, L>(core: &mut TrainerCore<D, L>, shutdown: &AtomicBool) -> Result<RunSummary>
where
    D: StepperDriver,
    L: LimitSwitch,
{
    run_for(core, shutdown, None)
}

/// Run until `shutdown` is set or `max` has elapsed on the core's clock.
///
/// Step errors are logged and counted, never propagated: the loop keeps
/// running. The actuator is disabled on exit.
pub fn run_for<D, L>(
    core: &mut TrainerCore<D, L>,
    shutdown: &AtomicBool,
    max: Option<Duration>,
) -> Result<RunSummary>
where
    D: StepperDriver,
    L: LimitSwitch,
{
    let clock = core.clock().clone();
    let start = clock.now();
    let pace = Duration::from_micros(core.control_cfg().loop_us);
    let limit_ms = max.map(|d| d.as_millis() as u64);
    let mut summary = RunSummary::default();
    let mut streak = 0u64;

    core.begin().wrap_err("starting control loop")?;
    tracing::info!(loop_us = core.control_cfg().loop_us, "control loop started");

    while !shutdown.load(Ordering::Relaxed) {
        let elapsed = clock.ms_since(start);
        if limit_ms.is_some_and(|l| elapsed >= l) {
            break;
        }
        match core.step() {
            Ok(_) => streak = 0,
            Err(e) => {
                summary.step_errors += 1;
                if streak % ERROR_LOG_EVERY == 0 {
                    tracing::warn!(error = %format!("{e:#}"), streak, "control step failed");
                }
                streak += 1;
            }
        }
        summary.iterations += 1;
        clock.sleep(pace);
    }

    summary.elapsed_ms = clock.ms_since(start);
    tracing::info!(
        iterations = summary.iterations,
        errors = summary.step_errors,
        elapsed_ms = summary.elapsed_ms,
        "control loop stopped"
    );
    core.shutdown().wrap_err("disabling actuator")?;
    Ok(summary)
}
