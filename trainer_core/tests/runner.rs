use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use rstest::rstest;
use trainer_core::mocks::{CountingStepper, OpenLimitSwitch};
use trainer_core::runner::run_for;
use trainer_core::{TrainerCore, TrainerSettings, build_trainer};
use trainer_traits::clock::test_clock::TestClock;
use trainer_traits::{HwResult, StepperDriver};

/// Driver whose pulse output is broken.
#[derive(Default)]
struct DeadPulseStepper;

impl StepperDriver for DeadPulseStepper {
    fn set_enabled(&mut self, _enabled: bool) -> HwResult<()> {
        Ok(())
    }
    fn set_direction(&mut self, _away: bool) -> HwResult<()> {
        Ok(())
    }
    fn pulse(&mut self) -> HwResult<()> {
        Err("step line stuck".into())
    }
}

fn core<D: StepperDriver>(stepper: D, clock: &TestClock) -> TrainerCore<D, OpenLimitSwitch> {
    build_trainer(
        stepper,
        OpenLimitSwitch,
        TrainerSettings::default(),
        None,
        None,
        Some(Arc::new(clock.clone())),
    )
    .expect("build core")
}

#[rstest]
fn runs_for_the_requested_time_and_disables_on_exit() {
    let clock = TestClock::new();
    let mut core = core(CountingStepper::default(), &clock);
    let summary = run_for(&mut core, &AtomicBool::new(false), Some(Duration::from_millis(500)))
        .expect("run");
    // One iteration per 250 us of simulated time.
    assert!((1990..=2001).contains(&summary.iterations), "{summary:?}");
    assert_eq!(summary.step_errors, 0);
    assert!(summary.elapsed_ms >= 500);
    assert!(!core.motion().is_homing(), "shutdown aborts homing");
    assert!(!core.motion().is_enabled());
    assert!(!core.motion().driver().enabled);
}

#[rstest]
fn preset_shutdown_runs_no_iterations() {
    let clock = TestClock::new();
    let mut core = core(CountingStepper::default(), &clock);
    let summary = run_for(&mut core, &AtomicBool::new(true), None).expect("run");
    assert_eq!(summary.iterations, 0);
}

#[rstest]
fn step_errors_are_counted_not_fatal() {
    let clock = TestClock::new();
    let mut core = core(DeadPulseStepper, &clock);
    let summary = run_for(&mut core, &AtomicBool::new(false), Some(Duration::from_millis(200)))
        .expect("loop survives hardware errors");
    assert!(summary.step_errors > 0);
    assert!(summary.iterations > summary.step_errors, "{summary:?}");
}
