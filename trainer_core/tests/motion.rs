use std::sync::Arc;

use trainer_core::config::{EnableCfg, HomingCfg, MotionCfg};
use trainer_core::mocks::{CountingStepper, OpenLimitSwitch};
use trainer_core::motion::{HomingOutcome, HomingPhase, MotionController, MotionState, MotionTick};
use trainer_hardware::sim::{SimLimitSwitch, SimRig, SimStepper};
use trainer_traits::clock::test_clock::TestClock;
use trainer_traits::{LimitSwitch, StepperDriver};

fn counting(clock: &TestClock) -> MotionController<CountingStepper, OpenLimitSwitch> {
    MotionController::new(
        CountingStepper::default(),
        OpenLimitSwitch,
        MotionCfg::default(),
        EnableCfg::default(),
        HomingCfg::default(),
        Arc::new(clock.clone()),
    )
}

fn on_rig(rig: &SimRig, clock: &TestClock) -> MotionController<SimStepper, SimLimitSwitch> {
    MotionController::new(
        rig.stepper(),
        rig.limit_switch(),
        MotionCfg::default(),
        EnableCfg::default(),
        HomingCfg::default(),
        Arc::new(clock.clone()),
    )
}

/// Call `update` every `step_us` for `ms`, returning the last tick.
fn drive<D: StepperDriver, L: LimitSwitch>(
    mc: &mut MotionController<D, L>,
    clock: &TestClock,
    speed: f64,
    ms: u64,
    step_us: u64,
) -> MotionTick {
    let mut last = mc.update(speed).unwrap();
    let mut t = step_us;
    while t < ms * 1000 {
        clock.advance_us(step_us);
        last = mc.update(speed).unwrap();
        t += step_us;
    }
    clock.advance_us(step_us);
    last
}

fn pulses(mc: &MotionController<CountingStepper, OpenLimitSwitch>) -> u64 {
    mc.driver().pulses
}

// ── enable lifecycle ─────────────────────────────────────────────────────────

#[test]
fn starts_disabled() {
    let clock = TestClock::new();
    let mc = counting(&clock);
    assert_eq!(mc.state(), MotionState::Disabled);
    assert!(!mc.is_homed());
}

#[test]
fn speed_enable_has_hysteresis() {
    let clock = TestClock::new();
    let mut mc = counting(&clock);
    mc.set_target(1000);

    drive(&mut mc, &clock, 0.0, 10, 250);
    assert!(!mc.is_enabled());
    drive(&mut mc, &clock, 2.1, 1000, 250);
    assert!(!mc.is_enabled(), "2.1 mph is inside the hysteresis band");
    let before = pulses(&mc);
    assert_eq!(before, 0);

    drive(&mut mc, &clock, 2.4, 10, 250);
    assert!(mc.is_enabled());
    drive(&mut mc, &clock, 1.9, 700, 250);
    assert!(mc.is_enabled(), "holdoff not yet elapsed");
    drive(&mut mc, &clock, 1.9, 150, 250);
    assert!(!mc.is_enabled());

    let parked = pulses(&mc);
    drive(&mut mc, &clock, 2.2, 500, 250);
    assert!(!mc.is_enabled());
    assert_eq!(pulses(&mc), parked, "no pulses while disabled");
    drive(&mut mc, &clock, 2.35, 5, 250);
    assert!(mc.is_enabled());
}

#[test]
fn short_dips_below_threshold_do_not_disable() {
    let clock = TestClock::new();
    let mut mc = counting(&clock);
    mc.set_target(1000);
    drive(&mut mc, &clock, 5.0, 10, 250);
    for _ in 0..3 {
        drive(&mut mc, &clock, 1.9, 500, 250);
        drive(&mut mc, &clock, 2.1, 10, 250);
    }
    assert!(mc.is_enabled());
}

#[test]
fn settled_motor_idles_after_timeout() {
    let clock = TestClock::new();
    let mut mc = counting(&clock);
    mc.set_target(3);
    drive(&mut mc, &clock, 10.0, 1400, 250);
    assert!(mc.is_enabled());
    assert_eq!(mc.logical_position(), 3);
    drive(&mut mc, &clock, 10.0, 200, 250);
    assert!(!mc.is_enabled());
    assert_eq!(mc.state(), MotionState::Disabled);

    // Small error stays idle, large error wakes it.
    mc.set_target(8);
    drive(&mut mc, &clock, 10.0, 100, 250);
    assert!(!mc.is_enabled());
    mc.set_target(20);
    drive(&mut mc, &clock, 10.0, 1, 250);
    assert!(mc.is_enabled());
}

#[test]
fn error_excursion_restarts_idle_timer() {
    let clock = TestClock::new();
    let mut mc = counting(&clock);
    mc.set_target(3);
    drive(&mut mc, &clock, 10.0, 1000, 250);
    mc.set_target(60);
    drive(&mut mc, &clock, 10.0, 600, 250);
    assert_eq!(mc.logical_position(), 60);
    drive(&mut mc, &clock, 10.0, 1000, 250);
    assert!(mc.is_enabled(), "timer restarted when the error grew");
    drive(&mut mc, &clock, 10.0, 500, 250);
    assert!(!mc.is_enabled());
}

// ── ramped stepping ──────────────────────────────────────────────────────────

#[test]
fn ramp_starts_slow_and_reaches_run_speed() {
    let clock = TestClock::new();
    let mut mc = counting(&clock);
    mc.set_target(1000);
    drive(&mut mc, &clock, 10.0, 20, 100);
    let first = pulses(&mc);
    assert!((10..25).contains(&first), "first 20 ms: {first}");

    drive(&mut mc, &clock, 10.0, 400, 100);
    let p0 = pulses(&mc);
    drive(&mut mc, &clock, 10.0, 20, 100);
    let window = pulses(&mc) - p0;
    assert!((45..=51).contains(&window), "20 ms at run speed: {window}");
}

#[test]
fn reversal_resets_ramp() {
    let clock = TestClock::new();
    let mut mc = counting(&clock);
    mc.set_target(1000);
    drive(&mut mc, &clock, 10.0, 1500, 100);
    assert!(mc.logical_position() > 400);
    mc.set_target(0);
    let p0 = pulses(&mc);
    drive(&mut mc, &clock, 10.0, 20, 100);
    let window = pulses(&mc) - p0;
    assert!(window < 25, "pulses right after reversal: {window}");
}

#[test]
fn slow_zone_caps_speed_near_target() {
    let clock = TestClock::new();
    let mut mc = counting(&clock);
    mc.set_target(1000);
    let mut guard = 0;
    while mc.logical_position() < 850 {
        drive(&mut mc, &clock, 10.0, 10, 100);
        guard += 1;
        assert!(guard < 1000);
    }
    let p0 = pulses(&mc);
    drive(&mut mc, &clock, 10.0, 20, 100);
    let window = pulses(&mc) - p0;
    assert!((15..=21).contains(&window), "slow zone window: {window}");
}

#[test]
fn never_steps_past_travel_limits() {
    let clock = TestClock::new();
    let mut mc = counting(&clock);
    mc.set_target(5000);
    assert_eq!(mc.target(), 1000);
    drive(&mut mc, &clock, 10.0, 6000, 250);
    assert_eq!(mc.logical_position(), 1000);
    assert_eq!(mc.physical_position(), 6960);
    assert_eq!(pulses(&mc), 6960);
}

// ── homing ───────────────────────────────────────────────────────────────────

#[test]
fn homes_from_open_switch() {
    let clock = TestClock::new();
    let rig = SimRig::new(3000);
    let mut mc = on_rig(&rig, &clock);
    assert_eq!(mc.home().unwrap(), HomingOutcome::Homed);
    assert!(mc.is_homed());
    assert_eq!(mc.logical_position(), 0);
    assert_eq!(mc.physical_position(), 0);
    assert_eq!(mc.target(), 0);
    assert!(!rig.switch_pressed(), "zero point must not rest on the switch");
    let c = rig.carriage();
    assert!((80..=100).contains(&c), "carriage at {c}");
}

#[test]
fn homes_when_switch_already_pressed() {
    let clock = TestClock::new();
    let rig = SimRig::new(-20);
    let mut mc = on_rig(&rig, &clock);
    mc.begin_homing().unwrap();
    let mut phases = Vec::new();
    let outcome = loop {
        let tick = mc.update(0.0).unwrap();
        if let Some(o) = tick.homing {
            break o;
        }
        if let Some(p) = mc.homing_phase() {
            if phases.last() != Some(&p) {
                phases.push(p);
            }
        }
        clock.advance_us(250);
        assert!(clock.elapsed().as_secs() < 15);
    };
    assert_eq!(outcome, HomingOutcome::Homed);
    assert_eq!(
        phases,
        vec![
            HomingPhase::Settle,
            HomingPhase::BackOff,
            HomingPhase::Seek,
            HomingPhase::Release
        ]
    );
    assert!((80..=100).contains(&rig.carriage()));
}

#[test]
fn homing_timeout_leaves_controller_unhomed_and_stationary() {
    let clock = TestClock::new();
    let rig = SimRig::new(3000);
    rig.force_switch(Some(false));
    let mut mc = on_rig(&rig, &clock);
    let outcome = mc.home().unwrap();
    assert_eq!(
        outcome,
        HomingOutcome::TimedOut {
            phase: HomingPhase::Seek
        }
    );
    let elapsed = clock.elapsed().as_millis();
    assert!((10_000..10_500).contains(&elapsed), "took {elapsed} ms");
    assert!(!mc.is_homed());
    assert!(mc.homing_failed());
    assert!(!mc.rehome_pending());
    assert_eq!(mc.target(), mc.logical_position());

    // The loop keeps running in the degraded state.
    let tick = mc.update(0.0).unwrap();
    assert_eq!(tick.state, MotionState::Disabled);
}

// ── limit fault ──────────────────────────────────────────────────────────────

fn homed_rig(start: i32) -> (SimRig, TestClock, MotionController<SimStepper, SimLimitSwitch>) {
    let clock = TestClock::new();
    let rig = SimRig::new(start);
    let mut mc = on_rig(&rig, &clock);
    assert_eq!(mc.home().unwrap(), HomingOutcome::Homed);
    (rig, clock, mc)
}

fn finish_homing(
    mc: &mut MotionController<SimStepper, SimLimitSwitch>,
    clock: &TestClock,
) -> HomingOutcome {
    let deadline = clock.elapsed().as_secs() + 15;
    loop {
        let tick = mc.update(10.0).unwrap();
        if let Some(o) = tick.homing {
            return o;
        }
        clock.advance_us(250);
        assert!(clock.elapsed().as_secs() < deadline, "homing did not finish");
    }
}

#[test]
fn limit_contact_freezes_target_and_rehomes() {
    let (rig, clock, mut mc) = homed_rig(500);
    mc.set_target(300);
    drive(&mut mc, &clock, 10.0, 2500, 250);
    assert_eq!(mc.logical_position(), 300);

    rig.force_switch(Some(true));
    drive(&mut mc, &clock, 10.0, 20, 250);
    assert!(mc.is_homing());
    assert_eq!(mc.target(), 300);
    mc.set_target(900);
    assert_eq!(mc.target(), 300, "targets are ignored while rehoming");

    rig.force_switch(None);
    assert_eq!(finish_homing(&mut mc, &clock), HomingOutcome::Homed);
    assert_eq!(mc.logical_position(), 0);
    assert!(!mc.rehome_pending());
    mc.set_target(900);
    assert_eq!(mc.target(), 900);
}

#[test]
fn rehome_requests_are_rate_limited() {
    let (rig, clock, mut mc) = homed_rig(200);

    rig.force_switch(Some(true));
    drive(&mut mc, &clock, 10.0, 20, 250);
    assert!(mc.is_homing());
    rig.force_switch(None);
    assert_eq!(finish_homing(&mut mc, &clock), HomingOutcome::Homed);

    // Second contact inside the cooldown: frozen, but no new homing run.
    rig.force_switch(Some(true));
    let tick = drive(&mut mc, &clock, 10.0, 20, 250);
    assert_eq!(tick.state, MotionState::RehomeFault);
    assert!(!mc.is_homing());
    assert!(!mc.rehome_pending());

    // Still pressed once the cooldown has passed: a rehome starts.
    drive(&mut mc, &clock, 10.0, 2000, 250);
    assert!(mc.is_homing() || mc.rehome_pending());
}

#[test]
fn external_rehome_request_starts_homing() {
    let (_rig, clock, mut mc) = homed_rig(300);
    let handle = mc.rehome_handle();
    handle.request("operator");
    assert!(handle.is_pending());
    let tick = drive(&mut mc, &clock, 0.0, 1, 250);
    assert_eq!(tick.state, MotionState::Homing);
    assert!(mc.is_enabled(), "homing forces the driver on");
    assert_eq!(finish_homing(&mut mc, &clock), HomingOutcome::Homed);
    assert!(!handle.is_pending());
}
