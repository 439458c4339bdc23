use std::sync::Arc;

use rstest::rstest;
use trainer_core::mocks::{CountingStepper, OpenLimitSwitch, RecordingTransport};
use trainer_core::{
    AckFrame, Mode, ResultCode, TrainerCore, TrainerSettings, TrainerStatus, build_trainer,
};
use trainer_traits::{ManualControl, Transport};
use trainer_traits::clock::test_clock::TestClock;

type TestCore = TrainerCore<CountingStepper, OpenLimitSwitch>;

fn core_with(transport: Arc<RecordingTransport>, clock: &TestClock) -> TestCore {
    let mut settings = TrainerSettings::default();
    settings.homing.home_on_start = false;
    build_trainer(
        CountingStepper::default(),
        OpenLimitSwitch,
        settings,
        None,
        Some(transport as Arc<dyn Transport + Send + Sync>),
        Some(Arc::new(clock.clone())),
    )
    .expect("build core")
}

fn setup() -> (TestCore, Arc<RecordingTransport>, TestClock) {
    let clock = TestClock::new();
    let rec = Arc::new(RecordingTransport::default());
    let core = core_with(rec.clone(), &clock);
    (core, rec, clock)
}

#[rstest]
fn erg_power_write_is_acknowledged() {
    let (core, rec, _clock) = setup();
    let ack = core.control_point().on_write(&[0x05, 0xB8, 0x0B]);
    assert_eq!(ack.map(AckFrame::to_bytes), Some([0x80, 0x05, 0x01]));
    assert_eq!(rec.acks(), vec![[0x80, 0x05, 0x01]]);
    assert_eq!(core.current_mode(), Mode::Erg);
    assert_eq!(core.telemetry().erg_watts, 3000);
}

#[rstest]
fn simulation_write_sets_grade() {
    let (core, rec, _clock) = setup();
    core.control_point()
        .on_write(&[0x11, 0x00, 0x00, 0x38, 0xFF, 0x00, 0x00]);
    assert_eq!(rec.acks(), vec![[0x80, 0x11, 0x01]]);
    assert_eq!(core.current_mode(), Mode::Sim);
    assert!((core.telemetry().sim_grade_pct + 2.0).abs() < 1e-9);
}

#[rstest]
#[case::short_simulation(&[0x11, 0x00], [0x80, 0x11, 0x04])]
#[case::short_power(&[0x05, 0x10], [0x80, 0x05, 0x04])]
#[case::short_resistance(&[0x04], [0x80, 0x04, 0x04])]
#[case::short_stop(&[0x08], [0x80, 0x08, 0x04])]
#[case::unknown_opcode(&[0x42, 0x01], [0x80, 0x42, 0x02])]
fn rejected_writes_leave_mode_unchanged(#[case] write: &[u8], #[case] expected: [u8; 3]) {
    let (core, rec, _clock) = setup();
    let cp = core.control_point();
    cp.on_write(&[0x05, 0xC8, 0x00]);
    let ack = cp.on_write(write).expect("ack");
    assert_eq!(ack.to_bytes(), expected);
    assert_eq!(rec.acks().last(), Some(&expected));
    assert_eq!(core.current_mode(), Mode::Erg);
    assert_eq!(core.telemetry().erg_watts, 200);
}

#[rstest]
fn empty_write_is_not_acknowledged() {
    let (core, rec, _clock) = setup();
    assert!(core.control_point().on_write(&[]).is_none());
    assert!(rec.acks().is_empty());
}

#[rstest]
fn accepted_no_op_requests_are_acknowledged() {
    let (core, rec, _clock) = setup();
    let cp = core.control_point();
    cp.on_write(&[0x00]);
    cp.on_write(&[0x07]);
    assert_eq!(rec.acks(), vec![[0x80, 0x00, 0x01], [0x80, 0x07, 0x01]]);
    assert_eq!(core.current_mode(), Mode::Idle);
}

#[rstest]
fn stop_returns_to_idle() {
    let (core, _rec, _clock) = setup();
    let cp = core.control_point();
    cp.on_write(&[0x05, 0xC8, 0x00]);
    cp.on_write(&[0x08, 0x01]);
    assert_eq!(core.current_mode(), Mode::Idle);
    let ResultCode::Success = cp.on_write(&[0x01]).expect("ack").result else {
        panic!("reset should succeed");
    };
}

#[rstest]
fn manual_override_wins_until_cleared() {
    let (mut core, _rec, clock) = setup();
    core.control_point().on_write(&[0x04, 30]);
    core.step().expect("step");
    let tick = core.last_tick().expect("tick");
    assert_eq!(tick.mode, Mode::Erg);
    assert_eq!(tick.target, 300);
    assert!(!tick.manual);
    assert_eq!(core.motion().target(), 300);

    let manual = core.manual_control();
    manual.set_target(750);
    clock.advance_ms(50);
    core.step().expect("step");
    let tick = core.last_tick().expect("tick");
    assert!(tick.manual);
    assert_eq!(tick.computed, 300);
    assert_eq!(tick.target, 750);
    assert_eq!(core.motion().target(), 750);
    assert_eq!(core.telemetry().manual_override, Some(750));

    // The arbiter keeps tracking mode changes underneath the hold.
    core.control_point().on_write(&[0x04, 60]);
    clock.advance_ms(50);
    core.step().expect("step");
    assert_eq!(core.last_tick().expect("tick").computed, 600);
    assert_eq!(core.motion().target(), 750);

    manual.clear();
    clock.advance_ms(50);
    core.step().expect("step");
    let tick = core.last_tick().expect("tick");
    assert!(!tick.manual);
    assert_eq!(core.motion().target(), 600);
}

#[rstest]
fn manual_target_is_clamped() {
    let (mut core, _rec, _clock) = setup();
    core.manual_control().set_target(4000);
    core.step().expect("step");
    assert_eq!(core.motion().target(), 1000);
}

#[rstest]
fn telemetry_follows_its_own_cadence() {
    let (mut core, rec, clock) = setup();
    core.step().expect("step");
    assert_eq!(rec.notifications().len(), 1);
    clock.advance_ms(50);
    core.step().expect("step");
    assert_eq!(rec.notifications().len(), 1);
    clock.advance_ms(50);
    core.step().expect("step");
    assert_eq!(rec.notifications().len(), 2);

    let frame = rec.notifications()[0].clone();
    assert_eq!(frame.len(), 10);
    assert_eq!(&frame[0..2], &[0x44, 0x00]);
    assert_eq!(&frame[2..4], &[0x00, 0x00]);
    assert_eq!(&frame[4..6], &[0x00, 0x00], "stationary: no cadence");
    assert_eq!(&frame[8..10], &[0x00, 0x00]);
}

#[rstest]
fn hall_edges_drive_speed_and_cadence() {
    let (mut core, rec, clock) = setup();
    let capture = core.pulse_capture();
    // 20 mph on the default roller is one edge every ~4.83 ms.
    for _ in 0..500 {
        clock.advance_us(4834);
        capture.on_pulse_edge();
        core.step().expect("step");
    }
    let speed = core.current_speed_mph();
    assert!((17.0..21.0).contains(&speed), "speed {speed}");
    assert!(core.telemetry().rpm > 1000.0);

    let last = rec.notifications().last().cloned().expect("telemetry");
    assert_eq!(u16::from_le_bytes([last[4], last[5]]), 180);
}

#[rstest]
fn status_reflects_homing() {
    let clock = TestClock::new();
    let mut core = build_trainer(
        CountingStepper::default(),
        OpenLimitSwitch,
        TrainerSettings::default(),
        None,
        None,
        Some(Arc::new(clock.clone())),
    )
    .expect("build core");
    assert_eq!(core.status(), TrainerStatus::Ready);
    core.begin().expect("begin");
    assert_eq!(core.status(), TrainerStatus::Homing);
    assert_eq!(core.status().as_str(), "homing");
}
