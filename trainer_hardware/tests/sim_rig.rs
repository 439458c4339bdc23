use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use rstest::rstest;
use trainer_hardware::{PulseGenerator, RollerGeometry, SimRig};
use trainer_traits::{LimitSwitch, StepperDriver};

#[test]
fn pulses_move_only_while_enabled() {
    let rig = SimRig::new(100);
    let mut st = rig.stepper();
    st.pulse().unwrap();
    assert_eq!(rig.carriage(), 100);
    assert_eq!(rig.ignored_pulses(), 1);

    st.set_enabled(true).unwrap();
    st.set_direction(false).unwrap();
    for _ in 0..10 {
        st.pulse().unwrap();
    }
    assert_eq!(rig.carriage(), 90);
    st.set_direction(true).unwrap();
    st.pulse().unwrap();
    assert_eq!(rig.carriage(), 91);
    assert_eq!(rig.pulses(), 12);
}

#[test]
fn switch_closes_at_zero_and_carriage_stops_at_hard_stop() {
    let rig = SimRig::new(2);
    let mut st = rig.stepper();
    let mut sw = rig.limit_switch();
    st.set_enabled(true).unwrap();
    st.set_direction(false).unwrap();
    st.pulse().unwrap();
    assert!(!sw.is_pressed().unwrap());
    st.pulse().unwrap();
    assert!(sw.is_pressed().unwrap());
    for _ in 0..500 {
        st.pulse().unwrap();
    }
    assert!(rig.carriage() > -500);
    assert!(sw.is_pressed().unwrap());
}

#[test]
fn forced_switch_overrides_model() {
    let rig = SimRig::new(500);
    let mut sw = rig.limit_switch();
    rig.force_switch(Some(true));
    assert!(sw.is_pressed().unwrap());
    rig.force_switch(None);
    assert!(!sw.is_pressed().unwrap());
}

#[rstest]
#[case(0.0, None)]
#[case(-1.0, None)]
#[case(f64::NAN, None)]
fn stopped_roller_has_no_edges(#[case] mph: f64, #[case] expected: Option<Duration>) {
    assert_eq!(RollerGeometry::default().edge_interval(mph), expected);
}

#[test]
fn edge_interval_matches_geometry() {
    // 20 mph on a 3.25 in roller ≈ 2068.6 rpm ≈ 206.9 edges/s with 6 magnets.
    let iv = RollerGeometry::default().edge_interval(20.0).unwrap();
    let us = iv.as_micros() as i64;
    assert!((us - 4834).abs() <= 2, "interval {us} us");
}

#[test]
fn generator_emits_edges_and_stops_on_drop() {
    let count = Arc::new(AtomicU32::new(0));
    let c = count.clone();
    let generator = PulseGenerator::spawn(RollerGeometry::default(), 30.0, move || {
        c.fetch_add(1, Ordering::Relaxed);
    });
    assert!(generator.is_running());
    let start = Instant::now();
    while count.load(Ordering::Relaxed) < 5 && start.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(count.load(Ordering::Relaxed) >= 5);
    generator.set_speed_mph(0.0);
    drop(generator);
    let after = count.load(Ordering::Relaxed);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::Relaxed), after);
}
