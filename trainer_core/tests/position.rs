use proptest::prelude::*;
use trainer_core::position::{LOGICAL_MAX, PositionScale, round_to_logical};

proptest! {
    #[test]
    fn logical_round_trip_within_one_unit(x in 0i32..=LOGICAL_MAX) {
        let s = PositionScale::default();
        let back = s.steps_to_logical(s.logical_to_steps(x));
        prop_assert!((back - x).abs() <= 1, "{x} -> {back}");
    }

    #[test]
    fn steps_to_logical_is_monotonic(a in 0i32..=6960, b in 0i32..=6960) {
        let s = PositionScale::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(s.steps_to_logical(lo) <= s.steps_to_logical(hi));
    }

    #[test]
    fn conversions_never_leave_range(v in any::<i32>()) {
        let s = PositionScale::default();
        prop_assert!((0..=6960).contains(&s.logical_to_steps(v)));
        prop_assert!((0..=LOGICAL_MAX).contains(&s.steps_to_logical(v)));
    }

    #[test]
    fn rounding_clamps(v in proptest::num::f64::ANY) {
        let r = round_to_logical(v);
        prop_assert!((0..=LOGICAL_MAX).contains(&r));
    }
}
