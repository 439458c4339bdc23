//! Common time/period helpers for trainer_core.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Slowest and fastest step rates the pulse scheduler will honour.
pub const MIN_STEP_SPS: f64 = 50.0;
pub const MAX_STEP_SPS: f64 = 5000.0;

/// Inter-pulse interval for a step rate, rounded to the nearest microsecond.
/// The rate is clamped to `[MIN_STEP_SPS, MAX_STEP_SPS]`; NaN maps to the minimum.
#[inline]
pub fn sps_to_interval_us(sps: f64) -> u64 {
    let sps = if sps.is_nan() {
        MIN_STEP_SPS
    } else {
        sps.clamp(MIN_STEP_SPS, MAX_STEP_SPS)
    };
    (MICROS_PER_SEC as f64 / sps).round() as u64
}

/// True once `period_ms` has passed since `last_ms` (or if never run).
#[inline]
pub fn is_due(now_ms: u64, last_ms: Option<u64>, period_ms: u64) -> bool {
    match last_ms {
        None => true,
        Some(last) => now_ms.saturating_sub(last) >= period_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_clamped_and_rounded() {
        assert_eq!(sps_to_interval_us(2500.0), 400);
        assert_eq!(sps_to_interval_us(800.0), 1250);
        assert_eq!(sps_to_interval_us(3.0), 20_000);
        assert_eq!(sps_to_interval_us(1e9), 200);
        assert_eq!(sps_to_interval_us(f64::NAN), 20_000);
        assert_eq!(sps_to_interval_us(3000.0), 333);
    }

    #[test]
    fn due_handles_first_run_and_period() {
        assert!(is_due(0, None, 50));
        assert!(!is_due(49, Some(0), 50));
        assert!(is_due(50, Some(0), 50));
    }
}
