//! Configuration types for the trainer core.
//!
//! These are the runtime configuration structs used by `TrainerCore`.
//! They are separate from the TOML-deserialized config in `trainer_config`.

use std::f64::consts::PI;

/// Inches in a mile.
const INCHES_PER_MILE: f64 = 63_360.0;

/// Speed sensor geometry and pulse/filter tuning.
#[derive(Debug, Clone)]
pub struct SpeedCfg {
    /// Magnets (pulses) per roller revolution. Must be >= 1.
    pub pulses_per_rev: u8,
    /// Roller diameter in inches.
    pub roller_diameter_in: f64,
    /// Minimum time since the last accepted edge before a new one counts.
    pub holdoff_us: u32,
    /// Minimum interval since the last accepted edge; shorter gaps are contact bounce.
    pub min_interval_us: u32,
    /// A reading older than this is reported as zero rpm.
    pub stale_us: u64,
    /// EMA time constant in seconds.
    pub filter_tau_s: f64,
    /// Below this raw rpm the filter switches to `zero_alpha`.
    pub zero_rpm_threshold: f64,
    /// Fixed EMA weight applied while the raw reading is near zero.
    pub zero_alpha: f64,
}

impl SpeedCfg {
    /// Roller rpm to road speed in mph.
    pub fn rpm_to_mph(&self) -> f64 {
        self.roller_diameter_in * PI * 60.0 / INCHES_PER_MILE
    }
}

impl Default for SpeedCfg {
    fn default() -> Self {
        Self {
            pulses_per_rev: 6,
            roller_diameter_in: 3.25,
            holdoff_us: 3000,
            min_interval_us: 1500,
            stale_us: 1_000_000,
            filter_tau_s: 0.6,
            zero_rpm_threshold: 1.0,
            zero_alpha: 0.5,
        }
    }
}

/// Actuator travel and speed profile.
#[derive(Debug, Clone)]
pub struct MotionCfg {
    pub phys_max_steps: i32,
    pub run_sps: f64,
    pub jog_sps: f64,
    pub ramp_start_sps: f64,
    pub ramp_accel_sps2: f64,
    pub slow_zone_logical: i32,
    pub slow_zone_sps: f64,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            phys_max_steps: 6960,
            run_sps: 2500.0,
            jog_sps: 800.0,
            ramp_start_sps: 900.0,
            ramp_accel_sps2: 6000.0,
            slow_zone_logical: 200,
            slow_zone_sps: 1000.0,
        }
    }
}

/// Motor enable/disable hysteresis.
#[derive(Debug, Clone)]
pub struct EnableCfg {
    /// Disable once speed stays below this for `speed_holdoff_ms`.
    pub speed_disable_mph: f64,
    /// Re-enable only once speed rises above this.
    pub speed_enable_mph: f64,
    pub speed_holdoff_ms: u64,
    /// Settled when `|target - position| <= idle_off_deadband` ...
    pub idle_off_deadband: i32,
    /// ... and woken again once the error reaches `idle_on_deadband`.
    pub idle_on_deadband: i32,
    pub idle_off_ms: u64,
}

impl Default for EnableCfg {
    fn default() -> Self {
        Self {
            speed_disable_mph: 2.0,
            speed_enable_mph: 2.3,
            speed_holdoff_ms: 800,
            idle_off_deadband: 6,
            idle_on_deadband: 12,
            idle_off_ms: 1500,
        }
    }
}

/// Limit switch debounce and homing sequence timing.
#[derive(Debug, Clone)]
pub struct HomingCfg {
    pub debounce_ms: u64,
    pub settle_ms: u64,
    pub backoff_timeout_ms: u64,
    pub seek_timeout_ms: u64,
    /// Pulses taken away from the switch after contact before zeroing.
    pub release_steps: u32,
    /// Minimum gap between two limit-triggered rehome requests.
    pub rehome_cooldown_ms: u64,
    pub home_on_start: bool,
}

impl Default for HomingCfg {
    fn default() -> Self {
        Self {
            debounce_ms: 8,
            settle_ms: 60,
            backoff_timeout_ms: 2000,
            seek_timeout_ms: 10_000,
            release_steps: 100,
            rehome_cooldown_ms: 2000,
            home_on_start: true,
        }
    }
}

/// Control loop cadence.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    /// Arbiter tick period.
    pub tick_ms: u64,
    /// Telemetry notification period.
    pub telemetry_ms: u64,
    /// Sleep between control loop iterations in `runner::run`.
    pub loop_us: u64,
    /// Erg power targets are clamped to this.
    pub max_power_w: u16,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            telemetry_ms: 100,
            loop_us: 250,
            max_power_w: 4000,
        }
    }
}

/// All runtime settings needed to assemble a `TrainerCore`.
#[derive(Debug, Clone, Default)]
pub struct TrainerSettings {
    pub speed: SpeedCfg,
    pub motion: MotionCfg,
    pub enable: EnableCfg,
    pub homing: HomingCfg,
    pub control: ControlCfg,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpm_to_mph_matches_roller_geometry() {
        let c = SpeedCfg::default();
        // 3.25 in roller: ~0.00967 mph per rpm
        assert!((c.rpm_to_mph() - 0.009_668).abs() < 1e-5);
    }
}
