//! `From` implementations bridging `trainer_config` types to `trainer_core` types.

use crate::calibration::IdleCurve;
use crate::config::{ControlCfg, EnableCfg, HomingCfg, MotionCfg, SpeedCfg, TrainerSettings};

// ── SpeedCfg ─────────────────────────────────────────────────────────────────

impl From<&trainer_config::SpeedSensor> for SpeedCfg {
    fn from(c: &trainer_config::SpeedSensor) -> Self {
        Self {
            pulses_per_rev: c.pulses_per_rev,
            roller_diameter_in: c.roller_diameter_in,
            holdoff_us: c.holdoff_us,
            min_interval_us: c.min_interval_us,
            stale_us: c.stale_ms.saturating_mul(1000),
            filter_tau_s: c.filter_tau_s,
            zero_rpm_threshold: c.zero_rpm_threshold,
            zero_alpha: c.zero_alpha,
        }
    }
}

// ── MotionCfg ────────────────────────────────────────────────────────────────

impl From<&trainer_config::Motion> for MotionCfg {
    fn from(c: &trainer_config::Motion) -> Self {
        Self {
            phys_max_steps: c.phys_max_steps,
            run_sps: c.run_sps,
            jog_sps: c.jog_sps,
            ramp_start_sps: c.ramp_start_sps,
            ramp_accel_sps2: c.ramp_accel_sps2,
            slow_zone_logical: c.slow_zone_logical,
            slow_zone_sps: c.slow_zone_sps,
        }
    }
}

// ── EnableCfg ────────────────────────────────────────────────────────────────

impl From<&trainer_config::Enable> for EnableCfg {
    fn from(c: &trainer_config::Enable) -> Self {
        Self {
            speed_disable_mph: c.speed_disable_mph,
            speed_enable_mph: c.speed_enable_mph,
            speed_holdoff_ms: c.speed_holdoff_ms,
            idle_off_deadband: c.idle_off_deadband,
            idle_on_deadband: c.idle_on_deadband,
            idle_off_ms: c.idle_off_ms,
        }
    }
}

// ── HomingCfg ────────────────────────────────────────────────────────────────

impl From<&trainer_config::Homing> for HomingCfg {
    fn from(c: &trainer_config::Homing) -> Self {
        Self {
            debounce_ms: c.debounce_ms,
            settle_ms: c.settle_ms,
            backoff_timeout_ms: c.backoff_timeout_ms,
            seek_timeout_ms: c.seek_timeout_ms,
            release_steps: c.release_steps,
            rehome_cooldown_ms: c.rehome_cooldown_ms,
            home_on_start: c.home_on_start,
        }
    }
}

// ── ControlCfg ───────────────────────────────────────────────────────────────

impl From<&trainer_config::Control> for ControlCfg {
    fn from(c: &trainer_config::Control) -> Self {
        Self {
            tick_ms: c.tick_ms,
            telemetry_ms: c.telemetry_ms,
            loop_us: c.loop_us,
            max_power_w: c.max_power_w,
        }
    }
}

// ── IdleCurve ────────────────────────────────────────────────────────────────

impl From<&trainer_config::IdleCurve> for IdleCurve {
    fn from(c: &trainer_config::IdleCurve) -> Self {
        Self {
            a: c.a,
            b: c.b,
            c: c.c,
            d: c.d,
        }
    }
}

impl From<IdleCurve> for trainer_config::IdleCurve {
    fn from(c: IdleCurve) -> Self {
        Self {
            a: c.a,
            b: c.b,
            c: c.c,
            d: c.d,
        }
    }
}

// ── TrainerSettings ──────────────────────────────────────────────────────────

impl From<&trainer_config::Config> for TrainerSettings {
    fn from(c: &trainer_config::Config) -> Self {
        Self {
            speed: (&c.speed_sensor).into(),
            motion: (&c.motion).into(),
            enable: (&c.enable).into(),
            homing: (&c.homing).into(),
            control: (&c.control).into(),
        }
    }
}
