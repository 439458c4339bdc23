#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration-grid parsing for the trainer controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Calibration grid CSV loader enforces a numeric header row (the Y axis)
//!   and strictly increasing breakpoints on both axes.
//! - `PersistedCalibration` is the on-disk schema used by the calibration store.
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Pins {
    pub step: u8,
    pub dir: u8,
    pub enable: u8,
    /// Input pull-up, switch to ground.
    pub limit: u8,
    /// Hall sensor, falling-edge interrupt.
    pub hall: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            step: 22,
            dir: 23,
            enable: 24,
            limit: 25,
            hall: 17,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SpeedSensor {
    /// Magnets on the roller.
    pub pulses_per_rev: u8,
    pub roller_diameter_in: f64,
    /// Anti-chatter window after an accepted edge.
    pub holdoff_us: u32,
    /// Raw inter-edge intervals shorter than this are bounce.
    pub min_interval_us: u32,
    /// No edge for this long means the roller is stopped.
    pub stale_ms: u64,
    /// EMA time constant in seconds.
    pub filter_tau_s: f64,
    /// Raw RPM below this uses `zero_alpha` so the reading decays quickly.
    pub zero_rpm_threshold: f64,
    pub zero_alpha: f64,
}

impl Default for SpeedSensor {
    fn default() -> Self {
        Self {
            pulses_per_rev: 6,
            roller_diameter_in: 3.25,
            holdoff_us: 3000,
            min_interval_us: 1500,
            stale_ms: 1000,
            filter_tau_s: 0.60,
            zero_rpm_threshold: 1.0,
            zero_alpha: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Motion {
    /// Microsteps at logical position 1000.
    pub phys_max_steps: i32,
    pub run_sps: f64,
    /// Homing jog speed.
    pub jog_sps: f64,
    /// Speed after a direction reversal.
    pub ramp_start_sps: f64,
    pub ramp_accel_sps2: f64,
    /// Logical distance from target where `slow_zone_sps` caps the speed.
    pub slow_zone_logical: i32,
    pub slow_zone_sps: f64,
    pub invert_dir: bool,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            phys_max_steps: 6960,
            run_sps: 2500.0,
            jog_sps: 800.0,
            ramp_start_sps: 900.0,
            ramp_accel_sps2: 6000.0,
            slow_zone_logical: 200,
            slow_zone_sps: 1000.0,
            invert_dir: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Enable {
    pub speed_disable_mph: f64,
    pub speed_enable_mph: f64,
    pub speed_holdoff_ms: u64,
    /// Logical error at or below which the idle timer runs.
    pub idle_off_deadband: i32,
    /// Logical error at or above which an idle-disabled motor re-enables.
    pub idle_on_deadband: i32,
    pub idle_off_ms: u64,
}

impl Default for Enable {
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Homing {
    /// Limit switch must be stable this long before it is trusted.
    pub debounce_ms: u64,
    /// Debounce settle time before the first switch decision.
    pub settle_ms: u64,
    pub backoff_timeout_ms: u64,
    pub seek_timeout_ms: u64,
    /// Pulses away from the switch before zeroing.
    pub release_steps: u32,
    pub rehome_cooldown_ms: u64,
    pub home_on_start: bool,
}

impl Default for Homing {
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Control {
    /// Arbiter period.
    pub tick_ms: u64,
    /// Indoor-bike-data notification period.
    pub telemetry_ms: u64,
    /// Control loop pacing.
    pub loop_us: u64,
    /// Upper clamp for Set Target Power.
    pub max_power_w: u16,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            telemetry_ms: 100,
            loop_us: 250,
            max_power_w: 4000,
        }
    }
}

/// Idle resistance curve: `pos = a + b*v + c*v^2 + d*v^3` with `v` in mph.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct IdleCurve {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for IdleCurve {
    fn default() -> Self {
        Self {
            a: 0.0,
            b: 12.0,
            c: 0.2,
            d: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CalibrationFiles {
    /// Optional grid overrides (see `load_grid_csv`).
    pub power_csv: Option<String>,
    pub erg_csv: Option<String>,
    pub sim_csv: Option<String>,
    /// Persisted calibration written by the calibration store.
    pub store: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub pins: Pins,
    pub speed_sensor: SpeedSensor,
    pub motion: Motion,
    pub enable: Enable,
    pub homing: Homing,
    pub control: Control,
    pub idle_curve: IdleCurve,
    pub calibration: CalibrationFiles,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Speed sensor
        let s = &self.speed_sensor;
        if s.pulses_per_rev == 0 {
            eyre::bail!("speed_sensor.pulses_per_rev must be >= 1");
        }
        if !(s.roller_diameter_in.is_finite() && s.roller_diameter_in > 0.0) {
            eyre::bail!("speed_sensor.roller_diameter_in must be > 0");
        }
        if s.stale_ms == 0 {
            eyre::bail!("speed_sensor.stale_ms must be >= 1");
        }
        if !(s.filter_tau_s.is_finite() && s.filter_tau_s > 0.0) {
            eyre::bail!("speed_sensor.filter_tau_s must be > 0");
        }
        if !(s.zero_alpha > 0.0 && s.zero_alpha <= 1.0) {
            eyre::bail!("speed_sensor.zero_alpha must be in (0.0, 1.0]");
        }
        if s.zero_rpm_threshold.is_sign_negative() {
            eyre::bail!("speed_sensor.zero_rpm_threshold must be >= 0");
        }

        // Motion
        let m = &self.motion;
        if m.phys_max_steps <= 0 {
            eyre::bail!("motion.phys_max_steps must be > 0");
        }
        for (name, v) in [
            ("run_sps", m.run_sps),
            ("jog_sps", m.jog_sps),
            ("ramp_start_sps", m.ramp_start_sps),
            ("ramp_accel_sps2", m.ramp_accel_sps2),
            ("slow_zone_sps", m.slow_zone_sps),
        ] {
            if !(v.is_finite() && v > 0.0) {
                eyre::bail!("motion.{name} must be > 0");
            }
        }
        if m.slow_zone_logical < 0 {
            eyre::bail!("motion.slow_zone_logical must be >= 0");
        }

        // Enable
        let e = &self.enable;
        if !(e.speed_disable_mph.is_finite() && e.speed_disable_mph >= 0.0) {
            eyre::bail!("enable.speed_disable_mph must be a finite value >= 0");
        }
        if !e.speed_enable_mph.is_finite() {
            eyre::bail!("enable.speed_enable_mph must be finite");
        }
        if e.speed_enable_mph <= e.speed_disable_mph {
            eyre::bail!("enable.speed_enable_mph must be > enable.speed_disable_mph");
        }
        if e.idle_off_deadband < 0 {
            eyre::bail!("enable.idle_off_deadband must be >= 0");
        }
        if e.idle_on_deadband <= e.idle_off_deadband {
            eyre::bail!("enable.idle_on_deadband must be > enable.idle_off_deadband");
        }

        // Homing
        let h = &self.homing;
        if h.settle_ms < h.debounce_ms {
            eyre::bail!("homing.settle_ms must be >= homing.debounce_ms");
        }
        if h.seek_timeout_ms == 0 {
            eyre::bail!("homing.seek_timeout_ms must be >= 1");
        }
        if h.seek_timeout_ms > 60_000 {
            eyre::bail!("homing.seek_timeout_ms is unreasonably large (>60s)");
        }
        if h.backoff_timeout_ms > 60_000 {
            eyre::bail!("homing.backoff_timeout_ms is unreasonably large (>60s)");
        }

        // Control
        let c = &self.control;
        if c.tick_ms == 0 {
            eyre::bail!("control.tick_ms must be >= 1");
        }
        if c.telemetry_ms == 0 {
            eyre::bail!("control.telemetry_ms must be >= 1");
        }
        if c.loop_us == 0 {
            eyre::bail!("control.loop_us must be >= 1");
        }

        // Idle curve
        let i = &self.idle_curve;
        if ![i.a, i.b, i.c, i.d].iter().all(|v| v.is_finite()) {
            eyre::bail!("idle_curve coefficients must be finite");
        }

        Ok(())
    }
}

/// A calibration grid as read from CSV: X breakpoints down the first
/// column, Y breakpoints across the header row, Z values in the body.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCsv {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Row-major, `z[i][j]` at `(x[i], y[j])`.
    pub z: Vec<Vec<f64>>,
}

fn ensure_strictly_increasing(axis: &[f64], name: &str) -> eyre::Result<()> {
    if axis.len() < 2 {
        eyre::bail!("{name} axis needs at least two breakpoints, got {}", axis.len());
    }
    if let Some(bad) = axis.iter().position(|v| !v.is_finite()) {
        eyre::bail!("{name} axis breakpoint {bad} is not finite");
    }
    for w in axis.windows(2) {
        if w[1] <= w[0] {
            eyre::bail!(
                "{name} axis must be strictly increasing ({} then {})",
                w[0],
                w[1]
            );
        }
    }
    Ok(())
}

/// Parse a calibration grid from any CSV reader.
///
/// Expected layout:
/// speed_mph,0,250,500,750,1000
/// 0,0,0,0,0,0
/// 5,52,68,80,102,124
pub fn parse_grid_csv<R: std::io::Read>(reader: R) -> eyre::Result<GridCsv> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read grid CSV header: {e}"))?
        .clone();
    let mut y = Vec::with_capacity(headers.len().saturating_sub(1));
    for (col, h) in headers.iter().enumerate().skip(1) {
        let v: f64 = h
            .parse()
            .map_err(|_| eyre::eyre!("grid CSV header column {} is not a number: {h:?}", col + 1))?;
        y.push(v);
    }
    ensure_strictly_increasing(&y, "Y")?;

    let mut x = Vec::new();
    let mut z = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let line = idx + 2;
        let rec = rec.map_err(|e| eyre::eyre!("invalid grid CSV row {line}: {e}"))?;
        if rec.len() != y.len() + 1 {
            eyre::bail!(
                "grid CSV row {line} has {} columns, expected {}",
                rec.len(),
                y.len() + 1
            );
        }
        let mut vals = rec.iter().map(|f| f.parse::<f64>());
        let xv = match vals.next() {
            Some(Ok(v)) => v,
            _ => eyre::bail!("grid CSV row {line}: X breakpoint is not a number"),
        };
        let mut row = Vec::with_capacity(y.len());
        for (col, v) in vals.enumerate() {
            match v {
                Ok(v) if v.is_finite() => row.push(v),
                _ => eyre::bail!("grid CSV row {line} column {}: not a finite number", col + 2),
            }
        }
        x.push(xv);
        z.push(row);
    }
    ensure_strictly_increasing(&x, "X")?;

    Ok(GridCsv { x, y, z })
}

pub fn load_grid_csv(path: &std::path::Path) -> eyre::Result<GridCsv> {
    let f = std::fs::File::open(path)
        .map_err(|e| eyre::eyre!("open calibration grid CSV {:?}: {}", path, e))?;
    parse_grid_csv(f)
}

/// On-disk calibration written by the calibration store. Every entry is
/// optional so a partial file falls back to factory defaults.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PersistedCalibration {
    /// Z grids only; axes are fixed by the firmware tables.
    pub power: Option<Vec<Vec<f64>>>,
    pub erg: Option<Vec<Vec<f64>>>,
    pub sim: Option<Vec<Vec<f64>>>,
    pub idle_curve: Option<IdleCurve>,
}

impl PersistedCalibration {
    pub fn from_toml(s: &str) -> eyre::Result<Self> {
        toml::from_str(s).map_err(|e| eyre::eyre!("parse persisted calibration: {e}"))
    }

    pub fn to_toml(&self) -> eyre::Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre::eyre!("serialize calibration: {e}"))
    }
}
