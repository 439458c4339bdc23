//! Simulated actuator rig and speed sensor.
//!
//! The rig models a carriage on a lead screw: pulses move it one microstep
//! while the driver is enabled, the limit switch reads pressed at or below
//! `switch_at`, and a hard stop a little further on stops travel. Positions
//! here are the carriage's true positions, independent of what the
//! controller believes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use trainer_traits::{HwResult, LimitSwitch, StepperDriver};

use crate::error::HwError;

/// Overtravel past the switch before the mechanical stop.
const DEFAULT_OVERTRAVEL: i32 = 60;

#[derive(Debug)]
struct RigState {
    carriage: i32,
    away: bool,
    enabled: bool,
    pulses: u64,
    ignored_pulses: u64,
    switch_at: i32,
    hard_stop: i32,
    forced_switch: Option<bool>,
}

/// Shared handle to the simulated rig. Clones observe the same carriage.
#[derive(Debug, Clone)]
pub struct SimRig {
    state: Arc<Mutex<RigState>>,
}

fn lock(state: &Mutex<RigState>) -> Result<MutexGuard<'_, RigState>, HwError> {
    state
        .lock()
        .map_err(|_| HwError::Gpio("sim rig state poisoned".into()))
}

impl SimRig {
    /// Carriage starts `carriage_steps` away from a switch at 0.
    pub fn new(carriage_steps: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(RigState {
                carriage: carriage_steps,
                away: true,
                enabled: false,
                pulses: 0,
                ignored_pulses: 0,
                switch_at: 0,
                hard_stop: -DEFAULT_OVERTRAVEL,
                forced_switch: None,
            })),
        }
    }

    pub fn stepper(&self) -> SimStepper {
        SimStepper { rig: self.clone() }
    }

    pub fn limit_switch(&self) -> SimLimitSwitch {
        SimLimitSwitch { rig: self.clone() }
    }

    fn with<T>(&self, f: impl FnOnce(&mut RigState) -> T) -> Option<T> {
        lock(&self.state).ok().map(|mut g| f(&mut g))
    }

    pub fn carriage(&self) -> i32 {
        self.with(|s| s.carriage).unwrap_or_default()
    }

    pub fn pulses(&self) -> u64 {
        self.with(|s| s.pulses).unwrap_or_default()
    }

    /// Pulses sent while the driver was disabled (they do not move the carriage).
    pub fn ignored_pulses(&self) -> u64 {
        self.with(|s| s.ignored_pulses).unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.with(|s| s.enabled).unwrap_or_default()
    }

    pub fn switch_pressed(&self) -> bool {
        self.with(|s| s.forced_switch.unwrap_or(s.carriage <= s.switch_at))
            .unwrap_or_default()
    }

    /// Override the switch reading (`None` returns to the physical model).
    pub fn force_switch(&self, pressed: Option<bool>) {
        self.with(|s| s.forced_switch = pressed);
    }

    /// Move the carriage without pulses, as a slipping belt would.
    pub fn slip(&self, delta: i32) {
        self.with(|s| s.carriage = (s.carriage + delta).max(s.hard_stop));
    }
}

/// Step/dir/enable driver attached to a [`SimRig`].
#[derive(Debug, Clone)]
pub struct SimStepper {
    rig: SimRig,
}

impl StepperDriver for SimStepper {
    fn set_enabled(&mut self, enabled: bool) -> HwResult<()> {
        lock(&self.rig.state)?.enabled = enabled;
        Ok(())
    }

    fn set_direction(&mut self, away_from_home: bool) -> HwResult<()> {
        lock(&self.rig.state)?.away = away_from_home;
        Ok(())
    }

    fn pulse(&mut self) -> HwResult<()> {
        let mut s = lock(&self.rig.state)?;
        s.pulses += 1;
        if !s.enabled {
            s.ignored_pulses += 1;
            return Ok(());
        }
        let next = if s.away { s.carriage + 1 } else { s.carriage - 1 };
        s.carriage = next.max(s.hard_stop);
        Ok(())
    }
}

/// Limit switch attached to a [`SimRig`].
#[derive(Debug, Clone)]
pub struct SimLimitSwitch {
    rig: SimRig,
}

impl LimitSwitch for SimLimitSwitch {
    fn is_pressed(&mut self) -> HwResult<bool> {
        let s = lock(&self.rig.state)?;
        Ok(s.forced_switch.unwrap_or(s.carriage <= s.switch_at))
    }
}

/// Roller and magnet geometry used to turn road speed into edge timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollerGeometry {
    pub pulses_per_rev: u8,
    pub roller_diameter_in: f64,
}

impl Default for RollerGeometry {
    fn default() -> Self {
        Self {
            pulses_per_rev: 6,
            roller_diameter_in: 3.25,
        }
    }
}

impl RollerGeometry {
    /// Time between sensor edges at `mph`, or `None` when stopped.
    pub fn edge_interval(&self, mph: f64) -> Option<Duration> {
        if !(mph.is_finite() && mph > 0.0) || self.pulses_per_rev == 0 {
            return None;
        }
        let mph_per_rpm = self.roller_diameter_in * std::f64::consts::PI * 60.0 / 63_360.0;
        let edges_per_sec = mph / mph_per_rpm / 60.0 * f64::from(self.pulses_per_rev);
        Some(Duration::from_secs_f64(1.0 / edges_per_sec))
    }
}

/// Background thread that emits speed-sensor edges for a commanded speed.
/// Stops and joins on drop.
pub struct PulseGenerator {
    speed_bits: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PulseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseGenerator")
            .field("speed_mph", &self.speed_mph())
            .finish()
    }
}

/// Upper bound on one sleep so speed changes and shutdown are seen promptly.
const MAX_NAP: Duration = Duration::from_millis(5);

impl PulseGenerator {
    pub fn spawn<F>(geometry: RollerGeometry, initial_mph: f64, on_edge: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let speed_bits = Arc::new(AtomicU64::new(initial_mph.to_bits()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let speed_t = speed_bits.clone();
        let shutdown_t = shutdown.clone();

        let handle = std::thread::Builder::new()
            .name("pulse-generator".into())
            .spawn(move || {
                let mut last_edge = Instant::now();
                while !shutdown_t.load(Ordering::Relaxed) {
                    let mph = f64::from_bits(speed_t.load(Ordering::Relaxed));
                    let Some(interval) = geometry.edge_interval(mph) else {
                        last_edge = Instant::now();
                        std::thread::sleep(MAX_NAP);
                        continue;
                    };
                    let since = last_edge.elapsed();
                    if since >= interval {
                        on_edge();
                        last_edge = Instant::now();
                    } else {
                        std::thread::sleep((interval - since).min(MAX_NAP));
                    }
                }
            });
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn pulse generator thread");
                None
            }
        };
        Self {
            speed_bits,
            shutdown,
            handle,
        }
    }

    pub fn set_speed_mph(&self, mph: f64) {
        self.speed_bits.store(mph.to_bits(), Ordering::Relaxed);
    }

    pub fn speed_mph(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for PulseGenerator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
