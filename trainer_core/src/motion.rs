//! Actuator motion: homing, enable hysteresis, ramped time-gated stepping and
//! the limit-switch safety fault.
//!
//! `update()` is non-blocking and called every control-loop iteration. It
//! emits at most one pulse per call, and only once the interval implied by
//! the currently allowed speed has elapsed. Homing runs as a phase machine
//! inside `update()`; [`MotionController::home`] drives it to completion for
//! callers that want the blocking form.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use eyre::WrapErr;
use trainer_traits::clock::Clock;
use trainer_traits::{LimitSwitch, StepperDriver};

use crate::config::{EnableCfg, HomingCfg, MotionCfg};
use crate::error::{Result, TrainerError};
use crate::hw_error::map_hw_error;
use crate::position::{PositionScale, clamp_logical};
use crate::util::sps_to_interval_us;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Disabled,
    Ramping,
    Holding,
    Homing,
    RehomeFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    /// Let the debouncer learn the switch state before moving.
    Settle,
    /// Switch was pressed at start: move away until released.
    BackOff,
    /// Move toward the switch until it closes.
    Seek,
    /// Move a fixed pulse count off the switch before zeroing.
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingOutcome {
    Homed,
    TimedOut { phase: HomingPhase },
}

/// Result of one `update()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionTick {
    pub state: MotionState,
    pub stepped: bool,
    /// Set on the call that finishes a homing run.
    pub homing: Option<HomingOutcome>,
}

/// Cross-context rehome trigger for safety callers.
#[derive(Debug, Clone)]
pub struct RehomeHandle {
    flag: Arc<AtomicBool>,
}

impl RehomeHandle {
    pub fn request(&self, reason: &str) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            tracing::warn!(reason, "rehome requested");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
struct HomingRun {
    phase: HomingPhase,
    phase_started_ms: u64,
    release_left: u32,
    last_step_us: Option<u64>,
}

/// Stable-for-N-ms debouncer over a raw boolean input.
#[derive(Debug, Clone, Copy)]
struct Debounce {
    window_ms: u64,
    raw: bool,
    stable: bool,
    raw_since_ms: u64,
}

impl Debounce {
    /// Starts released.
    fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            raw: false,
            stable: false,
            raw_since_ms: 0,
        }
    }

    fn feed(&mut self, raw: bool, now_ms: u64) -> bool {
        if raw != self.raw {
            self.raw = raw;
            self.raw_since_ms = now_ms;
        }
        if self.stable != self.raw && now_ms.saturating_sub(self.raw_since_ms) >= self.window_ms {
            self.stable = self.raw;
        }
        self.stable
    }
}

pub struct MotionController<D: StepperDriver, L: LimitSwitch> {
    driver: D,
    limit: L,
    motion: MotionCfg,
    enable: EnableCfg,
    homing_cfg: HomingCfg,
    scale: PositionScale,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,

    phys_pos: i32,
    logical_pos: i32,
    target: i32,

    enabled: bool,
    homed: bool,
    homing_failed: bool,
    homing: Option<HomingRun>,
    rehome: Arc<AtomicBool>,

    direction: i8,
    ramp_sps: f64,
    ramp_last_us: u64,
    last_step_us: Option<u64>,

    switch: Debounce,
    last_fault_ms: Option<u64>,

    speed_inhibit: bool,
    below_speed_since_ms: Option<u64>,
    idle_inhibit: bool,
    settled_since_ms: Option<u64>,
}

impl<D: StepperDriver, L: LimitSwitch> std::fmt::Debug for MotionController<D, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionController")
            .field("phys_pos", &self.phys_pos)
            .field("logical_pos", &self.logical_pos)
            .field("target", &self.target)
            .field("enabled", &self.enabled)
            .field("homed", &self.homed)
            .field("homing", &self.homing.map(|h| h.phase))
            .finish()
    }
}

fn hw(e: Box<dyn std::error::Error + Send + Sync>, what: &'static str) -> eyre::Report {
    eyre::Report::new(map_hw_error(&*e)).wrap_err(what)
}

impl<D: StepperDriver, L: LimitSwitch> MotionController<D, L> {
    pub fn new(
        driver: D,
        limit: L,
        motion: MotionCfg,
        enable: EnableCfg,
        homing: HomingCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let epoch = clock.now();
        let scale = PositionScale::new(motion.phys_max_steps);
        let switch = Debounce::new(homing.debounce_ms);
        let ramp_start = motion.ramp_start_sps;
        Self {
            driver,
            limit,
            motion,
            enable,
            homing_cfg: homing,
            scale,
            clock,
            epoch,
            phys_pos: 0,
            logical_pos: 0,
            target: 0,
            enabled: false,
            homed: false,
            homing_failed: false,
            homing: None,
            rehome: Arc::new(AtomicBool::new(false)),
            direction: 0,
            ramp_sps: ramp_start,
            ramp_last_us: 0,
            last_step_us: None,
            switch,
            last_fault_ms: None,
            // Stationary until the rider proves otherwise.
            speed_inhibit: true,
            below_speed_since_ms: None,
            idle_inhibit: false,
            settled_since_ms: None,
        }
    }

    // ── accessors ────────────────────────────────────────────────────────────

    pub fn logical_position(&self) -> i32 {
        self.logical_pos
    }

    pub fn physical_position(&self) -> i32 {
        self.phys_pos
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_homed(&self) -> bool {
        self.homed
    }

    pub fn homing_failed(&self) -> bool {
        self.homing_failed
    }

    pub fn is_homing(&self) -> bool {
        self.homing.is_some()
    }

    pub fn homing_phase(&self) -> Option<HomingPhase> {
        self.homing.map(|h| h.phase)
    }

    pub fn rehome_pending(&self) -> bool {
        self.rehome.load(Ordering::Acquire)
    }

    /// Debounced limit switch state.
    pub fn limit_pressed(&self) -> bool {
        self.switch.stable
    }

    pub fn rehome_handle(&self) -> RehomeHandle {
        RehomeHandle {
            flag: self.rehome.clone(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn state(&self) -> MotionState {
        if self.homing.is_some() {
            MotionState::Homing
        } else if self.rehome_pending() || self.switch.stable {
            MotionState::RehomeFault
        } else if !self.enabled {
            MotionState::Disabled
        } else if self.target != self.logical_pos {
            MotionState::Ramping
        } else {
            MotionState::Holding
        }
    }

    // ── commands ─────────────────────────────────────────────────────────────

    /// Ask for a rehome; it starts on the next `update()`.
    pub fn request_rehome(&self, reason: &str) {
        self.rehome_handle().request(reason);
    }

    /// Set the logical target. Ignored while homing, while a rehome is pending
    /// or while the limit switch is held outside homing.
    pub fn set_target(&mut self, logical: i32) {
        if self.homing.is_some() || self.rehome_pending() || self.switch.stable {
            return;
        }
        self.target = clamp_logical(logical);
    }

    /// Drive the enable output directly. The enable rules re-evaluate on the
    /// next `update()`.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.enabled {
            return Ok(());
        }
        self.driver
            .set_enabled(enabled)
            .map_err(|e| hw(e, "stepper enable"))?;
        self.enabled = enabled;
        if enabled {
            let now = self.now_us();
            self.direction = 0;
            self.ramp_sps = self.motion.ramp_start_sps.min(self.motion.run_sps);
            self.ramp_last_us = now;
            self.last_step_us = None;
            self.settled_since_ms = None;
        }
        tracing::debug!(enabled, "stepper enable changed");
        Ok(())
    }

    /// Begin a homing run. A run already in progress is left alone.
    pub fn begin_homing(&mut self) -> Result<()> {
        if self.homing.is_some() {
            return Ok(());
        }
        self.set_enabled(true)?;
        let now_ms = self.now_ms();
        self.homing = Some(HomingRun {
            phase: HomingPhase::Settle,
            phase_started_ms: now_ms,
            release_left: self.homing_cfg.release_steps,
            last_step_us: None,
        });
        self.direction = 0;
        tracing::info!("homing started");
        Ok(())
    }

    /// Home and block until done. A timeout is returned as
    /// `Ok(HomingOutcome::TimedOut)`; only hardware errors are `Err`.
    pub fn home(&mut self) -> Result<HomingOutcome> {
        self.begin_homing()?;
        let poll = Duration::from_micros(sps_to_interval_us(self.motion.jog_sps).max(1) / 2 + 1);
        loop {
            let tick = self.update(0.0)?;
            if let Some(outcome) = tick.homing {
                return Ok(outcome);
            }
            self.clock.sleep(poll);
        }
    }

    /// Disable the driver and drop any in-flight homing run.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.homing.take().is_some() {
            tracing::warn!("homing aborted by shutdown");
        }
        self.set_enabled(false)
    }

    // ── per-iteration update ─────────────────────────────────────────────────

    pub fn update(&mut self, speed_mph: f64) -> Result<MotionTick> {
        let now_us = self.now_us();
        let now_ms = now_us / 1000;

        let raw = self
            .limit
            .is_pressed()
            .map_err(|e| hw(e, "limit switch read"))?;
        let pressed = self.switch.feed(raw, now_ms);

        if self.homing.is_none() && self.rehome_pending() {
            self.begin_homing()?;
        }
        if self.homing.is_some() {
            return self.homing_step(now_us, pressed);
        }

        if pressed {
            self.on_limit_fault(now_ms);
            return Ok(MotionTick {
                state: MotionState::RehomeFault,
                stepped: false,
                homing: None,
            });
        }

        self.update_enable(speed_mph, now_ms)?;
        if !self.enabled {
            return Ok(self.tick(false));
        }
        let stepped = self.step_toward_target(now_us)?;
        Ok(self.tick(stepped))
    }

    fn tick(&self, stepped: bool) -> MotionTick {
        MotionTick {
            state: self.state(),
            stepped,
            homing: None,
        }
    }

    fn on_limit_fault(&mut self, now_ms: u64) {
        self.target = self.logical_pos;
        let cooled = self
            .last_fault_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= self.homing_cfg.rehome_cooldown_ms);
        if cooled {
            self.last_fault_ms = Some(now_ms);
            tracing::warn!(
                logical = self.logical_pos,
                phys = self.phys_pos,
                "limit switch contact outside homing; freezing target"
            );
            self.request_rehome("limit switch contact");
        }
    }

    fn update_enable(&mut self, speed: f64, now_ms: u64) -> Result<()> {
        let e = &self.enable;
        if speed < e.speed_disable_mph {
            let since = *self.below_speed_since_ms.get_or_insert(now_ms);
            if !self.speed_inhibit && now_ms.saturating_sub(since) >= e.speed_holdoff_ms {
                self.speed_inhibit = true;
                tracing::debug!(speed, "speed below threshold; inhibiting motor");
            }
        } else {
            self.below_speed_since_ms = None;
        }
        if self.speed_inhibit && speed > e.speed_enable_mph {
            self.speed_inhibit = false;
            tracing::debug!(speed, "speed above threshold; motor allowed");
        }

        let err = (self.target - self.logical_pos).abs();
        if self.enabled && !self.idle_inhibit {
            if err <= e.idle_off_deadband {
                let since = *self.settled_since_ms.get_or_insert(now_ms);
                if now_ms.saturating_sub(since) >= e.idle_off_ms {
                    self.idle_inhibit = true;
                    self.settled_since_ms = None;
                    tracing::debug!(err, "settled; idling motor");
                }
            } else {
                self.settled_since_ms = None;
            }
        }
        if self.idle_inhibit && err >= e.idle_on_deadband {
            self.idle_inhibit = false;
        }

        self.set_enabled(!(self.speed_inhibit || self.idle_inhibit))
    }

    fn step_toward_target(&mut self, now_us: u64) -> Result<bool> {
        let err = self.target - self.logical_pos;
        if err == 0 {
            return Ok(false);
        }
        let dir: i8 = if err > 0 { 1 } else { -1 };
        if dir != self.direction {
            if self.direction != 0 {
                self.ramp_sps = self.motion.ramp_start_sps.min(self.motion.run_sps);
                self.ramp_last_us = now_us;
            }
            self.driver
                .set_direction(dir > 0)
                .map_err(|e| hw(e, "stepper direction"))?;
            self.direction = dir;
        }

        let dt_s = now_us.saturating_sub(self.ramp_last_us) as f64 / 1e6;
        self.ramp_last_us = now_us;
        if self.ramp_sps < self.motion.run_sps {
            self.ramp_sps =
                (self.ramp_sps + self.motion.ramp_accel_sps2 * dt_s).min(self.motion.run_sps);
        }
        let allowed = if err.abs() <= self.motion.slow_zone_logical {
            self.ramp_sps.min(self.motion.slow_zone_sps)
        } else {
            self.ramp_sps
        };

        let interval = sps_to_interval_us(allowed);
        if self
            .last_step_us
            .is_some_and(|t| now_us.saturating_sub(t) < interval)
        {
            return Ok(false);
        }
        self.driver.pulse().map_err(|e| hw(e, "stepper pulse"))?;
        self.last_step_us = Some(now_us);
        self.phys_pos = self.scale.clamp_steps(self.phys_pos + i32::from(dir));
        self.logical_pos = self.scale.steps_to_logical(self.phys_pos);
        Ok(true)
    }

    // ── homing ───────────────────────────────────────────────────────────────

    fn homing_step(&mut self, now_us: u64, pressed: bool) -> Result<MotionTick> {
        if !self.enabled {
            self.set_enabled(true)?;
        }
        let Some(mut run) = self.homing else {
            return Ok(self.tick(false));
        };
        let now_ms = now_us / 1000;
        let elapsed = now_ms.saturating_sub(run.phase_started_ms);
        let mut stepped = false;

        match run.phase {
            HomingPhase::Settle => {
                if elapsed >= self.homing_cfg.settle_ms {
                    let next = if pressed {
                        HomingPhase::BackOff
                    } else {
                        HomingPhase::Seek
                    };
                    self.enter_phase(&mut run, next, now_ms)?;
                }
            }
            HomingPhase::BackOff => {
                if !pressed {
                    self.enter_phase(&mut run, HomingPhase::Seek, now_ms)?;
                } else if elapsed >= self.homing_cfg.backoff_timeout_ms {
                    tracing::warn!("limit switch still pressed after back-off; seeking anyway");
                    self.enter_phase(&mut run, HomingPhase::Seek, now_ms)?;
                } else {
                    stepped = self.jog(&mut run, now_us, 1)?;
                }
            }
            HomingPhase::Seek => {
                if pressed {
                    self.enter_phase(&mut run, HomingPhase::Release, now_ms)?;
                } else if elapsed >= self.homing_cfg.seek_timeout_ms {
                    return Ok(self.finish_timeout(HomingPhase::Seek));
                } else {
                    stepped = self.jog(&mut run, now_us, -1)?;
                }
            }
            HomingPhase::Release => {
                if run.release_left == 0 {
                    return Ok(self.finish_homed());
                }
                if self.jog(&mut run, now_us, 1)? {
                    run.release_left -= 1;
                    stepped = true;
                }
            }
        }
        self.homing = Some(run);
        Ok(MotionTick {
            state: MotionState::Homing,
            stepped,
            homing: None,
        })
    }

    fn enter_phase(&mut self, run: &mut HomingRun, phase: HomingPhase, now_ms: u64) -> Result<()> {
        let away = match phase {
            HomingPhase::BackOff | HomingPhase::Release => Some(true),
            HomingPhase::Seek => Some(false),
            HomingPhase::Settle => None,
        };
        if let Some(away) = away {
            self.driver
                .set_direction(away)
                .map_err(|e| hw(e, "stepper direction"))
                .wrap_err_with(|| format!("entering homing phase {phase:?}"))?;
        }
        tracing::debug!(from = ?run.phase, to = ?phase, "homing phase");
        run.phase = phase;
        run.phase_started_ms = now_ms;
        run.last_step_us = None;
        Ok(())
    }

    /// One jog-speed pulse if due. Position is tracked unclamped while homing.
    fn jog(&mut self, run: &mut HomingRun, now_us: u64, dir: i32) -> Result<bool> {
        let interval = sps_to_interval_us(self.motion.jog_sps);
        if run
            .last_step_us
            .is_some_and(|t| now_us.saturating_sub(t) < interval)
        {
            return Ok(false);
        }
        self.driver.pulse().map_err(|e| hw(e, "stepper pulse"))?;
        run.last_step_us = Some(now_us);
        self.phys_pos = self.phys_pos.saturating_add(dir);
        Ok(true)
    }

    fn finish_homed(&mut self) -> MotionTick {
        self.homing = None;
        self.phys_pos = 0;
        self.logical_pos = 0;
        self.target = 0;
        self.homed = true;
        self.homing_failed = false;
        self.direction = 0;
        self.last_step_us = None;
        self.rehome.store(false, Ordering::Release);
        tracing::info!("homing complete; position zeroed");
        MotionTick {
            state: self.state(),
            stepped: false,
            homing: Some(HomingOutcome::Homed),
        }
    }

    fn finish_timeout(&mut self, phase: HomingPhase) -> MotionTick {
        self.homing = None;
        self.homed = false;
        self.homing_failed = true;
        self.phys_pos = self.scale.clamp_steps(self.phys_pos);
        self.logical_pos = self.scale.steps_to_logical(self.phys_pos);
        self.target = self.logical_pos;
        self.direction = 0;
        self.rehome.store(false, Ordering::Release);
        tracing::warn!(
            error = %TrainerError::HomingTimeout { phase },
            "homing failed; position reference is not trusted"
        );
        MotionTick {
            state: self.state(),
            stepped: false,
            homing: Some(HomingOutcome::TimedOut { phase }),
        }
    }

    // ── time ─────────────────────────────────────────────────────────────────

    fn now_us(&self) -> u64 {
        self.clock.us_since(self.epoch)
    }

    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }
}
