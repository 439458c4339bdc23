//! The control-loop core: speed estimation, mode arbitration, motion and
//! telemetry stitched together on their own cadences.

use std::sync::Arc;
use std::time::Instant;

use trainer_traits::clock::Clock;
use trainer_traits::{LimitSwitch, StepperDriver, Transport};

use crate::arbiter::{ControlModeArbiter, ManualOverrideHandle, Mode, TickOutput};
use crate::config::ControlCfg;
use crate::error::Result;
use crate::motion::{HomingOutcome, MotionController, MotionTick, RehomeHandle};
use crate::protocol::{AckFrame, IndoorBikeData};
use crate::speed::{PulseCapture, SpeedEstimator};
use crate::status::{TelemetrySnapshot, TrainerStatus};
use crate::store::SharedCalibration;
use crate::util::is_due;

/// Message-callback side of the core: parses a control point write, applies
/// it and sends the response. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct ControlPoint {
    arbiter: ControlModeArbiter,
    transport: Arc<dyn Transport + Send + Sync>,
}

impl std::fmt::Debug for ControlPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPoint")
            .field("mode", &self.arbiter.mode())
            .finish()
    }
}

impl ControlPoint {
    pub fn on_write(&self, bytes: &[u8]) -> Option<AckFrame> {
        let ack = self.arbiter.on_control_point_write(bytes)?;
        if let Err(e) = self.transport.send_ack(&ack.to_bytes()) {
            tracing::warn!(error = %e, opcode = ack.request_opcode, "ack not delivered");
        }
        Some(ack)
    }
}

pub struct TrainerCore<D: StepperDriver, L: LimitSwitch> {
    pub(crate) speed: SpeedEstimator,
    pub(crate) motion: MotionController<D, L>,
    pub(crate) arbiter: ControlModeArbiter,
    pub(crate) calibration: SharedCalibration,
    pub(crate) transport: Arc<dyn Transport + Send + Sync>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) control: ControlCfg,
    pub(crate) home_on_start: bool,
    epoch: Instant,
    last_tick_ms: Option<u64>,
    last_telemetry_ms: Option<u64>,
    speed_mph: f64,
    power_watts: f64,
    last_tick: Option<TickOutput>,
    dropped_notifications: u64,
}

impl<D: StepperDriver, L: LimitSwitch> std::fmt::Debug for TrainerCore<D, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainerCore")
            .field("mode", &self.arbiter.mode())
            .field("speed_mph", &self.speed_mph)
            .field("power_watts", &self.power_watts)
            .field("motion", &self.motion)
            .finish()
    }
}

impl<D: StepperDriver, L: LimitSwitch> TrainerCore<D, L> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        speed: SpeedEstimator,
        motion: MotionController<D, L>,
        arbiter: ControlModeArbiter,
        calibration: SharedCalibration,
        transport: Arc<dyn Transport + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
        control: ControlCfg,
        home_on_start: bool,
    ) -> Self {
        let epoch = clock.now();
        Self {
            speed,
            motion,
            arbiter,
            calibration,
            transport,
            clock,
            control,
            home_on_start,
            epoch,
            last_tick_ms: None,
            last_telemetry_ms: None,
            speed_mph: 0.0,
            power_watts: 0.0,
            last_tick: None,
            dropped_notifications: 0,
        }
    }

    /// Start-of-run work: begins homing when configured to home on start.
    pub fn begin(&mut self) -> Result<()> {
        if self.home_on_start {
            self.motion.begin_homing()?;
        }
        Ok(())
    }

    /// One control-loop iteration. Speed and arbitration run every
    /// `tick_ms`, motion every call and telemetry every `telemetry_ms`.
    /// Telemetry is published even when the motion update fails.
    pub fn step(&mut self) -> Result<MotionTick> {
        let now_ms = self.clock.ms_since(self.epoch);

        if is_due(now_ms, self.last_tick_ms, self.control.tick_ms) {
            self.last_tick_ms = Some(now_ms);
            self.speed_mph = self.speed.filtered_speed_mph();
            let out = self.arbiter.tick(self.speed_mph);
            self.motion.set_target(out.target);
            if self.last_tick.is_none_or(|prev| prev.mode != out.mode) {
                tracing::debug!(mode = %out.mode, logical = out.target, "arbiter mode in effect");
            }
            self.last_tick = Some(out);
        }

        let res = self.motion.update(self.speed_mph);

        if is_due(now_ms, self.last_telemetry_ms, self.control.telemetry_ms) {
            self.last_telemetry_ms = Some(now_ms);
            self.publish_telemetry();
        }
        res
    }

    fn publish_telemetry(&mut self) {
        self.power_watts = self
            .calibration
            .read()
            .estimate_power(self.speed_mph, self.motion.logical_position());
        let payload = IndoorBikeData {
            speed_mph: self.speed_mph,
            power_watts: self.power_watts,
        }
        .encode();
        if let Err(e) = self.transport.notify(&payload) {
            self.dropped_notifications += 1;
            tracing::warn!(error = %e, dropped = self.dropped_notifications, "telemetry not delivered");
        }
    }

    /// Blocking homing pass. See [`MotionController::home`].
    pub fn home(&mut self) -> Result<HomingOutcome> {
        self.motion.home()
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.motion.shutdown()
    }

    // ── collaborator handles ─────────────────────────────────────────────────

    pub fn control_point(&self) -> ControlPoint {
        ControlPoint {
            arbiter: self.arbiter.clone(),
            transport: self.transport.clone(),
        }
    }

    pub fn pulse_capture(&self) -> Arc<PulseCapture> {
        self.speed.capture()
    }

    pub fn manual_control(&self) -> ManualOverrideHandle {
        self.arbiter.manual_control()
    }

    pub fn rehome_handle(&self) -> RehomeHandle {
        self.motion.rehome_handle()
    }

    pub fn calibration(&self) -> &SharedCalibration {
        &self.calibration
    }

    pub fn motion(&self) -> &MotionController<D, L> {
        &self.motion
    }

    pub fn motion_mut(&mut self) -> &mut MotionController<D, L> {
        &mut self.motion
    }

    pub fn control_cfg(&self) -> &ControlCfg {
        &self.control
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    // ── diagnostics ──────────────────────────────────────────────────────────

    pub fn current_logical_position(&self) -> i32 {
        self.motion.logical_position()
    }

    pub fn current_mode(&self) -> Mode {
        self.arbiter.mode()
    }

    pub fn current_speed_mph(&self) -> f64 {
        self.speed_mph
    }

    pub fn current_estimated_power_watts(&self) -> f64 {
        self.power_watts
    }

    pub fn last_tick(&self) -> Option<TickOutput> {
        self.last_tick
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        let state = self.arbiter.state();
        TelemetrySnapshot {
            mode: state.mode(),
            speed_mph: self.speed_mph,
            rpm: self.speed.filtered_rpm(),
            power_watts: self.power_watts,
            logical_position: self.motion.logical_position(),
            target_position: self.motion.target(),
            enabled: self.motion.is_enabled(),
            homing: self.motion.is_homing(),
            homed: self.motion.is_homed(),
            homing_failed: self.motion.homing_failed(),
            rehome_pending: self.motion.rehome_pending(),
            manual_override: state.manual_override(),
            erg_watts: state.watts_target(),
            sim_grade_pct: state.grade_percent(),
        }
    }

    pub fn status(&self) -> TrainerStatus {
        self.telemetry().status()
    }
}
