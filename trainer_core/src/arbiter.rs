//! Control mode arbitration.
//!
//! The arbiter is split across two execution contexts. Protocol writes call
//! [`ControlModeArbiter::on_protocol_message`] from the message callback; the
//! control loop calls [`ControlModeArbiter::tick`]. They meet only in
//! [`ControlState`], a handful of atomics: targets are stored before the mode
//! with `Release` and read after it with `Acquire`, so a tick that observes
//! the new mode also observes its target. Neither side blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicI32, AtomicU8, AtomicU16, Ordering};

use trainer_traits::ManualControl;

use crate::calibration::CalibrationSet;
use crate::position::{LOGICAL_MAX, clamp_logical, round_to_logical};
use crate::protocol::{AckFrame, ControlRequest, ResultCode};
use crate::store::SharedCalibration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Idle = 0,
    Sim = 1,
    Erg = 2,
}

impl Mode {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Mode::Sim,
            2 => Mode::Erg,
            _ => Mode::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Sim => "sim",
            Mode::Erg => "erg",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What Erg mode is holding: a power target resolved through the Erg table,
/// or a direct resistance level that bypasses calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErgSource {
    Power = 0,
    Resistance = 1,
}

/// Values shared between the message callback, the manual-control owner and
/// the control loop.
#[derive(Debug)]
pub struct ControlState {
    mode: AtomicU8,
    erg_source: AtomicU8,
    watts_target: AtomicU16,
    resistance_target: AtomicI32,
    grade_hundredths: AtomicI16,
    manual_active: AtomicBool,
    manual_target: AtomicI32,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            mode: AtomicU8::new(Mode::Idle as u8),
            erg_source: AtomicU8::new(ErgSource::Power as u8),
            watts_target: AtomicU16::new(0),
            resistance_target: AtomicI32::new(0),
            grade_hundredths: AtomicI16::new(0),
            manual_active: AtomicBool::new(false),
            manual_target: AtomicI32::new(0),
        }
    }
}

impl ControlState {
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::Acquire))
    }

    fn set_mode(&self, m: Mode) {
        self.mode.store(m as u8, Ordering::Release);
    }

    pub fn watts_target(&self) -> u16 {
        self.watts_target.load(Ordering::Relaxed)
    }

    pub fn grade_percent(&self) -> f64 {
        f64::from(self.grade_hundredths.load(Ordering::Relaxed)) / 100.0
    }

    pub fn erg_source(&self) -> ErgSource {
        if self.erg_source.load(Ordering::Relaxed) == ErgSource::Resistance as u8 {
            ErgSource::Resistance
        } else {
            ErgSource::Power
        }
    }

    pub fn resistance_target(&self) -> i32 {
        self.resistance_target.load(Ordering::Relaxed)
    }

    /// Active manual hold, if any.
    pub fn manual_override(&self) -> Option<i32> {
        if self.manual_active.load(Ordering::Acquire) {
            Some(self.manual_target.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// Manual position hold handed to the diagnostic UI.
#[derive(Debug, Clone)]
pub struct ManualOverrideHandle {
    state: Arc<ControlState>,
}

impl ManualControl for ManualOverrideHandle {
    fn set_target(&self, logical: i32) {
        self.state
            .manual_target
            .store(clamp_logical(logical), Ordering::Relaxed);
        self.state.manual_active.store(true, Ordering::Release);
        tracing::info!(logical = clamp_logical(logical), "manual override set");
    }

    fn clear(&self) {
        self.state.manual_active.store(false, Ordering::Release);
        tracing::info!("manual override cleared");
    }
}

/// Result of one arbiter tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub mode: Mode,
    /// Target resolved from the active mode.
    pub computed: i32,
    /// Target to hand to motion: the manual hold when active, else `computed`.
    pub target: i32,
    pub manual: bool,
}

#[derive(Debug, Clone)]
pub struct ControlModeArbiter {
    state: Arc<ControlState>,
    calibration: SharedCalibration,
    max_power_w: u16,
}

impl ControlModeArbiter {
    pub fn new(calibration: SharedCalibration, max_power_w: u16) -> Self {
        Self {
            state: Arc::new(ControlState::default()),
            calibration,
            max_power_w,
        }
    }

    pub fn state(&self) -> &Arc<ControlState> {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn manual_control(&self) -> ManualOverrideHandle {
        ManualOverrideHandle {
            state: self.state.clone(),
        }
    }

    /// Apply one control point request and build its response. Never blocks.
    pub fn on_protocol_message(&self, opcode: u8, payload: &[u8]) -> AckFrame {
        match ControlRequest::parse(opcode, payload) {
            Ok(req) => {
                self.apply(req);
                AckFrame::new(opcode, ResultCode::Success)
            }
            Err(e) => {
                tracing::warn!(opcode, len = payload.len(), error = %e, "control point request rejected");
                AckFrame::new(opcode, e.result_code())
            }
        }
    }

    /// Raw control point write. Returns `None` for an empty write, which has
    /// no opcode to acknowledge.
    pub fn on_control_point_write(&self, bytes: &[u8]) -> Option<AckFrame> {
        let (&op, payload) = bytes.split_first()?;
        Some(self.on_protocol_message(op, payload))
    }

    fn apply(&self, req: ControlRequest) {
        let s = &self.state;
        match req {
            ControlRequest::RequestControl | ControlRequest::StartResume => {}
            ControlRequest::Reset | ControlRequest::StopPause { .. } => {
                s.set_mode(Mode::Idle);
                tracing::info!(?req, "mode -> idle");
            }
            ControlRequest::SetTargetResistance { level } => {
                let level = i32::from(level.min(100));
                s.resistance_target
                    .store(level * LOGICAL_MAX / 100, Ordering::Relaxed);
                s.erg_source
                    .store(ErgSource::Resistance as u8, Ordering::Relaxed);
                s.set_mode(Mode::Erg);
                tracing::info!(level, "mode -> erg (resistance)");
            }
            ControlRequest::SetTargetPower { watts } => {
                let watts = watts.min(self.max_power_w);
                s.watts_target.store(watts, Ordering::Relaxed);
                s.erg_source.store(ErgSource::Power as u8, Ordering::Relaxed);
                s.set_mode(Mode::Erg);
                tracing::info!(watts, "mode -> erg");
            }
            ControlRequest::SetSimulation(p) => {
                s.grade_hundredths
                    .store(p.grade_hundredths, Ordering::Relaxed);
                s.set_mode(Mode::Sim);
                tracing::info!(grade = p.grade_percent(), "mode -> sim");
            }
        }
    }

    /// Resolve the next motion target for `speed_mph`.
    pub fn tick(&self, speed_mph: f64) -> TickOutput {
        let mode = self.state.mode();
        let computed = {
            let cal = self.calibration.read();
            self.resolve(mode, speed_mph, &cal)
        };
        match self.state.manual_override() {
            Some(t) => TickOutput {
                mode,
                computed,
                target: t,
                manual: true,
            },
            None => TickOutput {
                mode,
                computed,
                target: computed,
                manual: false,
            },
        }
    }

    fn resolve(&self, mode: Mode, speed: f64, cal: &CalibrationSet) -> i32 {
        let s = &self.state;
        match mode {
            Mode::Erg => match s.erg_source() {
                ErgSource::Resistance => clamp_logical(s.resistance_target()),
                ErgSource::Power => {
                    round_to_logical(cal.erg.lookup(speed, f64::from(s.watts_target())))
                }
            },
            Mode::Sim => round_to_logical(cal.sim.lookup(speed, s.grade_percent())),
            Mode::Idle => cal.idle.position(speed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter() -> ControlModeArbiter {
        ControlModeArbiter::new(SharedCalibration::default(), 4000)
    }

    #[test]
    fn power_target_is_clamped() {
        let a = arbiter();
        let ack = a.on_protocol_message(0x05, &0xFFFFu16.to_le_bytes());
        assert_eq!(ack.result, ResultCode::Success);
        assert_eq!(a.state().watts_target(), 4000);
    }

    #[test]
    fn resistance_level_bypasses_calibration() {
        let a = arbiter();
        a.on_protocol_message(0x04, &[40]);
        assert_eq!(a.mode(), Mode::Erg);
        assert_eq!(a.tick(15.0).target, 400);
        a.on_protocol_message(0x04, &[250]);
        assert_eq!(a.tick(15.0).target, 1000);
    }

    #[test]
    fn power_after_resistance_uses_erg_table() {
        let a = arbiter();
        a.on_protocol_message(0x04, &[40]);
        a.on_protocol_message(0x05, &200u16.to_le_bytes());
        // Erg grid point (15 mph, 200 W) = 70
        assert_eq!(a.tick(15.0).target, 70);
    }

    #[test]
    fn stop_and_reset_return_to_idle() {
        let a = arbiter();
        a.on_protocol_message(0x05, &[100, 0]);
        a.on_protocol_message(0x08, &[1]);
        assert_eq!(a.mode(), Mode::Idle);
        a.on_protocol_message(0x11, &[0, 0, 0, 0, 0, 0]);
        a.on_protocol_message(0x01, &[]);
        assert_eq!(a.mode(), Mode::Idle);
    }

    #[test]
    fn empty_write_has_no_ack() {
        assert!(arbiter().on_control_point_write(&[]).is_none());
    }
}
