//! Status and telemetry snapshots published by the control loop.

use crate::arbiter::Mode;

/// Coarse status for external indicator collaborators (LEDs, status pages).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerStatus {
    /// A homing run is in progress.
    Homing,
    /// The last homing run timed out; positions are not trustworthy.
    HomingFailed,
    /// A limit fault asked for a rehome that has not started yet.
    RehomePending,
    /// Homed and following targets.
    Ready,
}

impl TrainerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrainerStatus::Homing => "homing",
            TrainerStatus::HomingFailed => "homing_failed",
            TrainerStatus::RehomePending => "rehome_pending",
            TrainerStatus::Ready => "ready",
        }
    }
}

/// Everything a diagnostics collaborator may want, read in one go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub mode: Mode,
    pub speed_mph: f64,
    pub rpm: f64,
    pub power_watts: f64,
    pub logical_position: i32,
    pub target_position: i32,
    pub enabled: bool,
    pub homing: bool,
    pub homed: bool,
    pub homing_failed: bool,
    pub rehome_pending: bool,
    pub manual_override: Option<i32>,
    pub erg_watts: u16,
    pub sim_grade_pct: f64,
}

impl TelemetrySnapshot {
    /// Most urgent condition first.
    pub fn status(&self) -> TrainerStatus {
        if self.homing {
            TrainerStatus::Homing
        } else if self.rehome_pending {
            TrainerStatus::RehomePending
        } else if self.homing_failed {
            TrainerStatus::HomingFailed
        } else {
            TrainerStatus::Ready
        }
    }
}
