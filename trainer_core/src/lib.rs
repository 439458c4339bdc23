#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Resistance-control core for a smart trainer (hardware-agnostic).
//!
//! All hardware interactions go through the `trainer_traits` seams:
//! `StepperDriver`, `LimitSwitch`, `Transport` and `Clock`.
//!
//! ## Architecture
//!
//! - **Speed**: hall-edge capture and filtered roller speed (`speed` module)
//! - **Calibration**: Power/Erg/Sim surfaces and bilinear lookup (`calibration`)
//! - **Motion**: homing, enable hysteresis, ramped stepping, limit fault (`motion`)
//! - **Arbitration**: Idle/Sim/Erg modes driven by control point writes (`arbiter`)
//! - **Protocol**: request parsing, acks and telemetry framing (`protocol`)
//! - **Core**: the control-loop iteration tying them together (`core`, `runner`)
//!
//! ## Positions
//!
//! Logical positions are integers in 0–1000; physical positions are actuator
//! microsteps. See `position::PositionScale` for the mapping.

pub mod arbiter;
pub mod atomic;
pub mod builder;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod core;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod motion;
pub mod position;
pub mod protocol;
pub mod runner;
pub mod speed;
pub mod status;
pub mod store;
pub mod transport;
pub mod util;

pub use arbiter::{ControlModeArbiter, ControlState, ManualOverrideHandle, Mode, TickOutput};
pub use builder::{Trainer, TrainerBuilder, build_trainer};
pub use calibration::{CalibrationSet, CalibrationTable, IdleCurve, TableKind, lookup};
pub use config::{ControlCfg, EnableCfg, HomingCfg, MotionCfg, SpeedCfg, TrainerSettings};
pub use crate::core::{ControlPoint, TrainerCore};
pub use error::{BuildError, Result, TrainerError};
pub use motion::{HomingOutcome, HomingPhase, MotionController, MotionState, MotionTick};
pub use position::{LOGICAL_MAX, LOGICAL_MIN, PositionScale};
pub use protocol::{AckFrame, ControlRequest, IndoorBikeData, ProtocolError, ResultCode};
pub use speed::{PulseCapture, SpeedEstimator};
pub use status::{TelemetrySnapshot, TrainerStatus};
pub use store::{CalibrationStore, FileCalibrationStore, SharedCalibration};
pub use transport::{ChannelTransport, NullTransport, Outbound};
