//! Fitness-machine control point and indoor-bike telemetry framing.
//!
//! Control point writes are `[opcode, payload...]`; every write is answered
//! with a 3-byte response `[0x80, request_opcode, result]`. All multi-byte
//! fields are little-endian.

use thiserror::Error;

pub mod opcode {
    pub const REQUEST_CONTROL: u8 = 0x00;
    pub const RESET: u8 = 0x01;
    pub const SET_TARGET_RESISTANCE: u8 = 0x04;
    pub const SET_TARGET_POWER: u8 = 0x05;
    pub const START_RESUME: u8 = 0x07;
    pub const STOP_PAUSE: u8 = 0x08;
    pub const SET_SIMULATION: u8 = 0x11;
    pub const RESPONSE: u8 = 0x80;
}

/// Result codes carried in the third byte of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0x01,
    OpcodeNotSupported = 0x02,
    InvalidParameter = 0x04,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    pub request_opcode: u8,
    pub result: ResultCode,
}

impl AckFrame {
    pub fn new(request_opcode: u8, result: ResultCode) -> Self {
        Self {
            request_opcode,
            result,
        }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [opcode::RESPONSE, self.request_opcode, self.result as u8]
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("opcode 0x{0:02X} is not supported")]
    UnsupportedOpcode(u8),
    #[error("opcode 0x{opcode:02X} needs {needed} payload bytes, got {got}")]
    InvalidParameter { opcode: u8, needed: usize, got: usize },
    #[error("empty control point write")]
    Empty,
}

impl ProtocolError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            ProtocolError::UnsupportedOpcode(_) => ResultCode::OpcodeNotSupported,
            ProtocolError::InvalidParameter { .. } | ProtocolError::Empty => {
                ResultCode::InvalidParameter
            }
        }
    }
}

/// Indoor-bike simulation parameters (opcode 0x11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationParams {
    /// Wind speed in mm/s.
    pub wind_mm_s: i16,
    /// Grade in hundredths of a percent.
    pub grade_hundredths: i16,
    /// Rolling resistance coefficient in units of 0.0001.
    pub crr: u8,
    /// Wind resistance coefficient in units of 0.01 kg/m.
    pub cw: u8,
}

impl SimulationParams {
    pub fn grade_percent(&self) -> f64 {
        f64::from(self.grade_hundredths) / 100.0
    }
}

/// A parsed control point request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    RequestControl,
    Reset,
    /// Resistance level 0–100 (raw byte; larger values are clamped by the arbiter).
    SetTargetResistance { level: u8 },
    SetTargetPower { watts: u16 },
    StartResume,
    StopPause { stop_type: u8 },
    SetSimulation(SimulationParams),
}

fn need(opcode: u8, payload: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if payload.len() < needed {
        Err(ProtocolError::InvalidParameter {
            opcode,
            needed,
            got: payload.len(),
        })
    } else {
        Ok(())
    }
}

impl ControlRequest {
    /// Parse a request from its opcode and payload. Trailing bytes are ignored.
    pub fn parse(op: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        match op {
            opcode::REQUEST_CONTROL => Ok(Self::RequestControl),
            opcode::RESET => Ok(Self::Reset),
            opcode::SET_TARGET_RESISTANCE => {
                need(op, payload, 1)?;
                Ok(Self::SetTargetResistance { level: payload[0] })
            }
            opcode::SET_TARGET_POWER => {
                need(op, payload, 2)?;
                Ok(Self::SetTargetPower {
                    watts: u16::from_le_bytes([payload[0], payload[1]]),
                })
            }
            opcode::START_RESUME => Ok(Self::StartResume),
            opcode::STOP_PAUSE => {
                need(op, payload, 1)?;
                Ok(Self::StopPause {
                    stop_type: payload[0],
                })
            }
            opcode::SET_SIMULATION => {
                need(op, payload, 6)?;
                Ok(Self::SetSimulation(SimulationParams {
                    wind_mm_s: i16::from_le_bytes([payload[0], payload[1]]),
                    grade_hundredths: i16::from_le_bytes([payload[2], payload[3]]),
                    crr: payload[4],
                    cw: payload[5],
                }))
            }
            other => Err(ProtocolError::UnsupportedOpcode(other)),
        }
    }

    /// Parse a raw control point write (`[opcode, payload...]`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&op, payload) = bytes.split_first().ok_or(ProtocolError::Empty)?;
        Self::parse(op, payload)
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Self::RequestControl => opcode::REQUEST_CONTROL,
            Self::Reset => opcode::RESET,
            Self::SetTargetResistance { .. } => opcode::SET_TARGET_RESISTANCE,
            Self::SetTargetPower { .. } => opcode::SET_TARGET_POWER,
            Self::StartResume => opcode::START_RESUME,
            Self::StopPause { .. } => opcode::STOP_PAUSE,
            Self::SetSimulation(_) => opcode::SET_SIMULATION,
        }
    }
}

/// Indoor-bike data flags: instantaneous cadence and power present,
/// instantaneous speed field present but unused.
pub const INDOOR_BIKE_FLAGS: u16 = 0x0044;
/// Telemetry payload length.
pub const INDOOR_BIKE_LEN: usize = 10;
/// Reported power is clamped to this.
pub const MAX_REPORTED_WATTS: f64 = 2000.0;
/// Cadence reported while moving, in 0.5 rpm units (90 rpm).
pub const NOMINAL_CADENCE_HALF_RPM: u16 = 180;
/// Below this speed cadence is reported as zero.
pub const CADENCE_MIN_MPH: f64 = 2.0;

/// One indoor-bike telemetry notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndoorBikeData {
    pub speed_mph: f64,
    pub power_watts: f64,
}

impl IndoorBikeData {
    /// Layout: flags u16, speed u16 (0), cadence u16, power i16, 2 reserved bytes.
    pub fn encode(&self) -> [u8; INDOOR_BIKE_LEN] {
        let cadence = if self.speed_mph >= CADENCE_MIN_MPH {
            NOMINAL_CADENCE_HALF_RPM
        } else {
            0
        };
        // `as` saturates and maps NaN to 0.
        let power = self.power_watts.clamp(0.0, MAX_REPORTED_WATTS) as i16;
        let mut out = [0u8; INDOOR_BIKE_LEN];
        out[0..2].copy_from_slice(&INDOOR_BIKE_FLAGS.to_le_bytes());
        out[4..6].copy_from_slice(&cadence.to_le_bytes());
        out[6..8].copy_from_slice(&power.to_le_bytes());
        out
    }
}
