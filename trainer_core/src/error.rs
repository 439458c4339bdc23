use thiserror::Error;

use crate::motion::HomingPhase;

#[derive(Debug, Error, Clone)]
pub enum TrainerError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for hardware")]
    Timeout,
    #[error("homing timeout during {phase:?}; position reference is not trusted")]
    HomingTimeout { phase: HomingPhase },
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing stepper driver")]
    MissingStepper,
    #[error("missing limit switch")]
    MissingLimitSwitch,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
