//! Hardware backends for the trainer core.
//!
//! - `sim`: a simulated carriage, limit switch and speed-sensor pulse
//!   generator for host runs and tests.
//! - `gpio` (feature `hardware`, Linux only): `rppal` step/dir/enable outputs,
//!   limit switch input and hall-sensor interrupt.

pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

pub use error::HwError;
pub use sim::{PulseGenerator, RollerGeometry, SimLimitSwitch, SimRig, SimStepper};
