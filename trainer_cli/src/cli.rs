//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "trainer", version, about = "Smart trainer resistance controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/trainer_config.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            RtLock::Current
        } else {
            RtLock::None
        }
    }
}

/// Calibration surface selector for `lookup`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum TableArg {
    Power,
    Erg,
    Sim,
}

impl From<TableArg> for trainer_core::TableKind {
    fn from(t: TableArg) -> Self {
        match t {
            TableArg::Power => Self::Power,
            TableArg::Erg => Self::Erg,
            TableArg::Sim => Self::Sim,
        }
    }
}

/// Simulated rig knobs shared by `run` and `home`.
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct SimArgs {
    /// Roller speed emitted by the simulated hall sensor (mph)
    #[arg(long, value_name = "MPH", default_value_t = 0.0)]
    pub sim_speed: f64,
    /// Initial carriage distance from the limit switch (microsteps)
    #[arg(long, value_name = "STEPS", default_value_t = 400)]
    pub sim_carriage: i32,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop
    Run {
        #[command(flatten)]
        sim: SimArgs,
        /// Replay control point writes from FILE (`<ms> <hex bytes>` per line)
        #[arg(long, value_name = "FILE")]
        script: Option<PathBuf>,
        /// Stop after this many milliseconds (default: run until Ctrl-C)
        #[arg(long, value_name = "MS")]
        duration_ms: Option<u64>,
        /// Skip the start-up homing pass
        #[arg(long, action = ArgAction::SetTrue)]
        no_home: bool,
        /// Print every telemetry notification, not just a final summary
        #[arg(long, action = ArgAction::SetTrue)]
        telemetry: bool,
        /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on supported OSes.\n\nLinux: attempts SCHED_FIFO priority, pins the process to one CPU and locks memory with mlockall so the step timing is not disturbed by page faults. May require CAP_SYS_NICE / CAP_IPC_LOCK or root.\n\nOther OSes: only memory locking is attempted."
        )]
        rt: bool,
        /// Real-time priority for SCHED_FIFO on Linux (clamped to the system range)
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt: none, current, or all
        #[arg(long, value_enum, value_name = "MODE")]
        rt_lock: Option<RtLock>,
        /// CPU index to pin to with --rt (Linux only, default 0)
        #[arg(long, value_name = "CPU")]
        rt_cpu: Option<usize>,
    },
    /// Perform one homing pass and report the outcome
    Home {
        #[command(flatten)]
        sim: SimArgs,
    },
    /// Evaluate a calibration surface at one point
    Lookup {
        #[arg(long, value_enum)]
        table: TableArg,
        /// Speed in mph
        #[arg(long, allow_negative_numbers = true)]
        x: f64,
        /// Watts (power, erg) or grade percent (sim)
        #[arg(long, allow_negative_numbers = true)]
        y: f64,
    },
    /// Validate config and calibration, then exit
    SelfCheck,
    /// Health report for operational monitoring
    Health,
}
