//! Command implementations: config mapping, hardware assembly, the control
//! loop with optional script replay, and the one-shot commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use eyre::{Result, WrapErr};
use serde_json::json;
use trainer_config::{CalibrationFiles, Config};
use trainer_core::builder::{BoxedLimitSwitch, BoxedStepper, validate_settings};
use trainer_core::runner::{RunSummary, run_for};
use trainer_core::{
    CalibrationStore, ChannelTransport, ControlPoint, FileCalibrationStore, HomingOutcome,
    Outbound, SharedCalibration, TableKind, Trainer, TrainerError, TrainerSettings,
};

use crate::cli::{RtLock, SimArgs};
use crate::rt::{RtOptions, setup_rt_once};

/// Frames the printer may fall behind by before the core starts dropping.
const OUTBOUND_QUEUE: usize = 256;
/// Longest single sleep while waiting for the next script step.
const SCRIPT_NAP: Duration = Duration::from_millis(5);

// ── config & calibration ─────────────────────────────────────────────────────

pub fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config {}", path.display()))?;
    let cfg = trainer_config::load_toml(&text)
        .wrap_err_with(|| format!("parsing config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Relative paths in the config are relative to the config file.
fn resolve(base: &Path, p: &Option<String>) -> Option<String> {
    p.as_ref().map(|p| {
        let path = Path::new(p);
        if path.is_absolute() {
            p.clone()
        } else {
            base.join(path).display().to_string()
        }
    })
}

fn resolved_files(cfg: &Config, config_path: &Path) -> CalibrationFiles {
    let base = config_path.parent().unwrap_or(Path::new("."));
    let c = &cfg.calibration;
    CalibrationFiles {
        power_csv: resolve(base, &c.power_csv),
        erg_csv: resolve(base, &c.erg_csv),
        sim_csv: resolve(base, &c.sim_csv),
        store: resolve(base, &c.store),
    }
}

/// Factory tables, then the configured idle curve, then CSV grids, then the
/// persisted store (last writer wins).
pub fn load_calibration(
    cfg: &Config,
    config_path: &Path,
) -> Result<(SharedCalibration, Option<FileCalibrationStore>)> {
    let shared = SharedCalibration::default();
    let i = &cfg.idle_curve;
    shared.set_idle_coefficients(i.a, i.b, i.c, i.d)?;

    let files = resolved_files(cfg, config_path);
    shared.apply_csv_overrides(&files)?;
    let store = files
        .store
        .as_deref()
        .map(|p| FileCalibrationStore::open(p, shared.clone()))
        .transpose()?;
    Ok((shared, store))
}

// ── hardware assembly ────────────────────────────────────────────────────────

/// Keeps the speed source alive for as long as the trainer runs.
enum SpeedSource {
    Sim(trainer_hardware::PulseGenerator),
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    Hall(trainer_hardware::gpio::HallInterrupt),
}

struct Assembled {
    trainer: Trainer,
    rig: Option<trainer_hardware::SimRig>,
    _speed: SpeedSource,
}

fn backend_name() -> &'static str {
    if cfg!(all(feature = "hardware", target_os = "linux")) {
        "hardware"
    } else {
        "sim"
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn actuator(
    cfg: &Config,
    _sim: SimArgs,
) -> Result<(BoxedStepper, BoxedLimitSwitch, Option<trainer_hardware::SimRig>)> {
    use trainer_hardware::gpio::{GpioLimitSwitch, GpioStepper};
    let p = &cfg.pins;
    let stepper = GpioStepper::new(p.step, p.dir, p.enable, cfg.motion.invert_dir)
        .wrap_err("open stepper pins")?;
    let limit = GpioLimitSwitch::new(p.limit).wrap_err("open limit switch pin")?;
    Ok((Box::new(stepper), Box::new(limit), None))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn actuator(
    _cfg: &Config,
    sim: SimArgs,
) -> Result<(BoxedStepper, BoxedLimitSwitch, Option<trainer_hardware::SimRig>)> {
    let rig = trainer_hardware::SimRig::new(sim.sim_carriage);
    Ok((Box::new(rig.stepper()), Box::new(rig.limit_switch()), Some(rig)))
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn speed_source(cfg: &Config, _sim: SimArgs, on_edge: impl Fn() + Send + 'static) -> Result<SpeedSource> {
    let irq = trainer_hardware::gpio::attach_hall_interrupt(cfg.pins.hall, on_edge)
        .wrap_err("attach hall sensor interrupt")?;
    Ok(SpeedSource::Hall(irq))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn speed_source(cfg: &Config, sim: SimArgs, on_edge: impl Fn() + Send + 'static) -> Result<SpeedSource> {
    let geometry = trainer_hardware::RollerGeometry {
        pulses_per_rev: cfg.speed_sensor.pulses_per_rev,
        roller_diameter_in: cfg.speed_sensor.roller_diameter_in,
    };
    let generator = trainer_hardware::PulseGenerator::spawn(geometry, sim.sim_speed, on_edge);
    if !generator.is_running() {
        return Err(eyre::Report::new(TrainerError::State(
            "simulated speed sensor did not start".into(),
        )));
    }
    Ok(SpeedSource::Sim(generator))
}

fn assemble(
    cfg: &Config,
    settings: TrainerSettings,
    calibration: SharedCalibration,
    transport: Option<ChannelTransport>,
    sim: SimArgs,
) -> Result<Assembled> {
    let (stepper, limit, rig) = actuator(cfg, sim)?;
    let mut builder = Trainer::builder()
        .with_stepper(stepper)
        .with_limit_switch(limit)
        .with_settings(settings)
        .with_calibration(calibration);
    if let Some(t) = transport {
        builder = builder.with_transport(Arc::new(t));
    }
    let trainer = builder.build().wrap_err("building trainer")?;

    let capture = trainer.pulse_capture();
    let speed = speed_source(cfg, sim, move || {
        capture.on_pulse_edge();
    })?;
    Ok(Assembled {
        trainer,
        rig,
        _speed: speed,
    })
}

// ── script replay ────────────────────────────────────────────────────────────

/// One scripted control point write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub at_ms: u64,
    pub bytes: Vec<u8>,
}

/// Parse `<ms> <hex bytes>` lines. Hex may be spaced (`05 C8 00`) or packed
/// (`05C800`); `#` starts a comment. Steps are returned in time order.
pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>> {
    let mut steps = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let n = idx + 1;
        let line = raw.find('#').map_or(raw, |i| &raw[..i]).trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let at_ms = parts
            .next()
            .and_then(|t| t.parse::<u64>().ok())
            .ok_or_else(|| eyre::eyre!("script line {n}: expected a millisecond offset"))?;
        let hex: String = parts.collect();
        if hex.is_empty() {
            eyre::bail!("script line {n}: no bytes to write");
        }
        if !hex.is_ascii() || hex.len() % 2 != 0 {
            eyre::bail!("script line {n}: {hex:?} is not a whole number of hex bytes");
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|e| eyre::eyre!("script line {n}: {e}"))?;
        steps.push(ScriptStep { at_ms, bytes });
    }
    steps.sort_by_key(|s| s.at_ms);
    Ok(steps)
}

fn spawn_script(
    steps: Vec<ScriptStep>,
    cp: ControlPoint,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let start = Instant::now();
    std::thread::Builder::new()
        .name("script".into())
        .spawn(move || {
            for step in steps {
                let due = start + Duration::from_millis(step.at_ms);
                loop {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    let now = Instant::now();
                    if now >= due {
                        break;
                    }
                    std::thread::sleep((due - now).min(SCRIPT_NAP));
                }
                tracing::debug!(at_ms = step.at_ms, bytes = %hex(&step.bytes), "script write");
                if cp.on_write(&step.bytes).is_none() {
                    tracing::warn!(at_ms = step.at_ms, "script write had no opcode");
                }
            }
        })
        .wrap_err("spawning script thread")
}

// ── output ───────────────────────────────────────────────────────────────────

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_outbound(msg: &Outbound, json: bool, telemetry: bool) {
    match msg {
        Outbound::Ack(b) => {
            if json {
                println!(
                    "{}",
                    json!({ "event": "ack", "opcode": b[1], "result": b[2], "bytes": hex(b) })
                );
            } else {
                println!("ack {}", hex(b));
            }
        }
        Outbound::Notify(p) if telemetry && p.len() >= 8 => {
            let cadence = u16::from_le_bytes([p[4], p[5]]);
            let power = i16::from_le_bytes([p[6], p[7]]);
            if json {
                println!(
                    "{}",
                    json!({ "event": "telemetry", "power_w": power, "cadence_half_rpm": cadence, "bytes": hex(p) })
                );
            } else {
                println!("telemetry power={power} W cadence={cadence} [{}]", hex(p));
            }
        }
        Outbound::Notify(_) => {}
    }
}

fn spawn_printer(rx: Receiver<Outbound>, json: bool, telemetry: bool) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("printer".into())
        .spawn(move || {
            for msg in rx {
                print_outbound(&msg, json, telemetry);
            }
        })
        .wrap_err("spawning output thread")
}

fn print_summary(t: &Trainer, s: &RunSummary, json: bool) {
    let snap = t.telemetry();
    if json {
        println!(
            "{}",
            json!({
                "event": "summary",
                "iterations": s.iterations,
                "step_errors": s.step_errors,
                "elapsed_ms": s.elapsed_ms,
                "mode": snap.mode.as_str(),
                "status": snap.status().as_str(),
                "position": snap.logical_position,
                "target": snap.target_position,
                "speed_mph": snap.speed_mph,
                "power_w": snap.power_watts,
                "homed": snap.homed,
            })
        );
    } else {
        println!(
            "run complete: {} iterations, {} step errors in {} ms; mode={} status={} position={} target={} speed={:.1} mph power={:.0} W",
            s.iterations,
            s.step_errors,
            s.elapsed_ms,
            snap.mode,
            snap.status().as_str(),
            snap.logical_position,
            snap.target_position,
            snap.speed_mph,
            snap.power_watts,
        );
    }
}

// ── commands ─────────────────────────────────────────────────────────────────

pub struct RunArgs {
    pub sim: SimArgs,
    pub script: Option<PathBuf>,
    pub duration_ms: Option<u64>,
    pub no_home: bool,
    pub telemetry: bool,
    pub rt: bool,
    pub rt_prio: Option<i32>,
    pub rt_lock: Option<RtLock>,
    pub rt_cpu: Option<usize>,
}

pub fn run_loop(
    cfg: &Config,
    config_path: &Path,
    args: RunArgs,
    json: bool,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    if args.rt {
        setup_rt_once(RtOptions {
            prio: args.rt_prio,
            lock: args.rt_lock.unwrap_or_else(RtLock::os_default),
            cpu: args.rt_cpu,
        });
    }

    let script = match &args.script {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .wrap_err_with(|| format!("reading script {}", p.display()))?;
            parse_script(&text).wrap_err_with(|| format!("parsing script {}", p.display()))?
        }
        None => Vec::new(),
    };

    let mut settings = TrainerSettings::from(cfg);
    if args.no_home {
        settings.homing.home_on_start = false;
    }
    let (calibration, _store) = load_calibration(cfg, config_path)?;
    let (transport, rx) = ChannelTransport::bounded(OUTBOUND_QUEUE);
    let printer = spawn_printer(rx, json, args.telemetry)?;

    let summary = {
        let Assembled {
            mut trainer,
            rig: _rig,
            _speed,
        } = assemble(cfg, settings, calibration, Some(transport), args.sim)?;
        tracing::info!(
            backend = backend_name(),
            sim_speed = args.sim.sim_speed,
            steps = script.len(),
            "run start"
        );

        let script_thread = if script.is_empty() {
            None
        } else {
            Some(spawn_script(script, trainer.control_point(), shutdown.clone())?)
        };
        let result = run_for(
            &mut trainer,
            &shutdown,
            args.duration_ms.map(Duration::from_millis),
        );
        shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = script_thread {
            let _ = h.join();
        }
        let summary = result?;
        print_summary(&trainer, &summary, json);
        summary
    };
    // All senders are gone once the trainer is dropped.
    let _ = printer.join();
    tracing::debug!(?summary, "run finished");
    Ok(())
}

pub fn home(cfg: &Config, config_path: &Path, sim: SimArgs, json: bool) -> Result<()> {
    let (calibration, _store) = load_calibration(cfg, config_path)?;
    let Assembled {
        mut trainer, rig, ..
    } = assemble(cfg, TrainerSettings::from(cfg), calibration, None, sim)?;

    let started = Instant::now();
    let outcome = trainer.home().wrap_err("homing")?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    trainer.shutdown()?;

    match outcome {
        HomingOutcome::Homed => {
            let carriage = rig.as_ref().map(trainer_hardware::SimRig::carriage);
            if json {
                println!(
                    "{}",
                    json!({ "outcome": "homed", "elapsed_ms": elapsed_ms, "sim_carriage": carriage })
                );
            } else {
                println!("homed in {elapsed_ms} ms");
            }
            Ok(())
        }
        HomingOutcome::TimedOut { phase } => {
            Err(eyre::Report::new(TrainerError::HomingTimeout { phase }))
        }
    }
}

pub fn lookup(
    cfg: &Config,
    config_path: &Path,
    kind: TableKind,
    x: f64,
    y: f64,
    json: bool,
) -> Result<()> {
    let (calibration, _store) = load_calibration(cfg, config_path)?;
    let value = calibration.read().table(kind).lookup(x, y);
    if json {
        println!(
            "{}",
            json!({ "table": kind.name(), "x": x, "y": y, "value": value })
        );
    } else {
        println!("{kind}({x}, {y}) = {value:.3}");
    }
    Ok(())
}

pub fn self_check(cfg: &Config, config_path: &Path) -> Result<()> {
    let settings = TrainerSettings::from(cfg);
    validate_settings(&settings)?;
    load_calibration(cfg, config_path)?;
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    {
        actuator(cfg, SimArgs { sim_speed: 0.0, sim_carriage: 0 })?;
    }
    println!("self-check ok ({})", backend_name());
    Ok(())
}

pub fn health(cfg: &Config, config_path: &Path) -> Result<()> {
    validate_settings(&TrainerSettings::from(cfg))?;
    let (calibration, store) = load_calibration(cfg, config_path)?;
    let set = calibration.snapshot();
    let tables: serde_json::Map<String, serde_json::Value> = TableKind::ALL
        .iter()
        .map(|&k| {
            let t = set.table(k);
            (
                k.name().to_string(),
                json!({ "rows": t.rows(), "cols": t.cols() }),
            )
        })
        .collect();
    println!(
        "{}",
        json!({
            "status": "ok",
            "backend": backend_name(),
            "config": config_path.display().to_string(),
            "tables": tables,
            "idle_curve": { "a": set.idle.a, "b": set.idle.b, "c": set.idle.c, "d": set.idle.d },
            "calibration_store": store.map(|s| s.path().display().to_string()),
        })
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_accepts_spaced_and_packed_hex() {
        let steps = parse_script(
            "# warm-up\n500 05 C8 00\n\n100 11000038FF0000  # grade -2%\n",
        )
        .unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep {
                    at_ms: 100,
                    bytes: vec![0x11, 0x00, 0x00, 0x38, 0xFF, 0x00, 0x00]
                },
                ScriptStep {
                    at_ms: 500,
                    bytes: vec![0x05, 0xC8, 0x00]
                },
            ]
        );
    }

    #[test]
    fn script_errors_name_the_line() {
        let err = parse_script("0 00\nsoon 05 C8 00\n").unwrap_err();
        assert!(err.to_string().contains("script line 2"), "{err}");
        let err = parse_script("10 5C8\n").unwrap_err();
        assert!(err.to_string().contains("hex bytes"), "{err}");
        let err = parse_script("10\n").unwrap_err();
        assert!(err.to_string().contains("no bytes"), "{err}");
    }

    #[test]
    fn relative_calibration_paths_follow_the_config() {
        let mut cfg = Config::default();
        cfg.calibration.store = Some("cal.toml".into());
        cfg.calibration.sim_csv = Some("/abs/sim.csv".into());
        let files = resolved_files(&cfg, Path::new("/etc/trainer/trainer.toml"));
        assert_eq!(files.store.as_deref(), Some("/etc/trainer/cal.toml"));
        assert_eq!(files.sim_csv.as_deref(), Some("/abs/sim.csv"));
        assert_eq!(files.power_csv, None);
    }
}
