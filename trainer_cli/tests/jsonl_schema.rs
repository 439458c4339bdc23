use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("cfg.toml");
    fs::write(&path, "[homing]\nhome_on_start = false\n").unwrap();
    path
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("not JSON ({e}): {l}")))
        .collect()
}

/// Scripted writes are acknowledged in order and the summary reflects them.
#[rstest]
fn scripted_run_emits_acks_and_summary() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let script = dir.path().join("script.txt");
    fs::write(
        &script,
        "# erg 200 W, then -2% grade, then a truncated sim write\n\
         20 05 C8 00\n\
         60 11 00 00 38 FF 00 00\n\
         100 11 00\n",
    )
    .unwrap();

    let out = Command::cargo_bin("trainer")
        .unwrap()
        .args(["--json", "--log-level", "error", "--config"])
        .arg(&cfg)
        .args(["run", "--duration-ms", "400", "--script"])
        .arg(&script)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines = json_lines(&out);
    let acks: Vec<(u64, u64)> = lines
        .iter()
        .filter(|v| v["event"] == "ack")
        .map(|v| (v["opcode"].as_u64().unwrap(), v["result"].as_u64().unwrap()))
        .collect();
    assert_eq!(acks, vec![(0x05, 1), (0x11, 1), (0x11, 4)]);

    let summary = lines
        .iter()
        .find(|v| v["event"] == "summary")
        .expect("summary line");
    assert_eq!(summary["mode"], "sim");
    assert_eq!(summary["status"], "ready");
    assert!(summary["iterations"].as_u64().unwrap() > 0);
    for key in ["step_errors", "elapsed_ms", "position", "target", "speed_mph", "power_w", "homed"] {
        assert!(summary.get(key).is_some(), "summary missing {key}: {summary}");
    }
}

/// A spinning roller shows up as speed in the summary and cadence in telemetry.
#[rstest]
fn simulated_speed_reaches_telemetry() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);
    let out = Command::cargo_bin("trainer")
        .unwrap()
        .args(["--json", "--log-level", "error", "--config"])
        .arg(&cfg)
        .args([
            "run",
            "--sim-speed",
            "20",
            "--duration-ms",
            "1500",
            "--telemetry",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let lines = json_lines(&out);
    let last_telemetry = lines
        .iter()
        .filter(|v| v["event"] == "telemetry")
        .last()
        .expect("telemetry lines");
    assert_eq!(last_telemetry["cadence_half_rpm"], 180);
    let summary = lines
        .iter()
        .find(|v| v["event"] == "summary")
        .expect("summary line");
    let speed = summary["speed_mph"].as_f64().unwrap();
    assert!(speed > 10.0 && speed < 22.0, "speed {speed}");
}

/// Errors under --json are a single JSON object on stderr.
#[rstest]
fn homing_timeout_json_error() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[homing]\nseek_timeout_ms = 50\n").unwrap();
    let out = Command::cargo_bin("trainer")
        .unwrap()
        .args(["--json", "--log-level", "off", "--config"])
        .arg(&cfg)
        .args(["home", "--sim-carriage", "5000"])
        .assert()
        .code(3)
        .get_output()
        .stderr
        .clone();
    let line = String::from_utf8_lossy(&out)
        .lines()
        .find(|l| l.contains("\"reason\""))
        .unwrap_or("")
        .to_string();
    let v: serde_json::Value = serde_json::from_str(&line).expect("json error");
    assert_eq!(v["reason"], "HomingTimeout");
    assert_eq!(v["details"]["phase"], "Seek");
}
