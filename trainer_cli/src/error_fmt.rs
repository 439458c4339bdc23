//! Human-readable error descriptions and structured JSON error formatting.

use trainer_core::error::{BuildError, TrainerError};
use trainer_core::motion::HomingPhase;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingStepper => {
                "What happened: No stepper driver was provided to the controller.\nLikely causes: The actuator driver failed to initialize or was not wired into the builder.\nHow to fix: Ensure the driver is created successfully and passed via with_stepper(...).".to_string()
            }
            BuildError::MissingLimitSwitch => {
                "What happened: No limit switch was provided to the controller.\nLikely causes: The home switch input failed to initialize or was not wired into the builder.\nHow to fix: Ensure the switch is created successfully and passed via with_limit_switch(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TrainerError>() {
        return match te {
            TrainerError::HomingTimeout { phase } => {
                let hint = match phase {
                    HomingPhase::BackOff => "the switch stayed pressed while backing off (stuck or shorted switch)",
                    _ => "the switch never closed (unplugged switch, stalled motor, or wrong direction)",
                };
                format!(
                    "What happened: Homing timed out during {phase:?}.\nLikely causes: {hint}.\nHow to fix: Check the limit switch wiring and [pins].limit, verify motion.invert_dir, and raise homing.seek_timeout_ms if travel is long."
                )
            }
            TrainerError::Timeout => "What happened: A hardware operation timed out.\nLikely causes: Driver or GPIO not responding.\nHow to fix: Check power and wiring, then rerun with --log-level=debug.".to_string(),
            TrainerError::Hardware(m) | TrainerError::HardwareFault(m) => format!(
                "What happened: Hardware error ({m}).\nLikely causes: Wrong pin numbers, missing GPIO permissions, or a wiring fault.\nHow to fix: Verify the [pins] section and that the process may access GPIO."
            ),
            TrainerError::Config(m) => format!(
                "What happened: Configuration error ({m}).\nLikely causes: A calibration file or config value does not match what the controller expects.\nHow to fix: Fix the named file or value and rerun."
            ),
            TrainerError::State(m) => format!(
                "What happened: {m}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    if err.downcast_ref::<toml::de::Error>().is_some() {
        return format!(
            "What happened: The config file is not valid TOML ({err:#}).\nLikely causes: A typo, a wrong value type, or an unknown section layout.\nHow to fix: Compare with etc/trainer_config.toml and fix the reported line."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("must be") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: An out-of-range value in the TOML.\nHow to fix: Edit the config file and try again."
        );
    }

    if lower.contains("grid csv") || lower.contains("axes do not match") {
        return format!(
            "What happened: A calibration CSV could not be used ({msg}).\nLikely causes: Wrong header row, non-numeric cells, or breakpoints that differ from the table's fixed axes.\nHow to fix: Export the table with the same speed column and header breakpoints, then retry."
        );
    }

    if lower.contains("script") {
        return format!(
            "What happened: The control point script could not be read ({msg}).\nLikely causes: A line is not `<ms> <hex bytes>`.\nHow to fix: Use lines like `500 05 C8 00`; `#` starts a comment."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes for scripted use; everything unclassified is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<TrainerError>() {
        Some(TrainerError::HomingTimeout { .. }) => 3,
        Some(TrainerError::Hardware(_) | TrainerError::HardwareFault(_) | TrainerError::Timeout) => 4,
        Some(TrainerError::Config(_)) => 2,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "Config";
    }
    match err.downcast_ref::<TrainerError>() {
        Some(TrainerError::HomingTimeout { .. }) => "HomingTimeout",
        Some(TrainerError::Hardware(_) | TrainerError::HardwareFault(_)) => "Hardware",
        Some(TrainerError::Timeout) => "Timeout",
        Some(TrainerError::Config(_)) => "Config",
        Some(TrainerError::State(_)) => "State",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    if let Some(TrainerError::HomingTimeout { phase }) = err.downcast_ref::<TrainerError>() {
        return json!({
            "reason": reason_name(err),
            "details": { "phase": format!("{phase:?}") },
            "message": msg,
        })
        .to_string();
    }
    json!({ "reason": reason_name(err), "message": msg }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homing_timeout_has_its_own_code_and_phase() {
        let err = eyre::Report::new(TrainerError::HomingTimeout {
            phase: HomingPhase::Seek,
        });
        assert_eq!(exit_code_for_error(&err), 3);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "HomingTimeout");
        assert_eq!(v["details"]["phase"], "Seek");
        assert!(humanize(&err).contains("never closed"));
    }

    #[test]
    fn context_does_not_hide_typed_errors() {
        use eyre::WrapErr;
        let err: eyre::Result<()> =
            Err(eyre::Report::new(BuildError::InvalidConfig("control.tick_ms must be >= 1")))
                .wrap_err("building trainer");
        let err = err.unwrap_err();
        assert_eq!(exit_code_for_error(&err), 2);
        assert!(humanize(&err).contains("control.tick_ms"));
    }

    #[test]
    fn validation_messages_are_explained() {
        let err = eyre::eyre!("enable.speed_enable_mph must be > enable.speed_disable_mph");
        assert!(humanize(&err).starts_with("What happened: Configuration is invalid"));
        assert_eq!(exit_code_for_error(&err), 1);
    }
}
