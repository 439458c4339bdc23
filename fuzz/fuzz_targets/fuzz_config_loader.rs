#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = trainer_config::load_toml(data) {
        let _ = cfg.validate();
    }
    if let Ok(p) = trainer_config::PersistedCalibration::from_toml(data) {
        let _ = p.to_toml();
    }
});
