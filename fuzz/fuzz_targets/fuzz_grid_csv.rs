#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(grid) = trainer_config::parse_grid_csv(data) {
        assert_eq!(grid.z.len(), grid.x.len());
        assert!(grid.z.iter().all(|row| row.len() == grid.y.len()));
    }
});
