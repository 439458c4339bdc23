use std::fs::File;
use std::io::Write;

use rstest::rstest;
use tempfile::tempdir;
use trainer_config::{IdleCurve, PersistedCalibration, load_grid_csv, parse_grid_csv};

#[rstest]
fn loads_grid_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("power.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "speed_mph, 0, 250, 500").unwrap();
    writeln!(f, "0, 0, 0, 0").unwrap();
    writeln!(f, "5, 52, 68, 80").unwrap();
    writeln!(f, "10, 117, 143, 217").unwrap();
    drop(f);

    let g = load_grid_csv(&path).expect("load");
    assert_eq!(g.x, vec![0.0, 5.0, 10.0]);
    assert_eq!(g.y, vec![0.0, 250.0, 500.0]);
    assert_eq!(g.z[2], vec![117.0, 143.0, 217.0]);
}

#[rstest]
#[case("s,0,10\n0,1,2\n0,3,4\n", "X axis must be strictly increasing")]
#[case("s,10,0\n0,1,2\n5,3,4\n", "Y axis must be strictly increasing")]
#[case("s,0,ten\n0,1,2\n5,3,4\n", "not a number")]
#[case("s,0,10\n0,1\n5,3,4\n", "columns")]
#[case("s,0,10\n0,1,x\n5,3,4\n", "not a finite number")]
#[case("s,0,10\n0,1,2\n", "at least two breakpoints")]
fn rejects_malformed_grids(#[case] csv: &str, #[case] expected: &str) {
    let err = parse_grid_csv(csv.as_bytes()).expect_err("should fail");
    assert!(
        format!("{err}").contains(expected),
        "unexpected message: {err}"
    );
}

#[rstest]
fn missing_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.csv");
    let err = load_grid_csv(&path).expect_err("missing");
    assert!(format!("{err}").contains("nope.csv"));
}

#[rstest]
fn persisted_calibration_survives_toml() {
    let cal = PersistedCalibration {
        power: Some(vec![vec![0.0, 1.5], vec![2.0, 3.0]]),
        erg: None,
        sim: None,
        idle_curve: Some(IdleCurve {
            a: 1.0,
            b: 2.0,
            c: 3.0,
            d: 4.0,
        }),
    };
    let text = cal.to_toml().expect("serialize");
    let back = PersistedCalibration::from_toml(&text).expect("parse");
    assert_eq!(back, cal);
}

#[rstest]
fn partial_persisted_calibration_defaults_missing_entries() {
    let back = PersistedCalibration::from_toml("erg = [[0.0, 1.0], [2.0, 3.0]]\n").expect("parse");
    assert!(back.power.is_none());
    assert!(back.idle_curve.is_none());
    assert_eq!(back.erg.as_ref().map(Vec::len), Some(2));
}
