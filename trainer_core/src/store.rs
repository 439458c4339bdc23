//! Calibration persistence.
//!
//! [`CalibrationStore`] is the seam the diagnostic UI edits through. Readers
//! (the arbiter tick, telemetry) take a short read lock on a
//! [`SharedCalibration`]; edits replace a whole table or cell under the write
//! lock, so a lookup never sees a half-written grid.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use eyre::WrapErr;
use trainer_config::{CalibrationFiles, PersistedCalibration, load_grid_csv};

use crate::atomic::write_atomic;
use crate::calibration::{CalibrationSet, CalibrationTable, IdleCurve, TableError, TableKind};
use crate::error::{Result, TrainerError};

/// Read/modify access to the calibration surfaces and idle curve.
pub trait CalibrationStore {
    fn get_table(&self, kind: TableKind) -> CalibrationTable;
    /// Replace a grid; axes are fixed. Rejects a grid of the wrong shape.
    fn set_table(&self, kind: TableKind, grid: Vec<Vec<f64>>) -> Result<()>;
    fn reset_table(&self, kind: TableKind) -> Result<()>;
    /// Cell value, 0 for indices outside the grid.
    fn cell(&self, kind: TableKind, row: usize, col: usize) -> f64;
    /// Set one cell. Indices outside the grid are ignored.
    fn set_cell(&self, kind: TableKind, row: usize, col: usize, value: f64) -> Result<()>;
    fn idle_coefficients(&self) -> IdleCurve;
    fn set_idle_coefficients(&self, a: f64, b: f64, c: f64, d: f64) -> Result<()>;
    fn reset_idle_coefficients(&self) -> Result<()>;
}

/// In-memory calibration shared between the control loop and editors.
#[derive(Debug, Clone, Default)]
pub struct SharedCalibration {
    inner: Arc<RwLock<CalibrationSet>>,
}

impl SharedCalibration {
    pub fn new(set: CalibrationSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(set)),
        }
    }

    /// Short read lock. A poisoned lock still holds a consistent set because
    /// writers validate before mutating.
    pub fn read(&self) -> RwLockReadGuard<'_, CalibrationSet> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CalibrationSet> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> CalibrationSet {
        self.read().clone()
    }

    /// Apply grids and idle coefficients from a persisted file.
    pub fn apply_persisted(&self, p: &PersistedCalibration) -> Result<()> {
        let mut next = self.snapshot();
        for (kind, grid) in [
            (TableKind::Power, &p.power),
            (TableKind::Erg, &p.erg),
            (TableKind::Sim, &p.sim),
        ] {
            if let Some(g) = grid {
                next.table_mut(kind)
                    .replace_grid(g)
                    .map_err(table_error)?;
            }
        }
        if let Some(c) = &p.idle_curve {
            next.idle = c.into();
        }
        *self.write() = next;
        Ok(())
    }

    /// Load the CSV grids named in `files` into the matching tables. Each
    /// file's axes must equal the table's fixed axes.
    pub fn apply_csv_overrides(&self, files: &CalibrationFiles) -> Result<()> {
        for (kind, path) in [
            (TableKind::Power, &files.power_csv),
            (TableKind::Erg, &files.erg_csv),
            (TableKind::Sim, &files.sim_csv),
        ] {
            let Some(path) = path else { continue };
            let grid = load_grid_csv(Path::new(path))
                .wrap_err_with(|| format!("loading {kind} calibration from {path}"))?;
            {
                let current = self.read();
                let t = current.table(kind);
                if grid.x != t.x_axis() || grid.y != t.y_axis() {
                    let e = TrainerError::Config(format!("{kind} CSV axes do not match the table axes"));
                    return Err(eyre::Report::new(e)
                        .wrap_err(format!("loading {kind} calibration from {path}")));
                }
            }
            self.set_table(kind, grid.z)?;
            tracing::info!(table = %kind, path = %path, "calibration table loaded from CSV");
        }
        Ok(())
    }

    pub fn to_persisted(&self) -> PersistedCalibration {
        let set = self.read();
        PersistedCalibration {
            power: Some(set.power.grid()),
            erg: Some(set.erg.grid()),
            sim: Some(set.sim.grid()),
            idle_curve: Some(set.idle.into()),
        }
    }
}

fn table_error(e: TableError) -> eyre::Report {
    eyre::Report::new(TrainerError::Config(e.to_string()))
}

impl CalibrationStore for SharedCalibration {
    fn get_table(&self, kind: TableKind) -> CalibrationTable {
        self.read().table(kind).clone()
    }

    fn set_table(&self, kind: TableKind, grid: Vec<Vec<f64>>) -> Result<()> {
        self.write()
            .table_mut(kind)
            .replace_grid(&grid)
            .map_err(table_error)?;
        tracing::info!(table = %kind, "calibration table replaced");
        Ok(())
    }

    fn reset_table(&self, kind: TableKind) -> Result<()> {
        *self.write().table_mut(kind) = CalibrationTable::factory(kind);
        tracing::info!(table = %kind, "calibration table reset to factory");
        Ok(())
    }

    fn cell(&self, kind: TableKind, row: usize, col: usize) -> f64 {
        self.read().table(kind).value(row, col).unwrap_or(0.0)
    }

    fn set_cell(&self, kind: TableKind, row: usize, col: usize, value: f64) -> Result<()> {
        match self.write().table_mut(kind).set_value(row, col, value) {
            Ok(()) => {
                tracing::debug!(table = %kind, row, col, value, "calibration cell updated");
                Ok(())
            }
            Err(TableError::CellOutOfRange { .. }) => {
                tracing::debug!(table = %kind, row, col, "calibration cell outside grid; ignored");
                Ok(())
            }
            Err(e) => Err(table_error(e)),
        }
    }

    fn idle_coefficients(&self) -> IdleCurve {
        self.read().idle
    }

    fn set_idle_coefficients(&self, a: f64, b: f64, c: f64, d: f64) -> Result<()> {
        let curve = IdleCurve { a, b, c, d };
        let all_finite = [a, b, c, d].iter().all(|v| v.is_finite());
        if !all_finite {
            return Err(eyre::Report::new(TrainerError::Config(
                "idle curve coefficients must be finite".into(),
            )));
        }
        self.write().idle = curve;
        tracing::info!(a, b, c, d, "idle curve updated");
        Ok(())
    }

    fn reset_idle_coefficients(&self) -> Result<()> {
        self.write().idle = IdleCurve::default();
        Ok(())
    }
}

/// A [`SharedCalibration`] persisted to a TOML file after every edit.
#[derive(Debug, Clone)]
pub struct FileCalibrationStore {
    shared: SharedCalibration,
    path: PathBuf,
}

impl FileCalibrationStore {
    /// Open the store at `path`, loading it into `shared` if the file exists.
    /// A missing file leaves `shared` untouched.
    pub fn open(path: impl AsRef<Path>, shared: SharedCalibration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .wrap_err_with(|| format!("reading calibration store {}", path.display()))?;
            let persisted = PersistedCalibration::from_toml(&text)
                .wrap_err_with(|| format!("parsing calibration store {}", path.display()))?;
            shared.apply_persisted(&persisted)?;
            tracing::info!(path = %path.display(), "calibration store loaded");
        }
        Ok(Self { shared, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shared(&self) -> &SharedCalibration {
        &self.shared
    }

    pub fn save(&self) -> Result<()> {
        let text = self.shared.to_persisted().to_toml()?;
        write_atomic(&self.path, text.as_bytes())
            .wrap_err_with(|| format!("writing calibration store {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "calibration store saved");
        Ok(())
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn get_table(&self, kind: TableKind) -> CalibrationTable {
        self.shared.get_table(kind)
    }

    fn set_table(&self, kind: TableKind, grid: Vec<Vec<f64>>) -> Result<()> {
        self.shared.set_table(kind, grid)?;
        self.save()
    }

    fn reset_table(&self, kind: TableKind) -> Result<()> {
        self.shared.reset_table(kind)?;
        self.save()
    }

    fn cell(&self, kind: TableKind, row: usize, col: usize) -> f64 {
        self.shared.cell(kind, row, col)
    }

    fn set_cell(&self, kind: TableKind, row: usize, col: usize, value: f64) -> Result<()> {
        self.shared.set_cell(kind, row, col, value)?;
        self.save()
    }

    fn idle_coefficients(&self) -> IdleCurve {
        self.shared.idle_coefficients()
    }

    fn set_idle_coefficients(&self, a: f64, b: f64, c: f64, d: f64) -> Result<()> {
        self.shared.set_idle_coefficients(a, b, c, d)?;
        self.save()
    }

    fn reset_idle_coefficients(&self) -> Result<()> {
        self.shared.reset_idle_coefficients()?;
        self.save()
    }
}
