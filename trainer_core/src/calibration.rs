//! Calibration surfaces and bilinear lookup.
//!
//! Three 2-D tables drive the control modes:
//!
//! - **Power**: (speed mph, logical position) → estimated watts
//! - **Erg**: (speed mph, target watts) → logical position
//! - **Sim**: (speed mph, grade %) → logical position
//!
//! Axes are strictly increasing and the grid is stored row-major with one row
//! per X breakpoint. Out-of-range queries never extrapolate; see
//! [`TableKind`] for the per-table policy.

use thiserror::Error;

use crate::position::{LOGICAL_MAX, LOGICAL_MIN};

/// Neutral position returned by the Sim table for speeds outside its axis.
pub const SIM_NEUTRAL: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Power,
    Erg,
    Sim,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [TableKind::Power, TableKind::Erg, TableKind::Sim];

    pub fn name(self) -> &'static str {
        match self {
            TableKind::Power => "power",
            TableKind::Erg => "erg",
            TableKind::Sim => "sim",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "power" => Some(TableKind::Power),
            "erg" => Some(TableKind::Erg),
            "sim" => Some(TableKind::Sim),
            _ => None,
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("{table} grid must be {rows}x{cols}, got {got_rows} rows")]
    RowCount {
        table: TableKind,
        rows: usize,
        cols: usize,
        got_rows: usize,
    },
    #[error("{table} grid row {row} must have {cols} columns, got {got}")]
    ColumnCount {
        table: TableKind,
        row: usize,
        cols: usize,
        got: usize,
    },
    #[error("{table} {axis} axis must be strictly increasing with at least two breakpoints")]
    Axis { table: TableKind, axis: char },
    #[error("{table} grid contains a non-finite value at ({row}, {col})")]
    NonFinite {
        table: TableKind,
        row: usize,
        col: usize,
    },
    #[error("{table} cell ({row}, {col}) is outside the grid")]
    CellOutOfRange {
        table: TableKind,
        row: usize,
        col: usize,
    },
}

const SPEED_AXIS: [f64; 7] = [0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 50.0];

const POWER_Y: [f64; 5] = [0.0, 250.0, 500.0, 750.0, 1000.0];
const POWER_Z: [[f64; 5]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [52.0, 68.0, 80.0, 102.0, 124.0],
    [117.0, 143.0, 217.0, 280.0, 343.0],
    [188.0, 246.0, 383.0, 490.0, 597.0],
    [265.0, 380.0, 580.0, 732.0, 884.0],
    [349.0, 544.0, 806.0, 1006.0, 1206.0],
    [861.0, 1806.0, 2388.0, 2856.0, 3324.0],
];

const ERG_Y: [f64; 9] = [0.0, 100.0, 150.0, 200.0, 250.0, 300.0, 400.0, 600.0, 1000.0];
const ERG_Z: [[f64; 9]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [0.0, 739.0, 1000.0, 1000.0, 1000.0, 1000.0, 1000.0, 1000.0, 1000.0],
    [0.0, 0.0, 212.0, 442.0, 651.0, 841.0, 1000.0, 1000.0, 1000.0],
    [0.0, 0.0, 0.0, 70.0, 198.0, 322.0, 560.0, 996.0, 1000.0],
    [0.0, 0.0, 0.0, 0.0, 0.0, 79.0, 238.0, 552.0, 1000.0],
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 67.0, 285.0, 745.0],
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 26.0],
];

const SIM_X: [f64; 8] = [0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 50.0];
const SIM_Y: [f64; 7] = [-4.0, 0.0, 2.0, 4.0, 6.0, 8.0, 10.0];
const SIM_Z: [[f64; 7]; 8] = [
    [0.0, 167.0, 333.0, 500.0, 667.0, 833.0, 1000.0],
    [0.0, 167.0, 333.0, 500.0, 667.0, 833.0, 1000.0],
    [0.0, 167.0, 333.0, 500.0, 667.0, 833.0, 1000.0],
    [0.0, 167.0, 333.0, 500.0, 667.0, 833.0, 1000.0],
    [0.0, 167.0, 333.0, 500.0, 667.0, 833.0, 1000.0],
    [167.0, 333.0, 500.0, 677.0, 834.0, 1000.0, 1000.0],
    [333.0, 500.0, 677.0, 834.0, 1000.0, 1000.0, 1000.0],
    [500.0, 500.0, 677.0, 834.0, 1000.0, 1000.0, 1000.0],
];

fn rows_of<const N: usize>(z: &[[f64; N]]) -> Vec<Vec<f64>> {
    z.iter().map(|r| r.to_vec()).collect()
}

fn axis_ok(a: &[f64]) -> bool {
    a.len() >= 2 && a.iter().all(|v| v.is_finite()) && a.windows(2).all(|w| w[0] < w[1])
}

/// A calibrated surface with fixed axes and a mutable grid.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    kind: TableKind,
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
}

impl CalibrationTable {
    pub fn new(
        kind: TableKind,
        x: Vec<f64>,
        y: Vec<f64>,
        grid: Vec<Vec<f64>>,
    ) -> Result<Self, TableError> {
        if !axis_ok(&x) {
            return Err(TableError::Axis {
                table: kind,
                axis: 'x',
            });
        }
        if !axis_ok(&y) {
            return Err(TableError::Axis {
                table: kind,
                axis: 'y',
            });
        }
        let z = flatten(kind, &grid, x.len(), y.len())?;
        Ok(Self { kind, x, y, z })
    }

    /// The factory surface shipped with the firmware.
    pub fn factory(kind: TableKind) -> Self {
        let (x, y, grid) = match kind {
            TableKind::Power => (SPEED_AXIS.to_vec(), POWER_Y.to_vec(), rows_of(&POWER_Z)),
            TableKind::Erg => (SPEED_AXIS.to_vec(), ERG_Y.to_vec(), rows_of(&ERG_Z)),
            TableKind::Sim => (SIM_X.to_vec(), SIM_Y.to_vec(), rows_of(&SIM_Z)),
        };
        let z = grid.into_iter().flatten().collect();
        Self { kind, x, y, z }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn x_axis(&self) -> &[f64] {
        &self.x
    }

    pub fn y_axis(&self) -> &[f64] {
        &self.y
    }

    pub fn rows(&self) -> usize {
        self.x.len()
    }

    pub fn cols(&self) -> usize {
        self.y.len()
    }

    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows() && col < self.cols() {
            Some(self.z[row * self.cols() + col])
        } else {
            None
        }
    }

    pub fn set_value(&mut self, row: usize, col: usize, v: f64) -> Result<(), TableError> {
        if row >= self.rows() || col >= self.cols() {
            return Err(TableError::CellOutOfRange {
                table: self.kind,
                row,
                col,
            });
        }
        if !v.is_finite() {
            return Err(TableError::NonFinite {
                table: self.kind,
                row,
                col,
            });
        }
        let cols = self.cols();
        self.z[row * cols + col] = v;
        Ok(())
    }

    /// Grid as rows (one per X breakpoint).
    pub fn grid(&self) -> Vec<Vec<f64>> {
        self.z.chunks(self.cols()).map(<[f64]>::to_vec).collect()
    }

    /// Replace the grid, keeping the axes. The table is unchanged on error.
    pub fn replace_grid(&mut self, grid: &[Vec<f64>]) -> Result<(), TableError> {
        self.z = flatten(self.kind, grid, self.rows(), self.cols())?;
        Ok(())
    }

    /// Bilinear lookup with this table's out-of-range policy.
    pub fn lookup(&self, x: f64, y: f64) -> f64 {
        lookup(self, x, y)
    }
}

fn flatten(
    kind: TableKind,
    grid: &[Vec<f64>],
    rows: usize,
    cols: usize,
) -> Result<Vec<f64>, TableError> {
    if grid.len() != rows {
        return Err(TableError::RowCount {
            table: kind,
            rows,
            cols,
            got_rows: grid.len(),
        });
    }
    let mut z = Vec::with_capacity(rows * cols);
    for (r, row) in grid.iter().enumerate() {
        if row.len() != cols {
            return Err(TableError::ColumnCount {
                table: kind,
                row: r,
                cols,
                got: row.len(),
            });
        }
        for (c, v) in row.iter().enumerate() {
            if !v.is_finite() {
                return Err(TableError::NonFinite {
                    table: kind,
                    row: r,
                    col: c,
                });
            }
            z.push(*v);
        }
    }
    Ok(z)
}

/// Index `i` of the bracketing interval `[axis[i], axis[i+1]]`: the greatest
/// breakpoint not above `v`, scanning down from the last interval so the top
/// breakpoint itself lands in the final interval.
#[inline]
fn bracket(axis: &[f64], v: f64) -> usize {
    let mut i = axis.len() - 2;
    while i > 0 && v < axis[i] {
        i -= 1;
    }
    i
}

#[inline]
fn in_range(axis: &[f64], v: f64) -> bool {
    v >= axis[0] && v <= axis[axis.len() - 1]
}

/// Bilinear interpolation over `table` at `(x, y)`.
///
/// Power and Erg return 0 when either coordinate is outside its axis (or NaN).
/// Sim clamps Y to its axis and returns [`SIM_NEUTRAL`] when X is outside.
/// Grid points are reproduced exactly.
pub fn lookup(table: &CalibrationTable, x: f64, y: f64) -> f64 {
    let (xs, ys) = (&table.x, &table.y);
    let y = match table.kind {
        TableKind::Power | TableKind::Erg => {
            if !in_range(xs, x) || !in_range(ys, y) {
                return 0.0;
            }
            y
        }
        TableKind::Sim => {
            if !in_range(xs, x) {
                return SIM_NEUTRAL;
            }
            if y.is_nan() {
                return SIM_NEUTRAL;
            }
            y.clamp(ys[0], ys[ys.len() - 1])
        }
    };

    let i = bracket(xs, x);
    let j = bracket(ys, y);
    let cols = ys.len();
    let q11 = table.z[i * cols + j];
    let q12 = table.z[i * cols + j + 1];
    let q21 = table.z[(i + 1) * cols + j];
    let q22 = table.z[(i + 1) * cols + j + 1];

    let (x1, x2) = (xs[i], xs[i + 1]);
    let (y1, y2) = (ys[j], ys[j + 1]);
    let wx1 = (x2 - x) / (x2 - x1);
    let wx2 = (x - x1) / (x2 - x1);
    let r1 = wx1 * q11 + wx2 * q21;
    let r2 = wx1 * q12 + wx2 * q22;
    let wy1 = (y2 - y) / (y2 - y1);
    let wy2 = (y - y1) / (y2 - y1);
    wy1 * r1 + wy2 * r2
}

/// Cubic position curve used in Idle mode: `a + b·v + c·v² + d·v³`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleCurve {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

/// Speeds above this are evaluated as if at this speed.
pub const IDLE_MAX_MPH: f64 = 50.0;

impl IdleCurve {
    /// Logical position for `speed_mph`, rounded to nearest and clamped.
    pub fn position(&self, speed_mph: f64) -> i32 {
        let v = if speed_mph.is_nan() {
            0.0
        } else {
            speed_mph.clamp(0.0, IDLE_MAX_MPH)
        };
        let p = self.a + self.b * v + self.c * v * v + self.d * v * v * v;
        if p.is_nan() {
            return LOGICAL_MIN;
        }
        crate::position::round_to_logical(p.clamp(f64::from(LOGICAL_MIN), f64::from(LOGICAL_MAX)))
    }
}

impl Default for IdleCurve {
    fn default() -> Self {
        Self {
            a: 0.0,
            b: 12.0,
            c: 0.2,
            d: 0.0,
        }
    }
}

/// The full set of surfaces plus the idle curve.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSet {
    pub power: CalibrationTable,
    pub erg: CalibrationTable,
    pub sim: CalibrationTable,
    pub idle: IdleCurve,
}

impl CalibrationSet {
    pub fn factory() -> Self {
        Self {
            power: CalibrationTable::factory(TableKind::Power),
            erg: CalibrationTable::factory(TableKind::Erg),
            sim: CalibrationTable::factory(TableKind::Sim),
            idle: IdleCurve::default(),
        }
    }

    pub fn table(&self, kind: TableKind) -> &CalibrationTable {
        match kind {
            TableKind::Power => &self.power,
            TableKind::Erg => &self.erg,
            TableKind::Sim => &self.sim,
        }
    }

    pub fn table_mut(&mut self, kind: TableKind) -> &mut CalibrationTable {
        match kind {
            TableKind::Power => &mut self.power,
            TableKind::Erg => &mut self.erg,
            TableKind::Sim => &mut self.sim,
        }
    }

    /// Estimated rider power at `speed_mph` with the carriage at `logical`.
    pub fn estimate_power(&self, speed_mph: f64, logical: i32) -> f64 {
        self.power.lookup(speed_mph, f64::from(logical))
    }
}

impl Default for CalibrationSet {
    fn default() -> Self {
        Self::factory()
    }
}
