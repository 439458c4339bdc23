//! Logical/physical position arithmetic.
//!
//! Logical positions are the 0–1000 engineering unit of resistance; physical
//! positions are actuator microsteps in `[0, phys_max]`. Conversions use
//! 64-bit intermediates, truncate toward zero and clamp both ways. They
//! never extrapolate.

pub const LOGICAL_MIN: i32 = 0;
pub const LOGICAL_MAX: i32 = 1000;

/// Clamp an integer into the logical range.
#[inline]
pub fn clamp_logical(v: i32) -> i32 {
    v.clamp(LOGICAL_MIN, LOGICAL_MAX)
}

/// Round a floating-point position to nearest and clamp into the logical
/// range. Non-finite values map to `LOGICAL_MIN`.
#[inline]
pub fn round_to_logical(v: f64) -> i32 {
    if !v.is_finite() {
        return LOGICAL_MIN;
    }
    let r = v.round();
    if r <= LOGICAL_MIN as f64 {
        LOGICAL_MIN
    } else if r >= LOGICAL_MAX as f64 {
        LOGICAL_MAX
    } else {
        r as i32
    }
}

/// Fixed proportional mapping between logical and physical positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionScale {
    phys_max: i32,
}

impl PositionScale {
    /// `phys_max` is clamped to at least 1 so the mapping is always defined.
    pub fn new(phys_max: i32) -> Self {
        Self {
            phys_max: phys_max.max(1),
        }
    }

    #[inline]
    pub fn phys_max(&self) -> i32 {
        self.phys_max
    }

    #[inline]
    pub fn clamp_steps(&self, steps: i32) -> i32 {
        steps.clamp(0, self.phys_max)
    }

    #[inline]
    pub fn logical_to_steps(&self, logical: i32) -> i32 {
        let l = clamp_logical(logical) as i64;
        (l * self.phys_max as i64 / LOGICAL_MAX as i64) as i32
    }

    #[inline]
    pub fn steps_to_logical(&self, steps: i32) -> i32 {
        let s = self.clamp_steps(steps) as i64;
        (s * LOGICAL_MAX as i64 / self.phys_max as i64) as i32
    }
}

impl Default for PositionScale {
    fn default() -> Self {
        Self::new(6960)
    }
}
