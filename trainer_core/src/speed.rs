//! Roller speed estimation from hall-sensor edges.
//!
//! Edges arrive in interrupt context through [`PulseCapture`]; the control
//! loop owns the [`SpeedEstimator`] and reads a consistent snapshot of the
//! last accepted edge and interval once per tick. The last edge time and
//! interval are packed into one `AtomicU64` so a reader can never observe
//! one field from an older edge than the other.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use trainer_traits::clock::Clock;

use crate::config::SpeedCfg;
use crate::util::MICROS_PER_SEC;

/// Below this filtered rpm the output snaps to zero.
const RPM_FLOOR: f64 = 0.01;

#[inline]
fn pack(last_us: u32, interval_us: u32) -> u64 {
    ((last_us as u64) << 32) | interval_us as u64
}

#[inline]
fn unpack(v: u64) -> (u32, u32) {
    ((v >> 32) as u32, v as u32)
}

/// One consistent reading of the capture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSnapshot {
    /// Timestamp of the last accepted edge (wrapping microseconds), 0 if none.
    pub last_edge_us: u32,
    /// Interval between the last two accepted edges, 0 if fewer than two.
    pub interval_us: u32,
    /// Accepted edges since construction.
    pub edges: u32,
}

/// Interrupt-side edge recorder. Safe to share across threads.
pub struct PulseCapture {
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    holdoff_us: u32,
    min_interval_us: u32,
    last: AtomicU64,
    edges: AtomicU32,
}

impl std::fmt::Debug for PulseCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseCapture")
            .field("holdoff_us", &self.holdoff_us)
            .field("min_interval_us", &self.min_interval_us)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl PulseCapture {
    pub fn new(cfg: &SpeedCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            epoch,
            holdoff_us: cfg.holdoff_us,
            min_interval_us: cfg.min_interval_us,
            last: AtomicU64::new(0),
            edges: AtomicU32::new(0),
        }
    }

    /// Current capture time in wrapping microseconds. Never returns 0, which
    /// is reserved for "no edge yet".
    pub fn now_us(&self) -> u32 {
        let t = self.clock.us_since(self.epoch) as u32;
        if t == 0 { 1 } else { t }
    }

    /// Record an edge at the current clock time.
    pub fn on_pulse_edge(&self) -> bool {
        self.on_pulse_edge_at(self.now_us())
    }

    /// Record an edge observed at `now_us`. Returns whether it was accepted.
    ///
    /// Bounded, lock-free and allocation-free; callable from interrupt context.
    pub fn on_pulse_edge_at(&self, now_us: u32) -> bool {
        let now_us = if now_us == 0 { 1 } else { now_us };
        let (last, _) = unpack(self.last.load(Ordering::Acquire));

        // Both windows are measured from the last accepted edge; rejected
        // edges leave no trace.
        let interval = if last == 0 {
            0
        } else {
            let since = now_us.wrapping_sub(last);
            if since < self.holdoff_us || since < self.min_interval_us {
                return false;
            }
            since
        };
        self.last.store(pack(now_us, interval), Ordering::Release);
        self.edges.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn snapshot(&self) -> PulseSnapshot {
        let (last_edge_us, interval_us) = unpack(self.last.load(Ordering::Acquire));
        PulseSnapshot {
            last_edge_us,
            interval_us,
            edges: self.edges.load(Ordering::Relaxed),
        }
    }
}

/// Control-loop side: raw rpm from the capture snapshot, EMA-filtered.
pub struct SpeedEstimator {
    capture: Arc<PulseCapture>,
    clock: Arc<dyn Clock + Send + Sync>,
    pulses_per_rev: f64,
    rpm_to_mph: f64,
    stale_us: u64,
    tau_s: f64,
    zero_rpm_threshold: f64,
    zero_alpha: f64,
    filtered_rpm: f64,
    last_filter_us: Option<u64>,
    seen_edges: u32,
    last_new_edge_us: u64,
}

impl std::fmt::Debug for SpeedEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedEstimator")
            .field("filtered_rpm", &self.filtered_rpm)
            .field("seen_edges", &self.seen_edges)
            .finish()
    }
}

impl SpeedEstimator {
    pub fn new(cfg: &SpeedCfg, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let capture = Arc::new(PulseCapture::new(cfg, clock.clone()));
        Self {
            capture,
            clock,
            pulses_per_rev: f64::from(cfg.pulses_per_rev.max(1)),
            rpm_to_mph: cfg.rpm_to_mph(),
            stale_us: cfg.stale_us,
            tau_s: cfg.filter_tau_s,
            zero_rpm_threshold: cfg.zero_rpm_threshold,
            zero_alpha: cfg.zero_alpha.clamp(0.0, 1.0),
            filtered_rpm: 0.0,
            last_filter_us: None,
            seen_edges: 0,
            last_new_edge_us: 0,
        }
    }

    /// Handle for the interrupt context.
    pub fn capture(&self) -> Arc<PulseCapture> {
        self.capture.clone()
    }

    /// Convenience for hosts that deliver edges on the control thread.
    pub fn on_pulse_edge(&self) -> bool {
        self.capture.on_pulse_edge()
    }

    /// Unfiltered rpm from the latest snapshot; zero when stale or unknown.
    pub fn raw_rpm(&mut self) -> f64 {
        let snap = self.capture.snapshot();
        let now_full = self.clock.us_since(self.capture.epoch);
        self.raw_rpm_from(snap, now_full)
    }

    fn raw_rpm_from(&mut self, snap: PulseSnapshot, now_full: u64) -> f64 {
        if snap.edges != self.seen_edges {
            self.seen_edges = snap.edges;
            self.last_new_edge_us = now_full;
        }
        if snap.last_edge_us == 0 || snap.interval_us == 0 {
            return 0.0;
        }
        // The wrapping check alone misreads after ~71 minutes without edges;
        // the edge counter check covers that.
        let now32 = self.capture.now_us();
        let age = u64::from(now32.wrapping_sub(snap.last_edge_us));
        let quiet = now_full.saturating_sub(self.last_new_edge_us);
        if age > self.stale_us || quiet > self.stale_us {
            return 0.0;
        }
        let pulses_per_sec = MICROS_PER_SEC as f64 / f64::from(snap.interval_us);
        pulses_per_sec / self.pulses_per_rev * 60.0
    }

    /// Update the filter with a fresh raw reading and return road speed in mph.
    /// Intended to be called once per control tick.
    pub fn filtered_speed_mph(&mut self) -> f64 {
        let now_full = self.clock.us_since(self.capture.epoch);
        let snap = self.capture.snapshot();
        let raw = self.raw_rpm_from(snap, now_full);

        self.filtered_rpm = match self.last_filter_us {
            None => raw,
            Some(prev) => {
                let dt = now_full.saturating_sub(prev) as f64 / MICROS_PER_SEC as f64;
                let alpha = if raw < self.zero_rpm_threshold {
                    self.zero_alpha
                } else if self.tau_s <= 0.0 {
                    1.0
                } else {
                    dt / (self.tau_s + dt)
                };
                alpha * raw + (1.0 - alpha) * self.filtered_rpm
            }
        };
        if self.filtered_rpm < RPM_FLOOR || !self.filtered_rpm.is_finite() {
            self.filtered_rpm = 0.0;
        }
        self.last_filter_us = Some(now_full);
        self.speed_mph()
    }

    /// Last filtered rpm without updating the filter.
    pub fn filtered_rpm(&self) -> f64 {
        self.filtered_rpm
    }

    /// Last filtered speed without updating the filter.
    pub fn speed_mph(&self) -> f64 {
        self.filtered_rpm * self.rpm_to_mph
    }

    pub fn rpm_to_mph(&self) -> f64 {
        self.rpm_to_mph
    }
}
