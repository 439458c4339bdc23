//! Type-state builder for `Trainer` and generic `build_trainer` constructor.
//!
//! The builder enforces at compile time that a stepper driver and a limit
//! switch are provided before `build()` is available. `try_build()` is always
//! available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use trainer_traits::clock::{Clock, MonotonicClock};
use trainer_traits::{LimitSwitch, StepperDriver, Transport};

use crate::arbiter::ControlModeArbiter;
use crate::config::TrainerSettings;
use crate::core::TrainerCore;
use crate::error::{BuildError, Result};
use crate::motion::MotionController;
use crate::speed::SpeedEstimator;
use crate::store::SharedCalibration;
use crate::transport::NullTransport;

pub type BoxedStepper = Box<dyn StepperDriver + Send>;
pub type BoxedLimitSwitch = Box<dyn LimitSwitch + Send>;

/// Dynamically dispatched trainer, as produced by the builder.
pub type Trainer = TrainerCore<BoxedStepper, BoxedLimitSwitch>;

pub struct Missing;
pub struct Set;

/// Builder for `Trainer`. Everything is validated on `build()`.
pub struct TrainerBuilder<S, L> {
    stepper: Option<BoxedStepper>,
    limit: Option<BoxedLimitSwitch>,
    settings: Option<TrainerSettings>,
    calibration: Option<SharedCalibration>,
    transport: Option<Arc<dyn Transport + Send + Sync>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    _s: PhantomData<S>,
    _l: PhantomData<L>,
}

impl Default for TrainerBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            stepper: None,
            limit: None,
            settings: None,
            calibration: None,
            transport: None,
            clock: None,
            _s: PhantomData,
            _l: PhantomData,
        }
    }
}

impl Trainer {
    pub fn builder() -> TrainerBuilder<Missing, Missing> {
        TrainerBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Reject settings the control loop cannot run with.
pub fn validate_settings(s: &TrainerSettings) -> Result<()> {
    if s.speed.pulses_per_rev == 0 {
        return Err(invalid("speed.pulses_per_rev must be >= 1"));
    }
    if !positive(s.speed.roller_diameter_in) {
        return Err(invalid("speed.roller_diameter_in must be > 0"));
    }
    if !(s.speed.filter_tau_s.is_finite() && s.speed.filter_tau_s >= 0.0) {
        return Err(invalid("speed.filter_tau_s must be >= 0"));
    }
    if !(0.0..=1.0).contains(&s.speed.zero_alpha) {
        return Err(invalid("speed.zero_alpha must be within [0, 1]"));
    }
    if s.motion.phys_max_steps < 1 {
        return Err(invalid("motion.phys_max_steps must be >= 1"));
    }
    for (v, msg) in [
        (s.motion.run_sps, "motion.run_sps must be > 0"),
        (s.motion.jog_sps, "motion.jog_sps must be > 0"),
        (s.motion.ramp_start_sps, "motion.ramp_start_sps must be > 0"),
        (s.motion.ramp_accel_sps2, "motion.ramp_accel_sps2 must be > 0"),
        (s.motion.slow_zone_sps, "motion.slow_zone_sps must be > 0"),
    ] {
        if !positive(v) {
            return Err(invalid(msg));
        }
    }
    if !(s.enable.speed_disable_mph.is_finite() && s.enable.speed_disable_mph >= 0.0) {
        return Err(invalid("enable.speed_disable_mph must be a finite value >= 0"));
    }
    if !s.enable.speed_enable_mph.is_finite() {
        return Err(invalid("enable.speed_enable_mph must be finite"));
    }
    if s.enable.speed_enable_mph <= s.enable.speed_disable_mph {
        return Err(invalid(
            "enable.speed_enable_mph must be > enable.speed_disable_mph",
        ));
    }
    if s.enable.idle_on_deadband <= s.enable.idle_off_deadband {
        return Err(invalid(
            "enable.idle_on_deadband must be > enable.idle_off_deadband",
        ));
    }
    if s.homing.settle_ms < s.homing.debounce_ms {
        return Err(invalid("homing.settle_ms must be >= homing.debounce_ms"));
    }
    if s.control.tick_ms == 0 {
        return Err(invalid("control.tick_ms must be >= 1"));
    }
    if s.control.telemetry_ms == 0 {
        return Err(invalid("control.telemetry_ms must be >= 1"));
    }
    Ok(())
}

pub(crate) fn validate_and_build<D, L>(
    stepper: D,
    limit: L,
    settings: TrainerSettings,
    calibration: SharedCalibration,
    transport: Arc<dyn Transport + Send + Sync>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> Result<TrainerCore<D, L>>
where
    D: StepperDriver,
    L: LimitSwitch,
{
    validate_settings(&settings)?;
    let clock: Arc<dyn Clock + Send + Sync> = clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));

    let speed = SpeedEstimator::new(&settings.speed, clock.clone());
    let motion = MotionController::new(
        stepper,
        limit,
        settings.motion,
        settings.enable,
        settings.homing.clone(),
        clock.clone(),
    );
    let arbiter = ControlModeArbiter::new(calibration.clone(), settings.control.max_power_w);
    Ok(TrainerCore::new(
        speed,
        motion,
        arbiter,
        calibration,
        transport,
        clock,
        settings.control,
        settings.homing.home_on_start,
    ))
}

impl<S, L> TrainerBuilder<S, L> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Trainer> {
        let stepper = self
            .stepper
            .ok_or_else(|| eyre::Report::new(BuildError::MissingStepper))?;
        let limit = self
            .limit
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLimitSwitch))?;
        validate_and_build(
            stepper,
            limit,
            self.settings.unwrap_or_default(),
            self.calibration.unwrap_or_default(),
            self.transport.unwrap_or_else(|| Arc::new(NullTransport)),
            self.clock,
        )
    }

    pub fn with_settings(mut self, settings: TrainerSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_calibration(mut self, calibration: SharedCalibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport + Send + Sync>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<L> TrainerBuilder<Missing, L> {
    pub fn with_stepper(
        self,
        stepper: impl StepperDriver + Send + 'static,
    ) -> TrainerBuilder<Set, L> {
        TrainerBuilder {
            stepper: Some(Box::new(stepper)),
            limit: self.limit,
            settings: self.settings,
            calibration: self.calibration,
            transport: self.transport,
            clock: self.clock,
            _s: PhantomData,
            _l: PhantomData,
        }
    }
}

impl<S> TrainerBuilder<S, Missing> {
    pub fn with_limit_switch(
        self,
        limit: impl LimitSwitch + Send + 'static,
    ) -> TrainerBuilder<S, Set> {
        TrainerBuilder {
            stepper: self.stepper,
            limit: Some(Box::new(limit)),
            settings: self.settings,
            calibration: self.calibration,
            transport: self.transport,
            clock: self.clock,
            _s: PhantomData,
            _l: PhantomData,
        }
    }
}

impl TrainerBuilder<Set, Set> {
    /// Validate and build. Only available once stepper and limit switch are set.
    pub fn build(self) -> Result<Trainer> {
        self.try_build()
    }
}

/// Build a statically dispatched core from concrete hardware.
///
/// Delegates to the shared `validate_and_build`.
pub fn build_trainer<D, L>(
    stepper: D,
    limit: L,
    settings: TrainerSettings,
    calibration: Option<SharedCalibration>,
    transport: Option<Arc<dyn Transport + Send + Sync>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> Result<TrainerCore<D, L>>
where
    D: StepperDriver,
    L: LimitSwitch,
{
    validate_and_build(
        stepper,
        limit,
        settings,
        calibration.unwrap_or_default(),
        transport.unwrap_or_else(|| Arc::new(NullTransport)),
        clock,
    )
}
