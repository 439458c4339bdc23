//! Seams between the resistance-control core and everything it drives or
//! is driven by: the actuator, the limit switch, the message transport and
//! the manual-override collaborator.

pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Error type carried across the hardware seams.
pub type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Step/direction actuator driver.
///
/// One call to `pulse()` moves the carriage exactly one microstep in the
/// direction last set with `set_direction()`.
pub trait StepperDriver {
    fn set_enabled(&mut self, enabled: bool) -> HwResult<()>;
    /// `true` moves away from the home switch (increasing position).
    fn set_direction(&mut self, away_from_home: bool) -> HwResult<()>;
    fn pulse(&mut self) -> HwResult<()>;
}

/// Raw (undebounced) home/limit switch input.
pub trait LimitSwitch {
    fn is_pressed(&mut self) -> HwResult<bool>;
}

/// Outbound side of the wireless protocol.
///
/// Implementations must not block: both methods may be called from the
/// message-reception context.
pub trait Transport {
    fn send_ack(&self, frame: &[u8]) -> HwResult<()>;
    fn notify(&self, payload: &[u8]) -> HwResult<()>;
}

/// Manual position hold owned by the diagnostic UI.
pub trait ManualControl {
    fn set_target(&self, logical: i32);
    fn clear(&self);
}

impl<T: StepperDriver + ?Sized> StepperDriver for Box<T> {
    fn set_enabled(&mut self, enabled: bool) -> HwResult<()> {
        (**self).set_enabled(enabled)
    }
    fn set_direction(&mut self, away_from_home: bool) -> HwResult<()> {
        (**self).set_direction(away_from_home)
    }
    fn pulse(&mut self) -> HwResult<()> {
        (**self).pulse()
    }
}

impl<T: LimitSwitch + ?Sized> LimitSwitch for Box<T> {
    fn is_pressed(&mut self) -> HwResult<bool> {
        (**self).is_pressed()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_ack(&self, frame: &[u8]) -> HwResult<()> {
        (**self).send_ack(frame)
    }
    fn notify(&self, payload: &[u8]) -> HwResult<()> {
        (**self).notify(payload)
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send_ack(&self, frame: &[u8]) -> HwResult<()> {
        (**self).send_ack(frame)
    }
    fn notify(&self, payload: &[u8]) -> HwResult<()> {
        (**self).notify(payload)
    }
}
