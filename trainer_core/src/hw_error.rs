//! Maps `Box<dyn Error>` from trait boundaries to typed `TrainerError`.
//!
//! The traits in `trainer_traits` use `Box<dyn Error + Send + Sync>` for maximum
//! flexibility; this module converts those to our typed error enum, with an
//! optional feature-gated path for `trainer_hardware::HwError` downcasting.

use crate::error::TrainerError;

/// Map a trait-boundary error to a typed `TrainerError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TrainerError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<trainer_hardware::error::HwError>() {
            return match hw {
                trainer_hardware::error::HwError::Io(io)
                    if io.kind() == std::io::ErrorKind::TimedOut =>
                {
                    TrainerError::Timeout
                }
                other => TrainerError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        TrainerError::Timeout
    } else {
        TrainerError::Hardware(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_text_maps_to_timeout() {
        let e = std::io::Error::other("gpio read timeout");
        assert!(matches!(map_hw_error(&e), TrainerError::Timeout));
    }

    #[test]
    fn other_text_maps_to_hardware() {
        let e = std::io::Error::other("pin busy");
        match map_hw_error(&e) {
            TrainerError::Hardware(s) => assert_eq!(s, "pin busy"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn typed_gpio_error_maps_to_fault() {
        let e = trainer_hardware::error::HwError::Gpio("export failed".into());
        assert!(matches!(map_hw_error(&e), TrainerError::HardwareFault(_)));
    }
}
