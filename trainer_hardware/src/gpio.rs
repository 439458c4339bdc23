//! `rppal` GPIO implementations of the actuator, limit switch and hall sensor.

use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use trainer_traits::{HwResult, LimitSwitch, StepperDriver};

use crate::error::{HwError, Result};

/// STEP high time; drivers need ~1–2 µs.
const STEP_PULSE_WIDTH: Duration = Duration::from_micros(3);

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

fn spin_for(d: Duration) {
    let start = Instant::now();
    while start.elapsed() < d {
        std::hint::spin_loop();
    }
}

/// Step/dir driver with an active-low enable line.
pub struct GpioStepper {
    step: OutputPin,
    dir: OutputPin,
    enable: OutputPin,
    invert_dir: bool,
}

impl GpioStepper {
    /// Pins are BCM numbers. The driver starts disabled.
    pub fn new(step_pin: u8, dir_pin: u8, enable_pin: u8, invert_dir: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let step = gpio.get(step_pin).map_err(gpio_err)?.into_output_low();
        let dir = gpio.get(dir_pin).map_err(gpio_err)?.into_output_low();
        let enable = gpio.get(enable_pin).map_err(gpio_err)?.into_output_high();
        tracing::info!(step_pin, dir_pin, enable_pin, invert_dir, "gpio stepper ready");
        Ok(Self {
            step,
            dir,
            enable,
            invert_dir,
        })
    }
}

impl StepperDriver for GpioStepper {
    fn set_enabled(&mut self, enabled: bool) -> HwResult<()> {
        if enabled {
            self.enable.set_low();
        } else {
            self.enable.set_high();
        }
        Ok(())
    }

    fn set_direction(&mut self, away_from_home: bool) -> HwResult<()> {
        if away_from_home != self.invert_dir {
            self.dir.set_high();
        } else {
            self.dir.set_low();
        }
        Ok(())
    }

    fn pulse(&mut self) -> HwResult<()> {
        self.step.set_high();
        spin_for(STEP_PULSE_WIDTH);
        self.step.set_low();
        Ok(())
    }
}

/// Home switch wired to ground with the internal pull-up enabled.
pub struct GpioLimitSwitch {
    pin: InputPin,
}

impl GpioLimitSwitch {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        let pin = gpio.get(pin).map_err(gpio_err)?.into_input_pullup();
        Ok(Self { pin })
    }
}

impl LimitSwitch for GpioLimitSwitch {
    fn is_pressed(&mut self) -> HwResult<bool> {
        Ok(self.pin.read() == Level::Low)
    }
}

/// Keeps the hall-sensor interrupt registered while alive.
pub struct HallInterrupt {
    _pin: InputPin,
}

/// Call `on_edge` on every falling edge of `pin`. The callback runs on
/// rppal's interrupt thread and must not block.
pub fn attach_hall_interrupt<F>(pin: u8, on_edge: F) -> Result<HallInterrupt>
where
    F: Fn() + Send + 'static,
{
    let gpio = Gpio::new().map_err(gpio_err)?;
    let mut input = gpio.get(pin).map_err(gpio_err)?.into_input_pullup();
    input
        .set_async_interrupt(Trigger::FallingEdge, move |_level: Level| on_edge())
        .map_err(|e| HwError::Interrupt(e.to_string()))?;
    tracing::info!(pin, "hall sensor interrupt attached");
    Ok(HallInterrupt { _pin: input })
}
