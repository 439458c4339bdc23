//! Test and helper mocks for trainer_core

use std::sync::Mutex;

use trainer_traits::{HwResult, LimitSwitch, StepperDriver, Transport};

/// A driver that accepts every command and counts pulses.
#[derive(Debug, Default)]
pub struct CountingStepper {
    pub pulses: u64,
    pub enabled: bool,
    pub away: bool,
}

impl StepperDriver for CountingStepper {
    fn set_enabled(&mut self, enabled: bool) -> HwResult<()> {
        self.enabled = enabled;
        Ok(())
    }

    fn set_direction(&mut self, away_from_home: bool) -> HwResult<()> {
        self.away = away_from_home;
        Ok(())
    }

    fn pulse(&mut self) -> HwResult<()> {
        self.pulses += 1;
        Ok(())
    }
}

/// A limit switch that is never pressed.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenLimitSwitch;

impl LimitSwitch for OpenLimitSwitch {
    fn is_pressed(&mut self) -> HwResult<bool> {
        Ok(false)
    }
}

/// Records every frame it is handed.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    acks: Mutex<Vec<[u8; 3]>>,
    notifications: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTransport {
    pub fn acks(&self) -> Vec<[u8; 3]> {
        self.acks.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<Vec<u8>> {
        self.notifications
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

impl Transport for RecordingTransport {
    fn send_ack(&self, frame: &[u8]) -> HwResult<()> {
        let ack: [u8; 3] = frame.try_into().map_err(|_| "ack must be 3 bytes")?;
        self.acks.lock().map_err(|_| "poisoned")?.push(ack);
        Ok(())
    }

    fn notify(&self, payload: &[u8]) -> HwResult<()> {
        self.notifications
            .lock()
            .map_err(|_| "poisoned")?
            .push(payload.to_vec());
        Ok(())
    }
}
