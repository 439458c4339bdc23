//! Transport implementations for hosts without a radio stack.
//!
//! `ChannelTransport` hands frames to another thread over a bounded
//! crossbeam channel. `try_send` never blocks the caller; a full queue drops
//! the frame and reports it as an error the caller can log.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use trainer_traits::{HwResult, Transport};

/// A frame leaving the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Ack([u8; 3]),
    Notify(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: Sender<Outbound>,
}

impl ChannelTransport {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Outbound>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, rx)
    }

    fn push(&self, frame: Outbound) -> HwResult<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err("transport queue full; frame dropped".into()),
            Err(TrySendError::Disconnected(_)) => Err("transport receiver gone".into()),
        }
    }
}

impl Transport for ChannelTransport {
    fn send_ack(&self, frame: &[u8]) -> HwResult<()> {
        let ack: [u8; 3] = frame
            .try_into()
            .map_err(|_| format!("ack frame must be 3 bytes, got {}", frame.len()))?;
        self.push(Outbound::Ack(ack))
    }

    fn notify(&self, payload: &[u8]) -> HwResult<()> {
        self.push(Outbound::Notify(payload.to_vec()))
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send_ack(&self, _frame: &[u8]) -> HwResult<()> {
        Ok(())
    }

    fn notify(&self, _payload: &[u8]) -> HwResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_without_blocking() {
        let (t, rx) = ChannelTransport::bounded(1);
        t.notify(&[1, 2]).unwrap();
        assert!(t.notify(&[3]).is_err());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Notify(vec![1, 2]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ack_must_be_three_bytes() {
        let (t, rx) = ChannelTransport::bounded(4);
        assert!(t.send_ack(&[0x80, 0x05]).is_err());
        t.send_ack(&[0x80, 0x05, 0x01]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ack([0x80, 0x05, 0x01]));
    }

    #[test]
    fn disconnected_receiver_is_an_error() {
        let (t, rx) = ChannelTransport::bounded(1);
        drop(rx);
        assert!(t.notify(&[0]).is_err());
    }
}
