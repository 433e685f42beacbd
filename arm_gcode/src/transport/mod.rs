//! Byte-level channel to the arm firmware.
//!
//! [`Transport`] is the seam between the command layer and the device. The
//! production implementation is [`SerialTransport`]; simulators and test
//! doubles implement the same trait.

use std::time::Duration;

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "serial")]
pub use serial::*;

/// Raw, half-duplex byte channel.
///
/// Implementations never panic on I/O trouble: failures are reported through
/// the boolean results and an empty `receive`.
pub trait Transport {
    /// Opens the channel. Returns `false` on any failure.
    fn connect(&mut self) -> bool;

    /// Closes the channel. Safe to call when already closed.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Writes every byte and waits until they have left the host.
    fn send(&mut self, bytes: &[u8]) -> bool;

    /// Collects whatever arrives within `timeout`. An empty result means
    /// nothing was received.
    fn receive(&mut self, timeout: Duration) -> Vec<u8>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> bool {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send(&mut self, bytes: &[u8]) -> bool {
        (**self).send(bytes)
    }

    fn receive(&mut self, timeout: Duration) -> Vec<u8> {
        (**self).receive(timeout)
    }
}
