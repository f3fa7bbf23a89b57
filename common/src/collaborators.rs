//! Hardware seams of the servant core.
//!
//! Each board backend implements these over its drivers; tests implement
//! them in memory.

use chrono::NaiveDateTime;

use crate::{
    error::{ClockFault, SensorFault, StorageFault, TransportFault},
    types::PeerAddress,
};

pub trait TemperatureSource {
    /// Number of channels actually present on the bus.
    fn channel_count(&self) -> usize;

    /// Starts a simultaneous conversion on every channel and waits for it.
    fn request_conversion(&mut self) -> Result<(), SensorFault>;

    /// Raw Celsius value of the last conversion. May be out of range or
    /// the disconnected sentinel; validation happens in the core.
    fn read_celsius(&mut self, channel: usize) -> Result<f32, SensorFault>;
}

pub trait TimeSource {
    fn now(&mut self) -> Result<NaiveDateTime, ClockFault>;
}

pub trait LogStorage {
    fn mount(&mut self) -> Result<(), StorageFault>;

    /// Size of `path` in bytes, 0 when it does not exist yet.
    fn file_len(&mut self, path: &str) -> Result<u64, StorageFault>;

    fn append(&mut self, path: &str, contents: &str) -> Result<(), StorageFault>;
}

pub trait Transport {
    fn register_peer(&mut self, peer: &PeerAddress) -> Result<(), TransportFault>;

    /// Hands one datagram to the radio. Delivery is reported later through
    /// the send-status callback.
    fn send(&mut self, peer: &PeerAddress, frame: &[u8]) -> Result<(), TransportFault>;
}

pub trait Delay {
    fn delay_ms(&mut self, ms: u64);
}

impl<T: Delay + ?Sized> Delay for &mut T {
    fn delay_ms(&mut self, ms: u64) {
        (**self).delay_ms(ms);
    }
}
