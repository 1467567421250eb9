//! Hardware abstraction for the serial bus and discrete control pins.
//!
//! The acquisition core only depends on the [`SpiBus`] and [`PinControl`]
//! traits. Two backends are provided:
//!
//! - [`sim::SimulatedAdc`], an in-process model of the converter used by the
//!   tests and `--simulate`
//! - `linux::{SpidevBus, CdevPins}` (feature `hardware`), backed by `spidev`
//!   and the GPIO character device
//!
//! # Pin map (BCM numbering)
//!
//! ```text
//! CLKSEL  17   output  clock source select
//! RST     18   output  active low
//! DRDY    27   input   falling edge = conversion ready
//! START   22   output  high = converting
//! PWDN    23   output  active low
//! ```

#[cfg(feature = "hardware")]
pub mod linux;
pub mod sim;

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a bus or pin backend.
#[derive(Error, Debug)]
pub enum BusError {
    /// The underlying device could not be opened.
    #[error("Failed to open '{path}': {message}")]
    Open { path: String, message: String },

    /// A transfer failed or returned a short buffer.
    #[error("SPI transfer failed: {0}")]
    Transfer(String),

    /// A pin request or line operation failed.
    #[error("GPIO {pin:?} failed: {message}")]
    Gpio { pin: Pin, message: String },

    /// The backend has been shut down or has no more data to serve.
    #[error("Bus closed")]
    Closed,
}

impl BusError {
    /// Build a transfer error from any displayable cause.
    pub fn transfer(cause: impl std::fmt::Display) -> Self {
        Self::Transfer(cause.to_string())
    }
}

/// Control pins wired to the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pin {
    /// Clock source select.
    ClockSelect,
    /// Reset, active low.
    Reset,
    /// Data ready, active low.
    DataReady,
    /// Conversion start.
    Start,
    /// Power down, active low.
    PowerDown,
}

impl Pin {
    /// Every pin, outputs first.
    pub const ALL: [Self; 5] = [
        Self::ClockSelect,
        Self::Reset,
        Self::Start,
        Self::PowerDown,
        Self::DataReady,
    ];

    /// BCM line offset.
    pub const fn bcm(self) -> u32 {
        match self {
            Self::ClockSelect => 17,
            Self::Reset => 18,
            Self::DataReady => 27,
            Self::Start => 22,
            Self::PowerDown => 23,
        }
    }

    /// Whether the pin is driven by the host.
    pub const fn is_output(self) -> bool {
        !matches!(self, Self::DataReady)
    }
}

/// Electrical level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Level {
    /// Logic 0.
    #[default]
    Low,
    /// Logic 1.
    High,
}

impl Level {
    /// Level for a boolean, `true` = high.
    pub const fn from_bool(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }

    /// Whether the level is high.
    pub const fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        Self::from_bool(high)
    }
}

/// Full-duplex synchronous serial bus.
pub trait SpiBus: Send {
    /// Write `bytes`, discarding whatever is clocked in.
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError>;

    /// Write `bytes` and return the same number of bytes clocked in.
    fn transceive(&mut self, bytes: &[u8]) -> Result<Vec<u8>, BusError>;

    /// Clock `len` zero bytes out and return what was received.
    fn receive(&mut self, len: usize) -> Result<Vec<u8>, BusError>;
}

/// Discrete control pins.
pub trait PinControl: Send {
    /// Drive an output pin.
    fn set_output(&mut self, pin: Pin, level: Level) -> Result<(), BusError>;

    /// Sample a pin.
    fn get_input(&mut self, pin: Pin) -> Result<Level, BusError>;

    /// Block until an edge on `pin` or `timeout` elapses. Returns `true` on
    /// an edge.
    fn wait_for_event(&mut self, pin: Pin, timeout: Duration) -> Result<bool, BusError>;
}

impl<T: SpiBus + ?Sized> SpiBus for Box<T> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        (**self).transmit(bytes)
    }

    fn transceive(&mut self, bytes: &[u8]) -> Result<Vec<u8>, BusError> {
        (**self).transceive(bytes)
    }

    fn receive(&mut self, len: usize) -> Result<Vec<u8>, BusError> {
        (**self).receive(len)
    }
}

impl<T: PinControl + ?Sized> PinControl for Box<T> {
    fn set_output(&mut self, pin: Pin, level: Level) -> Result<(), BusError> {
        (**self).set_output(pin, level)
    }

    fn get_input(&mut self, pin: Pin) -> Result<Level, BusError> {
        (**self).get_input(pin)
    }

    fn wait_for_event(&mut self, pin: Pin, timeout: Duration) -> Result<bool, BusError> {
        (**self).wait_for_event(pin, timeout)
    }
}
