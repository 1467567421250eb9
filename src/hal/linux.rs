//! Raspberry Pi style backend: `spidev` for the bus, the GPIO character
//! device for the control pins.

use super::{BusError, Level, Pin, PinControl, SpiBus};
use gpio_cdev::{Chip, EventRequestFlags, LineEventHandle, LineHandle, LineRequestFlags};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const CONSUMER_LABEL: &str = "ads1258-daq";

/// SPI mode 3, 8-bit words.
pub struct SpidevBus {
    spi: Spidev,
}

impl SpidevBus {
    /// Open and configure `path` at `speed_hz`.
    pub fn open(path: impl AsRef<Path>, speed_hz: u32) -> Result<Self, BusError> {
        let path = path.as_ref();
        let open_error = |err: std::io::Error| BusError::Open {
            path: path.display().to_string(),
            message: err.to_string(),
        };
        let mut spi = Spidev::open(path).map_err(open_error)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SpiModeFlags::SPI_MODE_3)
            .build();
        spi.configure(&options).map_err(open_error)?;
        debug!(path = %path.display(), speed_hz, "spidev opened");
        Ok(Self { spi })
    }
}

impl SpiBus for SpidevBus {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.spi.write_all(bytes).map_err(BusError::transfer)
    }

    fn transceive(&mut self, bytes: &[u8]) -> Result<Vec<u8>, BusError> {
        let mut rx = vec![0u8; bytes.len()];
        {
            let mut transfer = SpidevTransfer::read_write(bytes, &mut rx);
            self.spi.transfer(&mut transfer).map_err(BusError::transfer)?;
        }
        Ok(rx)
    }

    fn receive(&mut self, len: usize) -> Result<Vec<u8>, BusError> {
        let mut rx = vec![0u8; len];
        self.spi.read_exact(&mut rx).map_err(BusError::transfer)?;
        Ok(rx)
    }
}

/// Control pins on one GPIO chip, mapped by [`Pin::bcm`].
pub struct CdevPins {
    clock_select: LineHandle,
    reset: LineHandle,
    start: LineHandle,
    power_down: LineHandle,
    data_ready: LineEventHandle,
}

impl CdevPins {
    /// Request every line. Outputs start low, which holds the converter in
    /// reset and power-down until it is configured.
    pub fn open(chip: impl AsRef<Path>) -> Result<Self, BusError> {
        let path = chip.as_ref();
        let mut chip = Chip::new(path).map_err(|err| BusError::Open {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;

        let mut output = |pin: Pin| -> Result<LineHandle, BusError> {
            chip.get_line(pin.bcm())
                .and_then(|line| line.request(LineRequestFlags::OUTPUT, 0, CONSUMER_LABEL))
                .map_err(|err| gpio_error(pin, err))
        };
        let clock_select = output(Pin::ClockSelect)?;
        let reset = output(Pin::Reset)?;
        let start = output(Pin::Start)?;
        let power_down = output(Pin::PowerDown)?;

        let data_ready = chip
            .get_line(Pin::DataReady.bcm())
            .and_then(|line| {
                line.events(
                    LineRequestFlags::INPUT,
                    EventRequestFlags::FALLING_EDGE,
                    CONSUMER_LABEL,
                )
            })
            .map_err(|err| gpio_error(Pin::DataReady, err))?;

        debug!(chip = %path.display(), "gpio lines requested");
        Ok(Self {
            clock_select,
            reset,
            start,
            power_down,
            data_ready,
        })
    }

    fn output(&self, pin: Pin) -> Option<&LineHandle> {
        match pin {
            Pin::ClockSelect => Some(&self.clock_select),
            Pin::Reset => Some(&self.reset),
            Pin::Start => Some(&self.start),
            Pin::PowerDown => Some(&self.power_down),
            Pin::DataReady => None,
        }
    }
}

fn gpio_error(pin: Pin, err: impl std::fmt::Display) -> BusError {
    BusError::Gpio {
        pin,
        message: err.to_string(),
    }
}

impl PinControl for CdevPins {
    fn set_output(&mut self, pin: Pin, level: Level) -> Result<(), BusError> {
        let handle = self.output(pin).ok_or_else(|| gpio_error(pin, "not an output"))?;
        handle
            .set_value(u8::from(level.is_high()))
            .map_err(|err| gpio_error(pin, err))
    }

    fn get_input(&mut self, pin: Pin) -> Result<Level, BusError> {
        let value = match self.output(pin) {
            Some(handle) => handle.get_value(),
            None => self.data_ready.get_value(),
        }
        .map_err(|err| gpio_error(pin, err))?;
        Ok(Level::from_bool(value != 0))
    }

    #[allow(unsafe_code)]
    fn wait_for_event(&mut self, pin: Pin, timeout: Duration) -> Result<bool, BusError> {
        if pin != Pin::DataReady {
            return Err(gpio_error(pin, "edge events only on DRDY"));
        }
        let mut fds = libc::pollfd {
            fd: self.data_ready.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX).max(1);
        // SAFETY: one valid pollfd owned by this frame; the fd stays open for
        // the lifetime of `self.data_ready`.
        let rc = unsafe { libc::poll(&mut fds, 1, millis) };
        match rc {
            0 => Ok(false),
            n if n < 0 => Err(gpio_error(pin, std::io::Error::last_os_error())),
            _ => {
                self.data_ready
                    .get_event()
                    .map_err(|err| gpio_error(pin, err))?;
                Ok(true)
            }
        }
    }
}
