//! ADS1258 device controller.
//!
//! [`Ads1258`] owns the bus and pin handles, a mirror of every tracked
//! register and the activation set derived from it. All configuration goes
//! through the controller so the mirror only changes after the bus transaction
//! that wrote the device has completed.
//!
//! # Lifecycle
//!
//! ```text
//! Unconfigured ──configure()──▶ Configuring ──verify ok──▶ Active
//!                                   ▲    │                    │
//!                                   │    └──retries spent──▶ Fault ◀── mark_fault()
//!                                   └────────configure()────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let adc = SimulatedAdc::new(CounterSource::new());
//! let mut device = Ads1258::new(adc.bus(), adc.pins());
//! device.configure(&DeviceSettings::for_channels(4))?;
//! device.start(true)?;
//! let readout = device.read_data()?;
//! ```

use crate::error::{DaqError, Result};
use crate::hal::{BusError, Level, Pin, PinControl, SpiBus};
use crate::protocol::registers::TRACKED_REGISTERS;
use crate::protocol::{
    channel_frame_rate, decode_sample, ChannelId, ChannelSample, ChannelSet, CommandByte,
    CommandKind, Config0, Config1, DataRate, Delay, DeviceId, FixedChannel, RegisterAddress,
    RegisterImage, Scbcs, StatusByte, SystemChannels,
};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Bytes clocked for a dual read with status: two `[cmd, status, d2, d1, d0]`.
const DUAL_READ_LEN: usize = 10;

/// Bytes clocked for a direct read without status.
const DIRECT_READ_LEN: usize = 3;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Never configured since construction.
    Unconfigured,
    /// Power/reset pulses issued, verification pending.
    Configuring,
    /// Registers verified, ready to sample.
    Active,
    /// Verification failed or the producer reported excessive read faults.
    Fault,
}

impl DeviceState {
    /// Short name for logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Active => "active",
            Self::Fault => "faulted",
        }
    }
}

/// Result of one data-read transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readout {
    /// Status disabled: one conversion, channel inferred from scan order.
    Single(ChannelSample),
    /// Status enabled: the conversion register read twice back to back.
    Dual(ChannelSample, ChannelSample),
}

/// Target configuration applied by [`Ads1258::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    /// Auto-scan (true) or fixed-channel mode.
    pub auto_scan: bool,
    /// Chopper stabilisation.
    pub chop: bool,
    /// Status byte ahead of channel data.
    pub status_byte: bool,
    /// Sleep instead of standby when idle.
    pub sleep_mode: bool,
    /// Bypass the internal mux-to-ADC connection.
    pub bypass: bool,
    /// Drive the clock output.
    pub external_clock: bool,
    /// Short SPI reset timeout.
    pub quick_spi_reset: bool,
    /// Conversion data rate.
    pub data_rate: DataRate,
    /// Switch-time delay.
    pub delay: Delay,
    /// Bias current source.
    pub bias_current: Scbcs,
    /// Single-ended enable mask, bit `n` = AIN`n`.
    pub single_ended: u16,
    /// Differential enable mask, bit `n` = DIFF`n`.
    pub differential: u8,
    /// System monitor enables.
    pub system: SystemChannels,
    /// Fixed-mode input pair.
    pub fixed_channel: FixedChannel,
    /// GPIO direction (1 = input).
    pub gpio_direction: u8,
    /// GPIO output levels.
    pub gpio_output: u8,
    /// Wait after each power/reset edge.
    pub settle: Duration,
    /// Verification attempts before giving up.
    pub retries: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::for_channels(4)
    }
}

impl DeviceSettings {
    /// Settings scanning the top `n` single-ended inputs.
    pub fn for_channels(n: usize) -> Self {
        Self {
            auto_scan: true,
            chop: false,
            status_byte: true,
            sleep_mode: false,
            bypass: false,
            external_clock: false,
            quick_spi_reset: false,
            data_rate: DataRate::Drate1,
            delay: Delay::default(),
            bias_current: Scbcs::Off,
            single_ended: single_ended_mask(n),
            differential: 0,
            system: SystemChannels::empty(),
            fixed_channel: FixedChannel::default(),
            gpio_direction: 0xFF,
            gpio_output: 0x00,
            settle: Duration::from_millis(200),
            retries: 10,
        }
    }

    /// Register image these settings produce.
    pub fn image(&self) -> RegisterImage {
        let mut config0 = Config0::empty();
        config0.set(Config0::MUXMOD, !self.auto_scan);
        config0.set(Config0::CHOP, self.chop);
        config0.set(Config0::STAT, self.status_byte);
        config0.set(Config0::BYPAS, self.bypass);
        config0.set(Config0::CLKENB, self.external_clock);
        config0.set(Config0::SPIRST, self.quick_spi_reset);

        let config1 = Config1::from_raw(0)
            .with_sleep_mode(self.sleep_mode)
            .with_delay(self.delay)
            .with_bias_current(self.bias_current)
            .with_data_rate(self.data_rate);

        let [sg0, sg1] = self.single_ended.to_le_bytes();
        RegisterImage::from_bytes([
            config0.bits(),
            config1.raw(),
            self.fixed_channel.raw(),
            self.differential,
            sg0,
            sg1,
            self.system.bits(),
            self.gpio_direction,
            self.gpio_output,
        ])
    }

    /// Activation set these settings produce.
    pub fn channel_set(&self) -> ChannelSet {
        let image = self.image();
        channel_set_of(&image)
    }
}

/// Mask enabling the highest `n` single-ended inputs.
pub fn single_ended_mask(n: usize) -> u16 {
    match n {
        0 => 0,
        n if n >= 16 => u16::MAX,
        n => (((1u32 << n) - 1) << (16 - n)) as u16,
    }
}

fn channel_set_of(image: &RegisterImage) -> ChannelSet {
    ChannelSet::from_registers(
        image.config0().contains(Config0::MUXMOD),
        image.get(RegisterAddress::Muxdif),
        image.get(RegisterAddress::Muxsg0),
        image.get(RegisterAddress::Muxsg1),
        image.get(RegisterAddress::Sysred),
    )
}

/// ADS1258 controller over any bus/pin backend.
pub struct Ads1258<B, P> {
    bus: B,
    pins: P,
    mirror: RegisterImage,
    active: ChannelSet,
    positions: Vec<ChannelId>,
    scan_cursor: usize,
    state: DeviceState,
}

impl<B, P> std::fmt::Debug for Ads1258<B, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ads1258")
            .field("mirror", &self.mirror)
            .field("active", &self.active)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<B: SpiBus, P: PinControl> Ads1258<B, P> {
    /// Wrap a bus and pin backend. The mirror starts at power-on defaults.
    pub fn new(bus: B, pins: P) -> Self {
        let mut device = Self {
            bus,
            pins,
            mirror: RegisterImage::default(),
            active: ChannelSet::EMPTY,
            positions: Vec::new(),
            scan_cursor: 0,
            state: DeviceState::Unconfigured,
        };
        device.rebuild_channels();
        device
    }

    /// Give the backends back.
    pub fn into_parts(self) -> (B, P) {
        (self.bus, self.pins)
    }

    /// Current controller state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Last known register contents.
    pub fn registers(&self) -> &RegisterImage {
        &self.mirror
    }

    /// Channels the scan currently visits.
    pub fn active_channels(&self) -> ChannelSet {
        self.active
    }

    /// Active ids in frame order.
    pub fn channel_positions(&self) -> &[ChannelId] {
        &self.positions
    }

    /// Whether reads carry a status byte.
    pub fn status_enabled(&self) -> bool {
        self.mirror.config0().contains(Config0::STAT)
    }

    /// Per-channel frame rate implied by the mirror.
    pub fn frame_rate(&self) -> f64 {
        let config0 = self.mirror.config0();
        let config1 = self.mirror.config1();
        let auto_scan = !config0.contains(Config0::MUXMOD);
        channel_frame_rate(
            self.active.len(),
            config1.data_rate().samples_per_second(auto_scan),
            f64::from(config1.delay().micros()),
        )
    }

    /// Record that the producer gave up on this configuration.
    pub fn mark_fault(&mut self) {
        if self.state != DeviceState::Fault {
            warn!(state = self.state.as_str(), "device marked faulted");
        }
        self.state = DeviceState::Fault;
    }

    fn rebuild_channels(&mut self) {
        self.active = channel_set_of(&self.mirror);
        self.positions = self.active.positions();
        self.scan_cursor = 0;
    }

    fn reset_mirror(&mut self) {
        self.mirror = RegisterImage::default();
        self.rebuild_channels();
    }

    fn drive(&mut self, pin: Pin, level: Level) -> Result<()> {
        self.pins.set_output(pin, level)?;
        let readback = self.pins.get_input(pin)?;
        if readback != level {
            return Err(DaqError::PinReadback {
                pin: format!("{pin:?}"),
                expected: format!("{level:?}"),
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Power and pins
    // ---------------------------------------------------------------------

    /// Assert (`true`) or release power-down. PWDN is active low. Either edge
    /// returns the mirror to power-on defaults.
    pub fn power_down(&mut self, asserted: bool) -> Result<()> {
        self.drive(Pin::PowerDown, Level::from_bool(!asserted))?;
        debug!(asserted, "power-down");
        self.reset_mirror();
        Ok(())
    }

    /// Assert (`true`) or release reset. RST is active low. Either edge
    /// returns the mirror to power-on defaults.
    pub fn reset(&mut self, asserted: bool) -> Result<()> {
        self.drive(Pin::Reset, Level::from_bool(!asserted))?;
        debug!(asserted, "reset");
        self.reset_mirror();
        Ok(())
    }

    /// Drive the START pin.
    pub fn start(&mut self, converting: bool) -> Result<()> {
        self.drive(Pin::Start, Level::from_bool(converting))?;
        self.scan_cursor = 0;
        debug!(converting, "start pin");
        Ok(())
    }

    /// Select the internal (`false`) or external (`true`) clock source.
    pub fn select_clock(&mut self, external: bool) -> Result<()> {
        self.drive(Pin::ClockSelect, Level::from_bool(external))
    }

    /// Block until DRDY signals a conversion or `timeout` elapses.
    pub fn await_data_ready(&mut self, timeout: Duration) -> Result<bool> {
        Ok(self.pins.wait_for_event(Pin::DataReady, timeout)?)
    }

    // ---------------------------------------------------------------------
    // Register access
    // ---------------------------------------------------------------------

    /// Write one register. Returns `false` without touching the bus when the
    /// mirror already holds `value`.
    pub fn write_register(&mut self, reg: RegisterAddress, value: u8) -> Result<bool> {
        if reg == RegisterAddress::Id {
            return Err(DaqError::InvalidConfig("ID register is read only".to_string()));
        }
        if self.mirror.get(reg) == value {
            return Ok(false);
        }
        let cmd = CommandByte::new(CommandKind::WriteRegisters, false, reg.addr());
        self.bus.transmit(&[cmd.raw(), value])?;
        self.mirror.set(reg, value);
        trace!(register = ?reg, value, "register written");
        if matches!(
            reg,
            RegisterAddress::Config0
                | RegisterAddress::Muxdif
                | RegisterAddress::Muxsg0
                | RegisterAddress::Muxsg1
                | RegisterAddress::Sysred
        ) {
            self.rebuild_channels();
        }
        Ok(true)
    }

    /// Read one register from the device.
    pub fn read_register(&mut self, reg: RegisterAddress) -> Result<u8> {
        let cmd = CommandByte::new(CommandKind::ReadRegisters, false, reg.addr());
        let rx = self.bus.transceive(&[cmd.raw(), 0])?;
        rx.get(1)
            .copied()
            .ok_or_else(|| BusError::transfer("short register read").into())
    }

    /// Write every tracked register in one multi-register transaction.
    pub fn update_settings(&mut self, image: &RegisterImage) -> Result<()> {
        let cmd = CommandByte::new(CommandKind::WriteRegisters, true, 0);
        let mut tx = Vec::with_capacity(TRACKED_REGISTERS + 1);
        tx.push(cmd.raw());
        tx.extend_from_slice(image.bytes());
        self.bus.transmit(&tx)?;
        self.mirror = *image;
        self.rebuild_channels();
        debug!(registers = ?image.bytes(), "settings written");
        Ok(())
    }

    /// Read every tracked register back from the device.
    pub fn read_back(&mut self) -> Result<RegisterImage> {
        let cmd = CommandByte::new(CommandKind::ReadRegisters, true, 0);
        let mut tx = vec![0u8; TRACKED_REGISTERS + 2];
        tx[0] = cmd.raw();
        let rx = self.bus.transceive(&tx)?;
        let mut bytes = [0u8; TRACKED_REGISTERS];
        let received = rx
            .get(1..=TRACKED_REGISTERS)
            .ok_or_else(|| BusError::transfer("short register read-back"))?;
        bytes.copy_from_slice(received);
        Ok(RegisterImage::from_bytes(bytes))
    }

    /// Compare a full read-back against the mirror.
    pub fn verify_settings(&mut self) -> Result<bool> {
        let device = self.read_back()?;
        let mismatched = self.mirror.diff(&device);
        if mismatched.is_empty() {
            return Ok(true);
        }
        for reg in &mismatched {
            warn!(
                register = ?reg,
                expected = self.mirror.get(*reg),
                actual = device.get(*reg),
                "register mismatch"
            );
        }
        Ok(false)
    }

    /// Bring the device from any state to `Active` with `settings` applied.
    ///
    /// Each attempt pulses power-down and reset, writes every register and
    /// reads them back. A bus fault counts as a failed attempt. Running out of
    /// attempts leaves the device in `Fault` and is fatal for the caller.
    pub fn configure(&mut self, settings: &DeviceSettings) -> Result<()> {
        let attempts = settings.retries.max(1);
        let image = settings.image();
        for attempt in 1..=attempts {
            self.state = DeviceState::Configuring;
            match self.try_configure(settings, &image) {
                Ok(true) => {
                    self.state = DeviceState::Active;
                    info!(
                        attempt,
                        channels = self.active.len(),
                        frame_rate = self.frame_rate(),
                        "device configured"
                    );
                    return Ok(());
                }
                Ok(false) => warn!(attempt, "configuration did not verify"),
                Err(err) => warn!(attempt, error = %err, "configuration attempt failed"),
            }
        }
        self.state = DeviceState::Fault;
        Err(DaqError::ConfigurationFailed { attempts })
    }

    fn try_configure(&mut self, settings: &DeviceSettings, image: &RegisterImage) -> Result<bool> {
        self.start(false)?;
        self.power_down(true)?;
        self.reset(true)?;
        std::thread::sleep(settings.settle);
        self.power_down(false)?;
        std::thread::sleep(settings.settle);
        self.reset(false)?;
        std::thread::sleep(settings.settle);
        self.select_clock(false)?;

        self.update_settings(image)?;
        self.verify_settings()
    }

    // ---------------------------------------------------------------------
    // Individual settings
    // ---------------------------------------------------------------------

    fn set_config0_flag(&mut self, flag: Config0, enabled: bool) -> Result<bool> {
        let mut config0 = self.mirror.config0();
        config0.set(flag, enabled);
        self.write_register(RegisterAddress::Config0, config0.bits())
    }

    /// Auto-scan (`true`) or fixed-channel mode.
    pub fn set_auto_scan(&mut self, enabled: bool) -> Result<bool> {
        self.set_config0_flag(Config0::MUXMOD, !enabled)
    }

    /// Chopper stabilisation.
    pub fn set_chop(&mut self, enabled: bool) -> Result<bool> {
        self.set_config0_flag(Config0::CHOP, enabled)
    }

    /// Short SPI reset timeout.
    pub fn set_quick_spi_reset(&mut self, enabled: bool) -> Result<bool> {
        self.set_config0_flag(Config0::SPIRST, enabled)
    }

    /// Mux bypass.
    pub fn set_bypass(&mut self, enabled: bool) -> Result<bool> {
        self.set_config0_flag(Config0::BYPAS, enabled)
    }

    /// Clock output enable.
    pub fn set_external_clock(&mut self, enabled: bool) -> Result<bool> {
        self.set_config0_flag(Config0::CLKENB, enabled)
    }

    /// Status byte ahead of channel data.
    pub fn set_status_byte(&mut self, enabled: bool) -> Result<bool> {
        self.set_config0_flag(Config0::STAT, enabled)
    }

    /// Sleep instead of standby when idle.
    pub fn set_sleep_mode(&mut self, enabled: bool) -> Result<bool> {
        let value = self.mirror.config1().with_sleep_mode(enabled);
        self.write_register(RegisterAddress::Config1, value.raw())
    }

    /// Conversion data rate.
    pub fn set_data_rate(&mut self, rate: DataRate) -> Result<bool> {
        let value = self.mirror.config1().with_data_rate(rate);
        self.write_register(RegisterAddress::Config1, value.raw())
    }

    /// Bias current source.
    pub fn set_bias_current(&mut self, scbcs: Scbcs) -> Result<bool> {
        let value = self.mirror.config1().with_bias_current(scbcs);
        self.write_register(RegisterAddress::Config1, value.raw())
    }

    /// Switch-time delay.
    pub fn set_delay(&mut self, delay: Delay) -> Result<bool> {
        let value = self.mirror.config1().with_delay(delay);
        self.write_register(RegisterAddress::Config1, value.raw())
    }

    /// Fixed-mode input pair.
    pub fn set_fixed_channel(&mut self, mux: FixedChannel) -> Result<bool> {
        self.write_register(RegisterAddress::Muxsch, mux.raw())
    }

    /// Single-ended scan mask, bit `n` = AIN`n`.
    pub fn set_single_ended(&mut self, mask: u16) -> Result<bool> {
        let [low, high] = mask.to_le_bytes();
        let wrote_low = self.write_register(RegisterAddress::Muxsg0, low)?;
        let wrote_high = self.write_register(RegisterAddress::Muxsg1, high)?;
        Ok(wrote_low || wrote_high)
    }

    /// Differential scan mask, bit `n` = DIFF`n`.
    pub fn set_differential(&mut self, mask: u8) -> Result<bool> {
        self.write_register(RegisterAddress::Muxdif, mask)
    }

    /// System monitor channels.
    pub fn set_system(&mut self, channels: SystemChannels) -> Result<bool> {
        self.write_register(RegisterAddress::Sysred, channels.bits())
    }

    /// GPIO direction, bit set = input.
    pub fn set_gpio_direction(&mut self, mask: u8) -> Result<bool> {
        self.write_register(RegisterAddress::Gpioc, mask)
    }

    /// GPIO output levels.
    pub fn set_gpio_output(&mut self, levels: u8) -> Result<bool> {
        self.write_register(RegisterAddress::Gpiod, levels)
    }

    /// Sample the GPIO data register.
    pub fn read_gpio(&mut self) -> Result<u8> {
        self.read_register(RegisterAddress::Gpiod)
    }

    /// Identify the part.
    pub fn read_id(&mut self) -> Result<DeviceId> {
        Ok(DeviceId::from_raw(self.read_register(RegisterAddress::Id)?))
    }

    // ---------------------------------------------------------------------
    // Data
    // ---------------------------------------------------------------------

    /// Read the latest conversion.
    ///
    /// With the status byte enabled the conversion register is read twice in
    /// one transaction and both halves are returned. Without it the channel
    /// is taken from the expected scan position.
    pub fn read_data(&mut self) -> Result<Readout> {
        if self.state != DeviceState::Active {
            return Err(DaqError::InvalidState {
                state: self.state.as_str(),
                operation: "read data",
            });
        }

        if self.status_enabled() {
            let cmd = CommandByte::new(CommandKind::ReadCommand, true, 0).raw();
            let rx = self.bus.transceive(&[cmd, 0, 0, 0, 0, cmd, 0, 0, 0, 0])?;
            if rx.len() < DUAL_READ_LEN {
                return Err(BusError::transfer("short data read").into());
            }
            let first = ChannelSample::new(
                StatusByte::from_raw(rx[1]).channel(),
                decode_sample([rx[2], rx[3], rx[4]]),
            );
            let second = ChannelSample::new(
                StatusByte::from_raw(rx[6]).channel(),
                decode_sample([rx[7], rx[8], rx[9]]),
            );
            Ok(Readout::Dual(first, second))
        } else {
            let rx = self.bus.receive(DIRECT_READ_LEN)?;
            if rx.len() < DIRECT_READ_LEN {
                return Err(BusError::transfer("short direct read").into());
            }
            let channel = self.next_scan_channel();
            Ok(Readout::Single(ChannelSample::new(
                channel,
                decode_sample([rx[0], rx[1], rx[2]]),
            )))
        }
    }

    fn next_scan_channel(&mut self) -> ChannelId {
        let Some(channel) = self.positions.get(self.scan_cursor).copied() else {
            return ChannelId::default();
        };
        self.scan_cursor = (self.scan_cursor + 1) % self.positions.len();
        channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{CounterSource, ScriptedSource, SimRead, SimulatedAdc};
    use tracing_test::traced_test;

    fn quick(n: usize) -> DeviceSettings {
        DeviceSettings {
            settle: Duration::ZERO,
            ..DeviceSettings::for_channels(n)
        }
    }

    fn device(adc: &SimulatedAdc) -> Ads1258<crate::hal::sim::SimBus, crate::hal::sim::SimPins> {
        Ads1258::new(adc.bus(), adc.pins())
    }

    #[test]
    fn test_single_ended_mask() {
        assert_eq!(single_ended_mask(0), 0);
        assert_eq!(single_ended_mask(3), 0b1110_0000_0000_0000);
        assert_eq!(single_ended_mask(4), 0xF000);
        assert_eq!(single_ended_mask(16), 0xFFFF);
        assert_eq!(single_ended_mask(40), 0xFFFF);
    }

    #[test]
    fn test_settings_image() {
        let image = quick(3).image();
        assert_eq!(image.get(RegisterAddress::Config0), Config0::STAT.bits());
        assert_eq!(image.get(RegisterAddress::Config1), 0x01);
        assert_eq!(image.get(RegisterAddress::Muxsg0), 0x00);
        assert_eq!(image.get(RegisterAddress::Muxsg1), 0xE0);
        assert_eq!(quick(3).channel_set().len(), 3);
    }

    #[test]
    fn test_new_uses_defaults() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let dev = device(&adc);
        assert_eq!(dev.state(), DeviceState::Unconfigured);
        assert_eq!(*dev.registers(), RegisterImage::default());
        assert_eq!(dev.active_channels().len(), 16);
    }

    #[test]
    fn test_configure_reaches_active() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        dev.configure(&quick(4)).unwrap();
        assert_eq!(dev.state(), DeviceState::Active);
        assert_eq!(adc.registers(), *dev.registers());
        assert_eq!(dev.active_channels().len(), 4);
        let ids: Vec<u8> = dev.channel_positions().iter().map(|c| c.raw()).collect();
        assert_eq!(ids, vec![20, 21, 22, 23]);
    }

    #[test]
    #[traced_test]
    fn test_configure_retries_after_bad_readback() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        adc.corrupt_readbacks(2);
        let mut dev = device(&adc);
        dev.configure(&quick(2)).unwrap();
        assert_eq!(dev.state(), DeviceState::Active);
        assert!(logs_contain("configuration did not verify"));
        assert!(logs_contain("device configured"));
    }

    #[test]
    fn test_configure_exhaustion_is_fatal() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        adc.corrupt_readbacks(100);
        let mut dev = device(&adc);
        let settings = DeviceSettings {
            retries: 3,
            ..quick(2)
        };
        let err = dev.configure(&settings).unwrap_err();
        assert!(matches!(err, DaqError::ConfigurationFailed { attempts: 3 }));
        assert!(err.is_fatal());
        assert_eq!(dev.state(), DeviceState::Fault);
    }

    #[test]
    fn test_setter_is_noop_when_unchanged() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        dev.configure(&quick(4)).unwrap();
        let before = adc.transactions();

        assert!(!dev.set_chop(false).unwrap());
        assert!(!dev.set_data_rate(DataRate::Drate1).unwrap());
        assert_eq!(adc.transactions(), before);

        assert!(dev.set_chop(true).unwrap());
        assert_eq!(adc.transactions(), before + 1);
        assert!(dev.registers().config0().contains(Config0::CHOP));
    }

    #[test]
    fn test_setters_round_trip_through_device() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        dev.configure(&quick(4)).unwrap();

        dev.set_delay(Delay::from_bits(3)).unwrap();
        dev.set_bias_current(Scbcs::Micro1_5).unwrap();
        dev.set_sleep_mode(true).unwrap();
        dev.set_fixed_channel(FixedChannel::new(2, 8)).unwrap();
        dev.set_gpio_direction(0x0F).unwrap();
        dev.set_gpio_output(0xA0).unwrap();
        dev.set_bypass(true).unwrap();
        dev.set_quick_spi_reset(true).unwrap();

        assert!(dev.verify_settings().unwrap());
        assert_eq!(dev.read_back().unwrap(), *dev.registers());
        assert_eq!(
            dev.read_register(RegisterAddress::Config1).unwrap(),
            dev.registers().config1().raw()
        );
        assert_eq!(dev.read_gpio().unwrap(), 0xA0);
        assert_eq!(dev.read_id().unwrap(), DeviceId::Ads1258);
    }

    #[test]
    fn test_channel_setters_rebuild_activation_set() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        dev.configure(&quick(1)).unwrap();
        assert_eq!(dev.active_channels().len(), 1);

        dev.set_differential(0b11).unwrap();
        dev.set_system(SystemChannels::TEMP | SystemChannels::VCC).unwrap();
        assert_eq!(dev.active_channels().len(), 5);

        dev.set_single_ended(0).unwrap();
        assert_eq!(dev.active_channels().len(), 4);

        dev.set_auto_scan(false).unwrap();
        assert_eq!(dev.active_channels().positions(), vec![ChannelId::FIXED]);
        assert!(dev.verify_settings().unwrap());
    }

    #[test]
    fn test_power_down_resets_mirror() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        dev.configure(&quick(2)).unwrap();
        dev.power_down(true).unwrap();
        assert_eq!(*dev.registers(), RegisterImage::default());
        assert_eq!(dev.active_channels().len(), 16);
        assert_eq!(adc.pin(Pin::PowerDown), Level::Low);
    }

    #[test]
    fn test_verify_detects_external_change() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        dev.configure(&quick(2)).unwrap();
        adc.poke(RegisterAddress::Muxdif, 0x80);
        assert!(!dev.verify_settings().unwrap());
    }

    #[test]
    fn test_id_register_is_read_only() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        assert!(dev.write_register(RegisterAddress::Id, 1).is_err());
    }

    #[test]
    fn test_read_requires_active() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        let err = dev.read_data().unwrap_err();
        assert!(matches!(err, DaqError::InvalidState { .. }));
    }

    #[test]
    fn test_dual_read() {
        let adc = SimulatedAdc::new(CounterSource::new());
        let mut dev = device(&adc);
        dev.configure(&quick(2)).unwrap();
        dev.start(true).unwrap();

        let Readout::Dual(a, b) = dev.read_data().unwrap() else {
            panic!("expected a dual readout");
        };
        assert_eq!(a, b);
        assert_eq!(a, ChannelSample::new(ChannelId::single_ended(14), 1));
    }

    #[test]
    fn test_direct_read_infers_channel() {
        let adc = SimulatedAdc::new(CounterSource::new());
        let mut dev = device(&adc);
        let settings = DeviceSettings {
            status_byte: false,
            ..quick(2)
        };
        dev.configure(&settings).unwrap();
        dev.start(true).unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            let Readout::Single(sample) = dev.read_data().unwrap() else {
                panic!("expected a single readout");
            };
            seen.push((sample.channel.raw(), sample.value));
        }
        assert_eq!(seen, vec![(22, 1), (23, 2), (22, 3), (23, 4)]);
    }

    #[test]
    fn test_straddled_read_returns_both_halves() {
        let a = ChannelSample::new(ChannelId::single_ended(14), 10);
        let b = ChannelSample::new(ChannelId::single_ended(15), 11);
        let adc = SimulatedAdc::new(ScriptedSource::new([SimRead::Straddle(a, b)]));
        let mut dev = device(&adc);
        dev.configure(&quick(2)).unwrap();
        dev.start(true).unwrap();
        assert_eq!(dev.read_data().unwrap(), Readout::Dual(a, b));
    }

    #[test]
    fn test_frame_rate() {
        let adc = SimulatedAdc::new(ScriptedSource::default());
        let mut dev = device(&adc);
        dev.configure(&quick(4)).unwrap();
        assert!((dev.frame_rate() - 1542.0).abs() < 1e-9);
    }
}
