//! Register map and per-register value types.
//!
//! ```text
//! addr  name    default  fields
//! 0x0   CONFIG0 0x0A     - SPIRST MUXMOD BYPAS CLKENB CHOP STAT -
//! 0x1   CONFIG1 0x83     IDLMOD DLY[2:0] SCBCS[1:0] DRATE[1:0]
//! 0x2   MUXSCH  0x00     AINP[3:0] AINN[3:0]
//! 0x3   MUXDIF  0x00     DIFF7..DIFF0
//! 0x4   MUXSG0  0xFF     AIN7..AIN0
//! 0x5   MUXSG1  0xFF     AIN15..AIN8
//! 0x6   SYSRED  0x00     - - REF GAIN TEMP VCC - OFFSET
//! 0x7   GPIOC   0xFF     CIO7..CIO0 (1 = input)
//! 0x8   GPIOD   0x00     DIO7..DIO0
//! 0x9   ID      ----     read only
//! ```

use bitflags::bitflags;

/// Number of registers mirrored locally (everything except `ID`).
pub const TRACKED_REGISTERS: usize = 9;

/// Register addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterAddress {
    /// Configuration register 0.
    Config0 = 0x0,
    /// Configuration register 1.
    Config1 = 0x1,
    /// Fixed-mode multiplexer selection.
    Muxsch = 0x2,
    /// Differential scan enable.
    Muxdif = 0x3,
    /// Single-ended scan enable, AIN0..AIN7.
    Muxsg0 = 0x4,
    /// Single-ended scan enable, AIN8..AIN15.
    Muxsg1 = 0x5,
    /// System monitor scan enable.
    Sysred = 0x6,
    /// GPIO direction.
    Gpioc = 0x7,
    /// GPIO data.
    Gpiod = 0x8,
    /// Device identification (read only).
    Id = 0x9,
}

impl RegisterAddress {
    /// Every tracked register in ascending address order.
    pub const TRACKED: [Self; TRACKED_REGISTERS] = [
        Self::Config0,
        Self::Config1,
        Self::Muxsch,
        Self::Muxdif,
        Self::Muxsg0,
        Self::Muxsg1,
        Self::Sysred,
        Self::Gpioc,
        Self::Gpiod,
    ];

    /// The address as transmitted in a command byte.
    pub const fn addr(self) -> u8 {
        self as u8
    }

    /// Power-on value, `None` for the read-only ID register.
    pub const fn default_value(self) -> Option<u8> {
        match self {
            Self::Config0 => Some(0x0A),
            Self::Config1 => Some(0x83),
            Self::Muxsch => Some(0x00),
            Self::Muxdif => Some(0x00),
            Self::Muxsg0 => Some(0xFF),
            Self::Muxsg1 => Some(0xFF),
            Self::Sysred => Some(0x00),
            Self::Gpioc => Some(0xFF),
            Self::Gpiod => Some(0x00),
            Self::Id => None,
        }
    }

    /// Decode an address, `None` past the ID register.
    pub const fn from_addr(addr: u8) -> Option<Self> {
        match addr {
            0x0 => Some(Self::Config0),
            0x1 => Some(Self::Config1),
            0x2 => Some(Self::Muxsch),
            0x3 => Some(Self::Muxdif),
            0x4 => Some(Self::Muxsg0),
            0x5 => Some(Self::Muxsg1),
            0x6 => Some(Self::Sysred),
            0x7 => Some(Self::Gpioc),
            0x8 => Some(Self::Gpiod),
            0x9 => Some(Self::Id),
            _ => None,
        }
    }
}

/// The local mirror of every tracked register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterImage([u8; TRACKED_REGISTERS]);

impl Default for RegisterImage {
    fn default() -> Self {
        let mut bytes = [0u8; TRACKED_REGISTERS];
        for (slot, reg) in bytes.iter_mut().zip(RegisterAddress::TRACKED) {
            *slot = reg.default_value().unwrap_or(0);
        }
        Self(bytes)
    }
}

impl RegisterImage {
    /// Build from raw bytes in address order.
    pub const fn from_bytes(bytes: [u8; TRACKED_REGISTERS]) -> Self {
        Self(bytes)
    }

    /// Raw bytes in address order.
    pub const fn bytes(&self) -> &[u8; TRACKED_REGISTERS] {
        &self.0
    }

    /// Value of one register. The ID register is not mirrored and reads 0.
    pub fn get(&self, reg: RegisterAddress) -> u8 {
        self.0.get(usize::from(reg.addr())).copied().unwrap_or(0)
    }

    /// Overwrite one register. Writes to ID are ignored.
    pub fn set(&mut self, reg: RegisterAddress, value: u8) {
        if let Some(slot) = self.0.get_mut(usize::from(reg.addr())) {
            *slot = value;
        }
    }

    /// CONFIG0 view.
    pub fn config0(&self) -> Config0 {
        Config0::from_bits_retain(self.get(RegisterAddress::Config0))
    }

    /// CONFIG1 view.
    pub fn config1(&self) -> Config1 {
        Config1::from_raw(self.get(RegisterAddress::Config1))
    }

    /// MUXSCH view.
    pub fn fixed_channel(&self) -> FixedChannel {
        FixedChannel::from_raw(self.get(RegisterAddress::Muxsch))
    }

    /// SYSRED view.
    pub fn system_channels(&self) -> SystemChannels {
        SystemChannels::from_bits_retain(self.get(RegisterAddress::Sysred))
    }

    /// Addresses whose value differs from `other`.
    pub fn diff(&self, other: &Self) -> Vec<RegisterAddress> {
        RegisterAddress::TRACKED
            .into_iter()
            .filter(|reg| self.get(*reg) != other.get(*reg))
            .collect()
    }
}

bitflags! {
    /// CONFIG0 flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Config0: u8 {
        /// Status byte prefixes channel data.
        const STAT = 1 << 1;
        /// Chopper-stabilised inputs.
        const CHOP = 1 << 2;
        /// Clock output enabled on CLKIO.
        const CLKENB = 1 << 3;
        /// External ADC input path bypasses the internal mux connection.
        const BYPAS = 1 << 4;
        /// Fixed-channel mode (clear = auto-scan).
        const MUXMOD = 1 << 5;
        /// Short SPI reset timeout.
        const SPIRST = 1 << 6;
    }
}

bitflags! {
    /// SYSRED monitor channel enables.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SystemChannels: u8 {
        /// Offset (inputs shorted).
        const OFFSET = 1 << 0;
        /// Analog supply.
        const VCC = 1 << 2;
        /// Internal temperature diode.
        const TEMP = 1 << 3;
        /// Gain.
        const GAIN = 1 << 4;
        /// External reference.
        const REF = 1 << 5;
    }
}

/// Conversion data-rate selector (CONFIG1 DRATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DataRate {
    /// Slowest rate.
    Drate0 = 0,
    /// Default rate.
    #[default]
    Drate1 = 1,
    /// Faster rate.
    Drate2 = 2,
    /// Fastest rate.
    Drate3 = 3,
}

impl DataRate {
    const AUTO_SPS: [f64; 4] = [1831.0, 6168.0, 15123.0, 23739.0];
    const FIXED_SPS: [f64; 4] = [1953.0, 7813.0, 31250.0, 125_000.0];

    /// Decode a 2-bit field.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Drate0,
            1 => Self::Drate1,
            2 => Self::Drate2,
            _ => Self::Drate3,
        }
    }

    /// Decode a configured index, rejecting anything past 3.
    pub const fn from_index(index: u8) -> Option<Self> {
        if index <= 3 {
            Some(Self::from_bits(index))
        } else {
            None
        }
    }

    /// Raw field value.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Samples per second with the 16 MHz master clock.
    pub fn samples_per_second(self, auto_scan: bool) -> f64 {
        let table = if auto_scan {
            Self::AUTO_SPS
        } else {
            Self::FIXED_SPS
        };
        table[usize::from(self.bits())]
    }
}

/// Switch-time delay selector (CONFIG1 DLY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Delay(u8);

impl Delay {
    const MICROS: [u32; 8] = [0, 8, 16, 32, 64, 128, 256, 384];

    /// Decode a 3-bit field.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x7)
    }

    /// Decode a configured index, rejecting anything past 7.
    pub const fn from_index(index: u8) -> Option<Self> {
        if index <= 7 {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Raw field value.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Programmed delay in microseconds.
    pub fn micros(self) -> u32 {
        Self::MICROS[usize::from(self.0)]
    }
}

/// Sensor bias current source selector (CONFIG1 SCBCS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Scbcs {
    /// Bias source off.
    #[default]
    Off = 0,
    /// 1.5 µA.
    Micro1_5 = 1,
    /// Reserved encoding.
    Reserved = 2,
    /// 24 µA.
    Micro24 = 3,
}

impl Scbcs {
    /// Decode a 2-bit field.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Self::Off,
            1 => Self::Micro1_5,
            2 => Self::Reserved,
            _ => Self::Micro24,
        }
    }
}

/// CONFIG1 value with field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Config1(u8);

impl Config1 {
    const IDLMOD_BIT: u8 = 1 << 7;
    const DLY_SHIFT: u8 = 4;
    const DLY_MASK: u8 = 0x7 << Self::DLY_SHIFT;
    const SCBCS_SHIFT: u8 = 2;
    const SCBCS_MASK: u8 = 0x3 << Self::SCBCS_SHIFT;
    const DRATE_MASK: u8 = 0x3;

    /// Wrap a raw value.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Sleep (rather than standby) when idle.
    pub const fn sleep_mode(self) -> bool {
        self.0 & Self::IDLMOD_BIT != 0
    }

    /// Switch-time delay.
    pub const fn delay(self) -> Delay {
        Delay::from_bits((self.0 & Self::DLY_MASK) >> Self::DLY_SHIFT)
    }

    /// Bias current source.
    pub const fn bias_current(self) -> Scbcs {
        Scbcs::from_bits((self.0 & Self::SCBCS_MASK) >> Self::SCBCS_SHIFT)
    }

    /// Data rate.
    pub const fn data_rate(self) -> DataRate {
        DataRate::from_bits(self.0 & Self::DRATE_MASK)
    }

    /// Copy with the idle mode replaced.
    #[must_use]
    pub const fn with_sleep_mode(self, sleep: bool) -> Self {
        if sleep {
            Self(self.0 | Self::IDLMOD_BIT)
        } else {
            Self(self.0 & !Self::IDLMOD_BIT)
        }
    }

    /// Copy with the delay replaced.
    #[must_use]
    pub const fn with_delay(self, delay: Delay) -> Self {
        Self((self.0 & !Self::DLY_MASK) | (delay.bits() << Self::DLY_SHIFT))
    }

    /// Copy with the bias current replaced.
    #[must_use]
    pub const fn with_bias_current(self, scbcs: Scbcs) -> Self {
        Self((self.0 & !Self::SCBCS_MASK) | ((scbcs as u8) << Self::SCBCS_SHIFT))
    }

    /// Copy with the data rate replaced.
    #[must_use]
    pub const fn with_data_rate(self, rate: DataRate) -> Self {
        Self((self.0 & !Self::DRATE_MASK) | rate.bits())
    }
}

/// MUXSCH: positive and negative inputs used in fixed-channel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FixedChannel(u8);

impl FixedChannel {
    /// Pack a positive/negative input pair (each 0..16).
    pub const fn new(positive: u8, negative: u8) -> Self {
        Self(((positive & 0xF) << 4) | (negative & 0xF))
    }

    /// Wrap a raw value.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Positive input.
    pub const fn positive(self) -> u8 {
        self.0 >> 4
    }

    /// Negative input.
    pub const fn negative(self) -> u8 {
        self.0 & 0xF
    }
}

/// Device model decoded from the ID register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceId {
    /// 24-bit ADS1258.
    Ads1258,
    /// 16-bit ADS1158.
    Ads1158,
}

impl DeviceId {
    const ADS1158_BIT: u8 = 1 << 4;

    /// Decode the ID register.
    pub const fn from_raw(raw: u8) -> Self {
        if raw & Self::ADS1158_BIT != 0 {
            Self::Ads1158
        } else {
            Self::Ads1258
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_image() {
        let image = RegisterImage::default();
        assert_eq!(
            image.bytes(),
            &[0x0A, 0x83, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0xFF, 0x00]
        );
        assert_eq!(image.config0(), Config0::STAT | Config0::CLKENB);
        assert!(image.config1().sleep_mode());
        assert_eq!(image.config1().data_rate(), DataRate::Drate3);
        assert_eq!(image.config1().delay().micros(), 0);
    }

    #[test]
    fn test_config1_fields_do_not_overlap() {
        let value = Config1::from_raw(0)
            .with_sleep_mode(true)
            .with_delay(Delay::from_bits(5))
            .with_bias_current(Scbcs::Micro24)
            .with_data_rate(DataRate::Drate2);
        assert_eq!(value.raw(), 0b1101_1110);
        assert_eq!(value.delay().micros(), 128);
        assert_eq!(value.bias_current(), Scbcs::Micro24);

        let cleared = value.with_delay(Delay::from_bits(0)).with_sleep_mode(false);
        assert_eq!(cleared.raw(), 0b0000_1110);
    }

    #[test]
    fn test_rate_tables() {
        assert_eq!(DataRate::Drate1.samples_per_second(true), 6168.0);
        assert_eq!(DataRate::Drate3.samples_per_second(false), 125_000.0);
        assert!(DataRate::from_index(4).is_none());
        assert!(Delay::from_index(8).is_none());
        assert_eq!(Delay::from_bits(7).micros(), 384);
    }

    #[test]
    fn test_fixed_channel_nibbles() {
        let mux = FixedChannel::new(3, 0xA);
        assert_eq!(mux.raw(), 0x3A);
        assert_eq!(mux.positive(), 3);
        assert_eq!(mux.negative(), 0xA);
    }

    #[test]
    fn test_device_id() {
        assert_eq!(DeviceId::from_raw(0x8B), DeviceId::Ads1258);
        assert_eq!(DeviceId::from_raw(0x9B), DeviceId::Ads1158);
    }

    #[test]
    fn test_image_diff() {
        let a = RegisterImage::default();
        let mut b = a;
        b.set(RegisterAddress::Muxsg1, 0x0F);
        b.set(RegisterAddress::Id, 0x55);
        assert_eq!(a.diff(&b), vec![RegisterAddress::Muxsg1]);
        assert_eq!(b.get(RegisterAddress::Id), 0);
    }
}
