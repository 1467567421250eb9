//! Wire protocol of the ADS1258 multiplexed delta-sigma ADC.
//!
//! Every hardware register is modelled as a value type holding the raw byte
//! with named accessors computed by shift/mask. Nothing here touches the bus;
//! the [`device`](crate::device) module drives these types over a
//! [`SpiBus`](crate::hal::SpiBus).
//!
//! # Command byte
//!
//! ```text
//! | 7 6 5  | 4   | 3 2 1 0 |
//! | C[2:0] | MUL | A[3:0]  |
//! ```
//!
//! # Status byte
//!
//! ```text
//! | 7   | 6   | 5      | 4 3 2 1 0 |
//! | NEW | OVF | SUPPLY | CHID[4:0] |
//! ```

pub mod channels;
pub mod registers;

pub use channels::{ChannelId, ChannelSet};
pub use registers::{
    Config0, Config1, DataRate, Delay, DeviceId, FixedChannel, RegisterAddress, RegisterImage,
    Scbcs, SystemChannels,
};

/// Number of bytes in one conversion result (24-bit, MSB first).
pub const SAMPLE_BYTES: usize = 3;

/// Smallest value a 24-bit two's-complement conversion can take.
pub const SAMPLE_MIN: i32 = -(1 << 23);

/// Largest value a 24-bit two's-complement conversion can take.
pub const SAMPLE_MAX: i32 = (1 << 23) - 1;

/// Reference voltage used to scale raw codes to volts.
pub const REFERENCE_VOLTS: f64 = 2.5;

/// Command kinds encoded in bits 7..5 of the command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    /// Channel data read without a command byte.
    ReadDirect = 0x0,
    /// Channel data read preceded by a command byte.
    ReadCommand = 0x1,
    /// Register read.
    ReadRegisters = 0x2,
    /// Register write.
    WriteRegisters = 0x3,
    /// Pulse convert (single conversion in fixed mode).
    PulseConvert = 0x4,
    /// Software reset.
    Reset = 0x6,
}

impl CommandKind {
    /// Decode a 3-bit command field.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x7 {
            0x0 => Some(Self::ReadDirect),
            0x1 => Some(Self::ReadCommand),
            0x2 => Some(Self::ReadRegisters),
            0x3 => Some(Self::WriteRegisters),
            0x4 => Some(Self::PulseConvert),
            0x6 => Some(Self::Reset),
            _ => None,
        }
    }
}

/// A packed command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandByte(u8);

impl CommandByte {
    const KIND_SHIFT: u8 = 5;
    const MULTIPLE_BIT: u8 = 1 << 4;
    const ADDRESS_MASK: u8 = 0x0F;

    /// Pack a command kind, multiple-register flag and 4-bit address.
    pub const fn new(kind: CommandKind, multiple: bool, address: u8) -> Self {
        let mut raw = (kind as u8) << Self::KIND_SHIFT;
        if multiple {
            raw |= Self::MULTIPLE_BIT;
        }
        raw |= address & Self::ADDRESS_MASK;
        Self(raw)
    }

    /// Wrap a raw byte received or built elsewhere.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// The raw byte as sent on the wire.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Decoded command kind, `None` for the reserved encodings.
    pub fn kind(self) -> Option<CommandKind> {
        CommandKind::from_bits(self.0 >> Self::KIND_SHIFT)
    }

    /// Whether the multiple-register flag is set.
    pub const fn multiple(self) -> bool {
        self.0 & Self::MULTIPLE_BIT != 0
    }

    /// Register address field.
    pub const fn address(self) -> u8 {
        self.0 & Self::ADDRESS_MASK
    }
}

/// The status byte that prefixes channel data when `STAT` is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusByte(u8);

impl StatusByte {
    const CHID_MASK: u8 = 0x1F;
    const SUPPLY_BIT: u8 = 1 << 5;
    const OVERFLOW_BIT: u8 = 1 << 6;
    const NEW_BIT: u8 = 1 << 7;

    /// Wrap a raw status byte.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Build a status byte from its fields.
    pub const fn new(channel: ChannelId, new_data: bool, overflow: bool, supply: bool) -> Self {
        let mut raw = channel.raw() & Self::CHID_MASK;
        if supply {
            raw |= Self::SUPPLY_BIT;
        }
        if overflow {
            raw |= Self::OVERFLOW_BIT;
        }
        if new_data {
            raw |= Self::NEW_BIT;
        }
        Self(raw)
    }

    /// The raw byte.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Channel the conversion belongs to.
    pub const fn channel(self) -> ChannelId {
        ChannelId::from_status(self.0 & Self::CHID_MASK)
    }

    /// Supply voltage below the analog supply threshold.
    pub const fn supply_fault(self) -> bool {
        self.0 & Self::SUPPLY_BIT != 0
    }

    /// Differential input exceeded full scale.
    pub const fn overflow(self) -> bool {
        self.0 & Self::OVERFLOW_BIT != 0
    }

    /// Conversion has not been read before.
    pub const fn new_data(self) -> bool {
        self.0 & Self::NEW_BIT != 0
    }
}

/// One decoded conversion: the channel it came from and its signed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelSample {
    /// Channel identifier (0..=31).
    pub channel: ChannelId,
    /// Signed 24-bit conversion result.
    pub value: i32,
}

impl ChannelSample {
    /// Create a sample.
    pub const fn new(channel: ChannelId, value: i32) -> Self {
        Self { channel, value }
    }

    /// Value scaled to volts against the 2.5 V reference.
    pub fn volts(&self) -> f64 {
        f64::from(self.value) * REFERENCE_VOLTS / f64::from(1u32 << 23)
    }
}

/// Decode a 24-bit big-endian two's-complement conversion.
///
/// The three bytes are placed in the top of a 32-bit word and arithmetically
/// shifted right by 8 so the sign bit extends over the full range.
pub fn decode_sample(bytes: [u8; SAMPLE_BYTES]) -> i32 {
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8
}

/// Encode a value into the 24-bit big-endian wire form. Out-of-range values
/// are clamped to full scale.
pub fn encode_sample(value: i32) -> [u8; SAMPLE_BYTES] {
    let clamped = value.clamp(SAMPLE_MIN, SAMPLE_MAX);
    let bytes = (clamped << 8).to_be_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

/// Per-channel frame rate of the auto-scan sequence.
///
/// Each conversion takes `1 / drate` seconds plus the programmed switch delay,
/// and the scan visits `n_channels` channels per frame.
pub fn channel_frame_rate(n_channels: usize, drate: f64, delay_us: f64) -> f64 {
    if n_channels == 0 || drate <= 0.0 {
        return 0.0;
    }
    let conversion = 1.0 / drate + delay_us * 1e-6;
    1.0 / (conversion * n_channels as f64)
}
