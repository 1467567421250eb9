//! Channel identifiers and the activation set.
//!
//! The converter reports a 5-bit channel id in its status byte:
//!
//! ```text
//! 0x00..=0x07  differential pairs DIFF0..DIFF7
//! 0x08..=0x17  single-ended inputs AIN0..AIN15
//! 0x18         OFFSET
//! 0x1A         VCC
//! 0x1B         TEMP
//! 0x1C         GAIN
//! 0x1D         REF
//! 0x1F         fixed-channel mode
//! ```

use std::fmt;

/// Id reported for every conversion while the multiplexer is in fixed mode.
pub const FIXED_CHANNEL_ID: u8 = 0x1F;

const DIFFERENTIAL_BASE: u8 = 0x00;
const SINGLE_ENDED_BASE: u8 = 0x08;
const SYSTEM_BASE: u8 = 0x18;

/// A 5-bit channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Fixed-channel mode id.
    pub const FIXED: Self = Self(FIXED_CHANNEL_ID);

    /// Wrap a status-byte channel field. Bits above the low five are ignored.
    pub const fn from_status(raw: u8) -> Self {
        Self(raw & 0x1F)
    }

    /// Build an id, rejecting values above 31.
    pub const fn new(raw: u8) -> Option<Self> {
        if raw <= 0x1F {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Differential pair `n` (0..8).
    pub const fn differential(n: u8) -> Self {
        Self(DIFFERENTIAL_BASE + (n & 0x7))
    }

    /// Single-ended input `n` (0..16).
    pub const fn single_ended(n: u8) -> Self {
        Self(SINGLE_ENDED_BASE + (n & 0xF))
    }

    /// System monitor channel selected by SYSRED bit `bit`.
    pub const fn system(bit: u8) -> Self {
        Self(SYSTEM_BASE + (bit & 0x7))
    }

    /// The raw 5-bit id.
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x00..=0x07 => write!(f, "DIFF{}", self.0 - DIFFERENTIAL_BASE),
            0x08..=0x17 => write!(f, "AIN{}", self.0 - SINGLE_ENDED_BASE),
            0x18 => f.write_str("OFFSET"),
            0x1A => f.write_str("VCC"),
            0x1B => f.write_str("TEMP"),
            0x1C => f.write_str("GAIN"),
            0x1D => f.write_str("REF"),
            FIXED_CHANNEL_ID => f.write_str("FIXED"),
            other => write!(f, "CH{other}"),
        }
    }
}

/// Up to 32 active channel ids stored as a bitmask.
///
/// Iteration is always ascending by id, which is also the frame position
/// order used by reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelSet(u32);

impl ChannelSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Build from a raw bitmask (bit `n` = channel id `n`).
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from the channel-enabling registers.
    ///
    /// In fixed mode only the fixed id is active regardless of the scan masks.
    pub fn from_registers(fixed_mode: bool, muxdif: u8, muxsg0: u8, muxsg1: u8, sysred: u8) -> Self {
        if fixed_mode {
            return Self::EMPTY.with(ChannelId::FIXED);
        }
        let mut bits = u32::from(muxdif) << DIFFERENTIAL_BASE;
        bits |= u32::from(muxsg0) << SINGLE_ENDED_BASE;
        bits |= u32::from(muxsg1) << (SINGLE_ENDED_BASE + 8);
        bits |= u32::from(sysred & SYSRED_CHANNEL_MASK) << SYSTEM_BASE;
        Self(bits)
    }

    /// Add an id.
    #[must_use]
    pub const fn with(self, id: ChannelId) -> Self {
        Self(self.0 | (1 << id.raw()))
    }

    /// Whether `id` is active.
    pub const fn contains(self, id: ChannelId) -> bool {
        self.0 & (1 << id.raw()) != 0
    }

    /// Number of active channels.
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// True when nothing is enabled.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Frame position of `id`, i.e. its rank among active ids.
    pub fn position(self, id: ChannelId) -> Option<usize> {
        if !self.contains(id) {
            return None;
        }
        let below = self.0 & ((1u32 << id.raw()) - 1);
        Some(below.count_ones() as usize)
    }

    /// Active ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = ChannelId> {
        (0u8..32)
            .filter(move |bit| self.0 & (1 << bit) != 0)
            .map(ChannelId)
    }

    /// Active ids collected as the frame position list.
    pub fn positions(self) -> Vec<ChannelId> {
        self.iter().collect()
    }
}

impl FromIterator<ChannelId> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = ChannelId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

// SYSRED bits 0, 2..=5 select monitor channels; bits 1, 6, 7 are reserved.
const SYSRED_CHANNEL_MASK: u8 = 0b0011_1101;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_ranges() {
        assert_eq!(ChannelId::differential(3).raw(), 3);
        assert_eq!(ChannelId::single_ended(0).raw(), 8);
        assert_eq!(ChannelId::single_ended(15).raw(), 23);
        assert_eq!(ChannelId::system(2).raw(), 0x1A);
        assert!(ChannelId::new(32).is_none());
        assert_eq!(ChannelId::single_ended(4).to_string(), "AIN4");
        assert_eq!(ChannelId::system(3).to_string(), "TEMP");
    }

    #[test]
    fn test_positions_are_distinct_and_ascending() {
        for bits in [0u32, 1, 0b1011, 0xFFFF_FFFF, 0x8000_0001, 0x00FF_FF00] {
            let set = ChannelSet::from_bits(bits);
            let positions = set.positions();
            assert_eq!(positions.len(), set.len());
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
            for (index, id) in positions.iter().enumerate() {
                assert_eq!(set.position(*id), Some(index));
            }
        }
    }

    #[test]
    fn test_from_registers_single_ended() {
        let set = ChannelSet::from_registers(false, 0x00, 0x00, 0b1110_0000, 0x00);
        let ids: Vec<u8> = set.iter().map(ChannelId::raw).collect();
        assert_eq!(ids, vec![21, 22, 23]);
    }

    #[test]
    fn test_from_registers_mixed_groups() {
        let set = ChannelSet::from_registers(false, 0b0000_0001, 0b0000_0001, 0x00, 0b0000_1000);
        let ids: Vec<u8> = set.iter().map(ChannelId::raw).collect();
        assert_eq!(ids, vec![0, 8, 0x1B]);
    }

    #[test]
    fn test_reserved_sysred_bits_ignored() {
        let set = ChannelSet::from_registers(false, 0, 0, 0, 0b1100_0010);
        assert!(set.is_empty());
    }

    #[test]
    fn test_fixed_mode_is_single_channel() {
        let set = ChannelSet::from_registers(true, 0xFF, 0xFF, 0xFF, 0x3D);
        assert_eq!(set.len(), 1);
        assert!(set.contains(ChannelId::FIXED));
    }

    #[test]
    fn test_position_of_inactive_id() {
        let set: ChannelSet = [ChannelId::single_ended(1), ChannelId::single_ended(5)]
            .into_iter()
            .collect();
        assert_eq!(set.position(ChannelId::single_ended(5)), Some(1));
        assert_eq!(set.position(ChannelId::single_ended(2)), None);
    }
}
