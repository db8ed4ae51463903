//! Packed bit ranges inside a 64-bit word.
//!
//! ```
//! use wtf_rs::bitfield::BitField;
//! type Low = BitField<0, 8>;
//! type High = BitField<8, 4>;
//! let word = Low::encode(0x2a) | High::encode(3);
//! assert_eq!(Low::decode(word), 0x2a);
//! assert_eq!(High::decode(word), 3);
//! ```

/// A `WIDTH`-bit unsigned field starting at bit `START`.
pub struct BitField<const START: u32, const WIDTH: u32>;

impl<const START: u32, const WIDTH: u32> BitField<START, WIDTH> {
    pub const START: u32 = START;
    pub const WIDTH: u32 = WIDTH;
    /// Largest value the field can hold.
    pub const MAX: u64 = if WIDTH >= 64 {
        u64::MAX
    } else {
        (1u64 << WIDTH) - 1
    };
    pub const MASK: u64 = Self::MAX << START;

    #[inline]
    pub const fn is_valid(value: u64) -> bool {
        value <= Self::MAX
    }

    /// Places `value` in the field. Bits that do not fit are dropped.
    #[inline]
    pub const fn encode(value: u64) -> u64 {
        (value << START) & Self::MASK
    }

    #[inline]
    pub const fn decode(word: u64) -> u64 {
        (word & Self::MASK) >> START
    }

    /// Replaces the field inside `word`, leaving the other bits intact.
    #[inline]
    pub const fn update(word: u64, value: u64) -> u64 {
        (word & !Self::MASK) | Self::encode(value)
    }
}
