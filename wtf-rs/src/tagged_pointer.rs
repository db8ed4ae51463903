/// Returns true if the word has the given bit set to 1.
#[inline]
pub const fn bit_is_set(word: u64, bit: u32) -> bool {
    let shifted = 1u64 << bit;

    (word & shifted) == shifted
}

/// Returns the word with the given bit set.
#[inline]
pub const fn with_bit(word: u64, bit: u32) -> u64 {
    word | 1u64 << bit
}

/// Returns the word with the given bit cleared.
#[inline]
pub const fn without_bit(word: u64, bit: u32) -> u64 {
    word & !(1u64 << bit)
}

/// A small set of flags stored in one byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaggedFlags(u8);

impl TaggedFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bit_is_set(self, bit: u32) -> bool {
        bit_is_set(self.0 as u64, bit)
    }

    pub fn set_bit(&mut self, bit: u32) {
        self.0 = with_bit(self.0 as u64, bit) as u8;
    }

    pub fn clear_bit(&mut self, bit: u32) {
        self.0 = without_bit(self.0 as u64, bit) as u8;
    }

    pub fn set_bit_x(&mut self, x: bool, bit: u32) {
        if x {
            self.set_bit(bit);
        } else {
            self.clear_bit(bit);
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }
}
