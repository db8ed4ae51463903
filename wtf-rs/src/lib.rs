#![no_std]

pub mod bitfield;
pub mod tagged_pointer;

/// Rounds `value` up to the next multiple of `align`. `align` must be a power of two.
#[inline]
pub const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Returns true if `value` is a multiple of `align`. `align` must be a power of two.
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}
