use std::fmt;

use wtf_rs::tagged_pointer::{bit_is_set, with_bit, without_bit};

use crate::heap::address::Address;

/// A tagged 64-bit VM value.
///
/// The encoding makes use of unused NaN space in the IEEE754 representation. The top 15
/// bits denote the type of the encoded value:
///
/// ```text
///     Pointer {  0000:PPPP:PPPP:PPPP
///              / 0002:****:****:****
///     Double  {         ...
///              \ FFFC:****:****:****
///     Integer {  FFFE:0000:IIII:IIII
/// ```
///
/// Doubles are encoded by a 64-bit integer addition of 2^49, so no encoded double begins
/// with 0x0000 or 0xFFFE. 32-bit signed integers carry the tag 0xFFFE.
///
/// The tag 0x0000 denotes a heap pointer or one of the special immediates, all of which are
/// invalid pointers:
///
/// ```text
///     Empty:     0x00   (array holes, uninitialized slots)
///     Null:      0x02
///     Deleted:   0x04
///     False:     0x06
///     True:      0x07
///     Undefined: 0x0a
/// ```
///
/// Heap addresses are 8-aligned and never below 2^32. A weak reference is a heap pointer
/// with bit 0 set.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const DOUBLE_ENCODE_OFFSET_BIT: u32 = 49;
    pub const DOUBLE_ENCODE_OFFSET: u64 = 1 << Self::DOUBLE_ENCODE_OFFSET_BIT;
    /// If all bits in the mask are set, this indicates an integer number,
    /// if any but not all are set this value is a double precision number.
    pub const NUMBER_TAG: u64 = 0xfffe000000000000;
    /// All non-numeric (bool, null, undefined) immediates have bit 1 set.
    pub const OTHER_TAG: u64 = 0x2;
    pub const BOOL_TAG: u64 = 0x4;
    pub const UNDEFINED_TAG: u64 = 0x8;
    pub const VALUE_FALSE: u64 = Self::OTHER_TAG | Self::BOOL_TAG;
    pub const VALUE_TRUE: u64 = Self::OTHER_TAG | Self::BOOL_TAG | 1;
    pub const VALUE_UNDEFINED: u64 = Self::OTHER_TAG | Self::UNDEFINED_TAG;
    pub const VALUE_NULL: u64 = Self::OTHER_TAG;
    pub const VALUE_EMPTY: u64 = 0x0;
    pub const VALUE_DELETED: u64 = 0x4;
    /// Every special immediate is at most this value.
    pub const SPECIAL_MAX: u64 = 0xf;
    pub const NOT_CELL_MASK: u64 = Self::NUMBER_TAG | Self::OTHER_TAG;
    pub const WEAK_BIT: u32 = 0;

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn empty() -> Self {
        Self(Self::VALUE_EMPTY)
    }

    pub const fn hole() -> Self {
        Self::empty()
    }

    pub const fn undefined() -> Self {
        Self(Self::VALUE_UNDEFINED)
    }

    pub const fn null() -> Self {
        Self(Self::VALUE_NULL)
    }

    pub const fn false_() -> Self {
        Self(Self::VALUE_FALSE)
    }

    pub const fn true_() -> Self {
        Self(Self::VALUE_TRUE)
    }

    pub const fn new_int(x: i32) -> Self {
        Self(Self::NUMBER_TAG | x as u32 as u64)
    }

    pub fn new_double(x: f64) -> Self {
        Self(x.to_bits().wrapping_add(Self::DOUBLE_ENCODE_OFFSET))
    }

    pub const fn encode_object(addr: Address) -> Self {
        Self(addr.raw())
    }

    pub const fn new_weak(addr: Address) -> Self {
        Self(with_bit(addr.raw(), Self::WEAK_BIT))
    }

    pub const fn is_empty(self) -> bool {
        self.0 == Self::VALUE_EMPTY
    }

    pub const fn is_hole(self) -> bool {
        self.is_empty()
    }

    pub const fn is_undefined(self) -> bool {
        self.0 == Self::VALUE_UNDEFINED
    }

    pub const fn is_null(self) -> bool {
        self.0 == Self::VALUE_NULL
    }

    pub const fn is_boolean(self) -> bool {
        (self.0 & !1) == Self::VALUE_FALSE
    }

    pub const fn is_true(self) -> bool {
        self.0 == Self::VALUE_TRUE
    }

    /// Hole, null, deleted, booleans and undefined.
    pub const fn is_special(self) -> bool {
        self.0 <= Self::SPECIAL_MAX
    }

    pub const fn is_number(self) -> bool {
        self.0 & Self::NUMBER_TAG != 0
    }

    pub const fn is_int32(self) -> bool {
        (self.0 & Self::NUMBER_TAG) == Self::NUMBER_TAG
    }

    pub const fn is_double(self) -> bool {
        !self.is_int32() && self.is_number()
    }

    pub const fn as_int32(self) -> i32 {
        self.0 as u32 as i32
    }

    pub fn as_double(self) -> f64 {
        f64::from_bits(self.0.wrapping_sub(Self::DOUBLE_ENCODE_OFFSET))
    }

    const fn is_pointer_like(self) -> bool {
        (self.0 & Self::NOT_CELL_MASK) == 0 && self.0 > Self::SPECIAL_MAX
    }

    /// A strong reference to a heap object.
    pub const fn is_cell(self) -> bool {
        self.is_pointer_like() && !bit_is_set(self.0, Self::WEAK_BIT)
    }

    pub const fn is_weak(self) -> bool {
        self.is_pointer_like() && bit_is_set(self.0, Self::WEAK_BIT)
    }

    /// Strong or weak heap reference.
    pub const fn is_heap_object(self) -> bool {
        self.is_pointer_like()
    }

    /// The referenced object of a strong or weak reference.
    pub const fn as_address(self) -> Address {
        Address::from_raw(without_bit(self.0, Self::WEAK_BIT))
    }

    pub const fn remove_weak(self) -> Self {
        Self(without_bit(self.0, Self::WEAK_BIT))
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl From<Address> for Value {
    fn from(addr: Address) -> Self {
        Self::encode_object(addr)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_int32() {
            write!(f, "Int({})", self.as_int32())
        } else if self.is_double() {
            write!(f, "Double({})", self.as_double())
        } else if self.is_undefined() {
            write!(f, "Undefined")
        } else if self.is_null() {
            write!(f, "Null")
        } else if self.is_boolean() {
            write!(f, "Bool({})", self.is_true())
        } else if self.is_empty() {
            write!(f, "Hole")
        } else if self.is_weak() {
            write!(f, "Weak({:?})", self.as_address())
        } else if self.is_cell() {
            write!(f, "Object({:?})", self.as_address())
        } else {
            write!(f, "Special({:#x})", self.0)
        }
    }
}
