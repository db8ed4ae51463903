//! Position-independent references stored in an image.

use std::fmt;

use wtf_rs::bitfield::BitField;

use crate::error::{Result, SnapshotError};
use crate::runtime::value::Value;

pub type OffsetBits = BitField<0, 18>;
pub type RegionIndexBits = BitField<18, 14>;
pub type IndexBits = BitField<0, 32>;
pub type ObjectTypeBits = BitField<32, 8>;
pub type KindBits = BitField<40, 4>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum RefKind {
    /// Null native pointer.
    None = 0,
    Special = 1,
    Region = 2,
    String = 3,
    Native = 4,
    Builtin = 5,
    Weak = 6,
    MethodSpaceBegin = 7,
}

impl RefKind {
    fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => RefKind::None,
            1 => RefKind::Special,
            2 => RefKind::Region,
            3 => RefKind::String,
            4 => RefKind::Native,
            5 => RefKind::Builtin,
            6 => RefKind::Weak,
            7 => RefKind::MethodSpaceBegin,
            _ => return None,
        })
    }
}

/// Location of a copied object: snapshot region index plus byte offset inside the region.
/// This is also the handle the local spaces hand out.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegionRef {
    pub region_index: u32,
    pub offset: u32,
}

impl RegionRef {
    pub const fn new(region_index: u32, offset: u32) -> Self {
        Self {
            region_index,
            offset,
        }
    }

    pub const fn add(self, bytes: usize) -> Self {
        Self::new(self.region_index, self.offset + bytes as u32)
    }

    pub fn is_encodable(self) -> bool {
        RegionIndexBits::is_valid(self.region_index as u64) && OffsetBits::is_valid(self.offset as u64)
    }
}

/// What an [`EncodedRef`] stands for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Decoded {
    /// A number, stored verbatim.
    Immediate(u64),
    Special(Value),
    Region(RegionRef),
    Weak(RegionRef),
    String(u32),
    Native(u32),
    NullNative,
    Builtin(u32),
    MethodSpaceBegin(u32),
}

/// A 64-bit image word: either a verbatim number or a tagged, position-independent
/// reference. Numbers always have one of bits 49..63 set; references never do.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodedRef(u64);

impl EncodedRef {
    const fn tagged(kind: RefKind, payload: u64) -> Self {
        Self(KindBits::encode(kind as u64) | payload)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn immediate(value: Value) -> Self {
        debug_assert!(value.is_number());
        Self(value.raw())
    }

    pub fn special(value: Value) -> Self {
        debug_assert!(value.is_special());
        Self::tagged(RefKind::Special, IndexBits::encode(value.raw()))
    }

    pub fn region(at: RegionRef) -> Self {
        Self::tagged(
            RefKind::Region,
            RegionIndexBits::encode(at.region_index as u64) | OffsetBits::encode(at.offset as u64),
        )
    }

    pub fn weak(at: RegionRef) -> Self {
        Self::tagged(
            RefKind::Weak,
            RegionIndexBits::encode(at.region_index as u64) | OffsetBits::encode(at.offset as u64),
        )
    }

    pub const fn string(index: u32) -> Self {
        Self::tagged(RefKind::String, IndexBits::encode(index as u64))
    }

    pub const fn native(index: u32) -> Self {
        Self::tagged(RefKind::Native, IndexBits::encode(index as u64))
    }

    pub const fn null_native() -> Self {
        Self(0)
    }

    pub const fn builtin(index: u32) -> Self {
        Self::tagged(RefKind::Builtin, IndexBits::encode(index as u64))
    }

    pub const fn method_space_begin(count: u32) -> Self {
        Self::tagged(RefKind::MethodSpaceBegin, IndexBits::encode(count as u64))
    }

    pub const fn is_immediate(self) -> bool {
        self.0 & Value::NUMBER_TAG != 0
    }

    /// The same reference tagged with the kind of the object it heads.
    pub const fn with_object_type(self, object_type: u8) -> Self {
        Self(ObjectTypeBits::update(self.0, object_type as u64))
    }

    pub const fn object_type(self) -> u8 {
        ObjectTypeBits::decode(self.0) as u8
    }

    pub fn kind(self) -> Option<RefKind> {
        if self.is_immediate() {
            return None;
        }
        RefKind::from_raw(KindBits::decode(self.0))
    }

    fn region_ref(self) -> RegionRef {
        RegionRef::new(
            RegionIndexBits::decode(self.0) as u32,
            OffsetBits::decode(self.0) as u32,
        )
    }

    pub fn decode(self) -> Result<Decoded> {
        if self.is_immediate() {
            return Ok(Decoded::Immediate(self.0));
        }
        let index = IndexBits::decode(self.0) as u32;
        match RefKind::from_raw(KindBits::decode(self.0)) {
            Some(RefKind::None) => Ok(Decoded::NullNative),
            Some(RefKind::Special) => {
                let value = Value::from_raw(index as u64);
                if value.is_special() {
                    Ok(Decoded::Special(value))
                } else {
                    Err(SnapshotError::corrupt(format!(
                        "special reference {:#x} holds a non-special payload",
                        self.0
                    )))
                }
            }
            Some(RefKind::Region) => Ok(Decoded::Region(self.region_ref())),
            Some(RefKind::Weak) => Ok(Decoded::Weak(self.region_ref())),
            Some(RefKind::String) => Ok(Decoded::String(index)),
            Some(RefKind::Native) => Ok(Decoded::Native(index)),
            Some(RefKind::Builtin) => Ok(Decoded::Builtin(index)),
            Some(RefKind::MethodSpaceBegin) => Ok(Decoded::MethodSpaceBegin(index)),
            None => Err(SnapshotError::corrupt(format!(
                "unknown reference kind in {:#x}",
                self.0
            ))),
        }
    }
}

impl fmt::Debug for EncodedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(decoded) => write!(f, "EncodedRef({:?})", decoded),
            Err(_) => write!(f, "EncodedRef(invalid {:#x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_pass_through() {
        for value in [Value::new_int(-1), Value::new_double(0.0), Value::new_double(1e300)] {
            let encoded = EncodedRef::immediate(value);
            assert!(encoded.is_immediate());
            assert_eq!(encoded.raw(), value.raw());
            assert_eq!(encoded.decode().unwrap(), Decoded::Immediate(value.raw()));
        }
    }

    #[test]
    fn region_references() {
        let at = RegionRef::new(0x3fff, 0x3fff8);
        assert!(at.is_encodable());
        let encoded = EncodedRef::region(at).with_object_type(4);
        assert!(!encoded.is_immediate());
        assert_eq!(encoded.kind(), Some(RefKind::Region));
        assert_eq!(encoded.object_type(), 4);
        assert_eq!(encoded.decode().unwrap(), Decoded::Region(at));
        assert_eq!(EncodedRef::weak(at).decode().unwrap(), Decoded::Weak(at));
        assert!(!RegionRef::new(0x4000, 0).is_encodable());
    }

    #[test]
    fn specials_keep_their_sentinel() {
        for value in [Value::hole(), Value::undefined(), Value::null(), Value::true_()] {
            let encoded = EncodedRef::special(value);
            assert_eq!(encoded.kind(), Some(RefKind::Special));
            assert_eq!(encoded.decode().unwrap(), Decoded::Special(value));
        }
    }

    #[test]
    fn indices() {
        assert_eq!(EncodedRef::string(9).decode().unwrap(), Decoded::String(9));
        assert_eq!(EncodedRef::native(3).decode().unwrap(), Decoded::Native(3));
        assert_eq!(EncodedRef::builtin(12).decode().unwrap(), Decoded::Builtin(12));
        assert_eq!(
            EncodedRef::method_space_begin(5).decode().unwrap(),
            Decoded::MethodSpaceBegin(5)
        );
        assert_eq!(EncodedRef::null_native().decode().unwrap(), Decoded::NullNative);
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        let raw = KindBits::encode(0xf);
        assert!(EncodedRef::from_raw(raw).decode().is_err());
    }
}
