use std::fmt;

/// Identifier of a live heap region. Ids start at 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct RegionId(u32);

impl RegionId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Position of the region in the heap's region list.
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }
}

/// Address of a byte inside the managed heap: `region_id << 32 | offset`.
///
/// Region ids are non-zero, so every valid address is at least 2^32 and fits in the pointer
/// payload of a [`Value`](crate::runtime::value::Value).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u64);

impl Address {
    pub const fn null() -> Self {
        Self(0)
    }

    pub const fn new(region: RegionId, offset: u32) -> Self {
        Self(((region.0 as u64) << 32) | offset as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn region(self) -> RegionId {
        RegionId((self.0 >> 32) as u32)
    }

    pub const fn offset(self) -> u32 {
        self.0 as u32
    }

    pub const fn add(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.region().raw(), self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_and_offset() {
        let addr = Address::new(RegionId::new(3), 0x40);
        assert_eq!(addr.region(), RegionId::new(3));
        assert_eq!(addr.offset(), 0x40);
        assert_eq!(addr.add(8).offset(), 0x48);
        assert_eq!(addr.raw() >> 48, 0);
        assert!(!addr.is_null());
    }
}
