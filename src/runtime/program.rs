//! Method literals of a loaded program.

use std::convert::TryInto;

/// Fixed-size description of one bytecode method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MethodLiteral {
    pub id: u32,
    pub num_args: u32,
    pub num_vregs: u32,
    pub code_size: u32,
    pub code_offset: u64,
    pub flags: u64,
}

impl MethodLiteral {
    pub const SIZE: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&self.num_args.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_vregs.to_le_bytes());
        out[12..16].copy_from_slice(&self.code_size.to_le_bytes());
        out[16..24].copy_from_slice(&self.code_offset.to_le_bytes());
        out[24..32].copy_from_slice(&self.flags.to_le_bytes());
        out
    }

    /// Decodes a record. Returns `None` if `bytes` is shorter than [`Self::SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let u32_at = |at: usize| bytes[at..at + 4].try_into().ok().map(u32::from_le_bytes);
        let u64_at = |at: usize| bytes[at..at + 8].try_into().ok().map(u64::from_le_bytes);
        Some(Self {
            id: u32_at(0)?,
            num_args: u32_at(4)?,
            num_vregs: u32_at(8)?,
            code_size: u32_at(12)?,
            code_offset: u64_at(16)?,
            flags: u64_at(24)?,
        })
    }
}

/// The method-literal array of a program. Native pointers to methods are the addresses of
/// its slots: `base + index * MethodLiteral::SIZE`.
#[derive(Clone, Debug)]
pub struct Program {
    base: u64,
    methods: Vec<MethodLiteral>,
}

impl Program {
    pub fn new(base: u64, methods: Vec<MethodLiteral>) -> Self {
        Self { base, methods }
    }

    /// A program with `count` default-initialized slots, to be filled from an image.
    pub fn with_capacity(base: u64, count: usize) -> Self {
        Self::new(base, vec![MethodLiteral::default(); count])
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn method_address(&self, index: usize) -> u64 {
        self.base + (index * MethodLiteral::SIZE) as u64
    }

    pub fn method_index(&self, address: u64) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        if offset % MethodLiteral::SIZE != 0 {
            return None;
        }
        let index = offset / MethodLiteral::SIZE;
        if index < self.methods.len() {
            Some(index)
        } else {
            None
        }
    }

    pub fn method_at(&self, address: u64) -> Option<&MethodLiteral> {
        self.method_index(address).map(|index| &self.methods[index])
    }

    pub fn method(&self, index: usize) -> Option<&MethodLiteral> {
        self.methods.get(index)
    }

    pub fn set_method(&mut self, index: usize, method: MethodLiteral) {
        self.methods[index] = method;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_bytes() {
        let method = MethodLiteral {
            id: 7,
            num_args: 2,
            num_vregs: 5,
            code_size: 40,
            code_offset: 0x1234,
            flags: 3,
        };
        assert_eq!(MethodLiteral::from_bytes(&method.to_bytes()), Some(method));
        assert_eq!(MethodLiteral::from_bytes(&[0; 8]), None);
    }

    #[test]
    fn addresses() {
        let program = Program::with_capacity(0x7f00_0000_0000, 4);
        let addr = program.method_address(3);
        assert_eq!(program.method_index(addr), Some(3));
        assert_eq!(program.method_index(addr + 1), None);
        assert_eq!(program.method_index(program.method_address(4)), None);
        assert_eq!(program.method_index(0x10), None);
    }
}
