use std::collections::BTreeSet;
use std::convert::TryInto;
use std::sync::atomic::{AtomicU64, Ordering};

use wtf_rs::tagged_pointer::TaggedFlags;

use super::address::RegionId;
use super::constants::WORD_SIZE;
use super::space::SpaceKind;

const NEED_RELOCATE: u32 = 0;

/// A contiguous block of heap memory owned by one space.
///
/// Objects are bump allocated from offset 0 up to the high-water mark (`top`). Region
/// metadata lives outside the object memory, so offsets start at 0.
pub struct Region {
    id: RegionId,
    space: SpaceKind,
    memory: Vec<u8>,
    top: usize,
    flags: TaggedFlags,
    /// Offsets of slots in this region that point into the young generation.
    old_to_new: BTreeSet<u32>,
    /// Offsets of slots in this region that point into the shared heap.
    local_to_shared: BTreeSet<u32>,
    /// One mark bit per word.
    marks: Vec<AtomicU64>,
}

impl Region {
    pub fn new(id: RegionId, space: SpaceKind, capacity: usize) -> Self {
        let words = capacity / WORD_SIZE;
        Self {
            id,
            space,
            memory: vec![0; capacity],
            top: 0,
            flags: TaggedFlags::empty(),
            old_to_new: BTreeSet::new(),
            local_to_shared: BTreeSet::new(),
            marks: (0..(words + 63) / 64).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn space(&self) -> SpaceKind {
        self.space
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// High-water mark: bytes in use from the start of the region.
    pub fn top(&self) -> usize {
        self.top
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.top
    }

    pub fn contains_offset(&self, offset: u32) -> bool {
        (offset as usize) < self.top
    }

    /// Reserves `size` bytes at the high-water mark.
    pub fn bump(&mut self, size: usize) -> Option<u32> {
        if size > self.remaining() {
            return None;
        }
        let offset = self.top;
        self.top += size;
        Some(offset as u32)
    }

    /// Replaces the region contents with `bytes` and moves the high-water mark past them.
    pub fn load(&mut self, bytes: &[u8]) {
        self.memory[..bytes.len()].copy_from_slice(bytes);
        self.top = bytes.len();
    }

    pub fn bytes(&self, offset: u32, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.memory[start..start + len]
    }

    pub fn bytes_mut(&mut self, offset: u32, len: usize) -> &mut [u8] {
        let start = offset as usize;
        &mut self.memory[start..start + len]
    }

    pub fn read_word(&self, offset: u32) -> u64 {
        let start = offset as usize;
        let bytes: [u8; 8] = self.memory[start..start + WORD_SIZE]
            .try_into()
            .unwrap_or([0; 8]);
        u64::from_le_bytes(bytes)
    }

    pub fn write_word(&mut self, offset: u32, value: u64) {
        let start = offset as usize;
        self.memory[start..start + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
    }

    pub fn need_relocate(&self) -> bool {
        self.flags.bit_is_set(NEED_RELOCATE)
    }

    pub fn set_need_relocate(&mut self, x: bool) {
        self.flags.set_bit_x(x, NEED_RELOCATE);
    }

    pub fn insert_old_to_new(&mut self, offset: u32) {
        self.old_to_new.insert(offset);
    }

    pub fn old_to_new(&self) -> impl Iterator<Item = u32> + '_ {
        self.old_to_new.iter().copied()
    }

    pub fn insert_local_to_shared(&mut self, offset: u32) {
        self.local_to_shared.insert(offset);
    }

    pub fn local_to_shared(&self) -> impl Iterator<Item = u32> + '_ {
        self.local_to_shared.iter().copied()
    }

    /// Sets the mark bit of the object at `offset`. Returns true if this call marked it.
    ///
    /// Safe to race with a concurrent marker holding a shared reference to the region.
    pub fn atomic_mark(&self, offset: u32) -> bool {
        let word = offset as usize / WORD_SIZE;
        let bit = 1u64 << (word % 64);
        let previous = self.marks[word / 64].fetch_or(bit, Ordering::AcqRel);
        previous & bit == 0
    }

    pub fn is_marked(&self, offset: u32) -> bool {
        let word = offset as usize / WORD_SIZE;
        self.marks[word / 64].load(Ordering::Acquire) & (1u64 << (word % 64)) != 0
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("space", &self.space)
            .field("capacity", &self.capacity())
            .field("top", &self.top)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_until_full() {
        let mut region = Region::new(RegionId::new(1), SpaceKind::Old, 64);
        assert_eq!(region.bump(32), Some(0));
        assert_eq!(region.bump(32), Some(32));
        assert_eq!(region.bump(8), None);
        assert_eq!(region.top(), 64);
    }

    #[test]
    fn words_are_little_endian() {
        let mut region = Region::new(RegionId::new(1), SpaceKind::Old, 64);
        region.write_word(8, 0x0102_0304_0506_0708);
        assert_eq!(region.bytes(8, 1), &[0x08]);
        assert_eq!(region.read_word(8), 0x0102_0304_0506_0708);
    }

    #[test]
    fn marking_is_idempotent() {
        let region = Region::new(RegionId::new(1), SpaceKind::SharedOld, 1024);
        assert!(!region.is_marked(520));
        assert!(region.atomic_mark(520));
        assert!(!region.atomic_mark(520));
        assert!(region.is_marked(520));
        assert!(!region.is_marked(512));
    }

    #[test]
    fn relocation_flag() {
        let mut region = Region::new(RegionId::new(1), SpaceKind::Old, 64);
        assert!(!region.need_relocate());
        region.set_need_relocate(true);
        assert!(region.need_relocate());
        region.set_need_relocate(false);
        assert!(!region.need_relocate());
    }
}
