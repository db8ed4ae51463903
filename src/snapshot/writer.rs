//! Lays the local spaces out as image bytes.

use std::convert::TryFrom;

use super::category::SpaceCategory;
use super::head::RegionHeadRecord;
use super::local_space::{LocalSpace, LocalSpaces};
use crate::error::{Result, SnapshotError};
use crate::heap::constants::REGION_SIZE;

/// Serialized byte length of every category, head records included.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct CategoryLengths([u32; SpaceCategory::COUNT]);

impl CategoryLengths {
    pub fn new(lengths: [u32; SpaceCategory::COUNT]) -> Self {
        Self(lengths)
    }

    pub fn get(&self, category: SpaceCategory) -> usize {
        self.0[category.index()] as usize
    }

    pub fn set(&mut self, category: SpaceCategory, length: u32) {
        self.0[category.index()] = length;
    }

    pub fn total(&self) -> usize {
        self.0.iter().map(|&len| len as usize).sum()
    }

    pub fn as_array(&self) -> [u32; SpaceCategory::COUNT] {
        self.0
    }
}

/// Appends every category to `out` in [`SpaceCategory::ALL`] order.
///
/// Regular regions are written at full capacity with their unused tail zeroed, except the
/// last region of each category, which stops at its high-water mark. Huge regions are
/// written at the size recorded when their object was allocated.
pub fn write_spaces(spaces: &LocalSpaces, out: &mut Vec<u8>) -> Result<CategoryLengths> {
    let mut lengths = CategoryLengths::default();
    for &category in SpaceCategory::ALL.iter() {
        let space = spaces.space(category);
        let start = out.len();
        if space.is_empty() {
            log::debug!("[snapshot] {:?} local space is empty", category);
        } else if category.is_huge() {
            write_huge_space(space, out);
        } else {
            write_regular_space(space, out);
        }
        let length = out.len() - start;
        debug_assert_eq!(length, space.serialized_len());
        let length = u32::try_from(length).map_err(|_| SnapshotError::SpaceExhausted {
            category,
            requested: length,
        })?;
        lengths.set(category, length);
    }
    Ok(lengths)
}

fn write_regular_space(space: &LocalSpace, out: &mut Vec<u8>) {
    let regions = space.regions();
    for (i, region) in regions.iter().enumerate() {
        let last = i + 1 == regions.len();
        let live = if last { region.top() } else { REGION_SIZE };
        RegionHeadRecord::new(region.index(), live as u32).write_to(out);
        out.extend_from_slice(region.bytes());
        out.resize(out.len() + (live - region.top()), 0);
    }
}

fn write_huge_space(space: &LocalSpace, out: &mut Vec<u8>) {
    for region in space.regions() {
        let size = region.huge_size().unwrap_or(region.top() as u32);
        RegionHeadRecord::new(region.index(), size).write_to(out);
        let bytes = region.bytes();
        let size = size as usize;
        out.extend_from_slice(&bytes[..size.min(bytes.len())]);
        out.resize(out.len() + size.saturating_sub(bytes.len()), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_accounting() {
        let mut spaces = LocalSpaces::new(usize::MAX, false);
        for _ in 0..3 {
            let at = spaces.allocate(SpaceCategory::General, REGION_SIZE / 2 + 8).unwrap();
            spaces.write_word(at, 0x1111).unwrap();
        }
        spaces.allocate(SpaceCategory::Executable, 64).unwrap();
        spaces.allocate(SpaceCategory::Huge, 50_000).unwrap();

        let mut out = Vec::new();
        let lengths = write_spaces(&spaces, &mut out).unwrap();
        assert_eq!(lengths.total(), out.len());
        assert_eq!(lengths.get(SpaceCategory::NonMovable), 0);
        assert_eq!(lengths.get(SpaceCategory::Executable), RegionHeadRecord::SIZE + 64);
        assert_eq!(lengths.get(SpaceCategory::Huge), RegionHeadRecord::SIZE + 50_000);

        let general = lengths.get(SpaceCategory::General);
        let mut at = 0;
        let mut recorded = 0;
        let mut regions = 0;
        while at < general {
            let head = RegionHeadRecord::read_from(&out, at).unwrap();
            recorded += RegionHeadRecord::SIZE + head.live_bytes as usize;
            at += RegionHeadRecord::SIZE + REGION_SIZE;
            regions += 1;
        }
        assert_eq!(regions, 3);
        assert_eq!(recorded, general);
    }

    #[test]
    fn unused_tails_are_zero() {
        let mut spaces = LocalSpaces::new(usize::MAX, false);
        let first = spaces.allocate(SpaceCategory::General, REGION_SIZE - 64).unwrap();
        spaces.write_word(first, u64::MAX).unwrap();
        spaces.allocate(SpaceCategory::General, 128).unwrap();
        let mut out = Vec::new();
        write_spaces(&spaces, &mut out).unwrap();
        let tail_start = RegionHeadRecord::SIZE + REGION_SIZE - 64;
        let tail_end = RegionHeadRecord::SIZE + REGION_SIZE;
        assert!(out[tail_start..tail_end].iter().all(|&b| b == 0));
        assert_eq!(&out[8..16], &[0xff; 8]);
    }
}
