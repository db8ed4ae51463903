//! Append-only arenas that receive object copies while an image is built.

use wtf_rs::round_up;

use super::category::SpaceCategory;
use super::encode::{RegionIndexBits, RegionRef};
use super::head::RegionHeadRecord;
use crate::error::{Result, SnapshotError};
use crate::heap::constants::{OBJECT_ALIGNMENT, REGION_SIZE, WORD_SIZE};

/// One region of a local space. Only the bytes below `top` are materialized; the rest of
/// the capacity is implicitly zero.
pub struct LocalRegion {
    index: u32,
    bytes: Vec<u8>,
    capacity: usize,
    huge_size: Option<u32>,
}

impl LocalRegion {
    fn new(index: u32, capacity: usize, huge_size: Option<u32>) -> Self {
        Self {
            index,
            bytes: Vec::new(),
            capacity,
            huge_size,
        }
    }

    /// Index stamped when the region was started, echoed into its head record.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn top(&self) -> usize {
        self.bytes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the single object of a huge region.
    pub fn huge_size(&self) -> Option<u32> {
        self.huge_size
    }
}

pub struct LocalSpace {
    category: SpaceCategory,
    regions: Vec<LocalRegion>,
    committed: usize,
}

impl LocalSpace {
    fn new(category: SpaceCategory) -> Self {
        Self {
            category,
            regions: Vec::new(),
            committed: 0,
        }
    }

    pub fn category(&self) -> SpaceCategory {
        self.category
    }

    pub fn regions(&self) -> &[LocalRegion] {
        &self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Bytes this space occupies in an image, head records included.
    pub fn serialized_len(&self) -> usize {
        if self.category.is_huge() {
            return self
                .regions
                .iter()
                .map(|region| RegionHeadRecord::SIZE + region.huge_size.unwrap_or(0) as usize)
                .sum();
        }
        match self.regions.split_last() {
            None => 0,
            Some((last, earlier)) => {
                earlier.len() * (RegionHeadRecord::SIZE + REGION_SIZE)
                    + RegionHeadRecord::SIZE
                    + last.top()
            }
        }
    }
}

/// The full set of local spaces of one serialization pass.
///
/// Region indices come from one counter shared by all categories, so an index alone
/// identifies a region of the image.
pub struct LocalSpaces {
    spaces: Vec<LocalSpace>,
    next_region_index: u32,
    locations: Vec<(SpaceCategory, usize)>,
    limit: usize,
    log: bool,
}

impl LocalSpaces {
    /// `limit` caps the bytes each category may commit.
    pub fn new(limit: usize, log: bool) -> Self {
        Self {
            spaces: SpaceCategory::ALL.iter().map(|&c| LocalSpace::new(c)).collect(),
            next_region_index: 0,
            locations: Vec::new(),
            limit,
            log,
        }
    }

    pub fn space(&self, category: SpaceCategory) -> &LocalSpace {
        &self.spaces[category.index()]
    }

    pub fn region_count(&self) -> usize {
        self.locations.len()
    }

    /// Reserves `size` bytes in `category`. Regular objects never straddle two regions;
    /// huge objects always get a region of their own.
    pub fn allocate(&mut self, category: SpaceCategory, size: usize) -> Result<RegionRef> {
        let size = round_up(size, OBJECT_ALIGNMENT);
        if category.is_huge() {
            let at = self.start_region(category, size, Some(size as u32))?;
            let region = self.region_at_mut(at)?;
            region.bytes.resize(size, 0);
            return Ok(RegionRef::new(region.index, 0));
        }
        if size > REGION_SIZE {
            return Err(SnapshotError::ObjectTooLarge { category, size });
        }
        let fits = self.spaces[category.index()]
            .regions
            .last()
            .map_or(false, |region| region.top() + size <= region.capacity);
        let at = if fits {
            self.spaces[category.index()].regions.len() - 1
        } else {
            self.start_region(category, REGION_SIZE, None)?.1
        };
        let region = &mut self.spaces[category.index()].regions[at];
        let offset = region.top();
        region.bytes.resize(offset + size, 0);
        Ok(RegionRef::new(region.index, offset as u32))
    }

    fn start_region(
        &mut self,
        category: SpaceCategory,
        capacity: usize,
        huge_size: Option<u32>,
    ) -> Result<(SpaceCategory, usize)> {
        let index = self.next_region_index;
        let space = &mut self.spaces[category.index()];
        if space.committed + capacity > self.limit || !RegionIndexBits::is_valid(index as u64) {
            return Err(SnapshotError::SpaceExhausted {
                category,
                requested: capacity,
            });
        }
        space.committed += capacity;
        space.regions.push(LocalRegion::new(index, capacity, huge_size));
        let position = space.regions.len() - 1;
        self.locations.push((category, position));
        self.next_region_index += 1;
        crate::log_if!(
            self.log,
            "[snapshot] {:?} local space starts region {} ({} bytes)",
            category,
            index,
            capacity
        );
        Ok((category, position))
    }

    fn region_at_mut(&mut self, (category, position): (SpaceCategory, usize)) -> Result<&mut LocalRegion> {
        self.spaces[category.index()]
            .regions
            .get_mut(position)
            .ok_or_else(|| SnapshotError::corrupt("local region vanished"))
    }

    pub fn region(&self, index: u32) -> Option<&LocalRegion> {
        let &(category, position) = self.locations.get(index as usize)?;
        self.spaces[category.index()].regions.get(position)
    }

    fn region_mut(&mut self, index: u32) -> Option<&mut LocalRegion> {
        let &(category, position) = self.locations.get(index as usize)?;
        self.spaces[category.index()].regions.get_mut(position)
    }

    /// The `len` bytes at `at`, which must lie in the allocated part of its region.
    pub fn bytes_mut(&mut self, at: RegionRef, len: usize) -> Result<&mut [u8]> {
        let region = self
            .region_mut(at.region_index)
            .ok_or(SnapshotError::UnknownRegion(at.region_index))?;
        let start = at.offset as usize;
        let available = region.top();
        region
            .bytes
            .get_mut(start..start + len)
            .ok_or(SnapshotError::BufferTooSmall {
                needed: start + len,
                available,
            })
    }

    pub fn write(&mut self, at: RegionRef, bytes: &[u8]) -> Result<()> {
        self.bytes_mut(at, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn write_word(&mut self, at: RegionRef, value: u64) -> Result<()> {
        self.write(at, &value.to_le_bytes())
    }

    pub fn read_word(&self, at: RegionRef) -> Result<u64> {
        let region = self
            .region(at.region_index)
            .ok_or(SnapshotError::UnknownRegion(at.region_index))?;
        let start = at.offset as usize;
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(region.bytes.get(start..start + WORD_SIZE).ok_or(
            SnapshotError::BufferTooSmall {
                needed: start + WORD_SIZE,
                available: region.top(),
            },
        )?);
        Ok(u64::from_le_bytes(word))
    }
}
