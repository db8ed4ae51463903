//! The live managed heap the snapshot subsystem reads from and rebuilds into.

pub mod address;
pub mod constants;
pub mod region;
pub mod space;
pub mod trace;

use std::sync::atomic::{AtomicBool, Ordering};

use address::{Address, RegionId};
use constants::*;
use region::Region;
use space::{Space, SpaceKind};
use wtf_rs::round_up;

use crate::error::HeapError;

#[derive(Clone, Copy, Debug)]
pub struct HeapConfig {
    pub max_heap_size: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            max_heap_size: DEFAULT_MAX_HEAP_SIZE,
        }
    }
}

pub struct Heap {
    regions: Vec<Region>,
    spaces: Vec<Space>,
    committed: usize,
    config: HeapConfig,
    concurrent_marking: AtomicBool,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Self {
        Self {
            regions: Vec::new(),
            spaces: SpaceKind::ALL.iter().map(|&kind| Space::new(kind)).collect(),
            committed: 0,
            config,
            concurrent_marking: AtomicBool::new(false),
        }
    }

    /// Bump allocates `size` bytes (rounded up to the object alignment) in `kind`.
    ///
    /// Objects larger than [`MAX_REGULAR_OBJECT_SIZE`] are redirected to the matching huge
    /// space and get a region of their own.
    pub fn allocate(&mut self, kind: SpaceKind, size: usize) -> Result<Address, HeapError> {
        if size == 0 {
            return Err(HeapError::InvalidSize(size));
        }
        let size = round_up(size, OBJECT_ALIGNMENT);
        let kind = if size > MAX_REGULAR_OBJECT_SIZE {
            kind.huge_space()
        } else {
            kind
        };
        if kind.is_huge() {
            let id = self.new_region(kind, size, false)?;
            self.region_mut(id).bump(size);
            return Ok(Address::new(id, 0));
        }
        if size > REGION_SIZE {
            return Err(HeapError::InvalidSize(size));
        }
        if let Some(current) = self.spaces[kind.index()].current {
            if let Some(offset) = self.region_mut(current).bump(size) {
                return Ok(Address::new(current, offset));
            }
        }
        let id = self.new_region(kind, REGION_SIZE, true)?;
        match self.region_mut(id).bump(size) {
            Some(offset) => Ok(Address::new(id, offset)),
            None => Err(HeapError::InvalidSize(size)),
        }
    }

    /// Adds an empty region of `capacity` bytes to `kind`. Allocation does not continue in it.
    pub fn allocate_region(
        &mut self,
        kind: SpaceKind,
        capacity: usize,
    ) -> Result<RegionId, HeapError> {
        self.new_region(kind, round_up(capacity.max(WORD_SIZE), OBJECT_ALIGNMENT), false)
    }

    fn new_region(
        &mut self,
        kind: SpaceKind,
        capacity: usize,
        make_current: bool,
    ) -> Result<RegionId, HeapError> {
        if self.regions.len() >= MAX_REGIONS || self.committed + capacity > self.config.max_heap_size
        {
            return Err(HeapError::OutOfMemory {
                space: kind,
                requested: capacity,
            });
        }
        let id = RegionId::new(self.regions.len() as u32 + 1);
        self.regions.push(Region::new(id, kind, capacity));
        self.committed += capacity;
        let space = &mut self.spaces[kind.index()];
        space.regions.push(id);
        if make_current {
            space.current = Some(id);
        }
        Ok(id)
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.index()]
    }

    pub fn region_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id.index()]
    }

    /// Region lookup for ids that did not come from this heap.
    pub fn try_region(&self, id: RegionId) -> Option<&Region> {
        if id.raw() == 0 {
            return None;
        }
        self.regions.get(id.index())
    }

    pub fn region_for(&self, addr: Address) -> &Region {
        self.region(addr.region())
    }

    pub fn space_of(&self, addr: Address) -> SpaceKind {
        self.region_for(addr).space()
    }

    /// True if `addr` lies below the high-water mark of an existing region.
    pub fn contains(&self, addr: Address) -> bool {
        self.try_region(addr.region())
            .map_or(false, |region| region.contains_offset(addr.offset()))
    }

    pub fn regions_of(&self, kind: SpaceKind) -> &[RegionId] {
        self.spaces[kind.index()].regions()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn committed(&self) -> usize {
        self.committed
    }

    pub fn read_word(&self, addr: Address) -> u64 {
        self.region_for(addr).read_word(addr.offset())
    }

    pub fn write_word(&mut self, addr: Address, value: u64) {
        self.region_mut(addr.region())
            .write_word(addr.offset(), value)
    }

    pub fn read_bytes(&self, addr: Address, len: usize) -> &[u8] {
        self.region_for(addr).bytes(addr.offset(), len)
    }

    pub fn write_bytes(&mut self, addr: Address, bytes: &[u8]) {
        self.region_mut(addr.region())
            .bytes_mut(addr.offset(), bytes.len())
            .copy_from_slice(bytes);
    }

    pub fn set_concurrent_marking(&self, x: bool) {
        self.concurrent_marking.store(x, Ordering::Release);
    }

    /// True while a background marker may be tracing the shared heap.
    pub fn is_concurrent_marking(&self) -> bool {
        self.concurrent_marking.load(Ordering::Acquire)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}
