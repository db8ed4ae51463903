use std::convert::TryInto;

use crate::error::{Result, SnapshotError};

/// The 8 bytes preceding every region in an image.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegionHeadRecord {
    pub region_index: u32,
    pub live_bytes: u32,
}

impl RegionHeadRecord {
    pub const SIZE: usize = 8;

    pub fn new(region_index: u32, live_bytes: u32) -> Self {
        Self {
            region_index,
            live_bytes,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.region_index.to_le_bytes());
        out.extend_from_slice(&self.live_bytes.to_le_bytes());
    }

    pub fn read_from(bytes: &[u8], at: usize) -> Result<Self> {
        let record = bytes
            .get(at..at + Self::SIZE)
            .ok_or(SnapshotError::BufferTooSmall {
                needed: at + Self::SIZE,
                available: bytes.len(),
            })?;
        let (index, live) = record.split_at(4);
        Ok(Self {
            region_index: u32::from_le_bytes(index.try_into().unwrap_or_default()),
            live_bytes: u32::from_le_bytes(live.try_into().unwrap_or_default()),
        })
    }
}
