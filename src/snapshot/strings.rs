//! The string side-channel: string contents stored apart from the object regions and
//! referenced by index.
//!
//! Entry layout: `u32 length | u32 hash | bytes | zero padding to 8`, in index order.

use std::collections::HashMap;
use std::convert::TryInto;

use lasso::{Rodeo, Spur};
use wtf_rs::round_up;

use crate::error::{Result, SnapshotError};

/// Collects string contents during serialization. Equal contents share one index.
pub struct StringChannelWriter {
    rodeo: Rodeo<Spur>,
    indices: HashMap<Spur, u32>,
    entries: Vec<(Spur, u32)>,
}

impl StringChannelWriter {
    pub fn new() -> Self {
        Self {
            rodeo: Rodeo::new(),
            indices: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Index of `text`, appending it if it is new.
    pub fn push(&mut self, text: &str, hash: u32) -> u32 {
        let key = self.rodeo.get_or_intern(text);
        let entries = &mut self.entries;
        *self.indices.entry(key).or_insert_with(|| {
            entries.push((key, hash));
            (entries.len() - 1) as u32
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        for (key, hash) in self.entries.iter() {
            let bytes = self.rodeo.resolve(key).as_bytes();
            let start = out.len();
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&hash.to_le_bytes());
            out.extend_from_slice(bytes);
            out.resize(start + 8 + round_up(bytes.len(), 8), 0);
        }
    }
}

impl Default for StringChannelWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StringEntry<'a> {
    pub bytes: &'a [u8],
    pub hash: u32,
}

/// Splits a side-channel into its entries.
pub fn read_channel(channel: &[u8]) -> Result<Vec<StringEntry<'_>>> {
    let mut entries = Vec::new();
    let mut at = 0;
    while at < channel.len() {
        let head = channel
            .get(at..at + 8)
            .ok_or_else(|| SnapshotError::corrupt(format!("truncated string entry at {}", at)))?;
        let length = u32::from_le_bytes(head[0..4].try_into().unwrap_or_default()) as usize;
        let hash = u32::from_le_bytes(head[4..8].try_into().unwrap_or_default());
        let bytes = channel.get(at + 8..at + 8 + length).ok_or(SnapshotError::BufferTooSmall {
            needed: at + 8 + length,
            available: channel.len(),
        })?;
        entries.push(StringEntry { bytes, hash });
        at += 8 + round_up(length, 8);
    }
    Ok(entries)
}
