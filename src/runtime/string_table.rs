use parking_lot::{Mutex, MutexGuard};

use super::string::line_string_bytes;
use crate::heap::address::Address;
use crate::heap::Heap;

const BUCKET_COUNT: usize = 64;

/// Canonical strings whose hash falls into one bucket.
#[derive(Default)]
pub struct Bucket {
    entries: Vec<(u32, Address)>,
}

impl Bucket {
    pub fn find(&self, heap: &Heap, bytes: &[u8], hash: u32) -> Option<Address> {
        self.entries
            .iter()
            .find(|&&(h, s)| h == hash && line_string_bytes(heap, s) == bytes)
            .map(|&(_, s)| s)
    }

    pub fn insert(&mut self, hash: u32, s: Address) {
        self.entries.push((hash, s));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The VM's intern table.
///
/// Each bucket has its own lock: a background marker may walk the table while the mutator
/// inserts into it, so a lookup and the insertion that follows a miss must happen under one
/// bucket guard.
pub struct StringTable {
    buckets: Vec<Mutex<Bucket>>,
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| Mutex::new(Bucket::default())).collect(),
        }
    }

    pub fn lock_bucket(&self, hash: u32) -> MutexGuard<'_, Bucket> {
        self.buckets[hash as usize % BUCKET_COUNT].lock()
    }

    pub fn lookup(&self, heap: &Heap, bytes: &[u8], hash: u32) -> Option<Address> {
        self.lock_bucket(hash).find(heap, bytes, hash)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}
