use std::collections::HashMap;

/// A runtime entry point that compiled code and builtins may point to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NativeEntry {
    pub name: &'static str,
    pub address: u64,
}

/// Table of native pointers that may appear in an image.
///
/// Images refer to entry points by their position in this table, so the table a VM loads
/// with must list the same entries in the same order as the one it was saved with.
#[derive(Default, Debug)]
pub struct NativeRegistry {
    entries: Vec<NativeEntry>,
    index: HashMap<u64, usize>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[NativeEntry]) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.register(entry.name, entry.address);
        }
        registry
    }

    /// Adds `address` and returns its index. Registering an address twice keeps the first index.
    pub fn register(&mut self, name: &'static str, address: u64) -> usize {
        if let Some(&index) = self.index.get(&address) {
            return index;
        }
        let index = self.entries.len();
        self.entries.push(NativeEntry { name, address });
        self.index.insert(address, index);
        index
    }

    pub fn index_of(&self, address: u64) -> Option<usize> {
        self.index.get(&address).copied()
    }

    pub fn get(&self, index: usize) -> Option<&NativeEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[NativeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_registration_order() {
        let mut registry = NativeRegistry::new();
        assert_eq!(registry.register("a", 0x1000), 0);
        assert_eq!(registry.register("b", 0x2000), 1);
        assert_eq!(registry.register("a-again", 0x1000), 0);
        assert_eq!(registry.index_of(0x2000), Some(1));
        assert_eq!(registry.index_of(0x3000), None);
        assert_eq!(registry.get(1).map(|e| e.name), Some("b"));
    }
}
