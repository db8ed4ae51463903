//! Heap geometry.

pub const WORD_SIZE: usize = 8;
/// Object alignment inside a region.
pub const OBJECT_ALIGNMENT: usize = 8;
/// Bytes available for objects in a regular region.
pub const REGION_SIZE: usize = 256 * 1024;
/// Objects above this size are placed in a dedicated huge region.
pub const MAX_REGULAR_OBJECT_SIZE: usize = 32 * 1024;
/// Region ids are 16-bit so that every heap address keeps its top 16 bits clear.
pub const MAX_REGIONS: usize = u16::MAX as usize;
pub const DEFAULT_MAX_HEAP_SIZE: usize = 512 * 1024 * 1024;
