use std::io;

use thiserror::Error;

use crate::heap::address::Address;
use crate::heap::space::SpaceKind;
use crate::snapshot::category::SpaceCategory;

#[derive(Debug, Error)]
pub enum HeapError {
    #[error("out of memory in {space:?} space ({requested} bytes requested)")]
    OutOfMemory { space: SpaceKind, requested: usize },
    #[error("invalid allocation size {0}")]
    InvalidSize(usize),
    #[error("{0} is not initialized")]
    Uninitialized(&'static str),
}

/// Everything that can stop a snapshot pass. None of these are recoverable by the pass
/// itself: the caller is expected to discard the image (on save) or the VM (on load).
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("object at {0} has zero size")]
    ZeroSizedObject(Address),
    #[error("{category:?} local space exhausted ({requested} bytes requested)")]
    SpaceExhausted {
        category: SpaceCategory,
        requested: usize,
    },
    #[error("object of {size} bytes does not fit a {category:?} region")]
    ObjectTooLarge { category: SpaceCategory, size: usize },
    #[error("native pointer {0:#x} is not registered")]
    UnregisteredNativePointer(u64),
    #[error("native pointer table overflow at index {0}")]
    NativeIndexOverflow(usize),
    #[error("image refers to unknown region index {0}")]
    UnknownRegion(u32),
    #[error("corrupt image: {0}")]
    CorruptImage(String),
    #[error("image carries method records but no program was supplied")]
    MissingProgram,
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SnapshotError {
    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        SnapshotError::CorruptImage(message.into())
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
