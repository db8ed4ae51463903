use crate::heap::constants::MAX_REGULAR_OBJECT_SIZE;
use crate::heap::space::SpaceKind;

use super::SnapshotMode;

/// Target heap category of a copied object. Images list categories in [`Self::ALL`] order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SpaceCategory {
    General,
    NonMovable,
    Executable,
    SnapshotOnly,
    Huge,
}

impl SpaceCategory {
    pub const COUNT: usize = 5;
    pub const ALL: [SpaceCategory; Self::COUNT] = [
        SpaceCategory::General,
        SpaceCategory::NonMovable,
        SpaceCategory::Executable,
        SpaceCategory::SnapshotOnly,
        SpaceCategory::Huge,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn is_huge(self) -> bool {
        matches!(self, SpaceCategory::Huge)
    }

    /// Live space that reconstructed regions of this category join.
    pub const fn live_space(self) -> SpaceKind {
        match self {
            SpaceCategory::General => SpaceKind::Old,
            SpaceCategory::NonMovable => SpaceKind::NonMovable,
            SpaceCategory::Executable => SpaceKind::MachineCode,
            SpaceCategory::SnapshotOnly => SpaceKind::Snapshot,
            SpaceCategory::Huge => SpaceKind::Huge,
        }
    }

    /// Category of an object of `size` bytes currently living in `source`.
    pub fn classify(source: SpaceKind, size: usize, mode: SnapshotMode) -> SpaceCategory {
        if size > MAX_REGULAR_OBJECT_SIZE {
            return SpaceCategory::Huge;
        }
        if mode == SnapshotMode::Builtins {
            return SpaceCategory::SnapshotOnly;
        }
        match source {
            SpaceKind::Young | SpaceKind::Old | SpaceKind::SharedOld => SpaceCategory::General,
            SpaceKind::NonMovable | SpaceKind::SharedNonMovable => SpaceCategory::NonMovable,
            SpaceKind::MachineCode => SpaceCategory::Executable,
            SpaceKind::Huge | SpaceKind::SharedHuge => SpaceCategory::Huge,
            SpaceKind::Snapshot if mode == SnapshotMode::Program => SpaceCategory::General,
            SpaceKind::Snapshot => SpaceCategory::SnapshotOnly,
        }
    }
}
