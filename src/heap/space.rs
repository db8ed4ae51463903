use super::address::RegionId;

/// Live heap spaces.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SpaceKind {
    Young,
    Old,
    NonMovable,
    MachineCode,
    Snapshot,
    Huge,
    SharedOld,
    SharedNonMovable,
    SharedHuge,
}

impl SpaceKind {
    pub const COUNT: usize = 9;
    pub const ALL: [SpaceKind; Self::COUNT] = [
        SpaceKind::Young,
        SpaceKind::Old,
        SpaceKind::NonMovable,
        SpaceKind::MachineCode,
        SpaceKind::Snapshot,
        SpaceKind::Huge,
        SpaceKind::SharedOld,
        SpaceKind::SharedNonMovable,
        SpaceKind::SharedHuge,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn is_young(self) -> bool {
        matches!(self, SpaceKind::Young)
    }

    pub const fn is_shared(self) -> bool {
        matches!(
            self,
            SpaceKind::SharedOld | SpaceKind::SharedNonMovable | SpaceKind::SharedHuge
        )
    }

    /// Local spaces that survive young collections.
    pub const fn is_general_old(self) -> bool {
        !self.is_young() && !self.is_shared()
    }

    pub const fn is_huge(self) -> bool {
        matches!(self, SpaceKind::Huge | SpaceKind::SharedHuge)
    }

    /// Space that receives objects of this space which are too large for a regular region.
    pub const fn huge_space(self) -> SpaceKind {
        if self.is_shared() {
            SpaceKind::SharedHuge
        } else {
            SpaceKind::Huge
        }
    }
}

/// Regions owned by one space. `current` is the region bump allocation continues in.
#[derive(Debug)]
pub struct Space {
    pub(crate) kind: SpaceKind,
    pub(crate) regions: Vec<RegionId>,
    pub(crate) current: Option<RegionId>,
}

impl Space {
    pub fn new(kind: SpaceKind) -> Self {
        Self {
            kind,
            regions: Vec::new(),
            current: None,
        }
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn regions(&self) -> &[RegionId] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations() {
        assert!(SpaceKind::Young.is_young());
        assert!(SpaceKind::MachineCode.is_general_old());
        assert!(!SpaceKind::SharedOld.is_general_old());
        assert_eq!(SpaceKind::SharedOld.huge_space(), SpaceKind::SharedHuge);
        assert_eq!(SpaceKind::Old.huge_space(), SpaceKind::Huge);
        for (i, kind) in SpaceKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
