//! The VM's table of well-known singletons.

use super::value::Value;

/// Slots of the global-constants table, in table order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(usize)]
pub enum ConstantIndex {
    MetaShape,
    LineStringShape,
    TreeStringShape,
    ArrayShape,
    Undefined,
    EmptyObjectShape,
    FunctionShape,
    Null,
    GlobalEnvShape,
    JobQueueShape,
    EmptyString,
    Hole,
    EmptyArray,
}

impl ConstantIndex {
    pub const COUNT: usize = 13;

    pub const ALL: [ConstantIndex; Self::COUNT] = [
        ConstantIndex::MetaShape,
        ConstantIndex::LineStringShape,
        ConstantIndex::TreeStringShape,
        ConstantIndex::ArrayShape,
        ConstantIndex::Undefined,
        ConstantIndex::EmptyObjectShape,
        ConstantIndex::FunctionShape,
        ConstantIndex::Null,
        ConstantIndex::GlobalEnvShape,
        ConstantIndex::JobQueueShape,
        ConstantIndex::EmptyString,
        ConstantIndex::Hole,
        ConstantIndex::EmptyArray,
    ];

    /// The immediate held by slots that never refer to a heap object.
    pub const fn special_value(self) -> Option<Value> {
        match self {
            ConstantIndex::Undefined => Some(Value::undefined()),
            ConstantIndex::Null => Some(Value::null()),
            ConstantIndex::Hole => Some(Value::hole()),
            _ => None,
        }
    }
}

pub struct GlobalConstants {
    slots: Vec<Value>,
    special: Vec<bool>,
}

impl GlobalConstants {
    pub fn new() -> Self {
        let slots = ConstantIndex::ALL
            .iter()
            .map(|index| index.special_value().unwrap_or_default())
            .collect();
        let special = ConstantIndex::ALL
            .iter()
            .map(|index| index.special_value().is_some())
            .collect();
        Self { slots, special }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Which slots are fixed immediates. Independent of the table's contents.
    pub fn special_bitmap(&self) -> &[bool] {
        &self.special
    }

    pub fn is_special_or_undefined(&self, index: usize) -> bool {
        self.special.get(index).copied().unwrap_or(false)
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.slots.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.slots[index] = value;
    }

    pub fn constant(&self, index: ConstantIndex) -> Value {
        self.slots[index as usize]
    }

    pub fn set_constant(&mut self, index: ConstantIndex, value: Value) {
        self.slots[index as usize] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Value)> + '_ {
        self.slots.iter().copied().enumerate()
    }
}

impl Default for GlobalConstants {
    fn default() -> Self {
        Self::new()
    }
}
