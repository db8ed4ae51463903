use super::address::Address;
use crate::runtime::type_info::SlotKind;

/// A word-sized field of a heap object together with how its contents are interpreted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Slot {
    pub addr: Address,
    pub kind: SlotKind,
}

impl Slot {
    pub fn new(addr: Address, kind: SlotKind) -> Self {
        Self { addr, kind }
    }
}

/// Receives the body slots of an object, in address order.
pub trait Tracer {
    fn trace(&mut self, slot: Slot);
}

impl Tracer for Vec<Slot> {
    fn trace(&mut self, slot: Slot) {
        self.push(slot);
    }
}

pub struct SimpleVisitor<'a> {
    closure: &'a mut dyn FnMut(Slot),
}

impl<'a> SimpleVisitor<'a> {
    pub fn new(closure: &'a mut dyn FnMut(Slot)) -> Self {
        Self { closure }
    }
}

impl<'a> Tracer for SimpleVisitor<'a> {
    fn trace(&mut self, slot: Slot) {
        (self.closure)(slot);
    }
}
