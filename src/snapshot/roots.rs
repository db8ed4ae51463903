//! Which values seed a pass, and where they go back on load.

use super::SnapshotMode;
use crate::runtime::type_info::ObjectKind;
use crate::runtime::value::Value;
use crate::runtime::vm::{RootKind, Vm};

/// Walks the global-constants table, yielding only the slots that are not fixed immediates.
/// The sequence depends on the table's special bitmap alone.
pub struct ConstantCursor<'a> {
    special: &'a [bool],
    next: usize,
}

impl<'a> ConstantCursor<'a> {
    pub fn new(special: &'a [bool]) -> Self {
        Self { special, next: 0 }
    }
}

impl<'a> Iterator for ConstantCursor<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next < self.special.len() {
            let index = self.next;
            self.next += 1;
            if !self.special[index] {
                return Some(index);
            }
        }
        None
    }
}

/// Root values of a pass, in the order the image lists them.
#[derive(Clone, Debug, Default)]
pub struct RootSet {
    values: Vec<Value>,
}

impl RootSet {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// - builtins: every non-special global constant in table order, then the global env;
    /// - program: the global env and the job queue;
    /// - AOT: the AOT root table.
    pub fn collect(vm: &Vm, mode: SnapshotMode) -> Self {
        let mut values = Vec::new();
        match mode {
            SnapshotMode::Builtins => {
                for index in ConstantCursor::new(vm.constants.special_bitmap()) {
                    values.extend(vm.constants.get(index));
                }
                push_cell(&mut values, vm.global_env());
            }
            SnapshotMode::Program => {
                push_cell(&mut values, vm.global_env());
                push_cell(&mut values, vm.job_queue());
            }
            SnapshotMode::Aot => push_cell(&mut values, vm.aot_root()),
        }
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn push_cell(values: &mut Vec<Value>, value: Value) {
    if value.is_cell() {
        values.push(value);
    }
}

/// Hands restored roots back to the VM in image order.
pub struct RootRegistrar<'a> {
    mode: SnapshotMode,
    cursor: ConstantCursor<'a>,
    aot_seen: bool,
}

impl<'a> RootRegistrar<'a> {
    pub fn new(mode: SnapshotMode, special: &'a [bool]) -> Self {
        Self {
            mode,
            cursor: ConstantCursor::new(special),
            aot_seen: false,
        }
    }

    /// Slot for the next root, given the kind of object it resolved to. `None` means the root
    /// has no slot in this mode and only stays reachable through other roots.
    pub fn next_kind(&mut self, kind: Option<ObjectKind>) -> Option<RootKind> {
        match self.mode {
            SnapshotMode::Builtins => Some(match self.cursor.next() {
                Some(index) => RootKind::GlobalConstant(index),
                None => RootKind::GlobalEnv,
            }),
            SnapshotMode::Program => match kind {
                Some(ObjectKind::GlobalEnv) => Some(RootKind::GlobalEnv),
                Some(ObjectKind::JobQueue) => Some(RootKind::JobQueue),
                _ => None,
            },
            SnapshotMode::Aot => {
                if !self.aot_seen && kind == Some(ObjectKind::TaggedArray) {
                    self.aot_seen = true;
                    Some(RootKind::AotTable)
                } else {
                    None
                }
            }
        }
    }
}

/// Registers `roots` (already resolved against the loading VM) with `vm`.
pub fn register_roots(vm: &mut Vm, mode: SnapshotMode, roots: &[Value], log: bool) -> usize {
    let special = vm.constants.special_bitmap().to_vec();
    let mut registrar = RootRegistrar::new(mode, &special);
    let mut registered = 0;
    for &value in roots {
        let kind = if value.is_cell() {
            vm.kind_of(value.as_address())
        } else {
            None
        };
        match registrar.next_kind(kind) {
            Some(slot) => {
                crate::log_if!(log, "[snapshot] root {:?} -> {:?}", value, slot);
                vm.register_root(slot, value);
                registered += 1;
            }
            None => log::warn!("[snapshot] root {:?} has no slot in {:?} mode", value, mode),
        }
    }
    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use crate::runtime::global_constants::{ConstantIndex, GlobalConstants};
    use crate::runtime::native::NativeRegistry;

    #[test]
    fn cursor_skips_special_slots() {
        let special = [false, true, false, true, true, false];
        let indices: Vec<usize> = ConstantCursor::new(&special).collect();
        assert_eq!(indices, vec![0, 2, 5]);
    }

    #[test]
    fn cursor_is_a_function_of_the_bitmap() {
        let constants = GlobalConstants::new();
        let first: Vec<usize> = ConstantCursor::new(constants.special_bitmap()).collect();
        let second: Vec<usize> = ConstantCursor::new(constants.special_bitmap()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), ConstantIndex::COUNT - 3);
        assert!(!first.contains(&(ConstantIndex::Undefined as usize)));
        assert!(!first.contains(&(ConstantIndex::Hole as usize)));
    }

    #[test]
    fn root_sets_per_mode() {
        let mut vm = Vm::bootstrap(HeapConfig::default(), &NativeRegistry::new()).unwrap();
        let builtins = RootSet::collect(&vm, SnapshotMode::Builtins);
        assert_eq!(builtins.len(), ConstantIndex::COUNT - 3 + 1);
        assert_eq!(*builtins.values().last().unwrap(), vm.global_env());

        let program = RootSet::collect(&vm, SnapshotMode::Program);
        assert_eq!(program.values(), &[vm.global_env(), vm.job_queue()]);

        assert!(RootSet::collect(&vm, SnapshotMode::Aot).is_empty());
        let table = vm.new_array(&[Value::new_int(1)]).unwrap();
        vm.set_aot_root(Value::encode_object(table));
        assert_eq!(RootSet::collect(&vm, SnapshotMode::Aot).len(), 1);
    }

    #[test]
    fn builtins_registrar_overflows_into_global_env() {
        let special = [false, true, false];
        let mut registrar = RootRegistrar::new(SnapshotMode::Builtins, &special);
        assert_eq!(registrar.next_kind(None), Some(RootKind::GlobalConstant(0)));
        assert_eq!(registrar.next_kind(None), Some(RootKind::GlobalConstant(2)));
        assert_eq!(registrar.next_kind(None), Some(RootKind::GlobalEnv));
    }

    #[test]
    fn aot_registrar_takes_first_array() {
        let mut registrar = RootRegistrar::new(SnapshotMode::Aot, &[]);
        assert_eq!(registrar.next_kind(Some(ObjectKind::Plain)), None);
        assert_eq!(
            registrar.next_kind(Some(ObjectKind::TaggedArray)),
            Some(RootKind::AotTable)
        );
        assert_eq!(registrar.next_kind(Some(ObjectKind::TaggedArray)), None);
    }
}
