//! Opt-in rope flattening over the live heap.

use std::collections::{HashSet, VecDeque};

use super::roots::RootSet;
use crate::error::HeapError;
use crate::heap::address::Address;
use crate::heap::trace::{SimpleVisitor, Slot};
use crate::runtime::global_constants::ConstantIndex;
use crate::runtime::string::{flattened_target, stored_hash, string_content};
use crate::runtime::type_info::*;
use crate::runtime::value::Value;
use crate::runtime::vm::Vm;

/// Rewrites every rope reachable from `roots` so that its left side is a line string with
/// the whole text and its right side is the empty string. Returns how many ropes changed.
///
/// Ropes keep their identity, so references to them stay valid.
pub fn flatten_reachable_ropes(vm: &mut Vm, roots: &RootSet) -> Result<usize, HeapError> {
    let empty = vm.constant_address(ConstantIndex::EmptyString, "empty string")?;
    let mut seen = HashSet::new();
    let mut queue: VecDeque<Address> = roots
        .values()
        .iter()
        .filter(|value| value.is_cell())
        .map(|value| value.as_address())
        .collect();
    let mut flattened = 0;

    while let Some(obj) = queue.pop_front() {
        if !seen.insert(obj) {
            continue;
        }
        if kind_of(&vm.heap, obj) == Some(ObjectKind::TreeString)
            && flattened_target(&vm.heap, obj).is_none()
        {
            let content = string_content(&vm.heap, obj);
            let hash = stored_hash(&vm.heap, obj);
            let space = vm.heap.space_of(obj);
            let flat = vm.allocate_line_string(space, &content, hash)?;
            vm.heap.write_word(
                obj.add(TREE_STRING_LEFT_OFFSET),
                Value::encode_object(flat).raw(),
            );
            vm.heap.write_word(
                obj.add(TREE_STRING_RIGHT_OFFSET),
                Value::encode_object(empty).raw(),
            );
            flattened += 1;
        }

        let heap = &vm.heap;
        queue.push_back(shape_of(heap, obj).addr());
        let mut enqueue = |slot: Slot| {
            if slot.kind != SlotKind::Tagged {
                return;
            }
            let value = Value::from_raw(heap.read_word(slot.addr));
            if value.is_cell() {
                queue.push_back(value.as_address());
            }
        };
        visit_body(heap, obj, &mut SimpleVisitor::new(&mut enqueue));
    }
    Ok(flattened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use crate::runtime::native::NativeRegistry;
    use crate::snapshot::SnapshotMode;

    #[test]
    fn ropes_become_flat_in_place() {
        let mut vm = Vm::bootstrap(HeapConfig::default(), &NativeRegistry::new()).unwrap();
        let left = vm.new_string("hello, ").unwrap();
        let right = vm.new_string("world").unwrap();
        let inner = vm.new_tree_string(left, right).unwrap();
        let bang = vm.new_string("!").unwrap();
        let rope = vm.new_tree_string(inner, bang).unwrap();
        let env = vm.global_env().as_address();
        vm.set_slot(env, 3, Value::encode_object(rope));

        let roots = RootSet::collect(&vm, SnapshotMode::Program);
        let count = flatten_reachable_ropes(&mut vm, &roots).unwrap();
        assert_eq!(count, 1);
        let flat = flattened_target(&vm.heap, rope).unwrap();
        assert_eq!(vm.string_to_string(flat), "hello, world!");
        assert_eq!(vm.string_to_string(rope), "hello, world!");
        assert_eq!(stored_hash(&vm.heap, flat), stored_hash(&vm.heap, rope));

        // Already flat ropes are left alone.
        assert_eq!(flatten_reachable_ropes(&mut vm, &roots).unwrap(), 0);
    }
}
