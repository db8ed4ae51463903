//! Index of builtin singletons that program and AOT images refer to instead of copying.
//!
//! Indices cover the global-constants table first, then the slots of the global
//! environment, so a loading VM with the same builtins resolves every index to its own,
//! already initialized, singleton. Only environment slots holding builtin functions are
//! indexed; whatever a program stored there is copied like any other object.

use std::collections::HashMap;

use crate::heap::address::Address;
use crate::runtime::global_constants::ConstantIndex;
use crate::runtime::type_info::{slotted_object_size, Shape};
use crate::runtime::value::Value;
use crate::runtime::vm::Vm;

pub struct BuiltinEnv {
    index_of: HashMap<Address, u32>,
}

impl BuiltinEnv {
    pub fn collect(vm: &Vm) -> Self {
        let mut index_of = HashMap::new();
        for (index, value) in vm.constants.iter() {
            if value.is_cell() {
                index_of.entry(value.as_address()).or_insert(index as u32);
            }
        }
        let base = vm.constants.len();
        if let Some(env) = global_env(vm) {
            for slot in 0..env_slot_count(vm, env) {
                let value = vm.get_slot(env, slot);
                if is_builtin_function(vm, value) {
                    index_of
                        .entry(value.as_address())
                        .or_insert((base + slot) as u32);
                }
            }
        }
        Self { index_of }
    }

    pub fn find(&self, addr: Address) -> Option<u32> {
        self.index_of.get(&addr).copied()
    }

    pub fn len(&self) -> usize {
        self.index_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_of.is_empty()
    }
}

/// The singleton behind `index` in `vm`.
pub fn resolve_builtin(vm: &Vm, index: u32) -> Option<Value> {
    let index = index as usize;
    if index < vm.constants.len() {
        return vm.resolve_global_constant(index).filter(|value| value.is_cell());
    }
    let env = global_env(vm)?;
    let slot = index - vm.constants.len();
    if slot >= env_slot_count(vm, env) {
        return None;
    }
    Some(vm.get_slot(env, slot)).filter(|&value| is_builtin_function(vm, value))
}

fn is_builtin_function(vm: &Vm, value: Value) -> bool {
    let function_shape = vm.constants.constant(ConstantIndex::FunctionShape);
    value.is_cell()
        && function_shape.is_cell()
        && vm.shape_of(value.as_address()) == function_shape.as_address()
}

fn global_env(vm: &Vm) -> Option<Address> {
    let env = vm.global_env();
    if env.is_cell() {
        Some(env.as_address())
    } else {
        None
    }
}

fn env_slot_count(vm: &Vm, env: Address) -> usize {
    let shape = Shape::new(&vm.heap, vm.shape_of(env));
    debug_assert_eq!(vm.object_size(env), slotted_object_size(shape.slot_count()));
    shape.slot_count()
}
