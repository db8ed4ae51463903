use super::global_constants::{ConstantIndex, GlobalConstants};
use super::native::NativeRegistry;
use super::program::Program;
use super::string::{init_line_string, string_content, string_hash, string_info, string_length};
use super::string_table::StringTable;
use super::type_info::*;
use super::value::Value;
use crate::error::HeapError;
use crate::heap::address::Address;
use crate::heap::space::SpaceKind;
use crate::heap::{Heap, HeapConfig};

/// Tagged slots of a global environment.
pub const GLOBAL_ENV_SLOTS: usize = 16;

pub const FUNCTION_NAME_SLOT: usize = 0;
pub const FUNCTION_ENTRY_SLOT: usize = 1;
pub const FUNCTION_ARITY_SLOT: usize = 2;

pub const JOB_QUEUE_PENDING_SLOT: usize = 0;
pub const JOB_QUEUE_COUNT_SLOT: usize = 1;

/// Well-known VM locations an image can restore.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RootKind {
    GlobalEnv,
    JobQueue,
    GlobalConstant(usize),
    AotTable,
}

pub struct Vm {
    pub heap: Heap,
    pub strings: StringTable,
    pub constants: GlobalConstants,
    global_env: Value,
    job_queue: Value,
    aot_root: Value,
    program: Option<Program>,
}

impl Vm {
    /// A VM with an empty heap and no constants, ready to be filled from a builtins image.
    pub fn new(config: HeapConfig) -> Self {
        Self {
            heap: Heap::new(config),
            strings: StringTable::new(),
            constants: GlobalConstants::new(),
            global_env: Value::undefined(),
            job_queue: Value::undefined(),
            aot_root: Value::undefined(),
            program: None,
        }
    }

    /// Builds the builtin shapes, constants, global environment and job queue from scratch.
    /// The environment receives one builtin function per entry of `natives`.
    pub fn bootstrap(config: HeapConfig, natives: &NativeRegistry) -> Result<Self, HeapError> {
        let mut vm = Self::new(config);

        let meta = vm.heap.allocate(SpaceKind::NonMovable, shape_size(0))?;
        vm.heap.write_word(meta, Value::encode_object(meta).raw());
        vm.heap.write_word(
            meta.add(SHAPE_INFO_OFFSET),
            ShapeKindBits::encode(ObjectKind::Shape as u64),
        );
        vm.heap
            .write_word(meta.add(SHAPE_PROTOTYPE_OFFSET), Value::null().raw());
        vm.constants
            .set_constant(ConstantIndex::MetaShape, Value::encode_object(meta));

        let shapes: [(ConstantIndex, ObjectKind, Vec<SlotKind>); 7] = [
            (ConstantIndex::LineStringShape, ObjectKind::LineString, vec![]),
            (ConstantIndex::TreeStringShape, ObjectKind::TreeString, vec![]),
            (ConstantIndex::ArrayShape, ObjectKind::TaggedArray, vec![]),
            (ConstantIndex::EmptyObjectShape, ObjectKind::Plain, vec![]),
            (
                ConstantIndex::FunctionShape,
                ObjectKind::Plain,
                vec![SlotKind::Tagged, SlotKind::Native, SlotKind::Int],
            ),
            (
                ConstantIndex::GlobalEnvShape,
                ObjectKind::GlobalEnv,
                vec![SlotKind::Tagged; GLOBAL_ENV_SLOTS],
            ),
            (
                ConstantIndex::JobQueueShape,
                ObjectKind::JobQueue,
                vec![SlotKind::Tagged, SlotKind::Int],
            ),
        ];
        for (index, kind, layout) in shapes.iter() {
            let shape = vm.new_shape(*kind, layout)?;
            vm.constants.set_constant(*index, Value::encode_object(shape));
        }

        let empty_string = vm.intern("")?;
        vm.constants
            .set_constant(ConstantIndex::EmptyString, Value::encode_object(empty_string));
        let empty_array = vm.new_array_in(SpaceKind::Old, &[])?;
        vm.constants
            .set_constant(ConstantIndex::EmptyArray, Value::encode_object(empty_array));

        let env_shape = vm.constant_address(ConstantIndex::GlobalEnvShape, "global env shape")?;
        let env = vm.new_object_in(SpaceKind::Old, env_shape)?;
        for (slot, entry) in natives.entries().iter().take(GLOBAL_ENV_SLOTS).enumerate() {
            let function = vm.new_builtin_function(entry.name, entry.address, 0)?;
            vm.set_slot(env, slot, Value::encode_object(function));
        }
        vm.global_env = Value::encode_object(env);

        let queue_shape = vm.constant_address(ConstantIndex::JobQueueShape, "job queue shape")?;
        let queue = vm.new_object_in(SpaceKind::Old, queue_shape)?;
        let pending = vm.new_array_in(SpaceKind::Old, &[])?;
        vm.set_slot(queue, JOB_QUEUE_PENDING_SLOT, Value::encode_object(pending));
        vm.set_int_slot(queue, JOB_QUEUE_COUNT_SLOT, 0);
        vm.job_queue = Value::encode_object(queue);

        Ok(vm)
    }

    pub fn constant_address(
        &self,
        index: ConstantIndex,
        what: &'static str,
    ) -> Result<Address, HeapError> {
        let value = self.constants.constant(index);
        if value.is_cell() {
            Ok(value.as_address())
        } else {
            Err(HeapError::Uninitialized(what))
        }
    }

    pub fn resolve_global_constant(&self, index: usize) -> Option<Value> {
        self.constants.get(index)
    }

    // Roots.

    pub fn global_env(&self) -> Value {
        self.global_env
    }

    pub fn job_queue(&self) -> Value {
        self.job_queue
    }

    pub fn aot_root(&self) -> Value {
        self.aot_root
    }

    pub fn set_aot_root(&mut self, value: Value) {
        self.aot_root = value;
    }

    pub fn register_root(&mut self, kind: RootKind, value: Value) {
        match kind {
            RootKind::GlobalEnv => self.global_env = value,
            RootKind::JobQueue => self.job_queue = value,
            RootKind::GlobalConstant(index) => self.constants.set(index, value),
            RootKind::AotTable => self.aot_root = value,
        }
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn program_mut(&mut self) -> Option<&mut Program> {
        self.program.as_mut()
    }

    pub fn set_program(&mut self, program: Program) {
        self.program = Some(program);
    }

    // Object model.

    pub fn kind_of(&self, obj: Address) -> Option<ObjectKind> {
        kind_of(&self.heap, obj)
    }

    pub fn shape_of(&self, obj: Address) -> Address {
        header_of(&self.heap, obj).as_address()
    }

    pub fn object_size(&self, obj: Address) -> usize {
        object_size(&self.heap, obj)
    }

    fn allocate_object(
        &mut self,
        space: SpaceKind,
        shape: Address,
        size: usize,
    ) -> Result<Address, HeapError> {
        let obj = self.heap.allocate(space, size)?;
        self.heap.write_word(obj, Value::encode_object(shape).raw());
        Ok(obj)
    }

    pub fn new_shape(&mut self, kind: ObjectKind, layout: &[SlotKind]) -> Result<Address, HeapError> {
        self.new_shape_with_prototype(kind, layout, Value::null())
    }

    pub fn new_shape_with_prototype(
        &mut self,
        kind: ObjectKind,
        layout: &[SlotKind],
        prototype: Value,
    ) -> Result<Address, HeapError> {
        let meta = self.constant_address(ConstantIndex::MetaShape, "meta shape")?;
        let shape = self.allocate_object(SpaceKind::NonMovable, meta, shape_size(layout.len()))?;
        self.heap.write_word(
            shape.add(SHAPE_INFO_OFFSET),
            ShapeKindBits::encode(kind as u64) | SlotCountBits::encode(layout.len() as u64),
        );
        self.heap
            .write_word(shape.add(SHAPE_PROTOTYPE_OFFSET), prototype.raw());
        let bytes: Vec<u8> = layout.iter().map(|&kind| kind as u8).collect();
        self.heap.write_bytes(shape.add(SHAPE_LAYOUT_OFFSET), &bytes);
        Ok(shape)
    }

    pub fn new_object(&mut self, shape: Address) -> Result<Address, HeapError> {
        self.new_object_in(SpaceKind::Young, shape)
    }

    /// Allocates an instance of a slotted shape. Tagged slots start out undefined, the
    /// others zero.
    pub fn new_object_in(&mut self, space: SpaceKind, shape: Address) -> Result<Address, HeapError> {
        let layout: Vec<u8> = Shape::new(&self.heap, shape).layout().to_vec();
        let obj = self.allocate_object(space, shape, slotted_object_size(layout.len()))?;
        for (index, &raw) in layout.iter().enumerate() {
            let initial = if raw == SlotKind::Tagged as u8 {
                Value::undefined().raw()
            } else {
                0
            };
            self.heap.write_word(obj.add(slot_offset(index)), initial);
        }
        Ok(obj)
    }

    pub fn new_builtin_function(
        &mut self,
        name: &str,
        entry: u64,
        arity: i32,
    ) -> Result<Address, HeapError> {
        let shape = self.constant_address(ConstantIndex::FunctionShape, "function shape")?;
        let name = self.intern(name)?;
        let function = self.new_object(shape)?;
        self.set_slot(function, FUNCTION_NAME_SLOT, Value::encode_object(name));
        self.set_native_slot(function, FUNCTION_ENTRY_SLOT, entry);
        self.set_int_slot(function, FUNCTION_ARITY_SLOT, arity);
        Ok(function)
    }

    pub fn get_slot(&self, obj: Address, index: usize) -> Value {
        Value::from_raw(self.heap.read_word(obj.add(slot_offset(index))))
    }

    pub fn set_slot(&mut self, obj: Address, index: usize, value: Value) {
        self.heap.write_word(obj.add(slot_offset(index)), value.raw());
    }

    pub fn get_native_slot(&self, obj: Address, index: usize) -> u64 {
        self.heap.read_word(obj.add(slot_offset(index)))
    }

    pub fn set_native_slot(&mut self, obj: Address, index: usize, pointer: u64) {
        self.heap.write_word(obj.add(slot_offset(index)), pointer);
    }

    pub fn get_int_slot(&self, obj: Address, index: usize) -> i32 {
        self.heap.read_word(obj.add(slot_offset(index))) as u32 as i32
    }

    pub fn set_int_slot(&mut self, obj: Address, index: usize, x: i32) {
        self.heap
            .write_word(obj.add(slot_offset(index)), x as u32 as u64);
    }

    pub fn get_double_slot(&self, obj: Address, index: usize) -> f64 {
        f64::from_bits(self.heap.read_word(obj.add(slot_offset(index))))
    }

    pub fn set_double_slot(&mut self, obj: Address, index: usize, x: f64) {
        self.heap
            .write_word(obj.add(slot_offset(index)), x.to_bits());
    }

    pub fn new_array(&mut self, values: &[Value]) -> Result<Address, HeapError> {
        self.new_array_in(SpaceKind::Young, values)
    }

    pub fn new_array_in(&mut self, space: SpaceKind, values: &[Value]) -> Result<Address, HeapError> {
        let shape = self.constant_address(ConstantIndex::ArrayShape, "array shape")?;
        let array = self.allocate_object(space, shape, array_size(values.len()))?;
        self.heap
            .write_word(array.add(ARRAY_LENGTH_OFFSET), values.len() as u64);
        for (index, value) in values.iter().enumerate() {
            self.heap
                .write_word(array.add(ARRAY_DATA_OFFSET + index * 8), value.raw());
        }
        Ok(array)
    }

    pub fn array_length(&self, array: Address) -> usize {
        self.heap.read_word(array.add(ARRAY_LENGTH_OFFSET)) as usize
    }

    pub fn array_get(&self, array: Address, index: usize) -> Value {
        Value::from_raw(self.heap.read_word(array.add(ARRAY_DATA_OFFSET + index * 8)))
    }

    // Strings.

    /// Allocates a line string in `space` without interning it.
    pub fn allocate_line_string(
        &mut self,
        space: SpaceKind,
        bytes: &[u8],
        hash: u32,
    ) -> Result<Address, HeapError> {
        let shape = self.constant_address(ConstantIndex::LineStringShape, "line string shape")?;
        let s = self.allocate_object(space, shape, line_string_size(bytes.len()))?;
        init_line_string(&mut self.heap, s, bytes, hash);
        Ok(s)
    }

    /// A fresh, non-canonical string.
    pub fn new_string(&mut self, text: &str) -> Result<Address, HeapError> {
        let bytes = text.as_bytes();
        self.allocate_line_string(SpaceKind::SharedOld, bytes, string_hash(bytes))
    }

    /// The canonical string for `text`, creating it if the intern table has none.
    pub fn intern(&mut self, text: &str) -> Result<Address, HeapError> {
        let bytes = text.as_bytes();
        let hash = string_hash(bytes);
        let shape = self.constant_address(ConstantIndex::LineStringShape, "line string shape")?;
        let mut bucket = self.strings.lock_bucket(hash);
        if let Some(existing) = bucket.find(&self.heap, bytes, hash) {
            return Ok(existing);
        }
        let s = self
            .heap
            .allocate(SpaceKind::SharedOld, line_string_size(bytes.len()))?;
        self.heap.write_word(s, Value::encode_object(shape).raw());
        init_line_string(&mut self.heap, s, bytes, hash);
        bucket.insert(hash, s);
        Ok(s)
    }

    /// A rope joining two strings.
    pub fn new_tree_string(&mut self, left: Address, right: Address) -> Result<Address, HeapError> {
        let shape = self.constant_address(ConstantIndex::TreeStringShape, "tree string shape")?;
        let length = string_length(&self.heap, left) + string_length(&self.heap, right);
        let mut content = string_content(&self.heap, left);
        content.extend(string_content(&self.heap, right));
        let hash = string_hash(&content);
        let s = self.allocate_object(SpaceKind::SharedOld, shape, TREE_STRING_SIZE)?;
        self.heap
            .write_word(s.add(STRING_INFO_OFFSET), string_info(length as u32, hash));
        self.heap
            .write_word(s.add(TREE_STRING_LEFT_OFFSET), Value::encode_object(left).raw());
        self.heap
            .write_word(s.add(TREE_STRING_RIGHT_OFFSET), Value::encode_object(right).raw());
        Ok(s)
    }

    pub fn string_content(&self, s: Address) -> Vec<u8> {
        string_content(&self.heap, s)
    }

    pub fn string_to_string(&self, s: Address) -> String {
        String::from_utf8_lossy(&self.string_content(s)).into_owned()
    }
}
