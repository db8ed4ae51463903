//! Breadth-first copy of an object graph into local spaces.

use std::collections::{HashMap, VecDeque};

use super::category::SpaceCategory;
use super::encode::{Decoded, EncodedRef, RegionRef};
use super::env::BuiltinEnv;
use super::image::Image;
use super::local_space::LocalSpaces;
use super::roots::RootSet;
use super::strings::StringChannelWriter;
use super::writer::{write_spaces, CategoryLengths};
use super::{SnapshotMode, SnapshotOptions};
use crate::error::{HeapError, Result, SnapshotError};
use crate::heap::address::Address;
use crate::runtime::global_constants::ConstantIndex;
use crate::runtime::native::NativeRegistry;
use crate::runtime::program::MethodLiteral;
use crate::runtime::string::{flattened_target, string_content, string_info, stored_hash};
use crate::runtime::type_info::*;
use crate::runtime::value::Value;
use crate::runtime::vm::Vm;

/// Largest native index an image may carry.
pub const MAX_NATIVE_INDEX: usize = u16::MAX as usize;

/// What a serialization pass produced, besides the image itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub lengths: CategoryLengths,
    /// Objects copied into local spaces.
    pub objects: usize,
    pub strings: usize,
    pub methods: usize,
    pub regions: usize,
    /// References emitted as builtin indices instead of copies.
    pub builtins_reused: usize,
}

#[derive(Clone, Copy)]
struct ObjectEncode {
    /// Where the copy lives. `None` for objects that are referenced but not copied.
    copy: Option<RegionRef>,
    encoded: EncodedRef,
}

pub struct Serializer<'a> {
    vm: &'a Vm,
    registry: &'a NativeRegistry,
    mode: SnapshotMode,
    spaces: LocalSpaces,
    data: HashMap<Address, ObjectEncode>,
    queue: VecDeque<Address>,
    strings: StringChannelWriter,
    env: Option<BuiltinEnv>,
    methods: Vec<u64>,
    method_index: HashMap<u64, usize>,
    builtins_reused: usize,
    objects: usize,
    log: bool,
}

impl<'a> Serializer<'a> {
    pub fn new(
        vm: &'a Vm,
        mode: SnapshotMode,
        registry: &'a NativeRegistry,
        options: &SnapshotOptions,
    ) -> Self {
        let env = match mode {
            SnapshotMode::Builtins => None,
            SnapshotMode::Program | SnapshotMode::Aot => Some(BuiltinEnv::collect(vm)),
        };
        Self {
            vm,
            registry,
            mode,
            spaces: LocalSpaces::new(options.local_space_limit, options.log),
            data: HashMap::new(),
            queue: VecDeque::new(),
            strings: StringChannelWriter::new(),
            env,
            methods: Vec::new(),
            method_index: HashMap::new(),
            builtins_reused: 0,
            objects: 0,
            log: options.log,
        }
    }

    /// Copies everything reachable from `roots` and lays it out as an image.
    pub fn serialize(mut self, roots: &RootSet) -> Result<(Image, SnapshotStats)> {
        let mut encoded_roots = Vec::with_capacity(roots.len());
        for &root in roots.values() {
            encoded_roots.push(self.encode_tagged(root)?);
        }
        while let Some(obj) = self.queue.pop_front() {
            self.serialize_object(obj)?;
        }
        if !self.methods.is_empty() {
            self.serialize_methods()?;
        }

        let mut objects = Vec::new();
        let lengths = write_spaces(&self.spaces, &mut objects)?;
        let mut strings = Vec::new();
        self.strings.write_to(&mut strings);

        let stats = SnapshotStats {
            lengths,
            objects: self.objects,
            strings: self.strings.len(),
            methods: self.methods.len(),
            regions: self.spaces.region_count(),
            builtins_reused: self.builtins_reused,
        };
        log::info!(
            "[snapshot] {:?} image: {} objects in {} regions, {} strings, {} methods, {} bytes",
            self.mode,
            stats.objects,
            stats.regions,
            stats.strings,
            stats.methods,
            lengths.total() + strings.len()
        );
        let image = Image {
            mode: self.mode,
            lengths,
            roots: encoded_roots,
            objects,
            strings,
        };
        Ok((image, stats))
    }

    /// Rewrites the header and the reference fields of the copy of `obj`.
    fn serialize_object(&mut self, obj: Address) -> Result<()> {
        let copy = match self.data.get(&obj).and_then(|entry| entry.copy) {
            Some(copy) => copy,
            None => return Ok(()),
        };
        let vm = self.vm;
        let shape = shape_of(&vm.heap, obj);
        let object_type = shape.kind().map_or(0, |kind| kind as u8);
        let header = self
            .encode_heap_object(shape.addr())?
            .with_object_type(object_type);
        self.spaces.write_word(copy, header.raw())?;

        for slot in body_slots(&vm.heap, obj) {
            let at = copy.add((slot.addr.offset() - obj.offset()) as usize);
            let raw = vm.heap.read_word(slot.addr);
            let encoded = match slot.kind {
                SlotKind::Tagged => self.encode_tagged(Value::from_raw(raw))?,
                SlotKind::Native => self.encode_native(raw)?,
                // Already copied verbatim with the object's bytes.
                SlotKind::Double | SlotKind::Int | SlotKind::Raw => continue,
            };
            self.spaces.write_word(at, encoded.raw())?;
        }
        Ok(())
    }

    fn encode_tagged(&mut self, value: Value) -> Result<EncodedRef> {
        if value.is_number() {
            return Ok(EncodedRef::immediate(value));
        }
        if value.is_special() {
            return Ok(EncodedRef::special(value));
        }
        if value.is_weak() {
            let target = value.as_address();
            if kind_of(&self.vm.heap, target) != Some(ObjectKind::Shape) {
                // Weak referents other than shapes are not kept alive by an image.
                crate::log_if!(self.log, "[snapshot] weak reference to {} dropped", target);
                return Ok(EncodedRef::special(Value::undefined()));
            }
            let encoded = self.encode_heap_object(target)?;
            return Ok(match encoded.decode()? {
                Decoded::Region(at) => EncodedRef::weak(at),
                _ => encoded,
            });
        }
        if value.is_cell() {
            return self.encode_heap_object(value.as_address());
        }
        Err(SnapshotError::corrupt(format!(
            "value {:#x} cannot be encoded",
            value.raw()
        )))
    }

    fn encode_heap_object(&mut self, addr: Address) -> Result<EncodedRef> {
        match self.data.get(&addr) {
            Some(entry) => Ok(entry.encoded),
            None => self.encode_new_object(addr),
        }
    }

    fn encode_new_object(&mut self, addr: Address) -> Result<EncodedRef> {
        let vm = self.vm;
        let kind = kind_of(&vm.heap, addr);
        if self.mode != SnapshotMode::Builtins {
            if kind.map_or(false, ObjectKind::is_string) {
                let content = string_content(&vm.heap, addr);
                let text = std::str::from_utf8(&content).map_err(|_| {
                    SnapshotError::corrupt(format!("string at {} is not valid UTF-8", addr))
                })?;
                let index = self.strings.push(text, stored_hash(&vm.heap, addr));
                return Ok(self.remember(addr, None, EncodedRef::string(index)));
            }
            if let Some(index) = self.env.as_ref().and_then(|env| env.find(addr)) {
                self.builtins_reused += 1;
                return Ok(self.remember(addr, None, EncodedRef::builtin(index)));
            }
        } else if kind == Some(ObjectKind::TreeString) {
            return self.copy_rope_flat(addr);
        }

        let size = object_size(&vm.heap, addr);
        if size == 0 {
            return Err(SnapshotError::ZeroSizedObject(addr));
        }
        let category = SpaceCategory::classify(vm.heap.space_of(addr), size, self.mode);
        let at = self.spaces.allocate(category, size)?;
        self.spaces.write(at, vm.heap.read_bytes(addr, size))?;
        let encoded = self.remember(addr, Some(at), EncodedRef::region(at));
        self.queue.push_back(addr);
        self.objects += 1;
        crate::log_if!(
            self.log,
            "[snapshot] copy {:?} {} ({} bytes) -> {:?} {:?}",
            kind,
            addr,
            size,
            category,
            at
        );
        Ok(encoded)
    }

    /// Builtins images keep strings inline; a rope is written as the flat string holding
    /// its text, without touching the live rope.
    fn copy_rope_flat(&mut self, rope: Address) -> Result<EncodedRef> {
        let vm = self.vm;
        if let Some(flat) = flattened_target(&vm.heap, rope) {
            let encoded = self.encode_heap_object(flat)?;
            return Ok(self.remember(rope, None, encoded));
        }
        let content = string_content(&vm.heap, rope);
        let size = line_string_size(content.len());
        let category = SpaceCategory::classify(vm.heap.space_of(rope), size, self.mode);
        let at = self.spaces.allocate(category, size)?;
        // Written completely here, so the rope never enters the queue.
        let encoded = self.remember(rope, None, EncodedRef::region(at));
        self.objects += 1;

        let shape = vm.constants.constant(ConstantIndex::LineStringShape);
        if !shape.is_cell() {
            return Err(HeapError::Uninitialized("line string shape").into());
        }
        let header = self
            .encode_heap_object(shape.as_address())?
            .with_object_type(ObjectKind::LineString as u8);
        self.spaces.write_word(at, header.raw())?;
        self.spaces.write_word(
            at.add(STRING_INFO_OFFSET),
            string_info(content.len() as u32, stored_hash(&vm.heap, rope)),
        )?;
        self.spaces.write(at.add(LINE_STRING_DATA_OFFSET), &content)?;
        Ok(encoded)
    }

    fn remember(&mut self, addr: Address, copy: Option<RegionRef>, encoded: EncodedRef) -> EncodedRef {
        self.data.insert(addr, ObjectEncode { copy, encoded });
        encoded
    }

    /// Runtime entry points are looked up in the registry. Program images may also point
    /// into the program's method literals; those are appended as method records.
    fn encode_native(&mut self, pointer: u64) -> Result<EncodedRef> {
        if pointer == 0 {
            return Ok(EncodedRef::null_native());
        }
        let index = match self.registry.index_of(pointer) {
            Some(index) => index,
            None => self.method_record_index(pointer)?,
        };
        if index > MAX_NATIVE_INDEX {
            return Err(SnapshotError::NativeIndexOverflow(index));
        }
        Ok(EncodedRef::native(index as u32))
    }

    fn method_record_index(&mut self, pointer: u64) -> Result<usize> {
        let is_method = self.mode == SnapshotMode::Program
            && self
                .vm
                .program()
                .map_or(false, |program| program.method_index(pointer).is_some());
        if !is_method {
            return Err(SnapshotError::UnregisteredNativePointer(pointer));
        }
        let position = match self.method_index.get(&pointer) {
            Some(&position) => position,
            None => {
                self.methods.push(pointer);
                self.method_index.insert(pointer, self.methods.len() - 1);
                self.methods.len() - 1
            }
        };
        Ok(self.registry.len() + position)
    }

    /// Appends a method-space-begin marker followed by one record per referenced method.
    fn serialize_methods(&mut self) -> Result<()> {
        let vm = self.vm;
        let program = vm.program().ok_or(SnapshotError::MissingProgram)?;
        let marker = self.spaces.allocate(SpaceCategory::SnapshotOnly, 8)?;
        self.spaces.write_word(
            marker,
            EncodedRef::method_space_begin(self.methods.len() as u32).raw(),
        )?;
        for &pointer in self.methods.iter() {
            let method: &MethodLiteral = program
                .method_at(pointer)
                .ok_or(SnapshotError::UnregisteredNativePointer(pointer))?;
            let at = self
                .spaces
                .allocate(SpaceCategory::SnapshotOnly, MethodLiteral::SIZE)?;
            self.spaces.write(at, &method.to_bytes())?;
        }
        crate::log_if!(
            self.log,
            "[snapshot] wrote {} method records",
            self.methods.len()
        );
        Ok(())
    }
}
