//! Rebuilds an image inside a live heap.
//!
//! Loading runs in three steps:
//!
//! 1. every region of the image is copied into a fresh region of the matching live space;
//! 2. the regions are walked in address order, resolving each object's header so its size
//!    is known, which yields the ordered list of objects still to be fixed;
//! 3. the body of every listed object is fixed up.
//!
//! Headers never need a body to be resolved first, so the second step can size every
//! object before any field is touched. Method records are restored during the header walk,
//! which means native pointers into them resolve regardless of where the records sit.

use std::collections::HashMap;

use vec_map::VecMap;
use wtf_rs::{is_aligned, round_up};

use super::category::SpaceCategory;
use super::encode::{Decoded, EncodedRef, RegionRef};
use super::env::resolve_builtin;
use super::head::RegionHeadRecord;
use super::image::ImageView;
use super::roots::register_roots;
use super::strings::read_channel;
use super::{SnapshotMode, SnapshotOptions};
use crate::error::{Result, SnapshotError};
use crate::heap::address::{Address, RegionId};
use crate::heap::constants::{OBJECT_ALIGNMENT, REGION_SIZE, WORD_SIZE};
use crate::heap::space::SpaceKind;
use crate::runtime::global_constants::ConstantIndex;
use crate::runtime::native::NativeRegistry;
use crate::runtime::program::MethodLiteral;
use crate::runtime::string::{init_line_string, line_string_bytes, stored_hash, string_hash};
use crate::runtime::type_info::*;
use crate::runtime::value::Value;
use crate::runtime::vm::Vm;

/// What a deserialization pass did to the VM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub regions: usize,
    pub objects: usize,
    /// Strings added to the intern table.
    pub strings_interned: usize,
    /// Strings that resolved to an already interned string.
    pub strings_reused: usize,
    pub methods: usize,
    pub roots: usize,
}

pub struct Deserializer<'a> {
    vm: &'a mut Vm,
    registry: &'a NativeRegistry,
    log: bool,
    mode: SnapshotMode,
    region_map: VecMap<RegionId>,
    reconstructed: Vec<RegionId>,
    strings: Vec<Address>,
    /// Inline strings of a builtins image that duplicate an already interned string.
    redirects: HashMap<Address, Address>,
    /// Native pointer of every restored method record, in image order.
    methods: Vec<u64>,
    pending_methods: usize,
    stats: RestoreStats,
}

impl<'a> Deserializer<'a> {
    pub fn new(vm: &'a mut Vm, registry: &'a NativeRegistry, options: &SnapshotOptions) -> Self {
        Self {
            vm,
            registry,
            log: options.log,
            mode: SnapshotMode::Builtins,
            region_map: VecMap::new(),
            reconstructed: Vec::new(),
            strings: Vec::new(),
            redirects: HashMap::new(),
            methods: Vec::new(),
            pending_methods: 0,
            stats: RestoreStats::default(),
        }
    }

    pub fn deserialize(mut self, image: &ImageView<'_>) -> Result<RestoreStats> {
        self.mode = image.mode;
        match self.mode {
            SnapshotMode::Builtins if !image.strings.is_empty() => {
                return Err(SnapshotError::corrupt(
                    "builtins image carries a string side-channel",
                ));
            }
            SnapshotMode::Builtins => {}
            SnapshotMode::Program | SnapshotMode::Aot => self.restore_strings(image.strings)?,
        }
        for &category in SpaceCategory::ALL.iter() {
            self.reconstruct(category, image.category(category))?;
        }
        let objects = self.fix_headers()?;
        self.fix_fields(&objects)?;
        for &id in self.reconstructed.iter() {
            self.vm.heap.region_mut(id).set_need_relocate(false);
        }

        let mut roots = Vec::with_capacity(image.roots.len());
        for &root in image.roots.iter() {
            roots.push(self.resolve_tagged(root)?);
        }
        self.stats.roots = register_roots(self.vm, self.mode, &roots, self.log);

        log::info!(
            "[snapshot] restored {:?} image: {} regions, {} objects, {} strings ({} reused), {} methods",
            self.mode,
            self.stats.regions,
            self.stats.objects,
            self.stats.strings_interned + self.stats.strings_reused,
            self.stats.strings_reused,
            self.stats.methods
        );
        Ok(self.stats)
    }

    /// Interns every side-channel string up front, so field fix-up only has to index.
    fn restore_strings(&mut self, channel: &[u8]) -> Result<()> {
        let entries = read_channel(channel)?;
        let vm = &mut *self.vm;
        let shape = vm.constant_address(ConstantIndex::LineStringShape, "line string shape")?;
        for entry in entries {
            if string_hash(entry.bytes) != entry.hash {
                return Err(SnapshotError::corrupt(format!(
                    "string #{} does not match its hash",
                    self.strings.len()
                )));
            }
            let mut bucket = vm.strings.lock_bucket(entry.hash);
            let canonical = match bucket.find(&vm.heap, entry.bytes, entry.hash) {
                Some(existing) => {
                    self.stats.strings_reused += 1;
                    existing
                }
                None => {
                    let s = vm
                        .heap
                        .allocate(SpaceKind::SharedOld, line_string_size(entry.bytes.len()))?;
                    vm.heap.write_word(s, Value::encode_object(shape).raw());
                    init_line_string(&mut vm.heap, s, entry.bytes, entry.hash);
                    bucket.insert(entry.hash, s);
                    if vm.heap.is_concurrent_marking() {
                        vm.heap.region_for(s).atomic_mark(s.offset());
                    }
                    self.stats.strings_interned += 1;
                    s
                }
            };
            drop(bucket);
            self.strings.push(canonical);
        }
        Ok(())
    }

    fn reconstruct(&mut self, category: SpaceCategory, bytes: &[u8]) -> Result<()> {
        let space = category.live_space();
        if category.is_huge() {
            let mut at = 0;
            while at < bytes.len() {
                let head = RegionHeadRecord::read_from(bytes, at)?;
                let live = head.live_bytes as usize;
                let body = region_body(bytes, at, live)?;
                self.install_region(space, head.region_index, body, live)?;
                at += RegionHeadRecord::SIZE + live;
            }
            return Ok(());
        }
        let stride = RegionHeadRecord::SIZE + REGION_SIZE;
        let count = (bytes.len() + stride - 1) / stride;
        for i in 0..count {
            let at = i * stride;
            let head = RegionHeadRecord::read_from(bytes, at)?;
            let live = head.live_bytes as usize;
            if live > REGION_SIZE {
                return Err(SnapshotError::corrupt(format!(
                    "region {} claims {} live bytes",
                    head.region_index, live
                )));
            }
            let body = region_body(bytes, at, live)?;
            self.install_region(space, head.region_index, body, REGION_SIZE)?;
        }
        crate::log_if!(
            self.log,
            "[snapshot] {:?}: {} regions from {} bytes",
            category,
            count,
            bytes.len()
        );
        Ok(())
    }

    fn install_region(
        &mut self,
        space: SpaceKind,
        index: u32,
        body: &[u8],
        capacity: usize,
    ) -> Result<()> {
        if self.region_map.contains_key(index as usize) {
            return Err(SnapshotError::corrupt(format!(
                "region index {} appears twice",
                index
            )));
        }
        let id = self.vm.heap.allocate_region(space, capacity)?;
        let region = self.vm.heap.region_mut(id);
        region.load(body);
        region.set_need_relocate(true);
        self.region_map.insert(index as usize, id);
        self.reconstructed.push(id);
        self.stats.regions += 1;
        Ok(())
    }

    /// First fix-up pass: resolves headers and lists the objects in address order.
    fn fix_headers(&mut self) -> Result<Vec<Address>> {
        let mut objects = Vec::new();
        let regions = self.reconstructed.clone();
        for id in regions {
            let top = self.vm.heap.region(id).top();
            let mut offset = 0;
            while offset < top {
                let addr = Address::new(id, offset as u32);
                if self.pending_methods > 0 {
                    if offset + MethodLiteral::SIZE > top {
                        // Records never straddle regions; the rest continues in the next one.
                        break;
                    }
                    self.restore_method(addr)?;
                    offset += MethodLiteral::SIZE;
                    continue;
                }
                let word = self.vm.heap.read_word(addr);
                if word == 0 {
                    // Zero-filled tail of a full region.
                    break;
                }
                let encoded = EncodedRef::from_raw(word);
                let shape = match encoded.decode()? {
                    Decoded::MethodSpaceBegin(count) => {
                        self.begin_methods(count as usize)?;
                        offset += WORD_SIZE;
                        continue;
                    }
                    Decoded::Region(at) => self.resolve_region(at)?,
                    Decoded::Builtin(index) => resolve_builtin(self.vm, index)
                        .map(Value::as_address)
                        .ok_or_else(|| {
                            SnapshotError::corrupt(format!("unknown builtin shape #{}", index))
                        })?,
                    other => {
                        return Err(SnapshotError::corrupt(format!(
                            "{:?} where the header of {} was expected",
                            other, addr
                        )));
                    }
                };
                self.vm
                    .heap
                    .write_word(addr, Value::encode_object(shape).raw());
                self.record_reference(addr, shape);

                let size = self.checked_size(addr, shape, encoded.object_type(), top)?;
                if self.mode == SnapshotMode::Builtins
                    && kind_of(&self.vm.heap, addr) == Some(ObjectKind::LineString)
                {
                    self.intern_inline_string(addr);
                }
                objects.push(addr);
                offset += round_up(size, OBJECT_ALIGNMENT);
            }
        }
        if self.pending_methods > 0 {
            return Err(SnapshotError::corrupt(format!(
                "{} method records missing",
                self.pending_methods
            )));
        }
        self.stats.objects = objects.len();
        Ok(objects)
    }

    /// Size of the object at `addr`, checked against its region and the kind its image
    /// header announced.
    fn checked_size(
        &self,
        addr: Address,
        shape: Address,
        object_type: u8,
        top: usize,
    ) -> Result<usize> {
        let heap = &self.vm.heap;
        let shape = Shape::new(heap, shape);
        if !shape.is_well_formed() {
            return Err(SnapshotError::corrupt(format!(
                "object at {} has a malformed shape",
                addr
            )));
        }
        let kind = shape.kind();
        if object_type != 0 && kind.map(|kind| kind as u8) != Some(object_type) {
            return Err(SnapshotError::corrupt(format!(
                "object at {} is a {:?}, image says type {}",
                addr, kind, object_type
            )));
        }
        let offset = addr.offset() as usize;
        let reads_own_length = !kind.map_or(false, ObjectKind::has_slot_layout);
        if reads_own_length && offset + 2 * WORD_SIZE > top {
            return Err(SnapshotError::corrupt(format!("object at {} is truncated", addr)));
        }
        if kind == Some(ObjectKind::TaggedArray) {
            let length = heap.read_word(addr.add(ARRAY_LENGTH_OFFSET));
            let fits = usize::try_from(length)
                .ok()
                .and_then(|length| length.checked_mul(WORD_SIZE))
                .and_then(|bytes| bytes.checked_add(ARRAY_DATA_OFFSET))
                .map_or(false, |size| size <= top - offset);
            if !fits {
                return Err(SnapshotError::corrupt(format!(
                    "array at {} claims {} elements",
                    addr, length
                )));
            }
        }
        let size = object_size_with(heap, shape, addr);
        if size == 0 {
            return Err(SnapshotError::ZeroSizedObject(addr));
        }
        if offset + size > top {
            return Err(SnapshotError::corrupt(format!(
                "object at {} ({} bytes) overruns its region",
                addr, size
            )));
        }
        Ok(size)
    }

    fn begin_methods(&mut self, count: usize) -> Result<()> {
        let program = self.vm.program().ok_or(SnapshotError::MissingProgram)?;
        if self.methods.len() + count > program.len() {
            return Err(SnapshotError::corrupt(format!(
                "{} method records for a program with {} methods",
                count,
                program.len()
            )));
        }
        self.pending_methods = count;
        Ok(())
    }

    /// Copies one method record into the program, filling its method array from the back.
    fn restore_method(&mut self, addr: Address) -> Result<()> {
        let method = MethodLiteral::from_bytes(self.vm.heap.read_bytes(addr, MethodLiteral::SIZE))
            .ok_or_else(|| SnapshotError::corrupt("short method record"))?;
        let program = self.vm.program_mut().ok_or(SnapshotError::MissingProgram)?;
        let slot = program.len() - 1 - self.methods.len();
        program.set_method(slot, method);
        self.methods.push(program.method_address(slot));
        self.pending_methods -= 1;
        self.stats.methods += 1;
        Ok(())
    }

    /// Builtins images carry their strings inline. The first copy of a text becomes the
    /// canonical string; later copies are redirected to it.
    fn intern_inline_string(&mut self, s: Address) {
        let vm = &mut *self.vm;
        let hash = stored_hash(&vm.heap, s);
        let mut bucket = vm.strings.lock_bucket(hash);
        let bytes = line_string_bytes(&vm.heap, s);
        match bucket.find(&vm.heap, bytes, hash) {
            Some(existing) => {
                if existing != s {
                    crate::log_if!(self.log, "[snapshot] string {} redirected to {}", s, existing);
                    self.redirects.insert(s, existing);
                }
                self.stats.strings_reused += 1;
            }
            None => {
                bucket.insert(hash, s);
                self.stats.strings_interned += 1;
            }
        }
    }

    /// Second fix-up pass over the objects listed by [`Self::fix_headers`].
    fn fix_fields(&mut self, objects: &[Address]) -> Result<()> {
        for &obj in objects {
            for slot in body_slots(&self.vm.heap, obj) {
                let encoded = EncodedRef::from_raw(self.vm.heap.read_word(slot.addr));
                match slot.kind {
                    SlotKind::Tagged => {
                        let value = self.resolve_tagged(encoded)?;
                        self.vm.heap.write_word(slot.addr, value.raw());
                        if value.is_heap_object() {
                            self.record_reference(slot.addr, value.as_address());
                        }
                    }
                    SlotKind::Native => {
                        let pointer = self.resolve_native(encoded)?;
                        self.vm.heap.write_word(slot.addr, pointer);
                    }
                    SlotKind::Double | SlotKind::Int | SlotKind::Raw => {}
                }
            }
        }
        Ok(())
    }

    fn resolve_region(&self, at: RegionRef) -> Result<Address> {
        let id = *self
            .region_map
            .get(at.region_index as usize)
            .ok_or(SnapshotError::UnknownRegion(at.region_index))?;
        if !is_aligned(at.offset as usize, OBJECT_ALIGNMENT)
            || !self.vm.heap.region(id).contains_offset(at.offset)
        {
            return Err(SnapshotError::corrupt(format!(
                "offset {:#x} is not a valid position in region {}",
                at.offset, at.region_index
            )));
        }
        let addr = Address::new(id, at.offset);
        Ok(self.redirects.get(&addr).copied().unwrap_or(addr))
    }

    fn resolve_tagged(&self, encoded: EncodedRef) -> Result<Value> {
        match encoded.decode()? {
            Decoded::Immediate(raw) => Ok(Value::from_raw(raw)),
            Decoded::Special(value) => Ok(value),
            Decoded::Region(at) => Ok(Value::encode_object(self.resolve_region(at)?)),
            Decoded::Weak(at) => Ok(Value::new_weak(self.resolve_region(at)?)),
            Decoded::String(index) => self
                .strings
                .get(index as usize)
                .map(|&s| Value::encode_object(s))
                .ok_or_else(|| SnapshotError::corrupt(format!("unknown string #{}", index))),
            Decoded::Builtin(index) => resolve_builtin(self.vm, index)
                .ok_or_else(|| SnapshotError::corrupt(format!("unknown builtin #{}", index))),
            other => Err(SnapshotError::corrupt(format!(
                "{:?} in a tagged slot",
                other
            ))),
        }
    }

    fn resolve_native(&self, encoded: EncodedRef) -> Result<u64> {
        match encoded.decode()? {
            Decoded::NullNative => Ok(0),
            Decoded::Native(index) => {
                let index = index as usize;
                if let Some(entry) = self.registry.get(index) {
                    return Ok(entry.address);
                }
                if self.methods.is_empty() && self.vm.program().is_none() {
                    return Err(SnapshotError::MissingProgram);
                }
                self.methods
                    .get(index - self.registry.len())
                    .copied()
                    .ok_or_else(|| SnapshotError::corrupt(format!("unknown native #{}", index)))
            }
            other => Err(SnapshotError::corrupt(format!(
                "{:?} in a native slot",
                other
            ))),
        }
    }

    /// The bookkeeping a write barrier would do for a store of `target` into `slot`.
    fn record_reference(&mut self, slot: Address, target: Address) {
        let heap = &mut self.vm.heap;
        let source_space = heap.space_of(slot);
        let target_space = heap.space_of(target);
        if source_space.is_general_old() && target_space.is_young() {
            heap.region_mut(slot.region()).insert_old_to_new(slot.offset());
        }
        if target_space.is_shared() {
            if !source_space.is_shared() {
                heap.region_mut(slot.region())
                    .insert_local_to_shared(slot.offset());
            }
            if heap.is_concurrent_marking() {
                heap.region_for(target).atomic_mark(target.offset());
            }
        }
    }
}

fn region_body(bytes: &[u8], at: usize, live: usize) -> Result<&[u8]> {
    let start = at + RegionHeadRecord::SIZE;
    bytes
        .get(start..start + live)
        .ok_or(SnapshotError::BufferTooSmall {
            needed: start + live,
            available: bytes.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use crate::snapshot::image::Image;
    use crate::snapshot::writer::CategoryLengths;
    use crate::snapshot::Snapshot;

    fn registry() -> NativeRegistry {
        let mut registry = NativeRegistry::new();
        registry.register("print", 0x5000);
        registry
    }

    fn region_bytes(index: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        RegionHeadRecord::new(index, body.len() as u32).write_to(&mut out);
        out.extend_from_slice(body);
        out
    }

    fn restore(image: &Image, vm: &mut Vm) -> Result<RestoreStats> {
        let registry = registry();
        Deserializer::new(vm, &registry, &SnapshotOptions::default()).deserialize(&image.view())
    }

    #[test]
    fn zero_header_ends_the_walk() {
        let objects = region_bytes(0, &[0u8; 16]);
        let image = Image {
            mode: SnapshotMode::Aot,
            lengths: CategoryLengths::new([objects.len() as u32, 0, 0, 0, 0]),
            roots: Vec::new(),
            objects,
            strings: Vec::new(),
        };
        let mut vm = Vm::bootstrap(HeapConfig::default(), &registry()).unwrap();
        let stats = restore(&image, &mut vm).unwrap();
        assert_eq!(stats.regions, 1);
        assert_eq!(stats.objects, 0);
        assert_eq!(stats.roots, 0);
    }

    #[test]
    fn region_indices_are_unique() {
        let mut objects = region_bytes(4, &[0u8; 8]);
        objects.extend(region_bytes(4, &[0u8; 8]));
        let image = Image {
            mode: SnapshotMode::Aot,
            lengths: CategoryLengths::new([16, 16, 0, 0, 0]),
            roots: Vec::new(),
            objects,
            strings: Vec::new(),
        };
        let mut vm = Vm::bootstrap(HeapConfig::default(), &registry()).unwrap();
        assert!(matches!(
            restore(&image, &mut vm),
            Err(SnapshotError::CorruptImage(_))
        ));
    }

    #[test]
    fn header_kind_must_match_the_shape() {
        let registry = registry();
        let mut vm = Vm::bootstrap(HeapConfig::default(), &registry).unwrap();
        let snapshot = Snapshot::take(
            &mut vm,
            SnapshotMode::Program,
            &registry,
            &SnapshotOptions::default(),
        )
        .unwrap_or_else(|error| panic!("{}", error));
        let mut image = snapshot.image;
        // The first General object is the global environment.
        let at = RegionHeadRecord::SIZE;
        let mut word = [0u8; 8];
        word.copy_from_slice(&image.objects[at..at + 8]);
        let header = EncodedRef::from_raw(u64::from_le_bytes(word));
        assert_eq!(header.object_type(), ObjectKind::GlobalEnv as u8);
        let forged = header.with_object_type(ObjectKind::TaggedArray as u8);
        image.objects[at..at + 8].copy_from_slice(&forged.raw().to_le_bytes());

        let mut fresh = Vm::bootstrap(HeapConfig::default(), &registry).unwrap();
        assert!(matches!(
            restore(&image, &mut fresh),
            Err(SnapshotError::CorruptImage(_))
        ));
    }

    #[test]
    fn array_length_must_fit_its_region() {
        let registry = registry();
        let mut vm = Vm::bootstrap(HeapConfig::default(), &registry).unwrap();
        let table = vm
            .new_array(&[Value::new_int(1), Value::new_int(2)])
            .unwrap();
        vm.set_aot_root(Value::encode_object(table));
        let snapshot = Snapshot::take(
            &mut vm,
            SnapshotMode::Aot,
            &registry,
            &SnapshotOptions::default(),
        )
        .unwrap_or_else(|error| panic!("{}", error));
        let mut image = snapshot.image;
        // The root table is the first General object; its length follows the header.
        let at = RegionHeadRecord::SIZE + ARRAY_LENGTH_OFFSET;
        assert_eq!(&image.objects[at..at + 8], &2u64.to_le_bytes());
        image.objects[at..at + 8].copy_from_slice(&(1u64 << 61).to_le_bytes());

        let mut fresh = Vm::bootstrap(HeapConfig::default(), &registry).unwrap();
        assert!(matches!(
            restore(&image, &mut fresh),
            Err(SnapshotError::CorruptImage(_))
        ));

        image.objects[at..at + 8].copy_from_slice(&(REGION_SIZE as u64).to_le_bytes());
        let mut fresh = Vm::bootstrap(HeapConfig::default(), &registry).unwrap();
        assert!(matches!(
            restore(&image, &mut fresh),
            Err(SnapshotError::CorruptImage(_))
        ));
    }

    #[test]
    fn builtins_images_carry_no_string_channel() {
        let image = Image {
            mode: SnapshotMode::Builtins,
            lengths: CategoryLengths::default(),
            roots: Vec::new(),
            objects: Vec::new(),
            strings: vec![0u8; 8],
        };
        let mut vm = Vm::new(HeapConfig::default());
        assert!(matches!(
            restore(&image, &mut vm),
            Err(SnapshotError::CorruptImage(_))
        ));
    }

    #[test]
    fn natives_cannot_sit_in_tagged_slots() {
        let mut vm = Vm::bootstrap(HeapConfig::default(), &registry()).unwrap();
        let registry = registry();
        let deserializer = Deserializer::new(&mut vm, &registry, &SnapshotOptions::default());
        assert!(deserializer.resolve_tagged(EncodedRef::native(0)).is_err());
        assert_eq!(
            deserializer.resolve_native(EncodedRef::native(0)).unwrap(),
            0x5000
        );
        assert_eq!(
            deserializer.resolve_native(EncodedRef::null_native()).unwrap(),
            0
        );
        assert!(matches!(
            deserializer.resolve_native(EncodedRef::native(7)),
            Err(SnapshotError::MissingProgram)
        ));
    }
}
