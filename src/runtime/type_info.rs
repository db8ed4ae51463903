//! Object layouts used by the heap walkers and the runtime.
//!
//! Word 0 of every object is its header: a tagged pointer to a type descriptor ("shape"),
//! itself a heap object. Sizes and slot kinds of an object are derived from its shape
//! alone, so a walker only needs the header to step over an object.

use wtf_rs::bitfield::BitField;
use wtf_rs::round_up;

use super::value::Value;
use crate::heap::address::Address;
use crate::heap::constants::{OBJECT_ALIGNMENT, WORD_SIZE};
use crate::heap::trace::{Slot, Tracer};
use crate::heap::Heap;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ObjectKind {
    Shape = 1,
    Plain = 2,
    TaggedArray = 3,
    LineString = 4,
    TreeString = 5,
    GlobalEnv = 6,
    JobQueue = 7,
}

impl ObjectKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => ObjectKind::Shape,
            2 => ObjectKind::Plain,
            3 => ObjectKind::TaggedArray,
            4 => ObjectKind::LineString,
            5 => ObjectKind::TreeString,
            6 => ObjectKind::GlobalEnv,
            7 => ObjectKind::JobQueue,
            _ => return None,
        })
    }

    pub fn is_string(self) -> bool {
        matches!(self, ObjectKind::LineString | ObjectKind::TreeString)
    }

    /// Kinds whose body is described by the shape's slot layout.
    pub fn has_slot_layout(self) -> bool {
        matches!(
            self,
            ObjectKind::Plain | ObjectKind::GlobalEnv | ObjectKind::JobQueue
        )
    }
}

/// Storage representation of one body word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum SlotKind {
    /// A [`Value`].
    Tagged = 0,
    /// A pointer outside the managed heap, such as a runtime entry point.
    Native = 1,
    Double = 2,
    Int = 3,
    /// Untyped payload, never interpreted by walkers.
    Raw = 4,
}

impl SlotKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => SlotKind::Tagged,
            1 => SlotKind::Native,
            2 => SlotKind::Double,
            3 => SlotKind::Int,
            4 => SlotKind::Raw,
            _ => return None,
        })
    }
}

pub const HEADER_OFFSET: usize = 0;

pub const SHAPE_INFO_OFFSET: usize = 8;
pub const SHAPE_PROTOTYPE_OFFSET: usize = 16;
pub const SHAPE_LAYOUT_OFFSET: usize = 24;
pub type ShapeKindBits = BitField<0, 8>;
pub type SlotCountBits = BitField<8, 24>;

pub const ARRAY_LENGTH_OFFSET: usize = 8;
pub const ARRAY_DATA_OFFSET: usize = 16;

pub const STRING_INFO_OFFSET: usize = 8;
pub const LINE_STRING_DATA_OFFSET: usize = 16;
pub const TREE_STRING_LEFT_OFFSET: usize = 16;
pub const TREE_STRING_RIGHT_OFFSET: usize = 24;
pub const TREE_STRING_SIZE: usize = 32;
pub type StringLengthBits = BitField<0, 32>;
pub type StringHashBits = BitField<32, 32>;

pub const fn shape_size(slot_count: usize) -> usize {
    SHAPE_LAYOUT_OFFSET + round_up(slot_count, OBJECT_ALIGNMENT)
}

pub const fn slotted_object_size(slot_count: usize) -> usize {
    WORD_SIZE + slot_count * WORD_SIZE
}

pub const fn slot_offset(index: usize) -> usize {
    WORD_SIZE + index * WORD_SIZE
}

pub const fn array_size(length: usize) -> usize {
    ARRAY_DATA_OFFSET + length * WORD_SIZE
}

pub const fn line_string_size(length: usize) -> usize {
    LINE_STRING_DATA_OFFSET + round_up(length, OBJECT_ALIGNMENT)
}

/// Read-only view of a type descriptor.
#[derive(Clone, Copy)]
pub struct Shape<'a> {
    heap: &'a Heap,
    addr: Address,
}

impl<'a> Shape<'a> {
    pub fn new(heap: &'a Heap, addr: Address) -> Self {
        Self { heap, addr }
    }

    pub fn addr(&self) -> Address {
        self.addr
    }

    fn info(&self) -> u64 {
        self.heap.read_word(self.addr.add(SHAPE_INFO_OFFSET))
    }

    /// Kind of the objects this shape describes.
    pub fn kind(&self) -> Option<ObjectKind> {
        ObjectKind::from_u8(ShapeKindBits::decode(self.info()) as u8)
    }

    pub fn slot_count(&self) -> usize {
        SlotCountBits::decode(self.info()) as usize
    }

    pub fn prototype(&self) -> Value {
        Value::from_raw(self.heap.read_word(self.addr.add(SHAPE_PROTOTYPE_OFFSET)))
    }

    pub fn layout(&self) -> &'a [u8] {
        self.heap
            .read_bytes(self.addr.add(SHAPE_LAYOUT_OFFSET), self.slot_count())
    }

    /// True if the shape's own words can be trusted by [`object_size`] and [`visit_body`]:
    /// its kind is known and its layout bytes lie inside its region.
    pub fn is_well_formed(&self) -> bool {
        let region = match self.heap.try_region(self.addr.region()) {
            Some(region) => region,
            None => return false,
        };
        let start = self.addr.offset() as usize;
        if start + SHAPE_LAYOUT_OFFSET > region.top() {
            return false;
        }
        if self.kind().is_none() {
            return false;
        }
        if start + shape_size(self.slot_count()) > region.top() {
            return false;
        }
        self.layout().iter().all(|&raw| SlotKind::from_u8(raw).is_some())
    }
}

pub fn header_of(heap: &Heap, obj: Address) -> Value {
    Value::from_raw(heap.read_word(obj.add(HEADER_OFFSET)))
}

pub fn shape_of(heap: &Heap, obj: Address) -> Shape<'_> {
    Shape::new(heap, header_of(heap, obj).as_address())
}

pub fn kind_of(heap: &Heap, obj: Address) -> Option<ObjectKind> {
    shape_of(heap, obj).kind()
}

/// Size in bytes of `obj`, or 0 if its shape does not describe a known kind.
pub fn object_size(heap: &Heap, obj: Address) -> usize {
    object_size_with(heap, shape_of(heap, obj), obj)
}

/// Size in bytes of `obj` as described by `shape`.
pub fn object_size_with(heap: &Heap, shape: Shape<'_>, obj: Address) -> usize {
    match shape.kind() {
        Some(ObjectKind::Shape) => {
            shape_size(SlotCountBits::decode(heap.read_word(obj.add(SHAPE_INFO_OFFSET))) as usize)
        }
        Some(ObjectKind::Plain) | Some(ObjectKind::GlobalEnv) | Some(ObjectKind::JobQueue) => {
            slotted_object_size(shape.slot_count())
        }
        Some(ObjectKind::TaggedArray) => {
            array_size(heap.read_word(obj.add(ARRAY_LENGTH_OFFSET)) as usize)
        }
        Some(ObjectKind::LineString) => line_string_size(StringLengthBits::decode(
            heap.read_word(obj.add(STRING_INFO_OFFSET)),
        ) as usize),
        Some(ObjectKind::TreeString) => TREE_STRING_SIZE,
        None => 0,
    }
}

/// Reports every non-raw body slot of `obj`, in address order. The header is not reported.
pub fn visit_body(heap: &Heap, obj: Address, tracer: &mut dyn Tracer) {
    let shape = shape_of(heap, obj);
    match shape.kind() {
        Some(ObjectKind::Shape) => {
            tracer.trace(Slot::new(obj.add(SHAPE_PROTOTYPE_OFFSET), SlotKind::Tagged));
        }
        Some(ObjectKind::Plain) | Some(ObjectKind::GlobalEnv) | Some(ObjectKind::JobQueue) => {
            for (index, &raw) in shape.layout().iter().enumerate() {
                match SlotKind::from_u8(raw) {
                    Some(SlotKind::Raw) | None => {}
                    Some(kind) => tracer.trace(Slot::new(obj.add(slot_offset(index)), kind)),
                }
            }
        }
        Some(ObjectKind::TaggedArray) => {
            let length = heap.read_word(obj.add(ARRAY_LENGTH_OFFSET)) as usize;
            for index in 0..length {
                tracer.trace(Slot::new(
                    obj.add(ARRAY_DATA_OFFSET + index * WORD_SIZE),
                    SlotKind::Tagged,
                ));
            }
        }
        Some(ObjectKind::TreeString) => {
            tracer.trace(Slot::new(obj.add(TREE_STRING_LEFT_OFFSET), SlotKind::Tagged));
            tracer.trace(Slot::new(obj.add(TREE_STRING_RIGHT_OFFSET), SlotKind::Tagged));
        }
        Some(ObjectKind::LineString) | None => {}
    }
}

/// Collects the body slots of `obj`.
pub fn body_slots(heap: &Heap, obj: Address) -> Vec<Slot> {
    let mut slots = Vec::new();
    visit_body(heap, obj, &mut slots);
    slots
}
