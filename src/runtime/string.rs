//! Flat ("line") and rope ("tree") strings.

use super::type_info::*;
use super::value::Value;
use crate::heap::address::Address;
use crate::heap::Heap;

/// Hash stored in every string's info word.
pub fn string_hash(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |hash, &b| hash.wrapping_mul(31).wrapping_add(b as u32))
}

pub fn string_info(length: u32, hash: u32) -> u64 {
    StringLengthBits::encode(length as u64) | StringHashBits::encode(hash as u64)
}

pub fn string_length(heap: &Heap, s: Address) -> usize {
    StringLengthBits::decode(heap.read_word(s.add(STRING_INFO_OFFSET))) as usize
}

pub fn stored_hash(heap: &Heap, s: Address) -> u32 {
    StringHashBits::decode(heap.read_word(s.add(STRING_INFO_OFFSET))) as u32
}

/// Contents of a line string.
pub fn line_string_bytes(heap: &Heap, s: Address) -> &[u8] {
    heap.read_bytes(s.add(LINE_STRING_DATA_OFFSET), string_length(heap, s))
}

/// Writes the body of a line string into memory already holding its header.
pub fn init_line_string(heap: &mut Heap, s: Address, bytes: &[u8], hash: u32) {
    heap.write_word(s.add(STRING_INFO_OFFSET), string_info(bytes.len() as u32, hash));
    heap.write_bytes(s.add(LINE_STRING_DATA_OFFSET), bytes);
}

pub fn tree_left(heap: &Heap, s: Address) -> Value {
    Value::from_raw(heap.read_word(s.add(TREE_STRING_LEFT_OFFSET)))
}

pub fn tree_right(heap: &Heap, s: Address) -> Value {
    Value::from_raw(heap.read_word(s.add(TREE_STRING_RIGHT_OFFSET)))
}

/// The flat string backing a rope that has already been flattened in place, i.e. whose
/// left side is a line string holding the whole text and whose right side is empty.
pub fn flattened_target(heap: &Heap, s: Address) -> Option<Address> {
    if kind_of(heap, s) != Some(ObjectKind::TreeString) {
        return None;
    }
    let left = tree_left(heap, s);
    let right = tree_right(heap, s);
    if !left.is_cell() || !right.is_cell() {
        return None;
    }
    let (left, right) = (left.as_address(), right.as_address());
    if kind_of(heap, left) == Some(ObjectKind::LineString)
        && kind_of(heap, right) == Some(ObjectKind::LineString)
        && string_length(heap, right) == 0
        && string_length(heap, left) == string_length(heap, s)
    {
        Some(left)
    } else {
        None
    }
}

/// Full text of a line or tree string. Ropes are walked left to right without recursion.
pub fn string_content(heap: &Heap, s: Address) -> Vec<u8> {
    let mut out = Vec::with_capacity(string_length(heap, s));
    let mut stack = vec![s];
    while let Some(current) = stack.pop() {
        match kind_of(heap, current) {
            Some(ObjectKind::LineString) => out.extend_from_slice(line_string_bytes(heap, current)),
            Some(ObjectKind::TreeString) => {
                let right = tree_right(heap, current);
                let left = tree_left(heap, current);
                if right.is_cell() {
                    stack.push(right.as_address());
                }
                if left.is_cell() {
                    stack.push(left.as_address());
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable() {
        assert_eq!(string_hash(b""), 0);
        assert_eq!(string_hash(b"a"), 97);
        assert_eq!(string_hash(b"ab"), 97 * 31 + 98);
    }

    #[test]
    fn info_word() {
        let info = string_info(5, 0xdead_beef);
        assert_eq!(StringLengthBits::decode(info), 5);
        assert_eq!(StringHashBits::decode(info), 0xdead_beef);
    }
}
