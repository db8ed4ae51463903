//! The image container: header, roots, category bytes and the string side-channel.
//!
//! ```text
//! "HSNP" | u32 version | u32 mode | 5 x u32 category length | u32 string channel length
//! | u32 root count | root count x u64 encoded root | category bytes | string channel
//! ```

use std::convert::{TryFrom, TryInto};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use memmap2::Mmap;

use super::category::SpaceCategory;
use super::encode::EncodedRef;
use super::writer::CategoryLengths;
use super::SnapshotMode;
use crate::error::{Result, SnapshotError};

pub const MAGIC: [u8; 4] = *b"HSNP";
pub const VERSION: u32 = 1;
const FIXED_HEADER_SIZE: usize = 4 + 4 + 4 + 4 * SpaceCategory::COUNT + 4 + 4;

/// An image built in memory by a serialization pass.
#[derive(Clone, Debug)]
pub struct Image {
    pub mode: SnapshotMode,
    pub lengths: CategoryLengths,
    pub roots: Vec<EncodedRef>,
    pub objects: Vec<u8>,
    pub strings: Vec<u8>,
}

impl Image {
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            mode: self.mode,
            lengths: self.lengths,
            roots: self.roots.clone(),
            objects: &self.objects,
            strings: &self.strings,
        }
    }

    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&(self.mode as u32).to_le_bytes())?;
        for length in self.lengths.as_array().iter() {
            out.write_all(&length.to_le_bytes())?;
        }
        out.write_all(&(self.strings.len() as u32).to_le_bytes())?;
        out.write_all(&(self.roots.len() as u32).to_le_bytes())?;
        for root in self.roots.iter() {
            out.write_all(&root.raw().to_le_bytes())?;
        }
        out.write_all(&self.objects)?;
        out.write_all(&self.strings)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            FIXED_HEADER_SIZE + self.roots.len() * 8 + self.objects.len() + self.strings.len(),
        );
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        out
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = io::BufWriter::new(File::create(path)?);
        self.write_to(&mut file)?;
        file.flush()?;
        Ok(())
    }
}

/// A borrowed image, either in memory or mapped from a file.
#[derive(Clone, Debug)]
pub struct ImageView<'a> {
    pub mode: SnapshotMode,
    pub lengths: CategoryLengths,
    pub roots: Vec<EncodedRef>,
    pub objects: &'a [u8],
    pub strings: &'a [u8],
}

struct Reader<'a> {
    bytes: &'a [u8],
    pc: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.pc..self.pc + len)
            .ok_or(SnapshotError::BufferTooSmall {
                needed: self.pc + len,
                available: self.bytes.len(),
            })?;
        self.pc += len;
        Ok(slice)
    }

    fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap_or_default()))
    }

    fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap_or_default()))
    }
}

impl<'a> ImageView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pc: 0 };
        if reader.take(4)? != &MAGIC[..] {
            return Err(SnapshotError::corrupt("bad magic"));
        }
        let version = reader.get_u32()?;
        if version != VERSION {
            return Err(SnapshotError::corrupt(format!(
                "image version {} (expected {})",
                version, VERSION
            )));
        }
        let mode = SnapshotMode::try_from(reader.get_u32()?)?;
        let mut lengths = [0u32; SpaceCategory::COUNT];
        for length in lengths.iter_mut() {
            *length = reader.get_u32()?;
        }
        let lengths = CategoryLengths::new(lengths);
        let strings_len = reader.get_u32()? as usize;
        let root_count = reader.get_u32()? as usize;
        let mut roots = Vec::with_capacity(root_count.min(bytes.len() / 8));
        for _ in 0..root_count {
            roots.push(EncodedRef::from_raw(reader.get_u64()?));
        }
        let objects = reader.take(lengths.total())?;
        let strings = reader.take(strings_len)?;
        Ok(Self {
            mode,
            lengths,
            roots,
            objects,
            strings,
        })
    }

    /// Bytes of one category.
    pub fn category(&self, category: SpaceCategory) -> &'a [u8] {
        let start: usize = SpaceCategory::ALL[..category.index()]
            .iter()
            .map(|&c| self.lengths.get(c))
            .sum();
        &self.objects[start..start + self.lengths.get(category)]
    }
}

/// An image file mapped read-only.
pub struct MappedImage {
    mmap: Mmap,
}

impl MappedImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        // The mapping is private to this process and only ever read.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    pub fn view(&self) -> Result<ImageView<'_>> {
        ImageView::parse(&self.mmap)
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Image {
        let mut lengths = CategoryLengths::default();
        lengths.set(SpaceCategory::General, 16);
        lengths.set(SpaceCategory::Huge, 8);
        Image {
            mode: SnapshotMode::Aot,
            lengths,
            roots: vec![EncodedRef::builtin(3), EncodedRef::string(0)],
            objects: (0..24).collect(),
            strings: vec![9; 8],
        }
    }

    #[test]
    fn container_layout() {
        let image = sample();
        let bytes = image.to_bytes();
        assert_eq!(&bytes[..4], b"HSNP");
        assert_eq!(bytes.len(), FIXED_HEADER_SIZE + 16 + 24 + 8);

        let view = ImageView::parse(&bytes).unwrap();
        assert_eq!(view.mode, SnapshotMode::Aot);
        assert_eq!(view.lengths, image.lengths);
        assert_eq!(view.roots, image.roots);
        assert_eq!(view.category(SpaceCategory::General), &image.objects[..16]);
        assert!(view.category(SpaceCategory::NonMovable).is_empty());
        assert_eq!(view.category(SpaceCategory::Huge), &image.objects[16..]);
        assert_eq!(view.strings, &image.strings[..]);
    }

    #[test]
    fn rejects_foreign_bytes() {
        let mut bytes = sample().to_bytes();
        assert!(ImageView::parse(&bytes[..bytes.len() - 1]).is_err());
        bytes[4] = 2;
        assert!(matches!(
            ImageView::parse(&bytes),
            Err(SnapshotError::CorruptImage(_))
        ));
        assert!(ImageView::parse(b"ELF\x7f").is_err());
    }

    #[test]
    fn file_round_trip() {
        let image = sample();
        let path = std::env::temp_dir().join(format!("heapsnap-image-{}.bin", std::process::id()));
        image.write_to_file(&path).unwrap();
        let mapped = MappedImage::open(&path).unwrap();
        assert_eq!(mapped.len(), image.to_bytes().len());
        let view = mapped.view().unwrap();
        assert_eq!(view.objects, &image.objects[..]);
        drop(mapped);
        std::fs::remove_file(&path).unwrap();
    }
}
