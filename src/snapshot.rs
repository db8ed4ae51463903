//! Heap snapshots: copying a reachable object graph into a self-contained image and
//! rebuilding it inside another heap.
//!
//! ```text
//! Vm ── RootSet ──> Serializer ──> LocalSpaces ──> write_spaces ──> Image
//! Image ──> ImageView ──> Deserializer ──> Vm
//! ```
use std::convert::TryFrom;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub mod category;
pub mod deserializer;
pub mod encode;
pub mod env;
pub mod flatten;
pub mod head;
pub mod image;
pub mod local_space;
pub mod roots;
pub mod serializer;
pub mod strings;
pub mod writer;

use self::deserializer::{Deserializer, RestoreStats};
use self::image::{Image, ImageView};
use self::roots::RootSet;
use self::serializer::{Serializer, SnapshotStats};
use crate::error::{Result, SnapshotError};
use crate::runtime::native::NativeRegistry;
use crate::runtime::vm::Vm;

/// Upper bound on the bytes a single pass may copy into local spaces.
pub const DEFAULT_LOCAL_SPACE_LIMIT: usize = 256 * 1024 * 1024;

/// What a pass captures and how it treats strings, builtins and natives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum SnapshotMode {
    /// The runtime's own builtin objects. Everything is copied, strings included.
    Builtins = 0,
    /// A program's global environment and job queue, on top of an existing builtins heap.
    Program = 1,
    /// The table of ahead-of-time compiled constants.
    Aot = 2,
}

impl TryFrom<u32> for SnapshotMode {
    type Error = SnapshotError;

    fn try_from(raw: u32) -> Result<Self> {
        match raw {
            0 => Ok(SnapshotMode::Builtins),
            1 => Ok(SnapshotMode::Program),
            2 => Ok(SnapshotMode::Aot),
            _ => Err(SnapshotError::corrupt(format!("unknown snapshot mode {}", raw))),
        }
    }
}

impl FromStr for SnapshotMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_lowercase().as_str() {
            "builtins" => Ok(SnapshotMode::Builtins),
            "program" => Ok(SnapshotMode::Program),
            "aot" => Ok(SnapshotMode::Aot),
            _ => Err(format!(
                "unknown snapshot mode `{}` (expected builtins, program or aot)",
                s
            )),
        }
    }
}

impl fmt::Display for SnapshotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SnapshotMode::Builtins => "builtins",
            SnapshotMode::Program => "program",
            SnapshotMode::Aot => "aot",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SnapshotOptions {
    /// Trace every copied and relocated object at debug level.
    pub log: bool,
    /// Flatten reachable ropes in the live heap before serializing.
    pub flatten_ropes: bool,
    pub local_space_limit: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            log: false,
            flatten_ropes: false,
            local_space_limit: DEFAULT_LOCAL_SPACE_LIMIT,
        }
    }
}

pub struct Snapshot {
    pub image: Image,
    pub stats: SnapshotStats,
}

impl Snapshot {
    /// Serializes the roots `mode` selects. The heap is only written to when
    /// `options.flatten_ropes` asks for the flattening pre-pass.
    pub fn take(
        vm: &mut Vm,
        mode: SnapshotMode,
        registry: &NativeRegistry,
        options: &SnapshotOptions,
    ) -> Result<Self> {
        let roots = RootSet::collect(vm, mode);
        if options.flatten_ropes {
            let flattened = flatten::flatten_reachable_ropes(vm, &roots)?;
            log::debug!("[snapshot] flattened {} ropes before serializing", flattened);
        }
        let (image, stats) = Serializer::new(vm, mode, registry, options).serialize(&roots)?;
        Ok(Self { image, stats })
    }

    /// Rebuilds `image` inside `vm`. Program images need `vm` to carry the program their
    /// method records belong to.
    pub fn restore(
        image: &ImageView<'_>,
        vm: &mut Vm,
        registry: &NativeRegistry,
        options: &SnapshotOptions,
    ) -> Result<RestoreStats> {
        Deserializer::new(vm, registry, options).deserialize(image)
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        self.image.write_to_file(path)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.image.to_bytes()
    }
}
