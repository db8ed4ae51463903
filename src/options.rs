use std::{num::ParseIntError, path::PathBuf};

use structopt::StructOpt;

use crate::heap::constants::DEFAULT_MAX_HEAP_SIZE;
use crate::heap::HeapConfig;
use crate::snapshot::{SnapshotMode, SnapshotOptions, DEFAULT_LOCAL_SPACE_LIMIT};

/// Parses sizes such as `512`, `64KB` or `2GB`.
pub fn parse_size_from_str(s: &str) -> Result<usize, ParseIntError> {
    let s = s.to_lowercase();
    let (number, unit) = s.split_at(s.find(|c: char| !c.is_digit(10)).unwrap_or(s.len()));
    let multiplier = match unit {
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        _ => 1,
    };

    number.parse::<usize>().map(|x| x * multiplier)
}

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "heapsnap",
    about = "Snapshot a VM heap and load the image back into a fresh VM"
)]
pub struct Options {
    #[structopt(
        long = "mode",
        default_value = "program",
        help = "What to snapshot: builtins, program or aot"
    )]
    pub mode: SnapshotMode,
    #[structopt(
        short = "o",
        long = "out",
        parse(from_os_str),
        default_value = "heap.snap",
        help = "Image file to write"
    )]
    pub out: PathBuf,
    #[structopt(
        long = "heap-size",
        help = "Set maximum heap size (default 512MB)",
        default_value = "512MB",
        parse(try_from_str = parse_size_from_str)
    )]
    pub heap_size: usize,
    #[structopt(
        long = "local-space-limit",
        help = "Set how many bytes one snapshot may copy (default 256MB)",
        default_value = "256MB",
        parse(try_from_str = parse_size_from_str)
    )]
    pub local_space_limit: usize,
    #[structopt(
        long = "flatten-ropes",
        help = "Flatten reachable ropes in the live heap before serializing"
    )]
    pub flatten_ropes: bool,
    #[structopt(short = "v", long = "verbose", help = "Trace every copied object")]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: SnapshotMode::Program,
            out: PathBuf::from("heap.snap"),
            heap_size: DEFAULT_MAX_HEAP_SIZE,
            local_space_limit: DEFAULT_LOCAL_SPACE_LIMIT,
            flatten_ropes: false,
            verbose: false,
        }
    }
}

impl Options {
    pub fn with_mode(mut self, mode: SnapshotMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_heap_size(mut self, size: usize) -> Self {
        self.heap_size = size;
        self
    }

    pub fn with_flatten_ropes(mut self, enable: bool) -> Self {
        self.flatten_ropes = enable;
        self
    }

    pub fn with_verbose(mut self, enable: bool) -> Self {
        self.verbose = enable;
        self
    }

    pub fn heap_config(&self) -> HeapConfig {
        HeapConfig {
            max_heap_size: self.heap_size,
        }
    }

    pub fn snapshot_options(&self) -> SnapshotOptions {
        SnapshotOptions {
            log: self.verbose,
            flatten_ropes: self.flatten_ropes,
            local_space_limit: self.local_space_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(parse_size_from_str("512"), Ok(512));
        assert_eq!(parse_size_from_str("64KB"), Ok(64 * 1024));
        assert_eq!(parse_size_from_str("2mb"), Ok(2 * 1024 * 1024));
        assert!(parse_size_from_str("lots").is_err());
    }

    #[test]
    fn command_line() {
        let options = Options::from_iter(&[
            "heapsnap",
            "--mode",
            "aot",
            "--heap-size",
            "64MB",
            "--flatten-ropes",
            "-o",
            "out.snap",
        ]);
        assert_eq!(options.mode, SnapshotMode::Aot);
        assert_eq!(options.heap_config().max_heap_size, 64 * 1024 * 1024);
        assert_eq!(options.out, PathBuf::from("out.snap"));
        let snapshot = options.snapshot_options();
        assert!(snapshot.flatten_ropes);
        assert!(!snapshot.log);
        assert_eq!(snapshot.local_space_limit, DEFAULT_LOCAL_SPACE_LIMIT);
    }
}
