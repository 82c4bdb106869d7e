//! Resolved configuration objects the CLI binaries hand to the core engine.
//! Argument parsing, glob expansion, and progress printing stay in the
//! binaries; the library only ever sees these plain structs.

use std::path::PathBuf;

/// Configuration for encoding one or more files into BHL side-cars.
#[derive(Debug, Clone)]
pub struct EncodeConfig {
    pub inputs: Vec<PathBuf>,
    pub dest_dir: Option<PathBuf>,
    pub block_size: u32,
    /// Continue past per-file failures instead of aborting on the first.
    pub continue_on_error: bool,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            dest_dir: None,
            block_size: 512,
            continue_on_error: false,
        }
    }
}

/// Configuration for a recovery run.
#[derive(Debug, Clone)]
pub struct RecoverConfig {
    pub images: Vec<PathBuf>,
    pub bhl_files: Vec<PathBuf>,
    pub dest_dir: PathBuf,
    /// `None` for an ephemeral in-memory index; `Some(":memory:")` is also
    /// accepted and treated identically.
    pub db_path: Option<String>,
    pub offset: u64,
    pub step: Option<u32>,
    /// Validate-only mode: BHLReader every supplied BHL, no scanning.
    pub test_only: bool,
}

impl Default for RecoverConfig {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            bhl_files: Vec::new(),
            dest_dir: PathBuf::from("."),
            db_path: None,
            offset: 0,
            step: None,
            test_only: false,
        }
    }
}
