//! # bhl — BlockHashLoc recovery engine
//!
//! Reconstructs a file from the raw bytes of a damaged or fragmented storage
//! medium using only a small side-car index (the BHL container) produced
//! earlier from the intact file. The original file is logically partitioned
//! into fixed-size blocks, each fingerprinted with SHA-256; the side-car
//! records the ordered digests plus enough metadata to verify and restore.
//! Recovery scans any byte stream, sliding a window at a configurable step,
//! and emplaces each matched window at its original block offset.
//!
//! Format guarantees:
//! - All multi-byte integers are big-endian; never negotiated
//! - The container is read forward in a single pass: magic, version, sizes,
//!   metadata TLVs, digests, global digest, optional compressed tail
//! - The global digest covers every block digest in order; a corrupt or
//!   truncated digest region is detected before any block is trusted
//! - The hash index is a trait (`HashIndexStore`) with an in-memory and a
//!   SQLite-backed implementation; the scanner and reassembler are agnostic
//!   to which one is in use
//!
//! This crate is the index/scan/reassembly engine. Argument parsing, glob
//! expansion, and progress printing live in the `bhlmake`/`bhlreco`
//! binaries; the library only deals in resolved [`config::EncodeConfig`] /
//! [`config::RecoverConfig`] objects and exposes a progress callback.
//!
//! Non-goals: no error-correcting code, no deduplication across distinct
//! source files, no encryption, no recovery of blocks whose exact bytes are
//! not present verbatim in any scanned source.

pub mod bhl_format;
pub mod block_hasher;
pub mod config;
pub mod error;
pub mod hash_index;
pub mod reassembler;
pub mod scanner;
pub mod source_image;

// Flat re-exports for the most common types.
pub use bhl_format::{BhlFile, BhlReader, BhlWriter, Metadata};
pub use block_hasher::{BlockHasher, HashedBlock};
pub use config::{EncodeConfig, RecoverConfig};
pub use error::{BhlError, Result};
pub use hash_index::{FileInfo, HashIndexEntry, HashIndexStore, MemoryHashIndex, Placement};
pub use reassembler::{Reassembler, ReassemblyReport};
pub use scanner::{gcd_of, Scanner};
pub use source_image::SourceImage;

use std::path::{Path, PathBuf};

// ── Encoder orchestration ───────────────────────────────────────────────────

/// Outcome of encoding one input file.
pub struct EncodeOutcome {
    pub input: PathBuf,
    pub bhl_path: PathBuf,
    pub result: Result<()>,
}

/// Encode every file named in `config.inputs`, writing `<name>.bhl` next to
/// the input or under `config.dest_dir`. Stops at the first failure unless
/// `config.continue_on_error` is set; either way every outcome produced so
/// far is returned.
pub fn encode_all(config: &config::EncodeConfig) -> Vec<EncodeOutcome> {
    let mut outcomes = Vec::with_capacity(config.inputs.len());
    for input in &config.inputs {
        let bhl_path = resolve_bhl_path(input, config.dest_dir.as_deref());
        let result = BhlWriter::encode_file(input, &bhl_path, config.block_size);
        let failed = result.is_err();
        outcomes.push(EncodeOutcome { input: input.clone(), bhl_path, result });
        if failed && !config.continue_on_error {
            break;
        }
    }
    outcomes
}

fn resolve_bhl_path(input: &Path, dest_dir: Option<&Path>) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|n| {
            let mut n = n.to_os_string();
            n.push(".bhl");
            n
        })
        .unwrap_or_else(|| std::ffi::OsString::from("output.bhl"));

    match dest_dir {
        Some(dir) if dir.is_dir() => dir.join(file_name),
        _ => input.with_file_name(file_name),
    }
}

// ── Test mode ────────────────────────────────────────────────────────────────

/// Outcome of validating one BHL file end-to-end through [`BhlReader`].
pub struct TestOutcome {
    pub path: PathBuf,
    pub result: Result<BhlFile>,
}

/// Test-only mode: the scanner and reassembler are skipped. Every supplied
/// BHL passes through `BhlReader::read`; overall success requires all to
/// validate.
pub fn test_bhl_files(paths: &[PathBuf]) -> Vec<TestOutcome> {
    paths
        .iter()
        .map(|path| TestOutcome { path: path.clone(), result: BhlReader::read_file(path) })
        .collect()
}

// ── Recovery orchestration ──────────────────────────────────────────────────

/// One loaded BHL file, kept alongside its assigned `file_id` and stem (used
/// to name the output when no `FNM` metadata is present).
pub struct LoadedBhl {
    pub file_id: u32,
    pub stem: String,
    pub bhl: BhlFile,
}

/// Load every BHL in `paths`, registering each one's scannable digests and
/// metadata into `index`. Returns the loaded files in load order along with
/// the set of distinct block sizes seen (used to size the scanner's window
/// and default step).
pub fn load_bhl_files<S: HashIndexStore>(
    paths: &[PathBuf],
    index: &mut S,
) -> Result<(Vec<LoadedBhl>, Vec<u32>)> {
    let mut loaded = Vec::with_capacity(paths.len());
    let mut block_sizes = Vec::new();

    for (i, path) in paths.iter().enumerate() {
        let file_id = i as u32;
        let bhl = BhlReader::read_file(path)?;

        if !block_sizes.contains(&bhl.block_size) {
            block_sizes.push(bhl.block_size);
        }

        let entries: Vec<(u64, [u8; 32])> = bhl
            .scannable_digests()
            .iter()
            .enumerate()
            .map(|(idx, d)| (idx as u64, *d))
            .collect();
        index.add_entries(file_id, &entries)?;

        index.set_file_info(
            file_id,
            FileInfo {
                block_size: bhl.block_size,
                file_size: bhl.file_size,
                filename: bhl.metadata.filename().map(|s| s.to_string()),
                mtime: bhl.metadata.mtime(),
                tail_blob: bhl.tail_blob.clone(),
                global_digest: bhl.global_digest,
            },
        )?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("file_{file_id}"));

        loaded.push(LoadedBhl { file_id, stem, bhl });
    }

    Ok((loaded, block_sizes))
}

/// Outcome of reassembling one loaded BHL file. `result` is `Err` for a
/// non-fatal per-file condition (incomplete recovery, hash mismatch) —
/// recovery of the remaining files still proceeds; the caller decides the
/// overall exit status.
pub struct RecoverOutcome {
    pub output_path: PathBuf,
    pub result: Result<ReassemblyReport>,
}

/// Run a full recovery: load BHLs, scan images, reassemble every loaded
/// file. `progress`, if given, is forwarded to the scanner.
pub fn recover<'p, S: HashIndexStore>(
    config: &config::RecoverConfig,
    index: &mut S,
    progress: Option<&'p mut scanner::ProgressFn<'p>>,
) -> Result<Vec<RecoverOutcome>> {
    let (loaded, block_sizes) = load_bhl_files(&config.bhl_files, index)?;

    let total_placeable: usize = loaded.iter().map(|f| f.bhl.scannable_digests().len()).sum();

    let mut sources = Vec::with_capacity(config.images.len());
    for (i, path) in config.images.iter().enumerate() {
        let (source, _file) = SourceImage::open(i as u32, path)?;
        sources.push(source);
    }

    let mut scanner: Scanner<'p> = Scanner::new(block_sizes).with_offset(config.offset);
    if let Some(step) = config.step {
        scanner = scanner.with_step(step);
    }
    scanner.progress = progress;
    scanner.scan(&sources, index, total_placeable)?;
    index.checkpoint()?;

    std::fs::create_dir_all(&config.dest_dir)?;

    let mut outcomes = Vec::with_capacity(loaded.len());
    for loaded_file in &loaded {
        let info = index.file_info(loaded_file.file_id)?.ok_or_else(|| {
            BhlError::Malformed(format!("missing file_info for file_id {}", loaded_file.file_id))
        })?;
        let output_path = Reassembler::resolve_output_path(&info, &config.dest_dir, &loaded_file.stem);
        let result = Reassembler::reassemble(
            loaded_file.file_id,
            &info,
            index,
            &sources,
            &config.dest_dir,
            &loaded_file.stem,
        );
        outcomes.push(RecoverOutcome { output_path, result });
    }

    Ok(outcomes)
}
