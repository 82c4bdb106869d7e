//! Reassembles a file from the claims recorded in a [`HashIndexStore`].

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::bhl_format::decompress_tail;
use crate::error::{BhlError, Result};
use crate::hash_index::{FileInfo, HashIndexStore};
use crate::source_image::SourceImage;

/// Outcome of fully reassembling one BHL file (every scannable block placed
/// and the recomputed digest matched). Incomplete or corrupt reassembly is
/// reported as an `Err` instead — see [`Reassembler::reassemble`].
#[derive(Debug)]
pub struct ReassemblyReport {
    pub output_path: PathBuf,
    pub total_blocks: usize,
    pub placed_blocks: usize,
}

pub struct Reassembler;

impl Reassembler {
    /// Where `reassemble` will write `file_id`'s output, given `info` and
    /// the stem used to name it when `info.filename` is absent.
    pub fn resolve_output_path(info: &FileInfo, dest_dir: &Path, bhl_stem: &str) -> PathBuf {
        let filename = info
            .filename
            .clone()
            .unwrap_or_else(|| format!("{bhl_stem}.out"));
        dest_dir.join(filename)
    }

    /// Reassemble `file_id` using `info` and the claims in `index`, writing
    /// the output under `dest_dir`. `bhl_stem` is used to name the output
    /// when `info.filename` is absent (`"<stem>.out"`).
    ///
    /// Returns `Err(BhlError::IncompleteRecovery)` if any scannable block
    /// went unplaced — if at least one block was placed, the output is
    /// still written first, with unplaced blocks left as sparse zero holes;
    /// if none were placed at all and the file is bigger than one block,
    /// nothing is written. Returns `Err(BhlError::HashMismatch)` if every
    /// scannable block was placed but the recomputed global digest still
    /// disagrees with the one stored in the BHL.
    pub fn reassemble<S: HashIndexStore>(
        file_id: u32,
        info: &FileInfo,
        index: &S,
        sources: &[SourceImage],
        dest_dir: &Path,
        bhl_stem: &str,
    ) -> Result<ReassemblyReport> {
        let output_path = Self::resolve_output_path(info, dest_dir, bhl_stem);

        let total_blocks = total_block_count(info);
        let scannable_blocks = scannable_block_count(info);
        let placements = index.iter_placements(file_id)?;

        if placements.is_empty() && scannable_blocks > 0 {
            return Err(BhlError::IncompleteRecovery { missing: scannable_blocks, total: total_blocks });
        }

        let source_by_id: std::collections::HashMap<u32, &SourceImage> =
            sources.iter().map(|s| (s.source_id, s)).collect();

        let mut out = File::create(&output_path)?;
        let mut global_hasher = Sha256::new();
        let mut open_sources: std::collections::HashMap<u32, File> = std::collections::HashMap::new();

        for placement in &placements {
            let src_file = match open_sources.get_mut(&placement.source_id) {
                Some(f) => f,
                None => {
                    let src = source_by_id.get(&placement.source_id).ok_or_else(|| {
                        BhlError::Malformed(format!(
                            "placement references unknown source {}",
                            placement.source_id
                        ))
                    })?;
                    let f = File::open(&src.path)?;
                    open_sources.insert(placement.source_id, f);
                    open_sources.get_mut(&placement.source_id).unwrap()
                }
            };

            src_file.seek(SeekFrom::Start(placement.position))?;
            let mut block = vec![0u8; info.block_size as usize];
            src_file.read_exact(&mut block)?;

            out.seek(SeekFrom::Start(placement.block_index * info.block_size as u64))?;
            out.write_all(&block)?;

            let digest: [u8; 32] = Sha256::digest(&block).into();
            global_hasher.update(digest);
        }

        if let Some(blob) = &info.tail_blob {
            let tail_bytes = decompress_tail(blob)?;
            let tail_offset = (total_blocks as u64 - 1) * info.block_size as u64;
            out.seek(SeekFrom::Start(tail_offset))?;
            out.write_all(&tail_bytes)?;
            let digest: [u8; 32] = Sha256::digest(&tail_bytes).into();
            global_hasher.update(digest);
        }
        out.flush()?;
        drop(out);

        if let Some(mtime) = info.mtime {
            set_mtime(&output_path, mtime);
        }

        let placed_blocks = placements.len() + if info.tail_blob.is_some() { 1 } else { 0 };

        if placements.len() < scannable_blocks {
            return Err(BhlError::IncompleteRecovery {
                missing: scannable_blocks - placements.len(),
                total: total_blocks,
            });
        }

        let computed: [u8; 32] = global_hasher.finalize().into();
        if computed != info.global_digest {
            return Err(BhlError::HashMismatch);
        }

        Ok(ReassemblyReport { output_path, total_blocks, placed_blocks })
    }
}

fn total_block_count(info: &FileInfo) -> usize {
    if info.file_size == 0 {
        0
    } else {
        ((info.file_size + info.block_size as u64 - 1) / info.block_size as u64) as usize
    }
}

fn scannable_block_count(info: &FileInfo) -> usize {
    let total = total_block_count(info);
    if info.tail_blob.is_some() {
        total.saturating_sub(1)
    } else {
        total
    }
}

fn set_mtime(path: &Path, unix_secs: u64) {
    use std::time::{Duration, UNIX_EPOCH};
    let mtime = UNIX_EPOCH + Duration::from_secs(unix_secs);
    if let Ok(file) = File::options().write(true).open(path) {
        let _ = file.set_modified(mtime);
    }
}
