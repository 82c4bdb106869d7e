//! The recovery scanner — slides a window across each source image and hands
//! matches to the [`HashIndexStore`].
//!
//! # How it works
//!
//! For every loaded BHL, the caller has already registered its scannable
//! digests (via `HashIndexStore::add_entries`) for every distinct block size
//! present. The scanner reads each [`SourceImage`] sequentially, and at every
//! `step`-aligned position hashes the first `b` bytes of the window for each
//! distinct block size `b`, then calls `claim`. Once every placeable entry
//! has a placement, the scan stops — no further reads occur from any source.
//!
//! # Ordering
//!
//! Within one source, positions are visited in ascending order, so the first
//! matching window wins. Sources are scanned one at a time in input order;
//! this crate does not parallelize at source granularity (the reference
//! model is single-threaded cooperative, per the design notes), but the
//! `claim` contract on [`HashIndexStore`] is written to support it.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::hash_index::HashIndexStore;
use crate::source_image::SourceImage;

/// At least 1 MiB, per the buffered-sequential-reads resource model.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

pub type ProgressFn<'a> = dyn FnMut(u64 /* bytes scanned */, usize /* blocks placed */) + 'a;

/// Compute the greatest common divisor of a set of block sizes — the
/// recommended default scan step.
pub fn gcd_of(sizes: &[u32]) -> u32 {
    fn gcd(a: u32, b: u32) -> u32 {
        if b == 0 {
            a
        } else {
            gcd(b, a % b)
        }
    }
    sizes.iter().copied().fold(0, gcd).max(1)
}

pub struct Scanner<'a> {
    pub block_sizes: Vec<u32>,
    pub step: u32,
    pub offset: u64,
    pub progress: Option<&'a mut ProgressFn<'a>>,
}

impl<'a> Scanner<'a> {
    pub fn new(block_sizes: Vec<u32>) -> Self {
        let step = gcd_of(&block_sizes);
        Self { block_sizes, step, offset: 0, progress: None }
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Scan every source in `images`, claiming matches into `index`.
    /// `total_placeable` is the sum, over all loaded BHLs, of scannable
    /// block counts — scanning stops across all sources once that many
    /// placements have been made.
    pub fn scan<S: HashIndexStore>(
        &mut self,
        images: &[SourceImage],
        index: &mut S,
        total_placeable: usize,
    ) -> Result<usize> {
        let max_block_size = *self.block_sizes.iter().max().unwrap_or(&0) as usize;
        let mut placed = index_already_placed(index, total_placeable);

        for image in images {
            if placed >= total_placeable {
                break;
            }
            placed = self.scan_one(image, index, max_block_size, placed, total_placeable)?;
        }

        Ok(placed)
    }

    fn scan_one<S: HashIndexStore>(
        &mut self,
        image: &SourceImage,
        index: &mut S,
        max_block_size: usize,
        mut placed: usize,
        total_placeable: usize,
    ) -> Result<usize> {
        let file = File::open(&image.path)?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
        reader.seek(SeekFrom::Start(self.offset))?;

        let mut pos = self.offset;
        let mut buf = vec![0u8; max_block_size];

        while pos < image.length {
            reader.seek(SeekFrom::Start(pos))?;
            let n = read_up_to(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }

            for &b in &self.block_sizes {
                let b = b as usize;
                if b <= n {
                    let digest: [u8; 32] = Sha256::digest(&buf[..b]).into();
                    let newly = index.claim(digest, image.source_id, pos)?;
                    placed += newly;
                }
            }

            if let Some(cb) = self.progress.as_mut() {
                cb(pos + n as u64, placed);
            }

            if placed >= total_placeable {
                break;
            }

            pos += self.step as u64;
        }

        Ok(placed)
    }
}

fn index_already_placed<S: HashIndexStore>(_index: &S, total_placeable: usize) -> usize {
    // Freshly-created indexes start with zero placements; this hook exists
    // so callers resuming a persisted index could seed the counter, but the
    // current store implementations always start clean per scan() call.
    let _ = total_placeable;
    0
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_index::MemoryHashIndex;
    use sha2::Sha256;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_image(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn gcd_matches_single_value() {
        assert_eq!(gcd_of(&[512]), 512);
        assert_eq!(gcd_of(&[512, 1024]), 512);
        assert_eq!(gcd_of(&[512, 768]), 256);
    }

    #[test]
    fn finds_block_at_offset() {
        let block = vec![0x42u8; 8];
        let mut image_bytes = vec![0u8; 100];
        image_bytes[40..48].copy_from_slice(&block);
        let tmp = write_image(&image_bytes);

        let (source, _) = SourceImage::open(0, tmp.path()).unwrap();
        let digest: [u8; 32] = Sha256::digest(&block).into();

        let mut index = MemoryHashIndex::new();
        index.add_entries(0, &[(0, digest)]).unwrap();

        let mut scanner = Scanner::new(vec![8]);
        let placed = scanner.scan(&[source], &mut index, 1).unwrap();
        assert_eq!(placed, 1);

        let placements = index.iter_placements(0).unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].position, 40);
    }

    #[test]
    fn misaligned_block_is_not_found() {
        let block = vec![0x42u8; 8];
        let mut image_bytes = vec![0u8; 100];
        image_bytes[41..49].copy_from_slice(&block); // off by one vs step=8
        let tmp = write_image(&image_bytes);

        let (source, _) = SourceImage::open(0, tmp.path()).unwrap();
        let digest: [u8; 32] = Sha256::digest(&block).into();

        let mut index = MemoryHashIndex::new();
        index.add_entries(0, &[(0, digest)]).unwrap();

        let mut scanner = Scanner::new(vec![8]);
        let placed = scanner.scan(&[source], &mut index, 1).unwrap();
        assert_eq!(placed, 0);
    }
}
