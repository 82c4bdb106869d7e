//! `BlockHasher` — splits a byte source into fixed-size blocks and fingerprints
//! each one with SHA-256.
//!
//! # Reads
//! Every block but the last is read as exactly `block_size` bytes. The final
//! read may come back short (`0 < L < block_size`); it is hashed as-is, never
//! zero-padded, and its raw bytes are handed back to the caller so the
//! encoder can carry them as the compressed tail. A read of length 0 ends the
//! sequence with no error.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// One block produced by [`BlockHasher`].
pub struct HashedBlock {
    pub index: u64,
    pub digest: [u8; 32],
    /// Set only for a short final block; `None` for every full-size block.
    pub short_tail: Option<Vec<u8>>,
}

pub struct BlockHasher<R: Read> {
    reader: R,
    block_size: u32,
    next_index: u64,
    done: bool,
}

impl<R: Read> BlockHasher<R> {
    pub fn new(reader: R, block_size: u32) -> Self {
        Self { reader, block_size, next_index: 0, done: false }
    }

    /// Read and hash the next block. Returns `Ok(None)` once the source is
    /// exhausted. Never fails on a short read — only a genuine I/O error
    /// propagates.
    pub fn next_block(&mut self) -> io::Result<Option<HashedBlock>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.block_size as usize];
        let n = read_up_to(&mut self.reader, &mut buf)?;
        if n == 0 {
            self.done = true;
            return Ok(None);
        }
        buf.truncate(n);

        let digest: [u8; 32] = Sha256::digest(&buf).into();
        let index = self.next_index;
        self.next_index += 1;

        let short = n < self.block_size as usize;
        if short {
            self.done = true;
        }

        Ok(Some(HashedBlock {
            index,
            digest,
            short_tail: if short { Some(buf) } else { None },
        }))
    }
}

/// Fill `buf` by issuing repeated reads until it's full or the source is
/// exhausted. Unlike `read_exact`, a short final read is not an error.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
