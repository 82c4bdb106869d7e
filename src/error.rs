//! Crate-wide error type.
//!
//! One flat enum, one variant per failure kind a caller needs to branch on:
//! the container format, the scanner, and the reassembler all report into
//! this type so a CLI front-end has one `match` to write.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BhlError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("not a valid BHL file: magic mismatch")]
    NotBhl,

    #[error("unsupported BHL version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed BHL file: {0}")]
    Malformed(String),

    #[error("hash-of-hashes mismatch: BHL index is corrupt")]
    CorruptIndex,

    #[error("tail block corrupt: {0}")]
    CorruptTail(String),

    #[error("recovery incomplete: {missing} of {total} block(s) unplaced")]
    IncompleteRecovery { missing: usize, total: usize },

    #[error("reassembled file hash mismatch: recovery is incomplete or corrupted")]
    HashMismatch,
}

pub type Result<T> = std::result::Result<T, BhlError>;
