//! Read-only handles onto the byte streams a [`crate::scanner::Scanner`] reads.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// One scan target: a disk image, raw partition, or carved fragment.
/// `sourceId` is assigned by input order and is never reused within a run.
pub struct SourceImage {
    pub source_id: u32,
    pub path: PathBuf,
    pub length: u64,
}

impl SourceImage {
    /// Open `path` and query its length with a byte-accurate size query
    /// that works on block devices as well as regular files.
    pub fn open(source_id: u32, path: &Path) -> io::Result<(Self, File)> {
        let mut file = File::open(path)?;
        let length = file_length(&mut file)?;
        Ok((
            Self { source_id, path: path.to_path_buf(), length },
            file,
        ))
    }
}

/// Seeking to the end works for both regular files and block devices; plain
/// `metadata().len()` reports 0 for many device nodes.
fn file_length(file: &mut File) -> io::Result<u64> {
    let end = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(end)
}
