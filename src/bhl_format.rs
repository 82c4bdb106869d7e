//! The BHL container format — encoder and decoder.
//!
//! # On-disk layout (bit-exact, all multi-byte integers big-endian)
//!
//! ```text
//! offset  size  field
//! 0       13    magic = "BlockHashLoc" + 0x1A
//! 13      1     version (=1)
//! 14      4     blockSize
//! 18      8     fileSize
//! 26      4     metadataLength M
//! 30      M     metadata bytes (TLV stream, see `Metadata`)
//! 30+M    32*N  block digests, N = ceil(fileSize/blockSize)
//! ...     32    globalDigest = SHA256(concat of the N digests)
//! ...     *     zlib-compressed tail block, iff fileSize mod blockSize != 0
//! ```
//!
//! The tail block's digest is included among the N digests (it is the last
//! one) but is excluded from the scanning hash index — see [`crate::hash_index`].

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::block_hasher::BlockHasher;
use crate::error::{BhlError, Result};

pub const MAGIC: &[u8; 13] = b"BlockHashLoc\x1a";
pub const VERSION: u8 = 1;

/// Metadata TLV type code for the original filename (UTF-8, no NUL).
pub const META_FNM: &[u8; 3] = b"FNM";
/// Metadata TLV type code for the Unix mtime (8-byte big-endian seconds).
pub const META_FDT: &[u8; 3] = b"FDT";

/// Parsed metadata TLVs. Unknown type codes are preserved verbatim so a
/// decode-then-encode round trip reproduces them unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    raw: BTreeMap<[u8; 3], Vec<u8>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_filename(&mut self, name: &str) {
        self.raw.insert(*META_FNM, name.as_bytes().to_vec());
    }

    pub fn filename(&self) -> Option<&str> {
        self.raw.get(META_FNM).and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn set_mtime(&mut self, unix_secs: u64) {
        self.raw.insert(*META_FDT, unix_secs.to_be_bytes().to_vec());
    }

    pub fn mtime(&self) -> Option<u64> {
        self.raw.get(META_FDT).and_then(|b| {
            if b.len() == 8 {
                Some(u64::from_be_bytes(b.clone().try_into().unwrap()))
            } else {
                None
            }
        })
    }

    /// Insert or overwrite a raw TLV entry. Payload must be ≤ 255 bytes.
    pub fn set_raw(&mut self, type_code: [u8; 3], payload: Vec<u8>) {
        self.raw.insert(type_code, payload);
    }

    pub fn get_raw(&self, type_code: &[u8; 3]) -> Option<&[u8]> {
        self.raw.get(type_code).map(|v| v.as_slice())
    }

    fn encode(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        for (type_code, payload) in &self.raw {
            if payload.len() > 255 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("metadata payload for {type_code:?} exceeds 255 bytes"),
                ));
            }
            out.extend_from_slice(type_code);
            out.push(payload.len() as u8);
            out.extend_from_slice(payload);
        }
        Ok(out)
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut raw = BTreeMap::new();
        let mut pos = 0usize;
        while pos < buf.len() {
            if pos + 4 > buf.len() {
                return Err(BhlError::Malformed("truncated metadata TLV header".into()));
            }
            let type_code: [u8; 3] = buf[pos..pos + 3].try_into().unwrap();
            let len = buf[pos + 3] as usize;
            pos += 4;
            if pos + len > buf.len() {
                return Err(BhlError::Malformed("metadata TLV length exceeds region".into()));
            }
            raw.insert(type_code, buf[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(Self { raw })
    }
}

/// A fully parsed (and validated) BHL file.
#[derive(Debug, Clone)]
pub struct BhlFile {
    pub version: u8,
    pub block_size: u32,
    pub file_size: u64,
    pub metadata: Metadata,
    pub digests: Vec<[u8; 32]>,
    pub global_digest: [u8; 32],
    pub tail_blob: Option<Vec<u8>>,
}

impl BhlFile {
    pub fn block_count(&self) -> usize {
        self.digests.len()
    }

    /// True iff the final block is short (i.e. a tail blob is carried).
    pub fn has_tail(&self) -> bool {
        self.tail_blob.is_some()
    }

    /// Digests eligible for scanning — the hash index excludes the final
    /// (possibly short) block because windows of `block_size` can never
    /// produce its digest.
    pub fn scannable_digests(&self) -> &[[u8; 32]] {
        if self.file_size == 0 {
            return &[];
        }
        if self.file_size % self.block_size as u64 != 0 {
            &self.digests[..self.digests.len() - 1]
        } else {
            &self.digests[..]
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Encodes a file into the BHL container format in a single forward pass.
/// Digests are streamed straight to the output; the full list is never
/// materialized, and the global-digest accumulator is fed incrementally.
pub struct BhlWriter;

impl BhlWriter {
    /// Encode `source` (the original file's bytes) into `out`, recording
    /// `metadata` in the header.
    pub fn write<R: Read, W: Write>(
        mut source: R,
        block_size: u32,
        file_size: u64,
        metadata: &Metadata,
        mut out: W,
    ) -> Result<()> {
        if block_size == 0 {
            return Err(BhlError::Malformed("block size must be >= 1".into()));
        }

        out.write_all(MAGIC)?;
        out.write_u8(VERSION)?;
        out.write_u32::<BigEndian>(block_size)?;
        out.write_u64::<BigEndian>(file_size)?;

        let meta_bytes = metadata.encode()?;
        out.write_u32::<BigEndian>(meta_bytes.len() as u32)?;
        out.write_all(&meta_bytes)?;

        let mut global_hasher = Sha256::new();
        let mut hasher = BlockHasher::new(&mut source, block_size);
        let mut tail_blob: Option<Vec<u8>> = None;

        while let Some(block) = hasher.next_block()? {
            out.write_all(&block.digest)?;
            global_hasher.update(block.digest);
            if let Some(tail_bytes) = block.short_tail {
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
                enc.write_all(&tail_bytes)?;
                tail_blob = Some(enc.finish()?);
            }
        }

        let global_digest: [u8; 32] = global_hasher.finalize().into();
        out.write_all(&global_digest)?;

        if let Some(blob) = tail_blob {
            out.write_all(&blob)?;
        }

        Ok(())
    }

    /// Convenience: build the metadata (filename + mtime) and encode a whole
    /// file at `path` into `bhl_path`.
    pub fn encode_file(
        path: &std::path::Path,
        bhl_path: &std::path::Path,
        block_size: u32,
    ) -> Result<()> {
        let file_size = std::fs::metadata(path)?.len();
        let mut metadata = Metadata::new();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            metadata.set_filename(name);
        }
        if let Ok(modified) = std::fs::metadata(path)?.modified() {
            if let Ok(secs) = modified.duration_since(std::time::UNIX_EPOCH) {
                metadata.set_mtime(secs.as_secs());
            }
        }

        let source = std::fs::File::open(path)?;
        let out = std::fs::File::create(bhl_path)?;
        Self::write(source, block_size, file_size, &metadata, out)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Decodes and validates a BHL file in a single forward pass. Pure function
/// from bytes to `BhlFile` or error; idempotent.
pub struct BhlReader;

impl BhlReader {
    pub fn read<R: Read>(mut input: R) -> Result<BhlFile> {
        let mut magic_buf = [0u8; 13];
        input.read_exact(&mut magic_buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                BhlError::NotBhl
            } else {
                BhlError::Io(e)
            }
        })?;
        if &magic_buf != MAGIC {
            return Err(BhlError::NotBhl);
        }

        let version = input.read_u8()?;
        if version != VERSION {
            return Err(BhlError::UnsupportedVersion(version));
        }

        let block_size = input.read_u32::<BigEndian>()?;
        if block_size == 0 {
            return Err(BhlError::Malformed("blockSize must be >= 1".into()));
        }
        let file_size = input.read_u64::<BigEndian>()?;

        let meta_len = input.read_u32::<BigEndian>()? as usize;
        let mut meta_buf = vec![0u8; meta_len];
        input.read_exact(&mut meta_buf)?;
        let metadata = Metadata::decode(&meta_buf)?;

        let block_count = ceil_div(file_size, block_size as u64) as usize;
        let mut digests = Vec::with_capacity(block_count);
        let mut running = Sha256::new();
        for _ in 0..block_count {
            let mut d = [0u8; 32];
            input.read_exact(&mut d)?;
            running.update(d);
            digests.push(d);
        }

        let mut trailing = [0u8; 32];
        input.read_exact(&mut trailing)?;
        let computed: [u8; 32] = running.finalize().into();
        if computed != trailing {
            return Err(BhlError::CorruptIndex);
        }
        let global_digest = trailing;

        let remainder = (file_size % block_size as u64) as usize;
        let tail_blob = if remainder != 0 {
            let mut compressed = Vec::new();
            input.read_to_end(&mut compressed)?;
            let mut decoder = ZlibDecoder::new(&compressed[..]);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| BhlError::CorruptTail(e.to_string()))?;

            if decompressed.len() != remainder {
                return Err(BhlError::CorruptTail(format!(
                    "tail length {} does not match fileSize mod blockSize {}",
                    decompressed.len(),
                    remainder
                )));
            }
            let actual: [u8; 32] = Sha256::digest(&decompressed).into();
            let expected = digests[block_count - 1];
            if actual != expected {
                return Err(BhlError::CorruptTail("tail digest mismatch".into()));
            }
            Some(compressed)
        } else {
            None
        };

        Ok(BhlFile {
            version,
            block_size,
            file_size,
            metadata,
            digests,
            global_digest,
            tail_blob,
        })
    }

    pub fn read_file(path: &std::path::Path) -> Result<BhlFile> {
        let f = std::fs::File::open(path)?;
        Self::read(std::io::BufReader::new(f))
    }
}

/// Decompress a stored tail blob back into the original short-block bytes.
pub fn decompress_tail(blob: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(blob);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BhlError::CorruptTail(e.to_string()))?;
    Ok(out)
}

fn ceil_div(a: u64, b: u64) -> u64 {
    if a == 0 {
        0
    } else {
        (a + b - 1) / b
    }
}
