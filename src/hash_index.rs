//! `HashIndex` — the content-addressed `digest -> placements` map shared by
//! the scanner and the reassembler.
//!
//! The store sits behind a trait with two implementations: an in-process
//! multi-map and, behind the `persist` feature, a SQLite-backed table using
//! a two-table (`files`, `hashlist`) schema.

use std::collections::HashMap;

use crate::error::Result;

/// One entry created when a BHL is loaded: a single block's digest plus,
/// once scanning finds it, where it was found.
#[derive(Debug, Clone)]
pub struct HashIndexEntry {
    pub file_id: u32,
    pub block_index: u64,
    pub placement: Option<(u32, u64)>, // (source_id, byte_offset)
}

/// Metadata needed to reassemble one loaded BHL file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub block_size: u32,
    pub file_size: u64,
    pub filename: Option<String>,
    pub mtime: Option<u64>,
    pub tail_blob: Option<Vec<u8>>,
    pub global_digest: [u8; 32],
}

/// A placement ordered by block index, as returned by `iter_placements`.
#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub block_index: u64,
    pub source_id: u32,
    pub position: u64,
}

pub trait HashIndexStore {
    /// Register a loaded BHL's scannable digests. `placement` starts unset.
    fn add_entries(&mut self, file_id: u32, digests: &[(u64, [u8; 32])]) -> Result<()>;

    /// Register `file_id`'s metadata (block size, file size, filename,
    /// mtime, tail blob, global digest) for use during reassembly.
    fn set_file_info(&mut self, file_id: u32, info: FileInfo) -> Result<()>;

    /// For every entry matching `digest` with an unset placement, atomically
    /// set `placement = (source_id, position)`. Returns the count of
    /// newly-placed entries. A digest with no unplaced entries is a no-op
    /// that returns 0 — this includes digests never registered at all.
    fn claim(&mut self, digest: [u8; 32], source_id: u32, position: u64) -> Result<usize>;

    /// Placements for `file_id`, ordered ascending by block index. Blocks
    /// with no placement are omitted.
    fn iter_placements(&self, file_id: u32) -> Result<Vec<Placement>>;

    fn file_info(&self, file_id: u32) -> Result<Option<FileInfo>>;

    /// Count of entries registered for `file_id` (scannable blocks only).
    fn entry_count(&self, file_id: u32) -> usize;

    /// Total entries across all loaded files still without a placement.
    fn total_unplaced(&self) -> usize;

    /// Flush pending writes. A no-op for in-memory stores; meaningful for
    /// disk-backed ones, which may batch commits.
    fn checkpoint(&mut self) -> Result<()>;
}

// ── In-memory implementation ────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryHashIndex {
    by_digest: HashMap<[u8; 32], Vec<(u32, u64)>>, // digest -> (file_id, block_index)
    placements: HashMap<(u32, u64), (u32, u64)>,   // (file_id, block_index) -> (source_id, pos)
    file_info: HashMap<u32, FileInfo>,
    unplaced: usize,
}

impl MemoryHashIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashIndexStore for MemoryHashIndex {
    fn add_entries(&mut self, file_id: u32, digests: &[(u64, [u8; 32])]) -> Result<()> {
        for &(block_index, digest) in digests {
            self.by_digest.entry(digest).or_default().push((file_id, block_index));
            self.unplaced += 1;
        }
        Ok(())
    }

    fn set_file_info(&mut self, file_id: u32, info: FileInfo) -> Result<()> {
        self.file_info.insert(file_id, info);
        Ok(())
    }

    fn claim(&mut self, digest: [u8; 32], source_id: u32, position: u64) -> Result<usize> {
        let Some(keys) = self.by_digest.get(&digest) else { return Ok(0) };
        let mut newly_placed = 0;
        for &(file_id, block_index) in keys {
            let key = (file_id, block_index);
            if !self.placements.contains_key(&key) {
                self.placements.insert(key, (source_id, position));
                newly_placed += 1;
            }
        }
        self.unplaced -= newly_placed;
        Ok(newly_placed)
    }

    fn iter_placements(&self, file_id: u32) -> Result<Vec<Placement>> {
        let mut out: Vec<Placement> = self
            .placements
            .iter()
            .filter(|((fid, _), _)| *fid == file_id)
            .map(|(&(_, block_index), &(source_id, position))| Placement {
                block_index,
                source_id,
                position,
            })
            .collect();
        out.sort_by_key(|p| p.block_index);
        Ok(out)
    }

    fn file_info(&self, file_id: u32) -> Result<Option<FileInfo>> {
        Ok(self.file_info.get(&file_id).cloned())
    }

    fn entry_count(&self, file_id: u32) -> usize {
        self.by_digest
            .values()
            .flat_map(|v| v.iter())
            .filter(|(fid, _)| *fid == file_id)
            .count()
    }

    fn total_unplaced(&self) -> usize {
        self.unplaced
    }

    fn checkpoint(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "persist")]
pub mod sqlite {
    //! Disk-backed [`HashIndexStore`]:
    //! `files(fileId, blockSize, fileSize, filename, mtime, tailBlob, globalDigest)`
    //! `hashlist(hash INDEX, fileId, sourceId, blockIndex, position)`

    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};

    pub struct SqliteHashIndex {
        conn: Connection,
        dirty: u32,
    }

    impl SqliteHashIndex {
        pub fn open(path: &str) -> Result<Self> {
            let conn = if path == ":memory:" {
                Connection::open_in_memory()
            } else {
                Connection::open(path)
            }
            .map_err(sqlite_err)?;

            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS files (
                    file_id        INTEGER PRIMARY KEY,
                    block_size     INTEGER NOT NULL,
                    file_size      INTEGER NOT NULL,
                    filename       TEXT,
                    mtime          INTEGER,
                    tail_blob      BLOB,
                    global_digest  BLOB NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS hashlist (
                    hash        BLOB NOT NULL,
                    file_id     INTEGER NOT NULL,
                    block_index INTEGER NOT NULL,
                    source_id   INTEGER,
                    position    INTEGER
                 );
                 CREATE INDEX IF NOT EXISTS hashlist_hash ON hashlist (hash);",
            )
            .map_err(sqlite_err)?;

            Ok(Self { conn, dirty: 0 })
        }

        fn mark_dirty(&mut self) -> Result<()> {
            self.dirty += 1;
            if self.dirty >= 256 {
                self.checkpoint()?;
            }
            Ok(())
        }
    }

    impl HashIndexStore for SqliteHashIndex {
        fn add_entries(&mut self, file_id: u32, digests: &[(u64, [u8; 32])]) -> Result<()> {
            let tx = self.conn.transaction().map_err(sqlite_err)?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT INTO hashlist (hash, file_id, block_index) VALUES (?1, ?2, ?3)",
                    )
                    .map_err(sqlite_err)?;
                for &(block_index, digest) in digests {
                    stmt.execute(params![digest.to_vec(), file_id, block_index as i64])
                        .map_err(sqlite_err)?;
                }
            }
            tx.commit().map_err(sqlite_err)
        }

        fn set_file_info(&mut self, file_id: u32, info: FileInfo) -> Result<()> {
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO files
                        (file_id, block_size, file_size, filename, mtime, tail_blob, global_digest)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        file_id,
                        info.block_size,
                        info.file_size as i64,
                        info.filename,
                        info.mtime.map(|m| m as i64),
                        info.tail_blob,
                        info.global_digest.to_vec(),
                    ],
                )
                .map_err(sqlite_err)?;
            Ok(())
        }

        fn claim(&mut self, digest: [u8; 32], source_id: u32, position: u64) -> Result<usize> {
            let n = self
                .conn
                .execute(
                    "UPDATE hashlist SET source_id = ?1, position = ?2
                     WHERE hash = ?3 AND position IS NULL",
                    params![source_id, position as i64, digest.to_vec()],
                )
                .map_err(sqlite_err)?;
            if n > 0 {
                self.mark_dirty()?;
            }
            Ok(n)
        }

        fn iter_placements(&self, file_id: u32) -> Result<Vec<Placement>> {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT block_index, source_id, position FROM hashlist
                     WHERE file_id = ?1 AND position IS NOT NULL ORDER BY block_index",
                )
                .map_err(sqlite_err)?;
            let rows = stmt
                .query_map(params![file_id], |row| {
                    Ok(Placement {
                        block_index: row.get::<_, i64>(0)? as u64,
                        source_id: row.get::<_, i64>(1)? as u32,
                        position: row.get::<_, i64>(2)? as u64,
                    })
                })
                .map_err(sqlite_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(sqlite_err)
        }

        fn file_info(&self, file_id: u32) -> Result<Option<FileInfo>> {
            self.conn
                .query_row(
                    "SELECT block_size, file_size, filename, mtime, tail_blob, global_digest
                     FROM files WHERE file_id = ?1",
                    params![file_id],
                    |row| {
                        let digest_vec: Vec<u8> = row.get(5)?;
                        let mut global_digest = [0u8; 32];
                        global_digest.copy_from_slice(&digest_vec);
                        Ok(FileInfo {
                            block_size: row.get(0)?,
                            file_size: row.get::<_, i64>(1)? as u64,
                            filename: row.get(2)?,
                            mtime: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
                            tail_blob: row.get(4)?,
                            global_digest,
                        })
                    },
                )
                .optional()
                .map_err(sqlite_err)
        }

        fn entry_count(&self, file_id: u32) -> usize {
            self.conn
                .query_row(
                    "SELECT COUNT(*) FROM hashlist WHERE file_id = ?1",
                    params![file_id],
                    |row| row.get::<_, i64>(0),
                )
                .unwrap_or(0) as usize
        }

        fn total_unplaced(&self) -> usize {
            self.conn
                .query_row(
                    "SELECT COUNT(*) FROM hashlist WHERE position IS NULL",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .unwrap_or(0) as usize
        }

        fn checkpoint(&mut self) -> Result<()> {
            self.dirty = 0;
            Ok(())
        }
    }

    fn sqlite_err(e: rusqlite::Error) -> crate::error::BhlError {
        crate::error::BhlError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_single_winner() {
        let mut idx = MemoryHashIndex::new();
        let d = [1u8; 32];
        idx.add_entries(0, &[(0, d)]).unwrap();
        assert_eq!(idx.claim(d, 7, 100).unwrap(), 1);
        // Second claim for the same digest is a no-op.
        assert_eq!(idx.claim(d, 9, 200).unwrap(), 0);
        let placements = idx.iter_placements(0).unwrap();
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].source_id, 7);
        assert_eq!(placements[0].position, 100);
    }

    #[test]
    fn duplicate_digest_fills_all_entries_from_one_claim() {
        let mut idx = MemoryHashIndex::new();
        let d = [2u8; 32];
        idx.add_entries(0, &[(0, d), (1, d), (2, d)]).unwrap();
        assert_eq!(idx.claim(d, 3, 5000).unwrap(), 3);
        let placements = idx.iter_placements(0).unwrap();
        assert_eq!(placements.len(), 3);
        assert!(placements.iter().all(|p| p.source_id == 3 && p.position == 5000));
    }

    #[test]
    fn unknown_digest_claim_is_noop() {
        let mut idx = MemoryHashIndex::new();
        assert_eq!(idx.claim([9u8; 32], 0, 0).unwrap(), 0);
    }
}
