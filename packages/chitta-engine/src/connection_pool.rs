//! Connection pool: a variable-length heap of per-slot records holding
//! the ANN level adjacency and the node's semantic edges.
//!
//! Log-structured: records are appended, never rewritten in place; a
//! later record for the same owner supersedes the earlier one, and a
//! tombstone retires the owner. Compaction rewrites the file offline.

use crate::error::{ChittaError, Result};
use crate::types::{EdgeKind, SlotId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

const POOL_MAGIC: &[u8; 8] = b"CHITPOOL";
const POOL_VERSION: u32 = 1;
const POOL_HEADER: u64 = 12;
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// Semantic edge in its stored form: slot index plus the generation the
/// writer observed, so readers can reject targets whose slot was reused.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredEdge {
    pub target_slot: SlotId,
    pub target_generation: u32,
    pub kind: EdgeKind,
    pub weight: f32,
}

/// All connection state owned by one slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolEntry {
    pub owner_slot: SlotId,
    /// ANN adjacency, level 0 first (the widest).
    pub levels: Vec<Vec<SlotId>>,
    pub edges: Vec<StoredEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum PoolRecord {
    Entry(PoolEntry),
    Dead { owner_slot: SlotId },
}

pub struct ConnectionPool {
    file: File,
    path: PathBuf,
    len: u64,
}

impl ConnectionPool {
    /// Open (or create) the pool file and load the live entries.
    pub fn open(path: &Path) -> Result<(Self, HashMap<SlotId, PoolEntry>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)?;
        let mut len = file.metadata()?.len();

        if len == 0 {
            let mut header = Vec::with_capacity(POOL_HEADER as usize);
            header.extend_from_slice(POOL_MAGIC);
            header.extend_from_slice(&POOL_VERSION.to_le_bytes());
            file.write_all(&header)?;
            file.sync_data()?;
            len = POOL_HEADER;
        } else {
            let mut header = [0u8; POOL_HEADER as usize];
            if len < POOL_HEADER || file.read_exact_at(&mut header, 0).is_err() {
                return Err(ChittaError::IndexCorrupt(format!(
                    "pool file {} shorter than header",
                    path.display()
                )));
            }
            if &header[..8] != POOL_MAGIC {
                return Err(ChittaError::IndexCorrupt(format!(
                    "pool file {} has wrong magic",
                    path.display()
                )));
            }
            let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
            if version != POOL_VERSION {
                return Err(ChittaError::IndexCorrupt(format!(
                    "pool file {} has unsupported version {version}",
                    path.display()
                )));
            }
        }

        let mut pool = Self {
            file,
            path: path.to_path_buf(),
            len,
        };
        let entries = pool.scan()?;
        Ok((pool, entries))
    }

    fn scan(&mut self) -> Result<HashMap<SlotId, PoolEntry>> {
        let mut entries = HashMap::new();
        let mut pos = POOL_HEADER;
        let mut header = [0u8; 8];

        while pos + 8 <= self.len {
            if self.file.read_exact_at(&mut header, pos).is_err() {
                break;
            }
            let body_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if body_len == 0 || body_len > MAX_RECORD_LEN {
                log::debug!("pool: torn frame at {pos}, ignoring tail");
                self.len = pos;
                break;
            }
            let body_end = pos + 8 + body_len as u64;
            if body_end > self.len {
                self.len = pos;
                break;
            }
            let mut body = vec![0u8; body_len as usize];
            if self.file.read_exact_at(&mut body, pos + 8).is_err() {
                self.len = pos;
                break;
            }
            if crc32fast::hash(&body) != crc {
                log::debug!("pool: checksum mismatch at {pos}, ignoring tail");
                self.len = pos;
                break;
            }
            match bincode::deserialize::<PoolRecord>(&body) {
                Ok(PoolRecord::Entry(entry)) => {
                    entries.insert(entry.owner_slot, entry);
                }
                Ok(PoolRecord::Dead { owner_slot }) => {
                    entries.remove(&owner_slot);
                }
                Err(_) => {
                    self.len = pos;
                    break;
                }
            }
            pos = body_end;
        }
        Ok(entries)
    }

    fn append_record(&mut self, record: &PoolRecord) -> Result<u64> {
        let body = bincode::serialize(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let offset = self.len;
        let mut frame = Vec::with_capacity(8 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        frame.extend_from_slice(&body);
        self.file.write_all(&frame)?;
        self.len += frame.len() as u64;
        Ok(offset)
    }

    /// Append the current state of one slot. Returns the record offset
    /// for the slot record's pool-offset field.
    pub fn append_entry(&mut self, entry: &PoolEntry) -> Result<u64> {
        self.append_record(&PoolRecord::Entry(entry.clone()))
    }

    /// Retire a slot's connection state.
    pub fn append_dead(&mut self, owner_slot: SlotId) -> Result<u64> {
        self.append_record(&PoolRecord::Dead { owner_slot })
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= POOL_HEADER
    }

    /// Offline compaction: rewrite only the live entries, atomically.
    pub fn compact(&mut self, entries: &HashMap<SlotId, PoolEntry>) -> Result<()> {
        let tmp_path = self.path.with_extension("pool.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(POOL_MAGIC)?;
            tmp.write_all(&POOL_VERSION.to_le_bytes())?;
            let mut ordered: Vec<_> = entries.values().collect();
            ordered.sort_by_key(|e| e.owner_slot);
            for entry in ordered {
                let body = bincode::serialize(&PoolRecord::Entry((*entry).clone()))
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                tmp.write_all(&(body.len() as u32).to_le_bytes())?;
                tmp.write_all(&crc32fast::hash(&body).to_le_bytes())?;
                tmp.write_all(&body)?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.len = self.file.metadata()?.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(owner: SlotId, neighbors: Vec<SlotId>) -> PoolEntry {
        PoolEntry {
            owner_slot: owner,
            levels: vec![neighbors],
            edges: vec![StoredEdge {
                target_slot: owner + 1,
                target_generation: 0,
                kind: EdgeKind::Similar,
                weight: 0.5,
            }],
        }
    }

    #[test]
    fn test_later_record_supersedes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.pool");

        {
            let (mut pool, _) = ConnectionPool::open(&path).unwrap();
            pool.append_entry(&entry(3, vec![1])).unwrap();
            pool.append_entry(&entry(3, vec![1, 2])).unwrap();
            pool.sync().unwrap();
        }

        let (_, entries) = ConnectionPool::open(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[&3].levels[0], vec![1, 2]);
    }

    #[test]
    fn test_tombstone_removes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dead.pool");

        {
            let (mut pool, _) = ConnectionPool::open(&path).unwrap();
            pool.append_entry(&entry(1, vec![2])).unwrap();
            pool.append_entry(&entry(2, vec![1])).unwrap();
            pool.append_dead(1).unwrap();
        }

        let (_, entries) = ConnectionPool::open(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key(&2));
    }

    #[test]
    fn test_compact_shrinks_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("compact.pool");

        let (mut pool, _) = ConnectionPool::open(&path).unwrap();
        for round in 0..10 {
            pool.append_entry(&entry(7, vec![round])).unwrap();
        }
        let before = pool.len();

        let mut live = HashMap::new();
        live.insert(7, entry(7, vec![9]));
        pool.compact(&live).unwrap();
        assert!(pool.len() < before);

        let (_, entries) = ConnectionPool::open(&path).unwrap();
        assert_eq!(entries[&7].levels[0], vec![9]);
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.pool");
        std::fs::write(&path, b"NOTAPOOLXXXX").unwrap();
        assert!(matches!(
            ConnectionPool::open(&path),
            Err(ChittaError::IndexCorrupt(_))
        ));
    }
}
