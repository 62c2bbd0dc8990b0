//! Write-ahead log: an append-only stream of self-describing deltas.
//!
//! Framing: `[len: u32 LE][crc32: u32 LE][bincode body]`. Torn tail
//! records are dropped silently on replay. The log is rotated after a
//! successful checkpoint of the unified index.

use crate::error::Result;
use crate::quantized::QuantizedVector;
use crate::types::{Confidence, EdgeKind, NodeId, NodeType, Timestamp};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Upper bound on a single record body; anything larger is treated as a
/// torn or corrupt frame.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

const FRAME_HEADER: usize = 8;

/// One logged delta. Replaying a clean store through the same sequence
/// reproduces the same state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    FullNodeInsert {
        id: NodeId,
        node_type: NodeType,
        vector: QuantizedVector,
        payload: Vec<u8>,
        confidence: Confidence,
        delta: f32,
        created: Timestamp,
        accessed: Timestamp,
        tags: Vec<String>,
        edges: Vec<(NodeId, EdgeKind, f32)>,
    },
    Touch {
        id: NodeId,
        accessed: Timestamp,
    },
    ConfidenceUpdate {
        id: NodeId,
        confidence: Confidence,
    },
    EdgeAdd {
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        weight: f32,
    },
    TagAdd {
        id: NodeId,
        tag: String,
    },
    TagRemove {
        id: NodeId,
        tag: String,
    },
    Forget {
        id: NodeId,
    },
    TripletInsert {
        subject: String,
        predicate: String,
        object: String,
        weight: f32,
    },
}

/// Append handle over the `.wal` file. Reads go through `read_from` so
/// that peer writers' appends can be observed from any offset.
pub struct Wal {
    file: File,
    len: u64,
}

impl Wal {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one record and flush it to the OS.
    pub fn append(&mut self, record: &WalRecord) -> Result<u64> {
        let body = bincode::serialize(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let crc = crc32fast::hash(&body);

        let mut frame = Vec::with_capacity(FRAME_HEADER + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&body);

        self.file.write_all(&frame)?;
        self.file.flush()?;
        self.len += frame.len() as u64;
        Ok(self.len)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Read every intact record starting at `offset`. Returns the records
    /// and the offset just past the last intact frame. A torn or corrupt
    /// tail ends the scan without error.
    pub fn read_from(&mut self, offset: u64) -> Result<(Vec<WalRecord>, u64)> {
        // Peers may have appended since we last looked.
        let disk_len = self.file.metadata()?.len();
        if disk_len > self.len {
            self.len = disk_len;
        }

        let mut records = Vec::new();
        let mut pos = offset;
        let mut header = [0u8; FRAME_HEADER];

        while pos + FRAME_HEADER as u64 <= self.len {
            if self.file.read_exact_at(&mut header, pos).is_err() {
                break;
            }
            let body_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if body_len == 0 || body_len > MAX_RECORD_LEN {
                log::debug!("wal: dropping torn frame at offset {pos}");
                break;
            }
            let body_end = pos + FRAME_HEADER as u64 + body_len as u64;
            if body_end > self.len {
                log::debug!("wal: dropping truncated tail at offset {pos}");
                break;
            }

            let mut body = vec![0u8; body_len as usize];
            if self
                .file
                .read_exact_at(&mut body, pos + FRAME_HEADER as u64)
                .is_err()
            {
                break;
            }
            if crc32fast::hash(&body) != crc {
                log::debug!("wal: checksum mismatch at offset {pos}, dropping tail");
                break;
            }
            match bincode::deserialize::<WalRecord>(&body) {
                Ok(record) => records.push(record),
                Err(_) => {
                    log::debug!("wal: undecodable record at offset {pos}, dropping tail");
                    break;
                }
            }
            pos = body_end;
        }

        Ok((records, pos))
    }

    /// Truncate after a successful checkpoint.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_data()?;
        self.len = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn touch(id: NodeId, accessed: Timestamp) -> WalRecord {
        WalRecord::Touch { id, accessed }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        let a = NodeId::generate();
        let b = NodeId::generate();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&touch(a, 100)).unwrap();
            wal.append(&WalRecord::EdgeAdd {
                source: a,
                target: b,
                kind: EdgeKind::Similar,
                weight: 0.5,
            })
            .unwrap();
            wal.append(&WalRecord::Forget { id: b }).unwrap();
            wal.sync().unwrap();
        }

        let mut wal = Wal::open(&path).unwrap();
        let (records, end) = wal.read_from(0).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(end, wal.len());
        match &records[0] {
            WalRecord::Touch { id, accessed } => {
                assert_eq!(*id, a);
                assert_eq!(*accessed, 100);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_torn_tail_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("torn.wal");

        let id = NodeId::generate();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&touch(id, 1)).unwrap();
            wal.append(&touch(id, 2)).unwrap();
        }
        // Simulate a crash mid-append: garbage half-frame at the tail.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x44, 0x00, 0x00]).unwrap();
        }

        let mut wal = Wal::open(&path).unwrap();
        let (records, _) = wal.read_from(0).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_corrupt_crc_ends_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crc.wal");

        let id = NodeId::generate();
        let boundary;
        {
            let mut wal = Wal::open(&path).unwrap();
            boundary = wal.append(&touch(id, 1)).unwrap();
            wal.append(&touch(id, 2)).unwrap();
        }
        // Flip a byte inside the second record's body.
        {
            let f = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            let mut byte = [0u8; 1];
            f.read_exact_at(&mut byte, boundary + 9).unwrap();
            byte[0] ^= 0xFF;
            f.write_all_at(&byte, boundary + 9).unwrap();
        }

        let mut wal = Wal::open(&path).unwrap();
        let (records, end) = wal.read_from(0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(end, boundary);
    }

    #[test]
    fn test_incremental_read_sees_peer_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("peer.wal");

        let id = NodeId::generate();
        let mut ours = Wal::open(&path).unwrap();
        let applied = ours.append(&touch(id, 1)).unwrap();

        // A second writer appends behind our back.
        {
            let mut peer = Wal::open(&path).unwrap();
            peer.append(&touch(id, 2)).unwrap();
        }

        let (records, end) = ours.read_from(applied).unwrap();
        assert_eq!(records.len(), 1);
        assert!(end > applied);
    }

    #[test]
    fn test_reset_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reset.wal");

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&touch(NodeId::generate(), 1)).unwrap();
        wal.reset().unwrap();
        assert!(wal.is_empty());
        let (records, _) = wal.read_from(0).unwrap();
        assert!(records.is_empty());
    }
}
