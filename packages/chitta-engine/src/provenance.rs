//! Provenance spine: where each node came from and how much the source
//! is trusted.

use crate::error::Result;
use crate::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const PROV_MAGIC: &[u8; 4] = b"PROV";
const PROV_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvenanceSource {
    Unknown,
    User,
    Inference,
    Import,
    Synthesis,
    Peer,
}

impl Default for ProvenanceSource {
    fn default() -> Self {
        Self::Unknown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: NodeId,
    pub source: ProvenanceSource,
    pub session_id: String,
    pub trust: f32,
    pub recorded_at: Timestamp,
}

#[derive(Debug, Default)]
pub struct ProvenanceSpine {
    records: HashMap<NodeId, ProvenanceRecord>,
}

impl ProvenanceSpine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        id: NodeId,
        source: ProvenanceSource,
        session_id: &str,
        now: Timestamp,
    ) {
        let trust = match source {
            ProvenanceSource::User => 0.9,
            ProvenanceSource::Import => 0.7,
            ProvenanceSource::Synthesis => 0.6,
            ProvenanceSource::Inference => 0.5,
            ProvenanceSource::Peer => 0.5,
            ProvenanceSource::Unknown => 0.4,
        };
        self.records.insert(
            id,
            ProvenanceRecord {
                id,
                source,
                session_id: session_id.to_string(),
                trust,
                recorded_at: now,
            },
        );
    }

    pub fn get(&self, id: &NodeId) -> Option<&ProvenanceRecord> {
        self.records.get(id)
    }

    pub fn set_source(&mut self, id: &NodeId, source: ProvenanceSource) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.source = source;
                true
            }
            None => false,
        }
    }

    /// Nudge trust by `delta`, clamped to [0, 1].
    pub fn update_trust(&mut self, id: &NodeId, delta: f32) -> Option<f32> {
        let record = self.records.get_mut(id)?;
        record.trust = (record.trust + delta).clamp(0.0, 1.0);
        Some(record.trust)
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.records.remove(id);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut rows: Vec<&ProvenanceRecord> = self.records.values().collect();
        rows.sort_by_key(|r| r.id);
        let owned: Vec<ProvenanceRecord> = rows.into_iter().cloned().collect();
        crate::meta_store::save_records(path, PROV_MAGIC, PROV_VERSION, &owned)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut spine = Self::new();
        if let Some((_, rows)) =
            crate::meta_store::load_records::<ProvenanceRecord>(path, PROV_MAGIC, PROV_VERSION)?
        {
            for row in rows {
                spine.records.insert(row.id, row);
            }
        }
        Ok(spine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_trust() {
        let mut spine = ProvenanceSpine::new();
        let id = NodeId::generate();
        spine.record(id, ProvenanceSource::User, "session-1", 1000);

        assert_eq!(spine.get(&id).unwrap().source, ProvenanceSource::User);
        let trust = spine.update_trust(&id, -0.3).unwrap();
        assert!((trust - 0.6).abs() < 1e-6);
        assert_eq!(spine.update_trust(&NodeId::generate(), 0.1), None);
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.provenance");

        let id = NodeId::generate();
        {
            let mut spine = ProvenanceSpine::new();
            spine.record(id, ProvenanceSource::Import, "s", 5);
            spine.save(&path).unwrap();
        }
        let spine = ProvenanceSpine::load(&path).unwrap();
        assert_eq!(spine.len(), 1);
        assert_eq!(spine.get(&id).unwrap().source, ProvenanceSource::Import);
    }

    #[test]
    fn test_remove() {
        let mut spine = ProvenanceSpine::new();
        let id = NodeId::generate();
        spine.record(id, ProvenanceSource::Unknown, "", 0);
        spine.remove(&id);
        assert!(spine.get(&id).is_none());
    }
}
