//! Gap inquiry: open questions the store knows it cannot answer.
//! Encounters accumulate and the most pressing gaps surface through the
//! inquiry queue.

use crate::error::Result;
use crate::types::{NodeId, Timestamp, MS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const GAPI_MAGIC: &[u8; 4] = b"GAPI";
const GAPI_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGap {
    pub id: NodeId,
    pub topic: String,
    pub question: String,
    pub context: String,
    pub importance: f32,
    pub encounters: u32,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

impl KnowledgeGap {
    /// Ranking score: importance scaled by encounter pressure, decayed
    /// by how long the gap has gone unseen.
    pub fn urgency(&self, now: Timestamp) -> f32 {
        let pressure = (1.0 + self.encounters as f32).ln();
        let idle_days = ((now - self.last_seen).max(0)) as f32 / MS_PER_DAY;
        let freshness = (-0.1 * idle_days).exp();
        self.importance * pressure * freshness
    }
}

#[derive(Debug, Default)]
pub struct GapInquiry {
    gaps: HashMap<NodeId, KnowledgeGap>,
}

impl GapInquiry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: NodeId,
        topic: &str,
        question: &str,
        context: &str,
        importance: f32,
        now: Timestamp,
    ) {
        self.gaps
            .entry(id)
            .and_modify(|gap| {
                gap.encounters += 1;
                gap.last_seen = now;
                gap.importance = gap.importance.max(importance);
            })
            .or_insert(KnowledgeGap {
                id,
                topic: topic.to_string(),
                question: question.to_string(),
                context: context.to_string(),
                importance: importance.clamp(0.0, 1.0),
                encounters: 1,
                first_seen: now,
                last_seen: now,
            });
    }

    /// A gap node came back from recall: the question is still live.
    pub fn note_encounter(&mut self, id: &NodeId, now: Timestamp) {
        if let Some(gap) = self.gaps.get_mut(id) {
            gap.encounters += 1;
            gap.last_seen = now;
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<&KnowledgeGap> {
        self.gaps.get(id)
    }

    /// Most urgent open gaps, strongest first.
    pub fn inquiry_queue(&self, limit: usize, now: Timestamp) -> Vec<&KnowledgeGap> {
        let mut queue: Vec<&KnowledgeGap> = self.gaps.values().collect();
        queue.sort_by(|a, b| {
            b.urgency(now)
                .total_cmp(&a.urgency(now))
                .then(a.id.cmp(&b.id))
        });
        queue.truncate(limit);
        queue
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.gaps.remove(id);
    }

    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut rows: Vec<&KnowledgeGap> = self.gaps.values().collect();
        rows.sort_by_key(|g| g.id);
        let owned: Vec<KnowledgeGap> = rows.into_iter().cloned().collect();
        crate::meta_store::save_records(path, GAPI_MAGIC, GAPI_VERSION, &owned)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut inquiry = Self::new();
        if let Some((_, rows)) =
            crate::meta_store::load_records::<KnowledgeGap>(path, GAPI_MAGIC, GAPI_VERSION)?
        {
            for row in rows {
                inquiry.gaps.insert(row.id, row);
            }
        }
        Ok(inquiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encounters_raise_urgency() {
        let mut inquiry = GapInquiry::new();
        let quiet = NodeId::generate();
        let loud = NodeId::generate();
        inquiry.register(quiet, "a", "what is a?", "", 0.5, 0);
        inquiry.register(loud, "b", "what is b?", "", 0.5, 0);
        for _ in 0..10 {
            inquiry.note_encounter(&loud, 0);
        }

        let queue = inquiry.inquiry_queue(10, 0);
        assert_eq!(queue[0].id, loud);
    }

    #[test]
    fn test_queue_limit() {
        let mut inquiry = GapInquiry::new();
        for i in 0..20 {
            inquiry.register(NodeId::generate(), "t", "q", "", 0.1 * i as f32, 0);
        }
        assert_eq!(inquiry.inquiry_queue(5, 0).len(), 5);
    }

    #[test]
    fn test_reregister_accumulates() {
        let mut inquiry = GapInquiry::new();
        let id = NodeId::generate();
        inquiry.register(id, "t", "q", "", 0.3, 0);
        inquiry.register(id, "t", "q", "", 0.8, 100);
        let gap = inquiry.get(&id).unwrap();
        assert_eq!(gap.encounters, 2);
        assert!((gap.importance - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.gap_inquiry");
        let id = NodeId::generate();
        {
            let mut inquiry = GapInquiry::new();
            inquiry.register(id, "storage", "how big can the heap get?", "ctx", 0.9, 1);
            inquiry.save(&path).unwrap();
        }
        let inquiry = GapInquiry::load(&path).unwrap();
        assert_eq!(inquiry.len(), 1);
        assert_eq!(inquiry.get(&id).unwrap().topic, "storage");
    }
}
