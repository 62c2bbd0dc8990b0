//! Synthesis queue: staged wisdom candidates accumulating evidence
//! toward promotion, plus the promoted-episode bookkeeping that keeps
//! `synthesize_wisdom` from revisiting clusters.

use crate::error::Result;
use crate::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const SYNQ_MAGIC: &[u8; 4] = b"SYNQ";
const SYNQ_VERSION: u32 = 1;

/// Recalls a staged candidate needs before it is considered ripe.
pub const DEFAULT_PROMOTION_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedWisdom {
    pub id: NodeId,
    pub content: String,
    pub evidence: Vec<NodeId>,
    pub recall_count: u32,
    pub staged_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum QueueRow {
    Staged(StagedWisdom),
    Promoted { id: NodeId },
}

#[derive(Debug, Default)]
pub struct SynthesisQueue {
    staged: HashMap<NodeId, StagedWisdom>,
    /// Episodes already folded into a synthesized wisdom node.
    promoted: HashSet<NodeId>,
}

impl SynthesisQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, id: NodeId, content: &str, evidence: Vec<NodeId>, now: Timestamp) {
        self.staged
            .entry(id)
            .and_modify(|s| {
                s.content = content.to_string();
                for e in &evidence {
                    if !s.evidence.contains(e) {
                        s.evidence.push(*e);
                    }
                }
            })
            .or_insert(StagedWisdom {
                id,
                content: content.to_string(),
                evidence,
                recall_count: 0,
                staged_at: now,
            });
    }

    /// Recall of a staged candidate counts as evidence.
    pub fn note_recall(&mut self, id: &NodeId) {
        if let Some(staged) = self.staged.get_mut(id) {
            staged.recall_count += 1;
        }
    }

    pub fn is_staged(&self, id: &NodeId) -> bool {
        self.staged.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&StagedWisdom> {
        self.staged.get(id)
    }

    /// Candidates at or past the promotion threshold, ripest first.
    pub fn ripe(&self, threshold: u32) -> Vec<&StagedWisdom> {
        let mut ready: Vec<&StagedWisdom> = self
            .staged
            .values()
            .filter(|s| s.recall_count >= threshold)
            .collect();
        ready.sort_by(|a, b| {
            b.recall_count
                .cmp(&a.recall_count)
                .then(a.staged_at.cmp(&b.staged_at))
        });
        ready
    }

    pub fn unstage(&mut self, id: &NodeId) -> Option<StagedWisdom> {
        self.staged.remove(id)
    }

    pub fn mark_promoted(&mut self, id: NodeId) {
        self.promoted.insert(id);
    }

    pub fn is_promoted(&self, id: &NodeId) -> bool {
        self.promoted.contains(id)
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.staged.remove(id);
        self.promoted.remove(id);
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    pub fn promoted_count(&self) -> usize {
        self.promoted.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut rows: Vec<QueueRow> = Vec::with_capacity(self.staged.len() + self.promoted.len());
        let mut staged: Vec<&StagedWisdom> = self.staged.values().collect();
        staged.sort_by_key(|s| s.id);
        for s in staged {
            rows.push(QueueRow::Staged(s.clone()));
        }
        let mut promoted: Vec<&NodeId> = self.promoted.iter().collect();
        promoted.sort();
        for id in promoted {
            rows.push(QueueRow::Promoted { id: *id });
        }
        crate::meta_store::save_records(path, SYNQ_MAGIC, SYNQ_VERSION, &rows)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut queue = Self::new();
        if let Some((_, rows)) =
            crate::meta_store::load_records::<QueueRow>(path, SYNQ_MAGIC, SYNQ_VERSION)?
        {
            for row in rows {
                match row {
                    QueueRow::Staged(staged) => {
                        queue.staged.insert(staged.id, staged);
                    }
                    QueueRow::Promoted { id } => {
                        queue.promoted.insert(id);
                    }
                }
            }
        }
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_ripen() {
        let mut queue = SynthesisQueue::new();
        let id = NodeId::generate();
        queue.stage(id, "candidate insight", vec![NodeId::generate()], 100);

        assert!(queue.ripe(DEFAULT_PROMOTION_THRESHOLD).is_empty());
        for _ in 0..3 {
            queue.note_recall(&id);
        }
        let ripe = queue.ripe(DEFAULT_PROMOTION_THRESHOLD);
        assert_eq!(ripe.len(), 1);
        assert_eq!(ripe[0].id, id);
    }

    #[test]
    fn test_restage_merges_evidence() {
        let mut queue = SynthesisQueue::new();
        let id = NodeId::generate();
        let e1 = NodeId::generate();
        let e2 = NodeId::generate();
        queue.stage(id, "v1", vec![e1], 1);
        queue.stage(id, "v2", vec![e1, e2], 2);

        let staged = queue.get(&id).unwrap();
        assert_eq!(staged.content, "v2");
        assert_eq!(staged.evidence.len(), 2);
    }

    #[test]
    fn test_promoted_bookkeeping() {
        let mut queue = SynthesisQueue::new();
        let episode = NodeId::generate();
        assert!(!queue.is_promoted(&episode));
        queue.mark_promoted(episode);
        assert!(queue.is_promoted(&episode));
        queue.remove(&episode);
        assert!(!queue.is_promoted(&episode));
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.synthesis_queue");
        let staged_id = NodeId::generate();
        let promoted_id = NodeId::generate();
        {
            let mut queue = SynthesisQueue::new();
            queue.stage(staged_id, "persist me", Vec::new(), 10);
            queue.note_recall(&staged_id);
            queue.mark_promoted(promoted_id);
            queue.save(&path).unwrap();
        }
        let queue = SynthesisQueue::load(&path).unwrap();
        assert_eq!(queue.get(&staged_id).unwrap().recall_count, 1);
        assert!(queue.is_promoted(&promoted_id));
    }
}
