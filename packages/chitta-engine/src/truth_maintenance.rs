//! Truth maintenance: explicit contradictions between node pairs,
//! surfaced on recall results until resolved.

use crate::error::Result;
use crate::types::{NodeId, Recall, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::Path;

const TRTM_MAGIC: &[u8; 4] = b"TRTM";
const TRTM_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub winner: NodeId,
    pub resolution_node: Option<NodeId>,
    pub rationale: String,
    pub resolved_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub a: NodeId,
    pub b: NodeId,
    pub rationale: String,
    pub confidence: f32,
    pub recorded_at: Timestamp,
    pub resolution: Option<Resolution>,
}

impl Contradiction {
    pub fn involves(&self, id: &NodeId) -> bool {
        self.a == *id || self.b == *id
    }

    pub fn other(&self, id: &NodeId) -> NodeId {
        if self.a == *id {
            self.b
        } else {
            self.a
        }
    }

    fn matches_pair(&self, a: &NodeId, b: &NodeId) -> bool {
        (self.a == *a && self.b == *b) || (self.a == *b && self.b == *a)
    }
}

#[derive(Debug, Default)]
pub struct TruthMaintenance {
    contradictions: Vec<Contradiction>,
}

impl TruthMaintenance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a contradiction; the unordered pair is deduplicated.
    pub fn add(&mut self, a: NodeId, b: NodeId, rationale: &str, confidence: f32, now: Timestamp) {
        if let Some(existing) = self
            .contradictions
            .iter_mut()
            .find(|c| c.matches_pair(&a, &b))
        {
            existing.rationale = rationale.to_string();
            existing.confidence = confidence.clamp(0.0, 1.0);
            return;
        }
        self.contradictions.push(Contradiction {
            a,
            b,
            rationale: rationale.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            recorded_at: now,
            resolution: None,
        });
    }

    /// Record a resolution. The loser's confidence is not touched here;
    /// callers weaken it separately if they want to.
    pub fn resolve(
        &mut self,
        a: &NodeId,
        b: &NodeId,
        winner: NodeId,
        resolution_node: Option<NodeId>,
        rationale: &str,
        now: Timestamp,
    ) -> bool {
        let Some(entry) = self
            .contradictions
            .iter_mut()
            .find(|c| c.matches_pair(a, b))
        else {
            return false;
        };
        entry.resolution = Some(Resolution {
            winner,
            resolution_node,
            rationale: rationale.to_string(),
            resolved_at: now,
        });
        true
    }

    pub fn unresolved(&self) -> Vec<&Contradiction> {
        self.contradictions
            .iter()
            .filter(|c| c.resolution.is_none())
            .collect()
    }

    pub fn unresolved_for(&self, id: &NodeId) -> Vec<NodeId> {
        self.contradictions
            .iter()
            .filter(|c| c.resolution.is_none() && c.involves(id))
            .map(|c| c.other(id))
            .collect()
    }

    /// Stamp conflict info onto recall results.
    pub fn annotate(&self, results: &mut [Recall]) {
        for result in results.iter_mut() {
            let conflicting = self.unresolved_for(&result.id);
            result.has_conflict = !conflicting.is_empty();
            result.conflicting_ids = conflicting;
        }
    }

    pub fn remove_node(&mut self, id: &NodeId) {
        self.contradictions.retain(|c| !c.involves(id));
    }

    pub fn len(&self) -> usize {
        self.contradictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contradictions.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::meta_store::save_records(path, TRTM_MAGIC, TRTM_VERSION, &self.contradictions)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contradictions =
            crate::meta_store::load_records::<Contradiction>(path, TRTM_MAGIC, TRTM_VERSION)?
                .map(|(_, rows)| rows)
                .unwrap_or_default();
        Ok(Self { contradictions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Confidence, NodeType};

    fn recall_row(id: NodeId) -> Recall {
        Recall {
            id,
            similarity: 0.0,
            relevance: 0.0,
            epsilon: 0.0,
            node_type: NodeType::Belief,
            confidence: Confidence::default(),
            created: 0,
            accessed: 0,
            payload: Vec::new(),
            text: None,
            has_conflict: false,
            conflicting_ids: Vec::new(),
        }
    }

    #[test]
    fn test_annotate_marks_unresolved() {
        let mut tm = TruthMaintenance::new();
        let a = NodeId::generate();
        let b = NodeId::generate();
        tm.add(a, b, "they disagree", 0.8, 1);

        let mut results = vec![recall_row(a), recall_row(NodeId::generate())];
        tm.annotate(&mut results);
        assert!(results[0].has_conflict);
        assert_eq!(results[0].conflicting_ids, vec![b]);
        assert!(!results[1].has_conflict);
    }

    #[test]
    fn test_resolution_clears_annotation() {
        let mut tm = TruthMaintenance::new();
        let a = NodeId::generate();
        let b = NodeId::generate();
        tm.add(a, b, "conflict", 0.9, 1);
        assert!(tm.resolve(&b, &a, a, None, "a wins", 2));

        let mut results = vec![recall_row(a)];
        tm.annotate(&mut results);
        assert!(!results[0].has_conflict);
        assert!(tm.unresolved().is_empty());
    }

    #[test]
    fn test_pair_deduplicated() {
        let mut tm = TruthMaintenance::new();
        let a = NodeId::generate();
        let b = NodeId::generate();
        tm.add(a, b, "first", 0.5, 1);
        tm.add(b, a, "updated", 0.7, 2);
        assert_eq!(tm.len(), 1);
        assert_eq!(tm.unresolved()[0].rationale, "updated");
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.truth_maintenance");
        let a = NodeId::generate();
        let b = NodeId::generate();
        {
            let mut tm = TruthMaintenance::new();
            tm.add(a, b, "persisted", 0.6, 3);
            tm.save(&path).unwrap();
        }
        let tm = TruthMaintenance::load(&path).unwrap();
        assert_eq!(tm.len(), 1);
        assert_eq!(tm.unresolved_for(&a), vec![b]);
    }
}
