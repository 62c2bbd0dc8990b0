//! Quota management: per-type soft caps and a global hard cap, enforced
//! by evicting the lowest-utility nodes of the over-budget type.

use crate::types::{NodeId, NodeType, Timestamp, MS_PER_DAY};
use crate::utility_decay::UsageStats;
use std::collections::HashMap;

/// Nodes forgotten per eviction round.
pub const DEFAULT_EVICTION_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub total_capacity: usize,
    /// Per-type soft caps; absent types share the default fraction.
    pub type_caps: HashMap<NodeType, usize>,
    pub eviction_batch: usize,
}

impl QuotaConfig {
    pub fn new(total_capacity: usize) -> Self {
        let mut type_caps = HashMap::new();
        // Episodes churn; wisdom is precious. Caps lean accordingly.
        type_caps.insert(NodeType::Episode, total_capacity / 4);
        type_caps.insert(NodeType::Voice, total_capacity / 10);
        type_caps.insert(NodeType::Dream, total_capacity / 20);
        Self {
            total_capacity,
            type_caps,
            eviction_batch: DEFAULT_EVICTION_BATCH,
        }
    }

    pub fn cap_for(&self, node_type: NodeType) -> usize {
        self.type_caps
            .get(&node_type)
            .copied()
            .unwrap_or(self.total_capacity / 2)
    }
}

/// One node's standing in an eviction ranking.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub id: NodeId,
    pub utility: f32,
}

pub struct QuotaManager {
    config: QuotaConfig,
    counts: HashMap<NodeType, usize>,
}

impl QuotaManager {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            counts: HashMap::new(),
        }
    }

    pub fn update_counts(&mut self, counts: HashMap<NodeType, usize>) {
        self.counts = counts;
    }

    pub fn count(&self, node_type: NodeType) -> usize {
        self.counts.get(&node_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Would inserting one more node of this type breach a cap?
    pub fn at_cap(&self, node_type: NodeType) -> bool {
        self.count(node_type) >= self.config.cap_for(node_type)
            || self.total() >= self.config.total_capacity
    }

    pub fn eviction_batch(&self) -> usize {
        self.config.eviction_batch
    }

    /// Utility score for eviction ranking: recall pressure, recency,
    /// confidence, minus negative-feedback drag. Higher survives.
    pub fn utility_score(
        effective_confidence: f32,
        stats: Option<&UsageStats>,
        now: Timestamp,
    ) -> f32 {
        let Some(stats) = stats else {
            // Never recalled: survival rests on confidence alone.
            return 0.4 * effective_confidence;
        };
        let recall_score = ((1.0 + stats.recall_count as f32).ln() / 5.0).min(1.0);
        let idle_days = ((now - stats.last_recall).max(0)) as f32 / MS_PER_DAY;
        let recency_score = (-0.05 * idle_days).exp();
        let feedback_drag = stats.negative_feedback as f32 * 0.1;

        (0.3 * recall_score + 0.2 * recency_score + 0.4 * effective_confidence
            + 0.1 * stats.utility_score()
            - feedback_drag)
            .max(0.0)
    }

    /// Lowest-utility `k` candidates, worst first, ties by id.
    pub fn select_victims(candidates: &[EvictionCandidate], k: usize) -> Vec<NodeId> {
        let mut ranked: Vec<&EvictionCandidate> = candidates.iter().collect();
        ranked.sort_by(|a, b| a.utility.total_cmp(&b.utility).then(a.id.cmp(&b.id)));
        ranked.into_iter().take(k).map(|c| c.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_cap() {
        let mut config = QuotaConfig::new(1000);
        config.type_caps.insert(NodeType::Episode, 5);
        let mut manager = QuotaManager::new(config);

        let mut counts = HashMap::new();
        counts.insert(NodeType::Episode, 5);
        manager.update_counts(counts);

        assert!(manager.at_cap(NodeType::Episode));
        assert!(!manager.at_cap(NodeType::Wisdom));
    }

    #[test]
    fn test_global_cap_applies_to_all_types() {
        let config = QuotaConfig::new(10);
        let mut manager = QuotaManager::new(config);
        let mut counts = HashMap::new();
        counts.insert(NodeType::Wisdom, 4);
        counts.insert(NodeType::Belief, 6);
        manager.update_counts(counts);
        assert!(manager.at_cap(NodeType::Term));
    }

    #[test]
    fn test_victims_are_lowest_utility() {
        let candidates: Vec<EvictionCandidate> = (0..10)
            .map(|i| EvictionCandidate {
                id: NodeId::generate(),
                utility: i as f32 / 10.0,
            })
            .collect();
        let victims = QuotaManager::select_victims(&candidates, 3);
        assert_eq!(victims.len(), 3);
        assert_eq!(victims[0], candidates[0].id);
        assert_eq!(victims[1], candidates[1].id);
        assert_eq!(victims[2], candidates[2].id);
    }

    #[test]
    fn test_utility_rewards_use() {
        let mut stats = UsageStats::default();
        stats.recall_count = 50;
        stats.last_recall = 1000;
        let used = QuotaManager::utility_score(0.5, Some(&stats), 2000);
        let unused = QuotaManager::utility_score(0.5, None, 2000);
        assert!(used > unused);
    }

    #[test]
    fn test_negative_feedback_hurts() {
        let mut stats = UsageStats::default();
        stats.recall_count = 5;
        stats.last_recall = 0;
        let clean = QuotaManager::utility_score(0.5, Some(&stats), 0);
        stats.negative_feedback = 5;
        let tainted = QuotaManager::utility_score(0.5, Some(&stats), 0);
        assert!(tainted < clean);
    }
}
