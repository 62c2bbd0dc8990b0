//! Relevance scoring: blends cosine similarity, effective confidence,
//! recency, type weight, and session priming into one ranking signal.

use crate::types::{NodeId, NodeType, Timestamp, MS_PER_DAY};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub cosine_weight: f32,
    pub confidence_weight: f32,
    pub recency_weight: f32,
    pub type_weight: f32,
    pub priming_weight: f32,
    /// Recency decay rate per day of access age.
    pub recency_lambda: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            cosine_weight: 0.55,
            confidence_weight: 0.15,
            recency_weight: 0.15,
            type_weight: 0.05,
            priming_weight: 0.10,
            recency_lambda: 0.05,
        }
    }
}

/// Type preference in [0, 1]. Distilled knowledge outranks raw episodes
/// at equal similarity.
pub fn type_weight(node_type: NodeType) -> f32 {
    match node_type {
        NodeType::Wisdom => 1.0,
        NodeType::Invariant => 0.95,
        NodeType::Identity => 0.9,
        NodeType::Belief => 0.85,
        NodeType::Intention | NodeType::Aspiration => 0.8,
        NodeType::Term | NodeType::Entity => 0.7,
        NodeType::Operation | NodeType::Ledger => 0.65,
        NodeType::Failure | NodeType::Question | NodeType::StoryThread => 0.6,
        NodeType::Episode | NodeType::Voice | NodeType::Meta | NodeType::Triplet => 0.5,
        NodeType::Dream | NodeType::Gap => 0.4,
    }
}

/// Session-level priming state. Recently observed nodes, active
/// intentions, and the current goal basin all get an additive boost.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub recent_observations: HashSet<NodeId>,
    pub active_intentions: HashSet<NodeId>,
    pub goal_basin: HashSet<NodeId>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, id: NodeId) {
        self.recent_observations.insert(id);
    }

    pub fn clear(&mut self) {
        self.recent_observations.clear();
        self.active_intentions.clear();
        self.goal_basin.clear();
    }

    /// Priming signal in [0, 1]: one third per matching channel.
    fn priming(&self, id: &NodeId) -> f32 {
        let mut signal = 0.0;
        if self.recent_observations.contains(id) {
            signal += 1.0 / 3.0;
        }
        if self.active_intentions.contains(id) {
            signal += 1.0 / 3.0;
        }
        if self.goal_basin.contains(id) {
            signal += 1.0 / 3.0;
        }
        signal
    }
}

pub struct ScoreInputs {
    pub id: NodeId,
    pub similarity: f32,
    pub effective_confidence: f32,
    pub node_type: NodeType,
    pub accessed: Timestamp,
}

/// Blend all signals. Without a session context the priming term is
/// zero and the remaining weights still sum below one, which keeps
/// scores comparable across primed and unprimed calls.
pub fn relevance(
    inputs: &ScoreInputs,
    now: Timestamp,
    config: &ScoringConfig,
    session: Option<&SessionContext>,
) -> f32 {
    let age_days = ((now - inputs.accessed).max(0)) as f32 / MS_PER_DAY;
    let recency = (-config.recency_lambda * age_days).exp();
    let priming = session.map(|s| s.priming(&inputs.id)).unwrap_or(0.0);

    let score = config.cosine_weight * inputs.similarity.max(0.0)
        + config.confidence_weight * inputs.effective_confidence
        + config.recency_weight * recency
        + config.type_weight * type_weight(inputs.node_type)
        + config.priming_weight * priming;
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(similarity: f32, node_type: NodeType, accessed: Timestamp) -> ScoreInputs {
        ScoreInputs {
            id: NodeId::generate(),
            similarity,
            effective_confidence: 0.5,
            node_type,
            accessed,
        }
    }

    #[test]
    fn test_similarity_dominates() {
        let config = ScoringConfig::default();
        let now = 1_000_000;
        let close = relevance(&inputs(0.9, NodeType::Episode, now), now, &config, None);
        let far = relevance(&inputs(0.1, NodeType::Episode, now), now, &config, None);
        assert!(close > far);
    }

    #[test]
    fn test_recency_decays() {
        let config = ScoringConfig::default();
        let now = 100 * MS_PER_DAY as i64;
        let fresh = relevance(&inputs(0.5, NodeType::Wisdom, now), now, &config, None);
        let stale = relevance(&inputs(0.5, NodeType::Wisdom, 0), now, &config, None);
        assert!(fresh > stale);
    }

    #[test]
    fn test_priming_boosts() {
        let config = ScoringConfig::default();
        let now = 0;
        let row = inputs(0.5, NodeType::Belief, now);

        let mut session = SessionContext::new();
        session.observe(row.id);
        session.goal_basin.insert(row.id);

        let primed = relevance(&row, now, &config, Some(&session));
        let unprimed = relevance(&row, now, &config, None);
        assert!(primed > unprimed);
        assert!((primed - unprimed - config.priming_weight * 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_wisdom_outranks_episode() {
        let config = ScoringConfig::default();
        let now = 0;
        let wisdom = relevance(&inputs(0.5, NodeType::Wisdom, now), now, &config, None);
        let episode = relevance(&inputs(0.5, NodeType::Episode, now), now, &config, None);
        assert!(wisdom > episode);
    }

    #[test]
    fn test_score_bounded() {
        let config = ScoringConfig::default();
        let mut row = inputs(1.0, NodeType::Wisdom, 0);
        row.effective_confidence = 1.0;
        let score = relevance(&row, 0, &config, None);
        assert!((0.0..=1.0).contains(&score));
    }
}
