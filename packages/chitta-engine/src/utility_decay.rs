//! Utility-calibrated decay: usage-driven memory retention.
//!
//! Nodes that are frequently recalled decay slower; nodes with positive
//! feedback strengthen further; learned utility follows task outcomes as
//! an exponential moving average.

use crate::error::Result;
use crate::types::{NodeId, NodeType, Timestamp, MS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const UTDC_MAGIC: &[u8; 4] = b"UTDC";
const UTDC_VERSION: u32 = 2;

/// Usage statistics for a single node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub recall_count: u32,
    pub positive_feedback: u32,
    pub negative_feedback: u32,
    pub first_recall: Timestamp,
    pub last_recall: Timestamp,
    pub cumulative_relevance: f32,
    /// Learned effectiveness in [0, 1]; an EMA over task outcomes.
    pub utility: f32,
    pub outcome_count: u32,
}

impl UsageStats {
    /// Net feedback in [-1, 1].
    pub fn feedback_score(&self) -> f32 {
        let total = self.positive_feedback + self.negative_feedback;
        if total == 0 {
            return 0.0;
        }
        (self.positive_feedback as f32 - self.negative_feedback as f32) / total as f32
    }

    pub fn avg_relevance(&self) -> f32 {
        if self.recall_count == 0 {
            return 0.0;
        }
        self.cumulative_relevance / self.recall_count as f32
    }

    /// Q <- Q + eta * (outcome - Q)
    pub fn update_utility(&mut self, outcome: f32, learning_rate: f32) {
        self.outcome_count += 1;
        self.utility += learning_rate * (outcome - self.utility);
        self.utility = self.utility.clamp(0.0, 1.0);
    }

    /// Neutral 0.5 until the first outcome lands.
    pub fn utility_score(&self) -> f32 {
        if self.outcome_count == 0 {
            return 0.5;
        }
        self.utility
    }
}

#[derive(Debug, Clone)]
pub struct DecayConfig {
    pub wisdom_base_delta: f32,
    pub belief_base_delta: f32,
    pub episode_base_delta: f32,
    pub default_base_delta: f32,

    pub recall_decay_factor: f32,
    pub feedback_decay_factor: f32,
    pub relevance_decay_factor: f32,

    pub min_delta: f32,
    pub max_decay_multiplier: f32,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            wisdom_base_delta: 0.02,
            belief_base_delta: 0.01,
            episode_base_delta: 0.10,
            default_base_delta: 0.05,
            recall_decay_factor: 0.3,
            feedback_decay_factor: 0.2,
            relevance_decay_factor: 0.1,
            min_delta: 0.001,
            max_decay_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageRow {
    id: NodeId,
    stats: UsageStats,
}

pub struct UtilityDecay {
    config: DecayConfig,
    usage: HashMap<NodeId, UsageStats>,
}

impl UtilityDecay {
    pub fn new(config: DecayConfig) -> Self {
        Self {
            config,
            usage: HashMap::new(),
        }
    }

    pub fn record_recall(&mut self, id: &NodeId, relevance: f32, now: Timestamp) {
        let stats = self.usage.entry(*id).or_default();
        stats.recall_count += 1;
        stats.cumulative_relevance += relevance;
        if stats.first_recall == 0 {
            stats.first_recall = now;
        }
        stats.last_recall = now;
    }

    pub fn record_feedback(&mut self, id: &NodeId, positive: bool) {
        let stats = self.usage.entry(*id).or_default();
        if positive {
            stats.positive_feedback += 1;
        } else {
            stats.negative_feedback += 1;
        }
    }

    pub fn record_outcome(&mut self, id: &NodeId, success: f32, learning_rate: f32) {
        self.usage
            .entry(*id)
            .or_default()
            .update_utility(success.clamp(0.0, 1.0), learning_rate);
    }

    pub fn stats(&self, id: &NodeId) -> Option<&UsageStats> {
        self.usage.get(id)
    }

    pub fn base_delta(&self, node_type: NodeType) -> f32 {
        match node_type {
            NodeType::Wisdom => self.config.wisdom_base_delta,
            NodeType::Belief | NodeType::Invariant => self.config.belief_base_delta,
            NodeType::Episode => self.config.episode_base_delta,
            _ => self.config.default_base_delta,
        }
    }

    /// Effective per-day decay rate:
    /// `base * recall_modifier * feedback_modifier * relevance_modifier`,
    /// clamped to [base/R, base*R] and floored at min_delta.
    pub fn effective_delta(&self, id: &NodeId, node_type: NodeType) -> f32 {
        let base = self.base_delta(node_type);
        let Some(stats) = self.usage.get(id) else {
            return base;
        };

        let recall_modifier = 1.0
            / (1.0 + self.config.recall_decay_factor * (1.0 + stats.recall_count as f32).ln());
        let feedback_modifier = 1.0 - self.config.feedback_decay_factor * stats.feedback_score();
        let relevance_modifier =
            1.0 - self.config.relevance_decay_factor * stats.avg_relevance().min(1.0);

        let modifier = (recall_modifier * feedback_modifier * relevance_modifier).clamp(
            1.0 / self.config.max_decay_multiplier,
            self.config.max_decay_multiplier,
        );

        (base * modifier).max(self.config.min_delta)
    }

    /// P(survive) after `time_ms` at decay rate `delta`.
    pub fn survival_probability(delta: f32, time_ms: f32) -> f32 {
        (-delta * (time_ms / MS_PER_DAY)).exp()
    }

    /// Days until 50% survival.
    pub fn expected_lifetime(delta: f32) -> f32 {
        if delta <= 0.0 {
            return f32::INFINITY;
        }
        std::f32::consts::LN_2 / delta
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.usage.remove(id);
    }

    pub fn tracked_nodes(&self) -> usize {
        self.usage.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut rows: Vec<UsageRow> = self
            .usage
            .iter()
            .map(|(id, stats)| UsageRow {
                id: *id,
                stats: stats.clone(),
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        crate::meta_store::save_records(path, UTDC_MAGIC, UTDC_VERSION, &rows)
    }

    pub fn load(path: &Path, config: DecayConfig) -> Result<Self> {
        let mut decay = Self::new(config);
        if let Some((_, rows)) =
            crate::meta_store::load_records::<UsageRow>(path, UTDC_MAGIC, UTDC_VERSION)?
        {
            for row in rows {
                decay.usage.insert(row.id, row.stats);
            }
        }
        Ok(decay)
    }
}

impl Default for UtilityDecay {
    fn default() -> Self {
        Self::new(DecayConfig::default())
    }
}
