//! Core types for the Chitta memory engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub const MS_PER_DAY: f32 = 86_400_000.0;

/// Node ID: 16 opaque bytes, rendered as 32 lowercase hex chars.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub [u8; 16]);

impl NodeId {
    /// Generate a fresh globally-unique id.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Dense slot id, local to one unified-index file. Reused after forget.
pub type SlotId = u32;

pub const NIL_SLOT: SlotId = u32::MAX;

/// Bayesian belief: posterior mean, variance, observation count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    /// Posterior mean in [0, 1].
    pub mu: f32,
    /// Posterior variance in [0, 1].
    pub sigma: f32,
    /// Observation count, >= 1.
    pub n: u32,
}

impl Confidence {
    pub fn new(mu: f32) -> Self {
        Self {
            mu: mu.clamp(0.0, 1.0),
            sigma: 0.25,
            n: 1,
        }
    }

    /// Effective value used for scoring: mean discounted by variance.
    pub fn effective(&self) -> f32 {
        (self.mu * (1.0 - self.sigma)).clamp(0.0, 1.0)
    }

    /// Fold in one observation of `value`.
    pub fn observe(&mut self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        let n = self.n as f32;
        let old_mu = self.mu;
        self.mu = ((self.mu * n + value) / (n + 1.0)).clamp(0.0, 1.0);
        let deviation = (value - old_mu) * (value - old_mu);
        self.sigma = ((self.sigma * n + deviation) / (n + 1.0)).clamp(0.0, 1.0);
        self.n = self.n.saturating_add(1);
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::new(0.5)
    }
}

/// Node kind. Closed set; type-specific behaviour lives in data tables,
/// not dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    Wisdom = 0,
    Belief = 1,
    Intention = 2,
    Aspiration = 3,
    Episode = 4,
    Operation = 5,
    Invariant = 6,
    Identity = 7,
    Term = 8,
    Failure = 9,
    Dream = 10,
    Voice = 11,
    Meta = 12,
    Gap = 13,
    Question = 14,
    StoryThread = 15,
    Ledger = 16,
    Entity = 17,
    Triplet = 18,
}

impl NodeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Wisdom),
            1 => Some(Self::Belief),
            2 => Some(Self::Intention),
            3 => Some(Self::Aspiration),
            4 => Some(Self::Episode),
            5 => Some(Self::Operation),
            6 => Some(Self::Invariant),
            7 => Some(Self::Identity),
            8 => Some(Self::Term),
            9 => Some(Self::Failure),
            10 => Some(Self::Dream),
            11 => Some(Self::Voice),
            12 => Some(Self::Meta),
            13 => Some(Self::Gap),
            14 => Some(Self::Question),
            15 => Some(Self::StoryThread),
            16 => Some(Self::Ledger),
            17 => Some(Self::Entity),
            18 => Some(Self::Triplet),
            _ => None,
        }
    }

    pub const ALL: [NodeType; 19] = [
        Self::Wisdom,
        Self::Belief,
        Self::Intention,
        Self::Aspiration,
        Self::Episode,
        Self::Operation,
        Self::Invariant,
        Self::Identity,
        Self::Term,
        Self::Failure,
        Self::Dream,
        Self::Voice,
        Self::Meta,
        Self::Gap,
        Self::Question,
        Self::StoryThread,
        Self::Ledger,
        Self::Entity,
        Self::Triplet,
    ];
}

/// Edge kind. The retrieval pipeline only distinguishes `Similar`
/// (Hebbian-written, eligible for reinforcement) from the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EdgeKind {
    Similar = 0,
    TriggeredBy = 1,
    Supports = 2,
    Contradicts = 3,
    EvolvedFrom = 4,
    Continues = 5,
    Mentions = 6,
    IsA = 7,
    RelatesTo = 8,
    Uses = 9,
    Contains = 10,
    Causes = 11,
    Requires = 12,
    AppliedIn = 13,
    ScopedTo = 14,
}

impl EdgeKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "similar" => Some(Self::Similar),
            "triggered-by" => Some(Self::TriggeredBy),
            "supports" => Some(Self::Supports),
            "contradicts" => Some(Self::Contradicts),
            "evolved-from" => Some(Self::EvolvedFrom),
            "continues" => Some(Self::Continues),
            "mentions" => Some(Self::Mentions),
            "is-a" => Some(Self::IsA),
            "relates-to" => Some(Self::RelatesTo),
            "uses" => Some(Self::Uses),
            "contains" => Some(Self::Contains),
            "causes" => Some(Self::Causes),
            "requires" => Some(Self::Requires),
            "applied-in" => Some(Self::AppliedIn),
            "scoped-to" => Some(Self::ScopedTo),
            _ => None,
        }
    }
}

/// Outgoing edge. Weight in [0, 1], monotone non-decreasing under
/// Hebbian updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub target: NodeId,
    pub kind: EdgeKind,
    pub weight: f32,
}

/// Storage tier label carried in the slot record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StorageTier {
    Hot = 0,
    Warm = 1,
    Cold = 2,
}

impl StorageTier {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Warm,
            2 => Self::Cold,
            _ => Self::Hot,
        }
    }
}

/// A fully materialized node, assembled from the unified index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    pub embedding: Vec<f32>,
    pub payload: Vec<u8>,
    pub confidence: Confidence,
    pub tau_created: Timestamp,
    pub tau_accessed: Timestamp,
    /// Decay rate per day; effective confidence relaxes toward zero.
    pub delta: f32,
    /// Epiplexity: reconstructability score in [0, 1].
    pub epsilon: f32,
    pub edges: Vec<Edge>,
    pub tags: Vec<String>,
    pub tier: StorageTier,
}

impl Node {
    pub fn text(&self) -> Option<String> {
        if self.payload.is_empty() {
            return None;
        }
        String::from_utf8(self.payload.clone()).ok()
    }
}

/// Search mode for hybrid retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    /// Semantic only.
    Dense,
    /// BM25 only.
    Sparse,
    /// Dense + sparse with RRF fusion.
    Hybrid,
}

/// One retrieval result row.
#[derive(Debug, Clone, Serialize)]
pub struct Recall {
    pub id: NodeId,
    /// Raw cosine similarity to the query.
    pub similarity: f32,
    /// Blended relevance after every pipeline stage.
    pub relevance: f32,
    pub epsilon: f32,
    pub node_type: NodeType,
    pub confidence: Confidence,
    pub created: Timestamp,
    pub accessed: Timestamp,
    pub payload: Vec<u8>,
    pub text: Option<String>,
    pub has_conflict: bool,
    pub conflicting_ids: Vec<NodeId>,
}

/// Store-wide counters and timestamps.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MindState {
    pub snapshot_id: u64,
    pub total_nodes: usize,
    pub hot_nodes: usize,
    pub warm_nodes: usize,
    pub cold_nodes: usize,
    pub triplet_count: usize,
    pub last_decay: Timestamp,
    pub last_checkpoint: Timestamp,
    pub embedder_ready: bool,
}

/// Graph coherence statistics, reported as a health signal.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Coherence {
    pub local: f32,
    pub global: f32,
    pub temporal: f32,
    pub structural: f32,
}

impl Coherence {
    /// Scalar summary (tau).
    pub fn tau(&self) -> f32 {
        0.3 * self.local + 0.3 * self.global + 0.2 * self.temporal + 0.2 * self.structural
    }
}

/// Engine health, reported as four sub-scores plus the weighted total.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MindHealth {
    /// File integrity: headers, free list, id map.
    pub structural: f32,
    /// Graph coherence: edge validity, orphans.
    pub semantic: f32,
    /// Decay applied recently, WAL bounded.
    pub temporal: f32,
    /// Headroom against slot and quota limits.
    pub capacity: f32,
}

impl MindHealth {
    /// Overall vitality (psi).
    pub fn psi(&self) -> f32 {
        0.4 * self.structural + 0.3 * self.semantic + 0.2 * self.temporal + 0.1 * self.capacity
    }

    pub fn critical(&self) -> bool {
        self.psi() < 0.6 || self.structural < 0.5
    }

    pub fn status(&self) -> &'static str {
        let score = self.psi();
        if score >= 0.95 {
            "healthy"
        } else if score >= 0.80 {
            "degraded"
        } else if score >= 0.60 {
            "repair_needed"
        } else {
            "critical"
        }
    }
}

/// Report returned by `tick()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DynamicsReport {
    pub nodes_decayed: usize,
    pub nodes_pruned: usize,
    pub tier_demotions: usize,
    pub checkpointed: bool,
    pub feedback_applied: usize,
    pub wisdom_synthesized: usize,
    pub attractors_found: usize,
    pub nodes_settled: usize,
    pub psi: f32,
}
