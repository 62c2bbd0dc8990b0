//! Chitta Engine - Persistent Associative Memory
//!
//! A custom storage engine for a self-reshaping associative memory.
//! Not a database.
//!
//! Key pieces:
//! - Unified slotted index, memory-mapped, with int8-quantized vectors
//! - Crash-safe write-ahead log with CRC-framed deltas
//! - Multi-layer navigable ANN graph persisted in a connection pool
//! - Retrieval pipeline fusing dense, sparse, spreading-activation,
//!   attractor, competition, and priming signals
//! - Online learning: Hebbian reinforcement, utility-calibrated decay,
//!   episode synthesis, quota eviction

mod ann;
mod attractor_dampener;
mod attractors;
mod bm25;
mod competition;
mod config;
mod connection_pool;
mod error;
mod gap_inquiry;
mod hybrid;
mod meta_store;
mod mind;
mod provenance;
mod quantized;
mod quota;
mod realm_scoping;
mod recall;
mod review_queue;
mod router;
mod scoring;
mod spreading;
mod synthesis_queue;
mod tag_index;
mod triplet_store;
mod truth_maintenance;
mod types;
mod unified_index;
mod utility_decay;
mod wal;

pub use attractors::{Attractor, EpiplexityStats};
pub use competition::CompetitionConfig;
pub use config::MindConfig;
pub use error::{ChittaError, Result};
pub use gap_inquiry::KnowledgeGap;
pub use mind::Mind;
pub use provenance::{ProvenanceRecord, ProvenanceSource};
pub use quantized::QuantizedVector;
pub use recall::{AttractorReport, PropagationResult};
pub use review_queue::{ReviewItem, ReviewStatus};
pub use scoring::ScoringConfig;
pub use triplet_store::Triplet;
pub use truth_maintenance::Contradiction;
pub use types::{
    Coherence, Confidence, DynamicsReport, Edge, EdgeKind, MindHealth, MindState, Node, NodeId,
    NodeType, Recall, SearchMode, SlotId, StorageTier, Timestamp,
};

/// On-disk format version of the unified index.
pub const FORMAT_VERSION: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version() {
        assert_eq!(FORMAT_VERSION, 2);
    }
}
