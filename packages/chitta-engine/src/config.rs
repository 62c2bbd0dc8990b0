//! Mind configuration.

use crate::provenance::ProvenanceSource;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MindConfig {
    /// Base path; every store file hangs off it (`<path>.unified`,
    /// `<path>.wal`, ...).
    pub path: PathBuf,

    /// Embedding dimension, fixed at store creation.
    pub dimension: usize,

    // Tiering
    pub hot_capacity: usize,
    pub warm_capacity: usize,
    pub hot_age_ms: i64,
    pub warm_age_ms: i64,

    // Maintenance cadence
    pub decay_interval_ms: i64,
    pub checkpoint_interval_ms: i64,
    /// Effective confidence below this marks a node prunable.
    pub prune_threshold: f32,

    // Secondary index switches
    pub skip_bm25: bool,
    pub bm25_max_nodes: usize,
    pub use_mmap_graph: bool,

    // Capacity management
    pub enable_quota_manager: bool,
    pub total_capacity: usize,

    // Feature toggles
    pub enable_utility_decay: bool,
    pub enable_attractor_dampener: bool,
    pub enable_provenance: bool,
    pub enable_realm_scoping: bool,
    pub enable_truth_maintenance: bool,
    pub enable_query_routing: bool,

    // Per-session defaults
    pub default_realm: String,
    pub default_provenance_source: ProvenanceSource,
    pub session_id: String,
}

impl MindConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn file(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chitta".to_string());
        name.push('.');
        name.push_str(suffix);
        self.path.with_file_name(name)
    }
}

impl Default for MindConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("chitta"),
            dimension: chitta_embedder::DEFAULT_DIMENSION,
            hot_capacity: 1000,
            warm_capacity: 10_000,
            hot_age_ms: 3_600_000,
            warm_age_ms: 86_400_000,
            decay_interval_ms: 600_000,
            checkpoint_interval_ms: 60_000,
            prune_threshold: 0.1,
            skip_bm25: false,
            bm25_max_nodes: crate::bm25::DEFAULT_MAX_NODES,
            use_mmap_graph: false,
            enable_quota_manager: false,
            total_capacity: 100_000,
            enable_utility_decay: true,
            enable_attractor_dampener: true,
            enable_provenance: true,
            enable_realm_scoping: true,
            enable_truth_maintenance: true,
            enable_query_routing: true,
            default_realm: crate::realm_scoping::ROOT_REALM.to_string(),
            default_provenance_source: ProvenanceSource::Unknown,
            session_id: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_suffixes() {
        let config = MindConfig::new("/data/soul");
        assert_eq!(config.file("unified"), PathBuf::from("/data/soul.unified"));
        assert_eq!(config.file("graph.wal"), PathBuf::from("/data/soul.graph.wal"));
    }
}
