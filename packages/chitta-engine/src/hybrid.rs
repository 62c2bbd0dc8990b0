//! Hybrid fusion: Reciprocal Rank Fusion of dense and sparse candidate
//! lists. RRF is scale-free, so BM25 scores and cosines never need to be
//! normalized against each other.

use crate::types::SlotId;
use std::collections::HashMap;

pub const RRF_CONSTANT: f32 = 60.0;
pub const DENSE_WEIGHT: f32 = 0.7;
pub const SPARSE_WEIGHT: f32 = 0.3;

/// Fuse two ranked lists: `score(d) = sum w_i / (c + rank_i(d))`.
/// Output is sorted best-first with slot-id tie-breaks.
pub fn reciprocal_rank_fusion(
    dense: &[(SlotId, f32)],
    sparse: &[(SlotId, f32)],
    constant: f32,
    dense_weight: f32,
    sparse_weight: f32,
) -> Vec<(SlotId, f32)> {
    let mut scores: HashMap<SlotId, f32> = HashMap::new();

    for (rank, (slot, _)) in dense.iter().enumerate() {
        *scores.entry(*slot).or_default() += dense_weight / (constant + rank as f32 + 1.0);
    }
    for (rank, (slot, _)) in sparse.iter().enumerate() {
        *scores.entry(*slot).or_default() += sparse_weight / (constant + rank as f32 + 1.0);
    }

    let mut fused: Vec<(SlotId, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    fused
}
