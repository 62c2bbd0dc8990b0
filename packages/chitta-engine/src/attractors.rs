//! Attractor dynamics: high-confidence, well-connected, stable nodes act
//! as conceptual gravity wells. Discovery ranks them; basins assign every
//! node to the attractor that pulls it hardest; epiplexity scores how
//! reconstructable a node is from the structures around it.

use crate::quantized::QuantizedVector;
use crate::types::{NodeId, SlotId};
use serde::Serialize;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.6;
pub const DEFAULT_MIN_EDGES: usize = 2;
/// Pull below this leaves a node outside every basin.
pub const MIN_PULL: f32 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct Attractor {
    pub id: NodeId,
    pub slot: SlotId,
    pub strength: f32,
    /// First characters of the payload text, for identification.
    pub label: String,
    pub basin_size: usize,
}

/// What discovery needs to know about one node.
#[derive(Debug, Clone)]
pub struct AttractorCandidate {
    pub id: NodeId,
    pub slot: SlotId,
    pub effective_confidence: f32,
    pub degree: usize,
    pub age_days: f32,
    pub label: String,
}

/// `0.4 * confidence + 0.3 * connectivity + 0.3 * stability`, with
/// connectivity log-scaled and stability saturating at 30 days.
pub fn attractor_strength(candidate: &AttractorCandidate) -> f32 {
    let confidence_score = candidate.effective_confidence;
    let connectivity_score = ((1.0 + candidate.degree as f32).log2() / 4.0).min(1.0);
    let age_score = (candidate.age_days / 30.0).min(1.0);
    0.4 * confidence_score + 0.3 * connectivity_score + 0.3 * age_score
}

/// Rank eligible candidates, strongest first, ties by id.
pub fn find_attractors(
    candidates: &[AttractorCandidate],
    max_attractors: usize,
    min_confidence: f32,
    min_edges: usize,
) -> Vec<Attractor> {
    let mut attractors: Vec<Attractor> = candidates
        .iter()
        .filter(|c| c.effective_confidence >= min_confidence && c.degree >= min_edges)
        .map(|c| Attractor {
            id: c.id,
            slot: c.slot,
            strength: attractor_strength(c),
            label: c.label.clone(),
            basin_size: 0,
        })
        .collect();
    attractors.sort_by(|a, b| b.strength.total_cmp(&a.strength).then(a.id.cmp(&b.id)));
    attractors.truncate(max_attractors);
    attractors
}

/// The attractor pulling this vector hardest:
/// `pull = strength * cosine(node, attractor)`, gated at MIN_PULL.
pub fn compute_pull(
    vector: &QuantizedVector,
    attractors: &[(Attractor, QuantizedVector)],
) -> Option<(NodeId, f32)> {
    let mut best: Option<(NodeId, f32)> = None;
    for (attractor, attractor_vec) in attractors {
        let pull = attractor.strength * vector.cosine_approx(attractor_vec).max(0.0);
        match best {
            Some((_, current)) if pull <= current => {}
            _ if pull > MIN_PULL => best = Some((attractor.id, pull)),
            _ => {}
        }
    }
    best
}

/// Normalized Shannon entropy of the payload bytes, inverted: highly
/// repetitive content compresses well and scores near 1.
pub fn compression_score(payload: &[u8]) -> f32 {
    if payload.is_empty() {
        return 0.0;
    }
    let mut histogram = [0u32; 256];
    for &byte in payload {
        histogram[byte as usize] += 1;
    }
    let total = payload.len() as f32;
    let mut entropy = 0.0f32;
    for &count in &histogram {
        if count == 0 {
            continue;
        }
        let p = count as f32 / total;
        entropy -= p * p.log2();
    }
    (1.0 - entropy / 8.0).clamp(0.0, 1.0)
}

pub struct EpiplexityInputs {
    /// Pull toward the strongest attractor, 0 when outside every basin.
    pub attractor_pull: f32,
    pub effective_confidence: f32,
    pub degree: usize,
    pub compression: f32,
}

/// Weighted reconstructability score. The weights are a contract for
/// ordering, not calibrated absolutes.
pub fn epiplexity(inputs: &EpiplexityInputs) -> f32 {
    let structure = inputs.attractor_pull.clamp(0.0, 1.0);
    let confidence = inputs.effective_confidence.clamp(0.0, 1.0);
    let integration = (inputs.degree as f32 / 8.0).min(1.0);
    let compression = inputs.compression.clamp(0.0, 1.0);

    (0.30 * structure + 0.25 * confidence + 0.25 * integration + 0.20 * compression).min(1.0)
}

/// Aggregate statistics over a population of epiplexity scores.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EpiplexityStats {
    pub mean: f32,
    pub median: f32,
    pub min: f32,
    pub max: f32,
    pub count: usize,
    pub top_nodes: Vec<(NodeId, f32)>,
}

pub fn epiplexity_stats(mut scores: Vec<(NodeId, f32)>) -> EpiplexityStats {
    if scores.is_empty() {
        return EpiplexityStats::default();
    }
    scores.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let count = scores.len();
    let sum: f32 = scores.iter().map(|s| s.1).sum();
    EpiplexityStats {
        mean: sum / count as f32,
        median: scores[count / 2].1,
        min: scores.last().map(|s| s.1).unwrap_or(0.0),
        max: scores.first().map(|s| s.1).unwrap_or(0.0),
        count,
        top_nodes: scores.into_iter().take(10).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(confidence: f32, degree: usize, age_days: f32) -> AttractorCandidate {
        AttractorCandidate {
            id: NodeId::generate(),
            slot: 0,
            effective_confidence: confidence,
            degree,
            age_days,
            label: String::new(),
        }
    }

    #[test]
    fn test_strength_ordering() {
        let strong = attractor_strength(&candidate(0.9, 16, 60.0));
        let weak = attractor_strength(&candidate(0.6, 2, 1.0));
        assert!(strong > weak);
        assert!(strong <= 1.0);
    }

    #[test]
    fn test_discovery_filters_and_sorts() {
        let candidates = vec![
            candidate(0.9, 8, 40.0),
            candidate(0.3, 8, 40.0),  // below confidence gate
            candidate(0.9, 1, 40.0),  // below edge gate
            candidate(0.7, 4, 10.0),
        ];
        let attractors = find_attractors(&candidates, 10, DEFAULT_MIN_CONFIDENCE, DEFAULT_MIN_EDGES);
        assert_eq!(attractors.len(), 2);
        for pair in attractors.windows(2) {
            assert!(pair[0].strength >= pair[1].strength);
        }
    }

    #[test]
    fn test_pull_picks_strongest() {
        let base: Vec<f32> = (0..32).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect();
        let near: Vec<f32> = {
            let mut v = base.clone();
            v[1] = 0.2;
            let mut v2 = v.clone();
            chitta_embedder::normalize(&mut v2);
            v2
        };
        let far: Vec<f32> = (0..32).map(|i| if i == 16 { 1.0 } else { 0.0 }).collect();

        let make = |strength: f32, vec: &[f32]| {
            (
                Attractor {
                    id: NodeId::generate(),
                    slot: 0,
                    strength,
                    label: String::new(),
                    basin_size: 0,
                },
                QuantizedVector::from_float(vec),
            )
        };
        let attractors = vec![make(0.9, &near), make(0.9, &far)];
        let node_vec = QuantizedVector::from_float(&base);

        let (winner, pull) = compute_pull(&node_vec, &attractors).unwrap();
        assert_eq!(winner, attractors[0].0.id);
        assert!(pull > MIN_PULL);
    }

    #[test]
    fn test_weak_pull_is_none() {
        let a: Vec<f32> = (0..32).map(|i| if i == 0 { 1.0 } else { 0.0 }).collect();
        let b: Vec<f32> = (0..32).map(|i| if i == 16 { 1.0 } else { 0.0 }).collect();
        let attractors = vec![(
            Attractor {
                id: NodeId::generate(),
                slot: 0,
                strength: 0.5,
                label: String::new(),
                basin_size: 0,
            },
            QuantizedVector::from_float(&b),
        )];
        assert!(compute_pull(&QuantizedVector::from_float(&a), &attractors).is_none());
    }

    #[test]
    fn test_compression_score_extremes() {
        let repetitive = vec![b'a'; 1000];
        let varied: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        assert!(compression_score(&repetitive) > compression_score(&varied));
        assert_eq!(compression_score(&[]), 0.0);
    }

    #[test]
    fn test_epiplexity_ordering() {
        let rich = epiplexity(&EpiplexityInputs {
            attractor_pull: 0.8,
            effective_confidence: 0.9,
            degree: 10,
            compression: 0.7,
        });
        let poor = epiplexity(&EpiplexityInputs {
            attractor_pull: 0.0,
            effective_confidence: 0.2,
            degree: 0,
            compression: 0.1,
        });
        assert!(rich > poor);
        assert!(rich <= 1.0);
    }

    #[test]
    fn test_stats() {
        let scores: Vec<(NodeId, f32)> = (0..20)
            .map(|i| (NodeId::generate(), i as f32 / 20.0))
            .collect();
        let stats = epiplexity_stats(scores);
        assert_eq!(stats.count, 20);
        assert_eq!(stats.top_nodes.len(), 10);
        assert!(stats.max >= stats.median && stats.median >= stats.min);
    }
}
