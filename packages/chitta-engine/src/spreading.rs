//! Spreading activation: breadth-first propagation of activation energy
//! over weighted edges, decaying per hop.

use crate::types::NodeId;
use std::collections::{HashMap, VecDeque};

/// Activation below this never propagates further.
pub const ACTIVATION_FLOOR: f32 = 0.01;

/// Contributions below this are accumulated but not expanded.
const EXPANSION_FLOOR: f32 = 0.05;

/// Spread activation from one seed. `neighbors(id)` yields the outgoing
/// `(target, edge_weight)` pairs. Returns total activation per reached
/// node (seed included), sorted strongest first, ties by id.
pub fn spread_activation(
    seed: NodeId,
    initial_strength: f32,
    decay_factor: f32,
    max_hops: usize,
    neighbors: &dyn Fn(&NodeId) -> Vec<(NodeId, f32)>,
) -> Vec<(NodeId, f32)> {
    let mut activation: HashMap<NodeId, f32> = HashMap::new();
    let mut frontier: VecDeque<(NodeId, f32, usize)> = VecDeque::new();

    activation.insert(seed, initial_strength);
    frontier.push_back((seed, initial_strength, 0));

    while let Some((current, strength, hop)) = frontier.pop_front() {
        if hop >= max_hops || strength < ACTIVATION_FLOOR {
            continue;
        }
        for (target, weight) in neighbors(&current) {
            let propagated = strength * decay_factor * weight;
            if propagated < ACTIVATION_FLOOR {
                continue;
            }
            *activation.entry(target).or_default() += propagated;
            if propagated >= EXPANSION_FLOOR {
                frontier.push_back((target, propagated, hop + 1));
            }
        }
    }

    let mut ranked: Vec<(NodeId, f32)> = activation.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

/// Accumulate activation from several seeds into one map.
pub fn spread_from_seeds(
    seeds: &[(NodeId, f32)],
    decay_factor: f32,
    max_hops: usize,
    neighbors: &dyn Fn(&NodeId) -> Vec<(NodeId, f32)>,
) -> HashMap<NodeId, f32> {
    let mut total: HashMap<NodeId, f32> = HashMap::new();
    for &(seed, strength) in seeds {
        for (id, activation) in
            spread_activation(seed, strength, decay_factor, max_hops, neighbors)
        {
            *total.entry(id).or_default() += activation;
        }
    }
    total
}
