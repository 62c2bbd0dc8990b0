//! Approximate nearest-neighbour index: a multi-layer skip-list graph of
//! slot-to-slot connections, navigated greedily from a high sparse level
//! down to the wide base level.
//!
//! The graph works in similarity space (cosine, higher is closer) and is
//! deletion-tolerant: removed slots drop out of every adjacency list and
//! searches simply flow around the hole. Adjacency is persisted through
//! the connection pool and rebuilt from vectors when the pool is lost.

use crate::connection_pool::PoolEntry;
use crate::types::SlotId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Per-level adjacency list. M is small, so inline storage wins.
type Neighbors = SmallVec<[SlotId; 16]>;

#[derive(Debug, Clone)]
pub struct AnnConfig {
    /// Target out-degree per level (M).
    pub max_neighbors: usize,
    /// Candidate pool size during insert.
    pub ef_construction: usize,
    /// Candidate pool size during query.
    pub ef_search: usize,
    /// Hard cap on sampled level height.
    pub max_level: usize,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            max_neighbors: 16,
            ef_construction: 200,
            ef_search: 50,
            max_level: 16,
        }
    }
}

/// Candidate ordered by similarity, ties broken toward the smaller slot
/// id so results are deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    sim: f32,
    slot: SlotId,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sim
            .total_cmp(&other.sim)
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct NavGraph {
    config: AnnConfig,
    /// slot -> adjacency per level; index 0 is the widest level.
    nodes: HashMap<SlotId, Vec<Neighbors>>,
    entry_point: Option<SlotId>,
    top_level: usize,
    level_mult: f64,
    rng: StdRng,
}

impl NavGraph {
    pub fn new(config: AnnConfig, rng_seed: u64) -> Self {
        let level_mult = 1.0 / (config.max_neighbors.max(2) as f64).ln();
        Self {
            config,
            nodes: HashMap::new(),
            entry_point: None,
            top_level: 0,
            level_mult,
            rng: StdRng::seed_from_u64(rng_seed),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.nodes.contains_key(&slot)
    }

    /// Geometric level sample.
    fn sample_level(&mut self) -> usize {
        let uniform: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = (-uniform.ln() * self.level_mult).floor() as usize;
        level.min(self.config.max_level)
    }

    /// Insert a slot. `sim(a, b)` must return the similarity between the
    /// stored vectors of two slots (both may equal the new slot).
    pub fn insert(&mut self, slot: SlotId, sim: &dyn Fn(SlotId, SlotId) -> f32) {
        if self.nodes.contains_key(&slot) {
            return;
        }
        let level = self.sample_level();
        let mut adjacency = vec![Neighbors::new(); level + 1];

        let Some(mut entry) = self.entry_point else {
            self.nodes.insert(slot, adjacency);
            self.entry_point = Some(slot);
            self.top_level = level;
            return;
        };

        let query_sim = |candidate: SlotId| sim(slot, candidate);

        // Greedy descent through the levels above the new node's height.
        for lvl in ((level + 1)..=self.top_level).rev() {
            entry = self.greedy_closest(entry, lvl, &query_sim);
        }

        // Build connections from the node's top level down to 0.
        let mut entry_points = vec![entry];
        for lvl in (0..=level.min(self.top_level)).rev() {
            let candidates =
                self.search_layer(&entry_points, self.config.ef_construction, lvl, &query_sim);
            let m = self.max_degree(lvl);
            let selected: Vec<SlotId> =
                candidates.iter().take(m).map(|c| c.slot).collect();

            for &neighbor in &selected {
                adjacency[lvl].push(neighbor);
                if let Some(neighbor_adj) = self.nodes.get_mut(&neighbor) {
                    if lvl < neighbor_adj.len() {
                        neighbor_adj[lvl].push(slot);
                    }
                }
            }
            for &neighbor in &selected {
                self.prune_neighbors(neighbor, lvl, sim);
            }
            entry_points = candidates.iter().map(|c| c.slot).collect();
            if entry_points.is_empty() {
                entry_points.push(entry);
            }
        }

        self.nodes.insert(slot, adjacency);
        if level > self.top_level {
            self.top_level = level;
            self.entry_point = Some(slot);
        }
    }

    /// Trim a node's adjacency at `lvl` back to the degree cap, keeping
    /// the most similar neighbors.
    fn prune_neighbors(&mut self, slot: SlotId, lvl: usize, sim: &dyn Fn(SlotId, SlotId) -> f32) {
        let m = self.max_degree(lvl);
        let Some(adj) = self.nodes.get(&slot) else {
            return;
        };
        if lvl >= adj.len() || adj[lvl].len() <= m {
            return;
        }
        let mut scored: Vec<Scored> = adj[lvl]
            .iter()
            .map(|&n| Scored {
                sim: sim(slot, n),
                slot: n,
            })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        scored.truncate(m);
        if let Some(adj) = self.nodes.get_mut(&slot) {
            adj[lvl] = scored.into_iter().map(|c| c.slot).collect();
        }
    }

    fn max_degree(&self, lvl: usize) -> usize {
        // The base level is wider, as in every small-world design.
        if lvl == 0 {
            self.config.max_neighbors * 2
        } else {
            self.config.max_neighbors
        }
    }

    fn greedy_closest(&self, start: SlotId, lvl: usize, query_sim: &dyn Fn(SlotId) -> f32) -> SlotId {
        let mut current = start;
        let mut current_sim = query_sim(current);
        loop {
            let mut improved = false;
            if let Some(adj) = self.nodes.get(&current) {
                if lvl < adj.len() {
                    for &neighbor in &adj[lvl] {
                        let s = query_sim(neighbor);
                        if s > current_sim {
                            current = neighbor;
                            current_sim = s;
                            improved = true;
                        }
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first expansion at one level; returns up to `ef` candidates
    /// sorted best-first.
    fn search_layer(
        &self,
        entry_points: &[SlotId],
        ef: usize,
        lvl: usize,
        query_sim: &dyn Fn(SlotId) -> f32,
    ) -> Vec<Scored> {
        let mut visited: HashSet<SlotId> = HashSet::new();
        let mut frontier: BinaryHeap<Scored> = BinaryHeap::new();
        let mut results: BinaryHeap<std::cmp::Reverse<Scored>> = BinaryHeap::new();

        for &ep in entry_points {
            if !self.nodes.contains_key(&ep) || !visited.insert(ep) {
                continue;
            }
            let scored = Scored {
                sim: query_sim(ep),
                slot: ep,
            };
            frontier.push(scored);
            results.push(std::cmp::Reverse(scored));
        }

        while let Some(candidate) = frontier.pop() {
            let worst = results.peek().map(|r| r.0.sim).unwrap_or(f32::MIN);
            if results.len() >= ef && candidate.sim < worst {
                break;
            }
            if let Some(adj) = self.nodes.get(&candidate.slot) {
                if lvl < adj.len() {
                    for &neighbor in &adj[lvl] {
                        if !visited.insert(neighbor) {
                            continue;
                        }
                        let scored = Scored {
                            sim: query_sim(neighbor),
                            slot: neighbor,
                        };
                        let worst = results.peek().map(|r| r.0.sim).unwrap_or(f32::MIN);
                        if results.len() < ef || scored.sim > worst {
                            frontier.push(scored);
                            results.push(std::cmp::Reverse(scored));
                            if results.len() > ef {
                                results.pop();
                            }
                        }
                    }
                }
            }
        }

        let mut out: Vec<Scored> = results.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }

    /// k approximate nearest neighbours, best first. May return fewer
    /// than `k`. Ties break toward the smaller slot id.
    pub fn search(&self, query_sim: &dyn Fn(SlotId) -> f32, k: usize) -> Vec<(SlotId, f32)> {
        let Some(mut entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        for lvl in (1..=self.top_level).rev() {
            entry = self.greedy_closest(entry, lvl, query_sim);
        }

        let ef = self.config.ef_search.max(k);
        let candidates = self.search_layer(&[entry], ef, 0, query_sim);
        candidates
            .into_iter()
            .take(k)
            .map(|c| (c.slot, c.sim))
            .collect()
    }

    /// Remove a slot; every reference to it is dropped and the entry
    /// point is re-elected if needed.
    pub fn remove(&mut self, slot: SlotId) {
        if self.nodes.remove(&slot).is_none() {
            return;
        }
        for adj in self.nodes.values_mut() {
            for level in adj.iter_mut() {
                level.retain(|n| *n != slot);
            }
        }
        if self.entry_point == Some(slot) {
            self.entry_point = self
                .nodes
                .iter()
                .max_by_key(|&(&s, adj)| (adj.len(), std::cmp::Reverse(s)))
                .map(|(&s, _)| s);
            self.top_level = self
                .entry_point
                .and_then(|s| self.nodes.get(&s))
                .map(|adj| adj.len().saturating_sub(1))
                .unwrap_or(0);
        }
    }

    /// Export adjacency into pool entries (merged with semantic edges by
    /// the caller).
    pub fn export_levels(&self, slot: SlotId) -> Option<Vec<Vec<SlotId>>> {
        self.nodes
            .get(&slot)
            .map(|adj| adj.iter().map(|l| l.to_vec()).collect())
    }

    /// Restore from pool entries. Any slot present in `entries` becomes
    /// navigable again without re-running construction.
    pub fn restore(config: AnnConfig, rng_seed: u64, entries: &HashMap<SlotId, PoolEntry>) -> Self {
        let mut graph = Self::new(config, rng_seed);
        for (slot, entry) in entries {
            if entry.levels.is_empty() {
                graph.nodes.insert(*slot, vec![Neighbors::new()]);
                continue;
            }
            let adj: Vec<Neighbors> = entry
                .levels
                .iter()
                .map(|l| l.iter().copied().collect())
                .collect();
            let height = adj.len() - 1;
            if height >= graph.top_level || graph.entry_point.is_none() {
                graph.top_level = height;
                graph.entry_point = Some(*slot);
            }
            graph.nodes.insert(*slot, adj);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantized::QuantizedVector;
    use chitta_embedder::normalize;
    use rand::{Rng, SeedableRng};

    fn random_unit_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
                normalize(&mut v);
                v
            })
            .collect()
    }

    fn build_graph(vectors: &[QuantizedVector]) -> NavGraph {
        let mut graph = NavGraph::new(AnnConfig::default(), 42);
        let sim = |a: SlotId, b: SlotId| vectors[a as usize].cosine_approx(&vectors[b as usize]);
        for slot in 0..vectors.len() as SlotId {
            graph.insert(slot, &sim);
        }
        graph
    }

    #[test]
    fn test_search_finds_self() {
        let vectors: Vec<QuantizedVector> = random_unit_vectors(200, 64, 7)
            .iter()
            .map(|v| QuantizedVector::from_float(v))
            .collect();
        let graph = build_graph(&vectors);

        for probe in [0u32, 57, 199] {
            let results = graph.search(&|s| vectors[probe as usize].cosine_approx(&vectors[s as usize]), 5);
            assert_eq!(results.first().map(|r| r.0), Some(probe));
        }
    }

    #[test]
    fn test_recall_against_brute_force() {
        let dim = 384;
        let floats = random_unit_vectors(500, dim, 11);
        let vectors: Vec<QuantizedVector> = floats
            .iter()
            .map(|v| QuantizedVector::from_float(v))
            .collect();
        let graph = build_graph(&vectors);

        let queries = random_unit_vectors(20, dim, 23);
        let k = 10;
        let mut hits = 0usize;
        let mut total = 0usize;

        for q in &queries {
            let qv = QuantizedVector::from_float(q);
            let ann: Vec<SlotId> = graph
                .search(&|s| qv.cosine_approx(&vectors[s as usize]), k)
                .into_iter()
                .map(|r| r.0)
                .collect();

            let mut exact: Vec<(SlotId, f32)> = (0..vectors.len() as SlotId)
                .map(|s| (s, qv.cosine_approx(&vectors[s as usize])))
                .collect();
            exact.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            let truth: Vec<SlotId> = exact.into_iter().take(k).map(|r| r.0).collect();

            total += k;
            hits += truth.iter().filter(|s| ann.contains(s)).count();
        }

        let recall = hits as f32 / total as f32;
        assert!(recall >= 0.90, "recall {recall} below floor");
    }

    #[test]
    fn test_results_sorted_and_bounded() {
        let vectors: Vec<QuantizedVector> = random_unit_vectors(100, 64, 3)
            .iter()
            .map(|v| QuantizedVector::from_float(v))
            .collect();
        let graph = build_graph(&vectors);

        let results = graph.search(&|s| vectors[0].cosine_approx(&vectors[s as usize]), 10);
        assert!(results.len() <= 10);
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_remove_tolerated() {
        let vectors: Vec<QuantizedVector> = random_unit_vectors(50, 64, 9)
            .iter()
            .map(|v| QuantizedVector::from_float(v))
            .collect();
        let mut graph = build_graph(&vectors);

        for slot in 10..20 {
            graph.remove(slot);
        }
        let results = graph.search(&|s| vectors[30].cosine_approx(&vectors[s as usize]), 5);
        assert!(!results.is_empty());
        for (slot, _) in &results {
            assert!(!(10..20).contains(slot));
        }
    }

    #[test]
    fn test_remove_entry_point_recovers() {
        let vectors: Vec<QuantizedVector> = random_unit_vectors(30, 64, 13)
            .iter()
            .map(|v| QuantizedVector::from_float(v))
            .collect();
        let mut graph = build_graph(&vectors);

        while let Some(entry) = graph.entry_point {
            graph.remove(entry);
            if graph.is_empty() {
                break;
            }
            let results = graph.search(&|s| vectors[0].cosine_approx(&vectors[s as usize]), 3);
            assert!(!results.is_empty());
        }
    }

    #[test]
    fn test_export_restore_round_trip() {
        let vectors: Vec<QuantizedVector> = random_unit_vectors(80, 64, 17)
            .iter()
            .map(|v| QuantizedVector::from_float(v))
            .collect();
        let graph = build_graph(&vectors);

        let mut entries = HashMap::new();
        for slot in 0..vectors.len() as SlotId {
            entries.insert(
                slot,
                PoolEntry {
                    owner_slot: slot,
                    levels: graph.export_levels(slot).unwrap(),
                    edges: Vec::new(),
                },
            );
        }

        let restored = NavGraph::restore(AnnConfig::default(), 42, &entries);
        assert_eq!(restored.len(), graph.len());
        let results = restored.search(&|s| vectors[5].cosine_approx(&vectors[s as usize]), 5);
        assert_eq!(results.first().map(|r| r.0), Some(5));
    }
}
