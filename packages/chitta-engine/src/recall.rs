//! Retrieval pipeline and dynamics.
//!
//! Every recall variant runs the same ordered stages: WAL reconciliation,
//! optional intent routing, candidate generation (dense / sparse /
//! hybrid), realm filtering, relevance scoring, lateral inhibition,
//! attractor dampening, truncation, side effects, and conflict
//! annotation. Resonance variants add spreading activation before the
//! scoring stage.

use crate::attractors::{
    self, Attractor, AttractorCandidate, EpiplexityInputs, EpiplexityStats,
};
use crate::competition::{compute_inhibition, pair_index};
use crate::error::{ChittaError, Result};
use crate::hybrid::{reciprocal_rank_fusion, DENSE_WEIGHT, RRF_CONSTANT, SPARSE_WEIGHT};
use crate::mind::{Mind, MindInner};
use crate::quantized::QuantizedVector;
use crate::router::QueryIntent;
use crate::scoring::{self, ScoreInputs};
use crate::spreading;
use crate::types::{
    now_ms, Coherence, Confidence, DynamicsReport, EdgeKind, NodeId, NodeType, Recall, SearchMode,
    SlotId, StorageTier, Timestamp, MS_PER_DAY,
};
use crate::wal::WalRecord;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Seeds taken for spreading activation.
const RESONANCE_SEEDS: usize = 5;
/// Hebbian strengthening applied between co-retrieved heads.
const RECALL_HEBBIAN_DELTA: f32 = 0.05;
/// Personalized PageRank teleport probability.
const PPR_ALPHA: f32 = 0.15;
/// Scale of the epiplexity-modulated relevance boost in full resonance.
const EPIPLEXITY_BOOST_ALPHA: f32 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct PropagationResult {
    pub nodes_affected: usize,
    pub total_delta_applied: f32,
    pub changes: Vec<(NodeId, f32)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AttractorReport {
    pub attractor_count: usize,
    pub nodes_settled: usize,
    /// (label, basin size) per attractor.
    pub basin_sizes: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RecallOptions {
    pub mode: SearchMode,
    pub primed: bool,
    pub hebbian: Option<f32>,
    pub route: bool,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Dense,
            primed: false,
            hebbian: None,
            route: true,
        }
    }
}

/// One candidate flowing through the pipeline.
#[derive(Debug, Clone)]
pub(crate) struct ScoredRow {
    slot: SlotId,
    id: NodeId,
    similarity: f32,
    relevance: f32,
    node_type: NodeType,
    confidence: Confidence,
    created: Timestamp,
    accessed: Timestamp,
    epsilon: f32,
}

impl Mind {
    // ========================
    // Recall entry points
    // ========================

    pub fn recall(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
        mode: SearchMode,
    ) -> Result<Vec<Recall>> {
        let mut inner = self.inner.write();
        inner.retrieve(
            query,
            k,
            threshold,
            RecallOptions {
                mode,
                hebbian: Some(RECALL_HEBBIAN_DELTA),
                ..Default::default()
            },
        )
    }

    /// Recall with session priming: results also join the session's
    /// recent observations.
    pub fn recall_primed(&self, query: &str, k: usize, threshold: f32) -> Result<Vec<Recall>> {
        let mut inner = self.inner.write();
        inner.retrieve(
            query,
            k,
            threshold,
            RecallOptions {
                mode: SearchMode::Dense,
                primed: true,
                hebbian: Some(RECALL_HEBBIAN_DELTA),
                route: true,
            },
        )
    }

    /// All nodes carrying `tag`, newest access first.
    pub fn recall_by_tag(&self, tag: &str, k: usize) -> Result<Vec<Recall>> {
        let mut inner = self.inner.write();
        inner.reconcile_wal()?;
        Ok(inner.tag_recall(&[tag.to_string()], k))
    }

    /// Intersection of all tags.
    pub fn recall_by_tags(&self, tags: &[String], k: usize) -> Result<Vec<Recall>> {
        let mut inner = self.inner.write();
        inner.reconcile_wal()?;
        Ok(inner.tag_recall(tags, k))
    }

    /// Tag filter first, then semantic re-ranking.
    pub fn recall_with_tag_filter(
        &self,
        query: &str,
        tag: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<Recall>> {
        let mut inner = self.inner.write();
        inner.reconcile_wal()?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = inner.embed(query)?;
        let qvec = QuantizedVector::from_float(&embedding);
        let slots = inner.tag_index.find(tag);
        let candidates: Vec<(SlotId, f32)> = slots
            .into_iter()
            .map(|slot| {
                let sim = inner.index.vector(slot).cosine_approx(&qvec);
                (slot, sim)
            })
            .collect();
        let rows = inner.score_candidates(candidates, threshold, false);
        inner.finish_pipeline(
            rows,
            k,
            RecallOptions {
                hebbian: None,
                route: false,
                ..Default::default()
            },
        )
    }

    // ========================
    // Resonance
    // ========================

    /// Semantic search blended with spreading activation.
    pub fn resonate(&self, query: &str, k: usize, spread_strength: f32) -> Result<Vec<Recall>> {
        let mut inner = self.inner.write();
        inner.resonate_internal(query, k, spread_strength, None, false)
    }

    /// Everything at once: priming, spreading activation, attractor
    /// basin coherence, competition, and Hebbian learning.
    pub fn full_resonate(
        &self,
        query: &str,
        k: usize,
        spread_strength: f32,
        hebbian_strength: f32,
    ) -> Result<Vec<Recall>> {
        let mut inner = self.inner.write();
        let mut results =
            inner.resonate_internal(query, k * 2, spread_strength, Some(hebbian_strength), true)?;

        // Epsilon-modulated relevance: high-epiplexity, high-confidence
        // memories are better resonance heads. The sqrt of the product
        // keeps the boost conservative when either factor is low.
        for result in results.iter_mut() {
            let safe_epsilon =
                (result.confidence.effective() * result.epsilon.clamp(0.0, 1.0)).sqrt();
            result.relevance *= 1.0 + EPIPLEXITY_BOOST_ALPHA * safe_epsilon;
        }
        results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance).then(a.id.cmp(&b.id)));

        // Basin coherence: results sharing the top result's attractor
        // pull get a boost.
        if let Some(top) = results.first() {
            let attractor_pairs = inner.attractor_pairs(RESONANCE_SEEDS);
            if !attractor_pairs.is_empty() {
                let top_pull = inner
                    .pull_of(&top.id, &attractor_pairs)
                    .map(|(attractor, _)| attractor);
                if let Some(primary) = top_pull {
                    for result in results.iter_mut() {
                        if let Some((attractor, _)) = inner.pull_of(&result.id, &attractor_pairs) {
                            if attractor == primary {
                                result.relevance *= 1.15;
                            }
                        }
                    }
                    results.sort_by(|a, b| {
                        b.relevance.total_cmp(&a.relevance).then(a.id.cmp(&b.id))
                    });
                }
            }
        }

        results.truncate(k);
        Ok(results)
    }

    /// Raw spreading activation from one seed node.
    pub fn spread_activation(
        &self,
        seed: &NodeId,
        initial_strength: f32,
        decay_factor: f32,
        max_hops: usize,
    ) -> Result<Vec<(NodeId, f32)>> {
        let inner = self.inner.read();
        inner.slot_of(seed)?;
        Ok(spreading::spread_activation(
            *seed,
            initial_strength,
            decay_factor,
            max_hops,
            &|id| inner.neighbors_of(id),
        ))
    }

    /// Personalized PageRank by forward push, seeded from the top dense
    /// matches.
    pub fn ppr_query(&self, query: &str, k: usize, epsilon: f32) -> Result<Vec<Recall>> {
        let mut inner = self.inner.write();
        inner.reconcile_wal()?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = inner.embed(query)?;
        let qvec = QuantizedVector::from_float(&embedding);
        let epsilon = if epsilon > 0.0 { epsilon } else { 1e-4 };

        let seeds = inner.index.search(&qvec, RESONANCE_SEEDS);
        if seeds.is_empty() {
            return Ok(Vec::new());
        }
        let seed_ids: Vec<(NodeId, f32)> = seeds
            .iter()
            .filter_map(|&(slot, sim)| {
                inner
                    .index
                    .slot_record_checked(slot)
                    .filter(|r| r.is_live())
                    .map(|r| (r.node_id(), sim.max(0.0)))
            })
            .collect();
        let total_mass: f32 = seed_ids.iter().map(|s| s.1).sum();

        // Forward push.
        let mut pi: HashMap<NodeId, f32> = HashMap::new();
        let mut residual: HashMap<NodeId, f32> = HashMap::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for (id, mass) in &seed_ids {
            residual.insert(*id, mass / total_mass.max(1e-6));
            queue.push_back(*id);
        }
        let mut pushes = 0usize;
        while let Some(id) = queue.pop_front() {
            let r = residual.get(&id).copied().unwrap_or(0.0);
            if r <= epsilon {
                continue;
            }
            pushes += 1;
            if pushes > 10_000 {
                break;
            }
            residual.insert(id, 0.0);
            *pi.entry(id).or_default() += PPR_ALPHA * r;

            let neighbors = inner.neighbors_of(&id);
            let weight_sum: f32 = neighbors.iter().map(|n| n.1).sum();
            if weight_sum <= 0.0 {
                continue;
            }
            let spread = (1.0 - PPR_ALPHA) * r;
            for (target, weight) in neighbors {
                let share = spread * weight / weight_sum;
                let entry = residual.entry(target).or_default();
                *entry += share;
                if *entry > epsilon {
                    queue.push_back(target);
                }
            }
        }

        let max_pi = pi.values().fold(0.0f32, |acc, &v| acc.max(v)).max(1e-6);

        // Candidates: dense pool plus everything PPR reached.
        let mut slots: Vec<SlotId> = inner
            .index
            .search(&qvec, 4 * k)
            .into_iter()
            .map(|(slot, _)| slot)
            .collect();
        for id in pi.keys() {
            if let Some(slot) = inner.index.lookup(id) {
                slots.push(slot);
            }
        }
        slots.sort_unstable();
        slots.dedup();

        let candidates: Vec<(SlotId, f32)> = slots
            .into_iter()
            .map(|slot| {
                let cosine = inner.index.vector(slot).cosine_approx(&qvec);
                let id = inner.index.slot_record(slot).node_id();
                let ppr = pi.get(&id).copied().unwrap_or(0.0) / max_pi;
                (slot, (0.6 * cosine + 0.4 * ppr).clamp(-1.0, 1.0))
            })
            .collect();

        let rows = inner.score_candidates(candidates, 0.0, false);
        inner.finish_pipeline(
            rows,
            k,
            RecallOptions {
                hebbian: None,
                route: false,
                ..Default::default()
            },
        )
    }

    // ========================
    // Temporal queries
    // ========================

    /// Nodes created within `[from, to]`, newest first.
    pub fn temporal_range_query(
        &self,
        from: Timestamp,
        to: Timestamp,
        limit: usize,
    ) -> Result<Vec<Recall>> {
        if from > to {
            return Err(ChittaError::InvalidArgument(
                "temporal range start after end".into(),
            ));
        }
        let inner = self.inner.read();
        let mut rows: Vec<(SlotId, Timestamp)> = Vec::new();
        inner.index.for_each(|slot, record| {
            if record.tau_created >= from && record.tau_created <= to {
                rows.push((slot, record.tau_created));
            }
        });
        rows.sort_by_key(|&(slot, created)| (std::cmp::Reverse(created), slot));
        rows.truncate(limit);
        Ok(rows
            .into_iter()
            .filter_map(|(slot, _)| inner.plain_recall_row(slot))
            .collect())
    }

    /// Nodes ranked by exponentially-decaying access intensity over the
    /// last `hours`.
    pub fn hawkes_timeline(&self, hours: f32, limit: usize) -> Result<Vec<Recall>> {
        if hours <= 0.0 {
            return Err(ChittaError::InvalidArgument(
                "timeline window must be positive".into(),
            ));
        }
        let inner = self.inner.read();
        let now = now_ms();
        let window_ms = (hours * 3_600_000.0) as i64;
        let tau = (window_ms as f32 / 2.0).max(1.0);

        let mut rows: Vec<(SlotId, f32)> = Vec::new();
        inner.index.for_each(|slot, record| {
            let age = now - record.tau_accessed;
            if age > window_ms {
                return;
            }
            let id = record.node_id();
            let base = (-(age as f32) / tau).exp();
            let event_intensity = inner.dampener.recent_hits(&id, now) as f32 * 0.25;
            rows.push((slot, base + event_intensity));
        });
        rows.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        rows.truncate(limit);
        Ok(rows
            .into_iter()
            .filter_map(|(slot, intensity)| {
                let mut row = inner.plain_recall_row(slot)?;
                row.relevance = intensity.min(1.0);
                Some(row)
            })
            .collect())
    }

    // ========================
    // Hebbian learning and propagation
    // ========================

    pub fn hebbian_strengthen(&self, a: &NodeId, b: &NodeId, delta: f32) -> Result<f32> {
        let mut inner = self.inner.write();
        inner.hebbian_strengthen_internal(a, b, delta)
    }

    /// Strengthen every ordered pair among co-activated nodes.
    pub fn hebbian_update(&self, co_activated: &[NodeId], delta: f32) -> Result<()> {
        let mut inner = self.inner.write();
        inner.hebbian_update_internal(co_activated, delta)
    }

    /// Bounded BFS confidence propagation from `source`.
    pub fn propagate_confidence(
        &self,
        source: &NodeId,
        delta: f32,
        decay_factor: f32,
        max_depth: usize,
    ) -> Result<PropagationResult> {
        let mut inner = self.inner.write();
        inner.slot_of(source)?;
        let mut result = PropagationResult {
            nodes_affected: 0,
            total_delta_applied: 0.0,
            changes: Vec::new(),
        };

        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(*source);
        let mut pending: HashMap<NodeId, f32> = HashMap::new();
        for (target, weight) in inner.neighbors_of(source) {
            if weight >= 0.01 {
                *pending.entry(target).or_default() += delta * weight * decay_factor;
            }
        }

        for depth in 0..max_depth {
            if pending.is_empty() {
                break;
            }
            let mut next: HashMap<NodeId, f32> = HashMap::new();
            let mut batch: Vec<(NodeId, f32)> = pending.into_iter().collect();
            batch.sort_by_key(|(id, _)| *id);

            for (id, d) in batch {
                if visited.contains(&id) || d.abs() < 0.001 {
                    continue;
                }
                visited.insert(id);
                let Some(slot) = inner.index.lookup(&id) else {
                    continue;
                };
                let mut confidence = inner.index.slot_record(slot).confidence();
                confidence.observe((confidence.mu + d).clamp(0.0, 1.0));
                inner.index.set_confidence(slot, confidence)?;
                inner.log(&WalRecord::ConfidenceUpdate { id, confidence })?;

                result.nodes_affected += 1;
                result.total_delta_applied += d.abs();
                result.changes.push((id, d));

                if depth + 1 < max_depth {
                    for (target, weight) in inner.neighbors_of(&id) {
                        if !visited.contains(&target) && weight >= 0.01 {
                            *next.entry(target).or_default() += d * weight * decay_factor;
                        }
                    }
                }
            }
            pending = next;
        }
        Ok(result)
    }

    // ========================
    // Attractors and epiplexity
    // ========================

    pub fn find_attractors(&self, max_attractors: usize) -> Vec<Attractor> {
        let inner = self.inner.read();
        inner.find_attractors_internal(max_attractors)
    }

    /// One round of attractor dynamics: discovery, settling, basins.
    pub fn run_attractor_dynamics(
        &self,
        max_attractors: usize,
        settle_strength: f32,
    ) -> Result<AttractorReport> {
        let mut inner = self.inner.write();
        inner.attractor_dynamics_internal(max_attractors, settle_strength)
    }

    /// Assign every non-attractor node to the basin pulling it hardest.
    pub fn compute_basins(&self, attractors: &[Attractor]) -> HashMap<NodeId, Vec<NodeId>> {
        let inner = self.inner.read();
        inner.compute_basins_internal(attractors)
    }

    /// Compute (and persist) one node's epiplexity.
    pub fn compute_epiplexity(&self, id: &NodeId) -> Result<f32> {
        let mut inner = self.inner.write();
        let slot = inner.slot_of(id)?;
        let attractor_pairs = inner.attractor_pairs(RESONANCE_SEEDS);
        let epsilon = inner.epiplexity_of(slot, &attractor_pairs);
        inner.index.set_epsilon(slot, epsilon)?;
        Ok(epsilon)
    }

    pub fn epiplexity_stats(&self) -> EpiplexityStats {
        let inner = self.inner.read();
        let attractor_pairs = inner.attractor_pairs(10);
        let mut scores = Vec::new();
        for slot in inner.index.live_slots() {
            let id = inner.index.slot_record(slot).node_id();
            scores.push((id, inner.epiplexity_of(slot, &attractor_pairs)));
        }
        attractors::epiplexity_stats(scores)
    }

    // ========================
    // Maintenance
    // ========================

    /// Graph coherence statistics.
    pub fn coherence(&self) -> Coherence {
        let inner = self.inner.read();
        let now = now_ms();

        let mut edge_count = 0usize;
        let mut weight_sum = 0.0f32;
        let mut connected = 0usize;
        let mut fresh = 0usize;
        let mut total = 0usize;

        inner.index.for_each(|slot, record| {
            total += 1;
            let edges = inner.index.edges(slot);
            if !edges.is_empty() {
                connected += 1;
            }
            for edge in edges {
                edge_count += 1;
                weight_sum += edge.weight;
            }
            if now - record.tau_accessed <= inner.config.warm_age_ms {
                fresh += 1;
            }
        });

        let local = if edge_count == 0 {
            0.5
        } else {
            weight_sum / edge_count as f32
        };
        let global = if total == 0 {
            1.0
        } else {
            connected as f32 / total as f32
        };
        let temporal = if total == 0 {
            1.0
        } else {
            fresh as f32 / total as f32
        };
        let dangling = inner.index.dangling_edge_count();
        let structural = if edge_count == 0 {
            1.0
        } else {
            1.0 - dangling as f32 / edge_count as f32
        };

        Coherence {
            local,
            global,
            temporal,
            structural,
        }
    }

    /// One maintenance cycle: decay, tiers, checkpoint, health reaction,
    /// queued feedback, synthesis, attractor dynamics.
    pub fn tick(&self) -> Result<DynamicsReport> {
        let mut inner = self.inner.write();
        let mut report = DynamicsReport::default();
        inner.reconcile_wal()?;
        let now = now_ms();

        if now - inner.last_decay >= inner.config.decay_interval_ms {
            let (decayed, pruned) = inner.decay_pass(now)?;
            report.nodes_decayed = decayed;
            report.nodes_pruned = pruned;
            inner.last_decay = now;
        }

        report.tier_demotions = inner.manage_tiers(now)?;

        if now - inner.last_checkpoint >= inner.config.checkpoint_interval_ms {
            inner.persist_all()?;
            report.checkpointed = true;
        }

        let health = inner.health_internal();
        report.psi = health.psi();
        if health.psi() < 0.8 && health.temporal < 0.7 {
            // Temporal recovery: force a decay pass.
            let (decayed, pruned) = inner.decay_pass(now)?;
            report.nodes_decayed += decayed;
            report.nodes_pruned += pruned;
            inner.last_decay = now;
        }

        report.feedback_applied = inner.apply_feedback_internal()?;
        report.wisdom_synthesized = inner.synthesize_internal()?;
        report.wisdom_synthesized += inner.promote_staged_internal()?;

        let attractor_report = inner.attractor_dynamics_internal(RESONANCE_SEEDS, 0.02)?;
        report.attractors_found = attractor_report.attractor_count;
        report.nodes_settled = attractor_report.nodes_settled;

        Ok(report)
    }

    /// Cluster similar unprocessed episodes into wisdom nodes. Never
    /// decreases the node count.
    pub fn synthesize_wisdom(&self) -> Result<usize> {
        let mut inner = self.inner.write();
        inner.synthesize_internal()
    }
}

// ========================
// Pipeline internals
// ========================

impl MindInner {
    pub(crate) fn retrieve(
        &mut self,
        query: &str,
        k: usize,
        threshold: f32,
        opts: RecallOptions,
    ) -> Result<Vec<Recall>> {
        if query.trim().is_empty() {
            return Err(ChittaError::InvalidArgument("empty query".into()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        self.reconcile_wal()?;

        // Stage 2: intent routing short-circuits.
        if opts.route && self.config.enable_query_routing {
            match self.router.classify(query) {
                QueryIntent::TagFilter(tag) => {
                    return Ok(self.tag_recall(&[tag], k));
                }
                QueryIntent::ExactMatch(phrase) => {
                    return self.exact_match_recall(&phrase, k);
                }
                QueryIntent::Semantic | QueryIntent::Hybrid => {}
            }
        }

        let embedding = self.embed(query)?;
        let qvec = QuantizedVector::from_float(&embedding);
        let fetch = 4 * k;

        // Stage 3: candidate generation.
        let candidates: Vec<(SlotId, f32)> = match opts.mode {
            SearchMode::Dense => self.index.search(&qvec, fetch),
            SearchMode::Sparse => {
                self.ensure_bm25();
                let sparse = self.bm25.search(query, fetch);
                sparse
                    .into_iter()
                    .map(|(slot, _)| (slot, self.index.vector(slot).cosine_approx(&qvec)))
                    .collect()
            }
            SearchMode::Hybrid => {
                let dense = self.index.search(&qvec, fetch);
                self.ensure_bm25();
                let sparse = self.bm25.search(query, fetch);
                let fused = reciprocal_rank_fusion(
                    &dense,
                    &sparse,
                    RRF_CONSTANT,
                    DENSE_WEIGHT,
                    SPARSE_WEIGHT,
                );
                fused
                    .into_iter()
                    .take(fetch)
                    .map(|(slot, _)| (slot, self.index.vector(slot).cosine_approx(&qvec)))
                    .collect()
            }
        };

        let rows = self.score_candidates(candidates, threshold, opts.primed);
        self.finish_pipeline(rows, k, opts)
    }

    /// Stages 4 and 5: realm filter plus relevance scoring.
    pub(crate) fn score_candidates(
        &self,
        candidates: Vec<(SlotId, f32)>,
        threshold: f32,
        primed: bool,
    ) -> Vec<ScoredRow> {
        let now = now_ms();
        let session = if primed { Some(&self.session) } else { None };
        let mut seen: HashSet<SlotId> = HashSet::new();
        let mut rows = Vec::with_capacity(candidates.len());

        for (slot, similarity) in candidates {
            // Anti-correlation carries no retrieval signal; clamp so a
            // zero threshold admits every candidate.
            let similarity = similarity.max(0.0);
            if !seen.insert(slot) {
                continue;
            }
            let Some(record) = self.index.slot_record_checked(slot) else {
                continue;
            };
            if !record.is_live() {
                continue;
            }
            if similarity < threshold {
                continue;
            }
            let id = record.node_id();
            if self.config.enable_realm_scoping && !self.realms.visible(&id) {
                continue;
            }
            let Some(node_type) = NodeType::from_u8(record.node_type) else {
                continue;
            };
            let confidence = record.confidence();
            let relevance = scoring::relevance(
                &ScoreInputs {
                    id,
                    similarity,
                    effective_confidence: confidence.effective(),
                    node_type,
                    accessed: record.tau_accessed,
                },
                now,
                &self.scoring,
                session,
            );
            rows.push(ScoredRow {
                slot,
                id,
                similarity,
                relevance,
                node_type,
                confidence,
                created: record.tau_created,
                accessed: record.tau_accessed,
                epsilon: record.epsilon,
            });
        }
        rows.sort_by(|a, b| b.relevance.total_cmp(&a.relevance).then(a.id.cmp(&b.id)));
        rows
    }

    /// Stages 6 through 11.
    pub(crate) fn finish_pipeline(
        &mut self,
        mut rows: Vec<ScoredRow>,
        k: usize,
        opts: RecallOptions,
    ) -> Result<Vec<Recall>> {
        let now = now_ms();

        // Stage 6: lateral inhibition.
        if self.competition.enabled && rows.len() >= 2 {
            let n = rows.len();
            let vectors: Vec<QuantizedVector> =
                rows.iter().map(|r| self.index.vector(r.slot)).collect();
            let mut similarities = vec![0.0f32; n * (n - 1) / 2];
            for i in 0..n {
                for j in (i + 1)..n {
                    similarities[pair_index(i, j, n)] = vectors[i].cosine_approx(&vectors[j]);
                }
            }
            let relevances: Vec<f32> = rows.iter().map(|r| r.relevance).collect();
            let inhibition = compute_inhibition(&similarities, &relevances, n, &self.competition);

            if self.competition.hard_suppression {
                let mut to_remove = inhibition.suppressed_indices;
                to_remove.sort_by(|a, b| b.cmp(a));
                for idx in to_remove {
                    if idx < rows.len() {
                        rows.remove(idx);
                    }
                }
            } else {
                for (i, &idx) in inhibition.suppressed_indices.iter().enumerate() {
                    if idx < rows.len() {
                        rows[idx].relevance *= 1.0 - inhibition.penalties[i];
                    }
                }
                rows.sort_by(|a, b| b.relevance.total_cmp(&a.relevance).then(a.id.cmp(&b.id)));
            }
        }

        // Stage 7: attractor dampening.
        if self.config.enable_attractor_dampener {
            for row in rows.iter_mut() {
                row.relevance *= self.dampener.dampening_factor(&row.id, now);
            }
            rows.sort_by(|a, b| b.relevance.total_cmp(&a.relevance).then(a.id.cmp(&b.id)));
        }

        // Stage 8: truncate.
        rows.truncate(k);

        // Stage 9: side effects.
        for row in &rows {
            if self.config.enable_utility_decay {
                self.utility.record_recall(&row.id, row.relevance, now);
            }
            if self.config.enable_attractor_dampener {
                self.dampener.record(&row.id, row.relevance, now);
            }
            if row.node_type == NodeType::Gap {
                self.gaps.note_encounter(&row.id, now);
            }
            self.synthesis.note_recall(&row.id);
            if opts.primed {
                self.session.observe(row.id);
            }
        }
        if let Some(delta) = opts.hebbian {
            let heads: Vec<NodeId> = rows.iter().take(5.min(k)).map(|r| r.id).collect();
            self.hebbian_update_internal(&heads, delta)?;
        }

        // Stages 10 and 11: conflict annotation and assembly.
        let mut results: Vec<Recall> = rows
            .into_iter()
            .filter_map(|row| self.assemble_recall(row))
            .collect();
        if self.config.enable_truth_maintenance {
            self.truth.annotate(&mut results);
        }
        Ok(results)
    }

    fn assemble_recall(&self, row: ScoredRow) -> Option<Recall> {
        // Dead or unreadable candidates are skipped, not fatal.
        let record = self.index.slot_record_checked(row.slot)?;
        let payload = match self.index.read_payload(&record) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("skipping unreadable payload for {}: {err}", row.id);
                return None;
            }
        };
        let text = String::from_utf8(payload.clone()).ok();
        Some(Recall {
            id: row.id,
            similarity: row.similarity,
            relevance: row.relevance,
            epsilon: row.epsilon,
            node_type: row.node_type,
            confidence: row.confidence,
            created: row.created,
            accessed: row.accessed,
            payload,
            text,
            has_conflict: false,
            conflicting_ids: Vec::new(),
        })
    }

    /// Tag-index recall: effective confidence as relevance, newest
    /// access first.
    pub(crate) fn tag_recall(&self, tags: &[String], k: usize) -> Vec<Recall> {
        let mut slots = if tags.len() == 1 {
            self.tag_index.find(&tags[0])
        } else {
            self.tag_index.find_all(tags)
        };
        slots.sort_by_key(|&slot| {
            std::cmp::Reverse(self.index.slot_record(slot).tau_accessed)
        });
        slots.truncate(k);
        slots
            .into_iter()
            .filter_map(|slot| self.plain_recall_row(slot))
            .collect()
    }

    fn exact_match_recall(&mut self, phrase: &str, k: usize) -> Result<Vec<Recall>> {
        self.ensure_bm25();
        let candidates = self.bm25.search(phrase, 4 * k);
        let results = candidates
            .into_iter()
            .filter_map(|(slot, _)| {
                let row = self.plain_recall_row(slot)?;
                let text = row.text.as_deref()?;
                if text.contains(phrase) {
                    Some(row)
                } else {
                    None
                }
            })
            .take(k)
            .collect();
        Ok(results)
    }

    /// A recall row outside the scored pipeline: similarity zero,
    /// relevance from effective confidence.
    pub(crate) fn plain_recall_row(&self, slot: SlotId) -> Option<Recall> {
        let record = self.index.slot_record_checked(slot)?;
        if !record.is_live() {
            return None;
        }
        let payload = self.index.read_payload(&record).ok()?;
        let confidence = record.confidence();
        let mut row = Recall {
            id: record.node_id(),
            similarity: 0.0,
            relevance: confidence.effective(),
            epsilon: record.epsilon,
            node_type: NodeType::from_u8(record.node_type)?,
            confidence,
            created: record.tau_created,
            accessed: record.tau_accessed,
            text: String::from_utf8(payload.clone()).ok(),
            payload,
            has_conflict: false,
            conflicting_ids: Vec::new(),
        };
        if self.config.enable_truth_maintenance {
            let conflicting = self.truth.unresolved_for(&row.id);
            row.has_conflict = !conflicting.is_empty();
            row.conflicting_ids = conflicting;
        }
        Some(row)
    }

    /// Outgoing `(target, weight)` pairs of a node, dangling edges
    /// skipped.
    pub(crate) fn neighbors_of(&self, id: &NodeId) -> Vec<(NodeId, f32)> {
        let Some(slot) = self.index.lookup(id) else {
            return Vec::new();
        };
        self.index
            .edges(slot)
            .iter()
            .filter_map(|edge| {
                self.index
                    .resolve_edge(edge)
                    .map(|target| (target, edge.weight))
            })
            .collect()
    }

    // ========================
    // Resonance internals
    // ========================

    pub(crate) fn resonate_internal(
        &mut self,
        query: &str,
        k: usize,
        spread_strength: f32,
        hebbian: Option<f32>,
        primed: bool,
    ) -> Result<Vec<Recall>> {
        if query.trim().is_empty() {
            return Err(ChittaError::InvalidArgument("empty query".into()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        self.reconcile_wal()?;

        let embedding = self.embed(query)?;
        let qvec = QuantizedVector::from_float(&embedding);
        let now = now_ms();

        // Seeds: top dense matches with their soul relevance.
        let dense = self.index.search(&qvec, 4 * k);
        let seeds: Vec<(NodeId, f32)> = dense
            .iter()
            .take(RESONANCE_SEEDS)
            .filter_map(|&(slot, sim)| {
                let record = self.index.slot_record_checked(slot)?;
                if !record.is_live() {
                    return None;
                }
                let relevance = scoring::relevance(
                    &ScoreInputs {
                        id: record.node_id(),
                        similarity: sim,
                        effective_confidence: record.confidence().effective(),
                        node_type: NodeType::from_u8(record.node_type)?,
                        accessed: record.tau_accessed,
                    },
                    now,
                    &self.scoring,
                    None,
                );
                Some((record.node_id(), spread_strength * relevance))
            })
            .collect();

        let activation =
            spreading::spread_from_seeds(&seeds, 0.5, 3, &|id| self.neighbors_of(id));

        // Candidate pool: dense matches plus every activated node.
        let mut slots: Vec<SlotId> = dense.iter().map(|&(slot, _)| slot).collect();
        for id in activation.keys() {
            if let Some(slot) = self.index.lookup(id) {
                slots.push(slot);
            }
        }
        slots.sort_unstable();
        slots.dedup();

        // Blend: 0.6 cosine + 0.4 activation feeds the scoring stage.
        let candidates: Vec<(SlotId, f32)> = slots
            .into_iter()
            .map(|slot| {
                let cosine = self.index.vector(slot).cosine_approx(&qvec);
                let id = self.index.slot_record(slot).node_id();
                let act = activation.get(&id).copied().unwrap_or(0.0).min(1.0);
                (slot, (0.6 * cosine + 0.4 * act).clamp(-1.0, 1.0))
            })
            .collect();

        let rows = self.score_candidates(candidates, 0.0, primed);
        self.finish_pipeline(
            rows,
            k,
            RecallOptions {
                mode: SearchMode::Dense,
                primed,
                hebbian,
                route: false,
            },
        )
    }

    // ========================
    // Hebbian internals
    // ========================

    pub(crate) fn hebbian_strengthen_internal(
        &mut self,
        a: &NodeId,
        b: &NodeId,
        delta: f32,
    ) -> Result<f32> {
        if a == b {
            return Err(ChittaError::InvalidArgument(
                "cannot strengthen a self-edge".into(),
            ));
        }
        let a_slot = self.slot_of(a)?;
        let b_slot = self.slot_of(b)?;
        let existing = self
            .index
            .edges(a_slot)
            .iter()
            .find(|e| e.target_slot == b_slot && e.kind == EdgeKind::Similar)
            .map(|e| e.weight);
        let weight = (existing.unwrap_or(0.0) + delta).min(1.0);
        self.add_edge_internal(a, b, EdgeKind::Similar, weight, true)?;
        Ok(weight)
    }

    pub(crate) fn hebbian_update_internal(
        &mut self,
        co_activated: &[NodeId],
        delta: f32,
    ) -> Result<()> {
        if co_activated.len() < 2 {
            return Ok(());
        }
        for i in 0..co_activated.len() {
            for j in (i + 1)..co_activated.len() {
                self.hebbian_strengthen_internal(&co_activated[i], &co_activated[j], delta)
                    .ok();
                self.hebbian_strengthen_internal(&co_activated[j], &co_activated[i], delta)
                    .ok();
            }
        }
        Ok(())
    }

    // ========================
    // Attractor internals
    // ========================

    pub(crate) fn find_attractors_internal(&self, max_attractors: usize) -> Vec<Attractor> {
        let now = now_ms();
        let mut candidates = Vec::new();
        self.index.for_each(|slot, record| {
            let degree = self.index.edges(slot).len();
            let age_days = ((now - record.tau_created).max(0)) as f32 / MS_PER_DAY;
            let label = self
                .index
                .read_payload(record)
                .ok()
                .and_then(|p| String::from_utf8(p).ok())
                .map(|t| t.chars().take(50).collect())
                .unwrap_or_default();
            candidates.push(AttractorCandidate {
                id: record.node_id(),
                slot,
                effective_confidence: record.confidence().effective(),
                degree,
                age_days,
                label,
            });
        });
        attractors::find_attractors(
            &candidates,
            max_attractors,
            attractors::DEFAULT_MIN_CONFIDENCE,
            attractors::DEFAULT_MIN_EDGES,
        )
    }

    /// Attractors paired with their vectors, ready for pull tests.
    pub(crate) fn attractor_pairs(
        &self,
        max_attractors: usize,
    ) -> Vec<(Attractor, QuantizedVector)> {
        self.find_attractors_internal(max_attractors)
            .into_iter()
            .map(|attractor| {
                let vector = self.index.vector(attractor.slot);
                (attractor, vector)
            })
            .collect()
    }

    pub(crate) fn pull_of(
        &self,
        id: &NodeId,
        attractor_pairs: &[(Attractor, QuantizedVector)],
    ) -> Option<(NodeId, f32)> {
        let slot = self.index.lookup(id)?;
        attractors::compute_pull(&self.index.vector(slot), attractor_pairs)
    }

    pub(crate) fn compute_basins_internal(
        &self,
        attractor_list: &[Attractor],
    ) -> HashMap<NodeId, Vec<NodeId>> {
        let pairs: Vec<(Attractor, QuantizedVector)> = attractor_list
            .iter()
            .filter_map(|attractor| {
                let slot = self.index.lookup(&attractor.id)?;
                Some((attractor.clone(), self.index.vector(slot)))
            })
            .collect();

        let mut basins: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for attractor in attractor_list {
            basins.insert(attractor.id, Vec::new());
        }
        let attractor_ids: HashSet<NodeId> = attractor_list.iter().map(|a| a.id).collect();

        self.index.for_each(|slot, record| {
            let id = record.node_id();
            if attractor_ids.contains(&id) {
                return;
            }
            if let Some((winner, _)) = attractors::compute_pull(&self.index.vector(slot), &pairs) {
                basins.entry(winner).or_default().push(id);
            }
        });
        basins
    }

    pub(crate) fn attractor_dynamics_internal(
        &mut self,
        max_attractors: usize,
        settle_strength: f32,
    ) -> Result<AttractorReport> {
        let mut report = AttractorReport::default();
        let found = self.find_attractors_internal(max_attractors);
        report.attractor_count = found.len();
        if found.is_empty() {
            return Ok(report);
        }

        let pairs = self.attractor_pairs(max_attractors);
        let attractor_ids: HashSet<NodeId> = pairs.iter().map(|p| p.0.id).collect();

        // Settle: every node strengthens a Similar edge toward its
        // pulling attractor, scaled by the pull.
        let mut settle_targets: Vec<(NodeId, NodeId, f32)> = Vec::new();
        self.index.for_each(|slot, record| {
            let id = record.node_id();
            if attractor_ids.contains(&id) {
                return;
            }
            if let Some((winner, pull)) = attractors::compute_pull(&self.index.vector(slot), &pairs)
            {
                let strength = settle_strength * pull;
                if strength >= 0.01 {
                    settle_targets.push((id, winner, strength));
                }
            }
        });
        for (id, attractor, strength) in settle_targets {
            if self.hebbian_strengthen_internal(&id, &attractor, strength).is_ok() {
                report.nodes_settled += 1;
            }
        }

        let basins = self.compute_basins_internal(&found);
        for attractor in &found {
            let size = basins.get(&attractor.id).map(|b| b.len()).unwrap_or(0);
            report.basin_sizes.push((attractor.label.clone(), size));
        }
        Ok(report)
    }

    pub(crate) fn epiplexity_of(
        &self,
        slot: SlotId,
        attractor_pairs: &[(Attractor, QuantizedVector)],
    ) -> f32 {
        let record = self.index.slot_record(slot);
        let pull = attractors::compute_pull(&self.index.vector(slot), attractor_pairs)
            .map(|(_, pull)| pull)
            .unwrap_or(0.0);
        let compression = self
            .index
            .read_payload(&record)
            .map(|payload| attractors::compression_score(&payload))
            .unwrap_or(0.0);
        attractors::epiplexity(&EpiplexityInputs {
            attractor_pull: pull,
            effective_confidence: record.confidence().effective(),
            degree: self.index.edges(slot).len(),
            compression,
        })
    }

    // ========================
    // Synthesis and decay internals
    // ========================

    pub(crate) fn synthesize_internal(&mut self) -> Result<usize> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(0);
        };
        if !embedder.ready() {
            return Ok(0);
        }

        // Unpromoted episodes, oldest first for determinism.
        let mut episodes: Vec<(SlotId, NodeId)> = Vec::new();
        self.index.for_each(|slot, record| {
            if record.node_type == NodeType::Episode as u8 {
                let id = record.node_id();
                if !self.synthesis.is_promoted(&id) {
                    episodes.push((slot, id));
                }
            }
        });
        if episodes.len() < 3 {
            return Ok(0);
        }
        episodes.sort_by_key(|&(slot, _)| slot);

        let mut synthesized = 0usize;
        let mut promoted_now: HashSet<NodeId> = HashSet::new();

        for &(slot, id) in episodes.iter().take(100) {
            if promoted_now.contains(&id) {
                continue;
            }
            let seed_vector = self.index.vector(slot);
            let similar = self.index.search(&seed_vector, 10);

            let mut cluster: Vec<(SlotId, NodeId)> = vec![(slot, id)];
            for (other_slot, sim) in similar {
                if other_slot == slot || sim < 0.75 {
                    continue;
                }
                let Some(record) = self.index.slot_record_checked(other_slot) else {
                    continue;
                };
                if record.node_type != NodeType::Episode as u8 {
                    continue;
                }
                let other_id = record.node_id();
                if self.synthesis.is_promoted(&other_id) || promoted_now.contains(&other_id) {
                    continue;
                }
                cluster.push((other_slot, other_id));
            }
            if cluster.len() < 3 {
                continue;
            }

            // Wisdom text: marker plus the first episode truncated to
            // 200 bytes.
            let first_record = self.index.slot_record(cluster[0].0);
            let first_text = self
                .index
                .read_payload(&first_record)
                .ok()
                .map(|p| {
                    let cut = p.len().min(200);
                    String::from_utf8_lossy(&p[..cut]).into_owned()
                })
                .unwrap_or_default();
            let wisdom_text =
                format!("Pattern observed ({} occurrences): {}", cluster.len(), first_text);

            let avg_confidence: f32 = cluster
                .iter()
                .map(|&(s, _)| self.index.slot_record(s).confidence_mu)
                .sum::<f32>()
                / cluster.len() as f32;
            let boosted = (avg_confidence + 0.2).min(0.95);

            let embedding = embedder
                .transform(&wisdom_text)
                .map_err(|e| ChittaError::InvalidArgument(e.to_string()))?;
            self.remember_internal(
                NodeType::Wisdom,
                QuantizedVector::from_float(&embedding),
                wisdom_text.into_bytes(),
                Confidence::new(boosted),
                &[],
            )?;
            synthesized += 1;

            for &(_, member_id) in &cluster {
                self.synthesis.mark_promoted(member_id);
                promoted_now.insert(member_id);
            }
        }

        if synthesized > 0 {
            log::info!("synthesized {synthesized} wisdom nodes from episode clusters");
        }
        Ok(synthesized)
    }

    /// Promote ripe staged-wisdom candidates into real wisdom nodes.
    pub(crate) fn promote_staged_internal(&mut self) -> Result<usize> {
        if self.embedder.is_none() {
            return Ok(0);
        }
        let ripe: Vec<NodeId> = self
            .synthesis
            .ripe(crate::synthesis_queue::DEFAULT_PROMOTION_THRESHOLD)
            .iter()
            .map(|s| s.id)
            .collect();
        let mut promoted = 0usize;
        for id in ripe {
            let Some(staged) = self.synthesis.unstage(&id) else {
                continue;
            };
            let embedding = self.embed(&staged.content)?;
            self.remember_internal(
                NodeType::Wisdom,
                QuantizedVector::from_float(&embedding),
                staged.content.into_bytes(),
                Confidence::new(0.8),
                &[],
            )?;
            self.synthesis.mark_promoted(id);
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Global decay pass: effective confidence relaxes toward zero at
    /// the node's (possibly utility-calibrated) rate; prunable nodes are
    /// forgotten. Returns (decayed, pruned).
    pub(crate) fn decay_pass(&mut self, now: Timestamp) -> Result<(usize, usize)> {
        let elapsed_days = ((now - self.last_decay).max(0)) as f32 / MS_PER_DAY;
        if elapsed_days <= 0.0 {
            return Ok((0, 0));
        }

        let mut updates: Vec<(SlotId, NodeId, Confidence, f32)> = Vec::new();
        self.index.for_each(|slot, record| {
            let id = record.node_id();
            let node_type = NodeType::from_u8(record.node_type).unwrap_or(NodeType::Meta);
            let delta = if self.config.enable_utility_decay {
                self.utility.effective_delta(&id, node_type)
            } else {
                record.delta
            };
            let mut confidence = record.confidence();
            confidence.mu = (confidence.mu * (-delta * elapsed_days).exp()).clamp(0.0, 1.0);
            updates.push((slot, id, confidence, delta));
        });

        let mut decayed = 0usize;
        let mut pruned = Vec::new();
        for (slot, id, confidence, delta) in updates {
            self.index.set_confidence(slot, confidence)?;
            self.index.set_delta(slot, delta)?;
            decayed += 1;
            if confidence.effective() < self.config.prune_threshold {
                pruned.push(id);
            }
        }
        let pruned_count = pruned.len();
        for id in pruned {
            self.forget(&id, true).ok();
        }
        Ok((decayed, pruned_count))
    }

    /// Demote stale nodes hot -> warm -> cold, by access age and then by
    /// tier capacity (oldest first when a tier overflows).
    pub(crate) fn manage_tiers(&mut self, now: Timestamp) -> Result<usize> {
        let mut demotions: Vec<(SlotId, StorageTier)> = Vec::new();
        let mut hot: Vec<(SlotId, Timestamp)> = Vec::new();
        let mut warm: Vec<(SlotId, Timestamp)> = Vec::new();

        self.index.for_each(|slot, record| {
            let age = now - record.tau_accessed;
            let tier = StorageTier::from_u8(record.tier);
            if age > self.config.warm_age_ms && tier != StorageTier::Cold {
                demotions.push((slot, StorageTier::Cold));
            } else if age > self.config.hot_age_ms && tier == StorageTier::Hot {
                demotions.push((slot, StorageTier::Warm));
            } else {
                match tier {
                    StorageTier::Hot => hot.push((slot, record.tau_accessed)),
                    StorageTier::Warm => warm.push((slot, record.tau_accessed)),
                    StorageTier::Cold => {}
                }
            }
        });

        if hot.len() > self.config.hot_capacity {
            hot.sort_by_key(|&(slot, accessed)| (accessed, slot));
            let overflow = hot.len() - self.config.hot_capacity;
            for &(slot, _) in hot.iter().take(overflow) {
                demotions.push((slot, StorageTier::Warm));
            }
        }
        if warm.len() > self.config.warm_capacity {
            warm.sort_by_key(|&(slot, accessed)| (accessed, slot));
            let overflow = warm.len() - self.config.warm_capacity;
            for &(slot, _) in warm.iter().take(overflow) {
                demotions.push((slot, StorageTier::Cold));
            }
        }

        let count = demotions.len();
        for (slot, tier) in demotions {
            self.index.set_tier(slot, tier)?;
        }
        Ok(count)
    }
}
