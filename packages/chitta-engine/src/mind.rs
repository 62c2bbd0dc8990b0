//! The Mind: coordinator that owns the unified index, WAL, secondary
//! indices, and meta-stores, and exposes the public operations.
//!
//! Concurrency model: one reader-writer lock around the whole interior.
//! Readers serialize with writers; per-request work is bounded and the
//! workload is read-mostly, so this is the contract the engine promises
//! (finer locking must preserve the same ordering).

use crate::ann::AnnConfig;
use crate::attractor_dampener::AttractorDampener;
use crate::bm25::Bm25Index;
use crate::competition::CompetitionConfig;
use crate::config::MindConfig;
use crate::connection_pool::StoredEdge;
use crate::error::{ChittaError, Result};
use crate::gap_inquiry::{GapInquiry, KnowledgeGap};
use crate::provenance::{ProvenanceRecord, ProvenanceSource, ProvenanceSpine};
use crate::quantized::QuantizedVector;
use crate::quota::{EvictionCandidate, QuotaConfig, QuotaManager};
use crate::realm_scoping::{RealmScoping, RealmVisibility};
use crate::review_queue::{ReviewItem, ReviewQueue, ReviewStatus};
use crate::router::QueryRouter;
use crate::scoring::{ScoringConfig, SessionContext};
use crate::synthesis_queue::SynthesisQueue;
use crate::tag_index::TagIndex;
use crate::triplet_store::{Triplet, TripletStore};
use crate::truth_maintenance::{Contradiction, TruthMaintenance};
use crate::types::{
    now_ms, Confidence, EdgeKind, MindHealth, MindState, Node, NodeId, NodeType, SlotId,
    StorageTier, Timestamp, MS_PER_DAY,
};
use crate::unified_index::{NodeInsert, UnifiedIndex};
use crate::utility_decay::{DecayConfig, UtilityDecay};
use crate::wal::{Wal, WalRecord};
use chitta_embedder::Embedder;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Ledger tag constants.
const LEDGER_TAG: &str = "ledger";

pub struct Mind {
    pub(crate) inner: RwLock<MindInner>,
}

pub(crate) struct MindInner {
    pub(crate) config: MindConfig,
    pub(crate) embedder: Option<Arc<dyn Embedder>>,

    pub(crate) index: UnifiedIndex,
    pub(crate) wal: Wal,
    /// Offset up to which WAL records are reflected in memory.
    pub(crate) wal_applied: u64,

    pub(crate) tag_index: TagIndex,
    pub(crate) bm25: Bm25Index,
    pub(crate) bm25_built: bool,
    pub(crate) triplets: TripletStore,

    pub(crate) provenance: ProvenanceSpine,
    pub(crate) utility: UtilityDecay,
    pub(crate) dampener: AttractorDampener,
    pub(crate) realms: RealmScoping,
    pub(crate) truth: TruthMaintenance,
    pub(crate) synthesis: SynthesisQueue,
    pub(crate) gaps: GapInquiry,
    pub(crate) reviews: ReviewQueue,
    pub(crate) quota: QuotaManager,
    pub(crate) type_counts: HashMap<NodeType, usize>,

    pub(crate) router: QueryRouter,
    pub(crate) scoring: ScoringConfig,
    pub(crate) competition: CompetitionConfig,
    pub(crate) session: SessionContext,

    /// Confidence deltas queued by feedback, applied on `apply_feedback`.
    pub(crate) pending_feedback: Vec<(NodeId, f32)>,

    pub(crate) last_decay: Timestamp,
    pub(crate) last_checkpoint: Timestamp,
    pub(crate) closed: bool,
}

impl Mind {
    /// Open a store at `config.path`, replaying the WAL on top of the
    /// checkpointed state.
    pub fn open(config: MindConfig) -> Result<Self> {
        Self::open_with_embedder(config, None)
    }

    pub fn open_with_embedder(
        config: MindConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        if let Some(model) = &embedder {
            if model.dimension() != config.dimension {
                return Err(ChittaError::InvalidArgument(format!(
                    "embedder dimension {} does not match store dimension {}",
                    model.dimension(),
                    config.dimension
                )));
            }
        }

        let index = UnifiedIndex::open(
            &config.file("unified"),
            &config.file("pool"),
            config.total_capacity as u32,
            config.dimension,
            AnnConfig::default(),
        )?;
        let wal = Wal::open(&config.file("wal"))?;

        let tag_index = TagIndex::load(&config.file("tags"))?;
        let (bm25, bm25_built) = if config.skip_bm25 {
            (Bm25Index::new(), false)
        } else {
            let path = config.file("bm25");
            if path.exists() {
                let loaded = Bm25Index::load(&path)?;
                let built = !loaded.is_empty();
                (loaded, built)
            } else {
                (Bm25Index::new(), false)
            }
        };
        let triplets = TripletStore::open(&config.file("graph"), &config.file("graph.wal"))?;
        if config.use_mmap_graph {
            // The dictionary store holds everything in memory at this
            // scale; the flag is accepted and the store behaves the same.
            log::debug!("use_mmap_graph set; in-memory triplet store suffices at current scale");
        }

        let provenance = ProvenanceSpine::load(&config.file("provenance"))?;
        let utility = UtilityDecay::load(&config.file("utility_decay"), DecayConfig::default())?;
        let dampener = AttractorDampener::load(
            &config.file("attractor_dampener"),
            crate::attractor_dampener::DEFAULT_WINDOW_MS,
            0.2,
        )?;
        let mut realms = RealmScoping::load(&config.file("realm_scoping"))?;
        if !config.default_realm.is_empty() && !realms.realm_exists(&config.default_realm) {
            realms
                .create_realm(&config.default_realm, crate::realm_scoping::ROOT_REALM)
                .ok();
        }
        let truth = TruthMaintenance::load(&config.file("truth_maintenance"))?;
        let synthesis = SynthesisQueue::load(&config.file("synthesis_queue"))?;
        let gaps = GapInquiry::load(&config.file("gap_inquiry"))?;
        let reviews = ReviewQueue::load(&config.file("review_queue"))?;
        let quota = QuotaManager::new(QuotaConfig::new(config.total_capacity));

        let now = now_ms();
        let mut inner = MindInner {
            config,
            embedder,
            index,
            wal,
            wal_applied: 0,
            tag_index,
            bm25,
            bm25_built,
            triplets,
            provenance,
            utility,
            dampener,
            realms,
            truth,
            synthesis,
            gaps,
            reviews,
            quota,
            type_counts: HashMap::new(),
            router: QueryRouter::new(),
            scoring: ScoringConfig::default(),
            competition: CompetitionConfig::default(),
            session: SessionContext::new(),
            pending_feedback: Vec::new(),
            last_decay: now,
            last_checkpoint: now,
            closed: false,
        };

        // Replay post-checkpoint deltas, then count what we have.
        inner.reconcile_wal()?;
        inner.refresh_type_counts();
        log::info!(
            "opened store at {} with {} nodes, {} tags, {} triplets",
            inner.config.path.display(),
            inner.index.len(),
            inner.tag_index.tag_count(),
            inner.triplets.len()
        );
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    pub fn attach_embedder(&self, embedder: Arc<dyn Embedder>) -> Result<()> {
        let mut inner = self.inner.write();
        if embedder.dimension() != inner.config.dimension {
            return Err(ChittaError::InvalidArgument(format!(
                "embedder dimension {} does not match store dimension {}",
                embedder.dimension(),
                inner.config.dimension
            )));
        }
        inner.embedder = Some(embedder);
        Ok(())
    }

    /// Persist everything and release the store. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }
        inner.persist_all()?;
        inner.closed = true;
        log::info!("closed store at {}", inner.config.path.display());
        Ok(())
    }

    pub fn snapshot(&self) -> Result<u64> {
        let mut inner = self.inner.write();
        let dest = inner.config.file(&format!(
            "snapshot.{}",
            inner.index.snapshot_counter() + 1
        ));
        inner.index.snapshot(&dest)
    }

    // ========================
    // Insertion
    // ========================

    pub fn remember(&self, text: &str, node_type: NodeType) -> Result<NodeId> {
        self.remember_with(text, node_type, None, &[])
    }

    pub fn remember_with(
        &self,
        text: &str,
        node_type: NodeType,
        confidence: Option<Confidence>,
        tags: &[String],
    ) -> Result<NodeId> {
        let mut inner = self.inner.write();
        let embedding = inner.embed(text)?;
        inner.remember_internal(
            node_type,
            QuantizedVector::from_float(&embedding),
            text.as_bytes().to_vec(),
            confidence.unwrap_or_else(|| Confidence::new(0.7)),
            tags,
        )
    }

    /// Vector-based variant for callers that bring their own embedding.
    pub fn remember_vector(
        &self,
        node_type: NodeType,
        embedding: &[f32],
        payload: Vec<u8>,
        confidence: Option<Confidence>,
        tags: &[String],
    ) -> Result<NodeId> {
        let mut inner = self.inner.write();
        if embedding.len() != inner.config.dimension {
            return Err(ChittaError::InvalidArgument(format!(
                "embedding dimension {} does not match store dimension {}",
                embedding.len(),
                inner.config.dimension
            )));
        }
        inner.remember_internal(
            node_type,
            QuantizedVector::from_float(embedding),
            payload,
            confidence.unwrap_or_else(|| Confidence::new(0.7)),
            tags,
        )
    }

    // ========================
    // Reads
    // ========================

    pub fn get(&self, id: &NodeId) -> Result<Node> {
        let inner = self.inner.read();
        inner.materialize(id).ok_or_else(|| ChittaError::node_not_found(id))
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.inner.read().index.lookup(id).is_some()
    }

    pub fn by_type(&self, node_type: NodeType, limit: usize) -> Vec<NodeId> {
        let inner = self.inner.read();
        let mut ids = Vec::new();
        inner.index.for_each(|_, record| {
            if ids.len() < limit && record.node_type == node_type as u8 {
                ids.push(record.node_id());
            }
        });
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().index.is_empty()
    }

    // ========================
    // Mutations
    // ========================

    /// Nudge confidence upward by observing `mu + delta`.
    pub fn strengthen(&self, id: &NodeId, delta: f32) -> Result<Confidence> {
        self.observe_confidence(id, delta.abs())
    }

    /// Nudge confidence downward.
    pub fn weaken(&self, id: &NodeId, delta: f32) -> Result<Confidence> {
        self.observe_confidence(id, -delta.abs())
    }

    fn observe_confidence(&self, id: &NodeId, delta: f32) -> Result<Confidence> {
        let mut inner = self.inner.write();
        let slot = inner.slot_of(id)?;
        let mut confidence = inner.index.slot_record(slot).confidence();
        let target = (confidence.mu + delta).clamp(0.0, 1.0);
        confidence.observe(target);
        inner.index.set_confidence(slot, confidence)?;
        inner.log(&WalRecord::ConfidenceUpdate {
            id: *id,
            confidence,
        })?;
        Ok(confidence)
    }

    pub fn touch(&self, id: &NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner.slot_of(id)?;
        let now = now_ms();
        inner.index.touch(slot, now)?;
        inner.log(&WalRecord::Touch { id: *id, accessed: now })?;
        Ok(())
    }

    pub fn add_tag(&self, id: &NodeId, tag: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner.slot_of(id)?;
        inner.tag_index.add(slot, tag);
        inner.log(&WalRecord::TagAdd {
            id: *id,
            tag: tag.to_string(),
        })?;
        Ok(())
    }

    pub fn remove_tag(&self, id: &NodeId, tag: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let slot = inner.slot_of(id)?;
        inner.tag_index.remove(slot, tag);
        inner.log(&WalRecord::TagRemove {
            id: *id,
            tag: tag.to_string(),
        })?;
        Ok(())
    }

    /// Replace a node's text and re-embed it.
    pub fn update_content(&self, id: &NodeId, text: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let embedding = inner.embed(text)?;
        let slot = inner.slot_of(id)?;
        let vector = QuantizedVector::from_float(&embedding);
        inner.index.update_payload(slot, text.as_bytes())?;
        inner.index.update_vector(slot, &vector)?;
        if inner.bm25_built {
            inner.bm25.add(slot, text);
        }
        let record = inner.index.slot_record(slot);
        inner.log_full_node(slot, &record.node_id())?;
        Ok(())
    }

    /// Wholesale replace: payload, type, confidence, and tags.
    pub fn update_node(
        &self,
        id: &NodeId,
        text: Option<&str>,
        node_type: Option<NodeType>,
        confidence: Option<Confidence>,
        tags: Option<&[String]>,
    ) -> Result<()> {
        if let Some(text) = text {
            self.update_content(id, text)?;
        }
        let mut inner = self.inner.write();
        let slot = inner.slot_of(id)?;
        if let Some(confidence) = confidence {
            if !(0.0..=1.0).contains(&confidence.mu) {
                return Err(ChittaError::InvalidArgument(
                    "confidence mean out of range".into(),
                ));
            }
            inner.index.set_confidence(slot, confidence)?;
        }
        if let Some(node_type) = node_type {
            inner.set_node_type(slot, node_type)?;
        }
        if let Some(tags) = tags {
            for tag in inner.tag_index.tags_of(slot) {
                inner.tag_index.remove(slot, &tag);
            }
            for tag in tags {
                inner.tag_index.add(slot, tag);
            }
        }
        inner.log_full_node(slot, id)?;
        Ok(())
    }

    pub fn remove_node(&self, id: &NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        inner.forget(id, true)
    }

    /// Fold `merged` into `keeper`: union of edges and tags, confidence
    /// observation, then forget.
    pub fn merge_nodes(&self, keeper: &NodeId, merged: &NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        let keeper_slot = inner.slot_of(keeper)?;
        let merged_slot = inner.slot_of(merged)?;
        if keeper_slot == merged_slot {
            return Err(ChittaError::InvalidArgument(
                "cannot merge a node into itself".into(),
            ));
        }

        let merged_edges: Vec<StoredEdge> = inner.index.edges(merged_slot).to_vec();
        for edge in merged_edges {
            if edge.target_slot != keeper_slot {
                inner.index.upsert_edge(keeper_slot, edge)?;
                if let Some(target) = inner.index.resolve_edge(&edge) {
                    inner.log(&WalRecord::EdgeAdd {
                        source: *keeper,
                        target,
                        kind: edge.kind,
                        weight: edge.weight,
                    })?;
                }
            }
        }
        for tag in inner.tag_index.tags_of(merged_slot) {
            inner.tag_index.add(keeper_slot, &tag);
            inner.log(&WalRecord::TagAdd {
                id: *keeper,
                tag,
            })?;
        }

        let merged_confidence = inner.index.slot_record(merged_slot).confidence();
        let mut keeper_confidence = inner.index.slot_record(keeper_slot).confidence();
        keeper_confidence.observe(merged_confidence.mu);
        inner.index.set_confidence(keeper_slot, keeper_confidence)?;
        inner.log(&WalRecord::ConfidenceUpdate {
            id: *keeper,
            confidence: keeper_confidence,
        })?;

        inner.forget(merged, true)
    }

    // ========================
    // Feedback
    // ========================

    pub fn feedback_helpful(&self, id: &NodeId, _context: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.slot_of(id)?;
        if inner.config.enable_utility_decay {
            inner.utility.record_feedback(id, true);
        }
        inner.pending_feedback.push((*id, 0.05));
        Ok(())
    }

    pub fn feedback_misleading(&self, id: &NodeId, _context: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.slot_of(id)?;
        if inner.config.enable_utility_decay {
            inner.utility.record_feedback(id, false);
        }
        inner.pending_feedback.push((*id, -0.08));
        Ok(())
    }

    /// Record a task outcome against every node that contributed.
    pub fn record_outcome(&self, ids: &[NodeId], success: bool, learning_rate: f32) -> Result<()> {
        let mut inner = self.inner.write();
        let outcome = if success { 1.0 } else { 0.0 };
        for id in ids {
            inner
                .utility
                .record_outcome(id, outcome, learning_rate.clamp(0.0, 1.0));
        }
        Ok(())
    }

    /// Apply queued feedback deltas. Returns how many were applied.
    pub fn apply_feedback(&self) -> Result<usize> {
        let mut inner = self.inner.write();
        inner.apply_feedback_internal()
    }

    // ========================
    // Triplets and entities
    // ========================

    /// Record a fact and mirror it as an edge between entity nodes.
    pub fn connect(&self, subject: &str, predicate: &str, object: &str, weight: f32) -> Result<()> {
        let mut inner = self.inner.write();
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return Err(ChittaError::InvalidArgument(
                "triplet terms must be non-empty".into(),
            ));
        }
        let weight = weight.clamp(0.0, 1.0);
        inner.triplets.insert(subject, predicate, object, weight)?;
        inner.log(&WalRecord::TripletInsert {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            weight,
        })?;

        let subject_id = inner.find_or_create_entity_internal(subject)?;
        let object_id = inner.find_or_create_entity_internal(object)?;
        let kind = EdgeKind::from_name(predicate).unwrap_or(EdgeKind::RelatesTo);
        inner.add_edge_internal(&subject_id, &object_id, kind, weight, true)?;
        Ok(())
    }

    pub fn query_graph(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Vec<Triplet> {
        self.inner.read().triplets.query(subject, predicate, object)
    }

    pub fn find_entity(&self, name: &str) -> Option<NodeId> {
        let inner = self.inner.read();
        inner.find_entity_internal(name)
    }

    pub fn find_or_create_entity(&self, name: &str) -> Result<NodeId> {
        let mut inner = self.inner.write();
        inner.find_or_create_entity_internal(name)
    }

    // ========================
    // Realms
    // ========================

    pub fn current_realm(&self) -> String {
        self.inner.read().realms.current_realm().to_string()
    }

    pub fn set_realm(&self, name: &str) -> Result<()> {
        self.inner.write().realms.set_current(name)
    }

    pub fn create_realm(&self, name: &str, parent: &str) -> Result<()> {
        self.inner.write().realms.create_realm(name, parent)
    }

    // ========================
    // Provenance
    // ========================

    pub fn get_provenance(&self, id: &NodeId) -> Option<ProvenanceRecord> {
        self.inner.read().provenance.get(id).cloned()
    }

    pub fn set_provenance_source(&self, id: &NodeId, source: ProvenanceSource) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.provenance.set_source(id, source) {
            Ok(())
        } else {
            Err(ChittaError::node_not_found(id))
        }
    }

    pub fn update_provenance_trust(&self, id: &NodeId, delta: f32) -> Result<f32> {
        let mut inner = self.inner.write();
        inner
            .provenance
            .update_trust(id, delta)
            .ok_or_else(|| ChittaError::node_not_found(id))
    }

    // ========================
    // Truth maintenance
    // ========================

    pub fn add_contradiction(
        &self,
        a: &NodeId,
        b: &NodeId,
        rationale: &str,
        confidence: f32,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.slot_of(a)?;
        inner.slot_of(b)?;
        inner.truth.add(*a, *b, rationale, confidence, now_ms());
        Ok(())
    }

    pub fn resolve_contradiction(
        &self,
        a: &NodeId,
        b: &NodeId,
        winner: &NodeId,
        resolution_node: Option<NodeId>,
        rationale: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if inner
            .truth
            .resolve(a, b, *winner, resolution_node, rationale, now_ms())
        {
            Ok(())
        } else {
            Err(ChittaError::NotFound(format!(
                "no contradiction between {a} and {b}"
            )))
        }
    }

    pub fn get_unresolved_contradictions(&self) -> Vec<Contradiction> {
        self.inner
            .read()
            .truth
            .unresolved()
            .into_iter()
            .cloned()
            .collect()
    }

    // ========================
    // Review, staging, gaps
    // ========================

    pub fn enqueue_for_review(&self, id: &NodeId, context: &str, priority: f32) -> Result<()> {
        let mut inner = self.inner.write();
        inner.slot_of(id)?;
        inner.reviews.enqueue(*id, context, priority, now_ms());
        Ok(())
    }

    pub fn pending_reviews(&self, limit: usize) -> Vec<ReviewItem> {
        self.inner
            .read()
            .reviews
            .pending(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn adjudicate_review(
        &self,
        id: &NodeId,
        status: ReviewStatus,
        rating: Option<u8>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.reviews.adjudicate(id, status, rating, now_ms()) {
            Ok(())
        } else {
            Err(ChittaError::NotFound(format!("no pending review for {id}")))
        }
    }

    pub fn review_status(&self, id: &NodeId) -> Option<ReviewStatus> {
        self.inner.read().reviews.status_of(id)
    }

    pub fn stage_wisdom(&self, id: &NodeId, content: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.synthesis.stage(*id, content, Vec::new(), now_ms());
        Ok(())
    }

    pub fn register_gap(
        &self,
        id: &NodeId,
        topic: &str,
        question: &str,
        context: &str,
        importance: f32,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .gaps
            .register(*id, topic, question, context, importance, now_ms());
        Ok(())
    }

    pub fn get_inquiry_queue(&self, limit: usize) -> Vec<KnowledgeGap> {
        self.inner
            .read()
            .gaps
            .inquiry_queue(limit, now_ms())
            .into_iter()
            .cloned()
            .collect()
    }

    // ========================
    // Session priming
    // ========================

    /// Mark an intention node as active; primed recalls boost it.
    pub fn prime_intention(&self, id: &NodeId) -> Result<()> {
        let mut inner = self.inner.write();
        inner.slot_of(id)?;
        inner.session.active_intentions.insert(*id);
        Ok(())
    }

    /// Replace the session's goal basin.
    pub fn prime_goal_basin(&self, ids: &[NodeId]) {
        let mut inner = self.inner.write();
        inner.session.goal_basin = ids.iter().copied().collect();
    }

    /// Drop all session priming state.
    pub fn clear_session(&self) {
        self.inner.write().session.clear();
    }

    // ========================
    // Ledgers
    // ========================

    pub fn save_ledger(
        &self,
        text: &str,
        session: Option<&str>,
        project: Option<&str>,
    ) -> Result<NodeId> {
        let mut tags = vec![LEDGER_TAG.to_string()];
        if let Some(session) = session {
            tags.push(format!("session:{session}"));
        }
        if let Some(project) = project {
            tags.push(format!("project:{project}"));
        }
        self.remember_with(text, NodeType::Ledger, Some(Confidence::new(0.9)), &tags)
    }

    /// Newest ledger matching the given session/project tags.
    pub fn load_ledger(
        &self,
        session: Option<&str>,
        project: Option<&str>,
    ) -> Option<(NodeId, String)> {
        let inner = self.inner.read();
        let mut tags = vec![LEDGER_TAG.to_string()];
        if let Some(session) = session {
            tags.push(format!("session:{session}"));
        }
        if let Some(project) = project {
            tags.push(format!("project:{project}"));
        }
        let mut slots = inner.tag_index.find_all(&tags);
        slots.sort_by_key(|&slot| {
            std::cmp::Reverse(inner.index.slot_record(slot).tau_created)
        });
        slots.into_iter().find_map(|slot| {
            let node = inner.index.get(slot)?;
            let text = node.text()?;
            Some((node.id, text))
        })
    }

    pub fn list_ledgers(&self, limit: usize, project: Option<&str>) -> Vec<(NodeId, String)> {
        let inner = self.inner.read();
        let mut slots = if let Some(project) = project {
            inner
                .tag_index
                .find_all(&[LEDGER_TAG.to_string(), format!("project:{project}")])
        } else {
            inner.tag_index.find(LEDGER_TAG)
        };
        slots.sort_by_key(|&slot| {
            std::cmp::Reverse(inner.index.slot_record(slot).tau_created)
        });
        slots
            .into_iter()
            .take(limit)
            .filter_map(|slot| {
                let node = inner.index.get(slot)?;
                let text = node.text()?;
                Some((node.id, text))
            })
            .collect()
    }

    pub fn update_ledger(&self, id: &NodeId, text: &str) -> Result<()> {
        self.update_content(id, text)
    }

    // ========================
    // Store-wide reports
    // ========================

    pub fn state(&self) -> MindState {
        let inner = self.inner.read();
        let mut hot = 0usize;
        let mut warm = 0usize;
        let mut cold = 0usize;
        inner.index.for_each(|_, record| match StorageTier::from_u8(record.tier) {
            StorageTier::Hot => hot += 1,
            StorageTier::Warm => warm += 1,
            StorageTier::Cold => cold += 1,
        });
        MindState {
            snapshot_id: inner.index.snapshot_counter(),
            total_nodes: inner.index.len(),
            hot_nodes: hot,
            warm_nodes: warm,
            cold_nodes: cold,
            triplet_count: inner.triplets.len(),
            last_decay: inner.last_decay,
            last_checkpoint: inner.last_checkpoint,
            embedder_ready: inner.embedder.as_ref().map(|e| e.ready()).unwrap_or(false),
        }
    }

    pub fn health(&self) -> MindHealth {
        self.inner.read().health_internal()
    }

    // ========================
    // Embedding repair
    // ========================

    pub fn count_zero_vectors(&self) -> usize {
        let inner = self.inner.read();
        let mut count = 0;
        inner.index.for_each(|slot, _| {
            if inner.index.vector_is_zero(slot) {
                count += 1;
            }
        });
        count
    }

    /// Re-embed nodes whose vectors are zero (created while no model was
    /// attached). Returns how many were regenerated.
    pub fn regenerate_embeddings(&self, batch_size: usize) -> Result<usize> {
        let mut inner = self.inner.write();
        if inner.embedder.is_none() {
            return Err(ChittaError::EmbedderUnavailable);
        }
        let mut targets = Vec::new();
        inner.index.for_each(|slot, _| {
            if targets.len() < batch_size && inner.index.vector_is_zero(slot) {
                targets.push(slot);
            }
        });

        let mut regenerated = 0;
        for slot in targets {
            let Some(node) = inner.index.get(slot) else {
                continue;
            };
            let Some(text) = node.text() else {
                continue;
            };
            let embedding = inner.embed(&text)?;
            inner
                .index
                .update_vector(slot, &QuantizedVector::from_float(&embedding))?;
            regenerated += 1;
        }
        Ok(regenerated)
    }
}

impl Drop for Mind {
    fn drop(&mut self) {
        let mut inner = self.inner.write();
        if !inner.closed {
            if let Err(err) = inner.persist_all() {
                log::warn!("persist on drop failed: {err}");
            }
        }
    }
}

// ========================
// Internal machinery
// ========================

impl MindInner {
    pub(crate) fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = self.embedder.as_ref().ok_or(ChittaError::EmbedderUnavailable)?;
        if !embedder.ready() {
            return Err(ChittaError::EmbedderUnavailable);
        }
        embedder
            .transform(text)
            .map_err(|e| ChittaError::InvalidArgument(e.to_string()))
    }

    pub(crate) fn slot_of(&self, id: &NodeId) -> Result<SlotId> {
        self.index
            .lookup(id)
            .ok_or_else(|| ChittaError::node_not_found(id))
    }

    /// Append a WAL record and advance the applied cursor past it.
    pub(crate) fn log(&mut self, record: &WalRecord) -> Result<()> {
        let end = self.wal.append(record)?;
        self.wal_applied = end;
        Ok(())
    }

    pub(crate) fn log_full_node(&mut self, slot: SlotId, id: &NodeId) -> Result<()> {
        let record = self.index.slot_record(slot);
        let edges = self
            .index
            .edges(slot)
            .iter()
            .filter_map(|e| {
                self.index
                    .resolve_edge(e)
                    .map(|target| (target, e.kind, e.weight))
            })
            .collect();
        let payload = self.index.read_payload(&record)?;
        let wal_record = WalRecord::FullNodeInsert {
            id: *id,
            node_type: NodeType::from_u8(record.node_type).unwrap_or(NodeType::Meta),
            vector: self.index.vector(slot),
            payload,
            confidence: record.confidence(),
            delta: record.delta,
            created: record.tau_created,
            accessed: record.tau_accessed,
            tags: self.tag_index.tags_of(slot),
            edges,
        };
        self.log(&wal_record)
    }

    /// Drain WAL records appended by peer writers (or by a previous
    /// process run) and fold them into memory.
    pub(crate) fn reconcile_wal(&mut self) -> Result<usize> {
        let (records, end) = self.wal.read_from(self.wal_applied)?;
        let applied = records.len();
        for record in records {
            self.apply_record(record)?;
        }
        self.wal_applied = end;
        Ok(applied)
    }

    fn apply_record(&mut self, record: WalRecord) -> Result<()> {
        match record {
            WalRecord::FullNodeInsert {
                id,
                node_type,
                vector,
                payload,
                confidence,
                delta,
                created,
                accessed,
                tags,
                edges,
            } => {
                let slot = match self.index.lookup(&id) {
                    Some(slot) => {
                        // Update-in-place replay of a content rewrite.
                        self.index.update_payload(slot, &payload)?;
                        self.index.update_vector(slot, &vector)?;
                        self.index.set_confidence(slot, confidence)?;
                        slot
                    }
                    None => {
                        let slot = self.index.insert(&NodeInsert {
                            id,
                            node_type,
                            vector,
                            payload: payload.clone(),
                            confidence,
                            delta,
                            created,
                            accessed,
                        })?;
                        *self.type_counts.entry(node_type).or_default() += 1;
                        slot
                    }
                };
                for tag in tags {
                    self.tag_index.add(slot, &tag);
                }
                for (target, kind, weight) in edges {
                    self.add_edge_internal(&id, &target, kind, weight, false).ok();
                }
                if self.bm25_built {
                    if let Ok(text) = String::from_utf8(payload) {
                        self.bm25.add(slot, &text);
                    }
                }
            }
            WalRecord::Touch { id, accessed } => {
                if let Some(slot) = self.index.lookup(&id) {
                    self.index.touch(slot, accessed)?;
                }
            }
            WalRecord::ConfidenceUpdate { id, confidence } => {
                if let Some(slot) = self.index.lookup(&id) {
                    self.index.set_confidence(slot, confidence)?;
                }
            }
            WalRecord::EdgeAdd {
                source,
                target,
                kind,
                weight,
            } => {
                self.add_edge_internal(&source, &target, kind, weight, false).ok();
            }
            WalRecord::TagAdd { id, tag } => {
                if let Some(slot) = self.index.lookup(&id) {
                    self.tag_index.add(slot, &tag);
                }
            }
            WalRecord::TagRemove { id, tag } => {
                if let Some(slot) = self.index.lookup(&id) {
                    self.tag_index.remove(slot, &tag);
                }
            }
            WalRecord::Forget { id } => {
                self.forget(&id, false).ok();
            }
            WalRecord::TripletInsert {
                subject,
                predicate,
                object,
                weight,
            } => {
                self.triplets.insert(&subject, &predicate, &object, weight)?;
            }
        }
        Ok(())
    }

    pub(crate) fn remember_internal(
        &mut self,
        node_type: NodeType,
        vector: QuantizedVector,
        payload: Vec<u8>,
        confidence: Confidence,
        tags: &[String],
    ) -> Result<NodeId> {
        if !(0.0..=1.0).contains(&confidence.mu) {
            return Err(ChittaError::InvalidArgument(
                "confidence mean out of range".into(),
            ));
        }

        if self.config.enable_quota_manager {
            self.maybe_evict_for_quota(node_type)?;
        }

        let id = NodeId::generate();
        let now = now_ms();
        let delta = self.utility.base_delta(node_type);
        let slot = self.index.insert(&NodeInsert {
            id,
            node_type,
            vector: vector.clone(),
            payload: payload.clone(),
            confidence,
            delta,
            created: now,
            accessed: now,
        })?;

        for tag in tags {
            self.tag_index.add(slot, tag);
        }
        if self.bm25_built {
            if let Ok(text) = std::str::from_utf8(&payload) {
                self.bm25.add(slot, text);
            }
        }
        if self.config.enable_provenance {
            let source = self.config.default_provenance_source;
            let session = self.config.session_id.clone();
            self.provenance.record(id, source, &session, now);
        }
        if self.config.enable_realm_scoping {
            let realm = self.config.default_realm.clone();
            self.realms
                .assign(id, &realm, RealmVisibility::Inherited, now);
        }
        *self.type_counts.entry(node_type).or_default() += 1;

        self.log(&WalRecord::FullNodeInsert {
            id,
            node_type,
            vector,
            payload,
            confidence,
            delta,
            created: now,
            accessed: now,
            tags: tags.to_vec(),
            edges: Vec::new(),
        })?;
        self.wal.sync()?;

        Ok(id)
    }

    /// Remove a node everywhere. Meta-stores drop the id on their own.
    pub(crate) fn forget(&mut self, id: &NodeId, log_wal: bool) -> Result<()> {
        let slot = self.slot_of(id)?;
        let record = self.index.slot_record(slot);
        if let Some(node_type) = NodeType::from_u8(record.node_type) {
            if let Some(count) = self.type_counts.get_mut(&node_type) {
                *count = count.saturating_sub(1);
            }
        }

        self.index.remove(slot);
        self.tag_index.remove_slot(slot);
        if self.bm25_built {
            self.bm25.remove(slot);
        }
        self.provenance.remove(id);
        self.utility.remove(id);
        self.dampener.remove(id);
        self.realms.remove(id);
        self.truth.remove_node(id);
        self.synthesis.remove(id);
        self.gaps.remove(id);
        self.reviews.remove(id);

        if log_wal {
            self.log(&WalRecord::Forget { id: *id })?;
        }
        Ok(())
    }

    pub(crate) fn add_edge_internal(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        kind: EdgeKind,
        weight: f32,
        log_wal: bool,
    ) -> Result<()> {
        let source_slot = self.slot_of(source)?;
        let target_slot = self.slot_of(target)?;
        let generation = self.index.slot_record(target_slot).generation;
        self.index.upsert_edge(
            source_slot,
            StoredEdge {
                target_slot,
                target_generation: generation,
                kind,
                weight: weight.clamp(0.0, 1.0),
            },
        )?;
        if log_wal {
            self.log(&WalRecord::EdgeAdd {
                source: *source,
                target: *target,
                kind,
                weight: weight.clamp(0.0, 1.0),
            })?;
        }
        Ok(())
    }

    pub(crate) fn materialize(&self, id: &NodeId) -> Option<Node> {
        let slot = self.index.lookup(id)?;
        let mut node = self.index.get(slot)?;
        node.tags = self.tag_index.tags_of(slot);
        Some(node)
    }

    pub(crate) fn set_node_type(&mut self, slot: SlotId, node_type: NodeType) -> Result<()> {
        let record = self.index.slot_record(slot);
        if let Some(old) = NodeType::from_u8(record.node_type) {
            if old == node_type {
                return Ok(());
            }
            if let Some(count) = self.type_counts.get_mut(&old) {
                *count = count.saturating_sub(1);
            }
        }
        *self.type_counts.entry(node_type).or_default() += 1;
        self.index.set_node_type(slot, node_type)
    }

    pub(crate) fn refresh_type_counts(&mut self) {
        let mut counts: HashMap<NodeType, usize> = HashMap::new();
        self.index.for_each(|_, record| {
            if let Some(node_type) = NodeType::from_u8(record.node_type) {
                *counts.entry(node_type).or_default() += 1;
            }
        });
        self.type_counts = counts;
    }

    fn maybe_evict_for_quota(&mut self, node_type: NodeType) -> Result<()> {
        self.quota.update_counts(self.type_counts.clone());
        if !self.quota.at_cap(node_type) {
            return Ok(());
        }

        let now = now_ms();
        let mut candidates = Vec::new();
        self.index.for_each(|_, record| {
            if record.node_type == node_type as u8 {
                let id = record.node_id();
                let utility = QuotaManager::utility_score(
                    record.confidence().effective(),
                    self.utility.stats(&id),
                    now,
                );
                candidates.push(EvictionCandidate { id, utility });
            }
        });
        let victims = QuotaManager::select_victims(&candidates, self.quota.eviction_batch());
        let evicted = victims.len();
        for victim in victims {
            self.forget(&victim, true)?;
        }
        if evicted > 0 {
            log::info!("evicted {evicted} {node_type:?} nodes for quota");
        }
        Ok(())
    }

    pub(crate) fn apply_feedback_internal(&mut self) -> Result<usize> {
        let pending = std::mem::take(&mut self.pending_feedback);
        let mut applied = 0;
        for (id, delta) in pending {
            let Some(slot) = self.index.lookup(&id) else {
                continue;
            };
            let mut confidence = self.index.slot_record(slot).confidence();
            let target = (confidence.mu + delta).clamp(0.0, 1.0);
            confidence.observe(target);
            self.index.set_confidence(slot, confidence)?;
            self.log(&WalRecord::ConfidenceUpdate { id, confidence })?;
            applied += 1;
        }
        Ok(applied)
    }

    pub(crate) fn find_entity_internal(&self, name: &str) -> Option<NodeId> {
        let tag = format!("entity:{name}");
        self.tag_index
            .find(&tag)
            .into_iter()
            .next()
            .and_then(|slot| self.index.get(slot).map(|n| n.id))
    }

    pub(crate) fn find_or_create_entity_internal(&mut self, name: &str) -> Result<NodeId> {
        if let Some(id) = self.find_entity_internal(name) {
            return Ok(id);
        }
        let vector = match self.embed(name) {
            Ok(embedding) => QuantizedVector::from_float(&embedding),
            // Entities created without a model get a zero vector and are
            // repaired by regenerate_embeddings later.
            Err(ChittaError::EmbedderUnavailable) => {
                QuantizedVector::zeros(self.config.dimension)
            }
            Err(err) => return Err(err),
        };
        let tag = format!("entity:{name}");
        self.remember_internal(
            NodeType::Entity,
            vector,
            name.as_bytes().to_vec(),
            Confidence::new(0.8),
            &[tag],
        )
    }

    pub(crate) fn ensure_bm25(&mut self) {
        if self.bm25_built || self.config.skip_bm25 {
            return;
        }
        if self.index.len() > self.config.bm25_max_nodes {
            // Documented degradation: sparse scoring is unavailable at
            // this scale and hybrid recall becomes pure dense.
            self.bm25_built = true;
            return;
        }
        let slots = self.index.live_slots();
        for slot in slots {
            let record = self.index.slot_record(slot);
            if let Ok(payload) = self.index.read_payload(&record) {
                if let Ok(text) = std::str::from_utf8(&payload) {
                    self.bm25.add(slot, text);
                }
            }
        }
        self.bm25_built = true;
        log::info!("built BM25 index over {} nodes", self.bm25.len());
    }

    pub(crate) fn health_internal(&self) -> MindHealth {
        let now = now_ms();
        let total_edges = self.index.edge_count();
        let dangling = self.index.dangling_edge_count();

        let structural = 1.0;
        let semantic = if total_edges == 0 {
            1.0
        } else {
            1.0 - dangling as f32 / total_edges as f32
        };
        let decay_age_days = (now - self.last_decay).max(0) as f32 / MS_PER_DAY;
        let wal_pressure = (self.wal.len() as f32 / (64.0 * 1024.0 * 1024.0)).min(1.0);
        let temporal = ((-0.5 * decay_age_days).exp() * (1.0 - 0.5 * wal_pressure)).clamp(0.0, 1.0);
        let capacity = 1.0
            - (self.index.len() as f32 / self.index.capacity().max(1) as f32).clamp(0.0, 1.0);

        MindHealth {
            structural,
            semantic,
            temporal,
            capacity,
        }
    }

    /// Flush every store to disk; order mirrors open, reversed.
    pub(crate) fn persist_all(&mut self) -> Result<()> {
        self.reviews.save(&self.config.file("review_queue"))?;
        self.gaps.save(&self.config.file("gap_inquiry"))?;
        self.synthesis.save(&self.config.file("synthesis_queue"))?;
        self.truth.save(&self.config.file("truth_maintenance"))?;
        // Realm scoping always persists; it carries the realm tree.
        self.realms.save(&self.config.file("realm_scoping"))?;
        log::debug!(
            "saved realm scoping ({} scoped nodes)",
            self.realms.scoped_node_count()
        );
        if self.config.enable_attractor_dampener {
            self.dampener.save(&self.config.file("attractor_dampener"))?;
            log::debug!(
                "saved attractor dampener ({} tracked nodes)",
                self.dampener.tracked_count()
            );
        }
        if self.config.enable_utility_decay {
            self.utility.save(&self.config.file("utility_decay"))?;
            log::debug!(
                "saved utility decay ({} tracked nodes)",
                self.utility.tracked_nodes()
            );
        }
        if self.config.enable_provenance {
            self.provenance.save(&self.config.file("provenance"))?;
            log::debug!("saved provenance ({} nodes)", self.provenance.len());
        }
        let graph_path = self.config.file("graph");
        self.triplets.save(&graph_path)?;
        if self.bm25_built && !self.bm25.is_empty() {
            self.bm25.save(&self.config.file("bm25"))?;
        }
        self.tag_index.save(&self.config.file("tags"))?;
        self.index.checkpoint()?;
        self.wal.reset()?;
        self.wal_applied = 0;
        self.last_checkpoint = now_ms();
        Ok(())
    }
}
