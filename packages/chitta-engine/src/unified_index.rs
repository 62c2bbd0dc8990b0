//! Unified index: the authoritative, crash-safe, memory-mappable store
//! of all nodes.
//!
//! Layout of the `.unified` file:
//! - header page (magic, version, capacity, watermark, dimension, free
//!   list head, snapshot counter)
//! - slot array: fixed 80-byte records
//! - vector array: one quantized vector per slot
//! - payload heap: length-prefixed blobs appended at the tail
//!
//! The mmap covers the fixed region (header + slots + vectors); the
//! payload heap is reached with positioned I/O. The id map is rebuilt by
//! a full scan on open. ANN adjacency and semantic edges live in the
//! companion `.pool` file and fall back to a full rebuild when that file
//! is lost.

use crate::ann::{AnnConfig, NavGraph};
use crate::connection_pool::{ConnectionPool, PoolEntry, StoredEdge};
use crate::error::{ChittaError, Result};
use crate::quantized::QuantizedVector;
use crate::types::{
    Confidence, Edge, Node, NodeId, NodeType, SlotId, StorageTier, Timestamp, NIL_SLOT,
};
use bytemuck::{Pod, Zeroable};
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

const UNIFIED_MAGIC: [u8; 8] = *b"CHITTAUX";
const UNIFIED_VERSION: u32 = 2;
const HEADER_REGION: u64 = 4096;
const SLOT_SIZE: usize = 80;

pub const FLAG_READY: u16 = 1;
pub const FLAG_DEAD: u16 = 2;

/// Sentinel in a dead slot's pool-offset field: end of free list.
const FREE_LIST_END: u64 = u64::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct UnifiedHeader {
    magic: [u8; 8],
    version: u32,
    slot_capacity: u32,
    /// High-water mark of ever-allocated slots.
    slot_watermark: u32,
    dim: u32,
    free_head: u32,
    flags: u32,
    snapshot_counter: u64,
    created_at: i64,
}

const HEADER_SIZE: usize = std::mem::size_of::<UnifiedHeader>();

/// Fixed-size slot record. Exactly 80 bytes; the on-disk format depends
/// on it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SlotRecord {
    pub id: [u8; 16],
    pub tau_created: i64,
    pub tau_accessed: i64,
    /// Audit offset of the slot's last pool record; doubles as the free
    /// list link while the slot is dead.
    pub pool_offset: u64,
    pub payload_offset: u64,
    pub confidence_mu: f32,
    pub confidence_sigma: f32,
    pub confidence_n: u32,
    pub delta: f32,
    pub epsilon: f32,
    pub payload_size: u32,
    pub generation: u32,
    pub node_type: u8,
    pub tier: u8,
    pub flags: u16,
}

impl SlotRecord {
    pub fn is_live(&self) -> bool {
        self.flags & FLAG_READY != 0 && self.flags & FLAG_DEAD == 0
    }

    pub fn node_id(&self) -> NodeId {
        NodeId(self.id)
    }

    pub fn confidence(&self) -> Confidence {
        Confidence {
            mu: self.confidence_mu,
            sigma: self.confidence_sigma,
            n: self.confidence_n.max(1),
        }
    }
}

/// Everything needed to insert a node, minus the slot assignment.
#[derive(Debug, Clone)]
pub struct NodeInsert {
    pub id: NodeId,
    pub node_type: NodeType,
    pub vector: QuantizedVector,
    pub payload: Vec<u8>,
    pub confidence: Confidence,
    pub delta: f32,
    pub created: Timestamp,
    pub accessed: Timestamp,
}

pub struct UnifiedIndex {
    file: File,
    mmap: memmap2::MmapMut,
    path: PathBuf,
    capacity: u32,
    dim: usize,
    id_map: DashMap<NodeId, SlotId>,
    ann: NavGraph,
    pool: ConnectionPool,
    /// Live semantic edges, keyed by owning slot.
    edges: HashMap<SlotId, Vec<StoredEdge>>,
    /// Slots whose pool record is stale on disk.
    dirty_slots: HashSet<SlotId>,
    payload_tail: u64,
}

fn vector_record_size(dim: usize) -> usize {
    QuantizedVector::disk_size(dim)
}

fn slots_region_start() -> u64 {
    HEADER_REGION
}

fn vectors_region_start(capacity: u32) -> u64 {
    HEADER_REGION + capacity as u64 * SLOT_SIZE as u64
}

fn fixed_region_len(capacity: u32, dim: usize) -> u64 {
    vectors_region_start(capacity) + capacity as u64 * vector_record_size(dim) as u64
}

fn slot_byte_range(slot: SlotId) -> std::ops::Range<usize> {
    let start = slots_region_start() as usize + slot as usize * SLOT_SIZE;
    start..start + SLOT_SIZE
}

fn vector_byte_range(capacity: u32, dim: usize, slot: SlotId) -> std::ops::Range<usize> {
    let record = vector_record_size(dim);
    let start = vectors_region_start(capacity) as usize + slot as usize * record;
    start..start + record
}

/// Raw int8 component bytes of a slot's stored vector.
fn vector_components<'a>(mmap: &'a [u8], capacity: u32, dim: usize, slot: SlotId) -> &'a [u8] {
    let range = vector_byte_range(capacity, dim, slot);
    &mmap[range.start..range.start + dim]
}

impl UnifiedIndex {
    /// Open a store, creating it when absent. `capacity` and `dim` apply
    /// only at creation; afterwards the header is authoritative.
    pub fn open(
        unified_path: &Path,
        pool_path: &Path,
        capacity: u32,
        dim: usize,
        ann_config: AnnConfig,
    ) -> Result<Self> {
        let exists = unified_path.exists() && std::fs::metadata(unified_path)?.len() > 0;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(unified_path)?;

        let (capacity, dim) = if exists {
            let mut header_bytes = [0u8; HEADER_SIZE];
            file.read_exact_at(&mut header_bytes, 0).map_err(|_| {
                ChittaError::IndexCorrupt(format!(
                    "unified file {} shorter than header",
                    unified_path.display()
                ))
            })?;
            let header: UnifiedHeader = *bytemuck::from_bytes(&header_bytes);
            if header.magic != UNIFIED_MAGIC {
                return Err(ChittaError::IndexCorrupt(format!(
                    "unified file {} has wrong magic",
                    unified_path.display()
                )));
            }
            if header.version != UNIFIED_VERSION {
                return Err(ChittaError::IndexCorrupt(format!(
                    "unified file {} has unsupported version {}",
                    unified_path.display(),
                    header.version
                )));
            }
            let expected = fixed_region_len(header.slot_capacity, header.dim as usize);
            if file.metadata()?.len() < expected {
                return Err(ChittaError::IndexCorrupt(format!(
                    "unified file {} shorter than its declared regions",
                    unified_path.display()
                )));
            }
            (header.slot_capacity, header.dim as usize)
        } else {
            if capacity == 0 || dim == 0 {
                return Err(ChittaError::InvalidArgument(
                    "capacity and dimension must be non-zero".into(),
                ));
            }
            let len = fixed_region_len(capacity, dim);
            file.set_len(len)?;
            let header = UnifiedHeader {
                magic: UNIFIED_MAGIC,
                version: UNIFIED_VERSION,
                slot_capacity: capacity,
                slot_watermark: 0,
                dim: dim as u32,
                free_head: NIL_SLOT,
                flags: 0,
                snapshot_counter: 0,
                created_at: crate::types::now_ms(),
            };
            file.write_all_at(bytemuck::bytes_of(&header), 0)?;
            file.sync_all()?;
            (capacity, dim)
        };

        let fixed_len = fixed_region_len(capacity, dim);
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .len(fixed_len as usize)
                .map_mut(&file)?
        };
        let payload_tail = file.metadata()?.len().max(fixed_len);

        // Pool: unreadable means rebuild, not refusal.
        let (pool, pool_entries) = match ConnectionPool::open(pool_path) {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!(
                    "connection pool {} unreadable ({err}); rebuilding ANN graph from vectors",
                    pool_path.display()
                );
                std::fs::remove_file(pool_path).ok();
                ConnectionPool::open(pool_path)?
            }
        };

        let mut index = Self {
            file,
            mmap,
            path: unified_path.to_path_buf(),
            capacity,
            dim,
            id_map: DashMap::new(),
            ann: NavGraph::restore(ann_config, capacity as u64, &pool_entries),
            pool,
            edges: HashMap::new(),
            dirty_slots: HashSet::new(),
            payload_tail,
        };

        index.rebuild_from_scan(&pool_entries);
        Ok(index)
    }

    /// Full scan: rebuild the id map, adopt pool edges, and reinsert any
    /// live slot the restored ANN graph is missing.
    fn rebuild_from_scan(&mut self, pool_entries: &HashMap<SlotId, PoolEntry>) {
        let watermark = self.header().slot_watermark;
        let mut missing = Vec::new();

        for slot in 0..watermark {
            let record = self.slot_record(slot);
            if !record.is_live() {
                continue;
            }
            self.id_map.insert(record.node_id(), slot);
            if let Some(entry) = pool_entries.get(&slot) {
                if !entry.edges.is_empty() {
                    self.edges.insert(slot, entry.edges.clone());
                }
            }
            if !self.ann.contains(slot) {
                missing.push(slot);
            }
        }
        // Drop ANN nodes whose slots died since the last pool flush.
        for (&slot, _) in pool_entries {
            if !self.slot_record_checked(slot).map_or(false, |r| r.is_live()) {
                self.ann.remove(slot);
                self.edges.remove(&slot);
            }
        }

        if !missing.is_empty() {
            log::info!(
                "reinserting {} slots into the ANN graph after pool gap",
                missing.len()
            );
            let capacity = self.capacity;
            let dim = self.dim;
            let mmap = &self.mmap;
            let ann = &mut self.ann;
            let sim = |a: SlotId, b: SlotId| {
                QuantizedVector::cosine_approx_raw(
                    vector_components(mmap, capacity, dim, a),
                    vector_components(mmap, capacity, dim, b),
                )
            };
            for slot in missing {
                ann.insert(slot, &sim);
                self.dirty_slots.insert(slot);
            }
        }
    }

    // ========================
    // Header and record access
    // ========================

    fn header(&self) -> UnifiedHeader {
        *bytemuck::from_bytes(&self.mmap[..HEADER_SIZE])
    }

    fn set_header(&mut self, header: UnifiedHeader) {
        self.mmap[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
    }

    pub fn slot_record(&self, slot: SlotId) -> SlotRecord {
        *bytemuck::from_bytes(&self.mmap[slot_byte_range(slot)])
    }

    pub fn slot_record_checked(&self, slot: SlotId) -> Option<SlotRecord> {
        if slot >= self.header().slot_watermark {
            return None;
        }
        Some(self.slot_record(slot))
    }

    fn set_slot_record(&mut self, slot: SlotId, record: SlotRecord) {
        self.mmap[slot_byte_range(slot)].copy_from_slice(bytemuck::bytes_of(&record));
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }

    pub fn snapshot_counter(&self) -> u64 {
        self.header().snapshot_counter
    }

    // ========================
    // Lifecycle
    // ========================

    /// Allocate a slot and write the node. Fails with OutOfCapacity when
    /// the slot array is exhausted.
    pub fn insert(&mut self, node: &NodeInsert) -> Result<SlotId> {
        if node.vector.dim() != self.dim {
            return Err(ChittaError::InvalidArgument(format!(
                "vector dimension {} does not match store dimension {}",
                node.vector.dim(),
                self.dim
            )));
        }
        if self.id_map.contains_key(&node.id) {
            return Err(ChittaError::InvalidArgument(format!(
                "node {} already exists",
                node.id
            )));
        }

        // Payload first: if the write fails, only orphan heap bytes are
        // left behind and no allocation state has changed. The record is
        // written with READY set last, so a torn write leaves a slot
        // readers ignore.
        let (payload_offset, payload_size) = self.append_payload(&node.payload)?;

        let mut header = self.header();
        let (slot, generation) = if header.free_head != NIL_SLOT {
            let slot = header.free_head;
            let dead = self.slot_record(slot);
            header.free_head = if dead.pool_offset == FREE_LIST_END {
                NIL_SLOT
            } else {
                dead.pool_offset as SlotId
            };
            (slot, dead.generation)
        } else if header.slot_watermark < header.slot_capacity {
            let slot = header.slot_watermark;
            header.slot_watermark += 1;
            (slot, 0)
        } else {
            return Err(ChittaError::OutOfCapacity(self.len()));
        };
        self.set_header(header);

        let range = vector_byte_range(self.capacity, self.dim, slot);
        node.vector.write_to(&mut self.mmap[range]);

        let record = SlotRecord {
            id: node.id.0,
            tau_created: node.created,
            tau_accessed: node.accessed,
            pool_offset: 0,
            payload_offset,
            confidence_mu: node.confidence.mu,
            confidence_sigma: node.confidence.sigma,
            confidence_n: node.confidence.n.max(1),
            delta: node.delta,
            epsilon: 0.0,
            payload_size,
            generation,
            node_type: node.node_type as u8,
            tier: StorageTier::Hot as u8,
            flags: FLAG_READY,
        };
        self.set_slot_record(slot, record);
        self.id_map.insert(node.id, slot);

        let capacity = self.capacity;
        let dim = self.dim;
        let mmap = &self.mmap;
        let ann = &mut self.ann;
        let sim = |a: SlotId, b: SlotId| {
            QuantizedVector::cosine_approx_raw(
                vector_components(mmap, capacity, dim, a),
                vector_components(mmap, capacity, dim, b),
            )
        };
        ann.insert(slot, &sim);
        self.dirty_slots.insert(slot);

        Ok(slot)
    }

    pub fn lookup(&self, id: &NodeId) -> Option<SlotId> {
        self.id_map.get(id).map(|entry| *entry.value())
    }

    /// Mark a slot dead and return it to the free list. Tolerant of
    /// already-dead slots.
    pub fn remove(&mut self, slot: SlotId) -> bool {
        let Some(mut record) = self.slot_record_checked(slot) else {
            return false;
        };
        if !record.is_live() {
            return false;
        }

        self.id_map.remove(&record.node_id());
        self.ann.remove(slot);
        self.edges.remove(&slot);
        self.dirty_slots.remove(&slot);
        self.pool.append_dead(slot).ok();

        let mut header = self.header();
        record.flags = FLAG_DEAD;
        record.generation = record.generation.wrapping_add(1);
        record.pool_offset = if header.free_head == NIL_SLOT {
            FREE_LIST_END
        } else {
            header.free_head as u64
        };
        header.free_head = slot;
        self.set_slot_record(slot, record);
        self.set_header(header);
        true
    }

    // ========================
    // Payload heap
    // ========================

    fn append_payload(&mut self, payload: &[u8]) -> Result<(u64, u32)> {
        let offset = self.payload_tail;
        let mut blob = Vec::with_capacity(4 + payload.len());
        blob.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        blob.extend_from_slice(payload);
        self.file.write_all_at(&blob, offset)?;
        self.payload_tail += blob.len() as u64;
        Ok((offset, payload.len() as u32))
    }

    pub fn read_payload(&self, record: &SlotRecord) -> Result<Vec<u8>> {
        if record.payload_size == 0 {
            return Ok(Vec::new());
        }
        let mut len_bytes = [0u8; 4];
        self.file.read_exact_at(&mut len_bytes, record.payload_offset)?;
        let stored_len = u32::from_le_bytes(len_bytes);
        if stored_len != record.payload_size {
            return Err(ChittaError::IndexCorrupt(format!(
                "payload length mismatch at offset {}",
                record.payload_offset
            )));
        }
        let mut payload = vec![0u8; stored_len as usize];
        self.file
            .read_exact_at(&mut payload, record.payload_offset + 4)?;
        Ok(payload)
    }

    /// Replace a node's payload. The old blob is orphaned until offline
    /// compaction.
    pub fn update_payload(&mut self, slot: SlotId, payload: &[u8]) -> Result<()> {
        let mut record = self
            .slot_record_checked(slot)
            .filter(|r| r.is_live())
            .ok_or_else(|| ChittaError::NotFound(format!("slot {slot}")))?;
        let (offset, size) = self.append_payload(payload)?;
        record.payload_offset = offset;
        record.payload_size = size;
        self.set_slot_record(slot, record);
        Ok(())
    }

    // ========================
    // Vectors
    // ========================

    pub fn vector(&self, slot: SlotId) -> QuantizedVector {
        let range = vector_byte_range(self.capacity, self.dim, slot);
        QuantizedVector::read_from(&self.mmap[range], self.dim)
    }

    pub fn vector_is_zero(&self, slot: SlotId) -> bool {
        self.vector(slot).is_zero()
    }

    /// Re-embed a node: overwrite its vector and reposition it in the
    /// ANN graph.
    pub fn update_vector(&mut self, slot: SlotId, vector: &QuantizedVector) -> Result<()> {
        if vector.dim() != self.dim {
            return Err(ChittaError::InvalidArgument(format!(
                "vector dimension {} does not match store dimension {}",
                vector.dim(),
                self.dim
            )));
        }
        let range = vector_byte_range(self.capacity, self.dim, slot);
        vector.write_to(&mut self.mmap[range]);

        self.ann.remove(slot);
        let capacity = self.capacity;
        let dim = self.dim;
        let mmap = &self.mmap;
        let ann = &mut self.ann;
        let sim = |a: SlotId, b: SlotId| {
            QuantizedVector::cosine_approx_raw(
                vector_components(mmap, capacity, dim, a),
                vector_components(mmap, capacity, dim, b),
            )
        };
        ann.insert(slot, &sim);
        self.dirty_slots.insert(slot);
        Ok(())
    }

    // ========================
    // Metadata updates
    // ========================

    fn with_record(&mut self, slot: SlotId, f: impl FnOnce(&mut SlotRecord)) -> Result<()> {
        let mut record = self
            .slot_record_checked(slot)
            .filter(|r| r.is_live())
            .ok_or_else(|| ChittaError::NotFound(format!("slot {slot}")))?;
        f(&mut record);
        self.set_slot_record(slot, record);
        Ok(())
    }

    pub fn touch(&mut self, slot: SlotId, accessed: Timestamp) -> Result<()> {
        self.with_record(slot, |r| {
            if accessed > r.tau_accessed {
                r.tau_accessed = accessed;
            }
        })
    }

    pub fn set_confidence(&mut self, slot: SlotId, confidence: Confidence) -> Result<()> {
        self.with_record(slot, |r| {
            r.confidence_mu = confidence.mu.clamp(0.0, 1.0);
            r.confidence_sigma = confidence.sigma.clamp(0.0, 1.0);
            r.confidence_n = confidence.n.max(1);
        })
    }

    pub fn set_delta(&mut self, slot: SlotId, delta: f32) -> Result<()> {
        self.with_record(slot, |r| r.delta = delta.max(0.0))
    }

    pub fn set_epsilon(&mut self, slot: SlotId, epsilon: f32) -> Result<()> {
        self.with_record(slot, |r| r.epsilon = epsilon.clamp(0.0, 1.0))
    }

    pub fn set_tier(&mut self, slot: SlotId, tier: StorageTier) -> Result<()> {
        self.with_record(slot, |r| r.tier = tier as u8)
    }

    pub fn set_node_type(&mut self, slot: SlotId, node_type: NodeType) -> Result<()> {
        self.with_record(slot, |r| r.node_type = node_type as u8)
    }

    // ========================
    // Edges
    // ========================

    pub fn edges(&self, slot: SlotId) -> &[StoredEdge] {
        self.edges.get(&slot).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Insert or overwrite the (target, kind) edge.
    pub fn upsert_edge(&mut self, slot: SlotId, edge: StoredEdge) -> Result<()> {
        if self
            .slot_record_checked(slot)
            .filter(|r| r.is_live())
            .is_none()
        {
            return Err(ChittaError::NotFound(format!("slot {slot}")));
        }
        let edges = self.edges.entry(slot).or_default();
        match edges
            .iter_mut()
            .find(|e| e.target_slot == edge.target_slot && e.kind == edge.kind)
        {
            Some(existing) => *existing = edge,
            None => edges.push(edge),
        }
        self.dirty_slots.insert(slot);
        Ok(())
    }

    /// Resolve a stored edge to a live target id, rejecting reused slots
    /// via the generation check.
    pub fn resolve_edge(&self, edge: &StoredEdge) -> Option<NodeId> {
        let record = self.slot_record_checked(edge.target_slot)?;
        if !record.is_live() || record.generation != edge.target_generation {
            return None;
        }
        Some(record.node_id())
    }

    /// Count of stored edges whose target no longer resolves.
    pub fn dangling_edge_count(&self) -> usize {
        self.edges
            .values()
            .flatten()
            .filter(|e| self.resolve_edge(e).is_none())
            .count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|v| v.len()).sum()
    }

    // ========================
    // Materialization
    // ========================

    /// Assemble a full node. Tags are owned by the tag index; the caller
    /// fills them in.
    pub fn get(&self, slot: SlotId) -> Option<Node> {
        let record = self.slot_record_checked(slot)?;
        if !record.is_live() {
            return None;
        }
        let payload = self.read_payload(&record).ok()?;
        let vector = self.vector(slot);
        let edges = self
            .edges(slot)
            .iter()
            .filter_map(|e| {
                self.resolve_edge(e).map(|target| Edge {
                    target,
                    kind: e.kind,
                    weight: e.weight,
                })
            })
            .collect();

        Some(Node {
            id: record.node_id(),
            node_type: NodeType::from_u8(record.node_type)?,
            embedding: vector.to_float(),
            payload,
            confidence: record.confidence(),
            tau_created: record.tau_created,
            tau_accessed: record.tau_accessed,
            delta: record.delta,
            epsilon: record.epsilon,
            edges,
            tags: Vec::new(),
            tier: StorageTier::from_u8(record.tier),
        })
    }

    pub fn get_by_id(&self, id: &NodeId) -> Option<Node> {
        self.get(self.lookup(id)?)
    }

    /// Visit every live slot.
    pub fn for_each(&self, mut f: impl FnMut(SlotId, &SlotRecord)) {
        let watermark = self.header().slot_watermark;
        for slot in 0..watermark {
            let record = self.slot_record(slot);
            if record.is_live() {
                f(slot, &record);
            }
        }
    }

    pub fn live_slots(&self) -> Vec<SlotId> {
        let mut slots = Vec::with_capacity(self.len());
        self.for_each(|slot, _| slots.push(slot));
        slots
    }

    // ========================
    // Search
    // ========================

    /// k approximate nearest neighbours by cosine, best first, ties
    /// broken by slot id. Falls back to brute force if the ANN graph
    /// has drifted from the live set.
    pub fn search(&self, query: &QuantizedVector, k: usize) -> Vec<(SlotId, f32)> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }
        if self.ann.len() * 2 < self.len() {
            log::warn!(
                "ANN graph holds {} of {} live slots; using brute-force search",
                self.ann.len(),
                self.len()
            );
            return self.brute_force_search(query, k);
        }

        let capacity = self.capacity;
        let dim = self.dim;
        let mmap = &self.mmap;
        let query_components: Vec<u8> = query.data.iter().map(|&v| v as u8).collect();
        let qsim = |slot: SlotId| {
            QuantizedVector::cosine_approx_raw(
                &query_components,
                vector_components(mmap, capacity, dim, slot),
            )
        };
        self.ann.search(&qsim, k)
    }

    /// Exact scan over every live vector. Slow but correct.
    pub fn brute_force_search(&self, query: &QuantizedVector, k: usize) -> Vec<(SlotId, f32)> {
        let slots = self.live_slots();
        let capacity = self.capacity;
        let dim = self.dim;
        let mmap = &self.mmap[..];
        let query_components: Vec<u8> = query.data.iter().map(|&v| v as u8).collect();

        let mut scored: Vec<(SlotId, f32)> = slots
            .par_iter()
            .map(|&slot| {
                let sim = QuantizedVector::cosine_approx_raw(
                    &query_components,
                    vector_components(mmap, capacity, dim, slot),
                );
                (slot, sim)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    // ========================
    // Persistence
    // ========================

    /// Flush dirty pool records and sync all regions.
    pub fn checkpoint(&mut self) -> Result<()> {
        let dirty: Vec<SlotId> = self.dirty_slots.drain().collect();
        for slot in dirty {
            let Some(record) = self.slot_record_checked(slot) else {
                continue;
            };
            if !record.is_live() {
                continue;
            }
            let entry = PoolEntry {
                owner_slot: slot,
                levels: self.ann.export_levels(slot).unwrap_or_default(),
                edges: self.edges.get(&slot).cloned().unwrap_or_default(),
            };
            let offset = self.pool.append_entry(&entry)?;
            self.with_record(slot, |r| r.pool_offset = offset)?;
        }
        self.pool.sync()?;
        self.mmap.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Copy-on-write snapshot of the `.unified` file; bumps the counter.
    pub fn snapshot(&mut self, dest: &Path) -> Result<u64> {
        self.checkpoint()?;
        let mut header = self.header();
        header.snapshot_counter += 1;
        let counter = header.snapshot_counter;
        self.set_header(header);
        self.mmap.flush()?;
        std::fs::copy(&self.path, dest)?;
        Ok(counter)
    }

}
