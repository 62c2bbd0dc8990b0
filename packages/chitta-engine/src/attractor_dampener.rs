//! Attractor dampener: suppresses nodes retrieved too often in a
//! sliding window, so a handful of strong memories cannot monopolize
//! every recall.

use crate::error::Result;
use crate::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;

const ATDP_MAGIC: &[u8; 4] = b"ATDP";
const ATDP_VERSION: u32 = 1;

pub const DEFAULT_WINDOW_MS: i64 = 24 * 3600 * 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RetrievalEvent {
    at: Timestamp,
    score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DampenerRow {
    id: NodeId,
    events: Vec<RetrievalEvent>,
}

pub struct AttractorDampener {
    window_ms: i64,
    /// Dampening strength (beta).
    beta: f32,
    events: HashMap<NodeId, VecDeque<RetrievalEvent>>,
}

impl AttractorDampener {
    pub fn new(window_ms: i64, beta: f32) -> Self {
        Self {
            window_ms,
            beta,
            events: HashMap::new(),
        }
    }

    pub fn record(&mut self, id: &NodeId, score: f32, now: Timestamp) {
        let queue = self.events.entry(*id).or_default();
        queue.push_back(RetrievalEvent { at: now, score });
        Self::expire(queue, now, self.window_ms);
    }

    fn expire(queue: &mut VecDeque<RetrievalEvent>, now: Timestamp, window_ms: i64) {
        while let Some(front) = queue.front() {
            if now - front.at > window_ms {
                queue.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn recent_hits(&self, id: &NodeId, now: Timestamp) -> usize {
        self.events
            .get(id)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|e| now - e.at <= self.window_ms)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Multiplier applied to a node's score: `1 / (1 + beta * hits)`.
    pub fn dampening_factor(&self, id: &NodeId, now: Timestamp) -> f32 {
        1.0 / (1.0 + self.beta * self.recent_hits(id, now) as f32)
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.events.remove(id);
    }

    pub fn tracked_count(&self) -> usize {
        self.events.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut rows: Vec<DampenerRow> = self
            .events
            .iter()
            .map(|(id, queue)| DampenerRow {
                id: *id,
                events: queue.iter().copied().collect(),
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        crate::meta_store::save_records(path, ATDP_MAGIC, ATDP_VERSION, &rows)
    }

    pub fn load(path: &Path, window_ms: i64, beta: f32) -> Result<Self> {
        let mut dampener = Self::new(window_ms, beta);
        if let Some((_, rows)) =
            crate::meta_store::load_records::<DampenerRow>(path, ATDP_MAGIC, ATDP_VERSION)?
        {
            for row in rows {
                dampener.events.insert(row.id, row.events.into());
            }
        }
        Ok(dampener)
    }
}

impl Default for AttractorDampener {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS, 0.2)
    }
}
