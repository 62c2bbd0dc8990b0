//! Review queue: nodes awaiting human adjudication.

use crate::error::Result;
use crate::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::Path;

const RVQU_MAGIC: &[u8; 4] = b"RVQU";
const RVQU_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Edited,
    Rejected,
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub node: NodeId,
    pub context: String,
    pub priority: f32,
    pub status: ReviewStatus,
    pub rating: Option<u8>,
    pub enqueued_at: Timestamp,
    pub adjudicated_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
pub struct ReviewQueue {
    items: Vec<ReviewItem>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, node: NodeId, context: &str, priority: f32, now: Timestamp) {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.node == node && i.status == ReviewStatus::Pending)
        {
            existing.priority = existing.priority.max(priority);
            existing.context = context.to_string();
            return;
        }
        self.items.push(ReviewItem {
            node,
            context: context.to_string(),
            priority,
            status: ReviewStatus::Pending,
            rating: None,
            enqueued_at: now,
            adjudicated_at: None,
        });
    }

    /// Pending items, highest priority first, oldest breaking ties.
    pub fn pending(&self, limit: usize) -> Vec<&ReviewItem> {
        let mut pending: Vec<&ReviewItem> = self
            .items
            .iter()
            .filter(|i| i.status == ReviewStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then(a.enqueued_at.cmp(&b.enqueued_at))
        });
        pending.truncate(limit);
        pending
    }

    pub fn adjudicate(
        &mut self,
        node: &NodeId,
        status: ReviewStatus,
        rating: Option<u8>,
        now: Timestamp,
    ) -> bool {
        let Some(item) = self
            .items
            .iter_mut()
            .find(|i| i.node == *node && i.status == ReviewStatus::Pending)
        else {
            return false;
        };
        item.status = status;
        item.rating = rating;
        item.adjudicated_at = Some(now);
        true
    }

    pub fn status_of(&self, node: &NodeId) -> Option<ReviewStatus> {
        self.items.iter().rev().find(|i| i.node == *node).map(|i| i.status)
    }

    pub fn remove(&mut self, node: &NodeId) {
        self.items.retain(|i| i.node != *node);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::meta_store::save_records(path, RVQU_MAGIC, RVQU_VERSION, &self.items)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let items = crate::meta_store::load_records::<ReviewItem>(path, RVQU_MAGIC, RVQU_VERSION)?
            .map(|(_, rows)| rows)
            .unwrap_or_default();
        Ok(Self { items })
    }
}
