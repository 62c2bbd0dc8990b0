//! Tag index: exact-match `tag -> set(slot)` lookups, persisted to the
//! `.tags` file and rebuilt from a full scan when that file is absent.

use crate::error::Result;
use crate::types::SlotId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

const TAGS_MAGIC: &[u8; 4] = b"TAGS";
const TAGS_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TagRow {
    tag: String,
    slots: Vec<SlotId>,
}

#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: HashMap<String, BTreeSet<SlotId>>,
    by_slot: HashMap<SlotId, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, slot: SlotId, tag: &str) {
        self.by_tag.entry(tag.to_string()).or_default().insert(slot);
        self.by_slot
            .entry(slot)
            .or_default()
            .insert(tag.to_string());
    }

    pub fn remove(&mut self, slot: SlotId, tag: &str) {
        if let Some(slots) = self.by_tag.get_mut(tag) {
            slots.remove(&slot);
            if slots.is_empty() {
                self.by_tag.remove(tag);
            }
        }
        if let Some(tags) = self.by_slot.get_mut(&slot) {
            tags.remove(tag);
            if tags.is_empty() {
                self.by_slot.remove(&slot);
            }
        }
    }

    /// Drop every tag a slot carries (on forget).
    pub fn remove_slot(&mut self, slot: SlotId) {
        if let Some(tags) = self.by_slot.remove(&slot) {
            for tag in tags {
                if let Some(slots) = self.by_tag.get_mut(&tag) {
                    slots.remove(&slot);
                    if slots.is_empty() {
                        self.by_tag.remove(&tag);
                    }
                }
            }
        }
    }

    pub fn find(&self, tag: &str) -> Vec<SlotId> {
        self.by_tag
            .get(tag)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Intersection across all given tags.
    pub fn find_all(&self, tags: &[String]) -> Vec<SlotId> {
        let mut iter = tags.iter();
        let Some(first) = iter.next() else {
            return Vec::new();
        };
        let Some(mut acc) = self.by_tag.get(first).cloned() else {
            return Vec::new();
        };
        for tag in iter {
            let Some(slots) = self.by_tag.get(tag) else {
                return Vec::new();
            };
            acc = acc.intersection(slots).copied().collect();
            if acc.is_empty() {
                break;
            }
        }
        acc.into_iter().collect()
    }

    pub fn tags_of(&self, slot: SlotId) -> Vec<String> {
        self.by_slot
            .get(&slot)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let rows: Vec<TagRow> = self
            .by_tag
            .iter()
            .map(|(tag, slots)| TagRow {
                tag: tag.clone(),
                slots: slots.iter().copied().collect(),
            })
            .collect();
        crate::meta_store::save_records(path, TAGS_MAGIC, TAGS_VERSION, &rows)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut index = Self::new();
        if let Some((_, rows)) =
            crate::meta_store::load_records::<TagRow>(path, TAGS_MAGIC, TAGS_VERSION)?
        {
            for row in rows {
                for slot in row.slots {
                    index.add(slot, &row.tag);
                }
            }
        }
        Ok(index)
    }
}
