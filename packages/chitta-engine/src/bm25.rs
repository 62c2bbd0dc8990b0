//! BM25 inverted index for sparse lexical scoring.
//!
//! Built lazily on the first sparse query and skipped entirely above the
//! configured node ceiling, where the retrieval pipeline degrades to
//! pure dense search.

use crate::error::Result;
use crate::types::SlotId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const BM25_MAGIC: &[u8; 4] = b"BM25";
const BM25_VERSION: u32 = 1;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Node count above which the index is not built at all.
pub const DEFAULT_MAX_NODES: usize = 1_000_000;

#[derive(Debug, Serialize, Deserialize)]
struct DocRow {
    slot: SlotId,
    length: u32,
    terms: Vec<(String, u32)>,
}

#[derive(Debug, Default)]
pub struct Bm25Index {
    /// term -> (slot, term frequency)
    postings: HashMap<String, Vec<(SlotId, u32)>>,
    doc_lengths: HashMap<SlotId, u32>,
    total_length: u64,
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    pub fn add(&mut self, slot: SlotId, text: &str) {
        if self.doc_lengths.contains_key(&slot) {
            self.remove(slot);
        }
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }
        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token.clone()).or_default() += 1;
        }
        for (term, tf) in frequencies {
            self.postings.entry(term).or_default().push((slot, tf));
        }
        self.doc_lengths.insert(slot, tokens.len() as u32);
        self.total_length += tokens.len() as u64;
    }

    pub fn remove(&mut self, slot: SlotId) {
        let Some(length) = self.doc_lengths.remove(&slot) else {
            return;
        };
        self.total_length -= length as u64;
        self.postings.retain(|_, posting| {
            posting.retain(|(s, _)| *s != slot);
            !posting.is_empty()
        });
    }

    fn avg_doc_length(&self) -> f32 {
        if self.doc_lengths.is_empty() {
            return 1.0;
        }
        self.total_length as f32 / self.doc_lengths.len() as f32
    }

    /// Top-k by BM25 score, best first, ties broken by slot id.
    pub fn search(&self, query: &str, k: usize) -> Vec<(SlotId, f32)> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }
        let n = self.doc_lengths.len() as f32;
        let avg_len = self.avg_doc_length();
        let mut scores: HashMap<SlotId, f32> = HashMap::new();

        for term in tokenize(query) {
            let Some(posting) = self.postings.get(&term) else {
                continue;
            };
            let df = posting.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for &(slot, tf) in posting {
                let doc_len = *self.doc_lengths.get(&slot).unwrap_or(&1) as f32;
                let tf = tf as f32;
                let score = idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * doc_len / avg_len));
                *scores.entry(slot).or_default() += score;
            }
        }

        let mut ranked: Vec<(SlotId, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut rows: Vec<DocRow> = Vec::with_capacity(self.doc_lengths.len());
        let mut per_doc: HashMap<SlotId, Vec<(String, u32)>> = HashMap::new();
        for (term, posting) in &self.postings {
            for &(slot, tf) in posting {
                per_doc.entry(slot).or_default().push((term.clone(), tf));
            }
        }
        for (&slot, &length) in &self.doc_lengths {
            rows.push(DocRow {
                slot,
                length,
                terms: per_doc.remove(&slot).unwrap_or_default(),
            });
        }
        rows.sort_by_key(|r| r.slot);
        crate::meta_store::save_records(path, BM25_MAGIC, BM25_VERSION, &rows)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut index = Self::new();
        if let Some((_, rows)) =
            crate::meta_store::load_records::<DocRow>(path, BM25_MAGIC, BM25_VERSION)?
        {
            for row in rows {
                index.doc_lengths.insert(row.slot, row.length);
                index.total_length += row.length as u64;
                for (term, tf) in row.terms {
                    index.postings.entry(term).or_default().push((row.slot, tf));
                }
            }
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Bm25Index {
        let mut index = Bm25Index::new();
        index.add(0, "the quick brown fox jumps over the lazy dog");
        index.add(1, "a fast auburn fox leaps across a sleepy hound");
        index.add(2, "rust memory engines and write ahead logs");
        index
    }

    #[test]
    fn test_keyword_match_ranks_first() {
        let index = sample();
        let results = index.search("quick brown fox", 3);
        assert_eq!(results[0].0, 0);
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn test_scores_non_increasing() {
        let index = sample();
        let results = index.search("fox memory", 3);
        for pair in results.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_remove_drops_document() {
        let mut index = sample();
        index.remove(0);
        let results = index.search("quick brown", 3);
        assert!(results.iter().all(|(slot, _)| *slot != 0));
    }

    #[test]
    fn test_re_add_replaces() {
        let mut index = sample();
        index.add(2, "completely different topic entirely");
        let results = index.search("write ahead logs", 3);
        assert!(results.iter().all(|(slot, _)| *slot != 2));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.bm25");
        let index = sample();
        index.save(&path).unwrap();

        let loaded = Bm25Index::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        let results = loaded.search("quick brown fox", 1);
        assert_eq!(results[0].0, 0);
    }
}
