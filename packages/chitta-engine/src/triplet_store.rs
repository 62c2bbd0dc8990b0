//! Triplet store: dictionary-encoded `(subject, predicate, object,
//! weight)` facts with per-position posting lists for exact queries and
//! full scans for wildcards.
//!
//! Persisted to `.graph`; recent edits go to an append-only `.graph.wal`
//! that is folded into the main file on save.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

const GRAPH_MAGIC: &[u8; 4] = b"GRPH";
const GRAPH_VERSION: u32 = 1;
const MAX_WAL_RECORD: u32 = 1024 * 1024;

type TermId = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphRow {
    subject: String,
    predicate: String,
    object: String,
    weight: f32,
}

/// One resolved fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Triplet {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub weight: f32,
}

#[derive(Debug, Default)]
struct Dictionary {
    terms: Vec<String>,
    ids: HashMap<String, TermId>,
}

impl Dictionary {
    fn intern(&mut self, term: &str) -> TermId {
        if let Some(&id) = self.ids.get(term) {
            return id;
        }
        let id = self.terms.len() as TermId;
        self.terms.push(term.to_string());
        self.ids.insert(term.to_string(), id);
        id
    }

    fn get(&self, term: &str) -> Option<TermId> {
        self.ids.get(term).copied()
    }

    fn resolve(&self, id: TermId) -> &str {
        &self.terms[id as usize]
    }
}

pub struct TripletStore {
    dictionary: Dictionary,
    triples: Vec<(TermId, TermId, TermId, f32)>,
    /// Exact-match indices, one per position.
    by_subject: HashMap<TermId, Vec<usize>>,
    by_predicate: HashMap<TermId, Vec<usize>>,
    by_object: HashMap<TermId, Vec<usize>>,
    wal: Option<GraphWal>,
}

struct GraphWal {
    file: File,
    path: PathBuf,
    len: u64,
}

impl GraphWal {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    fn append(&mut self, row: &GraphRow) -> Result<()> {
        let body = bincode::serialize(row)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut frame = Vec::with_capacity(8 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        frame.extend_from_slice(&body);
        self.file.write_all(&frame)?;
        self.len += frame.len() as u64;
        Ok(())
    }

    fn replay(&mut self) -> Vec<GraphRow> {
        let mut rows = Vec::new();
        let mut pos = 0u64;
        let mut header = [0u8; 8];
        while pos + 8 <= self.len {
            if self.file.read_exact_at(&mut header, pos).is_err() {
                break;
            }
            let body_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if body_len == 0 || body_len > MAX_WAL_RECORD {
                break;
            }
            let end = pos + 8 + body_len as u64;
            if end > self.len {
                break;
            }
            let mut body = vec![0u8; body_len as usize];
            if self.file.read_exact_at(&mut body, pos + 8).is_err() {
                break;
            }
            if crc32fast::hash(&body) != crc {
                log::debug!("graph wal {}: checksum mismatch, dropping tail", self.path.display());
                break;
            }
            match bincode::deserialize(&body) {
                Ok(row) => rows.push(row),
                Err(_) => break,
            }
            pos = end;
        }
        rows
    }

    fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_data()?;
        self.len = 0;
        Ok(())
    }
}

impl TripletStore {
    pub fn new() -> Self {
        Self {
            dictionary: Dictionary::default(),
            triples: Vec::new(),
            by_subject: HashMap::new(),
            by_predicate: HashMap::new(),
            by_object: HashMap::new(),
            wal: None,
        }
    }

    /// Open from `.graph`, then replay `.graph.wal` on top.
    pub fn open(graph_path: &Path, wal_path: &Path) -> Result<Self> {
        let mut store = Self::new();
        if let Some((_, rows)) =
            crate::meta_store::load_records::<GraphRow>(graph_path, GRAPH_MAGIC, GRAPH_VERSION)?
        {
            for row in rows {
                store.insert_row(&row);
            }
        }
        let mut wal = GraphWal::open(wal_path)?;
        for row in wal.replay() {
            store.insert_row(&row);
        }
        store.wal = Some(wal);
        Ok(store)
    }

    fn insert_row(&mut self, row: &GraphRow) {
        let s = self.dictionary.intern(&row.subject);
        let p = self.dictionary.intern(&row.predicate);
        let o = self.dictionary.intern(&row.object);

        // Same fact again just refreshes the weight.
        if let Some(&idx) = self.by_subject.get(&s).and_then(|candidates| {
            candidates
                .iter()
                .find(|&&i| self.triples[i].1 == p && self.triples[i].2 == o)
        }) {
            self.triples[idx].3 = row.weight;
            return;
        }

        let idx = self.triples.len();
        self.triples.push((s, p, o, row.weight));
        self.by_subject.entry(s).or_default().push(idx);
        self.by_predicate.entry(p).or_default().push(idx);
        self.by_object.entry(o).or_default().push(idx);
    }

    /// Add a fact, WAL-logged when a log is attached.
    pub fn insert(&mut self, subject: &str, predicate: &str, object: &str, weight: f32) -> Result<()> {
        let row = GraphRow {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            weight,
        };
        if let Some(wal) = self.wal.as_mut() {
            wal.append(&row)?;
        }
        self.insert_row(&row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Wildcard query: `None` in any position matches everything.
    pub fn query(
        &self,
        subject: Option<&str>,
        predicate: Option<&str>,
        object: Option<&str>,
    ) -> Vec<Triplet> {
        // Resolve bound positions; an unknown term matches nothing.
        let s = match subject.map(|t| self.dictionary.get(t)) {
            Some(None) => return Vec::new(),
            Some(Some(id)) => Some(id),
            None => None,
        };
        let p = match predicate.map(|t| self.dictionary.get(t)) {
            Some(None) => return Vec::new(),
            Some(Some(id)) => Some(id),
            None => None,
        };
        let o = match object.map(|t| self.dictionary.get(t)) {
            Some(None) => return Vec::new(),
            Some(Some(id)) => Some(id),
            None => None,
        };

        // Narrowest available posting list, else full scan.
        let candidates: Vec<usize> = if let Some(id) = s {
            self.by_subject.get(&id).cloned().unwrap_or_default()
        } else if let Some(id) = o {
            self.by_object.get(&id).cloned().unwrap_or_default()
        } else if let Some(id) = p {
            self.by_predicate.get(&id).cloned().unwrap_or_default()
        } else {
            (0..self.triples.len()).collect()
        };

        candidates
            .into_iter()
            .filter_map(|idx| {
                let (ts, tp, to, weight) = self.triples[idx];
                if s.map_or(true, |id| id == ts)
                    && p.map_or(true, |id| id == tp)
                    && o.map_or(true, |id| id == to)
                {
                    Some(Triplet {
                        subject: self.dictionary.resolve(ts).to_string(),
                        predicate: self.dictionary.resolve(tp).to_string(),
                        object: self.dictionary.resolve(to).to_string(),
                        weight,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Every term that appears in subject or object position.
    pub fn contains_entity(&self, name: &str) -> bool {
        match self.dictionary.get(name) {
            Some(id) => self.by_subject.contains_key(&id) || self.by_object.contains_key(&id),
            None => false,
        }
    }

    /// Fold the WAL into the main file and truncate it.
    pub fn save(&mut self, graph_path: &Path) -> Result<()> {
        let rows: Vec<GraphRow> = self
            .triples
            .iter()
            .map(|&(s, p, o, weight)| GraphRow {
                subject: self.dictionary.resolve(s).to_string(),
                predicate: self.dictionary.resolve(p).to_string(),
                object: self.dictionary.resolve(o).to_string(),
                weight,
            })
            .collect();
        crate::meta_store::save_records(graph_path, GRAPH_MAGIC, GRAPH_VERSION, &rows)?;
        if let Some(wal) = self.wal.as_mut() {
            wal.reset()?;
        }
        Ok(())
    }
}

impl Default for TripletStore {
    fn default() -> Self {
        Self::new()
    }
}
