//! Realm scoping: a tree of named subspaces rooted at `brahman`. Each
//! node belongs to exactly one realm; recall only surfaces nodes whose
//! realm is the current realm or a descendant of it, unless the node is
//! marked explicit, in which case only an exact match qualifies.

use crate::error::{ChittaError, Result};
use crate::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const RLMS_MAGIC: &[u8; 4] = b"RLMS";
const RLMS_VERSION: u32 = 1;

pub const ROOT_REALM: &str = "brahman";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealmVisibility {
    /// Visible from the realm and every ancestor realm.
    Inherited,
    /// Visible only when the current realm matches exactly.
    Explicit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Assignment {
    id: NodeId,
    realm: String,
    visibility: RealmVisibility,
    assigned_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum RealmRow {
    Realm { name: String, parent: String },
    Current { name: String },
    Node(Assignment),
}

pub struct RealmScoping {
    /// realm -> parent; the root maps to itself.
    parents: HashMap<String, String>,
    assignments: HashMap<NodeId, Assignment>,
    current: String,
}

impl RealmScoping {
    pub fn new() -> Self {
        let mut parents = HashMap::new();
        parents.insert(ROOT_REALM.to_string(), ROOT_REALM.to_string());
        Self {
            parents,
            assignments: HashMap::new(),
            current: ROOT_REALM.to_string(),
        }
    }

    pub fn current_realm(&self) -> &str {
        &self.current
    }

    pub fn set_current(&mut self, name: &str) -> Result<()> {
        if !self.parents.contains_key(name) {
            return Err(ChittaError::NotFound(format!("realm {name}")));
        }
        self.current = name.to_string();
        Ok(())
    }

    pub fn create_realm(&mut self, name: &str, parent: &str) -> Result<()> {
        if name.is_empty() {
            return Err(ChittaError::InvalidArgument("realm name is empty".into()));
        }
        if self.parents.contains_key(name) {
            return Err(ChittaError::InvalidArgument(format!(
                "realm {name} already exists"
            )));
        }
        if !self.parents.contains_key(parent) {
            return Err(ChittaError::NotFound(format!("parent realm {parent}")));
        }
        self.parents.insert(name.to_string(), parent.to_string());
        Ok(())
    }

    pub fn realm_exists(&self, name: &str) -> bool {
        self.parents.contains_key(name)
    }

    pub fn assign(&mut self, id: NodeId, realm: &str, visibility: RealmVisibility, now: Timestamp) {
        let realm = if self.parents.contains_key(realm) {
            realm.to_string()
        } else {
            ROOT_REALM.to_string()
        };
        self.assignments.insert(
            id,
            Assignment {
                id,
                realm,
                visibility,
                assigned_at: now,
            },
        );
    }

    pub fn realm_of(&self, id: &NodeId) -> Option<&str> {
        self.assignments.get(id).map(|a| a.realm.as_str())
    }

    /// Is `ancestor` on the parent chain of `realm` (or equal to it)?
    fn is_ancestor_or_equal(&self, ancestor: &str, realm: &str) -> bool {
        let mut cursor = realm;
        loop {
            if cursor == ancestor {
                return true;
            }
            match self.parents.get(cursor) {
                Some(parent) if parent != cursor => cursor = parent,
                _ => return false,
            }
        }
    }

    /// Visibility of a node from the current realm. Unassigned nodes are
    /// always visible.
    pub fn visible(&self, id: &NodeId) -> bool {
        let Some(assignment) = self.assignments.get(id) else {
            return true;
        };
        match assignment.visibility {
            RealmVisibility::Explicit => assignment.realm == self.current,
            RealmVisibility::Inherited => self.is_ancestor_or_equal(&self.current, &assignment.realm),
        }
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.assignments.remove(id);
    }

    pub fn scoped_node_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut rows: Vec<RealmRow> = Vec::new();
        let mut realms: Vec<(&String, &String)> = self.parents.iter().collect();
        realms.sort();
        for (name, parent) in realms {
            if name != ROOT_REALM {
                rows.push(RealmRow::Realm {
                    name: name.clone(),
                    parent: parent.clone(),
                });
            }
        }
        rows.push(RealmRow::Current {
            name: self.current.clone(),
        });
        let mut assignments: Vec<&Assignment> = self.assignments.values().collect();
        assignments.sort_by_key(|a| a.id);
        for assignment in assignments {
            rows.push(RealmRow::Node(assignment.clone()));
        }
        crate::meta_store::save_records(path, RLMS_MAGIC, RLMS_VERSION, &rows)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut scoping = Self::new();
        if let Some((_, rows)) =
            crate::meta_store::load_records::<RealmRow>(path, RLMS_MAGIC, RLMS_VERSION)?
        {
            for row in rows {
                match row {
                    RealmRow::Realm { name, parent } => {
                        scoping.parents.insert(name, parent);
                    }
                    RealmRow::Current { name } => {
                        if scoping.parents.contains_key(&name) {
                            scoping.current = name;
                        }
                    }
                    RealmRow::Node(assignment) => {
                        scoping.assignments.insert(assignment.id, assignment);
                    }
                }
            }
        }
        Ok(scoping)
    }
}

impl Default for RealmScoping {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestor_visibility() {
        let mut scoping = RealmScoping::new();
        scoping.create_realm("work", ROOT_REALM).unwrap();
        scoping.create_realm("work/chitta", "work").unwrap();

        let id = NodeId::generate();
        scoping.assign(id, "work/chitta", RealmVisibility::Inherited, 0);

        // From the root, every inherited node is visible.
        assert!(scoping.visible(&id));

        scoping.set_current("work").unwrap();
        assert!(scoping.visible(&id));

        scoping.create_realm("play", ROOT_REALM).unwrap();
        scoping.set_current("play").unwrap();
        assert!(!scoping.visible(&id));
    }

    #[test]
    fn test_explicit_requires_equality() {
        let mut scoping = RealmScoping::new();
        scoping.create_realm("secret", ROOT_REALM).unwrap();
        let id = NodeId::generate();
        scoping.assign(id, "secret", RealmVisibility::Explicit, 0);

        // Root is an ancestor, but explicit nodes hide from it.
        assert!(!scoping.visible(&id));
        scoping.set_current("secret").unwrap();
        assert!(scoping.visible(&id));
    }

    #[test]
    fn test_unknown_realm_rejected() {
        let mut scoping = RealmScoping::new();
        assert!(scoping.set_current("nowhere").is_err());
        assert!(scoping.create_realm("child", "nowhere").is_err());
        assert!(scoping.create_realm("", ROOT_REALM).is_err());
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("test.realm_scoping");
        let id = NodeId::generate();
        {
            let mut scoping = RealmScoping::new();
            scoping.create_realm("work", ROOT_REALM).unwrap();
            scoping.assign(id, "work", RealmVisibility::Inherited, 7);
            scoping.set_current("work").unwrap();
            scoping.save(&path).unwrap();
        }
        let scoping = RealmScoping::load(&path).unwrap();
        assert_eq!(scoping.current_realm(), "work");
        assert_eq!(scoping.realm_of(&id), Some("work"));
        assert_eq!(scoping.scoped_node_count(), 1);
    }
}
