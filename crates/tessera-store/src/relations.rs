//! Per-document relation links.
//!
//! Owned by the document that declared them; dropped with it.

use std::collections::HashMap;

use tessera_types::{ObjectId, RelationLink};

/// Relation links by object id.
#[derive(Debug, Default, Clone)]
pub struct RelationsStore {
    links: HashMap<ObjectId, Vec<RelationLink>>,
}

impl RelationsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn links(&self, id: &str) -> &[RelationLink] {
        self.links.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn link(&self, id: &str, key: &str) -> Option<&RelationLink> {
        self.links(id).iter().find(|l| l.key == key)
    }

    /// Replace all links of an object.
    pub fn set(&mut self, id: ObjectId, links: Vec<RelationLink>) {
        self.links.insert(id, links);
    }

    /// Insert or replace links by key, keeping the rest.
    pub fn amend(&mut self, id: ObjectId, links: &[RelationLink]) {
        let existing = self.links.entry(id).or_default();
        for link in links {
            match existing.iter_mut().find(|l| l.key == link.key) {
                Some(slot) => *slot = link.clone(),
                None => existing.push(link.clone()),
            }
        }
    }

    /// Returns how many links were removed.
    pub fn remove(&mut self, id: &str, keys: &[String]) -> usize {
        let Some(existing) = self.links.get_mut(id) else { return 0 };
        let before = existing.len();
        existing.retain(|l| !keys.contains(&l.key));
        before - existing.len()
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }
}
