//! Block store: an arena of block nodes addressable by id.
//!
//! Content and structure are independent axes. Node payloads live in one
//! map; the ordered child lists live in a separate adjacency map, and a
//! parent index is derived from the adjacency on every children change. A
//! node never has two parents: attaching a child to a new parent detaches
//! it from the old one.
//!
//! # Lazy validation
//!
//! While a multi-event batch is still arriving, a children list may name
//! ids that have not been added yet (and a delete leaves the parent's list
//! pointing at a removed id until the follow-up set-children). Such parents
//! are remembered and checked by [`BlockStore::validate_pending`] once the
//! batch is done.

use std::collections::{BTreeMap, HashMap, HashSet};

use tessera_types::{Alignment, Block, BlockContent, BlockId};
use tracing::{debug, warn};

use crate::{Result, StoreError};

/// Content half of a block: everything except its children.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockNode {
    pub id: BlockId,
    pub content: BlockContent,
    pub background_color: Option<String>,
    pub alignment: Alignment,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl BlockNode {
    /// Split a block into its node and its children list.
    pub fn split(block: Block) -> (BlockNode, Vec<BlockId>) {
        let Block { id, content, children_ids, background_color, alignment, fields } = block;
        (BlockNode { id, content, background_color, alignment, fields }, children_ids)
    }

    /// Reassemble a full block.
    pub fn to_block(&self, children: &[BlockId]) -> Block {
        Block {
            id: self.id.clone(),
            content: self.content.clone(),
            children_ids: children.to_vec(),
            background_color: self.background_color.clone(),
            alignment: self.alignment,
            fields: self.fields.clone(),
        }
    }
}

/// Arena of blocks for one document.
#[derive(Debug, Default)]
pub struct BlockStore {
    /// Node payloads by id.
    nodes: HashMap<BlockId, BlockNode>,
    /// Ordered children by parent id.
    children: HashMap<BlockId, Vec<BlockId>>,
    /// Derived: child → parent.
    parents: HashMap<BlockId, BlockId>,
    /// Parents whose children list may reference missing ids.
    unverified: HashSet<BlockId>,
    /// Bumped on every mutation.
    version: u64,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Full block (node + children) by id.
    pub fn get(&self, id: &str) -> Option<Block> {
        self.nodes.get(id).map(|node| node.to_block(self.children(id)))
    }

    /// Node payload by id, without children.
    pub fn node(&self, id: &str) -> Option<&BlockNode> {
        self.nodes.get(id)
    }

    /// Ordered children of a block (empty if none or unknown).
    pub fn children(&self, id: &str) -> &[BlockId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent of a block, from the derived index.
    pub fn parent(&self, id: &str) -> Option<&BlockId> {
        self.parents.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &BlockId> {
        self.nodes.keys()
    }

    /// Content-only snapshot, ordered by id. Two stores holding the same
    /// blocks compare equal regardless of mutation history.
    pub fn snapshot(&self) -> BTreeMap<BlockId, Block> {
        self.nodes
            .keys()
            .filter_map(|id| self.get(id).map(|b| (id.clone(), b)))
            .collect()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or replace a node.
    ///
    /// When replacing, existing children are preserved unless `children`
    /// is `Some`. Children given here are accepted lazily: forward
    /// references are expected while a show/add batch is being applied.
    /// Returns whether an existing node was replaced.
    pub fn upsert(&mut self, node: BlockNode, children: Option<Vec<BlockId>>) -> bool {
        let id = node.id.clone();
        let replaced = self.nodes.insert(id.clone(), node).is_some();
        if let Some(children) = children {
            self.set_children(&id, children);
        }
        self.version += 1;
        replaced
    }

    /// Insert or replace a full block, children included.
    pub fn insert_block(&mut self, block: Block) -> bool {
        let (node, children) = BlockNode::split(block);
        self.upsert(node, Some(children))
    }

    /// Replace the ordered child list of `parent_id`.
    ///
    /// With `allow_missing = false`, every id must already exist or the call
    /// fails without changing anything. With `allow_missing = true`, missing
    /// ids are kept and checked later by [`validate_pending`](Self::validate_pending).
    pub fn replace_children(
        &mut self,
        parent_id: &BlockId,
        new_children: Vec<BlockId>,
        allow_missing: bool,
    ) -> Result<()> {
        if !self.nodes.contains_key(parent_id) {
            return Err(StoreError::BlockNotFound(parent_id.clone()));
        }
        if !allow_missing {
            let missing: Vec<BlockId> = new_children
                .iter()
                .filter(|c| !self.nodes.contains_key(*c))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(StoreError::MissingChildren { parent: parent_id.clone(), missing });
            }
        }
        self.set_children(parent_id, new_children);
        self.version += 1;
        Ok(())
    }

    /// Delete a node. Children are not deleted recursively; the authority
    /// emits explicit deletes for descendants.
    pub fn remove(&mut self, id: &str) -> Option<Block> {
        let node = self.nodes.remove(id)?;
        let children = self.children.remove(id).unwrap_or_default();
        for child in &children {
            if self.parents.get(child).is_some_and(|p| p.as_str() == id) {
                self.parents.remove(child);
            }
        }
        if let Some(parent) = self.parents.remove(id) {
            // Parent still lists this id until its set-children arrives.
            self.unverified.insert(parent);
        }
        self.unverified.remove(id);
        self.version += 1;
        Some(node.to_block(&children))
    }

    /// Drop everything (show replaces the tree wholesale).
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.children.clear();
        self.parents.clear();
        self.unverified.clear();
        self.version += 1;
    }

    /// Check parents whose lists were accepted lazily.
    ///
    /// Returns one [`StoreError::MissingChildren`] per parent that still
    /// references absent ids. Each parent is reported once; the pending set
    /// is cleared.
    pub fn validate_pending(&mut self) -> Vec<StoreError> {
        let mut problems = Vec::new();
        for parent in self.unverified.drain() {
            let Some(list) = self.children.get(&parent) else { continue };
            let missing: Vec<BlockId> = list
                .iter()
                .filter(|c| !self.nodes.contains_key(*c))
                .cloned()
                .collect();
            if !missing.is_empty() {
                problems.push(StoreError::MissingChildren { parent, missing });
            }
        }
        problems
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn set_children(&mut self, parent_id: &BlockId, new_children: Vec<BlockId>) {
        let mut seen = HashSet::with_capacity(new_children.len());
        let mut deduped = Vec::with_capacity(new_children.len());
        for child in new_children {
            if seen.insert(child.clone()) {
                deduped.push(child);
            } else {
                warn!("Duplicate child {:?} under {:?}, keeping first occurrence", child, parent_id);
            }
        }

        let old = self.children.remove(parent_id).unwrap_or_default();
        for child in &old {
            if !seen.contains(child) && self.parents.get(child) == Some(parent_id) {
                self.parents.remove(child);
            }
        }

        let mut has_missing = false;
        for child in &deduped {
            has_missing |= !self.nodes.contains_key(child);
            match self.parents.insert(child.clone(), parent_id.clone()) {
                Some(previous) if &previous != parent_id => {
                    debug!("Moving {:?} from {:?} to {:?}", child, previous, parent_id);
                    if let Some(list) = self.children.get_mut(&previous) {
                        list.retain(|c| c != child);
                    }
                }
                _ => {}
            }
        }

        if has_missing {
            self.unverified.insert(parent_id.clone());
        } else {
            self.unverified.remove(parent_id);
        }
        if !deduped.is_empty() {
            self.children.insert(parent_id.clone(), deduped);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
