//! Tree builder and derived tree index.
//!
//! A show event delivers a flat list of blocks and a declared root. The
//! builder inserts everything first so forward references resolve, then
//! walks from the root assigning depth and parent to every reachable node.
//! Nodes the walk never reaches stay in the store as soft orphans.
//!
//! Structural problems are collected as [`TreeAnomaly`] values and logged.
//! Only a root that is absent from the snapshot is fatal.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tessera_types::{Block, BlockContent, BlockId};
use tracing::{debug, warn};

use crate::{BlockStore, MAX_TREE_DEPTH, Result, StoreError};

/// A recoverable structural problem found while building or indexing a tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeAnomaly {
    /// The root id appears more than once in the snapshot; the first copy wins.
    DuplicateRoot { root_id: BlockId, count: usize },
    /// A non-root id appears more than once; the first copy wins.
    DuplicateBlock(BlockId),
    /// Parentless nodes other than the declared root.
    ExtraRoots(Vec<BlockId>),
    /// Nodes present in the store but unreachable from the root.
    SoftOrphans(Vec<BlockId>),
    /// A children list references an id the store does not hold.
    MissingChild { parent: BlockId, child: BlockId },
    /// A child was reached a second time during traversal.
    Cycle { parent: BlockId, child: BlockId },
    /// Traversal was cut off below this node.
    DepthExceeded { id: BlockId, depth: usize },
}

impl fmt::Display for TreeAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeAnomaly::DuplicateRoot { root_id, count } => {
                write!(f, "root {root_id} appears {count} times")
            }
            TreeAnomaly::DuplicateBlock(id) => write!(f, "block {id} appears more than once"),
            TreeAnomaly::ExtraRoots(ids) => write!(f, "{} extra parentless blocks", ids.len()),
            TreeAnomaly::SoftOrphans(ids) => write!(f, "{} blocks unreachable from root", ids.len()),
            TreeAnomaly::MissingChild { parent, child } => {
                write!(f, "{parent} references missing child {child}")
            }
            TreeAnomaly::Cycle { parent, child } => {
                write!(f, "{child} reached twice (via {parent})")
            }
            TreeAnomaly::DepthExceeded { id, depth } => {
                write!(f, "traversal cut at {id} (depth {depth})")
            }
        }
    }
}

/// Position of one reachable node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub depth: usize,
    pub parent: Option<BlockId>,
}

/// Depth/ancestry metadata for the renderable tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeIndex {
    root_id: BlockId,
    entries: HashMap<BlockId, TreeEntry>,
    /// Pre-order, root first.
    order: Vec<BlockId>,
}

impl TreeIndex {
    /// Walk the store from `root_id`.
    ///
    /// Missing children, revisits, and over-deep branches are skipped and
    /// reported; the walk itself never fails.
    pub fn compute(store: &BlockStore, root_id: &BlockId) -> (Self, Vec<TreeAnomaly>) {
        let mut index = TreeIndex {
            root_id: root_id.clone(),
            entries: HashMap::with_capacity(store.len()),
            order: Vec::with_capacity(store.len()),
        };
        let mut anomalies = Vec::new();
        if !store.contains(root_id) {
            return (index, anomalies);
        }

        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut stack: Vec<(BlockId, usize, Option<BlockId>)> = vec![(root_id.clone(), 0, None)];

        while let Some((id, depth, parent)) = stack.pop() {
            if !visited.insert(id.clone()) {
                if let Some(parent) = parent {
                    anomalies.push(TreeAnomaly::Cycle { parent, child: id });
                }
                continue;
            }
            index.order.push(id.clone());
            index.entries.insert(id.clone(), TreeEntry { depth, parent });

            let children = store.children(&id);
            if children.is_empty() {
                continue;
            }
            if depth + 1 > MAX_TREE_DEPTH {
                warn!("tree traversal hit MAX_TREE_DEPTH ({MAX_TREE_DEPTH}) at {id}, truncating");
                anomalies.push(TreeAnomaly::DepthExceeded { id, depth });
                continue;
            }
            let mut present = Vec::with_capacity(children.len());
            for child in children {
                if store.contains(child) {
                    present.push(child.clone());
                } else {
                    anomalies.push(TreeAnomaly::MissingChild {
                        parent: id.clone(),
                        child: child.clone(),
                    });
                }
            }
            for child in present.into_iter().rev() {
                stack.push((child, depth + 1, Some(id.clone())));
            }
        }

        let orphans: Vec<BlockId> = {
            let mut ids: Vec<BlockId> =
                store.ids().filter(|id| !index.entries.contains_key(*id)).cloned().collect();
            ids.sort();
            ids
        };
        if !orphans.is_empty() {
            anomalies.push(TreeAnomaly::SoftOrphans(orphans));
        }

        (index, anomalies)
    }

    pub fn root_id(&self) -> &BlockId {
        &self.root_id
    }

    /// Number of reachable nodes, root included.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether `id` is part of the renderable tree.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Depth below the root (root is 0).
    pub fn depth(&self, id: &str) -> Option<usize> {
        self.entries.get(id).map(|e| e.depth)
    }

    pub fn parent(&self, id: &str) -> Option<&BlockId> {
        self.entries.get(id).and_then(|e| e.parent.as_ref())
    }

    /// Ancestor chain, nearest first, ending at the root.
    pub fn ancestors(&self, id: &str) -> Vec<BlockId> {
        let mut chain = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if chain.len() >= MAX_TREE_DEPTH {
                warn!("ancestors() hit MAX_TREE_DEPTH ({MAX_TREE_DEPTH}), truncating");
                break;
            }
            chain.push(parent.clone());
            current = self.parent(parent);
        }
        chain
    }

    /// Reachable ids in pre-order, root first.
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    /// Renderable pre-order flattening, root excluded.
    ///
    /// Descendants of a toggle block are hidden unless its id is in `expanded`.
    pub fn flatten_visible(&self, store: &BlockStore, expanded: &HashSet<BlockId>) -> Vec<BlockId> {
        let mut visible = Vec::with_capacity(self.order.len());
        let mut hidden_below: Option<usize> = None;

        for id in self.order.iter().skip(1) {
            let Some(depth) = self.depth(id) else { continue };
            if let Some(limit) = hidden_below {
                if depth > limit {
                    continue;
                }
                hidden_below = None;
            }
            visible.push(id.clone());

            let is_toggle = store.node(id).is_some_and(|node| {
                matches!(&node.content, BlockContent::Text(t) if t.style.is_toggle())
            });
            if is_toggle && !expanded.contains(id) {
                hidden_below = Some(depth);
            }
        }
        visible
    }
}

/// Result of building a tree from a snapshot.
#[derive(Clone, Debug)]
pub struct TreeReport {
    pub index: TreeIndex,
    pub anomalies: Vec<TreeAnomaly>,
}

impl TreeReport {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

/// Populates a block store from a flat snapshot.
pub struct TreeBuilder;

impl TreeBuilder {
    /// Replace the store's contents with `blocks` rooted at `root_id`.
    ///
    /// Fails with [`StoreError::RootNotFound`] if no block carries the root
    /// id; the store is left untouched in that case. Every other problem is
    /// recovered and reported in the returned [`TreeReport`].
    pub fn build(store: &mut BlockStore, blocks: Vec<Block>, root_id: &BlockId) -> Result<TreeReport> {
        let root_count = blocks.iter().filter(|b| &b.id == root_id).count();
        if root_count == 0 {
            return Err(StoreError::RootNotFound(root_id.clone()));
        }

        let mut anomalies = Vec::new();
        if root_count > 1 {
            anomalies.push(TreeAnomaly::DuplicateRoot { root_id: root_id.clone(), count: root_count });
        }

        store.clear();
        let mut seen: HashSet<BlockId> = HashSet::with_capacity(blocks.len());
        for block in blocks {
            if !seen.insert(block.id.clone()) {
                if &block.id != root_id {
                    anomalies.push(TreeAnomaly::DuplicateBlock(block.id));
                }
                continue;
            }
            store.insert_block(block);
        }
        // Dangling references surface as MissingChild during the walk.
        let _ = store.validate_pending();

        let mut extra_roots: Vec<BlockId> = store
            .ids()
            .filter(|id| *id != root_id && store.parent(id).is_none())
            .cloned()
            .collect();
        if !extra_roots.is_empty() {
            extra_roots.sort();
            anomalies.push(TreeAnomaly::ExtraRoots(extra_roots));
        }

        let (index, walk_anomalies) = TreeIndex::compute(store, root_id);
        anomalies.extend(walk_anomalies);

        for anomaly in &anomalies {
            warn!("tree anomaly under {}: {}", root_id, anomaly);
        }
        debug!("built tree {} with {} reachable of {} blocks", root_id, index.len(), store.len());

        Ok(TreeReport { index, anomalies })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{TextContent, TextStyle};

    fn id(s: &str) -> BlockId {
        BlockId::new(s)
    }

    fn toggle(block_id: &str) -> Block {
        Block::new(block_id, BlockContent::Text(TextContent::new("t").with_style(TextStyle::Toggle)))
    }

    fn sample() -> Vec<Block> {
        vec![
            Block::smartblock("root").with_children(["a", "b"]),
            Block::text("a", "").with_children(["a1"]),
            Block::text("a1", ""),
            Block::text("b", ""),
        ]
    }

    #[test]
    fn test_build_clean_tree() {
        let mut store = BlockStore::new();
        let report = TreeBuilder::build(&mut store, sample(), &id("root")).unwrap();
        assert!(report.is_clean(), "{:?}", report.anomalies);
        let index = report.index;
        assert_eq!(index.order(), &[id("root"), id("a"), id("a1"), id("b")]);
        assert_eq!(index.depth("a1"), Some(2));
        assert_eq!(index.parent("a1"), Some(&id("a")));
        assert_eq!(index.ancestors("a1"), vec![id("a"), id("root")]);
        assert!(index.ancestors("root").is_empty());
    }

    #[test]
    fn test_missing_root_is_fatal_and_store_untouched() {
        let mut store = BlockStore::new();
        store.insert_block(Block::text("keep", ""));
        let err = TreeBuilder::build(&mut store, sample(), &id("nope")).unwrap_err();
        assert_eq!(err, StoreError::RootNotFound(id("nope")));
        assert!(store.contains("keep"));
    }

    #[test]
    fn test_duplicate_root_uses_first() {
        let mut blocks = sample();
        blocks.push(Block::smartblock("root"));
        let mut store = BlockStore::new();
        let report = TreeBuilder::build(&mut store, blocks, &id("root")).unwrap();
        assert!(report.anomalies.contains(&TreeAnomaly::DuplicateRoot { root_id: id("root"), count: 2 }));
        assert_eq!(store.children("root"), &[id("a"), id("b")]);
    }

    #[test]
    fn test_soft_orphans_stay_in_store() {
        let mut blocks = sample();
        blocks.push(Block::text("stray", "").with_children(["stray_child"]));
        blocks.push(Block::text("stray_child", ""));
        let mut store = BlockStore::new();
        let report = TreeBuilder::build(&mut store, blocks, &id("root")).unwrap();
        assert!(store.contains("stray"));
        assert!(!report.index.contains("stray"));
        assert!(report.anomalies.contains(&TreeAnomaly::ExtraRoots(vec![id("stray")])));
        assert!(report
            .anomalies
            .contains(&TreeAnomaly::SoftOrphans(vec![id("stray"), id("stray_child")])));
    }

    #[test]
    fn test_missing_child_reported_not_fatal() {
        let blocks = vec![Block::smartblock("root").with_children(["a", "ghost"]), Block::text("a", "")];
        let mut store = BlockStore::new();
        let report = TreeBuilder::build(&mut store, blocks, &id("root")).unwrap();
        assert_eq!(report.index.len(), 2);
        assert!(report
            .anomalies
            .contains(&TreeAnomaly::MissingChild { parent: id("root"), child: id("ghost") }));
    }

    #[test]
    fn test_cycle_terminates() {
        let mut store = BlockStore::new();
        store.insert_block(Block::smartblock("root").with_children(["a"]));
        store.insert_block(Block::text("a", "").with_children(["b"]));
        store.insert_block(Block::text("b", ""));
        // b → root closes a loop; root moves under b in the parent index.
        store.replace_children(&id("b"), vec![id("root")], false).unwrap();
        let (index, anomalies) = TreeIndex::compute(&store, &id("root"));
        assert_eq!(index.len(), 3);
        assert!(anomalies.contains(&TreeAnomaly::Cycle { parent: id("b"), child: id("root") }));
    }

    #[test]
    fn test_flatten_visible_hides_collapsed_toggle() {
        let blocks = vec![
            Block::smartblock("root").with_children(["t", "after"]),
            toggle("t").with_children(["inner"]),
            Block::text("inner", "").with_children(["deep"]),
            Block::text("deep", ""),
            Block::text("after", ""),
        ];
        let mut store = BlockStore::new();
        let report = TreeBuilder::build(&mut store, blocks, &id("root")).unwrap();

        let collapsed = report.index.flatten_visible(&store, &HashSet::new());
        assert_eq!(collapsed, vec![id("t"), id("after")]);

        let expanded = report.index.flatten_visible(&store, &HashSet::from([id("t")]));
        assert_eq!(expanded, vec![id("t"), id("inner"), id("deep"), id("after")]);
    }

    #[test]
    fn test_depth_circuit_breaker() {
        let mut store = BlockStore::new();
        let chain = MAX_TREE_DEPTH + 5;
        store.insert_block(Block::smartblock("n0").with_children(["n1"]));
        for i in 1..chain {
            store.insert_block(Block::text(format!("n{i}"), "").with_children([format!("n{}", i + 1)]));
        }
        store.insert_block(Block::text(format!("n{chain}"), ""));
        let (index, anomalies) = TreeIndex::compute(&store, &id("n0"));
        assert_eq!(index.len(), MAX_TREE_DEPTH + 1);
        assert!(anomalies.iter().any(|a| matches!(a, TreeAnomaly::DepthExceeded { .. })));
    }
}
