//! Synchronous state of one open document.
//!
//! Owns the block store, the tree index, and the document's relation links,
//! and shares the process-wide details cache. Events are applied one at a
//! time, in the order given; a batch coalesces its signals and revalidates
//! structure once at the end.

use std::sync::Arc;

use tessera_types::{
    Block, BlockId, ContextId, EventMessage, ObjectDetails, RelationLink, SyncStatus,
};
use tracing::{debug, trace, warn};

use crate::applier::{EventApplier, Mutation, SkipReason, Translation};
use crate::signal::{SignalAccumulator, UpdateSignal};
use crate::tree::{TreeAnomaly, TreeBuilder, TreeIndex, TreeReport};
use crate::{BlockStore, DetailsCache, RelationsStore, Result, StoreError};

/// An event that changed nothing, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEvent {
    /// Position within the batch.
    pub position: usize,
    pub kind: &'static str,
    pub reason: SkipReason,
}

/// Outcome of applying one batch.
#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    /// Coalesced signals, in publication order.
    pub signals: Vec<UpdateSignal>,
    pub skipped: Vec<SkippedEvent>,
    /// Structural problems found after the batch.
    pub anomalies: Vec<TreeAnomaly>,
    /// Children lists still naming absent blocks after the batch.
    pub dangling: Vec<StoreError>,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.skipped.iter().all(|s| !s.reason.is_anomaly())
            && self.anomalies.is_empty()
            && self.dangling.is_empty()
    }
}

/// One document's block tree plus its view of shared metadata.
pub struct DocumentState {
    context_id: ContextId,
    root_id: Option<BlockId>,
    blocks: BlockStore,
    index: TreeIndex,
    relations: RelationsStore,
    details: Arc<DetailsCache>,
    sync_status: SyncStatus,
}

impl DocumentState {
    pub fn new(context_id: ContextId, details: Arc<DetailsCache>) -> Self {
        Self {
            context_id,
            root_id: None,
            blocks: BlockStore::new(),
            index: TreeIndex::default(),
            relations: RelationsStore::new(),
            details,
            sync_status: SyncStatus::default(),
        }
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    pub fn root_id(&self) -> Option<&BlockId> {
        self.root_id.as_ref()
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn index(&self) -> &TreeIndex {
        &self.index
    }

    pub fn relations(&self) -> &RelationsStore {
        &self.relations
    }

    pub fn details(&self) -> &Arc<DetailsCache> {
        &self.details
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    /// Full block by id.
    pub fn get(&self, id: &str) -> Option<Block> {
        self.blocks.get(id)
    }

    /// Whether a snapshot has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.root_id.is_some()
    }

    /// Install a full snapshot, replacing the tree wholesale.
    ///
    /// Fails only if `root_id` is absent from `blocks`; the previous state
    /// is kept in that case.
    pub fn load(
        &mut self,
        root_id: BlockId,
        blocks: Vec<Block>,
        details: Vec<ObjectDetails>,
        relation_links: Vec<RelationLink>,
    ) -> Result<TreeReport> {
        let report = TreeBuilder::build(&mut self.blocks, blocks, &root_id)?;
        for d in details {
            self.details.set(d);
        }
        self.relations.clear();
        self.relations.set(self.context_id.object_id(), relation_links);
        self.index = report.index.clone();
        self.root_id = Some(root_id);
        Ok(report)
    }

    /// Release the block tree and relations. Shared details stay cached.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.relations.clear();
        self.index = TreeIndex::default();
        self.root_id = None;
    }

    /// Apply a delivery batch in order and coalesce its signals.
    ///
    /// A skipped event never stops the rest of the batch.
    pub fn apply_batch(&mut self, events: &[EventMessage]) -> BatchOutcome {
        let mut signals = SignalAccumulator::new();
        let mut outcome = BatchOutcome::default();
        let mut structural = false;
        let mut tree_rebuilt = false;

        for (position, event) in events.iter().enumerate() {
            let translation = EventApplier::translate(event, self);
            let result = match translation {
                Translation::Apply { mutation, signal } => {
                    let is_structural = mutation.is_structural();
                    let is_rebuild = matches!(mutation, Mutation::ReplaceTree { .. });
                    self.commit(mutation).map(|anomalies| {
                        outcome.anomalies.extend(anomalies);
                        structural |= is_structural && !is_rebuild;
                        tree_rebuilt |= is_rebuild;
                        signal
                    })
                }
                Translation::Skip(reason) => Err(reason),
            };
            match result {
                Ok(Some(signal)) => signals.push(signal),
                Ok(None) => {}
                Err(reason) => {
                    if reason.is_anomaly() {
                        warn!(
                            "{}: skipped {} at {}: {:?}",
                            self.context_id,
                            event.kind(),
                            position,
                            reason
                        );
                    } else {
                        trace!("{}: {} routed elsewhere", self.context_id, event.kind());
                    }
                    outcome.skipped.push(SkippedEvent { position, kind: event.kind(), reason });
                }
            }
        }

        if structural {
            outcome.dangling = self.blocks.validate_pending();
            for problem in &outcome.dangling {
                warn!("{}: {}", self.context_id, problem);
            }
            if let Some(root_id) = self.root_id.clone() {
                let (index, anomalies) = TreeIndex::compute(&self.blocks, &root_id);
                for anomaly in &anomalies {
                    debug!("{}: tree anomaly after batch: {}", self.context_id, anomaly);
                }
                self.index = index;
                outcome.anomalies.extend(anomalies);
            }
        } else if tree_rebuilt {
            // Builder already walked the tree; drop lazily accepted refs it reported.
            let _ = self.blocks.validate_pending();
        }

        outcome.signals = signals.finish();
        outcome
    }

    /// Commit one mutation. Returns the anomalies a snapshot rebuild reported.
    fn commit(&mut self, mutation: Mutation) -> std::result::Result<Vec<TreeAnomaly>, SkipReason> {
        match mutation {
            Mutation::ReplaceTree { root_id, blocks, details, relation_links } => {
                let report = self
                    .load(root_id, blocks, details, relation_links)
                    .map_err(SkipReason::Structural)?;
                return Ok(report.anomalies);
            }
            Mutation::Upsert(blocks) => {
                for block in blocks {
                    self.blocks.insert_block(block);
                }
            }
            Mutation::Remove(ids) => {
                for id in ids {
                    if self.blocks.remove(&id).is_none() {
                        debug!("{}: delete of absent block {}", self.context_id, id);
                    }
                }
            }
            Mutation::SetChildren { id, children } => {
                self.blocks
                    .replace_children(&id, children, true)
                    .map_err(SkipReason::Structural)?;
            }
            Mutation::ReplaceNode(node) => {
                self.blocks.upsert(node, None);
            }
            Mutation::SetDetails(details) => {
                self.details.set(details);
            }
            Mutation::AmendDetails { id, patches } => {
                self.details.amend(&id, &patches);
            }
            Mutation::UnsetDetails { id, keys } => {
                self.details.unset(&id, &keys);
            }
            Mutation::SetRelations { id, links } => self.relations.set(id, links),
            Mutation::AmendRelations { id, links } => self.relations.amend(id, &links),
            Mutation::RemoveRelations { id, keys } => {
                self.relations.remove(&id, &keys);
            }
            Mutation::SetSyncStatus(status) => self.sync_status = status,
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// Tests
// ============================================================================
