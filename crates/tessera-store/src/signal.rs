//! Update signals and per-batch coalescing.

use std::collections::BTreeSet;

use tessera_types::{BlockId, ObjectId, SyncStatus};

/// Coarse description of what changed in a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateSignal {
    /// Structure changed; consumers rebuild from scratch.
    General,
    /// Only the listed blocks' contents changed.
    Blocks(BTreeSet<BlockId>),
    /// Metadata of one object changed.
    Details(ObjectId),
    SyncStatus(SyncStatus),
}

impl UpdateSignal {
    pub fn block(id: BlockId) -> Self {
        UpdateSignal::Blocks(BTreeSet::from([id]))
    }

    pub fn blocks<I: IntoIterator<Item = BlockId>>(ids: I) -> Self {
        UpdateSignal::Blocks(ids.into_iter().collect())
    }
}

/// Folds the signals of one delivery batch into a bounded set.
///
/// `General` subsumes `Blocks` and `Details`. Otherwise all `Blocks`
/// collapse into one union, followed by one `Details` per distinct object
/// in first-seen order. The latest `SyncStatus` is emitted last.
#[derive(Debug, Default)]
pub struct SignalAccumulator {
    general: bool,
    blocks: BTreeSet<BlockId>,
    details: Vec<ObjectId>,
    sync_status: Option<SyncStatus>,
}

impl SignalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, signal: UpdateSignal) {
        match signal {
            UpdateSignal::General => self.general = true,
            UpdateSignal::Blocks(ids) => self.blocks.extend(ids),
            UpdateSignal::Details(id) => {
                if !self.details.contains(&id) {
                    self.details.push(id);
                }
            }
            UpdateSignal::SyncStatus(status) => self.sync_status = Some(status),
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.general && self.blocks.is_empty() && self.details.is_empty() && self.sync_status.is_none()
    }

    pub fn finish(self) -> Vec<UpdateSignal> {
        let mut out = Vec::new();
        if self.general {
            out.push(UpdateSignal::General);
        } else {
            if !self.blocks.is_empty() {
                out.push(UpdateSignal::Blocks(self.blocks));
            }
            out.extend(self.details.into_iter().map(UpdateSignal::Details));
        }
        if let Some(status) = self.sync_status {
            out.push(UpdateSignal::SyncStatus(status));
        }
        out
    }
}

impl Extend<UpdateSignal> for SignalAccumulator {
    fn extend<T: IntoIterator<Item = UpdateSignal>>(&mut self, iter: T) {
        for signal in iter {
            self.push(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_are_unioned() {
        let mut acc = SignalAccumulator::new();
        acc.push(UpdateSignal::block(BlockId::new("a")));
        acc.push(UpdateSignal::blocks([BlockId::new("b"), BlockId::new("a")]));
        assert_eq!(
            acc.finish(),
            vec![UpdateSignal::blocks([BlockId::new("a"), BlockId::new("b")])]
        );
    }

    #[test]
    fn test_general_subsumes_scoped() {
        let mut acc = SignalAccumulator::new();
        acc.push(UpdateSignal::block(BlockId::new("a")));
        acc.push(UpdateSignal::Details(ObjectId::new("x")));
        acc.push(UpdateSignal::General);
        acc.push(UpdateSignal::SyncStatus(SyncStatus::Syncing));
        acc.push(UpdateSignal::SyncStatus(SyncStatus::Synced));
        assert_eq!(
            acc.finish(),
            vec![UpdateSignal::General, UpdateSignal::SyncStatus(SyncStatus::Synced)]
        );
    }

    #[test]
    fn test_details_deduped_in_order() {
        let mut acc = SignalAccumulator::new();
        acc.extend([
            UpdateSignal::Details(ObjectId::new("y")),
            UpdateSignal::Details(ObjectId::new("x")),
            UpdateSignal::Details(ObjectId::new("y")),
        ]);
        assert_eq!(
            acc.finish(),
            vec![
                UpdateSignal::Details(ObjectId::new("y")),
                UpdateSignal::Details(ObjectId::new("x")),
            ]
        );
    }

    #[test]
    fn test_empty() {
        let acc = SignalAccumulator::new();
        assert!(acc.is_empty());
        assert!(acc.finish().is_empty());
    }
}
