//! Error types for store operations.

use thiserror::Error;

use tessera_types::BlockId;

/// Errors that can occur while mutating a block store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Block not found in the store.
    #[error("block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// A non-lazy children replace referenced ids the store does not hold.
    #[error("children of {parent:?} reference missing blocks: {missing:?}")]
    MissingChildren { parent: BlockId, missing: Vec<BlockId> },

    /// The declared root id is not among the shown blocks. Fatal for a show.
    #[error("root block not found: {0:?}")]
    RootNotFound(BlockId),

    /// A data-view event targeted a block without data-view content.
    #[error("block {0:?} is not a data view")]
    NotDataView(BlockId),

    /// A content event targeted a block of the wrong kind.
    #[error("block {id:?} has {actual} content, expected {expected}")]
    UnexpectedContent {
        id: BlockId,
        expected: &'static str,
        actual: String,
    },
}
