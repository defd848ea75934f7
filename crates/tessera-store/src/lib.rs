//! Synchronous core of a Tessera document replica.
//!
//! Everything here runs without suspension points: the async client layer
//! owns a [`DocumentState`] behind a lock and feeds it event batches in
//! arrival order.
//!
//! # Layers
//!
//! - [`BlockStore`]: arena of block nodes with adjacency kept apart from content
//! - [`TreeBuilder`] / [`TreeIndex`]: snapshot loading, depth and ancestry
//! - [`EventApplier`]: one event → one [`Mutation`] plus an [`UpdateSignal`]
//! - [`DocumentState`]: batch application, coalescing, post-batch validation
//! - [`DetailsCache`]: process-wide object details, shared by `Arc`
//! - [`RelationsStore`]: per-document relation links

mod applier;
mod block_store;
mod details;
mod document;
mod error;
mod relations;
mod signal;
mod tree;

pub use applier::{EventApplier, Mutation, SkipReason, Translation};
pub use block_store::{BlockNode, BlockStore};
pub use details::{DetailsCache, DetailsChange};
pub use document::{BatchOutcome, DocumentState, SkippedEvent};
pub use error::StoreError;
pub use relations::RelationsStore;
pub use signal::{SignalAccumulator, UpdateSignal};
pub use tree::{TreeAnomaly, TreeBuilder, TreeEntry, TreeIndex, TreeReport};

/// Circuit breaker for tree traversal depth.
pub const MAX_TREE_DEPTH: usize = 512;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
