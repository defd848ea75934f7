//! The remote authority boundary.
//!
//! The middleware is reachable through request/response commands (this
//! trait) and an ordered event feed (see [`crate::feed`]). Transports
//! implement [`Middleware`]; everything above it is transport-agnostic.

use async_trait::async_trait;
use thiserror::Error;

use tessera_types::{
    Alignment, Block, BlockId, ContextId, EventMessage, Group, GroupQuery, ObjectDetails, ObjectId,
    RelationDetails, RelationLink, SubscriptionId, SubscriptionQuery, TextStyle,
};

// ============================================================================
// Error Type
// ============================================================================

/// Failure of a remote command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("command failed ({code}): {message}")]
    Command { code: i32, message: String },
    #[error("not found: {0}")]
    NotFound(String),
}

// ============================================================================
// Replies
// ============================================================================

/// Full state of one object, as returned by open/show.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectSnapshot {
    pub root_id: BlockId,
    pub blocks: Vec<Block>,
    pub details: Vec<ObjectDetails>,
    pub relation_links: Vec<RelationLink>,
    /// Actions the authority forbids on this object (e.g. "delete", "layoutChange").
    pub restrictions: Vec<String>,
}

/// Initial record set of a subscription, in sort order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionSnapshot {
    pub records: Vec<ObjectDetails>,
    pub total: usize,
}

impl SubscriptionSnapshot {
    pub fn ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.records.iter().map(|r| &r.id)
    }
}

/// Result of a block command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandReply {
    /// Events describing the change, to be applied locally in order.
    pub events: Vec<EventMessage>,
    /// Ids the command created (new blocks, split halves, duplicates).
    pub block_ids: Vec<BlockId>,
}

// ============================================================================
// Commands
// ============================================================================

/// Placement relative to a target block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlockPosition {
    Top,
    #[default]
    Bottom,
    Before,
    After,
    /// As the last child of the target.
    Inner,
}

/// A mutating request against one open document.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockCommand {
    Create { target_id: Option<BlockId>, position: BlockPosition, block: Block },
    Delete { block_ids: Vec<BlockId> },
    Replace { block_id: BlockId, block: Block },
    /// Split a text block at a character range; the tail gets `style`.
    Split { block_id: BlockId, range: (u32, u32), style: TextStyle },
    /// Append `second_id`'s text to `first_id` and delete it.
    Merge { first_id: BlockId, second_id: BlockId },
    Duplicate { target_id: BlockId, block_ids: Vec<BlockId>, position: BlockPosition },
    SetText { block_id: BlockId, text: String },
    SetStyle { block_ids: Vec<BlockId>, style: TextStyle },
    SetColor { block_ids: Vec<BlockId>, color: Option<String> },
    SetBackgroundColor { block_ids: Vec<BlockId>, color: Option<String> },
    SetAlignment { block_ids: Vec<BlockId>, align: Alignment },
    CreateRelation { relation: RelationDetails },
    DeleteRelation { key: String },
}

impl BlockCommand {
    /// Short name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BlockCommand::Create { .. } => "create",
            BlockCommand::Delete { .. } => "delete",
            BlockCommand::Replace { .. } => "replace",
            BlockCommand::Split { .. } => "split",
            BlockCommand::Merge { .. } => "merge",
            BlockCommand::Duplicate { .. } => "duplicate",
            BlockCommand::SetText { .. } => "setText",
            BlockCommand::SetStyle { .. } => "setStyle",
            BlockCommand::SetColor { .. } => "setColor",
            BlockCommand::SetBackgroundColor { .. } => "setBackgroundColor",
            BlockCommand::SetAlignment { .. } => "setAlignment",
            BlockCommand::CreateRelation { .. } => "createRelation",
            BlockCommand::DeleteRelation { .. } => "deleteRelation",
        }
    }
}

// ============================================================================
// Middleware trait
// ============================================================================

/// Request/response side of the remote authority.
///
/// Every method is a suspension point; callers never hold store locks
/// across them.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Open an object for live editing. The authority starts pushing events
    /// for `context_id` on the feed.
    async fn open_object(&self, context_id: &ContextId) -> Result<ObjectSnapshot, RemoteError>;

    /// Read an object once without registering for events.
    async fn show_object(&self, context_id: &ContextId) -> Result<ObjectSnapshot, RemoteError>;

    async fn close_object(&self, context_id: &ContextId) -> Result<(), RemoteError>;

    async fn perform(
        &self,
        context_id: &ContextId,
        command: BlockCommand,
    ) -> Result<CommandReply, RemoteError>;

    /// Register (or re-register) a live query.
    async fn subscribe(&self, query: &SubscriptionQuery) -> Result<SubscriptionSnapshot, RemoteError>;

    async fn unsubscribe(&self, ids: &[SubscriptionId]) -> Result<(), RemoteError>;

    /// Register a grouped query; returns the current group list.
    async fn subscribe_groups(&self, query: &GroupQuery) -> Result<Vec<Group>, RemoteError>;
}
