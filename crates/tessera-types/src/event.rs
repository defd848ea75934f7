//! The remote event feed: one variant per event kind.
//!
//! Events arrive in [`EventBatch`]es keyed by context id and must be applied
//! in arrival order. Subscription events carry their subscription id instead
//! of (or in addition to) a document context.
//!
//! Event kinds this client does not know decode into
//! [`EventMessage::Unknown`]; every consumer matches that variant explicitly
//! so adding a kind is a compile-time-visible decision.

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::block::{Alignment, Block, BookmarkContent, DividerStyle, FileContent, LinkContent, Mark, TextStyle};
use crate::dataview::{DataView, GroupOrder, ObjectOrder};
use crate::details::{DetailPatch, DetailValue, ObjectDetails};
use crate::ids::{BlockId, ContextId, ObjectId, SubscriptionId};
use crate::query::Group;
use crate::relation::RelationLink;

/// One delivery from the event feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub context_id: ContextId,
    pub messages: Vec<EventMessage>,
}

impl EventBatch {
    pub fn new(context_id: impl Into<ContextId>, messages: Vec<EventMessage>) -> Self {
        Self { context_id: context_id.into(), messages }
    }
}

/// Synchronization state of an object with the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum SyncStatus {
    #[default]
    Unknown,
    Offline,
    Syncing,
    Synced,
    Failed,
    IncompatibleVersion,
}

/// A single mutation event pushed by the remote authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EventMessage {
    // ── Block tree ──────────────────────────────────────────────────────
    /// Full snapshot of a document.
    #[serde(rename_all = "camelCase")]
    BlockShow {
        root_id: BlockId,
        blocks: Vec<Block>,
        #[serde(default)]
        details: Vec<ObjectDetails>,
        #[serde(default)]
        relation_links: Vec<RelationLink>,
    },
    BlockAdd { blocks: Vec<Block> },
    #[serde(rename_all = "camelCase")]
    BlockDelete { block_ids: Vec<BlockId> },
    #[serde(rename_all = "camelCase")]
    BlockSetChildrenIds { id: BlockId, children_ids: Vec<BlockId> },

    // ── Block content ───────────────────────────────────────────────────
    /// Partial text update; `None` fields are left unchanged.
    #[serde(rename_all = "camelCase")]
    BlockSetText {
        id: BlockId,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        style: Option<TextStyle>,
        #[serde(default)]
        marks: Option<Vec<Mark>>,
        #[serde(default)]
        checked: Option<bool>,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        icon_emoji: Option<String>,
    },
    BlockSetBackgroundColor { id: BlockId, color: Option<String> },
    BlockSetAlign { id: BlockId, align: Alignment },
    BlockSetFields { id: BlockId, fields: serde_json::Map<String, DetailValue> },
    BlockSetFile { id: BlockId, file: FileContent },
    BlockSetBookmark { id: BlockId, bookmark: BookmarkContent },
    BlockSetDiv { id: BlockId, style: DividerStyle },
    BlockSetLink { id: BlockId, link: LinkContent },
    BlockSetRelation { id: BlockId, key: String },

    // ── Data view ───────────────────────────────────────────────────────
    BlockDataviewViewSet { id: BlockId, view: DataView },
    #[serde(rename_all = "camelCase")]
    BlockDataviewViewOrder { id: BlockId, view_ids: Vec<String> },
    #[serde(rename_all = "camelCase")]
    BlockDataviewViewDelete { id: BlockId, view_id: String },
    BlockDataviewSourceSet { id: BlockId, source: Vec<String> },
    #[serde(rename_all = "camelCase")]
    BlockDataviewRelationSet { id: BlockId, relation_links: Vec<RelationLink> },
    #[serde(rename_all = "camelCase")]
    BlockDataviewRelationDelete { id: BlockId, relation_keys: Vec<String> },
    #[serde(rename_all = "camelCase")]
    BlockDataviewGroupOrderUpdate { id: BlockId, group_order: GroupOrder },
    #[serde(rename_all = "camelCase")]
    BlockDataviewObjectOrderUpdate { id: BlockId, object_order: ObjectOrder },

    // ── Object details & relations ──────────────────────────────────────
    /// Replace all details of an object.
    #[serde(rename_all = "camelCase")]
    ObjectDetailsSet {
        id: ObjectId,
        details: ObjectDetails,
        #[serde(default)]
        subscription_ids: Vec<SubscriptionId>,
    },
    #[serde(rename_all = "camelCase")]
    ObjectDetailsAmend {
        id: ObjectId,
        details: Vec<DetailPatch>,
        #[serde(default)]
        subscription_ids: Vec<SubscriptionId>,
    },
    #[serde(rename_all = "camelCase")]
    ObjectDetailsUnset {
        id: ObjectId,
        keys: Vec<String>,
        #[serde(default)]
        subscription_ids: Vec<SubscriptionId>,
    },
    #[serde(rename_all = "camelCase")]
    ObjectRelationsSet { id: ObjectId, relation_links: Vec<RelationLink> },
    #[serde(rename_all = "camelCase")]
    ObjectRelationsAmend { id: ObjectId, relation_links: Vec<RelationLink> },
    #[serde(rename_all = "camelCase")]
    ObjectRelationsRemove { id: ObjectId, relation_keys: Vec<String> },

    // ── Subscriptions ───────────────────────────────────────────────────
    /// Record `id` entered the window right after `after_id` (front if `None`).
    #[serde(rename_all = "camelCase")]
    SubscriptionAdd {
        subscription_id: SubscriptionId,
        id: ObjectId,
        #[serde(default)]
        after_id: Option<ObjectId>,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionRemove { subscription_id: SubscriptionId, id: ObjectId },
    #[serde(rename_all = "camelCase")]
    SubscriptionPosition {
        subscription_id: SubscriptionId,
        id: ObjectId,
        #[serde(default)]
        after_id: Option<ObjectId>,
    },
    #[serde(rename_all = "camelCase")]
    SubscriptionCounters {
        subscription_id: SubscriptionId,
        total: usize,
        #[serde(default)]
        next_count: usize,
        #[serde(default)]
        prev_count: usize,
    },
    /// A group appeared in (or, with `remove`, left) a grouped query.
    #[serde(rename_all = "camelCase")]
    SubscriptionGroups {
        subscription_id: SubscriptionId,
        group: Group,
        #[serde(default)]
        remove: bool,
    },

    // ── Misc ────────────────────────────────────────────────────────────
    #[serde(rename_all = "camelCase")]
    SyncStatusUpdate { id: ObjectId, status: SyncStatus },

    /// An event kind this client does not understand.
    #[serde(other)]
    Unknown,
}

impl EventMessage {
    /// Short kind name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EventMessage::BlockShow { .. } => "blockShow",
            EventMessage::BlockAdd { .. } => "blockAdd",
            EventMessage::BlockDelete { .. } => "blockDelete",
            EventMessage::BlockSetChildrenIds { .. } => "blockSetChildrenIds",
            EventMessage::BlockSetText { .. } => "blockSetText",
            EventMessage::BlockSetBackgroundColor { .. } => "blockSetBackgroundColor",
            EventMessage::BlockSetAlign { .. } => "blockSetAlign",
            EventMessage::BlockSetFields { .. } => "blockSetFields",
            EventMessage::BlockSetFile { .. } => "blockSetFile",
            EventMessage::BlockSetBookmark { .. } => "blockSetBookmark",
            EventMessage::BlockSetDiv { .. } => "blockSetDiv",
            EventMessage::BlockSetLink { .. } => "blockSetLink",
            EventMessage::BlockSetRelation { .. } => "blockSetRelation",
            EventMessage::BlockDataviewViewSet { .. } => "blockDataviewViewSet",
            EventMessage::BlockDataviewViewOrder { .. } => "blockDataviewViewOrder",
            EventMessage::BlockDataviewViewDelete { .. } => "blockDataviewViewDelete",
            EventMessage::BlockDataviewSourceSet { .. } => "blockDataviewSourceSet",
            EventMessage::BlockDataviewRelationSet { .. } => "blockDataviewRelationSet",
            EventMessage::BlockDataviewRelationDelete { .. } => "blockDataviewRelationDelete",
            EventMessage::BlockDataviewGroupOrderUpdate { .. } => "blockDataviewGroupOrderUpdate",
            EventMessage::BlockDataviewObjectOrderUpdate { .. } => "blockDataviewObjectOrderUpdate",
            EventMessage::ObjectDetailsSet { .. } => "objectDetailsSet",
            EventMessage::ObjectDetailsAmend { .. } => "objectDetailsAmend",
            EventMessage::ObjectDetailsUnset { .. } => "objectDetailsUnset",
            EventMessage::ObjectRelationsSet { .. } => "objectRelationsSet",
            EventMessage::ObjectRelationsAmend { .. } => "objectRelationsAmend",
            EventMessage::ObjectRelationsRemove { .. } => "objectRelationsRemove",
            EventMessage::SubscriptionAdd { .. } => "subscriptionAdd",
            EventMessage::SubscriptionRemove { .. } => "subscriptionRemove",
            EventMessage::SubscriptionPosition { .. } => "subscriptionPosition",
            EventMessage::SubscriptionCounters { .. } => "subscriptionCounters",
            EventMessage::SubscriptionGroups { .. } => "subscriptionGroups",
            EventMessage::SyncStatusUpdate { .. } => "syncStatusUpdate",
            EventMessage::Unknown => "unknown",
        }
    }

    /// Subscriptions this event concerns (empty for document-only events).
    pub fn subscription_ids(&self) -> &[SubscriptionId] {
        match self {
            EventMessage::ObjectDetailsSet { subscription_ids, .. }
            | EventMessage::ObjectDetailsAmend { subscription_ids, .. }
            | EventMessage::ObjectDetailsUnset { subscription_ids, .. } => subscription_ids,
            EventMessage::SubscriptionAdd { subscription_id, .. }
            | EventMessage::SubscriptionRemove { subscription_id, .. }
            | EventMessage::SubscriptionPosition { subscription_id, .. }
            | EventMessage::SubscriptionCounters { subscription_id, .. }
            | EventMessage::SubscriptionGroups { subscription_id, .. } => {
                std::slice::from_ref(subscription_id)
            }
            _ => &[],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_event_kind_decodes() {
        let msg: EventMessage = serde_json::from_value(json!({"event": "accountShow"})).unwrap();
        assert_eq!(msg, EventMessage::Unknown);
        assert_eq!(msg.kind(), "unknown");
    }

    #[test]
    fn test_set_text_partial_decode() {
        let msg: EventMessage =
            serde_json::from_value(json!({"event": "blockSetText", "id": "a", "text": "hello"}))
                .unwrap();
        match msg {
            EventMessage::BlockSetText { id, text, style, .. } => {
                assert_eq!(id, BlockId::new("a"));
                assert_eq!(text.as_deref(), Some("hello"));
                assert!(style.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_subscription_ids() {
        let msg = EventMessage::SubscriptionRemove {
            subscription_id: SubscriptionId::new("s"),
            id: ObjectId::new("x"),
        };
        assert_eq!(msg.subscription_ids(), &[SubscriptionId::new("s")]);
        let msg = EventMessage::BlockDelete { block_ids: vec![] };
        assert!(msg.subscription_ids().is_empty());
    }
}
