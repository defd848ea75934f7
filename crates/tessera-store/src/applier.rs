//! Event applier: one remote event in, one store mutation and signal out.
//!
//! [`EventApplier::translate`] is a pure read over the current document
//! state. It never mutates, never reorders, and never buffers: every call
//! stands alone, and the caller commits the returned [`Mutation`] before
//! translating the next event.
//!
//! Signal rules:
//!
//! | Event                         | Signal                                   |
//! |-------------------------------|------------------------------------------|
//! | show, set-children            | `General`                                |
//! | add, delete                   | none (a set-children always follows)     |
//! | text                          | `Blocks([id])`, `General` on toggle flip |
//! | color/align/fields/file/...   | `Blocks([id])`                           |
//! | data-view configuration       | `General`                                |
//! | details set/amend/unset       | `Details(id)`, `General` on layout/type  |
//! | relations set/amend/remove    | `General`                                |
//! | sync status                   | `SyncStatus(status)`                     |

use tessera_types::{
    Block, BlockContent, BlockId, DetailPatch, EventMessage, ObjectDetails, ObjectId,
    RelationLink, SyncStatus, TextContent, keys,
};

use crate::block_store::BlockNode;
use crate::document::DocumentState;
use crate::signal::UpdateSignal;
use crate::StoreError;

/// Why an event was handled without changing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Event kind this client does not interpret.
    Unsupported(&'static str),
    /// The target block is not in the store.
    BlockNotFound(BlockId),
    /// A content event targeted a block of another kind.
    UnexpectedContent {
        id: BlockId,
        expected: &'static str,
        actual: String,
    },
    /// A data-view event targeted a block without data-view content.
    NotDataView(BlockId),
    /// Subscription events belong to the subscription engine.
    SubscriptionEvent,
    /// The event would violate a tree invariant and was rejected whole.
    Structural(StoreError),
}

impl SkipReason {
    /// Skips that indicate an authority/client mismatch rather than routing.
    pub fn is_anomaly(&self) -> bool {
        !matches!(self, SkipReason::SubscriptionEvent)
    }
}

/// Minimal store change derived from one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Rebuild the tree wholesale from a snapshot.
    ReplaceTree {
        root_id: BlockId,
        blocks: Vec<Block>,
        details: Vec<ObjectDetails>,
        relation_links: Vec<RelationLink>,
    },
    /// Insert or replace blocks, children included.
    Upsert(Vec<Block>),
    Remove(Vec<BlockId>),
    SetChildren { id: BlockId, children: Vec<BlockId> },
    /// Replace one node's content-side fields; children untouched.
    ReplaceNode(BlockNode),
    SetDetails(ObjectDetails),
    AmendDetails { id: ObjectId, patches: Vec<DetailPatch> },
    UnsetDetails { id: ObjectId, keys: Vec<String> },
    SetRelations { id: ObjectId, links: Vec<RelationLink> },
    AmendRelations { id: ObjectId, links: Vec<RelationLink> },
    RemoveRelations { id: ObjectId, keys: Vec<String> },
    SetSyncStatus(SyncStatus),
}

impl Mutation {
    /// Whether committing this changes the block tree's shape.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Mutation::ReplaceTree { .. }
                | Mutation::Upsert(_)
                | Mutation::Remove(_)
                | Mutation::SetChildren { .. }
        )
    }
}

/// Result of translating one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Apply {
        mutation: Mutation,
        signal: Option<UpdateSignal>,
    },
    Skip(SkipReason),
}

impl Translation {
    fn apply(mutation: Mutation, signal: UpdateSignal) -> Self {
        Translation::Apply { mutation, signal: Some(signal) }
    }

    fn silent(mutation: Mutation) -> Self {
        Translation::Apply { mutation, signal: None }
    }
}

type NodeEdit = std::result::Result<UpdateSignal, SkipReason>;

/// Stateless event translator.
pub struct EventApplier;

impl EventApplier {
    pub fn translate(event: &EventMessage, doc: &DocumentState) -> Translation {
        match event {
            // ── Block tree ──────────────────────────────────────────────
            EventMessage::BlockShow { root_id, blocks, details, relation_links } => {
                if !blocks.iter().any(|b| &b.id == root_id) {
                    return Translation::Skip(SkipReason::Structural(StoreError::RootNotFound(
                        root_id.clone(),
                    )));
                }
                Translation::apply(
                    Mutation::ReplaceTree {
                        root_id: root_id.clone(),
                        blocks: blocks.clone(),
                        details: details.clone(),
                        relation_links: relation_links.clone(),
                    },
                    UpdateSignal::General,
                )
            }
            EventMessage::BlockAdd { blocks } => Translation::silent(Mutation::Upsert(blocks.clone())),
            EventMessage::BlockDelete { block_ids } => {
                Translation::silent(Mutation::Remove(block_ids.clone()))
            }
            EventMessage::BlockSetChildrenIds { id, children_ids } => {
                if !doc.blocks().contains(id) {
                    return Translation::Skip(SkipReason::BlockNotFound(id.clone()));
                }
                Translation::apply(
                    Mutation::SetChildren { id: id.clone(), children: children_ids.clone() },
                    UpdateSignal::General,
                )
            }

            // ── Block content ───────────────────────────────────────────
            EventMessage::BlockSetText { id, text, style, marks, checked, color, icon_emoji } => {
                edit_node(doc, id, |node| {
                    let BlockContent::Text(current) = &node.content else {
                        return Err(unexpected(id, "text", &node.content));
                    };
                    let was_toggle = current.style.is_toggle();
                    let updated = TextContent {
                        text: text.clone().unwrap_or_else(|| current.text.clone()),
                        style: style.unwrap_or(current.style),
                        marks: marks.clone().unwrap_or_else(|| current.marks.clone()),
                        checked: checked.unwrap_or(current.checked),
                        color: color.clone().or_else(|| current.color.clone()),
                        icon_emoji: icon_emoji.clone().or_else(|| current.icon_emoji.clone()),
                    };
                    let toggled = was_toggle != updated.style.is_toggle();
                    node.content = BlockContent::Text(updated);
                    Ok(if toggled { UpdateSignal::General } else { UpdateSignal::block(id.clone()) })
                })
            }
            EventMessage::BlockSetBackgroundColor { id, color } => edit_node(doc, id, |node| {
                node.background_color = color.clone();
                Ok(UpdateSignal::block(id.clone()))
            }),
            EventMessage::BlockSetAlign { id, align } => edit_node(doc, id, |node| {
                node.alignment = *align;
                Ok(UpdateSignal::block(id.clone()))
            }),
            EventMessage::BlockSetFields { id, fields } => edit_node(doc, id, |node| {
                node.fields = fields.clone();
                Ok(UpdateSignal::block(id.clone()))
            }),
            EventMessage::BlockSetFile { id, file } => edit_node(doc, id, |node| match &mut node.content {
                BlockContent::File(content) => {
                    *content = file.clone();
                    Ok(UpdateSignal::block(id.clone()))
                }
                other => Err(unexpected(id, "file", other)),
            }),
            EventMessage::BlockSetBookmark { id, bookmark } => {
                edit_node(doc, id, |node| match &mut node.content {
                    BlockContent::Bookmark(content) => {
                        *content = bookmark.clone();
                        Ok(UpdateSignal::block(id.clone()))
                    }
                    other => Err(unexpected(id, "bookmark", other)),
                })
            }
            EventMessage::BlockSetDiv { id, style } => edit_node(doc, id, |node| match &mut node.content {
                BlockContent::Divider(content) => {
                    content.style = *style;
                    Ok(UpdateSignal::block(id.clone()))
                }
                other => Err(unexpected(id, "divider", other)),
            }),
            EventMessage::BlockSetLink { id, link } => edit_node(doc, id, |node| match &mut node.content {
                BlockContent::Link(content) => {
                    *content = link.clone();
                    Ok(UpdateSignal::block(id.clone()))
                }
                other => Err(unexpected(id, "link", other)),
            }),
            EventMessage::BlockSetRelation { id, key } => {
                edit_node(doc, id, |node| match &mut node.content {
                    BlockContent::Relation { key: current } => {
                        *current = key.clone();
                        Ok(UpdateSignal::block(id.clone()))
                    }
                    other => Err(unexpected(id, "relation", other)),
                })
            }

            // ── Data view ───────────────────────────────────────────────
            EventMessage::BlockDataviewViewSet { id, view } => {
                edit_dataview(doc, id, |dv| dv.set_view(view.clone()))
            }
            EventMessage::BlockDataviewViewOrder { id, view_ids } => {
                edit_dataview(doc, id, |dv| dv.order_views(view_ids))
            }
            EventMessage::BlockDataviewViewDelete { id, view_id } => edit_dataview(doc, id, |dv| {
                dv.delete_view(view_id);
            }),
            EventMessage::BlockDataviewSourceSet { id, source } => {
                edit_dataview(doc, id, |dv| dv.source = source.clone())
            }
            EventMessage::BlockDataviewRelationSet { id, relation_links } => {
                edit_dataview(doc, id, |dv| dv.set_relations(relation_links))
            }
            EventMessage::BlockDataviewRelationDelete { id, relation_keys } => {
                edit_dataview(doc, id, |dv| dv.delete_relations(relation_keys))
            }
            EventMessage::BlockDataviewGroupOrderUpdate { id, group_order } => {
                edit_dataview(doc, id, |dv| dv.update_group_order(group_order.clone()))
            }
            EventMessage::BlockDataviewObjectOrderUpdate { id, object_order } => {
                edit_dataview(doc, id, |dv| dv.update_object_order(object_order.clone()))
            }

            // ── Object details & relations ──────────────────────────────
            EventMessage::ObjectDetailsSet { id, details, .. } => {
                // The cache is shared, so another document may already have
                // stored this value; the payload alone decides.
                let escalates = keys::ESCALATING.iter().any(|key| details.get(key).is_some());
                let mut details = details.clone();
                details.id = id.clone();
                Translation::apply(Mutation::SetDetails(details), details_signal(id, escalates))
            }
            EventMessage::ObjectDetailsAmend { id, details, .. } => {
                let escalates = details.iter().any(|p| keys::is_escalating(&p.key));
                Translation::apply(
                    Mutation::AmendDetails { id: id.clone(), patches: details.clone() },
                    details_signal(id, escalates),
                )
            }
            EventMessage::ObjectDetailsUnset { id, keys: removed, .. } => {
                let escalates = removed.iter().any(|k| keys::is_escalating(k));
                Translation::apply(
                    Mutation::UnsetDetails { id: id.clone(), keys: removed.clone() },
                    details_signal(id, escalates),
                )
            }
            EventMessage::ObjectRelationsSet { id, relation_links } => Translation::apply(
                Mutation::SetRelations { id: id.clone(), links: relation_links.clone() },
                UpdateSignal::General,
            ),
            EventMessage::ObjectRelationsAmend { id, relation_links } => Translation::apply(
                Mutation::AmendRelations { id: id.clone(), links: relation_links.clone() },
                UpdateSignal::General,
            ),
            EventMessage::ObjectRelationsRemove { id, relation_keys } => Translation::apply(
                Mutation::RemoveRelations { id: id.clone(), keys: relation_keys.clone() },
                UpdateSignal::General,
            ),

            // ── Subscriptions ───────────────────────────────────────────
            EventMessage::SubscriptionAdd { .. }
            | EventMessage::SubscriptionRemove { .. }
            | EventMessage::SubscriptionPosition { .. }
            | EventMessage::SubscriptionCounters { .. }
            | EventMessage::SubscriptionGroups { .. } => Translation::Skip(SkipReason::SubscriptionEvent),

            // ── Misc ────────────────────────────────────────────────────
            EventMessage::SyncStatusUpdate { status, .. } => {
                Translation::apply(Mutation::SetSyncStatus(*status), UpdateSignal::SyncStatus(*status))
            }
            EventMessage::Unknown => Translation::Skip(SkipReason::Unsupported(event.kind())),
        }
    }
}

fn details_signal(id: &ObjectId, escalates: bool) -> UpdateSignal {
    if escalates { UpdateSignal::General } else { UpdateSignal::Details(id.clone()) }
}

fn unexpected(id: &BlockId, expected: &'static str, actual: &BlockContent) -> SkipReason {
    SkipReason::UnexpectedContent { id: id.clone(), expected, actual: actual.kind().to_string() }
}

/// Clone the target node, let `edit` change it, and emit a node replacement.
fn edit_node(doc: &DocumentState, id: &BlockId, edit: impl FnOnce(&mut BlockNode) -> NodeEdit) -> Translation {
    let Some(node) = doc.blocks().node(id) else {
        return Translation::Skip(SkipReason::BlockNotFound(id.clone()));
    };
    let mut node = node.clone();
    match edit(&mut node) {
        Ok(signal) => Translation::apply(Mutation::ReplaceNode(node), signal),
        Err(reason) => Translation::Skip(reason),
    }
}

fn edit_dataview(
    doc: &DocumentState,
    id: &BlockId,
    edit: impl FnOnce(&mut tessera_types::DataViewContent),
) -> Translation {
    edit_node(doc, id, |node| match &mut node.content {
        BlockContent::DataView(dv) => {
            edit(dv);
            Ok(UpdateSignal::General)
        }
        _ => Err(SkipReason::NotDataView(id.clone())),
    })
}

// ============================================================================
// Tests
// ============================================================================
