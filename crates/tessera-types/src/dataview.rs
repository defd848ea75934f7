//! Data-view (query-definition) configuration attached to a data-view block.
//!
//! A data view stores its source, views (each with sorts, filters, and an
//! optional grouping relation), the relations it shows, and per-view
//! overrides for group ordering and manual object ordering. None of this
//! touches the block tree; events that change it are applied to the content
//! of the owning block in place.

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::details::DetailValue;
use crate::ids::ObjectId;
use crate::relation::RelationLink;

/// Payload of a data-view block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DataViewContent {
    /// Type or relation ids the set is built from (empty for collections).
    pub source: Vec<String>,
    pub views: Vec<DataView>,
    pub relation_links: Vec<RelationLink>,
    pub group_orders: Vec<GroupOrder>,
    pub object_orders: Vec<ObjectOrder>,
    pub target_object_id: Option<ObjectId>,
    pub is_collection: bool,
}

impl DataViewContent {
    pub fn view(&self, view_id: &str) -> Option<&DataView> {
        self.views.iter().find(|v| v.id == view_id)
    }

    /// Insert or replace a view by id; new views are appended.
    pub fn set_view(&mut self, view: DataView) {
        match self.views.iter_mut().find(|v| v.id == view.id) {
            Some(existing) => *existing = view,
            None => self.views.push(view),
        }
    }

    /// Returns whether a view was removed.
    pub fn delete_view(&mut self, view_id: &str) -> bool {
        let before = self.views.len();
        self.views.retain(|v| v.id != view_id);
        self.group_orders.retain(|g| g.view_id != view_id);
        self.object_orders.retain(|o| o.view_id != view_id);
        before != self.views.len()
    }

    /// Reorder views to match `view_ids`. Views not listed keep their
    /// relative order after the listed ones.
    pub fn order_views(&mut self, view_ids: &[String]) {
        let rank = |id: &str| view_ids.iter().position(|v| v == id).unwrap_or(usize::MAX);
        self.views.sort_by_key(|v| rank(&v.id));
    }

    /// Insert or replace relation links by key.
    pub fn set_relations(&mut self, links: &[RelationLink]) {
        for link in links {
            match self.relation_links.iter_mut().find(|l| l.key == link.key) {
                Some(existing) => *existing = link.clone(),
                None => self.relation_links.push(link.clone()),
            }
        }
    }

    pub fn delete_relations(&mut self, keys: &[String]) {
        self.relation_links.retain(|l| !keys.contains(&l.key));
    }

    /// Replace the group order record for its view.
    pub fn update_group_order(&mut self, order: GroupOrder) {
        match self.group_orders.iter_mut().find(|g| g.view_id == order.view_id) {
            Some(existing) => *existing = order,
            None => self.group_orders.push(order),
        }
    }

    /// Replace the manual object order for one (view, group) pair.
    pub fn update_object_order(&mut self, order: ObjectOrder) {
        match self
            .object_orders
            .iter_mut()
            .find(|o| o.view_id == order.view_id && o.group_id == order.group_id)
        {
            Some(existing) => *existing = order,
            None => self.object_orders.push(order),
        }
    }

    pub fn group_order(&self, view_id: &str) -> Option<&GroupOrder> {
        self.group_orders.iter().find(|g| g.view_id == view_id)
    }

    /// Manual order of one group as a query sort, if the user arranged it.
    pub fn custom_sort(&self, view_id: &str, group_id: &str) -> Option<Sort> {
        self.object_orders
            .iter()
            .find(|o| o.view_id == view_id && o.group_id == group_id)
            .and_then(ObjectOrder::sort)
    }
}

/// Presentation kind of a view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ViewKind {
    #[default]
    Table,
    List,
    Gallery,
    Kanban,
    Calendar,
    Graph,
}

/// One view of a data view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DataView {
    pub id: String,
    pub name: String,
    pub kind: ViewKind,
    pub sorts: Vec<Sort>,
    pub filters: Vec<Filter>,
    /// Relation keys shown, in column order.
    pub relations: Vec<String>,
    /// Relation the view buckets records by (kanban columns).
    pub group_relation_key: Option<String>,
    pub group_background_colors: bool,
    pub page_limit: u32,
}

impl DataView {
    pub fn is_grouped(&self) -> bool {
        self.kind == ViewKind::Kanban && self.group_relation_key.is_some()
    }
}

// ============================================================================
// Sorts & filters
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sort {
    pub relation_key: String,
    pub kind: SortKind,
    /// Explicit id order for [`SortKind::Custom`].
    #[serde(default)]
    pub custom_order: Vec<ObjectId>,
}

impl Sort {
    pub fn asc(relation_key: impl Into<String>) -> Self {
        Self { relation_key: relation_key.into(), kind: SortKind::Asc, custom_order: Vec::new() }
    }

    pub fn desc(relation_key: impl Into<String>) -> Self {
        Self { relation_key: relation_key.into(), kind: SortKind::Desc, custom_order: Vec::new() }
    }

    /// Manual ordering by explicit id list (manually reordered collections).
    pub fn custom(order: Vec<ObjectId>) -> Self {
        Self { relation_key: crate::details::keys::ID.into(), kind: SortKind::Custom, custom_order: order }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortKind {
    #[default]
    Asc,
    Desc,
    Custom,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub relation_key: String,
    pub condition: FilterCondition,
    #[serde(default)]
    pub value: DetailValue,
    #[serde(default)]
    pub operator: FilterOperator,
}

impl Filter {
    pub fn new(
        relation_key: impl Into<String>,
        condition: FilterCondition,
        value: impl Into<DetailValue>,
    ) -> Self {
        Self {
            relation_key: relation_key.into(),
            condition,
            value: value.into(),
            operator: FilterOperator::And,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterCondition {
    Equal,
    NotEqual,
    Greater,
    Less,
    Like,
    In,
    AllIn,
    ExactIn,
    NotIn,
    Empty,
    NotEmpty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    #[default]
    And,
    Or,
}

// ============================================================================
// Group / object order overrides
// ============================================================================

/// Per-view override of group ordering, visibility, and color.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupOrder {
    pub view_id: String,
    pub view_groups: Vec<ViewGroup>,
}

/// Presentation override for one group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewGroup {
    pub group_id: String,
    pub index: u32,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub background_color: Option<String>,
}

impl ViewGroup {
    pub fn new(group_id: impl Into<String>, index: u32) -> Self {
        Self { group_id: group_id.into(), index, hidden: false, background_color: None }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Manual object order within one group of one view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectOrder {
    pub view_id: String,
    pub group_id: String,
    pub object_ids: Vec<ObjectId>,
}

impl ObjectOrder {
    /// The order as a query sort; `None` when nothing was arranged.
    pub fn sort(&self) -> Option<Sort> {
        (!self.object_ids.is_empty()).then(|| Sort::custom(self.object_ids.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
