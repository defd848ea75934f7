//! Declarative subscription queries and record groups.

use serde::{Deserialize, Serialize};

use crate::dataview::{Filter, FilterCondition, Sort};
use crate::details::{DetailValue, ObjectDetails};
use crate::ids::{ObjectId, SubscriptionId};

/// A live query registered with the remote authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQuery {
    pub subscription_id: SubscriptionId,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    /// Detail keys to deliver for each record.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Set sources (type/relation ids); empty means "all objects".
    #[serde(default)]
    pub source: Vec<String>,
    /// Restrict to members of a collection object.
    #[serde(default)]
    pub collection_id: Option<ObjectId>,
    pub page_size: u32,
    /// 1-based page count currently requested. The window is always
    /// `page_size * page` records from the start of the sorted order.
    pub page: u32,
}

impl SubscriptionQuery {
    pub fn new(subscription_id: SubscriptionId, page_size: u32) -> Self {
        Self {
            subscription_id,
            filters: Vec::new(),
            sorts: Vec::new(),
            keys: Vec::new(),
            source: Vec::new(),
            collection_id: None,
            page_size,
            page: 1,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_keys<I, T>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Number of records the remote side is asked to deliver.
    pub fn limit(&self) -> usize {
        self.page_size as usize * self.page.max(1) as usize
    }
}

/// Query for the group list of a grouped view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupQuery {
    pub subscription_id: SubscriptionId,
    pub relation_key: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub collection_id: Option<ObjectId>,
}

// ============================================================================
// Groups
// ============================================================================

/// Representative value of a group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum GroupValue {
    /// Records carrying exactly this tag set.
    Tag(Vec<String>),
    Status(String),
    Checkbox(bool),
    /// Records with no value for the grouping relation.
    Empty,
}

impl GroupValue {
    /// Bucket of a record: a pure function of its details and the grouping key.
    pub fn of(details: &ObjectDetails, relation_key: &str) -> Self {
        match details.get(relation_key) {
            Some(DetailValue::Bool(b)) => GroupValue::Checkbox(*b),
            Some(DetailValue::String(s)) if !s.is_empty() => GroupValue::Status(s.clone()),
            Some(DetailValue::Array(items)) if !items.is_empty() => {
                let mut tags: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                tags.sort();
                tags.dedup();
                if tags.is_empty() { GroupValue::Empty } else { GroupValue::Tag(tags) }
            }
            _ => GroupValue::Empty,
        }
    }

    /// Filter selecting exactly the records of this bucket.
    pub fn filter(&self, relation_key: &str) -> Filter {
        match self {
            GroupValue::Tag(tags) => Filter::new(
                relation_key,
                FilterCondition::ExactIn,
                DetailValue::from(tags.clone()),
            ),
            GroupValue::Status(s) => {
                Filter::new(relation_key, FilterCondition::Equal, DetailValue::from(s.clone()))
            }
            GroupValue::Checkbox(b) => {
                Filter::new(relation_key, FilterCondition::Equal, DetailValue::from(*b))
            }
            GroupValue::Empty => Filter::new(relation_key, FilterCondition::Empty, DetailValue::Null),
        }
    }
}

/// A bucket of records sharing one value of the grouping relation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub value: GroupValue,
}

impl Group {
    pub fn new(id: impl Into<String>, value: GroupValue) -> Self {
        Self { id: id.into(), value }
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
    fn test_limit_grows_with_page() {
        let mut q = SubscriptionQuery::new(SubscriptionId::new("s"), 20);
        assert_eq!(q.limit(), 20);
        q.page = 3;
        assert_eq!(q.limit(), 60);
        q.page = 0;
        assert_eq!(q.limit(), 20);
    }

    #[test]
    fn test_group_value_of() {
        let d = ObjectDetails::new("x")
            .with("status", "open")
            .with("tag", json!(["b", "a", "b"]))
            .with("done", true)
            .with("blank", "");
        assert_eq!(GroupValue::of(&d, "status"), GroupValue::Status("open".into()));
        assert_eq!(GroupValue::of(&d, "tag"), GroupValue::Tag(vec!["a".into(), "b".into()]));
        assert_eq!(GroupValue::of(&d, "done"), GroupValue::Checkbox(true));
        assert_eq!(GroupValue::of(&d, "blank"), GroupValue::Empty);
        assert_eq!(GroupValue::of(&d, "missing"), GroupValue::Empty);
    }

    #[test]
    fn test_group_filter() {
        let f = GroupValue::Empty.filter("status");
        assert_eq!(f.condition, FilterCondition::Empty);
        let f = GroupValue::Status("open".into()).filter("status");
        assert_eq!(f.condition, FilterCondition::Equal);
        assert_eq!(f.value, json!("open"));
    }
}
