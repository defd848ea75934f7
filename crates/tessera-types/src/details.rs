//! Object details: key/value metadata describing an object.
//!
//! Details live in a namespace distinct from blocks. Values are JSON-shaped
//! (null, bool, number, string, list, struct), matching what the authority
//! sends; helpers below read the well-known keys.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;

/// A detail value.
pub type DetailValue = serde_json::Value;

/// Well-known relation keys.
pub mod keys {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const LAYOUT: &str = "layout";
    pub const TYPE: &str = "type";
    pub const ICON_EMOJI: &str = "iconEmoji";
    pub const DESCRIPTION: &str = "description";
    pub const IS_ARCHIVED: &str = "isArchived";
    pub const IS_DELETED: &str = "isDeleted";
    pub const DONE: &str = "done";
    pub const TAG: &str = "tag";
    pub const STATUS: &str = "status";
    pub const SETOF: &str = "setOf";
    pub const FEATURED_RELATIONS: &str = "featuredRelations";

    /// Keys whose change can alter which affordances and child blocks are valid.
    pub const ESCALATING: [&str; 2] = [LAYOUT, TYPE];

    /// Whether a change to `key` requires a full rebuild.
    pub fn is_escalating(key: &str) -> bool {
        ESCALATING.contains(&key)
    }
}

/// Metadata for one object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetails {
    pub id: ObjectId,
    #[serde(default)]
    pub values: IndexMap<String, DetailValue>,
}

/// One key/value delta of an amend event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetailPatch {
    pub key: String,
    pub value: DetailValue,
}

impl DetailPatch {
    pub fn new(key: impl Into<String>, value: impl Into<DetailValue>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

impl ObjectDetails {
    /// Empty details for an id.
    pub fn new(id: impl Into<ObjectId>) -> Self {
        Self { id: id.into(), values: IndexMap::new() }
    }

    /// Builder-style: add a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DetailValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&DetailValue> {
        self.values.get(key)
    }

    /// String value of a key, if it holds one.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(DetailValue::as_str)
    }

    /// List-of-strings value; a scalar string reads as a one-element list.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(DetailValue::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(DetailValue::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(DetailValue::as_bool).unwrap_or(false)
    }

    pub fn name(&self) -> &str {
        self.string(keys::NAME).unwrap_or_default()
    }

    pub fn layout(&self) -> Option<&DetailValue> {
        self.values.get(keys::LAYOUT)
    }

    pub fn type_id(&self) -> Option<&str> {
        self.string(keys::TYPE)
    }

    pub fn is_deleted_or_archived(&self) -> bool {
        self.bool(keys::IS_DELETED) || self.bool(keys::IS_ARCHIVED)
    }

    /// Merge patches in; returns the keys whose value actually changed.
    pub fn amend(&mut self, patches: &[DetailPatch]) -> Vec<String> {
        let mut changed = Vec::new();
        for patch in patches {
            if self.values.get(&patch.key) != Some(&patch.value) {
                self.values.insert(patch.key.clone(), patch.value.clone());
                changed.push(patch.key.clone());
            }
        }
        changed
    }

    /// Remove keys; returns the keys that were present.
    pub fn unset(&mut self, keys: &[String]) -> Vec<String> {
        keys.iter()
            .filter(|k| self.values.shift_remove(k.as_str()).is_some())
            .cloned()
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
