//! Relation metadata: the schema of typed fields.

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::ObjectId;

/// Value format of a relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum RelationFormat {
    LongText,
    #[default]
    ShortText,
    Number,
    Status,
    Tag,
    Date,
    File,
    Checkbox,
    Url,
    Email,
    Phone,
    Emoji,
    Object,
}

impl RelationFormat {
    /// Formats a grouped view may bucket by.
    pub fn is_groupable(&self) -> bool {
        matches!(self, RelationFormat::Status | RelationFormat::Tag | RelationFormat::Checkbox)
    }
}

/// Reference from an object (or data view) to a relation, by key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationLink {
    pub key: String,
    #[serde(default)]
    pub format: RelationFormat,
}

impl RelationLink {
    pub fn new(key: impl Into<String>, format: RelationFormat) -> Self {
        Self { key: key.into(), format }
    }
}

/// Full description of a relation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDetails {
    pub id: ObjectId,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub format: RelationFormat,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_read_only: bool,
    /// Object types a value of this relation may point at (for `Object` format).
    #[serde(default)]
    pub object_types: Vec<ObjectId>,
}

impl RelationDetails {
    pub fn link(&self) -> RelationLink {
        RelationLink::new(self.key.clone(), self.format)
    }
}
