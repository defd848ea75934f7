//! Typed identifiers for blocks, objects, contexts, and subscriptions.
//!
//! The remote authority addresses everything with opaque strings. Wrapping
//! them in distinct newtypes keeps a block id from being passed where an
//! object id is expected, even though a page's root block id and its object
//! id are frequently the same string (see [`BlockId::as_object`]).
//!
//! All ids implement `Borrow<str>` and deref to `str`, so maps keyed by an
//! id can be queried with a plain `&str`.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Identifier of a block, unique within one document.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

/// Identifier of an object (page, set, relation, type…). Keys the Details cache.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

/// Identifier scoping commands and events to one open document.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

/// Identifier of a live query subscription.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_string_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// The raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume into the raw identifier.
            pub fn into_string(self) -> String {
                self.0
            }

            /// Empty ids are never valid on the wire; used to detect protocol gaps.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Borrow<str> for $T {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $T {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_string_id!(BlockId, "BlockId");
impl_string_id!(ObjectId, "ObjectId");
impl_string_id!(ContextId, "ContextId");
impl_string_id!(SubscriptionId, "SubscriptionId");

// ── Cross-namespace conversions ─────────────────────────────────────────────

impl BlockId {
    /// View a block id as the object id of the same string.
    ///
    /// Page-type objects use their root block id as object id.
    pub fn as_object(&self) -> ObjectId {
        ObjectId(self.0.clone())
    }
}

impl ContextId {
    /// The object a document context is opened for.
    pub fn object_id(&self) -> ObjectId {
        ObjectId(self.0.clone())
    }
}

impl ObjectId {
    /// The context id used to open this object as a document.
    pub fn context_id(&self) -> ContextId {
        ContextId(self.0.clone())
    }
}

impl SubscriptionId {
    /// Create a fresh, time-ordered subscription id (UUIDv7).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().simple().to_string())
    }

    /// Derive the id of a per-group child subscription.
    ///
    /// Deterministic so that restarting a group reuses the remote registration
    /// slot instead of leaking a new one.
    pub fn child(&self, group_id: &str) -> Self {
        Self(format!("{}/{}", self.0, group_id))
    }
}

// ============================================================================
// Tests
// ============================================================================
