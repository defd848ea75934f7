//! Shared types for Tessera.
//!
//! This crate is the vocabulary of the replica: typed ids, blocks and their
//! content, object details, relation schema, data-view configuration,
//! subscription queries, and the event feed. It has **no internal tessera
//! dependencies**, a pure leaf crate that the store and client build on.
//!
//! # Overview
//!
//! ```text
//! Document (ContextId)
//!     └── tree of Block (BlockId), rooted at one root id
//!           └── content: BlockContent (text, file, dataview, …)
//!
//! Object (ObjectId)
//!     └── ObjectDetails (key → value), process-wide cache
//!     └── RelationLink (key → format), per document
//!
//! Subscription (SubscriptionId)
//!     └── SubscriptionQuery (filters, sorts, page window)
//!     └── Group (grouped views only)
//! ```
//!
//! # Key Types
//!
//! | Type                 | Purpose                                   |
//! |----------------------|-------------------------------------------|
//! | [`Block`]            | A node with typed content and children    |
//! | [`ObjectDetails`]    | Metadata of one object                    |
//! | [`DataViewContent`]  | Query definition of a set/collection      |
//! | [`SubscriptionQuery`]| A live, paginated query                   |
//! | [`EventMessage`]     | One remote mutation event                 |
//! | [`EventBatch`]       | Ordered delivery for one context          |

pub mod block;
pub mod dataview;
pub mod details;
pub mod event;
pub mod ids;
pub mod query;
pub mod relation;

pub use block::{
    Alignment, Block, BlockContent, BookmarkContent, DividerContent, DividerStyle, FileContent,
    FileKind, LayoutContent, LayoutStyle, LinkCardStyle, LinkContent, LoadState, Mark, MarkKind,
    TextContent, TextStyle,
};
pub use dataview::{
    DataView, DataViewContent, Filter, FilterCondition, FilterOperator, GroupOrder, ObjectOrder,
    Sort, SortKind, ViewGroup, ViewKind,
};
pub use details::{DetailPatch, DetailValue, ObjectDetails, keys};
pub use event::{EventBatch, EventMessage, SyncStatus};
pub use ids::{BlockId, ContextId, ObjectId, SubscriptionId};
pub use query::{Group, GroupQuery, GroupValue, SubscriptionQuery};
pub use relation::{RelationDetails, RelationFormat, RelationLink};
