//! Tessera client: the async layer over the replica core.
//!
//! Keeps documents and live queries in sync with a remote middleware that
//! is reached through request/response commands ([`Middleware`]) and an
//! ordered push feed ([`EventFeed`]).
//!
//! ```text
//!   transport ──▶ EventFeed ──▶ DocumentReplica (per context id) ──▶ UpdateSignal
//!                          └──▶ SubscriptionEngine ──▶ GroupingCoordinator
//! ```
//!
//! Start from a [`Session`], which owns the shared details cache.

pub mod config;
pub mod constants;
pub mod feed;
pub mod grouping;
pub mod remote;
pub mod replica;
pub mod session;
pub mod subscriptions;

pub use config::{ClientConfig, ConfigError};
pub use feed::{EventFeed, FeedItem, FeedTask, spawn_consumer};
pub use grouping::{GroupEntry, GroupedQuery, GroupingCoordinator};
pub use remote::{
    BlockCommand, BlockPosition, CommandReply, Middleware, ObjectSnapshot, RemoteError,
    SubscriptionSnapshot,
};
pub use replica::{CommandError, DocumentOpenError, DocumentReplica, ReplicaSnapshot, ReplicaState};
pub use session::Session;
pub use subscriptions::{
    RecordUpdate, SubscriptionEngine, SubscriptionError, SubscriptionState, SubscriptionView,
};

pub use tessera_store::{DetailsCache, DetailsChange, UpdateSignal};
