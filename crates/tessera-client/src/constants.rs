//! Client defaults and limits.
//!
//! Centralizes hardcoded values; the tunable ones seed [`crate::ClientConfig`].

/// Records per page for plain subscriptions.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Records per page for each group of a grouped view.
pub const DEFAULT_GROUP_PAGE_SIZE: u32 = 10;

/// Replica update signals buffered per receiver before it lags.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 1024;

/// Event batches buffered per feed receiver before it lags.
pub const DEFAULT_FEED_CAPACITY: usize = 4096;

/// Subscription state notifications buffered per receiver.
pub const DEFAULT_STATE_CAPACITY: usize = 256;

/// Details cache change notifications buffered per receiver.
pub const DETAILS_CHANGE_CAPACITY: usize = 1024;
