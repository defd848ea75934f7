//! Client configuration, loadable from RON.
//!
//! ```ron
//! (
//!     page_size: 100,
//!     group_page_size: 20,
//! )
//! ```
//!
//! Omitted fields take their defaults from [`crate::constants`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FEED_CAPACITY, DEFAULT_GROUP_PAGE_SIZE, DEFAULT_PAGE_SIZE, DEFAULT_SIGNAL_CAPACITY,
    DEFAULT_STATE_CAPACITY,
};

/// Errors that can occur when loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Page size for plain subscriptions.
    pub page_size: u32,
    /// Page size of each group's child subscription.
    pub group_page_size: u32,
    /// Broadcast capacity for replica update signals.
    pub signal_capacity: usize,
    /// Broadcast capacity of the event feed hub.
    pub feed_capacity: usize,
    /// Broadcast capacity for subscription state notifications.
    pub state_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            group_page_size: DEFAULT_GROUP_PAGE_SIZE,
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
            feed_capacity: DEFAULT_FEED_CAPACITY,
            state_capacity: DEFAULT_STATE_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }
}
