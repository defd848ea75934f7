//! Per-account wiring: one feed, one details cache, one subscription engine.
//!
//! Created at login and torn down at logout or account switch. Every
//! replica and subscription it hands out shares the same details cache.

use std::sync::Arc;

use tracing::info;

use tessera_store::DetailsCache;
use tessera_types::ContextId;

use crate::config::ClientConfig;
use crate::constants::DETAILS_CHANGE_CAPACITY;
use crate::feed::{EventFeed, FeedTask};
use crate::grouping::GroupingCoordinator;
use crate::remote::Middleware;
use crate::replica::DocumentReplica;
use crate::subscriptions::SubscriptionEngine;

pub struct Session {
    config: ClientConfig,
    remote: Arc<dyn Middleware>,
    feed: EventFeed,
    details: Arc<DetailsCache>,
    engine: Arc<SubscriptionEngine>,
    engine_task: Option<FeedTask>,
}

impl Session {
    /// Must be called within a tokio runtime; the subscription engine starts
    /// consuming the feed immediately.
    pub fn new(remote: Arc<dyn Middleware>, config: ClientConfig) -> Self {
        let feed = EventFeed::new(config.feed_capacity);
        let details = Arc::new(DetailsCache::new(DETAILS_CHANGE_CAPACITY));
        let engine = Arc::new(SubscriptionEngine::new(Arc::clone(&remote), Arc::clone(&details), &config));
        let engine_task = Some(engine.attach(&feed));
        Self { config, remote, feed, details, engine, engine_task }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The hub the transport publishes event batches into.
    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    pub fn details(&self) -> &Arc<DetailsCache> {
        &self.details
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    /// A closed replica for `context_id`; call `open()` on it.
    pub fn document(&self, context_id: impl Into<ContextId>) -> DocumentReplica {
        DocumentReplica::new(
            context_id.into(),
            Arc::clone(&self.remote),
            self.feed.clone(),
            Arc::clone(&self.details),
            &self.config,
        )
    }

    /// A grouping coordinator attached to this session's feed.
    pub fn grouping(&self) -> (Arc<GroupingCoordinator>, FeedTask) {
        let coordinator = Arc::new(GroupingCoordinator::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.remote),
            &self.config,
        ));
        let task = coordinator.attach(&self.feed);
        (coordinator, task)
    }

    /// Stop every live subscription, detach from the feed and drop cached
    /// details. Replicas are closed by their owners.
    pub async fn shutdown(mut self) {
        for id in self.engine.active_ids() {
            let _ = self.engine.stop(&id).await;
        }
        if let Some(task) = self.engine_task.take() {
            task.stop().await;
        }
        self.details.clear();
        info!("session shut down");
    }
}
