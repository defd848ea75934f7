//! Subscription engine: live, ordered result windows for declarative queries.
//!
//! Each subscription holds one contiguous window `[0, page_size * page)` of
//! the authority's sorted result. Paging re-issues the query with a larger
//! window instead of fetching a disjoint page, so the local id sequence is
//! always a prefix of the true order.
//!
//! Record details live in the shared [`DetailsCache`]; a subscription only
//! stores ids. Insert positions come from the authority and are never
//! recomputed locally.
//!
//! Start, page and stop for one id are serialized by a per-id async lock.
//! A `stop` issued while `start` awaits the authority waits for the reply,
//! then unregisters.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{Instrument, debug, error, trace, warn};

use tessera_store::DetailsCache;
use tessera_types::{EventMessage, ObjectDetails, ObjectId, SubscriptionId, SubscriptionQuery};

use crate::config::ClientConfig;
use crate::feed::{EventFeed, FeedItem, FeedTask, spawn_consumer};
use crate::remote::{Middleware, RemoteError, SubscriptionSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("remote subscription command failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),
}

pub type Result<T> = std::result::Result<T, SubscriptionError>;

// ============================================================================
// Record updates
// ============================================================================

/// One change to a subscription's window, in authority terms.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordUpdate {
    /// Replace the whole window (start, restart, filter or sort change).
    Set { records: Vec<ObjectDetails>, total: usize },
    /// Insert consecutively right after `after_id` (front if `None`).
    Insert { after_id: Option<ObjectId>, records: Vec<ObjectDetails> },
    /// Content changed; positions unchanged.
    Update { records: Vec<ObjectDetails> },
    Delete { ids: Vec<ObjectId> },
    /// Move `id` to right after `after_id` (front if `None`).
    Move { id: ObjectId, after_id: Option<ObjectId> },
    Counters { total: usize, next_count: usize, prev_count: usize },
}

/// Local state of one subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionState {
    query: SubscriptionQuery,
    ids: Vec<ObjectId>,
    total: usize,
    next_count: usize,
    prev_count: usize,
}

impl SubscriptionState {
    fn new(query: SubscriptionQuery, snapshot: SubscriptionSnapshot, details: &DetailsCache) -> Self {
        let mut state = Self { query, ids: Vec::new(), total: 0, next_count: 0, prev_count: 0 };
        state.apply(
            RecordUpdate::Set { records: snapshot.records, total: snapshot.total },
            details,
        );
        state
    }

    pub fn query(&self) -> &SubscriptionQuery {
        &self.query
    }

    /// Ids in window order, including ones whose details are not cached.
    pub fn raw_ids(&self) -> &[ObjectId] {
        &self.ids
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn next_count(&self) -> usize {
        self.next_count
    }

    pub fn prev_count(&self) -> usize {
        self.prev_count
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|x| x.as_str() == id)
    }

    /// Index to insert at for `after_id`, or `None` if the anchor is unknown.
    fn anchor(&self, after_id: Option<&ObjectId>) -> Option<usize> {
        match after_id {
            None => Some(0),
            Some(after) => self.position(after).map(|i| i + 1),
        }
    }

    fn clamp(&mut self) {
        let limit = self.query.limit();
        if self.ids.len() > limit {
            self.ids.truncate(limit);
        }
        self.total = self.total.max(self.ids.len());
    }

    /// Apply one update. Returns whether anything observable changed.
    pub(crate) fn apply(&mut self, update: RecordUpdate, details: &DetailsCache) -> bool {
        let changed = match update {
            RecordUpdate::Set { records, total } => {
                let mut seen = HashSet::with_capacity(records.len());
                self.ids =
                    records.iter().filter(|r| seen.insert(&r.id)).map(|r| r.id.clone()).collect();
                for record in records {
                    details.set(record);
                }
                self.total = total;
                true
            }
            RecordUpdate::Insert { after_id, records } => {
                if self.anchor(after_id.as_ref()).is_none() {
                    warn!(
                        "{}: insert anchor {:?} not in window, ignoring",
                        self.query.subscription_id, after_id
                    );
                    return false;
                }
                for record in &records {
                    if let Some(at) = self.position(&record.id) {
                        self.ids.remove(at);
                    }
                }
                // The anchor itself may have been one of the re-inserted records.
                let mut at = self.anchor(after_id.as_ref()).unwrap_or(self.ids.len());
                for record in records {
                    self.ids.insert(at, record.id.clone());
                    details.set(record);
                    at += 1;
                }
                true
            }
            RecordUpdate::Update { records } => {
                let mut changed = false;
                for record in records {
                    changed |= self.position(&record.id).is_some();
                    details.set(record);
                }
                changed
            }
            RecordUpdate::Delete { ids } => {
                let before = self.ids.len();
                self.ids.retain(|id| !ids.contains(id));
                let removed = before - self.ids.len();
                self.total = self.total.saturating_sub(removed);
                removed > 0
            }
            RecordUpdate::Move { id, after_id } => {
                let Some(from) = self.position(&id) else {
                    trace!("{}: move of {} outside window", self.query.subscription_id, id);
                    return false;
                };
                let moved = self.ids.remove(from);
                match self.anchor(after_id.as_ref()) {
                    Some(to) => self.ids.insert(to, moved),
                    None => {
                        warn!(
                            "{}: move anchor {:?} not in window, dropping {}",
                            self.query.subscription_id, after_id, moved
                        );
                    }
                }
                true
            }
            RecordUpdate::Counters { total, next_count, prev_count } => {
                self.total = total;
                self.next_count = next_count;
                self.prev_count = prev_count;
                if self.ids.len() > total {
                    self.ids.truncate(total);
                }
                true
            }
        };
        self.clamp();
        changed
    }
}

/// Owned view of a subscription for rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionView {
    pub subscription_id: SubscriptionId,
    /// Records whose details are cached, in window order.
    pub records: Vec<ObjectDetails>,
    pub total: usize,
    pub page: u32,
}

// ============================================================================
// SubscriptionEngine
// ============================================================================

/// What an `issue` call sends to the authority.
enum Request {
    Start(SubscriptionQuery),
    NextPage,
}

pub struct SubscriptionEngine {
    remote: Arc<dyn Middleware>,
    details: Arc<DetailsCache>,
    subs: DashMap<SubscriptionId, SubscriptionState>,
    locks: DashMap<SubscriptionId, Arc<tokio::sync::Mutex<()>>>,
    state_tx: broadcast::Sender<SubscriptionId>,
    page_size: u32,
}

impl SubscriptionEngine {
    pub fn new(remote: Arc<dyn Middleware>, details: Arc<DetailsCache>, config: &ClientConfig) -> Self {
        let (state_tx, _) = broadcast::channel(config.state_capacity.max(1));
        Self {
            remote,
            details,
            subs: DashMap::new(),
            locks: DashMap::new(),
            state_tx,
            page_size: config.page_size,
        }
    }

    pub fn details(&self) -> &Arc<DetailsCache> {
        &self.details
    }

    pub fn default_page_size(&self) -> u32 {
        self.page_size
    }

    /// Ids of subscriptions whose state changed, one message per change.
    pub fn subscribe_state(&self) -> broadcast::Receiver<SubscriptionId> {
        self.state_tx.subscribe()
    }

    fn notify(&self, id: &SubscriptionId) {
        let _ = self.state_tx.send(id.clone());
    }

    fn lock_for(&self, id: &SubscriptionId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(id.clone()).or_default().clone()
    }

    // ── Commands ────────────────────────────────────────────────────────

    /// Register `query` and load its first window.
    ///
    /// An empty subscription id is replaced by a generated one; a page size
    /// of zero takes the configured default. Starting an id that is already
    /// live re-issues the query and replaces the window; on failure the
    /// previous window is kept.
    pub async fn start(&self, mut query: SubscriptionQuery) -> Result<SubscriptionId> {
        if query.subscription_id.is_empty() {
            query.subscription_id = SubscriptionId::generate();
        }
        if query.page_size == 0 {
            query.page_size = self.page_size;
        }
        let id = query.subscription_id.clone();
        let span = tessera_telemetry::subscription_span(&id, "start");
        self.issue(&id, Request::Start(query)).instrument(span).await?;
        Ok(id)
    }

    async fn issue(&self, id: &SubscriptionId, request: Request) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        // Only a start may register an id that is not live; a page request
        // queued behind a stop must not bring the subscription back.
        let query = match request {
            Request::Start(query) => query,
            Request::NextPage => {
                let mut query = self
                    .subs
                    .get(id)
                    .map(|s| s.query.clone())
                    .ok_or_else(|| SubscriptionError::UnknownSubscription(id.clone()))?;
                query.page = query.page.max(1) + 1;
                query
            }
        };

        let snapshot = self.remote.subscribe(&query).await.map_err(|e| {
            warn!("subscribe failed: {e}");
            e
        })?;
        debug!(records = snapshot.records.len(), total = snapshot.total, page = query.page, "window loaded");
        let state = SubscriptionState::new(query, snapshot, &self.details);
        self.subs.insert(id.clone(), state);
        self.notify(id);
        Ok(())
    }

    /// Grow the window by one page. Returns the new window length.
    ///
    /// Fails with [`SubscriptionError::UnknownSubscription`] if the id is not
    /// live once earlier commands on it have finished.
    pub async fn increase_page(&self, id: &SubscriptionId) -> Result<usize> {
        let span = tessera_telemetry::subscription_span(id, "page");
        self.issue(id, Request::NextPage).instrument(span).await?;
        Ok(self.subs.get(id).map(|s| s.ids.len()).unwrap_or(0))
    }

    /// Unregister and drop local state. A second stop is a no-op.
    ///
    /// Local state is released before the remote call, so it is gone even if
    /// the authority reports an error.
    pub async fn stop(&self, id: &SubscriptionId) -> Result<()> {
        let span = tessera_telemetry::subscription_span(id, "stop");
        async {
            let lock = self.lock_for(id);
            let guard = lock.lock().await;
            let removed = self.subs.remove(id).is_some();
            let result = if removed {
                self.notify(id);
                self.remote.unsubscribe(std::slice::from_ref(id)).await.map_err(|e| {
                    warn!("unsubscribe failed: {e}");
                    SubscriptionError::from(e)
                })
            } else {
                trace!("already stopped");
                Ok(())
            };
            drop(guard);
            // The map and this frame hold the only references when idle.
            self.locks.remove_if(id, |_, l| Arc::strong_count(l) <= 2);
            result
        }
        .instrument(span)
        .await
    }

    // ── Incoming updates ────────────────────────────────────────────────

    /// Apply an update to a live subscription. Unknown ids are ignored.
    pub fn apply(&self, id: &SubscriptionId, update: RecordUpdate) -> bool {
        let changed = match self.subs.get_mut(id) {
            Some(mut state) => state.apply(update, &self.details),
            None => {
                trace!("update for inactive subscription {id}");
                false
            }
        };
        if changed {
            self.notify(id);
        }
        changed
    }

    /// Route one feed event. Returns the subscriptions it changed.
    pub fn handle_event(&self, event: &EventMessage) -> Vec<SubscriptionId> {
        match event {
            EventMessage::SubscriptionAdd { subscription_id, id, after_id } => {
                let Some(record) = self.details.get(id) else {
                    warn!("{subscription_id}: add of {id} without cached details, skipping");
                    return Vec::new();
                };
                let update = RecordUpdate::Insert { after_id: after_id.clone(), records: vec![record] };
                self.changed_if(subscription_id, update)
            }
            EventMessage::SubscriptionRemove { subscription_id, id } => {
                self.changed_if(subscription_id, RecordUpdate::Delete { ids: vec![id.clone()] })
            }
            EventMessage::SubscriptionPosition { subscription_id, id, after_id } => {
                let update = RecordUpdate::Move { id: id.clone(), after_id: after_id.clone() };
                self.changed_if(subscription_id, update)
            }
            EventMessage::SubscriptionCounters { subscription_id, total, next_count, prev_count } => {
                let update = RecordUpdate::Counters {
                    total: *total,
                    next_count: *next_count,
                    prev_count: *prev_count,
                };
                self.changed_if(subscription_id, update)
            }
            EventMessage::ObjectDetailsSet { id, details, subscription_ids } => {
                if subscription_ids.is_empty() {
                    return Vec::new();
                }
                let mut details = details.clone();
                details.id = id.clone();
                self.details.set(details);
                self.touching(id, subscription_ids)
            }
            EventMessage::ObjectDetailsAmend { id, details, subscription_ids } => {
                if subscription_ids.is_empty() {
                    return Vec::new();
                }
                self.details.amend(id, details);
                self.touching(id, subscription_ids)
            }
            EventMessage::ObjectDetailsUnset { id, keys, subscription_ids } => {
                if subscription_ids.is_empty() {
                    return Vec::new();
                }
                self.details.unset(id, keys);
                self.touching(id, subscription_ids)
            }
            // Group lists belong to the grouping coordinator.
            EventMessage::SubscriptionGroups { .. } => Vec::new(),
            EventMessage::BlockShow { .. }
            | EventMessage::BlockAdd { .. }
            | EventMessage::BlockDelete { .. }
            | EventMessage::BlockSetChildrenIds { .. }
            | EventMessage::BlockSetText { .. }
            | EventMessage::BlockSetBackgroundColor { .. }
            | EventMessage::BlockSetAlign { .. }
            | EventMessage::BlockSetFields { .. }
            | EventMessage::BlockSetFile { .. }
            | EventMessage::BlockSetBookmark { .. }
            | EventMessage::BlockSetDiv { .. }
            | EventMessage::BlockSetLink { .. }
            | EventMessage::BlockSetRelation { .. }
            | EventMessage::BlockDataviewViewSet { .. }
            | EventMessage::BlockDataviewViewOrder { .. }
            | EventMessage::BlockDataviewViewDelete { .. }
            | EventMessage::BlockDataviewSourceSet { .. }
            | EventMessage::BlockDataviewRelationSet { .. }
            | EventMessage::BlockDataviewRelationDelete { .. }
            | EventMessage::BlockDataviewGroupOrderUpdate { .. }
            | EventMessage::BlockDataviewObjectOrderUpdate { .. }
            | EventMessage::ObjectRelationsSet { .. }
            | EventMessage::ObjectRelationsAmend { .. }
            | EventMessage::ObjectRelationsRemove { .. }
            | EventMessage::SyncStatusUpdate { .. } => Vec::new(),
            EventMessage::Unknown => Vec::new(),
        }
    }

    fn changed_if(&self, id: &SubscriptionId, update: RecordUpdate) -> Vec<SubscriptionId> {
        if self.apply(id, update) { vec![id.clone()] } else { Vec::new() }
    }

    /// Notify the listed live subscriptions whose window holds `object_id`.
    fn touching(&self, object_id: &ObjectId, subscription_ids: &[SubscriptionId]) -> Vec<SubscriptionId> {
        let touched: Vec<SubscriptionId> = subscription_ids
            .iter()
            .filter(|sid| self.subs.get(*sid).is_some_and(|s| s.position(object_id).is_some()))
            .cloned()
            .collect();
        for sid in &touched {
            self.notify(sid);
        }
        touched
    }

    /// Consume subscription events from `feed` until the task is stopped.
    pub fn attach(self: &Arc<Self>, feed: &EventFeed) -> FeedTask {
        let engine = Arc::clone(self);
        spawn_consumer("subscriptions".into(), feed.subscribe(), move |item| {
            let engine = Arc::clone(&engine);
            async move {
                match item {
                    FeedItem::Batch(batch) => {
                        for event in &batch.messages {
                            engine.handle_event(event);
                        }
                    }
                    FeedItem::Lagged(n) => {
                        error!("subscription feed lagged, {n} batches dropped");
                        for id in engine.active_ids() {
                            engine.notify(&id);
                        }
                    }
                }
            }
        })
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.subs.contains_key(id)
    }

    pub fn active_ids(&self) -> Vec<SubscriptionId> {
        self.subs.iter().map(|e| e.key().clone()).collect()
    }

    /// Window ids whose details are cached, in order.
    pub fn ids(&self, id: &SubscriptionId) -> Vec<ObjectId> {
        self.subs
            .get(id)
            .map(|s| s.ids.iter().filter(|x| self.details.contains(x)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn total(&self, id: &SubscriptionId) -> Option<usize> {
        self.subs.get(id).map(|s| s.total)
    }

    pub fn query(&self, id: &SubscriptionId) -> Option<SubscriptionQuery> {
        self.subs.get(id).map(|s| s.query.clone())
    }

    pub fn state(&self, id: &SubscriptionId) -> Option<SubscriptionState> {
        self.subs.get(id).map(|s| s.clone())
    }

    /// Details of one record; `None` means not yet available.
    pub fn record(&self, object_id: &str) -> Option<ObjectDetails> {
        self.details.get(object_id)
    }

    pub fn view(&self, id: &SubscriptionId) -> Option<SubscriptionView> {
        let state = self.subs.get(id)?;
        let records = state.ids.iter().filter_map(|x| self.details.get(x)).collect();
        Some(SubscriptionView {
            subscription_id: id.clone(),
            records,
            total: state.total,
            page: state.query.page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(ids: &[&str], page_size: u32) -> (SubscriptionState, DetailsCache) {
        let cache = DetailsCache::default();
        let records = ids.iter().map(|id| ObjectDetails::new(*id)).collect();
        let snapshot = SubscriptionSnapshot { records, total: ids.len() };
        let query = SubscriptionQuery::new(SubscriptionId::new("s"), page_size);
        (SubscriptionState::new(query, snapshot, &cache), cache)
    }

    fn ids(state: &SubscriptionState) -> Vec<&str> {
        state.raw_ids().iter().map(|x| x.as_str()).collect()
    }

    #[test]
    fn test_set_caches_details() {
        let (s, cache) = state(&["a", "b"], 10);
        assert_eq!(ids(&s), ["a", "b"]);
        assert!(cache.contains("a"));
        assert_eq!(s.total(), 2);
    }

    #[test]
    fn test_set_keeps_first_copy_of_repeated_ids() {
        let (s, _cache) = state(&["a", "b", "a", "c", "b"], 10);
        assert_eq!(ids(&s), ["a", "b", "c"]);
    }

    #[test]
    fn test_insert_after_anchor() {
        let (mut s, cache) = state(&["a", "c"], 10);
        let update = RecordUpdate::Insert {
            after_id: Some(ObjectId::new("a")),
            records: vec![ObjectDetails::new("b")],
        };
        assert!(s.apply(update, &cache));
        assert_eq!(ids(&s), ["a", "b", "c"]);
        assert_eq!(s.total(), 3);
    }

    #[test]
    fn test_insert_front_and_truncate_to_limit() {
        let (mut s, cache) = state(&["a", "b"], 2);
        let update = RecordUpdate::Insert { after_id: None, records: vec![ObjectDetails::new("z")] };
        s.apply(update, &cache);
        assert_eq!(ids(&s), ["z", "a"]);
    }

    #[test]
    fn test_insert_unknown_anchor_ignored() {
        let (mut s, cache) = state(&["a"], 10);
        let update = RecordUpdate::Insert {
            after_id: Some(ObjectId::new("ghost")),
            records: vec![ObjectDetails::new("b")],
        };
        assert!(!s.apply(update, &cache));
        assert_eq!(ids(&s), ["a"]);
    }

    #[test]
    fn test_reinsert_moves_existing() {
        let (mut s, cache) = state(&["a", "b", "c"], 10);
        let update = RecordUpdate::Insert {
            after_id: Some(ObjectId::new("c")),
            records: vec![ObjectDetails::new("a")],
        };
        s.apply(update, &cache);
        assert_eq!(ids(&s), ["b", "c", "a"]);
    }

    #[test]
    fn test_move_and_delete() {
        let (mut s, cache) = state(&["a", "b", "c"], 10);
        s.apply(RecordUpdate::Move { id: ObjectId::new("c"), after_id: None }, &cache);
        assert_eq!(ids(&s), ["c", "a", "b"]);
        s.apply(RecordUpdate::Delete { ids: vec![ObjectId::new("a")] }, &cache);
        assert_eq!(ids(&s), ["c", "b"]);
        assert_eq!(s.total(), 2);
    }

    #[test]
    fn test_counters_bound_window() {
        let (mut s, cache) = state(&["a", "b", "c"], 10);
        s.apply(RecordUpdate::Counters { total: 2, next_count: 0, prev_count: 0 }, &cache);
        assert_eq!(ids(&s), ["a", "b"]);
        s.apply(RecordUpdate::Counters { total: 40, next_count: 30, prev_count: 0 }, &cache);
        assert_eq!(s.total(), 40);
        assert_eq!(s.next_count(), 30);
    }

    #[test]
    fn test_update_keeps_positions() {
        let (mut s, cache) = state(&["a", "b"], 10);
        let changed = s.apply(
            RecordUpdate::Update { records: vec![ObjectDetails::new("b").with("name", "B")] },
            &cache,
        );
        assert!(changed);
        assert_eq!(ids(&s), ["a", "b"]);
        assert_eq!(cache.get("b").unwrap().name(), "B");
    }
}
