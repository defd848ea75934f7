//! Grouping coordinator for kanban-style views.
//!
//! Holds the group list of one grouped query and one child subscription per
//! visible group. Child ids derive from the parent id and group id, so a
//! restarted group reuses its remote slot. Group order comes only from the
//! view's [`ViewGroup`] records; arrival order is never used.
//!
//! Changing the grouping relation or the filter set tears everything down
//! and rebuilds from a fresh group query.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{Instrument, debug, info, warn};

use tessera_types::{
    DataView, DataViewContent, EventMessage, Filter, Group, GroupQuery, GroupValue, ObjectId,
    ObjectOrder, Sort, SubscriptionId, SubscriptionQuery, ViewGroup,
};

use crate::config::ClientConfig;
use crate::feed::{EventFeed, FeedItem, FeedTask, spawn_consumer};
use crate::remote::Middleware;
use crate::subscriptions::{Result, SubscriptionEngine, SubscriptionError};

/// Definition of a grouped view.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedQuery {
    pub subscription_id: SubscriptionId,
    pub relation_key: String,
    pub filters: Vec<Filter>,
    pub sorts: Vec<Sort>,
    pub keys: Vec<String>,
    pub source: Vec<String>,
    pub collection_id: Option<ObjectId>,
    /// View the query was built from; object orders for other views are ignored.
    pub view_id: String,
    /// Manual per-group orders of that view.
    pub object_orders: Vec<ObjectOrder>,
}

impl GroupedQuery {
    pub fn new(subscription_id: SubscriptionId, relation_key: impl Into<String>) -> Self {
        Self {
            subscription_id,
            relation_key: relation_key.into(),
            filters: Vec::new(),
            sorts: Vec::new(),
            keys: Vec::new(),
            source: Vec::new(),
            collection_id: None,
            view_id: String::new(),
            object_orders: Vec::new(),
        }
    }

    /// Grouped query of a kanban view, or `None` if the view is not grouped.
    pub fn for_view(subscription_id: SubscriptionId, content: &DataViewContent, view: &DataView) -> Option<Self> {
        let relation_key = view.group_relation_key.clone().filter(|_| view.is_grouped())?;
        Some(Self {
            filters: view.filters.clone(),
            sorts: view.sorts.clone(),
            keys: view.relations.clone(),
            source: content.source.clone(),
            collection_id: content.target_object_id.clone().filter(|_| content.is_collection),
            view_id: view.id.clone(),
            object_orders: content.object_orders.iter().filter(|o| o.view_id == view.id).cloned().collect(),
            ..Self::new(subscription_id, relation_key)
        })
    }

    /// Sorts for one group: its manual order first, if it has one.
    fn sorts_for(&self, group_id: &str) -> Vec<Sort> {
        let custom = self.object_orders.iter().find(|o| o.group_id == group_id).and_then(ObjectOrder::sort);
        custom.into_iter().chain(self.sorts.iter().cloned()).collect()
    }

    /// Replace the stored order of one group. Returns whether it applied to this view.
    fn set_object_order(&mut self, order: ObjectOrder) -> bool {
        if !self.view_id.is_empty() && order.view_id != self.view_id {
            return false;
        }
        match self.object_orders.iter_mut().find(|o| o.group_id == order.group_id) {
            Some(existing) => *existing = order,
            None => self.object_orders.push(order),
        }
        true
    }

    fn group_query(&self) -> GroupQuery {
        GroupQuery {
            subscription_id: self.subscription_id.clone(),
            relation_key: self.relation_key.clone(),
            filters: self.filters.clone(),
            source: self.source.clone(),
            collection_id: self.collection_id.clone(),
        }
    }

    fn child_query(&self, group: &Group, page_size: u32) -> SubscriptionQuery {
        let mut query = SubscriptionQuery::new(self.subscription_id.child(&group.id), page_size);
        query.filters = self.filters.clone();
        query.filters.push(group.value.filter(&self.relation_key));
        query.sorts = self.sorts_for(&group.id);
        query.keys = self.keys.clone();
        query.source = self.source.clone();
        query.collection_id = self.collection_id.clone();
        query
    }
}

/// One group as the view should present it.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupEntry {
    pub group: Group,
    /// Position from the view's group order, if it has one.
    pub index: Option<u32>,
    pub hidden: bool,
    pub background_color: Option<String>,
    /// Live child subscription; `None` for hidden groups.
    pub subscription_id: Option<SubscriptionId>,
}

#[derive(Default)]
struct GroupingState {
    /// Last requested query; kept after a failed rebuild so it can be retried.
    query: Option<GroupedQuery>,
    /// Whether the group query is registered with the authority.
    live: bool,
    groups: Vec<Group>,
    view_groups: Vec<ViewGroup>,
    active: HashMap<String, SubscriptionId>,
}

impl GroupingState {
    fn view_group(&self, group_id: &str) -> Option<&ViewGroup> {
        self.view_groups.iter().find(|v| v.group_id == group_id)
    }

    fn is_hidden(&self, group_id: &str) -> bool {
        self.view_group(group_id).is_some_and(|v| v.hidden)
    }

    fn ordered(&self) -> Vec<GroupEntry> {
        let mut entries: Vec<GroupEntry> = self
            .groups
            .iter()
            .map(|group| {
                let view = self.view_group(&group.id);
                GroupEntry {
                    group: group.clone(),
                    index: view.map(|v| v.index),
                    hidden: view.is_some_and(|v| v.hidden),
                    background_color: view.and_then(|v| v.background_color.clone()),
                    subscription_id: self.active.get(&group.id).cloned(),
                }
            })
            .collect();
        // Ordered groups first by index; the rest after, by id.
        entries.sort_by(|a, b| match (a.index, b.index) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.group.id.cmp(&b.group.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.group.id.cmp(&b.group.id),
        });
        entries
    }
}

pub struct GroupingCoordinator {
    engine: Arc<SubscriptionEngine>,
    remote: Arc<dyn Middleware>,
    inner: tokio::sync::Mutex<GroupingState>,
    group_page_size: u32,
}

impl GroupingCoordinator {
    pub fn new(engine: Arc<SubscriptionEngine>, remote: Arc<dyn Middleware>, config: &ClientConfig) -> Self {
        Self {
            engine,
            remote,
            inner: tokio::sync::Mutex::new(GroupingState::default()),
            group_page_size: config.group_page_size,
        }
    }

    pub fn engine(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    /// Load the group list and start one child subscription per visible group.
    ///
    /// Replaces any grouping this coordinator was already running.
    pub async fn start(&self, query: GroupedQuery, view_groups: Vec<ViewGroup>) -> Result<Vec<GroupEntry>> {
        let span = tessera_telemetry::subscription_span(&query.subscription_id, "groups");
        async {
            let mut state = self.inner.lock().await;
            self.teardown(&mut state).await;
            state.view_groups = view_groups;
            self.rebuild(&mut state, query).await?;
            Ok::<_, SubscriptionError>(state.ordered())
        }
        .instrument(span)
        .await
    }

    /// Regroup by a different relation.
    pub async fn change_relation_key(&self, relation_key: impl Into<String>) -> Result<Vec<GroupEntry>> {
        let relation_key = relation_key.into();
        self.restart_with(|q| q.relation_key = relation_key).await
    }

    /// Replace the base filter set.
    pub async fn change_filters(&self, filters: Vec<Filter>) -> Result<Vec<GroupEntry>> {
        self.restart_with(|q| q.filters = filters).await
    }

    async fn restart_with(&self, edit: impl FnOnce(&mut GroupedQuery)) -> Result<Vec<GroupEntry>> {
        let mut state = self.inner.lock().await;
        let Some(mut query) = state.query.clone() else {
            return Ok(Vec::new());
        };
        edit(&mut query);
        let span = tessera_telemetry::subscription_span(&query.subscription_id, "regroup");
        async {
            self.teardown(&mut state).await;
            self.rebuild(&mut state, query).await?;
            Ok::<_, SubscriptionError>(state.ordered())
        }
        .instrument(span)
        .await
    }

    /// Apply a new view group order. Groups that became hidden are stopped,
    /// groups that became visible are started.
    pub async fn update_view_groups(&self, view_groups: Vec<ViewGroup>) -> Result<Vec<GroupEntry>> {
        let mut state = self.inner.lock().await;
        state.view_groups = view_groups;
        let Some(query) = state.query.clone().filter(|_| state.live) else {
            return Ok(state.ordered());
        };

        let to_stop: Vec<String> = state
            .active
            .keys()
            .filter(|g| state.is_hidden(g))
            .cloned()
            .collect();
        for group_id in to_stop {
            if let Some(child) = state.active.remove(&group_id) {
                debug!("group {group_id} hidden, stopping {child}");
                self.stop_child(&child).await;
            }
        }

        let to_start: Vec<Group> = state
            .groups
            .iter()
            .filter(|g| !state.is_hidden(&g.id) && !state.active.contains_key(&g.id))
            .cloned()
            .collect();
        self.start_children(&mut state, &query, to_start).await?;
        Ok(state.ordered())
    }

    /// React to a pushed group add/remove. Returns whether the group list changed.
    pub async fn handle_event(&self, event: &EventMessage) -> Result<bool> {
        let EventMessage::SubscriptionGroups { subscription_id, group, remove } = event else {
            return Ok(false);
        };
        let mut state = self.inner.lock().await;
        let Some(query) = state.query.clone().filter(|_| state.live) else {
            return Ok(false);
        };
        if *subscription_id != query.subscription_id {
            return Ok(false);
        }

        if *remove {
            let before = state.groups.len();
            state.groups.retain(|g| g.id != group.id);
            if let Some(child) = state.active.remove(&group.id) {
                self.stop_child(&child).await;
            }
            return Ok(state.groups.len() != before);
        }

        if state.groups.iter().any(|g| g.id == group.id) {
            return Ok(false);
        }
        state.groups.push(group.clone());
        if !state.is_hidden(&group.id) {
            self.start_children(&mut state, &query, vec![group.clone()]).await?;
        }
        Ok(true)
    }

    /// Grow one group's window; other groups are untouched.
    ///
    /// Holds the coordinator lock across the request so a regroup cannot
    /// stop the child midway.
    pub async fn increase_page(&self, group_id: &str) -> Result<usize> {
        let state = self.inner.lock().await;
        match state.active.get(group_id) {
            Some(child) => self.engine.increase_page(child).await,
            None => {
                let parent = state.query.as_ref().map(|q| q.subscription_id.clone());
                Err(SubscriptionError::UnknownSubscription(parent.unwrap_or_default().child(group_id)))
            }
        }
    }

    /// Store a group's manual order and restart its child with the new sort.
    /// Returns whether a live child was restarted.
    pub async fn update_object_order(&self, order: ObjectOrder) -> Result<bool> {
        let mut state = self.inner.lock().await;
        let Some(query) = state.query.as_mut() else {
            return Ok(false);
        };
        let group_id = order.group_id.clone();
        if !query.set_object_order(order) {
            return Ok(false);
        }
        let query = query.clone();
        if !state.active.contains_key(&group_id) {
            return Ok(false);
        }
        let Some(group) = state.groups.iter().find(|g| g.id == group_id) else {
            return Ok(false);
        };
        let mut child = query.child_query(group, self.group_page_size);
        // Keep the window the user already paged to.
        if let Some(current) = self.engine.query(&child.subscription_id) {
            child.page = current.page;
        }
        debug!("group {group_id} reordered, restarting {}", child.subscription_id);
        self.engine.start(child).await?;
        Ok(true)
    }

    /// Group a record falls into under the current relation, if that group exists.
    pub async fn group_of(&self, object_id: &str) -> Option<String> {
        let state = self.inner.lock().await;
        let query = state.query.as_ref()?;
        let value = self
            .engine
            .details()
            .with(object_id, |d| GroupValue::of(d, &query.relation_key))?;
        state.groups.iter().find(|g| g.value == value).map(|g| g.id.clone())
    }

    pub async fn ordered_groups(&self) -> Vec<GroupEntry> {
        self.inner.lock().await.ordered()
    }

    pub async fn parent_id(&self) -> Option<SubscriptionId> {
        self.inner.lock().await.query.as_ref().map(|q| q.subscription_id.clone())
    }

    /// Stop every child and the group query itself.
    pub async fn stop(&self) {
        let mut state = self.inner.lock().await;
        self.teardown(&mut state).await;
    }

    /// Consume group events from `feed` until the task is stopped.
    pub fn attach(self: &Arc<Self>, feed: &EventFeed) -> FeedTask {
        let coordinator = Arc::clone(self);
        spawn_consumer("grouping".into(), feed.subscribe(), move |item| {
            let coordinator = Arc::clone(&coordinator);
            async move {
                let FeedItem::Batch(batch) = item else {
                    warn!("grouping feed lagged; group list may be stale");
                    return;
                };
                for event in &batch.messages {
                    if let Err(e) = coordinator.handle_event(event).await {
                        warn!("group event failed: {e}");
                    }
                }
            }
        })
    }

    // ── Internals ───────────────────────────────────────────────────────

    async fn rebuild(&self, state: &mut GroupingState, query: GroupedQuery) -> Result<()> {
        state.query = Some(query.clone());
        let groups = self.remote.subscribe_groups(&query.group_query()).await.map_err(|e| {
            warn!("group query failed: {e}");
            SubscriptionError::from(e)
        })?;
        info!(groups = groups.len(), relation = %query.relation_key, "group list loaded");
        state.live = true;
        state.groups = groups;
        let visible: Vec<Group> = state
            .groups
            .iter()
            .filter(|g| !state.is_hidden(&g.id))
            .cloned()
            .collect();
        self.start_children(state, &query, visible).await
    }

    /// Start children concurrently. Every child that started is recorded,
    /// even when another failed; the first failure is returned.
    async fn start_children(
        &self,
        state: &mut GroupingState,
        query: &GroupedQuery,
        groups: Vec<Group>,
    ) -> Result<()> {
        let starts = groups.iter().map(|group| {
            let child = query.child_query(group, self.group_page_size);
            async move { (group.id.clone(), self.engine.start(child).await) }
        });
        let mut first_error = None;
        for (group_id, started) in join_all(starts).await {
            match started {
                Ok(child) => {
                    state.active.insert(group_id, child);
                }
                Err(e) => {
                    warn!("group {group_id} failed to start: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn stop_child(&self, child: &SubscriptionId) {
        if let Err(e) = self.engine.stop(child).await {
            warn!("stopping {child}: {e}");
        }
    }

    async fn teardown(&self, state: &mut GroupingState) {
        let children: Vec<SubscriptionId> = state.active.drain().map(|(_, id)| id).collect();
        join_all(children.iter().map(|c| self.stop_child(c))).await;
        let query = state.query.take();
        let live = std::mem::take(&mut state.live);
        if let Some(query) = query.filter(|_| live) {
            if let Err(e) = self.remote.unsubscribe(std::slice::from_ref(&query.subscription_id)).await {
                warn!("unsubscribe of group query failed: {e}");
            }
        }
        state.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::FilterCondition;

    fn group(id: &str) -> Group {
        Group::new(id, GroupValue::Status(id.into()))
    }

    #[test]
    fn test_ordered_groups_follow_view_order() {
        let state = GroupingState {
            groups: vec![group("c"), group("a"), group("b"), group("z")],
            view_groups: vec![ViewGroup::new("b", 0), ViewGroup::new("c", 1).hidden()],
            ..Default::default()
        };
        let ids: Vec<_> = state.ordered().into_iter().map(|e| e.group.id).collect();
        assert_eq!(ids, ["b", "c", "a", "z"]);
        assert!(state.ordered()[1].hidden);
    }

    #[test]
    fn test_child_query_adds_group_filter() {
        let mut q = GroupedQuery::new(SubscriptionId::new("board"), "status");
        q.filters.push(Filter::new("done", FilterCondition::Equal, false));
        let child = q.child_query(&group("open"), 7);
        assert_eq!(child.subscription_id, SubscriptionId::new("board/open"));
        assert_eq!(child.page_size, 7);
        assert_eq!(child.filters.len(), 2);
        assert_eq!(child.filters[1].relation_key, "status");
    }
}
