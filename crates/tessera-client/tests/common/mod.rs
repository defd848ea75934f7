//! In-memory middleware for integration tests.
//!
//! Records every call, serves scripted snapshots, and answers subscription
//! queries from one sorted record universe (honoring `Equal` filters).

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tessera_client::{
    BlockCommand, CommandReply, Middleware, ObjectSnapshot, RemoteError, SubscriptionSnapshot,
};
use tessera_types::{
    Block, BlockId, ContextId, FilterCondition, Group, GroupQuery, ObjectDetails, SubscriptionId,
    SubscriptionQuery,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Open(String),
    Show(String),
    Close(String),
    Perform(String, &'static str),
    Subscribe { id: String, page: u32 },
    Unsubscribe(String),
    SubscribeGroups { id: String, relation_key: String },
}

#[derive(Default)]
struct FakeState {
    snapshots: HashMap<String, ObjectSnapshot>,
    universe: Vec<ObjectDetails>,
    groups: HashMap<String, Vec<Group>>,
    open_error: Option<RemoteError>,
    subscribe_error: Option<RemoteError>,
    groups_error: Option<RemoteError>,
    queries: Vec<SubscriptionQuery>,
    replies: VecDeque<CommandReply>,
    open_gate: Option<Arc<Notify>>,
    subscribe_gate: Option<Arc<Notify>>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeMiddleware {
    state: Mutex<FakeState>,
}

impl FakeMiddleware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_snapshot(&self, context_id: &str, snapshot: ObjectSnapshot) {
        self.state.lock().snapshots.insert(context_id.to_string(), snapshot);
    }

    /// Records every subscription is answered from, already in sort order.
    pub fn set_universe(&self, records: Vec<ObjectDetails>) {
        self.state.lock().universe = records;
    }

    pub fn set_groups(&self, relation_key: &str, groups: Vec<Group>) {
        self.state.lock().groups.insert(relation_key.to_string(), groups);
    }

    pub fn fail_next_open(&self, error: RemoteError) {
        self.state.lock().open_error = Some(error);
    }

    pub fn fail_next_subscribe(&self, error: RemoteError) {
        self.state.lock().subscribe_error = Some(error);
    }

    pub fn fail_next_subscribe_groups(&self, error: RemoteError) {
        self.state.lock().groups_error = Some(error);
    }

    pub fn push_reply(&self, reply: CommandReply) {
        self.state.lock().replies.push_back(reply);
    }

    /// Make `open_object` wait until the returned notify fires.
    pub fn gate_open(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().open_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Make the next `subscribe` wait until the returned notify fires.
    pub fn gate_subscribe(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().subscribe_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Most recent query sent for subscription `id`.
    pub fn last_query(&self, id: &str) -> Option<SubscriptionQuery> {
        self.state.lock().queries.iter().rev().find(|q| q.subscription_id.as_str() == id).cloned()
    }

    pub fn unsubscribes(&self, id: &str) -> usize {
        self.count(|c| matches!(c, Call::Unsubscribe(x) if x == id))
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn matching(&self, query: &SubscriptionQuery) -> Vec<ObjectDetails> {
        let state = self.state.lock();
        state
            .universe
            .iter()
            .filter(|record| {
                query.filters.iter().all(|f| match f.condition {
                    FilterCondition::Equal => record.get(&f.relation_key) == Some(&f.value),
                    _ => true,
                })
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Middleware for FakeMiddleware {
    async fn open_object(&self, context_id: &ContextId) -> Result<ObjectSnapshot, RemoteError> {
        self.record(Call::Open(context_id.to_string()));
        let gate = self.state.lock().open_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.state.lock().open_error.take() {
            return Err(error);
        }
        self.state
            .lock()
            .snapshots
            .get(context_id.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(context_id.to_string()))
    }

    async fn show_object(&self, context_id: &ContextId) -> Result<ObjectSnapshot, RemoteError> {
        self.record(Call::Show(context_id.to_string()));
        self.state
            .lock()
            .snapshots
            .get(context_id.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(context_id.to_string()))
    }

    async fn close_object(&self, context_id: &ContextId) -> Result<(), RemoteError> {
        self.record(Call::Close(context_id.to_string()));
        Ok(())
    }

    async fn perform(
        &self,
        context_id: &ContextId,
        command: BlockCommand,
    ) -> Result<CommandReply, RemoteError> {
        self.record(Call::Perform(context_id.to_string(), command.name()));
        Ok(self.state.lock().replies.pop_front().unwrap_or_default())
    }

    async fn subscribe(&self, query: &SubscriptionQuery) -> Result<SubscriptionSnapshot, RemoteError> {
        self.record(Call::Subscribe { id: query.subscription_id.to_string(), page: query.page });
        self.state.lock().queries.push(query.clone());
        let gate = self.state.lock().subscribe_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.state.lock().subscribe_error.take() {
            return Err(error);
        }
        let matching = self.matching(query);
        let total = matching.len();
        let records = matching.into_iter().take(query.limit()).collect();
        Ok(SubscriptionSnapshot { records, total })
    }

    async fn unsubscribe(&self, ids: &[SubscriptionId]) -> Result<(), RemoteError> {
        for id in ids {
            self.record(Call::Unsubscribe(id.to_string()));
        }
        Ok(())
    }

    async fn subscribe_groups(&self, query: &GroupQuery) -> Result<Vec<Group>, RemoteError> {
        self.record(Call::SubscribeGroups {
            id: query.subscription_id.to_string(),
            relation_key: query.relation_key.clone(),
        });
        if let Some(error) = self.state.lock().groups_error.take() {
            return Err(error);
        }
        Ok(self.state.lock().groups.get(&query.relation_key).cloned().unwrap_or_default())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────────────

/// `root` → [`a`("hi")], the two-block page used across replica tests.
pub fn two_block_page() -> ObjectSnapshot {
    ObjectSnapshot {
        root_id: BlockId::new("root"),
        blocks: vec![Block::smartblock("root").with_children(["a"]), Block::text("a", "hi")],
        ..Default::default()
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
