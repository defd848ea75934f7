//! Document replica: one open document kept in sync with the authority.
//!
//! ```text
//!            open()                 close()
//!   Closed ─────────▶ Opening ─▶ Open ─────────▶ Closing ─▶ Closed
//!      │                                                      ▲
//!      └── open_for_preview() ─▶ Preview ───── close() ───────┘
//! ```
//!
//! Lifecycle calls are serialized by an async lock, so a `close()` issued
//! while `open()` is awaiting the authority waits for the open reply and then
//! unregisters. Event application never suspends: the feed consumer takes
//! the document lock, applies one batch, publishes its coalesced signals and
//! releases the lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{Instrument, debug, error, info, warn};

use tessera_store::{BatchOutcome, DetailsCache, DocumentState, StoreError, UpdateSignal};
use tessera_types::{Block, BlockId, ContextId, EventBatch, EventMessage};

use crate::config::ClientConfig;
use crate::feed::{EventFeed, FeedItem, FeedTask, spawn_consumer};
use crate::remote::{BlockCommand, CommandReply, Middleware, RemoteError};

// ============================================================================
// Error Types
// ============================================================================

/// Why [`DocumentReplica::open`] failed.
#[derive(Debug, thiserror::Error)]
pub enum DocumentOpenError {
    #[error("remote open failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("authority returned no blocks")]
    EmptySnapshot,
    #[error("snapshot is not a tree: {0}")]
    Structural(#[from] StoreError),
    #[error("replica was closed while opening")]
    Closing,
}

/// Why [`DocumentReplica::perform`] failed.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("remote command failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("document {0} is not open")]
    NotOpen(ContextId),
}

// ============================================================================
// State
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReplicaState {
    #[default]
    Closed,
    Opening,
    Open,
    /// Loaded once without live events.
    Preview,
    Closing,
}

/// Read-only view of a loaded document.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaSnapshot {
    pub root_id: BlockId,
    /// Reachable blocks in pre-order, root first.
    pub blocks: Vec<Block>,
    pub restrictions: Vec<String>,
}

/// State touched by both the caller and the feed consumer.
struct Shared {
    doc: Mutex<DocumentState>,
    state: Mutex<ReplicaState>,
    signal_tx: broadcast::Sender<UpdateSignal>,
    stale: AtomicBool,
}

impl Shared {
    fn set_state(&self, next: ReplicaState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!("{:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn publish(&self, signal: UpdateSignal) {
        // No receivers is fine; the UI may not be listening yet.
        let _ = self.signal_tx.send(signal);
    }

    fn apply(&self, events: &[EventMessage]) -> BatchOutcome {
        let outcome = self.doc.lock().apply_batch(events);
        for signal in &outcome.signals {
            self.publish(signal.clone());
        }
        outcome
    }

    fn snapshot(&self, restrictions: &[String]) -> Option<ReplicaSnapshot> {
        let doc = self.doc.lock();
        let root_id = doc.root_id()?.clone();
        let blocks = doc.index().order().iter().filter_map(|id| doc.get(id)).collect();
        Some(ReplicaSnapshot { root_id, blocks, restrictions: restrictions.to_vec() })
    }
}

#[derive(Default)]
struct Lifecycle {
    consumer: Option<FeedTask>,
    restrictions: Vec<String>,
}

// ============================================================================
// DocumentReplica
// ============================================================================

pub struct DocumentReplica {
    context_id: ContextId,
    remote: Arc<dyn Middleware>,
    feed: EventFeed,
    shared: Arc<Shared>,
    closing: AtomicBool,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl DocumentReplica {
    pub fn new(
        context_id: ContextId,
        remote: Arc<dyn Middleware>,
        feed: EventFeed,
        details: Arc<DetailsCache>,
        config: &ClientConfig,
    ) -> Self {
        let (signal_tx, _) = broadcast::channel(config.signal_capacity.max(1));
        let shared = Arc::new(Shared {
            doc: Mutex::new(DocumentState::new(context_id.clone(), details)),
            state: Mutex::new(ReplicaState::Closed),
            signal_tx,
            stale: AtomicBool::new(false),
        });
        Self {
            context_id,
            remote,
            feed,
            shared,
            closing: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
        }
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    pub fn state(&self) -> ReplicaState {
        *self.shared.state.lock()
    }

    /// Whether the feed dropped events for this replica since it was opened.
    pub fn is_stale(&self) -> bool {
        self.shared.stale.load(Ordering::Acquire)
    }

    /// Receive update signals published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateSignal> {
        self.shared.signal_tx.subscribe()
    }

    pub fn details(&self) -> Arc<DetailsCache> {
        self.shared.doc.lock().details().clone()
    }

    pub fn root_id(&self) -> Option<BlockId> {
        self.shared.doc.lock().root_id().cloned()
    }

    pub fn get(&self, id: &str) -> Option<Block> {
        self.shared.doc.lock().get(id)
    }

    /// Run `f` against the document under its lock. Keep `f` short.
    pub fn with_document<R>(&self, f: impl FnOnce(&DocumentState) -> R) -> R {
        f(&self.shared.doc.lock())
    }

    /// Renderable block ids: pre-order, root excluded, children of
    /// collapsed toggles hidden.
    pub fn visible_blocks(&self, expanded: &HashSet<BlockId>) -> Vec<BlockId> {
        let doc = self.shared.doc.lock();
        doc.index().flatten_visible(doc.blocks(), expanded)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Open for live editing and start applying feed events.
    ///
    /// A second call while open returns the current snapshot without
    /// contacting the authority.
    pub async fn open(&self) -> Result<ReplicaSnapshot, DocumentOpenError> {
        let span = tessera_telemetry::replica_span(&self.context_id, "open");
        self.open_inner().instrument(span).await
    }

    async fn open_inner(&self) -> Result<ReplicaSnapshot, DocumentOpenError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state() == ReplicaState::Open {
            if let Some(snapshot) = self.shared.snapshot(&lifecycle.restrictions) {
                debug!("already open");
                return Ok(snapshot);
            }
        }
        if self.state() == ReplicaState::Preview {
            self.shared.doc.lock().clear();
        }

        self.shared.set_state(ReplicaState::Opening);
        // Subscribe before asking so nothing pushed after the snapshot is lost.
        let rx = self.feed.subscribe();

        let reply = match self.remote.open_object(&self.context_id).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("open failed: {e}");
                self.shared.set_state(ReplicaState::Closed);
                return Err(e.into());
            }
        };

        if reply.blocks.is_empty() {
            warn!("authority returned an empty snapshot");
            self.release_remote().await;
            self.shared.set_state(ReplicaState::Closed);
            return Err(DocumentOpenError::EmptySnapshot);
        }

        let loaded = self.shared.doc.lock().load(
            reply.root_id,
            reply.blocks,
            reply.details,
            reply.relation_links,
        );
        let report = match loaded {
            Ok(report) => report,
            Err(e) => {
                warn!("snapshot rejected: {e}");
                self.release_remote().await;
                self.shared.set_state(ReplicaState::Closed);
                return Err(e.into());
            }
        };
        for anomaly in &report.anomalies {
            warn!("snapshot anomaly: {anomaly}");
        }

        if self.closing.load(Ordering::Acquire) {
            info!("close requested during open; unregistering");
            self.release_remote().await;
            self.shared.doc.lock().clear();
            self.shared.set_state(ReplicaState::Closed);
            return Err(DocumentOpenError::Closing);
        }

        self.shared.stale.store(false, Ordering::Release);
        lifecycle.restrictions = reply.restrictions;
        lifecycle.consumer = Some(self.spawn_feed_consumer(rx));
        self.shared.set_state(ReplicaState::Open);
        self.shared.publish(UpdateSignal::General);
        info!(blocks = report.index.len(), "opened");

        self.loaded_snapshot(&lifecycle.restrictions)
    }

    /// Load once without registering for live events.
    pub async fn open_for_preview(&self) -> Result<ReplicaSnapshot, DocumentOpenError> {
        let span = tessera_telemetry::replica_span(&self.context_id, "preview");
        async {
            let mut lifecycle = self.lifecycle.lock().await;
            if matches!(self.state(), ReplicaState::Open | ReplicaState::Preview) {
                if let Some(snapshot) = self.shared.snapshot(&lifecycle.restrictions) {
                    return Ok(snapshot);
                }
            }

            let reply = self.remote.show_object(&self.context_id).await?;
            if reply.blocks.is_empty() {
                return Err(DocumentOpenError::EmptySnapshot);
            }
            let report = self.shared.doc.lock().load(
                reply.root_id,
                reply.blocks,
                reply.details,
                reply.relation_links,
            )?;
            for anomaly in &report.anomalies {
                warn!("snapshot anomaly: {anomaly}");
            }

            lifecycle.restrictions = reply.restrictions;
            self.shared.set_state(ReplicaState::Preview);
            self.shared.publish(UpdateSignal::General);
            self.loaded_snapshot(&lifecycle.restrictions)
        }
        .instrument(span)
        .await
    }

    /// Unregister from the authority and release the block tree.
    ///
    /// Safe on a replica that is already closed or was never opened. Local
    /// state is released even if the remote close fails.
    pub async fn close(&self) {
        let span = tessera_telemetry::replica_span(&self.context_id, "close");
        async {
            self.closing.store(true, Ordering::Release);
            let mut lifecycle = self.lifecycle.lock().await;

            match self.state() {
                ReplicaState::Closed => {}
                ReplicaState::Preview => {
                    self.shared.doc.lock().clear();
                    self.shared.set_state(ReplicaState::Closed);
                }
                ReplicaState::Open | ReplicaState::Opening | ReplicaState::Closing => {
                    self.shared.set_state(ReplicaState::Closing);
                    if let Some(consumer) = lifecycle.consumer.take() {
                        consumer.stop().await;
                    }
                    self.release_remote().await;
                    self.shared.doc.lock().clear();
                    self.shared.set_state(ReplicaState::Closed);
                    info!("closed");
                }
            }

            lifecycle.restrictions.clear();
            self.closing.store(false, Ordering::Release);
        }
        .instrument(span)
        .await
    }

    fn loaded_snapshot(&self, restrictions: &[String]) -> Result<ReplicaSnapshot, DocumentOpenError> {
        self.shared.snapshot(restrictions).ok_or_else(|| {
            DocumentOpenError::Structural(StoreError::RootNotFound(BlockId::new(
                self.context_id.as_str(),
            )))
        })
    }

    async fn release_remote(&self) {
        if let Err(e) = self.remote.close_object(&self.context_id).await {
            warn!("remote close failed: {e}");
        }
    }

    fn spawn_feed_consumer(
        &self,
        rx: broadcast::Receiver<Arc<EventBatch>>,
    ) -> FeedTask {
        let shared = Arc::clone(&self.shared);
        let context_id = self.context_id.clone();
        let span = tessera_telemetry::replica_span(&self.context_id, "apply");
        spawn_consumer(format!("replica {}", self.context_id), rx, move |item| {
            let shared = Arc::clone(&shared);
            let context_id = context_id.clone();
            let span = span.clone();
            async move {
                span.in_scope(|| match item {
                    FeedItem::Batch(batch) if batch.context_id == context_id => {
                        let outcome = shared.apply(&batch.messages);
                        if !outcome.is_clean() {
                            debug!(
                                skipped = outcome.skipped.len(),
                                anomalies = outcome.anomalies.len(),
                                dangling = outcome.dangling.len(),
                                "batch applied with anomalies"
                            );
                        }
                    }
                    FeedItem::Batch(_) => {}
                    FeedItem::Lagged(n) => {
                        error!("feed lagged, {n} batches dropped; replica is stale");
                        shared.stale.store(true, Ordering::Release);
                        shared.publish(UpdateSignal::General);
                    }
                })
            }
        })
    }

    // ── Events & commands ───────────────────────────────────────────────

    /// Apply events directly (bypassing the feed) and publish their signals.
    pub fn apply_events(&self, events: &[EventMessage]) -> BatchOutcome {
        self.shared.apply(events)
    }

    /// Send a block command and apply the events the authority replies with.
    pub async fn perform(&self, command: BlockCommand) -> Result<CommandReply, CommandError> {
        if self.state() != ReplicaState::Open {
            return Err(CommandError::NotOpen(self.context_id.clone()));
        }
        let name = command.name();
        let span = tessera_telemetry::replica_span(&self.context_id, "perform");
        async {
            let reply = self.remote.perform(&self.context_id, command).await.map_err(|e| {
                warn!("{name} failed: {e}");
                e
            })?;
            let outcome = self.shared.apply(&reply.events);
            debug!(command = name, signals = outcome.signals.len(), "command applied");
            Ok::<_, CommandError>(reply)
        }
        .instrument(span)
        .await
    }
}
