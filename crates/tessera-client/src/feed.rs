//! Event feed hub.
//!
//! The transport pushes every [`EventBatch`] it receives into one
//! [`EventFeed`]; replicas and the subscription engine each hold their own
//! receiver and filter by context or subscription id. Order per context is
//! the order of `publish` calls.
//!
//! ```text
//!   transport ──publish──▶ EventFeed (broadcast) ──▶ replica "page-1"
//!                                                ──▶ replica "page-2"
//!                                                ──▶ subscription engine
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tessera_types::EventBatch;

/// What a feed consumer sees.
#[derive(Clone, Debug)]
pub enum FeedItem {
    Batch(Arc<EventBatch>),
    /// The receiver fell behind and `n` batches were dropped.
    Lagged(u64),
}

/// Broadcast hub for remote event batches.
#[derive(Clone)]
pub struct EventFeed {
    tx: broadcast::Sender<Arc<EventBatch>>,
}

impl EventFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver a batch to every current receiver. Returns how many received it.
    pub fn publish(&self, batch: EventBatch) -> usize {
        self.tx.send(Arc::new(batch)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventBatch>> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A running consumer task; cancelled on [`FeedTask::stop`] or drop.
pub struct FeedTask {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl FeedTask {
    /// Cancel the consumer and wait for it to finish its current item.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("feed consumer panicked: {e}");
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for FeedTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawn a task feeding every item from `rx` to `handler` until cancelled
/// or the feed closes.
pub fn spawn_consumer<H, Fut>(
    name: String,
    mut rx: broadcast::Receiver<Arc<EventBatch>>,
    mut handler: H,
) -> FeedTask
where
    H: FnMut(FeedItem) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();
    let handle = tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                biased;
                _ = child.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(batch) => FeedItem::Batch(batch),
                    Err(broadcast::error::RecvError::Lagged(n)) => FeedItem::Lagged(n),
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("{name}: feed closed");
                        break;
                    }
                },
            };
            handler(item).await;
        }
    });
    FeedTask { token, handle: Some(handle) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_consumer_receives_in_order_and_stops() {
        let feed = EventFeed::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = spawn_consumer("test".into(), feed.subscribe(), move |item| {
            let tx = tx.clone();
            async move {
                if let FeedItem::Batch(b) = item {
                    let _ = tx.send(b.context_id.to_string());
                }
            }
        });

        feed.publish(EventBatch::new("a", vec![]));
        feed.publish(EventBatch::new("b", vec![]));
        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap(), "b");

        task.stop().await;
        assert_eq!(feed.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_consumer_reports_lag() {
        let feed = EventFeed::new(2);
        let rx = feed.subscribe();
        for i in 0..5 {
            feed.publish(EventBatch::new(format!("c{i}"), vec![]));
        }
        let (tx, mut out) = mpsc::unbounded_channel();
        let task = spawn_consumer("lag".into(), rx, move |item| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(matches!(item, FeedItem::Lagged(_)));
            }
        });
        assert!(out.recv().await.unwrap());
        task.stop().await;
    }
}
