//! Document replica lifecycle and event application against a fake middleware.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use common::{Call, FakeMiddleware, eventually, two_block_page};
use tessera_client::{
    BlockCommand, ClientConfig, CommandError, CommandReply, DetailsCache, DocumentOpenError,
    DocumentReplica, EventFeed, ObjectSnapshot, RemoteError, ReplicaState, UpdateSignal,
};
use tessera_types::{BlockId, DetailPatch, EventBatch, EventMessage};

fn replica(remote: &Arc<FakeMiddleware>, feed: &EventFeed) -> DocumentReplica {
    tessera_telemetry::try_init_for_tests();
    DocumentReplica::new(
        "page".into(),
        remote.clone(),
        feed.clone(),
        Arc::new(DetailsCache::default()),
        &ClientConfig::default(),
    )
}

fn set_text(id: &str, text: &str) -> EventMessage {
    EventMessage::BlockSetText {
        id: BlockId::new(id),
        text: Some(text.to_string()),
        style: None,
        marks: None,
        checked: None,
        color: None,
        icon_emoji: None,
    }
}

async fn next_signal(rx: &mut broadcast::Receiver<UpdateSignal>) -> UpdateSignal {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("signal timed out")
        .expect("signal channel closed")
}

fn text_of(replica: &DocumentReplica, id: &str) -> Option<String> {
    replica.get(id).and_then(|b| b.text_content().map(|t| t.text.clone()))
}

#[tokio::test]
async fn test_edit_then_delete_scenario() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);

    let snapshot = replica.open().await.unwrap();
    assert_eq!(snapshot.root_id, BlockId::new("root"));
    assert_eq!(snapshot.blocks.len(), 2);
    let mut rx = replica.subscribe();

    feed.publish(EventBatch::new("page", vec![set_text("a", "hello")]));
    assert_eq!(next_signal(&mut rx).await, UpdateSignal::block(BlockId::new("a")));
    assert_eq!(text_of(&replica, "a").as_deref(), Some("hello"));

    feed.publish(EventBatch::new(
        "page",
        vec![
            EventMessage::BlockDelete { block_ids: vec![BlockId::new("a")] },
            EventMessage::BlockSetChildrenIds { id: BlockId::new("root"), children_ids: vec![] },
        ],
    ));
    assert_eq!(next_signal(&mut rx).await, UpdateSignal::General);
    assert!(replica.get("a").is_none());
    assert!(replica.get("root").unwrap().children_ids.is_empty());
}

#[tokio::test]
async fn test_layout_amend_publishes_general() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);
    replica.open().await.unwrap();
    let mut rx = replica.subscribe();

    feed.publish(EventBatch::new(
        "page",
        vec![EventMessage::ObjectDetailsAmend {
            id: "x".into(),
            details: vec![DetailPatch::new("layout", "todo")],
            subscription_ids: vec![],
        }],
    ));
    assert_eq!(next_signal(&mut rx).await, UpdateSignal::General);
    assert_eq!(replica.details().get("x").unwrap().string("layout"), Some("todo"));
}

#[tokio::test]
async fn test_batch_coalesces_block_signals() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);
    replica.open().await.unwrap();
    let mut rx = replica.subscribe();

    feed.publish(EventBatch::new(
        "page",
        vec![set_text("a", "one"), set_text("a", "two"), set_text("a", "three")],
    ));
    assert_eq!(next_signal(&mut rx).await, UpdateSignal::block(BlockId::new("a")));
    assert_eq!(text_of(&replica, "a").as_deref(), Some("three"));
    assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
}

#[tokio::test]
async fn test_other_contexts_are_ignored() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);
    replica.open().await.unwrap();
    let mut rx = replica.subscribe();

    feed.publish(EventBatch::new("elsewhere", vec![set_text("a", "wrong")]));
    feed.publish(EventBatch::new("page", vec![set_text("a", "right")]));
    assert_eq!(next_signal(&mut rx).await, UpdateSignal::block(BlockId::new("a")));
    assert_eq!(text_of(&replica, "a").as_deref(), Some("right"));
}

#[tokio::test]
async fn test_second_open_reuses_snapshot() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);

    let first = replica.open().await.unwrap();
    let second = replica.open().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(remote.count(|c| matches!(c, Call::Open(_))), 1);
    assert_eq!(replica.state(), ReplicaState::Open);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);

    replica.close().await;
    assert!(remote.calls().is_empty());

    replica.open().await.unwrap();
    replica.close().await;
    replica.close().await;
    assert_eq!(remote.count(|c| matches!(c, Call::Close(_))), 1);
    assert_eq!(replica.state(), ReplicaState::Closed);
    assert!(replica.root_id().is_none());
    assert!(eventually(|| feed.receiver_count() == 0).await);
}

#[tokio::test]
async fn test_open_failure_is_typed() {
    let remote = FakeMiddleware::new();
    remote.fail_next_open(RemoteError::Transport("connection reset".into()));
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);

    let err = replica.open().await.unwrap_err();
    assert!(matches!(err, DocumentOpenError::Remote(RemoteError::Transport(_))));
    assert_eq!(replica.state(), ReplicaState::Closed);
}

#[tokio::test]
async fn test_empty_snapshot_fails_and_unregisters() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", ObjectSnapshot { root_id: "root".into(), ..Default::default() });
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);

    let err = replica.open().await.unwrap_err();
    assert!(matches!(err, DocumentOpenError::EmptySnapshot));
    assert_eq!(remote.calls(), vec![Call::Open("page".into()), Call::Close("page".into())]);
}

#[tokio::test]
async fn test_missing_root_is_structural() {
    let remote = FakeMiddleware::new();
    let mut snapshot = two_block_page();
    snapshot.root_id = "nope".into();
    remote.set_snapshot("page", snapshot);
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);

    let err = replica.open().await.unwrap_err();
    assert!(matches!(err, DocumentOpenError::Structural(_)));
    assert_eq!(remote.count(|c| matches!(c, Call::Close(_))), 1);
}

#[tokio::test]
async fn test_preview_never_registers() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);

    let snapshot = replica.open_for_preview().await.unwrap();
    assert_eq!(snapshot.blocks.len(), 2);
    assert_eq!(replica.state(), ReplicaState::Preview);
    assert_eq!(feed.receiver_count(), 0);

    replica.close().await;
    assert_eq!(remote.calls(), vec![Call::Show("page".into())]);
    assert_eq!(replica.state(), ReplicaState::Closed);
}

#[tokio::test]
async fn test_close_during_open_unregisters_once() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let gate = remote.gate_open();
    let feed = EventFeed::new(64);
    let replica = Arc::new(replica(&remote, &feed));

    let opener = tokio::spawn({
        let replica = Arc::clone(&replica);
        async move { replica.open().await }
    });
    assert!(eventually(|| remote.count(|c| matches!(c, Call::Open(_))) == 1).await);

    let closer = tokio::spawn({
        let replica = Arc::clone(&replica);
        async move { replica.close().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.notify_one();

    let opened = opener.await.unwrap();
    closer.await.unwrap();
    assert!(matches!(opened, Err(DocumentOpenError::Closing)));
    assert_eq!(remote.count(|c| matches!(c, Call::Close(_))), 1);
    assert_eq!(replica.state(), ReplicaState::Closed);
    assert!(replica.root_id().is_none());
}

#[tokio::test]
async fn test_lagged_feed_marks_stale() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    let feed = EventFeed::new(2);
    let replica = replica(&remote, &feed);
    replica.open().await.unwrap();
    let mut rx = replica.subscribe();
    assert!(!replica.is_stale());

    // No await between publishes, so the consumer cannot keep up.
    for _ in 0..8 {
        feed.publish(EventBatch::new("page", vec![]));
    }
    assert_eq!(next_signal(&mut rx).await, UpdateSignal::General);
    assert!(replica.is_stale());
}

#[tokio::test]
async fn test_perform_applies_reply() {
    let remote = FakeMiddleware::new();
    remote.set_snapshot("page", two_block_page());
    remote.push_reply(CommandReply { events: vec![set_text("a", "typed")], block_ids: vec![] });
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);
    replica.open().await.unwrap();

    let command = BlockCommand::SetText { block_id: "a".into(), text: "typed".into() };
    replica.perform(command).await.unwrap();
    assert_eq!(text_of(&replica, "a").as_deref(), Some("typed"));
    assert!(remote.calls().contains(&Call::Perform("page".into(), "setText")));
}

#[tokio::test]
async fn test_perform_requires_open() {
    let remote = FakeMiddleware::new();
    let feed = EventFeed::new(64);
    let replica = replica(&remote, &feed);

    let command = BlockCommand::Delete { block_ids: vec!["a".into()] };
    let err = replica.perform(command).await.unwrap_err();
    assert!(matches!(err, CommandError::NotOpen(_)));
    assert!(remote.calls().is_empty());
}
