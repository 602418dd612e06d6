//! Session lifecycle and command dispatch, driven over a scripted
//! in-memory channel.
//!
//! The fake channel emulates the authoritative server: commands mutate its
//! item list and echo back as change events, exactly one update stream per
//! channel. Tests then observe everything the presentation layer would:
//! the mirror, the connection state, and the status line.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use punchlist_client::{
    Channel, ChannelError, ChangeEvent, ClientError, ConnectionState, ItemId, Session, TaskItem,
    TransportError, UpdateStream,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

// ============================================================================
// Scripted channel
// ============================================================================

struct FakeChannel {
    items: Mutex<Vec<TaskItem>>,
    next_id: AtomicU64,
    fail_snapshot: bool,
    event_tx: mpsc::UnboundedSender<Result<ChangeEvent, TransportError>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<ChangeEvent, TransportError>>>>,
}

impl FakeChannel {
    fn new(seed: Vec<TaskItem>) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let next_id = seed.iter().map(|i| i.id.as_u64()).max().unwrap_or(0) + 1;
        Arc::new(Self {
            items: Mutex::new(seed),
            next_id: AtomicU64::new(next_id),
            fail_snapshot: false,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    fn failing_snapshot() -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fail_snapshot: true,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    /// Push a raw event at the client, as the server would. Returns false
    /// once the listening loop is gone.
    fn push(&self, event: ChangeEvent) -> bool {
        self.event_tx.send(Ok(event)).is_ok()
    }

    fn push_error(&self, message: &str) {
        let _ = self.event_tx.send(Err(TransportError::new(message)));
    }
}

#[async_trait]
impl Channel for FakeChannel {
    async fn get_snapshot(&self) -> Result<Vec<TaskItem>, TransportError> {
        if self.fail_snapshot {
            return Err(TransportError::new("snapshot refused"));
        }
        Ok(self.items.lock().clone())
    }

    async fn create(&self, description: &str) -> Result<TaskItem, TransportError> {
        let item = TaskItem::new(self.next_id.fetch_add(1, Ordering::Relaxed), description);
        self.items.lock().push(item.clone());
        let _ = self.event_tx.send(Ok(ChangeEvent::Added(item.clone())));
        Ok(item)
    }

    async fn set_completed(&self, id: ItemId) -> Result<(), ChannelError> {
        let mut items = self.items.lock();
        match items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.completed = !item.completed;
                let _ = self.event_tx.send(Ok(ChangeEvent::Updated(item.clone())));
                Ok(())
            }
            None => Err(ChannelError::NotFound(id)),
        }
    }

    async fn subscribe_updates(&self) -> Result<UpdateStream, TransportError> {
        let rx = self
            .event_rx
            .lock()
            .take()
            .ok_or_else(|| TransportError::new("update stream already claimed"))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn item(id: u64, description: &str) -> TaskItem {
    TaskItem::new(id, description)
}

/// Opt-in logging: `RUST_LOG=punchlist_client=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Poll until `check` passes; events are applied by a background task, so
/// observation is eventually-consistent.
async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn wait_for_state(session: &Session, want: impl Fn(&ConnectionState) -> bool) {
    let mut rx = session.watch_state();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if want(&current) {
                return;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("state did not transition in time");
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn connect_loads_snapshot_before_declaring_connected() {
    init_tracing();
    let server = FakeChannel::new(vec![item(1, "a"), item(2, "b")]);
    let session = Session::new();

    session.connect_with(server.clone()).await.unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    let ids: Vec<u64> = session.items().iter().map(|i| i.id.as_u64()).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn snapshot_failure_parks_the_session_in_failed() {
    let server = FakeChannel::failing_snapshot();
    let session = Session::new();

    let err = session.connect_with(server).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert!(matches!(session.state(), ConnectionState::Failed(_)));
}

#[tokio::test]
async fn streamed_events_reach_the_mirror() {
    let server = FakeChannel::new(vec![item(1, "a")]);
    let session = Session::new();
    session.connect_with(server.clone()).await.unwrap();

    assert!(server.push(ChangeEvent::Added(item(2, "b"))));
    let mirror = session.mirror();
    wait_until("item 2 to appear", || mirror.contains(ItemId::new(2))).await;

    assert!(server.push(ChangeEvent::Deleted(item(1, "a"))));
    wait_until("item 1 to vanish", || !mirror.contains(ItemId::new(1))).await;

    let ids: Vec<u64> = session.items().iter().map(|i| i.id.as_u64()).collect();
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn stream_failure_keeps_last_known_contents() {
    let server = FakeChannel::new(vec![item(1, "a"), item(2, "b")]);
    let session = Session::new();
    session.connect_with(server.clone()).await.unwrap();

    server.push_error("link reset");
    wait_for_state(&session, |s| matches!(s, ConnectionState::Failed(_))).await;

    // The mirror is not cleared on failure — only a fresh connect replaces it.
    assert_eq!(session.items().len(), 2);
}

#[tokio::test]
async fn disconnect_clears_the_mirror_and_is_idempotent() {
    let server = FakeChannel::new(vec![item(1, "a")]);
    let session = Session::new();
    session.connect_with(server.clone()).await.unwrap();
    assert_eq!(session.items().len(), 1);

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.items().is_empty());

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // The old loop is gone: the server's pushes land nowhere.
    assert!(!server.push(ChangeEvent::Added(item(9, "late"))));
}

#[tokio::test]
async fn reconnect_replaces_the_mirror_and_retires_the_old_loop() {
    let first = FakeChannel::new(vec![item(1, "a")]);
    let second = FakeChannel::new(vec![item(5, "e"), item(6, "f")]);
    let session = Session::new();

    session.connect_with(first.clone()).await.unwrap();
    assert_eq!(session.items().len(), 1);

    session.connect_with(second.clone()).await.unwrap();
    let ids: Vec<u64> = session.items().iter().map(|i| i.id.as_u64()).collect();
    assert_eq!(ids, vec![5, 6]);

    // connect_with awaited the previous loop's exit before starting the new
    // one, so the old channel has no listener left to confuse the mirror.
    assert!(!first.push(ChangeEvent::Added(item(9, "stale"))));
    assert!(!session.mirror().contains(ItemId::new(9)));
}

#[tokio::test]
async fn reconnect_after_failure_resyncs() {
    let first = FakeChannel::new(vec![item(1, "a")]);
    let session = Session::new();
    session.connect_with(first.clone()).await.unwrap();

    first.push_error("link reset");
    wait_for_state(&session, |s| matches!(s, ConnectionState::Failed(_))).await;

    let second = FakeChannel::new(vec![item(1, "a"), item(2, "b")]);
    session.connect_with(second).await.unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.items().len(), 2);
}

// ============================================================================
// Command dispatch
// ============================================================================

#[tokio::test]
async fn create_then_toggle_round_trips_through_events() {
    // Spec scenario: empty server, create "buy milk", toggle it.
    let server = FakeChannel::new(Vec::new());
    let session = Session::new();
    session.connect_with(server.clone()).await.unwrap();
    assert!(session.items().is_empty());

    let created = session.create_item("buy milk").await.unwrap();
    assert_eq!(created.id, ItemId::new(1));
    assert!(!created.completed);

    // The mirror learns about the item from the Added event, not the reply.
    let mirror = session.mirror();
    wait_until("created item to be mirrored", || {
        mirror.contains(ItemId::new(1))
    })
    .await;
    assert_eq!(session.items().len(), 1);

    session.set_completed(ItemId::new(1)).await.unwrap();
    wait_until("completion to be mirrored", || {
        mirror.get(ItemId::new(1)).is_some_and(|i| i.completed)
    })
    .await;
}

#[tokio::test]
async fn toggling_a_stale_id_reports_not_found() {
    let server = FakeChannel::new(vec![item(1, "a")]);
    let session = Session::new();
    session.connect_with(server).await.unwrap();

    let err = session.set_completed(ItemId::new(99)).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(id) if id == ItemId::new(99)));

    // The failed command altered nothing.
    assert_eq!(session.items().len(), 1);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn command_failures_do_not_tear_down_the_stream() {
    let server = FakeChannel::new(vec![item(1, "a")]);
    let session = Session::new();
    session.connect_with(server.clone()).await.unwrap();

    let _ = session.set_completed(ItemId::new(99)).await.unwrap_err();

    // Streaming continues after the per-command error.
    assert!(server.push(ChangeEvent::Added(item(2, "b"))));
    let mirror = session.mirror();
    wait_until("stream to keep flowing", || mirror.contains(ItemId::new(2))).await;
    assert_eq!(session.state(), ConnectionState::Connected);
}

// ============================================================================
// Fire-and-forget surface
// ============================================================================

#[tokio::test]
async fn submit_create_reports_errors_via_status_line() {
    let session = Session::new();

    session.submit_create("buy milk");
    let mut status = session.watch_status();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let line = status.borrow_and_update().clone();
            if line.contains("create failed") {
                return;
            }
            status.changed().await.expect("status channel closed");
        }
    })
    .await
    .expect("failure never surfaced in the status line");

    // The error stayed out of the connection state machine.
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn submit_toggle_feeds_the_mirror_through_the_stream() {
    let server = FakeChannel::new(vec![item(1, "a")]);
    let session = Session::new();
    session.connect_with(server).await.unwrap();

    session.submit_toggle(ItemId::new(1));
    let mirror = session.mirror();
    wait_until("toggle to be mirrored", || {
        mirror.get(ItemId::new(1)).is_some_and(|i| i.completed)
    })
    .await;
}
