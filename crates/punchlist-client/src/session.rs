//! Connection lifecycle and command dispatch.
//!
//! A [`Session`] owns at most one live connection at a time: the channel and
//! the reconciler task are acquired together on `connect` and released
//! together on `disconnect` or failure. Consumers read the mirror and the
//! observable [`ConnectionState`]; they never mutate either.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --snapshot ok--> Connected
//!      ^                        |                          |
//!      |                        | open/snapshot error      | stream error,
//!      +------disconnect--------+------> Failed <----------+ server close
//! ```
//!
//! There is no automatic retry: a failure parks the session in `Failed` and
//! reconnection is caller-triggered by invoking `connect` again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use punchlist_types::{ItemId, TaskItem};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{Channel, UpdateStream};
use crate::constants::{CONNECT_TIMEOUT, DEFAULT_ADDRESS};
use crate::error::ClientError;
use crate::mirror::{Mirror, MirrorEvent};
use crate::reconciler::{Reconciler, StreamEnd};
use crate::wire;

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// Connection lifecycle state.
///
/// Owned exclusively by the session; consumers read it via
/// [`Session::state`] or watch it via [`Session::watch_state`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// State shared with the reconciler task and fire-and-forget commands.
struct SessionShared {
    mirror: Arc<Mirror>,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: watch::Sender<String>,
}

impl SessionShared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn set_status(&self, status: impl Into<String>) {
        self.status_tx.send_replace(status.into());
    }

    /// Record a connection-level failure: observable state plus status text.
    fn fail(&self, reason: String) {
        warn!(%reason, "connection failed");
        self.set_status(reason.clone());
        self.set_state(ConnectionState::Failed(reason));
    }

    fn fail_with(&self, reason: String) -> ClientError {
        self.fail(reason.clone());
        ClientError::Transport(reason)
    }
}

/// Held by the session while connected. Channel and reconciler task are
/// released together.
struct ActiveConnection {
    channel: Arc<dyn Channel>,
    cancel: CancellationToken,
    listener: JoinHandle<()>,
}

impl ActiveConnection {
    /// Stop the reconciler loop and wait for it to fully exit, then drop
    /// the channel. A new loop must never start while an old one can still
    /// touch the mirror.
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.listener.await {
            warn!(error = %e, "reconciler task did not exit cleanly");
        }
    }
}

/// A mirror-keeping client session.
///
/// Cheap to clone; all clones share the same mirror and connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
    conn: Arc<tokio::sync::Mutex<Option<ActiveConnection>>>,
}

impl Session {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (status_tx, _) = watch::channel(String::from("disconnected"));
        Self {
            shared: Arc::new(SessionShared {
                mirror: Arc::new(Mirror::new()),
                state_tx,
                status_tx,
            }),
            conn: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Connect to a server over the default wire transport.
    ///
    /// Tears down any previous connection first, then opens the channel,
    /// loads the snapshot, and only then starts the streaming loop and
    /// declares `Connected`.
    pub async fn connect(&self, config: &ClientConfig) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        if let Some(previous) = conn.take() {
            previous.shutdown().await;
        }
        self.shared.set_state(ConnectionState::Connecting);
        self.shared.set_status(format!("connecting to {}", config.address));

        let open = wire::WireChannel::connect(&config.address);
        let channel: Arc<dyn Channel> =
            match tokio::time::timeout(config.connect_timeout, open).await {
                Ok(Ok(channel)) => Arc::new(channel),
                Ok(Err(e)) => return Err(self.shared.fail_with(format!("connect failed: {e}"))),
                Err(_) => {
                    return Err(self
                        .shared
                        .fail_with(format!("connect to {} timed out", config.address)));
                }
            };

        self.establish(&mut conn, channel).await
    }

    /// Drive the same lifecycle over an already-open channel.
    ///
    /// This is the seam for tests and for alternative transports.
    pub async fn connect_with(&self, channel: Arc<dyn Channel>) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        if let Some(previous) = conn.take() {
            previous.shutdown().await;
        }
        self.shared.set_state(ConnectionState::Connecting);
        self.shared.set_status("connecting");
        self.establish(&mut conn, channel).await
    }

    /// Snapshot-then-stream over an open channel. Caller holds the
    /// connection lock, so no other loop can exist concurrently.
    async fn establish(
        &self,
        conn: &mut Option<ActiveConnection>,
        channel: Arc<dyn Channel>,
    ) -> Result<(), ClientError> {
        // Claim the update stream before snapshotting: events raised while
        // the snapshot is in flight buffer in the channel and are reconciled
        // once the baseline lands. The protocol carries no resume token, so
        // an event can still slip between the server answering the snapshot
        // and registering the subscription; the reconciler's replay rules
        // absorb what this window lets through.
        let updates = match channel.subscribe_updates().await {
            Ok(updates) => updates,
            Err(e) => return Err(self.shared.fail_with(format!("subscribe failed: {e}"))),
        };
        let snapshot = match channel.get_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.shared.fail_with(format!("snapshot failed: {e}"))),
        };
        let count = snapshot.len();
        self.shared.mirror.replace_all(snapshot);

        let cancel = CancellationToken::new();
        let listener = tokio::spawn(listen(self.shared.clone(), updates, cancel.clone()));
        *conn = Some(ActiveConnection {
            channel,
            cancel,
            listener,
        });

        info!(items = count, "connected");
        self.shared.set_state(ConnectionState::Connected);
        self.shared.set_status("connected");
        Ok(())
    }

    /// Stop streaming, close the channel, and empty the mirror.
    ///
    /// Idempotent: disconnecting an already-disconnected session is a no-op.
    pub async fn disconnect(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(active) = conn.take() {
            active.shutdown().await;
        }
        let already_disconnected =
            *self.shared.state_tx.borrow() == ConnectionState::Disconnected;
        if !already_disconnected {
            self.shared.mirror.clear();
            self.shared.set_state(ConnectionState::Disconnected);
            self.shared.set_status("disconnected");
            info!("disconnected");
        }
    }

    // ── Command dispatch ─────────────────────────────────────────────────

    /// Create a new item on the server.
    ///
    /// The mirror is not touched here — it picks the item up when the
    /// server's `Added` event arrives, keeping a single reconciliation path.
    pub async fn create_item(&self, description: &str) -> Result<TaskItem, ClientError> {
        if description.trim().is_empty() {
            return Err(ClientError::Validation(
                "description must not be empty".into(),
            ));
        }
        let channel = self.active_channel().await?;
        let item = channel.create(description).await.map_err(ClientError::from)?;
        debug!(id = %item.id, "created item");
        Ok(item)
    }

    /// Toggle the completion state of an existing item on the server.
    ///
    /// `NotFound` means the local view was stale; the mirror is left alone
    /// (a `Deleted` event has either already fixed it or soon will).
    pub async fn set_completed(&self, id: ItemId) -> Result<(), ClientError> {
        let channel = self.active_channel().await?;
        channel.set_completed(id).await.map_err(ClientError::from)?;
        debug!(%id, "toggled item");
        Ok(())
    }

    /// Fire-and-forget [`create_item`](Self::create_item); failures land in
    /// the status line instead of a return value.
    pub fn submit_create(&self, description: impl Into<String>) {
        let session = self.clone();
        let description = description.into();
        tokio::spawn(async move {
            if let Err(e) = session.create_item(&description).await {
                warn!(error = %e, "create failed");
                session.shared.set_status(format!("create failed: {e}"));
            }
        });
    }

    /// Fire-and-forget [`set_completed`](Self::set_completed); failures land
    /// in the status line instead of a return value.
    pub fn submit_toggle(&self, id: ItemId) {
        let session = self.clone();
        tokio::spawn(async move {
            if let Err(e) = session.set_completed(id).await {
                warn!(%id, error = %e, "toggle failed");
                session
                    .shared
                    .set_status(format!("toggle failed for item {id}: {e}"));
            }
        });
    }

    // ── Observation ──────────────────────────────────────────────────────

    /// The shared mirror.
    pub fn mirror(&self) -> Arc<Mirror> {
        self.shared.mirror.clone()
    }

    /// All items, in mirror order.
    pub fn items(&self) -> Vec<TaskItem> {
        self.shared.mirror.items()
    }

    /// Subscribe to mirror change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.shared.mirror.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Current human-readable status line.
    pub fn status(&self) -> String {
        self.shared.status_tx.borrow().clone()
    }

    /// Watch status line updates.
    pub fn watch_status(&self) -> watch::Receiver<String> {
        self.shared.status_tx.subscribe()
    }

    async fn active_channel(&self) -> Result<Arc<dyn Channel>, ClientError> {
        let conn = self.conn.lock().await;
        conn.as_ref()
            .map(|active| active.channel.clone())
            .ok_or(ClientError::NotConnected)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Background half of a connection: reconcile until the stream ends, then
/// report how it ended. Cancellation is the one clean exit — the canceller
/// owns the state transition in that case.
async fn listen(shared: Arc<SessionShared>, updates: UpdateStream, cancel: CancellationToken) {
    let end = Reconciler::new(shared.mirror.clone())
        .run(updates, cancel)
        .await;
    match end {
        StreamEnd::Cancelled => debug!("reconciler stopped by cancellation"),
        StreamEnd::Closed => shared.fail("update stream closed by server".to_string()),
        StreamEnd::Failed(e) => shared.fail(format!("update stream failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_disconnected() {
        let session = Session::new();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_connected());
        assert!(session.items().is_empty());
    }

    #[tokio::test]
    async fn commands_require_a_connection() {
        let session = Session::new();

        let err = session.create_item("buy milk").await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));

        let err = session.set_completed(ItemId::new(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn blank_descriptions_are_rejected_before_dispatch() {
        // No connection needed: validation fires before the channel check.
        let session = Session::new();
        for description in ["", "   ", "\t\n"] {
            let err = session.create_item(description).await.unwrap_err();
            assert!(matches!(err, ClientError::Validation(_)), "{description:?}");
        }
    }

    #[tokio::test]
    async fn disconnect_when_disconnected_is_a_noop() {
        let session = Session::new();
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn state_display_forms() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Failed("link reset".into()).to_string(),
            "failed: link reset"
        );
    }
}
