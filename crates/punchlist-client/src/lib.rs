//! Punchlist sync client library.
//!
//! Keeps a local [`Mirror`] of a server's task collection live: connect
//! loads a full snapshot, then a background reconciler applies the server's
//! change events in arrival order. Commands (create, toggle) go to the
//! server and come back as events — the mirror is never speculatively
//! mutated, so there is exactly one reconciliation path.
//!
//! ```no_run
//! use punchlist_client::{ClientConfig, Session};
//!
//! # async fn demo() -> Result<(), punchlist_client::ClientError> {
//! let session = Session::new();
//! session.connect(&ClientConfig::default()).await?;
//!
//! session.create_item("buy milk").await?;
//! for item in session.items() {
//!     println!("[{}] {}", if item.completed { "x" } else { " " }, item.description);
//! }
//!
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod constants;
pub mod error;
pub mod mirror;
pub mod reconciler;
pub mod session;
pub mod wire;

pub use channel::{Channel, ChannelError, TransportError, UpdateStream};
pub use error::ClientError;
pub use mirror::{Mirror, MirrorEvent};
pub use reconciler::{Applied, Reconciler, StreamEnd};
pub use session::{ClientConfig, ConnectionState, Session};
pub use wire::WireChannel;

// Re-export the shared vocabulary so consumers need only this crate.
pub use punchlist_types::{ChangeEvent, ItemId, TaskItem};

/// Connect to a server and return a live session.
///
/// This is the main entry point; [`Session::connect`] on an existing session
/// does the same for reconnection.
pub async fn connect(config: &ClientConfig) -> Result<Session, ClientError> {
    let session = Session::new();
    session.connect(config).await?;
    Ok(session)
}
