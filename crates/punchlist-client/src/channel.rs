//! The transport seam: an opaque bidirectional channel to the task server.
//!
//! The sync engine never talks to a socket directly — it drives a boxed
//! [`Channel`], which carries request/response commands and hands out the
//! server-push [`UpdateStream`]. The production implementation is
//! [`WireChannel`](crate::wire::WireChannel); tests substitute scripted
//! fakes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use punchlist_types::{ChangeEvent, ItemId, TaskItem};
use thiserror::Error;

/// The underlying channel is unusable: connect failed, the stream broke, or
/// the peer went away mid-request.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Outcome of a command that can legitimately miss on the server side.
///
/// `NotFound` is a normal answer for a stale local view, not a transport
/// fault — callers must report it, never swallow it.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("item {0} does not exist on the server")]
    NotFound(ItemId),
}

/// The server-push half of a channel: a lazy, unbounded sequence of change
/// events, live until the channel closes or the subscription is dropped.
///
/// An `Err` item means the transport failed mid-stream; the stream yields
/// nothing further after it. Plain end-of-stream means the server closed.
pub type UpdateStream = BoxStream<'static, Result<ChangeEvent, TransportError>>;

/// An open bidirectional channel to the task server.
///
/// Commands and the update stream share one connection; implementations are
/// responsible for in-order event delivery on a single logical stream.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Fetch the full current collection, in server order.
    async fn get_snapshot(&self) -> Result<Vec<TaskItem>, TransportError>;

    /// Create a new item; the server assigns the id.
    async fn create(&self, description: &str) -> Result<TaskItem, TransportError>;

    /// Toggle the completion state of an existing item.
    async fn set_completed(&self, id: ItemId) -> Result<(), ChannelError>;

    /// Claim the channel's update stream.
    ///
    /// There is one logical listener per channel; implementations may refuse
    /// a second claim.
    async fn subscribe_updates(&self) -> Result<UpdateStream, TransportError>;
}
