//! Client-facing error taxonomy.

use punchlist_types::ItemId;
use thiserror::Error;

use crate::channel::{ChannelError, TransportError};

/// Errors surfaced by [`Session`](crate::Session) operations.
///
/// `Validation` and `NotConnected` are checked synchronously before any
/// network call; `Transport` and `NotFound` come back from the channel.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The channel is unusable: connect failed or the link broke mid-call.
    #[error("transport failure: {0}")]
    Transport(String),
    /// An operation was attempted with no active channel.
    #[error("not connected to a server")]
    NotConnected,
    /// Malformed input caught client-side, before dispatch.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The referenced id no longer exists server-side.
    #[error("item {0} not found on the server")]
    NotFound(ItemId),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<ChannelError> for ClientError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Transport(t) => Self::Transport(t.to_string()),
            ChannelError::NotFound(id) => Self::NotFound(id),
        }
    }
}
