//! Applies the server's change events to the mirror, in arrival order.
//!
//! The application policy is deliberately forgiving: the stream may replay
//! things the snapshot already covered (the server replays the current list
//! as `Added` events when a subscription opens), and an `Updated` can arrive
//! for an item whose `Added` was missed. Both are absorbed instead of
//! rejected, because discarding an event would permanently desynchronize the
//! mirror from the server.
//!
//! # Application Policy
//!
//! - `Added`: insert; if the id already exists, overwrite in place — never a
//!   duplicate entry (idempotence)
//! - `Updated`: replace; if the id is unknown, insert it (self-healing)
//! - `Deleted`: remove; unknown id is a silent no-op
//!
//! Events are applied one at a time in delivery order. No reordering, no
//! batching — in-order delivery on a single logical stream is the
//! transport's responsibility.

use std::sync::Arc;

use futures::StreamExt;
use punchlist_types::ChangeEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{TransportError, UpdateStream};
use crate::mirror::{Mirror, MirrorEvent};

/// What applying one change event did to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new entry was inserted.
    Inserted,
    /// An existing entry was overwritten.
    Replaced,
    /// `Updated` for an id the mirror had never seen; inserted anyway.
    ImplicitInsert,
    /// An entry was removed.
    Removed,
    /// `Deleted` for an unknown id; nothing to do.
    UnknownId,
}

/// Why the streaming loop stopped.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// Cancellation was requested; the loop exited cooperatively.
    Cancelled,
    /// The server closed the stream.
    Closed,
    /// The transport failed mid-stream.
    Failed(TransportError),
}

/// Applies change events to a shared [`Mirror`].
pub struct Reconciler {
    mirror: Arc<Mirror>,
}

impl Reconciler {
    pub fn new(mirror: Arc<Mirror>) -> Self {
        Self { mirror }
    }

    /// Apply a single event and broadcast the change to mirror subscribers.
    ///
    /// Applying the same `Added` twice yields the same mirror contents as
    /// applying it once.
    pub fn apply(&self, event: ChangeEvent) -> Applied {
        let id = event.id();
        let outcome = match &event {
            ChangeEvent::Added(item) => {
                if self.mirror.upsert(item.clone()).is_some() {
                    debug!(%id, "duplicate add, overwrote existing entry");
                    Applied::Replaced
                } else {
                    trace!(%id, "added");
                    Applied::Inserted
                }
            }
            ChangeEvent::Updated(item) => {
                if self.mirror.upsert(item.clone()).is_some() {
                    trace!(%id, "updated");
                    Applied::Replaced
                } else {
                    warn!(%id, "update for unknown item, inserting");
                    Applied::ImplicitInsert
                }
            }
            ChangeEvent::Deleted(_) => {
                if self.mirror.remove(id).is_some() {
                    trace!(%id, "deleted");
                    Applied::Removed
                } else {
                    debug!(%id, "delete for unknown item, ignoring");
                    Applied::UnknownId
                }
            }
        };

        if outcome != Applied::UnknownId {
            self.mirror.notify(MirrorEvent::Changed(event));
        }
        outcome
    }

    /// Drive the update stream until it ends or cancellation is requested.
    ///
    /// Cancellation wins any race with an in-flight receive, so the loop
    /// exits after at most one pending event once the token fires.
    pub async fn run(self, mut updates: UpdateStream, cancel: CancellationToken) -> StreamEnd {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                next = updates.next() => match next {
                    Some(Ok(event)) => {
                        debug!(kind = event.kind(), id = %event.id(), "reconciling");
                        self.apply(event);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "update stream failed");
                        return StreamEnd::Failed(e);
                    }
                    None => {
                        debug!("update stream closed by server");
                        return StreamEnd::Closed;
                    }
                },
            }
        }
    }
}
