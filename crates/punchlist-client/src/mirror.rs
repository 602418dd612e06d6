//! The local mirror of the server's task collection.
//!
//! One in-memory copy, shared between the background reconciler (writer) and
//! any number of foreground readers. Entries keep insertion order: snapshot
//! order first, then append order for items that arrive later. Consumers
//! observe changes through a broadcast channel instead of polling.
//!
//! # Concurrency Model
//!
//! - `parking_lot::RwLock` over an `IndexMap` — one writer, many readers
//! - every lock hold is short and never spans an await point
//! - mutation/notification pairs are ordered but not atomic: a reader may
//!   see the new contents before the matching event arrives, never stale
//!   contents after it

use indexmap::IndexMap;
use parking_lot::RwLock;
use punchlist_types::{ChangeEvent, ItemId, TaskItem};
use tokio::sync::broadcast;

use crate::constants::MIRROR_EVENT_CAPACITY;

/// Notifications broadcast after mirror mutations.
#[derive(Clone, Debug)]
pub enum MirrorEvent {
    /// A snapshot wholesale-replaced the contents.
    Replaced,
    /// One reconciled change was applied.
    Changed(ChangeEvent),
    /// The mirror was emptied by an explicit disconnect.
    Cleared,
}

/// The client's single in-memory copy of the server's items.
pub struct Mirror {
    items: RwLock<IndexMap<ItemId, TaskItem>>,
    event_tx: broadcast::Sender<MirrorEvent>,
}

impl Mirror {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(MIRROR_EVENT_CAPACITY);
        Self {
            items: RwLock::new(IndexMap::new()),
            event_tx,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.event_tx.subscribe()
    }

    /// All items, in mirror order.
    pub fn items(&self) -> Vec<TaskItem> {
        self.items.read().values().cloned().collect()
    }

    /// Look up a single item.
    pub fn get(&self, id: ItemId) -> Option<TaskItem> {
        self.items.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Replace the entire contents with a fresh snapshot, discarding
    /// whatever was there before.
    pub(crate) fn replace_all(&self, snapshot: Vec<TaskItem>) {
        let fresh: IndexMap<ItemId, TaskItem> =
            snapshot.into_iter().map(|item| (item.id, item)).collect();
        *self.items.write() = fresh;
        self.notify(MirrorEvent::Replaced);
    }

    /// Insert or overwrite one item. Returns the previous entry, if any.
    /// Existing entries keep their position; new entries append.
    pub(crate) fn upsert(&self, item: TaskItem) -> Option<TaskItem> {
        self.items.write().insert(item.id, item)
    }

    /// Remove one item. Order of the remaining entries is preserved.
    pub(crate) fn remove(&self, id: ItemId) -> Option<TaskItem> {
        self.items.write().shift_remove(&id)
    }

    /// Empty the mirror on explicit disconnect.
    pub(crate) fn clear(&self) {
        self.items.write().clear();
        self.notify(MirrorEvent::Cleared);
    }

    /// Broadcast a notification; lagging or absent receivers are fine.
    pub(crate) fn notify(&self, event: MirrorEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}
