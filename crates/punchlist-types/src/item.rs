//! Task items and their identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A server-assigned task identifier.
///
/// Ids are allocated by the server when an item is created, are unique for
/// the lifetime of a server, and are never reassigned. Clients treat them as
/// opaque; the integer form exists only because the server counts upward.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(u64);

impl ItemId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// One task as the server reports it.
///
/// `description` is fixed at creation — clients never edit it in place.
/// `completed` changes through [`ChangeEvent::Updated`] deliveries after a
/// toggle command round-trips through the server.
///
/// [`ChangeEvent::Updated`]: crate::ChangeEvent::Updated
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: ItemId,
    pub description: String,
    pub completed: bool,
}

impl TaskItem {
    /// A fresh, not-yet-completed item.
    pub fn new(id: impl Into<ItemId>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            completed: false,
        }
    }

    /// The same item with its completion flag flipped.
    pub fn toggled(mut self) -> Self {
        self.completed = !self.completed;
        self
    }
}
