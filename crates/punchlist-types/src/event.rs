//! Change events pushed by the server.

use serde::{Deserialize, Serialize};

use crate::item::{ItemId, TaskItem};

/// One incremental change to the remote collection.
///
/// Every variant carries a full item snapshot, not a diff — receivers can
/// apply any event without consulting prior state. `Deleted` carries the
/// last-known snapshot of the removed item; only its id matters to a mirror.
///
/// Wire form is adjacently tagged: `{"type":"added","item":{...}}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "item", rename_all = "snake_case")]
pub enum ChangeEvent {
    Added(TaskItem),
    Updated(TaskItem),
    Deleted(TaskItem),
}

impl ChangeEvent {
    /// The item snapshot this event carries.
    pub fn item(&self) -> &TaskItem {
        match self {
            Self::Added(item) | Self::Updated(item) | Self::Deleted(item) => item,
        }
    }

    /// The id of the item this event concerns.
    pub fn id(&self) -> ItemId {
        self.item().id
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tag_shape() {
        let event = ChangeEvent::Added(TaskItem::new(1u64, "buy milk"));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"added","item":{"id":1,"description":"buy milk","completed":false}}"#
        );
    }

    #[test]
    fn accessors_reach_through_variants() {
        let item = TaskItem::new(9u64, "water plants");
        for event in [
            ChangeEvent::Added(item.clone()),
            ChangeEvent::Updated(item.clone()),
            ChangeEvent::Deleted(item.clone()),
        ] {
            assert_eq!(event.id(), ItemId::new(9));
            assert_eq!(event.item(), &item);
        }
    }
}
