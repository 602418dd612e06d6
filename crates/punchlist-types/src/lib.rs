//! Shared item and change-event types for punchlist.
//!
//! This crate is the vocabulary both sides of the wire speak: task items,
//! their server-assigned identifiers, and the incremental change events the
//! server pushes to clients. It has **no internal punchlist dependencies** —
//! a pure leaf crate that other crates build on.
//!
//! # Key Types
//!
//! | Type            | Purpose                                         |
//! |-----------------|-------------------------------------------------|
//! | [`ItemId`]      | Server-assigned task identifier                 |
//! | [`TaskItem`]    | One task as the server reports it               |
//! | [`ChangeEvent`] | One incremental change (added/updated/deleted)  |

pub mod event;
pub mod item;

pub use event::ChangeEvent;
pub use item::{ItemId, TaskItem};
