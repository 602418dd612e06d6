//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default server address for local development.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7171";

/// Timeout for the entire open-channel → snapshot → subscribe sequence.
/// Prevents `connect` from hanging indefinitely on SYN blackholes or
/// stalled servers.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the mirror's change-notification broadcast channel. A
/// consumer that falls more than this many events behind sees a lag error
/// and should re-read the mirror.
pub const MIRROR_EVENT_CAPACITY: usize = 256;

/// Maximum accepted length of a single wire frame. Frames are one JSON
/// document per line; a task item is a few hundred bytes, so this caps a
/// snapshot response at roughly a hundred items per kilobyte of slack.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;
