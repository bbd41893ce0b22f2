//! Outbound event delivery seam
//!
//! The room registry and gateway never talk to sockets directly. They hand
//! events to an `EventSink`, which the live connection table implements.

use crate::types::ServerEvent;

/// Delivers outbound events to a connected user
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// Deliver an event to `user_id`. Returns false if the user has no live
    /// connection; the event is dropped in that case.
    fn deliver(&self, user_id: &str, event: ServerEvent) -> bool;
}

#[cfg(test)]
pub(crate) use recording::RecordingSink;
