//! Signaling relay between the two members of a room
//!
//! The relay is a dumb pipe: it checks that the sender belongs to the room and
//! forwards the payload verbatim to the partner's live connection. Nothing is
//! buffered. If the partner is gone the message is dropped.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::rooms::registry::RoomRegistry;
use crate::sink::EventSink;
use crate::types::{ServerEvent, SignalingMessage};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to a relayed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Handed to the partner's connection
    Delivered { to: String },
    /// Partner has no live connection; message dropped
    PeerUnavailable { to: String },
}

pub struct SignalingRelay {
    registry: Arc<RoomRegistry>,
    sink: Arc<dyn EventSink>,
    metrics_collector: Arc<MetricsCollector>,
}

impl SignalingRelay {
    pub fn new(
        registry: Arc<RoomRegistry>,
        sink: Arc<dyn EventSink>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            registry,
            sink,
            metrics_collector,
        }
    }

    /// Forward a negotiation message to the sender's partner.
    ///
    /// Fails with a protocol error when the room is unknown or closed, when
    /// the sender is not a member, or when `leave`/`next` kinds reach the relay
    /// instead of the gateway's pairing handlers.
    pub fn relay(&self, message: SignalingMessage) -> Result<RelayOutcome> {
        if message.kind.is_control() {
            self.metrics_collector.record_signal_dropped("control-kind");
            return Err(MatchmakingError::InvalidEvent {
                reason: format!("'{}' signals end the pairing and are not relayed", message.kind),
            }
            .into());
        }

        let partner_id = match self
            .registry
            .route_signal(message.room_id, &message.sender_id, message.kind)
        {
            Ok(partner_id) => partner_id,
            Err(e) => {
                let reason = match e.downcast_ref::<MatchmakingError>() {
                    Some(MatchmakingError::NotRoomMember { .. }) => "not-member",
                    Some(MatchmakingError::RoomClosed { .. }) => "room-closed",
                    Some(MatchmakingError::RoomNotFound { .. }) => "room-not-found",
                    _ => "unavailable",
                };
                self.metrics_collector.record_signal_dropped(reason);
                warn!(
                    "Dropping {} signal from {} for room {}: {}",
                    message.kind, message.sender_id, message.room_id, e
                );
                return Err(e);
            }
        };

        let kind = message.kind;
        let event = ServerEvent::Signal {
            room_id: message.room_id,
            kind,
            payload: message.payload,
            from: message.sender_id,
        };

        if self.sink.deliver(&partner_id, event) {
            self.metrics_collector.record_signal_relayed(kind);
            debug!("Relayed {} to {} in room {}", kind, partner_id, message.room_id);
            Ok(RelayOutcome::Delivered { to: partner_id })
        } else {
            self.metrics_collector.record_signal_dropped("peer-unavailable");
            debug!(
                "Partner {} offline, dropped {} for room {}",
                partner_id, kind, message.room_id
            );
            Ok(RelayOutcome::PeerUnavailable { to: partner_id })
        }
    }
}
