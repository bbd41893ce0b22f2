//! Room record shared by two matched users

use crate::types::{CloseReason, RoomId, SignalKind, UserId, UserProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    Open,
    Closed,
}

/// Progress of the WebRTC negotiation as observed by the relay.
///
/// Informational only: the relay never rejects a message because it arrives
/// out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationPhase {
    AwaitingOffer,
    OfferSent,
    Answered,
    Connected,
}

impl NegotiationPhase {
    /// Phase reached after relaying a message of `kind`
    pub fn advance(self, kind: SignalKind) -> Self {
        match (self, kind) {
            (NegotiationPhase::AwaitingOffer, SignalKind::Offer) => NegotiationPhase::OfferSent,
            (NegotiationPhase::OfferSent, SignalKind::Answer) => NegotiationPhase::Answered,
            (NegotiationPhase::Answered, SignalKind::IceCandidate) => NegotiationPhase::Connected,
            (phase, _) => phase,
        }
    }
}

/// One side of a room, with the profile needed to re-enqueue it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub id: UserId,
    pub profile: UserProfile,
}

/// Pairing record between exactly two users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub member_a: RoomMember,
    pub member_b: RoomMember,
    pub created_at: DateTime<Utc>,
    pub state: RoomState,
    pub negotiation: NegotiationPhase,
    pub closed_reason: Option<CloseReason>,
}

impl Room {
    pub fn new(id: RoomId, member_a: RoomMember, member_b: RoomMember) -> Self {
        Self {
            id,
            member_a,
            member_b,
            created_at: crate::utils::current_timestamp(),
            state: RoomState::Open,
            negotiation: NegotiationPhase::AwaitingOffer,
            closed_reason: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == RoomState::Open
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_a.id == user_id || self.member_b.id == user_id
    }

    /// The other member, if `user_id` belongs to this room
    pub fn partner_of(&self, user_id: &str) -> Option<&RoomMember> {
        if self.member_a.id == user_id {
            Some(&self.member_b)
        } else if self.member_b.id == user_id {
            Some(&self.member_a)
        } else {
            None
        }
    }

    pub fn member(&self, user_id: &str) -> Option<&RoomMember> {
        if self.member_a.id == user_id {
            Some(&self.member_a)
        } else if self.member_b.id == user_id {
            Some(&self.member_b)
        } else {
            None
        }
    }

    pub fn member_ids(&self) -> [&str; 2] {
        [self.member_a.id.as_str(), self.member_b.id.as_str()]
    }

    pub fn advance_negotiation(&mut self, kind: SignalKind) {
        self.negotiation = self.negotiation.advance(kind);
    }

    /// Mark the room closed. Returns false if it was already closed.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state == RoomState::Closed {
            return false;
        }
        self.state = RoomState::Closed;
        self.closed_reason = Some(reason);
        true
    }
}
