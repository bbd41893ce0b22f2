//! Rooms and the signaling relay
//!
//! A room exists only between a successful match and the moment either member
//! leaves, disconnects or asks for the next partner.

pub mod registry;
pub mod relay;
pub mod room;

pub use registry::{RegistryStats, RoomRegistry};
pub use relay::{RelayOutcome, SignalingRelay};
pub use room::{NegotiationPhase, Room, RoomMember, RoomState};
