//! Duet Room - matchmaking and signaling relay for one-to-one video chat
//!
//! This crate pairs waiting users by gender preference and subscription
//! priority, then relays WebRTC offers, answers and ICE candidates between
//! the two members of each room over WebSocket connections.

pub mod config;
pub mod error;
pub mod gateway;
pub mod matching;
pub mod metrics;
pub mod rooms;
pub mod service;
pub mod sink;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use gateway::{Gateway, GatewayConfig, SessionHandler};
pub use matching::{InMemoryQueueStore, Matcher, QueueStore};
pub use rooms::{Room, RoomRegistry, SignalingRelay};
pub use sink::EventSink;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
