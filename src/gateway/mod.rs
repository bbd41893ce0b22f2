//! Connection gateway
//!
//! Maps live WebSocket connections to user identities and forwards their
//! events to the matcher, the room registry and the signaling relay.

pub mod connections;
pub mod session;
pub mod ws;

pub use connections::{ConnectionHandle, ConnectionRegistry, Registration};
pub use session::{Gateway, GatewayConfig, GatewayStats, Session, SessionHandler};
pub use ws::router;
