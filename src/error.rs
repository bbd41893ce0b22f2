//! Error types for the matchmaking and signaling service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Every `MatchmakingError` also knows which class of
//! failure it represents so the gateway can decide whether to drop, heal or report.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// How a failure is treated by the connection gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed event, unknown room, foreign sender. Logged and dropped.
    Protocol,
    /// Races and duplicates that the store and matcher heal on their own.
    State,
    /// Backing state unavailable. Reported to the client as an error event.
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Protocol => "protocol",
            ErrorClass::State => "state",
            ErrorClass::Fatal => "fatal",
        }
    }
}

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid event: {reason}")]
    InvalidEvent { reason: String },

    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: String },

    #[error("Room is closed: {room_id}")]
    RoomClosed { room_id: String },

    #[error("User {user_id} is not a member of room {room_id}")]
    NotRoomMember { user_id: String, room_id: String },

    #[error("User {user_id} is already paired in room {room_id}")]
    AlreadyPaired { user_id: String, room_id: String },

    #[error("User not connected: {user_id}")]
    UserNotConnected { user_id: String },

    #[error("Queue store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Service degraded: {message}")]
    Degraded { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            MatchmakingError::InvalidEvent { .. }
            | MatchmakingError::RoomNotFound { .. }
            | MatchmakingError::RoomClosed { .. }
            | MatchmakingError::NotRoomMember { .. } => ErrorClass::Protocol,
            MatchmakingError::AlreadyPaired { .. } | MatchmakingError::UserNotConnected { .. } => {
                ErrorClass::State
            }
            MatchmakingError::StoreUnavailable { .. }
            | MatchmakingError::Degraded { .. }
            | MatchmakingError::ConfigurationError { .. }
            | MatchmakingError::InternalError { .. } => ErrorClass::Fatal,
        }
    }

    /// Short machine-readable code sent to clients in `error` events
    pub fn code(&self) -> &'static str {
        match self {
            MatchmakingError::InvalidEvent { .. } => "invalid-event",
            MatchmakingError::RoomNotFound { .. } => "room-not-found",
            MatchmakingError::RoomClosed { .. } => "room-closed",
            MatchmakingError::NotRoomMember { .. } => "not-room-member",
            MatchmakingError::AlreadyPaired { .. } => "already-paired",
            MatchmakingError::UserNotConnected { .. } => "not-connected",
            MatchmakingError::StoreUnavailable { .. } => "store-unavailable",
            MatchmakingError::Degraded { .. } => "degraded",
            MatchmakingError::ConfigurationError { .. } => "configuration",
            MatchmakingError::InternalError { .. } => "internal",
        }
    }
}

/// Classify an arbitrary error. Anything that is not a `MatchmakingError` is fatal.
pub fn classify(error: &anyhow::Error) -> ErrorClass {
    error
        .downcast_ref::<MatchmakingError>()
        .map(MatchmakingError::class)
        .unwrap_or(ErrorClass::Fatal)
}
