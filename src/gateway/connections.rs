//! Live connection table
//!
//! One entry per user identity, holding the outbound channel of its current
//! connection. Registering an identity that is already connected replaces the
//! old entry and hands it back to the caller.

use crate::error::{MatchmakingError, Result};
use crate::sink::EventSink;
use crate::types::{ConnectionId, ServerEvent, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Outbound side of one live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: ConnectionId,
    pub sender: UnboundedSender<ServerEvent>,
    pub connected_at: DateTime<Utc>,
}

/// A freshly registered connection
pub struct Registration {
    pub connection_id: ConnectionId,
    pub receiver: UnboundedReceiver<ServerEvent>,
    /// Previous connection for the same identity, if one was replaced
    pub replaced: Option<ConnectionHandle>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user_id`, replacing any existing one
    pub fn register(&self, user_id: &str) -> Result<Registration> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            connection_id: crate::utils::generate_connection_id(),
            sender,
            connected_at: crate::utils::current_timestamp(),
        };
        let connection_id = handle.connection_id;

        let replaced = self
            .connections
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire connections lock".to_string(),
            })?
            .insert(user_id.to_string(), handle);

        debug!("Registered connection {} for {}", connection_id, user_id);
        Ok(Registration {
            connection_id,
            receiver,
            replaced,
        })
    }

    /// Remove `user_id`'s entry only if it still belongs to `connection_id`.
    ///
    /// Returns false when a newer connection has taken over the identity.
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> Result<bool> {
        let mut connections =
            self.connections
                .write()
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Failed to acquire connections lock".to_string(),
                })?;

        match connections.get(user_id) {
            Some(handle) if handle.connection_id == connection_id => {
                connections.remove(user_id);
                debug!("Unregistered connection {} for {}", connection_id, user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections
            .read()
            .map(|connections| connections.contains_key(user_id))
            .unwrap_or(false)
    }

    /// Whether `connection_id` is the current connection for `user_id`
    pub fn is_current(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        self.connections
            .read()
            .map(|connections| {
                connections
                    .get(user_id)
                    .is_some_and(|handle| handle.connection_id == connection_id)
            })
            .unwrap_or(false)
    }

    /// Id of the live connection for `user_id`, if any
    pub fn current(&self, user_id: &str) -> Option<ConnectionId> {
        self.connections
            .read()
            .ok()?
            .get(user_id)
            .map(|handle| handle.connection_id)
    }

    pub fn count(&self) -> usize {
        self.connections
            .read()
            .map(|connections| connections.len())
            .unwrap_or(0)
    }
}

impl EventSink for ConnectionRegistry {
    fn deliver(&self, user_id: &str, event: ServerEvent) -> bool {
        let sender = match self.connections.read() {
            Ok(connections) => connections.get(user_id).map(|handle| handle.sender.clone()),
            Err(_) => None,
        };

        match sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}
