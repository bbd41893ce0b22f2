//! Connection gateway event handling
//!
//! The gateway maps one live connection to one user identity and turns the
//! user's events into queue, room and relay operations. A disconnect is an
//! implicit leave. Registering an identity twice replaces the older
//! connection.

use crate::config::{MatchmakingSettings, NextPolicy};
use crate::error::{classify, ErrorClass, MatchmakingError, Result};
use crate::gateway::connections::ConnectionRegistry;
use crate::matching::{Matcher, QueueStore};
use crate::metrics::MetricsCollector;
use crate::rooms::{Room, RoomMember, RoomRegistry, SignalingRelay};
use crate::sink::EventSink;
use crate::types::{
    ClientEvent, CloseReason, ConnectionId, RoomId, ServerEvent, SignalKind, SignalingMessage,
    UserId, UserProfile, WaitingUser,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// Per-connection state owned by the connection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
}

/// Transport-facing interface of the gateway
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Register a connection for `user_id` and return its outbound stream
    async fn on_connect(&self, user_id: &str)
        -> Result<(Session, UnboundedReceiver<ServerEvent>)>;

    /// Handle one inbound event. Failures are logged and reported here.
    async fn on_event(&self, session: &Session, event: ClientEvent);

    /// The connection is gone; treat as an implicit leave
    async fn on_disconnect(&self, session: &Session);
}

/// Gateway policy knobs
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub scan_limit: usize,
    pub next_policy: NextPolicy,
    pub requeue_partner_on_leave: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&MatchmakingSettings::default())
    }
}

impl From<&MatchmakingSettings> for GatewayConfig {
    fn from(settings: &MatchmakingSettings) -> Self {
        Self {
            scan_limit: settings.scan_limit,
            next_policy: settings.next_policy,
            requeue_partner_on_leave: settings.requeue_partner_on_leave,
        }
    }
}

/// Gateway statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GatewayStats {
    pub users_waiting: usize,
    pub active_rooms: usize,
    pub active_connections: usize,
    pub degraded: bool,
}

pub struct Gateway {
    store: Arc<dyn QueueStore>,
    connections: Arc<ConnectionRegistry>,
    registry: Arc<RoomRegistry>,
    matcher: Matcher,
    relay: SignalingRelay,
    config: GatewayConfig,
    degraded: AtomicBool,
    metrics_collector: Arc<MetricsCollector>,
}

impl Gateway {
    /// `registry` should deliver through `connections` so room events reach
    /// the same sockets the gateway writes to.
    pub fn new(
        store: Arc<dyn QueueStore>,
        registry: Arc<RoomRegistry>,
        connections: Arc<ConnectionRegistry>,
        config: GatewayConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        let sink: Arc<dyn EventSink> = connections.clone();
        let matcher = Matcher::new(
            store.clone(),
            registry.clone(),
            config.scan_limit,
            metrics_collector.clone(),
        );
        let relay = SignalingRelay::new(registry.clone(), sink, metrics_collector.clone());

        Self {
            store,
            connections,
            registry,
            matcher,
            relay,
            config,
            degraded: AtomicBool::new(false),
            metrics_collector,
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn mark_degraded(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            error!("Queue store unavailable, refusing new enqueues: {}", reason);
            self.metrics_collector
                .update_component_health("queue_store", false);
        }
    }

    /// Watch queue store results and flip into degraded mode on failure
    fn guard_store<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if let Some(MatchmakingError::StoreUnavailable { message }) =
                e.downcast_ref::<MatchmakingError>()
            {
                self.mark_degraded(message);
            }
        }
        result
    }

    pub fn stats(&self) -> Result<GatewayStats> {
        Ok(GatewayStats {
            users_waiting: self.store.len()?,
            active_rooms: self.registry.stats()?.active_rooms,
            active_connections: self.connections.count(),
            degraded: self.is_degraded(),
        })
    }

    /// Register a connection. An existing connection for the same identity
    /// is told it was replaced and its waiting entry or room is torn down.
    pub fn connect(&self, user_id: &str) -> Result<(Session, UnboundedReceiver<ServerEvent>)> {
        if user_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidEvent {
                reason: "missing user id".to_string(),
            }
            .into());
        }

        let registration = self.connections.register(user_id)?;
        let session = Session {
            user_id: user_id.to_string(),
            connection_id: registration.connection_id,
            connected_at: crate::utils::current_timestamp(),
        };

        match registration.replaced {
            Some(old) => {
                info!(
                    "Connection {} replaces {} for {}",
                    session.connection_id, old.connection_id, user_id
                );
                self.metrics_collector.record_connection_replaced();
                let _ = old.sender.send(ServerEvent::Error {
                    code: "replaced".to_string(),
                    message: "Another connection was opened for this user".to_string(),
                });
                drop(old);
                self.release_identity(user_id)?;
            }
            None => {
                self.metrics_collector.record_connection_opened();
                info!("User {} connected ({})", user_id, session.connection_id);
            }
        }

        Ok((session, registration.receiver))
    }

    /// Treat a closed connection as an implicit leave. Disconnects from a
    /// connection that has already been replaced are ignored.
    pub fn disconnect(&self, session: &Session) -> Result<()> {
        if !self
            .connections
            .unregister(&session.user_id, session.connection_id)?
        {
            debug!(
                "Ignoring disconnect of replaced connection {} for {}",
                session.connection_id, session.user_id
            );
            return Ok(());
        }

        self.metrics_collector.record_connection_closed();
        info!("User {} disconnected", session.user_id);
        self.release_identity(&session.user_id)
    }

    /// Dispatch one inbound event
    pub fn handle_event(&self, session: &Session, event: ClientEvent) -> Result<()> {
        if !self
            .connections
            .is_current(&session.user_id, session.connection_id)
        {
            return Err(MatchmakingError::InvalidEvent {
                reason: format!("connection {} is no longer active", session.connection_id),
            }
            .into());
        }

        match event {
            ClientEvent::Enqueue {
                user_id,
                gender,
                looking_for,
                tier,
                boosted,
                boosted_until,
            } => {
                self.check_identity(session, user_id.as_deref())?;
                let profile = UserProfile {
                    declared_gender: gender,
                    looking_for,
                    tier,
                    boosted,
                    boosted_until,
                };
                self.enqueue(session, profile)
            }
            ClientEvent::Leave { user_id } => {
                self.check_identity(session, user_id.as_deref())?;
                self.leave(&session.user_id)
            }
            ClientEvent::Signal {
                room_id,
                kind,
                payload,
            } => self.signal(&session.user_id, room_id, kind, payload),
            ClientEvent::Next => self.next(&session.user_id),
            ClientEvent::Ping => {
                self.connections.deliver(&session.user_id, ServerEvent::Pong);
                Ok(())
            }
        }
    }

    fn check_identity(&self, session: &Session, claimed: Option<&str>) -> Result<()> {
        match claimed {
            Some(claimed) if claimed != session.user_id => Err(MatchmakingError::InvalidEvent {
                reason: format!(
                    "event for user {} sent on connection of {}",
                    claimed, session.user_id
                ),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Start (or refresh) a search for the session's user
    pub fn enqueue(&self, session: &Session, profile: UserProfile) -> Result<()> {
        let user_id = session.user_id.as_str();
        if self.is_degraded() {
            return Err(MatchmakingError::Degraded {
                message: "matchmaking is temporarily unavailable".to_string(),
            }
            .into());
        }

        self.metrics_collector.record_enqueue(profile.tier);

        // Searching again while paired ends the current pairing first
        let mut avoid = None;
        if let Some(room) = self.registry.room_for_member(user_id)? {
            debug!("{} enqueued while in room {}, skipping partner", user_id, room.id);
            avoid = self.skip_partner(user_id, &room)?;
        }

        self.search(
            WaitingUser::new(user_id, profile).avoiding(avoid),
            session.connection_id,
        )
    }

    /// Run a matcher pass and tell the user how it went. The user is only
    /// queued while `connection_id` is still its live connection.
    fn search(&self, user: WaitingUser, connection_id: ConnectionId) -> Result<()> {
        let user_id = user.id.clone();
        let connections = &self.connections;
        let attempt = self.matcher.try_match_if(user, &mut |waiting: &WaitingUser| {
            Ok(connections.is_current(&waiting.id, connection_id))
        });

        match self.guard_store(attempt)? {
            Some(room) => self.announce_match(&room),
            None => {
                if self.guard_store(self.store.contains(&user_id))? {
                    self.connections.deliver(&user_id, ServerEvent::NoMatch);
                }
                Ok(())
            }
        }
    }

    /// Tell both members about their new room. If either is already gone the
    /// room is closed at once and the member still present searches again.
    fn announce_match(&self, room: &Room) -> Result<()> {
        let mut missing = Vec::new();
        for member in [&room.member_a, &room.member_b] {
            let Some(partner) = room.partner_of(&member.id) else {
                continue;
            };
            let delivered = self.connections.deliver(
                &member.id,
                ServerEvent::Matched {
                    room_id: room.id,
                    partner_id: partner.id.clone(),
                },
            );
            if !delivered {
                missing.push(member.id.clone());
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        warn!(
            "Room {} lost {:?} before the match was announced",
            room.id, missing
        );
        if self
            .registry
            .close_room(room.id, CloseReason::PartnerLeft)?
            .is_some()
        {
            for member in [&room.member_a, &room.member_b] {
                if !missing.contains(&member.id) {
                    self.requeue(member, None)?;
                }
            }
        }
        Ok(())
    }

    /// Put a former room member back into the queue if it is still connected
    fn requeue(&self, member: &RoomMember, avoid: Option<UserId>) -> Result<()> {
        let Some(connection_id) = self.connections.current(&member.id) else {
            debug!("Not requeueing {}: no live connection", member.id);
            return Ok(());
        };
        if self.is_degraded() {
            self.connections.deliver(
                &member.id,
                ServerEvent::Error {
                    code: "degraded".to_string(),
                    message: "matchmaking is temporarily unavailable".to_string(),
                },
            );
            return Ok(());
        }

        debug!("Requeueing {}", member.id);
        self.search(
            WaitingUser::new(member.id.clone(), member.profile.clone()).avoiding(avoid),
            connection_id,
        )
    }

    /// Stop searching or end the current pairing. Always acknowledged.
    pub fn leave(&self, user_id: &str) -> Result<()> {
        let result = self.release_identity(user_id);
        self.connections.deliver(user_id, ServerEvent::Left);
        result
    }

    /// Drop every trace of `user_id` from the queue and its room
    fn release_identity(&self, user_id: &str) -> Result<()> {
        if self.guard_store(self.store.remove(user_id))?.is_some() {
            debug!("Removed {} from the queue", user_id);
        }

        if let Some(room) = self.registry.room_for_member(user_id)? {
            if let Some(closed) = self.registry.close_room(room.id, CloseReason::PartnerLeft)? {
                if self.config.requeue_partner_on_leave {
                    if let Some(partner) = closed.partner_of(user_id) {
                        self.requeue(partner, None)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Skip the current partner and keep searching
    pub fn next(&self, user_id: &str) -> Result<()> {
        let Some(room) = self.registry.room_for_member(user_id)? else {
            if self.guard_store(self.store.contains(user_id))? {
                debug!("{} asked for next while already searching", user_id);
                return Ok(());
            }
            return Err(MatchmakingError::InvalidEvent {
                reason: format!("{} asked for next without a room", user_id),
            }
            .into());
        };

        let Some(partner_id) = self.skip_partner(user_id, &room)? else {
            return Ok(());
        };

        if let Some(me) = room.member(user_id) {
            self.requeue(me, Some(partner_id))?;
        }
        Ok(())
    }

    /// Close `room` as next-requested and requeue the partner per policy.
    /// Returns the skipped partner's id if this call closed the room.
    fn skip_partner(&self, user_id: &str, room: &Room) -> Result<Option<UserId>> {
        let Some(closed) = self
            .registry
            .close_room(room.id, CloseReason::NextRequested)?
        else {
            return Ok(None);
        };

        let Some(partner) = closed.partner_of(user_id) else {
            return Ok(None);
        };
        info!("{} skipped {} in room {}", user_id, partner.id, room.id);

        if self.config.next_policy == NextPolicy::Both {
            self.requeue(partner, Some(user_id.to_string()))?;
        }
        Ok(Some(partner.id.clone()))
    }

    fn signal(
        &self,
        user_id: &str,
        room_id: RoomId,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        if kind.is_control() {
            let current = self.registry.room_for_member(user_id)?.map(|room| room.id);
            if current != Some(room_id) {
                return Err(MatchmakingError::NotRoomMember {
                    user_id: user_id.to_string(),
                    room_id: room_id.to_string(),
                }
                .into());
            }
            return match kind {
                SignalKind::Next => self.next(user_id),
                _ => self.leave(user_id),
            };
        }

        self.relay.relay(SignalingMessage {
            kind,
            sender_id: user_id.to_string(),
            room_id,
            payload,
        })?;
        Ok(())
    }

    /// Log a failed event by class and tell the client when it matters
    fn report_error(&self, session: &Session, event: &str, e: &anyhow::Error) {
        let class = classify(e);
        self.metrics_collector.record_error(class);

        match class {
            ErrorClass::Protocol => {
                warn!("Dropped {} from {}: {}", event, session.user_id, e);
            }
            ErrorClass::State => {
                debug!("Ignored {} from {}: {}", event, session.user_id, e);
            }
            ErrorClass::Fatal => {
                error!("Failed to handle {} from {}: {:#}", event, session.user_id, e);
                let code = e
                    .downcast_ref::<MatchmakingError>()
                    .map(MatchmakingError::code)
                    .unwrap_or("internal");
                self.connections.deliver(
                    &session.user_id,
                    ServerEvent::Error {
                        code: code.to_string(),
                        message: e.to_string(),
                    },
                );
            }
        }
    }
}

#[async_trait]
impl SessionHandler for Gateway {
    async fn on_connect(
        &self,
        user_id: &str,
    ) -> Result<(Session, UnboundedReceiver<ServerEvent>)> {
        self.connect(user_id)
    }

    async fn on_event(&self, session: &Session, event: ClientEvent) {
        let name = event.name();
        let timer = self.metrics_collector.start_timer();

        let result = self.handle_event(session, event);
        self.metrics_collector
            .record_client_event(name, result.is_ok(), timer.stop());

        if let Err(e) = result {
            self.report_error(session, name, &e);
        }
    }

    async fn on_disconnect(&self, session: &Session) {
        if let Err(e) = self.disconnect(session) {
            self.metrics_collector.record_error(classify(&e));
            error!(
                "Failed to clean up after {} disconnected: {:#}",
                session.user_id, e
            );
        }
    }
}
