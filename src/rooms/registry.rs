//! Room registry
//!
//! Maps room ids to their two members and owns room teardown. Closed rooms
//! leave active lookup immediately; a bounded set of tombstones lets the relay
//! tell a closed room from one that never existed.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::rooms::room::{Room, RoomMember};
use crate::sink::EventSink;
use crate::types::{CloseReason, RoomId, ServerEvent, SignalKind, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Number of closed room ids remembered for relay diagnostics
const CLOSED_ROOM_MEMORY: usize = 4096;

#[derive(Default)]
struct RegistryInner {
    rooms: HashMap<RoomId, Room>,
    by_member: HashMap<UserId, RoomId>,
    closed: HashSet<RoomId>,
    closed_order: VecDeque<RoomId>,
}

impl RegistryInner {
    fn remember_closed(&mut self, room_id: RoomId) {
        if self.closed.insert(room_id) {
            self.closed_order.push_back(room_id);
        }
        while self.closed_order.len() > CLOSED_ROOM_MEMORY {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub active_rooms: usize,
    pub paired_users: usize,
}

/// Registry of open rooms
pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
    sink: Arc<dyn EventSink>,
    metrics_collector: Arc<MetricsCollector>,
}

impl RoomRegistry {
    pub fn new(sink: Arc<dyn EventSink>, metrics_collector: Arc<MetricsCollector>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            sink,
            metrics_collector,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryInner>> {
        self.inner.read().map_err(|_| {
            MatchmakingError::StoreUnavailable {
                message: "Failed to acquire room registry read lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryInner>> {
        self.inner.write().map_err(|_| {
            MatchmakingError::StoreUnavailable {
                message: "Failed to acquire room registry write lock".to_string(),
            }
            .into()
        })
    }

    /// Create a room for two distinct users, neither of whom is already paired
    pub fn create_room(&self, member_a: RoomMember, member_b: RoomMember) -> Result<Room> {
        if member_a.id == member_b.id {
            return Err(MatchmakingError::InternalError {
                message: format!("Cannot pair user {} with themselves", member_a.id),
            }
            .into());
        }

        let mut inner = self.write()?;
        for member in [&member_a, &member_b] {
            if let Some(room_id) = inner.by_member.get(&member.id) {
                return Err(MatchmakingError::AlreadyPaired {
                    user_id: member.id.clone(),
                    room_id: room_id.to_string(),
                }
                .into());
            }
        }

        let room = Room::new(crate::utils::generate_room_id(), member_a, member_b);
        inner.by_member.insert(room.member_a.id.clone(), room.id);
        inner.by_member.insert(room.member_b.id.clone(), room.id);
        inner.rooms.insert(room.id, room.clone());
        drop(inner);

        self.metrics_collector.record_room_created();
        info!(
            "Created room {} for {} and {}",
            room.id, room.member_a.id, room.member_b.id
        );
        Ok(room)
    }

    /// Look up an open room
    pub fn get_room(&self, room_id: RoomId) -> Result<Option<Room>> {
        Ok(self.read()?.rooms.get(&room_id).cloned())
    }

    /// The open room `user_id` belongs to, if any
    pub fn room_for_member(&self, user_id: &str) -> Result<Option<Room>> {
        let inner = self.read()?;
        Ok(inner
            .by_member
            .get(user_id)
            .and_then(|room_id| inner.rooms.get(room_id))
            .cloned())
    }

    pub fn is_paired(&self, user_id: &str) -> Result<bool> {
        Ok(self.read()?.by_member.contains_key(user_id))
    }

    /// Close a room and notify both members.
    ///
    /// Returns the closed room when this call performed the close, or `None`
    /// if the room was unknown or already closed.
    pub fn close_room(&self, room_id: RoomId, reason: CloseReason) -> Result<Option<Room>> {
        let closed = {
            let mut inner = self.write()?;
            match inner.rooms.remove(&room_id) {
                Some(mut room) => {
                    room.close(reason);
                    for member in room.member_ids() {
                        if inner.by_member.get(member) == Some(&room_id) {
                            inner.by_member.remove(member);
                        }
                    }
                    inner.remember_closed(room_id);
                    Some(room)
                }
                None => None,
            }
        };

        let Some(room) = closed else {
            debug!("Room {} already closed or unknown", room_id);
            return Ok(None);
        };

        self.metrics_collector.record_room_closed(reason);
        info!("Closed room {} ({})", room_id, reason);

        for member in room.member_ids() {
            let delivered = self
                .sink
                .deliver(member, ServerEvent::RoomClosed { room_id, reason });
            if !delivered {
                debug!("Member {} of room {} no longer connected", member, room_id);
            }
        }

        Ok(Some(room))
    }

    /// Validate a signaling sender and return the partner to deliver to.
    ///
    /// Advances the informational negotiation phase of the room.
    pub fn route_signal(&self, room_id: RoomId, sender_id: &str, kind: SignalKind) -> Result<UserId> {
        let mut inner = self.write()?;

        let is_tombstoned = inner.closed.contains(&room_id);
        let Some(room) = inner.rooms.get_mut(&room_id) else {
            return Err(if is_tombstoned {
                MatchmakingError::RoomClosed {
                    room_id: room_id.to_string(),
                }
            } else {
                MatchmakingError::RoomNotFound {
                    room_id: room_id.to_string(),
                }
            }
            .into());
        };

        let partner_id = match room.partner_of(sender_id) {
            Some(partner) => partner.id.clone(),
            None => {
                return Err(MatchmakingError::NotRoomMember {
                    user_id: sender_id.to_string(),
                    room_id: room_id.to_string(),
                }
                .into())
            }
        };

        let before = room.negotiation;
        room.advance_negotiation(kind);
        if room.negotiation != before {
            debug!("Room {} negotiation {:?} -> {:?}", room_id, before, room.negotiation);
        }

        Ok(partner_id)
    }

    pub fn stats(&self) -> Result<RegistryStats> {
        let inner = self.read()?;
        Ok(RegistryStats {
            active_rooms: inner.rooms.len(),
            paired_users: inner.by_member.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::room::NegotiationPhase;
    use crate::sink::{MockEventSink, RecordingSink};
    use crate::types::UserProfile;

    fn member(id: &str) -> RoomMember {
        RoomMember {
            id: id.to_string(),
            profile: UserProfile::default(),
        }
    }

    fn create_test_registry() -> (RoomRegistry, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        (RoomRegistry::new(sink.clone(), metrics), sink)
    }

    #[test]
    fn test_create_and_lookup() {
        let (registry, _sink) = create_test_registry();
        let room = registry.create_room(member("a"), member("b")).unwrap();

        assert_eq!(registry.get_room(room.id).unwrap(), Some(room.clone()));
        assert_eq!(registry.room_for_member("b").unwrap().map(|r| r.id), Some(room.id));
        assert!(registry.is_paired("a").unwrap());
        assert_eq!(registry.stats().unwrap().active_rooms, 1);
    }

    #[test]
    fn test_member_cannot_join_two_rooms() {
        let (registry, _sink) = create_test_registry();
        registry.create_room(member("a"), member("b")).unwrap();

        let err = registry.create_room(member("c"), member("a")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::AlreadyPaired { .. })
        ));
        assert!(!registry.is_paired("c").unwrap());

        assert!(registry.create_room(member("d"), member("d")).is_err());
    }

    #[test]
    fn test_close_notifies_both_members_once() {
        let (registry, sink) = create_test_registry();
        let room = registry.create_room(member("a"), member("b")).unwrap();

        let closed = registry.close_room(room.id, CloseReason::PartnerLeft).unwrap();
        assert_eq!(closed.map(|r| r.closed_reason), Some(Some(CloseReason::PartnerLeft)));
        assert!(registry.close_room(room.id, CloseReason::Error).unwrap().is_none());

        let expected = ServerEvent::RoomClosed {
            room_id: room.id,
            reason: CloseReason::PartnerLeft,
        };
        assert_eq!(sink.events_for("a"), vec![expected.clone()]);
        assert_eq!(sink.events_for("b"), vec![expected]);

        assert!(registry.get_room(room.id).unwrap().is_none());
        assert!(!registry.is_paired("a").unwrap());
    }

    #[test]
    fn test_close_skips_disconnected_member() {
        let mut sink = MockEventSink::new();
        sink.expect_deliver()
            .withf(|user_id, _| user_id.to_string() == "a")
            .times(1)
            .return_const(true);
        sink.expect_deliver()
            .withf(|user_id, _| user_id.to_string() == "b")
            .times(1)
            .return_const(false);

        let registry = RoomRegistry::new(Arc::new(sink), Arc::new(MetricsCollector::new().unwrap()));
        let room = registry.create_room(member("a"), member("b")).unwrap();

        assert!(registry.close_room(room.id, CloseReason::Error).unwrap().is_some());
    }

    #[test]
    fn test_route_signal_validation() {
        let (registry, _sink) = create_test_registry();
        let room = registry.create_room(member("a"), member("b")).unwrap();

        assert_eq!(registry.route_signal(room.id, "a", SignalKind::Offer).unwrap(), "b");
        assert_eq!(registry.route_signal(room.id, "b", SignalKind::Answer).unwrap(), "a");
        assert_eq!(
            registry.get_room(room.id).unwrap().unwrap().negotiation,
            NegotiationPhase::Answered
        );

        let foreign = registry.route_signal(room.id, "mallory", SignalKind::Offer).unwrap_err();
        assert!(matches!(
            foreign.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::NotRoomMember { .. })
        ));

        let unknown = registry
            .route_signal(uuid::Uuid::new_v4(), "a", SignalKind::Offer)
            .unwrap_err();
        assert!(matches!(
            unknown.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::RoomNotFound { .. })
        ));

        registry.close_room(room.id, CloseReason::NextRequested).unwrap();
        let closed = registry.route_signal(room.id, "a", SignalKind::Text).unwrap_err();
        assert!(matches!(
            closed.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::RoomClosed { .. })
        ));
    }

    #[test]
    fn test_room_ids_are_never_reused() {
        let (registry, _sink) = create_test_registry();
        let first = registry.create_room(member("a"), member("b")).unwrap();
        registry.close_room(first.id, CloseReason::NextRequested).unwrap();

        let second = registry.create_room(member("a"), member("b")).unwrap();
        assert_ne!(first.id, second.id);
    }
}
