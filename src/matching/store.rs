//! Priority queue store for waiting users
//!
//! The store is the only place a waiting user lives. All operations are
//! linearizable: the in-memory implementation serializes writers behind one
//! lock, and the pair claim runs room creation while that lock is held so no
//! other matcher pass can observe a half-made pair.

use crate::error::{MatchmakingError, Result};
use crate::matching::priority::PriorityScore;
use crate::rooms::Room;
use crate::types::{UserId, WaitingUser};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Default bound on how many candidates one matcher pass inspects
pub const DEFAULT_SCAN_LIMIT: usize = 200;

/// Result of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New waiting entry
    Inserted,
    /// Existing entry refreshed; original wait time kept
    Refreshed,
    /// The admission check turned the user away; nothing was written
    Refused,
}

/// Result of claiming a pair out of the store
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Both users removed and the room created
    Claimed(Room),
    /// The candidate was taken by someone else first
    CandidateGone,
    /// The claiming user is no longer waiting
    SelfGone,
}

/// Builds the room for a claimed pair. Returning `Ok(None)` rejects the pair
/// and leaves both users waiting.
pub type PairBuilder<'a> =
    dyn FnMut(&WaitingUser, &WaitingUser) -> Result<Option<Room>> + 'a;

/// Decides whether a user may enter the queue. Runs while the store is
/// locked, so no claim can pair the user between the check and the insert.
pub type AdmissionCheck<'a> = dyn FnMut(&WaitingUser) -> Result<bool> + 'a;

/// Storage for users waiting to be matched
pub trait QueueStore: Send + Sync {
    /// Insert or refresh a waiting user. A refresh replaces the profile but
    /// keeps the original `enqueued_at` and sequence.
    fn enqueue(&self, user: WaitingUser) -> Result<EnqueueOutcome> {
        self.enqueue_if(user, &mut |_| Ok(true))
    }

    /// `enqueue`, but only if `admit` accepts the user under the store lock
    fn enqueue_if(
        &self,
        user: WaitingUser,
        admit: &mut AdmissionCheck<'_>,
    ) -> Result<EnqueueOutcome>;

    /// Remove a waiting user. Removing an absent id is a no-op.
    fn remove(&self, user_id: &str) -> Result<Option<WaitingUser>>;

    fn get(&self, user_id: &str) -> Result<Option<WaitingUser>>;

    fn contains(&self, user_id: &str) -> Result<bool> {
        Ok(self.get(user_id)?.is_some())
    }

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Waiting users other than `for_user`, best score first, at most `limit`
    fn scan_candidates(&self, for_user: &str, limit: usize) -> Result<Vec<WaitingUser>>;

    /// Atomically remove `user_id` and `candidate_id` and create their room.
    ///
    /// Both must still be waiting. `build` runs while the store is locked; if it
    /// fails or rejects the pair, nothing is removed.
    fn claim_pair(
        &self,
        user_id: &str,
        candidate_id: &str,
        build: &mut PairBuilder<'_>,
    ) -> Result<ClaimOutcome>;
}

#[derive(Default)]
struct StoreInner {
    waiting: HashMap<UserId, WaitingUser>,
    next_sequence: u64,
    last_enqueued_at: Option<DateTime<Utc>>,
}

/// Single-process queue store behind one read-write lock
#[derive(Default)]
pub struct InMemoryQueueStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>> {
        self.inner.read().map_err(|_| {
            MatchmakingError::StoreUnavailable {
                message: "Failed to acquire queue read lock".to_string(),
            }
            .into()
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>> {
        self.inner.write().map_err(|_| {
            MatchmakingError::StoreUnavailable {
                message: "Failed to acquire queue write lock".to_string(),
            }
            .into()
        })
    }
}

impl QueueStore for InMemoryQueueStore {
    fn enqueue_if(
        &self,
        mut user: WaitingUser,
        admit: &mut AdmissionCheck<'_>,
    ) -> Result<EnqueueOutcome> {
        let mut inner = self.write()?;

        if !admit(&user)? {
            debug!("Admission refused for {}", user.id);
            return Ok(EnqueueOutcome::Refused);
        }

        if let Some(existing) = inner.waiting.get_mut(&user.id) {
            existing.profile = user.profile;
            existing.avoid = user.avoid;
            debug!("Refreshed waiting entry for {}", existing.id);
            return Ok(EnqueueOutcome::Refreshed);
        }

        // Keep arrival times monotonic so FIFO order never runs backwards
        if let Some(last) = inner.last_enqueued_at {
            if user.enqueued_at < last {
                user.enqueued_at = last;
            }
        }
        inner.last_enqueued_at = Some(user.enqueued_at);

        inner.next_sequence += 1;
        user.sequence = inner.next_sequence;

        debug!("Queued {} with sequence {}", user.id, user.sequence);
        inner.waiting.insert(user.id.clone(), user);
        Ok(EnqueueOutcome::Inserted)
    }

    fn remove(&self, user_id: &str) -> Result<Option<WaitingUser>> {
        Ok(self.write()?.waiting.remove(user_id))
    }

    fn get(&self, user_id: &str) -> Result<Option<WaitingUser>> {
        Ok(self.read()?.waiting.get(user_id).cloned())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read()?.waiting.len())
    }

    fn scan_candidates(&self, for_user: &str, limit: usize) -> Result<Vec<WaitingUser>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let inner = self.read()?;
        let now = crate::utils::current_timestamp();

        let mut scored: Vec<(PriorityScore, &WaitingUser)> = inner
            .waiting
            .values()
            .filter(|user| user.id != for_user)
            .map(|user| (PriorityScore::of(user, now), user))
            .collect();

        if scored.len() > limit {
            scored.select_nth_unstable_by(limit - 1, |a, b| b.0.cmp(&a.0));
            scored.truncate(limit);
        }
        scored.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().map(|(_, user)| user.clone()).collect())
    }

    fn claim_pair(
        &self,
        user_id: &str,
        candidate_id: &str,
        build: &mut PairBuilder<'_>,
    ) -> Result<ClaimOutcome> {
        let mut inner = self.write()?;

        let Some(user) = inner.waiting.get(user_id) else {
            return Ok(ClaimOutcome::SelfGone);
        };
        let Some(candidate) = inner.waiting.get(candidate_id) else {
            return Ok(ClaimOutcome::CandidateGone);
        };

        match build(user, candidate)? {
            Some(room) => {
                inner.waiting.remove(user_id);
                inner.waiting.remove(candidate_id);
                Ok(ClaimOutcome::Claimed(room))
            }
            None => Ok(ClaimOutcome::CandidateGone),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::RoomMember;
    use crate::types::{Tier, UserProfile};
    use chrono::Duration;

    fn waiting(id: &str, tier: Tier) -> WaitingUser {
        WaitingUser::new(id, UserProfile::default().with_tier(tier))
    }

    fn room_for(a: &WaitingUser, b: &WaitingUser) -> Room {
        Room::new(
            uuid::Uuid::new_v4(),
            RoomMember {
                id: a.id.clone(),
                profile: a.profile.clone(),
            },
            RoomMember {
                id: b.id.clone(),
                profile: b.profile.clone(),
            },
        )
    }

    #[test]
    fn test_enqueue_refresh_keeps_wait_time() {
        let store = InMemoryQueueStore::new();
        let first = waiting("alice", Tier::Free);
        let original_time = first.enqueued_at;

        assert_eq!(store.enqueue(first).unwrap(), EnqueueOutcome::Inserted);

        let again = waiting("alice", Tier::Paid).with_enqueued_at(original_time + Duration::hours(1));
        assert_eq!(store.enqueue(again).unwrap(), EnqueueOutcome::Refreshed);

        let stored = store.get("alice").unwrap().unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(stored.enqueued_at, original_time);
        assert_eq!(stored.sequence, 1);
        assert_eq!(stored.profile.tier, Tier::Paid);
    }

    #[test]
    fn test_refused_admission_writes_nothing() {
        let store = InMemoryQueueStore::new();
        store.enqueue(waiting("alice", Tier::Free)).unwrap();

        let outcome = store
            .enqueue_if(waiting("alice", Tier::Paid), &mut |_| Ok(false))
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Refused);
        assert_eq!(store.get("alice").unwrap().unwrap().profile.tier, Tier::Free);

        let outcome = store
            .enqueue_if(waiting("bob", Tier::Free), &mut |user| Ok(user.id != "bob"))
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Refused);
        assert!(!store.contains("bob").unwrap());

        let failed = store.enqueue_if(waiting("carol", Tier::Free), &mut |_| {
            Err(anyhow::anyhow!("registry unavailable"))
        });
        assert!(failed.is_err());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = InMemoryQueueStore::new();
        store.enqueue(waiting("bob", Tier::Free)).unwrap();

        assert!(store.remove("bob").unwrap().is_some());
        assert!(store.remove("bob").unwrap().is_none());
        assert!(store.remove("nobody").unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_enqueue_times_are_monotonic() {
        let store = InMemoryQueueStore::new();
        let now = Utc::now();
        store
            .enqueue(waiting("late", Tier::Free).with_enqueued_at(now))
            .unwrap();
        store
            .enqueue(waiting("skewed", Tier::Free).with_enqueued_at(now - Duration::seconds(30)))
            .unwrap();

        let late = store.get("late").unwrap().unwrap();
        let skewed = store.get("skewed").unwrap().unwrap();
        assert!(skewed.enqueued_at >= late.enqueued_at);
        assert!(skewed.sequence > late.sequence);
    }

    #[test]
    fn test_scan_orders_by_priority_and_excludes_self() {
        let store = InMemoryQueueStore::new();
        store.enqueue(waiting("a", Tier::Free)).unwrap();
        store.enqueue(waiting("b", Tier::Paid)).unwrap();
        store.enqueue(waiting("c", Tier::Free)).unwrap();
        store.enqueue(waiting("d", Tier::Trial)).unwrap();

        let ids: Vec<String> = store
            .scan_candidates("d", DEFAULT_SCAN_LIMIT)
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let top: Vec<String> = store
            .scan_candidates("x", 2)
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(top, vec!["b", "d"]);

        assert!(store.scan_candidates("a", 0).unwrap().is_empty());
    }

    #[test]
    fn test_claim_pair_removes_both() {
        let store = InMemoryQueueStore::new();
        store.enqueue(waiting("a", Tier::Free)).unwrap();
        store.enqueue(waiting("b", Tier::Free)).unwrap();

        let outcome = store
            .claim_pair("a", "b", &mut |user, candidate| Ok(Some(room_for(user, candidate))))
            .unwrap();

        assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_claim_pair_reports_missing_users() {
        let store = InMemoryQueueStore::new();
        store.enqueue(waiting("a", Tier::Free)).unwrap();

        let mut build = |user: &WaitingUser, candidate: &WaitingUser| -> Result<Option<Room>> {
            Ok(Some(room_for(user, candidate)))
        };
        assert_eq!(
            store.claim_pair("a", "gone", &mut build).unwrap(),
            ClaimOutcome::CandidateGone
        );
        assert_eq!(
            store.claim_pair("gone", "a", &mut build).unwrap(),
            ClaimOutcome::SelfGone
        );
        assert!(store.contains("a").unwrap());
    }

    #[test]
    fn test_rejected_pair_leaves_both_waiting() {
        let store = InMemoryQueueStore::new();
        store.enqueue(waiting("a", Tier::Free)).unwrap();
        store.enqueue(waiting("b", Tier::Free)).unwrap();

        let outcome = store.claim_pair("a", "b", &mut |_, _| Ok(None)).unwrap();
        assert_eq!(outcome, ClaimOutcome::CandidateGone);

        let failed = store.claim_pair("a", "b", &mut |_, _| {
            Err(anyhow::anyhow!("registry unavailable"))
        });
        assert!(failed.is_err());
        assert_eq!(store.len().unwrap(), 2);
    }
}
