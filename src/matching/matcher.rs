//! Greedy first-fit matcher
//!
//! A matcher pass enqueues the arriving user, scans the best `scan_limit`
//! candidates in priority order, and claims the first compatible one. Claim
//! and room creation happen in one store-locked step, so two concurrent passes
//! can never both take the same candidate. A candidate that vanished between
//! scan and claim is skipped.

use crate::error::Result;
use crate::matching::compatibility::compatible;
use crate::matching::store::{AdmissionCheck, ClaimOutcome, EnqueueOutcome, QueueStore};
use crate::metrics::MetricsCollector;
use crate::rooms::{Room, RoomMember, RoomRegistry};
use crate::types::WaitingUser;
use crate::utils::{current_timestamp, seconds_since};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Matcher {
    store: Arc<dyn QueueStore>,
    registry: Arc<RoomRegistry>,
    scan_limit: usize,
    metrics_collector: Arc<MetricsCollector>,
}

impl Matcher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        registry: Arc<RoomRegistry>,
        scan_limit: usize,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            registry,
            scan_limit,
            metrics_collector,
        }
    }

    pub fn scan_limit(&self) -> usize {
        self.scan_limit
    }

    /// Whether two waiting users may be paired on this pass
    fn may_pair(user: &WaitingUser, candidate: &WaitingUser) -> bool {
        let avoided = user.avoid.as_deref() == Some(candidate.id.as_str())
            || candidate.avoid.as_deref() == Some(user.id.as_str());
        !avoided && compatible(&user.profile, &candidate.profile)
    }

    /// Try to pair `user` with the best compatible waiting candidate.
    ///
    /// Returns the new room, or `None` if the user is left waiting.
    pub fn try_match(&self, user: WaitingUser) -> Result<Option<Room>> {
        self.try_match_if(user, &mut |_| Ok(true))
    }

    /// `try_match`, with an extra condition the user must meet to enter the
    /// queue. A user who is already in a room is never queued.
    pub fn try_match_if(
        &self,
        user: WaitingUser,
        admit: &mut AdmissionCheck<'_>,
    ) -> Result<Option<Room>> {
        let timer = self.metrics_collector.start_timer();
        let user_id = user.id.clone();

        let registry = &self.registry;
        let outcome = self.store.enqueue_if(user, &mut |waiting: &WaitingUser| {
            Ok(!registry.is_paired(&waiting.id)? && admit(waiting)?)
        })?;
        if outcome == EnqueueOutcome::Refused {
            debug!("{} was not queued: already paired or no longer connected", user_id);
            self.metrics_collector.record_no_match(timer.stop());
            return Ok(None);
        }

        let candidates = self.store.scan_candidates(&user_id, self.scan_limit)?;
        debug!("Scanning {} candidates for {}", candidates.len(), user_id);

        for candidate in candidates {
            // Re-read our own entry: a refresh may have changed preferences
            let Some(current) = self.store.get(&user_id)? else {
                debug!("{} left the queue during its own match pass", user_id);
                self.metrics_collector.record_no_match(timer.stop());
                return Ok(None);
            };
            if !Self::may_pair(&current, &candidate) {
                continue;
            }

            let registry = &self.registry;
            let mut waited = Vec::with_capacity(2);
            let outcome = self.store.claim_pair(
                &user_id,
                &candidate.id,
                &mut |claimer: &WaitingUser, partner: &WaitingUser| {
                    // The stored candidate may have refreshed since the scan
                    if !Self::may_pair(claimer, partner) {
                        return Ok(None);
                    }
                    if registry.is_paired(&claimer.id)? || registry.is_paired(&partner.id)? {
                        return Ok(None);
                    }

                    let now = current_timestamp();
                    waited = vec![
                        seconds_since(claimer.enqueued_at, now),
                        seconds_since(partner.enqueued_at, now),
                    ];

                    let room = registry.create_room(
                        RoomMember {
                            id: claimer.id.clone(),
                            profile: claimer.profile.clone(),
                        },
                        RoomMember {
                            id: partner.id.clone(),
                            profile: partner.profile.clone(),
                        },
                    )?;
                    Ok(Some(room))
                },
            )?;

            match outcome {
                ClaimOutcome::Claimed(room) => {
                    self.metrics_collector.record_match(&waited, timer.stop());
                    info!(
                        "Matched {} with {} in room {}",
                        user_id, candidate.id, room.id
                    );
                    return Ok(Some(room));
                }
                ClaimOutcome::CandidateGone => {
                    self.metrics_collector.record_claim_conflict();
                    debug!("Candidate {} no longer available for {}", candidate.id, user_id);
                }
                ClaimOutcome::SelfGone => {
                    debug!("{} was claimed or removed before it could claim", user_id);
                    self.metrics_collector.record_no_match(timer.stop());
                    return Ok(None);
                }
            }
        }

        self.metrics_collector.record_no_match(timer.stop());
        debug!("No compatible partner for {} yet", user_id);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::store::{InMemoryQueueStore, DEFAULT_SCAN_LIMIT};
    use crate::sink::RecordingSink;
    use crate::types::{Gender, GenderPreference, Tier, UserProfile};

    struct TestContext {
        matcher: Matcher,
        store: Arc<InMemoryQueueStore>,
        registry: Arc<RoomRegistry>,
    }

    fn create_test_matcher(scan_limit: usize) -> TestContext {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(InMemoryQueueStore::new());
        let registry = Arc::new(RoomRegistry::new(sink, metrics.clone()));
        let matcher = Matcher::new(store.clone(), registry.clone(), scan_limit, metrics);
        TestContext {
            matcher,
            store,
            registry,
        }
    }

    fn user(id: &str, gender: Gender, looking_for: GenderPreference) -> WaitingUser {
        WaitingUser::new(id, UserProfile::new(Some(gender), looking_for))
    }

    #[test]
    fn test_first_user_waits() {
        let ctx = create_test_matcher(DEFAULT_SCAN_LIMIT);
        let result = ctx
            .matcher
            .try_match(user("u1", Gender::Male, GenderPreference::Any))
            .unwrap();

        assert!(result.is_none());
        assert!(ctx.store.contains("u1").unwrap());
    }

    #[test]
    fn test_compatible_pair_is_matched() {
        let ctx = create_test_matcher(DEFAULT_SCAN_LIMIT);
        ctx.matcher
            .try_match(user("u1", Gender::Male, GenderPreference::Any))
            .unwrap();

        let room = ctx
            .matcher
            .try_match(user(
                "u2",
                Gender::Female,
                GenderPreference::Only(Gender::Male),
            ))
            .unwrap()
            .expect("u2 should match u1");

        assert!(room.is_member("u1"));
        assert!(room.is_member("u2"));
        assert!(ctx.store.is_empty().unwrap());
        assert_eq!(ctx.registry.stats().unwrap().active_rooms, 1);
    }

    #[test]
    fn test_incompatible_users_both_wait() {
        let ctx = create_test_matcher(DEFAULT_SCAN_LIMIT);
        ctx.matcher
            .try_match(user("u1", Gender::Male, GenderPreference::Only(Gender::Male)))
            .unwrap();
        let result = ctx
            .matcher
            .try_match(user(
                "u2",
                Gender::Female,
                GenderPreference::Only(Gender::Male),
            ))
            .unwrap();

        assert!(result.is_none());
        assert_eq!(ctx.store.len().unwrap(), 2);
    }

    #[test]
    fn test_highest_priority_candidate_wins() {
        let ctx = create_test_matcher(DEFAULT_SCAN_LIMIT);
        for (id, tier) in [("a", Tier::Free), ("b", Tier::Paid), ("c", Tier::Free)] {
            let mut waiting = user(id, Gender::Male, GenderPreference::Any);
            waiting.profile.tier = tier;
            ctx.store.enqueue(waiting).unwrap();
        }

        let room = ctx
            .matcher
            .try_match(user("d", Gender::Female, GenderPreference::Any))
            .unwrap()
            .unwrap();

        assert_eq!(room.partner_of("d").map(|m| m.id.as_str()), Some("b"));
    }

    #[test]
    fn test_avoided_partner_is_skipped() {
        let ctx = create_test_matcher(DEFAULT_SCAN_LIMIT);
        ctx.store
            .enqueue(user("old", Gender::Male, GenderPreference::Any))
            .unwrap();

        let result = ctx
            .matcher
            .try_match(
                user("me", Gender::Female, GenderPreference::Any).avoiding(Some("old".to_string())),
            )
            .unwrap();
        assert!(result.is_none());

        ctx.store
            .enqueue(user("new", Gender::Male, GenderPreference::Any))
            .unwrap();
        let room = ctx
            .matcher
            .try_match(user("me", Gender::Female, GenderPreference::Any).avoiding(Some("old".to_string())))
            .unwrap()
            .unwrap();
        assert_eq!(room.partner_of("me").map(|m| m.id.as_str()), Some("new"));
    }

    #[test]
    fn test_paired_user_is_not_queued_again() {
        let ctx = create_test_matcher(DEFAULT_SCAN_LIMIT);
        ctx.matcher
            .try_match(user("a", Gender::Female, GenderPreference::Any))
            .unwrap();
        let room = ctx
            .matcher
            .try_match(user("b", Gender::Male, GenderPreference::Any))
            .unwrap()
            .expect("b should match a");

        // A late refresh from a lands after b already claimed it
        let refreshed = ctx
            .matcher
            .try_match(user("a", Gender::Female, GenderPreference::Any))
            .unwrap();

        assert!(refreshed.is_none());
        assert!(!ctx.store.contains("a").unwrap());
        assert_eq!(
            ctx.registry.room_for_member("a").unwrap().map(|r| r.id),
            Some(room.id)
        );
    }

    #[test]
    fn test_admission_check_can_turn_user_away() {
        let ctx = create_test_matcher(DEFAULT_SCAN_LIMIT);
        ctx.store
            .enqueue(user("waiting", Gender::Male, GenderPreference::Any))
            .unwrap();

        let result = ctx
            .matcher
            .try_match_if(
                user("stale", Gender::Female, GenderPreference::Any),
                &mut |_| Ok(false),
            )
            .unwrap();

        assert!(result.is_none());
        assert!(!ctx.store.contains("stale").unwrap());
        assert!(ctx.store.contains("waiting").unwrap());
    }

    #[test]
    fn test_scan_limit_bounds_search() {
        let ctx = create_test_matcher(1);
        // The best-ranked candidate is incompatible, so a limit of one finds nothing
        let mut paid = user("paid", Gender::Male, GenderPreference::Only(Gender::Male));
        paid.profile.tier = Tier::Paid;
        ctx.store.enqueue(paid).unwrap();
        ctx.store
            .enqueue(user("free", Gender::Male, GenderPreference::Any))
            .unwrap();

        let result = ctx
            .matcher
            .try_match(user("f", Gender::Female, GenderPreference::Any))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(ctx.matcher.scan_limit(), 1);
    }
}
