//! Priority scoring for waiting users
//!
//! Scores are derived on every scan from the user's tier, boost entitlement
//! and original enqueue time. They are never stored, because a boost can lapse
//! while the user is still waiting.

use crate::types::{Tier, WaitingUser};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

const PAID_RANK: u8 = 3;
const BOOST_RANK: u8 = 2;
const TRIAL_RANK: u8 = 1;
const FREE_RANK: u8 = 0;

/// Rank granted by a subscription tier alone
pub fn tier_rank(tier: Tier) -> u8 {
    match tier {
        Tier::Paid => PAID_RANK,
        Tier::Trial => TRIAL_RANK,
        Tier::Free => FREE_RANK,
    }
}

/// Ordering key for a waiting user. Greater scores are matched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityScore {
    pub rank: u8,
    pub enqueued_at: DateTime<Utc>,
    pub sequence: u64,
}

impl PriorityScore {
    /// Compute the score of `user` as of `now`
    pub fn of(user: &WaitingUser, now: DateTime<Utc>) -> Self {
        let mut rank = tier_rank(user.profile.tier);
        if user.profile.is_boosted_at(now) {
            rank = rank.max(BOOST_RANK);
        }

        Self {
            rank,
            enqueued_at: user.enqueued_at,
            sequence: user.sequence,
        }
    }
}

impl Ord for PriorityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            // Earlier arrivals outrank later ones
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for PriorityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserProfile;
    use chrono::Duration;
    use proptest::prelude::*;

    fn waiting(tier: Tier, offset_secs: i64, sequence: u64) -> WaitingUser {
        let base = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let mut user = WaitingUser::new(
            format!("user-{}", sequence),
            UserProfile::default().with_tier(tier),
        )
        .with_enqueued_at(base + Duration::seconds(offset_secs));
        user.sequence = sequence;
        user
    }

    #[test]
    fn test_tier_outranks_wait_time() {
        let now = Utc::now();
        let free_early = PriorityScore::of(&waiting(Tier::Free, 0, 1), now);
        let paid_late = PriorityScore::of(&waiting(Tier::Paid, 60, 2), now);
        let trial = PriorityScore::of(&waiting(Tier::Trial, 30, 3), now);

        assert!(paid_late > free_early);
        assert!(trial > free_early);
        assert!(paid_late > trial);
    }

    #[test]
    fn test_boost_ranks_between_trial_and_paid() {
        let now = Utc::now();
        let mut boosted = waiting(Tier::Free, 10, 1);
        boosted.profile = boosted.profile.with_boost(Some(now + Duration::minutes(10)));

        let boosted_score = PriorityScore::of(&boosted, now);
        assert_eq!(boosted_score.rank, BOOST_RANK);
        assert!(boosted_score > PriorityScore::of(&waiting(Tier::Trial, 0, 2), now));
        assert!(boosted_score < PriorityScore::of(&waiting(Tier::Paid, 20, 3), now));

        // A boosted paid user gains nothing over paid alone
        let mut boosted_paid = waiting(Tier::Paid, 0, 4);
        boosted_paid.profile = boosted_paid.profile.with_boost(None);
        assert_eq!(PriorityScore::of(&boosted_paid, now).rank, PAID_RANK);
    }

    #[test]
    fn test_lapsed_boost_is_ignored() {
        let now = Utc::now();
        let mut user = waiting(Tier::Free, 0, 1);
        user.profile = user.profile.with_boost(Some(now + Duration::seconds(5)));

        assert_eq!(PriorityScore::of(&user, now).rank, BOOST_RANK);
        assert_eq!(
            PriorityScore::of(&user, now + Duration::seconds(6)).rank,
            FREE_RANK
        );
    }

    #[test]
    fn test_sequence_breaks_timestamp_ties() {
        let now = Utc::now();
        let first = PriorityScore::of(&waiting(Tier::Free, 0, 1), now);
        let second = PriorityScore::of(&waiting(Tier::Free, 0, 2), now);
        assert!(first > second);
    }

    proptest! {
        #[test]
        fn prop_equal_rank_prefers_earlier_arrival(a in 0i64..10_000, b in 0i64..10_000) {
            prop_assume!(a != b);
            let now = Utc::now();
            let score_a = PriorityScore::of(&waiting(Tier::Trial, a, 1), now);
            let score_b = PriorityScore::of(&waiting(Tier::Trial, b, 2), now);
            prop_assert_eq!(score_a > score_b, a < b);
        }
    }
}
