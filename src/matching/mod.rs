//! Matching of waiting users into pairs
//!
//! This module holds the compatibility predicate, priority scoring, the
//! waiting-user store and the greedy matcher built on top of them.

pub mod compatibility;
pub mod matcher;
pub mod priority;
pub mod store;

// Re-export commonly used types
pub use compatibility::compatible;
pub use matcher::Matcher;
pub use priority::PriorityScore;
pub use store::{
    AdmissionCheck, ClaimOutcome, EnqueueOutcome, InMemoryQueueStore, QueueStore,
    DEFAULT_SCAN_LIMIT,
};
