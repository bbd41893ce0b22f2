//! Matchmaking policy configuration

use crate::matching::store::DEFAULT_SCAN_LIMIT;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Who goes back into the queue when a user asks for the next partner
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum NextPolicy {
    /// Only the user who pressed next
    Requester,
    /// Both former partners keep searching
    #[default]
    Both,
}

impl FromStr for NextPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "requester" => Ok(NextPolicy::Requester),
            "both" => Ok(NextPolicy::Both),
            other => Err(format!("unknown next policy '{}'", other)),
        }
    }
}

/// Matchmaking-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Candidates inspected per matcher pass
    pub scan_limit: usize,
    /// Re-enqueue policy after `next`
    pub next_policy: NextPolicy,
    /// Put the remaining member back in the queue when their partner leaves
    pub requeue_partner_on_leave: bool,
    /// Largest accepted inbound frame in bytes
    pub max_message_bytes: usize,
    /// Gauge refresh interval in seconds
    pub metrics_interval_seconds: u64,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            scan_limit: DEFAULT_SCAN_LIMIT,
            next_policy: NextPolicy::Both,
            requeue_partner_on_leave: false,
            max_message_bytes: 64 * 1024,
            metrics_interval_seconds: 30,
        }
    }
}
