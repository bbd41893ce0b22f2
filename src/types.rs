//! Common types used throughout the matchmaking and signaling service

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use uuid::Uuid;

/// Identity supplied by the external session provider
pub type UserId = String;

/// Unique identifier for rooms
pub type RoomId = Uuid;

/// Unique identifier for one transport-level connection
pub type ConnectionId = Uuid;

/// Gender a user declares for themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Couple,
    Lgbt,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Couple => "couple",
            Gender::Lgbt => "lgbt",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "couple" => Ok(Gender::Couple),
            "lgbt" | "lgbtq" => Ok(Gender::Lgbt),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Gender {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

/// Who a user wants to be paired with.
///
/// A missing or `null` preference means `Any`, so an incomplete profile
/// still matches as widely as possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GenderPreference {
    #[default]
    Any,
    Only(Gender),
}

impl FromStr for GenderPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "any" | "all" => Ok(GenderPreference::Any),
            other => other.parse().map(GenderPreference::Only),
        }
    }
}

impl std::fmt::Display for GenderPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenderPreference::Any => f.write_str("any"),
            GenderPreference::Only(gender) => write!(f, "{}", gender),
        }
    }
}

impl Serialize for GenderPreference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GenderPreference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(GenderPreference::Any),
            Some(raw) => raw.parse().map_err(de::Error::custom),
        }
    }
}

/// Subscription tier supplied by the entitlement provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    #[default]
    #[serde(alias = "free")]
    Free,
    #[serde(alias = "trial")]
    Trial,
    #[serde(alias = "paid")]
    Paid,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Trial => "trial",
            Tier::Paid => "paid",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preferences and entitlements a user enqueues with
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub declared_gender: Option<Gender>,
    pub looking_for: GenderPreference,
    pub tier: Tier,
    pub boosted: bool,
    /// When the boost entitlement lapses; `None` means it lasts the whole wait
    pub boosted_until: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn new(declared_gender: Option<Gender>, looking_for: GenderPreference) -> Self {
        Self {
            declared_gender,
            looking_for,
            ..Self::default()
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_boost(mut self, boosted_until: Option<DateTime<Utc>>) -> Self {
        self.boosted = true;
        self.boosted_until = boosted_until;
        self
    }

    /// Whether the boost entitlement is active at `now`
    pub fn is_boosted_at(&self, now: DateTime<Utc>) -> bool {
        self.boosted && self.boosted_until.map_or(true, |until| until > now)
    }
}

/// A user currently held by the queue store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingUser {
    pub id: UserId,
    pub profile: UserProfile,
    pub enqueued_at: DateTime<Utc>,
    /// Strict FIFO tie-break assigned by the store on first insert
    pub sequence: u64,
    /// Former partner that must not be matched again on this wait
    pub avoid: Option<UserId>,
}

impl WaitingUser {
    pub fn new(id: impl Into<UserId>, profile: UserProfile) -> Self {
        Self {
            id: id.into(),
            profile,
            enqueued_at: crate::utils::current_timestamp(),
            sequence: 0,
            avoid: None,
        }
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    pub fn avoiding(mut self, partner: Option<UserId>) -> Self {
        self.avoid = partner;
        self
    }
}

/// Kind of a negotiation message exchanged inside a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    #[serde(alias = "candidate")]
    IceCandidate,
    Text,
    Leave,
    Next,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::Text => "text",
            SignalKind::Leave => "leave",
            SignalKind::Next => "next",
        }
    }

    /// Control kinds end the pairing instead of being relayed
    pub fn is_control(&self) -> bool {
        matches!(self, SignalKind::Leave | SignalKind::Next)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient signaling message routed through the relay
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    pub kind: SignalKind,
    pub sender_id: UserId,
    pub room_id: RoomId,
    pub payload: serde_json::Value,
}

/// Why a room was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    PartnerLeft,
    NextRequested,
    Error,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PartnerLeft => "partner-left",
            CloseReason::NextRequested => "next-requested",
            CloseReason::Error => "error",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events received from a client connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Enqueue {
        #[serde(default)]
        user_id: Option<UserId>,
        #[serde(default)]
        gender: Option<Gender>,
        #[serde(default)]
        looking_for: GenderPreference,
        #[serde(default)]
        tier: Tier,
        #[serde(default)]
        boosted: bool,
        #[serde(default)]
        boosted_until: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    Leave {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    #[serde(rename_all = "camelCase")]
    Signal {
        room_id: RoomId,
        kind: SignalKind,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Next,
    Ping,
}

impl ClientEvent {
    /// Event name used for logging and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Enqueue { .. } => "enqueue",
            ClientEvent::Leave { .. } => "leave",
            ClientEvent::Signal { .. } => "signal",
            ClientEvent::Next => "next",
            ClientEvent::Ping => "ping",
        }
    }
}

/// Events sent back down a client connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Matched { room_id: RoomId, partner_id: UserId },
    NoMatch,
    #[serde(rename_all = "camelCase")]
    Signal {
        room_id: RoomId,
        kind: SignalKind,
        payload: serde_json::Value,
        from: UserId,
    },
    #[serde(rename_all = "camelCase")]
    RoomClosed { room_id: RoomId, reason: CloseReason },
    Left,
    Error { code: String, message: String },
    Pong,
}
