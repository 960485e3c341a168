use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Calendar day identifier in UTC, `YYYY-MM-DD`.
pub fn day_id(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

/// Today's day id in UTC.
pub fn today() -> String {
    day_id(Utc::now())
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Rough token estimate: one token per 4 characters, rounded up.
/// Used consistently by the hydrator budget and the eviction bounds.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

static TURN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Time-sortable, process-monotonic turn id: `turn_<epoch_ms>_<seq>`.
///
/// The sequence counter disambiguates turns generated within the same
/// millisecond; lexicographic order equals creation order.
pub fn new_turn_id() -> String {
    let seq = TURN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("turn_{:013}_{:05}", now_ms(), seq)
}

/// Short random nonce for chunk/fact ids (8 hex chars of a v4 UUID).
pub fn nonce() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Categorical label for the user's emotional tone, inferred per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affect {
    Neutral,
    Curious,
    Frustrated,
    Excited,
    Confused,
    Satisfied,
    Impatient,
    Engaged,
    Bored,
    Enthusiastic,
    Positive,
    Negative,
}

impl Default for Affect {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Affect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Neutral => "neutral",
            Self::Curious => "curious",
            Self::Frustrated => "frustrated",
            Self::Excited => "excited",
            Self::Confused => "confused",
            Self::Satisfied => "satisfied",
            Self::Impatient => "impatient",
            Self::Engaged => "engaged",
            Self::Bored => "bored",
            Self::Enthusiastic => "enthusiastic",
            Self::Positive => "positive",
            Self::Negative => "negative",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Affect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "neutral" => Ok(Self::Neutral),
            "curious" => Ok(Self::Curious),
            "frustrated" => Ok(Self::Frustrated),
            "excited" => Ok(Self::Excited),
            "confused" => Ok(Self::Confused),
            "satisfied" => Ok(Self::Satisfied),
            "impatient" => Ok(Self::Impatient),
            "engaged" => Ok(Self::Engaged),
            "bored" => Ok(Self::Bored),
            "enthusiastic" => Ok(Self::Enthusiastic),
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            other => Err(format!("unknown affect: {other}")),
        }
    }
}
