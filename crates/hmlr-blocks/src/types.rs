use serde::{Deserialize, Serialize};

/// Cardinality bounds on block metadata lists.
pub const MAX_KEYWORDS: usize = 20;
pub const MAX_OPEN_LOOPS: usize = 10;
pub const MAX_DECISIONS: usize = 10;

/// Block lifecycle state.
///
/// ACTIVE → PAUSED on a topic shift, PAUSED → ACTIVE on resumption, any →
/// CLOSED only via explicit operator action. Blocks are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockStatus {
    Active,
    Paused,
    Closed,
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Closed => "CLOSED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BlockStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "PAUSED" => Ok(Self::Paused),
            "CLOSED" => Ok(Self::Closed),
            other => Err(format!("unknown block status: {other}")),
        }
    }
}

/// Topic container for a contiguous run of turns within a day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeBlock {
    pub block_id: String,
    /// UTC calendar date, `YYYY-MM-DD`.
    pub day_id: String,
    pub topic_label: String,
    pub summary: String,
    /// ≤ 20 short tokens.
    pub keywords: Vec<String>,
    pub status: BlockStatus,
    pub prev_block_id: Option<String>,
    /// ≤ 10 entries.
    pub open_loops: Vec<String>,
    /// ≤ 10 entries.
    pub decisions_made: Vec<String>,
    pub turn_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

/// Lightweight projection of a block used by the governor's routing prompt.
#[derive(Debug, Clone, Serialize)]
pub struct BlockMeta {
    pub block_id: String,
    pub topic_label: String,
    pub status: BlockStatus,
    pub summary: String,
    pub keywords: Vec<String>,
    pub turn_count: usize,
    pub updated_at: String,
    /// True for the most recently updated block of the day. Ties on
    /// `updated_at` resolve by descending block id (newer block wins).
    pub is_last_active: bool,
}

/// One immutable user/assistant exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: String,
    pub block_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub keywords: Vec<String>,
    pub affect: String,
    pub timestamp: String,
    /// Set when the sliding-window eviction moved this turn out of the
    /// working set. The row itself stays for rehydration.
    pub evicted: bool,
}

/// Input for `append_turn`.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub turn_id: String,
    pub block_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub keywords: Vec<String>,
    pub affect: String,
}

/// A job request written atomically with a turn append and later drained
/// into the durable job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub kind: String,
    pub payload: String,
}

/// Merge-style update applied to a block's metadata. List fields merge as
/// deduped ordered sets clamped to their bounds; `summary` and
/// `topic_label` overwrite when present.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub topic_label: Option<String>,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub open_loops: Vec<String>,
    pub decisions_made: Vec<String>,
}
