use serde::{Deserialize, Serialize};

/// Value written to a successor row when a fact is soft-deleted. Read
/// paths must treat a current row with this value as absent.
pub const DELETED_VALUE: &str = "[DELETED]";

/// Optional category for a fact key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    Credential,
    Preference,
    Policy,
    Decision,
    Contact,
    Date,
    General,
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Credential => "credential",
            Self::Preference => "preference",
            Self::Policy => "policy",
            Self::Decision => "decision",
            Self::Contact => "contact",
            Self::Date => "date",
            Self::General => "general",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FactCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credential" => Ok(Self::Credential),
            "preference" => Ok(Self::Preference),
            "policy" => Ok(Self::Policy),
            "decision" => Ok(Self::Decision),
            "contact" => Ok(Self::Contact),
            "date" => Ok(Self::Date),
            "general" => Ok(Self::General),
            other => Err(format!("unknown fact category: {other}")),
        }
    }
}

/// A persisted fact row. Rows are append-only; supersession links chain
/// versions of the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: String,
    /// Case-preserving key; lookups are exact, prefix search is not.
    pub key: String,
    pub value: String,
    pub category: Option<FactCategory>,
    pub block_id: String,
    pub turn_id: Option<String>,
    pub evidence_snippet: Option<String>,
    pub source_chunk_id: Option<String>,
    pub source_paragraph_id: Option<String>,
    /// 0.0–1.0.
    pub confidence: f64,
    /// Id of the row that replaced this one, when superseded.
    pub superseded_by: Option<String>,
    pub created_at: String,
}

/// Input for `store` / `store_batch`.
#[derive(Debug, Clone)]
pub struct NewFact {
    pub key: String,
    pub value: String,
    pub category: Option<FactCategory>,
    pub block_id: String,
    pub turn_id: Option<String>,
    pub evidence_snippet: Option<String>,
    pub source_chunk_id: Option<String>,
    pub source_paragraph_id: Option<String>,
    pub confidence: f64,
}

impl NewFact {
    pub fn new(key: &str, value: &str, block_id: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            category: None,
            block_id: block_id.to_string(),
            turn_id: None,
            evidence_snippet: None,
            source_chunk_id: None,
            source_paragraph_id: None,
            confidence: 0.8,
        }
    }
}
