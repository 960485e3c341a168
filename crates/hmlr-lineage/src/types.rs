use serde::{Deserialize, Serialize};

/// What kind of item a lineage row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Turn,
    Fact,
    Memory,
    Block,
    Summary,
    Chunk,
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Turn => "turn",
            Self::Fact => "fact",
            Self::Memory => "memory",
            Self::Block => "block",
            Self::Summary => "summary",
            Self::Chunk => "chunk",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "turn" => Ok(Self::Turn),
            "fact" => Ok(Self::Fact),
            "memory" => Ok(Self::Memory),
            "block" => Ok(Self::Block),
            "summary" => Ok(Self::Summary),
            "chunk" => Ok(Self::Chunk),
            other => Err(format!("unknown item type: {other}")),
        }
    }
}

/// One derivation record: `item_id` was derived from `derived_from` by
/// the process tagged `derived_by`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEdge {
    pub item_id: String,
    pub item_type: ItemType,
    pub derived_from: Vec<String>,
    pub derived_by: String,
    pub created_at: String,
}

/// Result of a full-table integrity sweep.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub valid: bool,
    /// Rows with no parents and no children.
    pub orphaned_items: Vec<String>,
    /// Parent ids that do not resolve inside the lineage table. Ids living
    /// in other collections are expected here; callers must interpret.
    pub broken_references: Vec<String>,
}
