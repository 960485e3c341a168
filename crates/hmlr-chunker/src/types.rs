use serde::{Deserialize, Serialize};

/// Hierarchy level of a chunk. Sentences always carry a parent paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Sentence,
    Paragraph,
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sentence => write!(f, "sentence"),
            Self::Paragraph => write!(f, "paragraph"),
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sentence" => Ok(Self::Sentence),
            "paragraph" => Ok(Self::Paragraph),
            other => Err(format!("unknown chunk type: {other}")),
        }
    }
}

/// An immutable chunk record as emitted by the splitter, before persistence
/// and before any embedding is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDraft {
    /// Time-prefixed opaque id (`para_…` / `sent_…`).
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub text_verbatim: String,
    /// ≤ 20 deduped lowercase tokens, stop words removed.
    pub lexical_filters: Vec<String>,
    /// Required for sentences; `None` for paragraphs.
    pub parent_chunk_id: Option<String>,
    pub turn_id: String,
    /// Patched in bulk once routing determines the owning block.
    pub block_id: Option<String>,
    pub token_count: usize,
    pub created_at: String,
}
