use serde::{Deserialize, Serialize};

use hmlr_chunker::ChunkType;

/// Embedded text unit for semantic recall. One per turn in the common
/// case (`mem_<turnId>`), more when a turn is split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    pub memory_id: String,
    pub turn_id: String,
    pub block_id: String,
    pub content: String,
    pub chunk_index: usize,
    /// Unit-norm vector of the schema dimension D.
    pub embedding: Vec<f32>,
    pub created_at: String,
}

/// Input for `insert_memory`.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub memory_id: String,
    pub turn_id: String,
    pub block_id: String,
    pub content: String,
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
}

/// A memory with its retrieval score attached.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: MemoryRow,
    pub score: f64,
    /// Query terms that matched lexically, when a lexical pass ran.
    pub matched_terms: Vec<String>,
}

/// A persisted chunk, possibly still waiting for its block assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRow {
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub text_verbatim: String,
    pub lexical_filters: Vec<String>,
    pub parent_chunk_id: Option<String>,
    pub turn_id: String,
    pub block_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub token_count: usize,
    pub created_at: String,
}

/// Per-item retrieval accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStat {
    pub item_id: String,
    pub item_type: String,
    pub usage_count: u64,
    pub first_used: String,
    pub last_used: String,
    /// Topics under which the item was retrieved, deduped.
    pub topics: Vec<String>,
}
