//! Retrieval surface over memories, chunks, and facts: lexical scoring,
//! weighted hybrid (vector + lexical) ranking, and the gardened search
//! over prior days' memories.

pub mod gardened;
pub mod hybrid;
pub mod lexical;

pub use gardened::{gardened_search, GardenedMemory, GardenedParams};
pub use hybrid::{hybrid_search, semantic_search, HybridParams};
pub use lexical::{lexical_score, search_chunks, search_facts, search_memories, ScoredChunk};
