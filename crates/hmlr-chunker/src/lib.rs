//! Splits turn text into paragraph and sentence chunks with stop-word
//! filtered lexical terms. Chunks are persisted before routing completes,
//! so `block_id` stays `None` until the governor patches it in bulk.

mod split;
mod types;

pub use split::chunk_text;
pub use types::{ChunkDraft, ChunkType};
