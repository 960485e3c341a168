//! Bridge blocks: topic-scoped containers for contiguous runs of turns
//! within a day. Owns the block state machine (at most one ACTIVE block at
//! any time), turn appends, metadata merging, and the outbox rows written
//! in the same transaction as each turn commit.

pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::BlockError;
pub use manager::{generate_summary, BlockManager};
pub use types::{
    BlockMeta, BlockStatus, BridgeBlock, MetadataUpdate, NewTurn, OutboxEntry, Turn,
    MAX_DECISIONS, MAX_KEYWORDS, MAX_OPEN_LOOPS,
};
