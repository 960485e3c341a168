//! The adaptive sliding window: graduated compression decisions for the
//! current day's turns, time/space eviction with topic-affinity
//! accounting, and keyword-driven rehydration of evicted or earlier turns.

pub mod affinity;
pub mod compressor;
pub mod eviction;
pub mod rehydrate;

mod error;

pub use affinity::{AffinityStore, TopicAffinity};
pub use compressor::{decide_compression, CompressionDecision, CompressionInput, CompressionLevel};
pub use error::WindowError;
pub use eviction::{EvictionReport, WindowMaintainer};
pub use rehydrate::{prefetch_by_affinity, rehydrate};
