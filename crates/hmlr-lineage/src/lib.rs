//! Provenance tracking: every derived item records which items produced
//! it and by what process. Edges form a DAG traversed with explicit BFS
//! and a visited set.

pub mod db;
pub mod tracker;
pub mod types;

mod error;

pub use error::LineageError;
pub use tracker::LineageTracker;
pub use types::{IntegrityReport, ItemType, LineageEdge};
