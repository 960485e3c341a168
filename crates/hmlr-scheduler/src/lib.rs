//! Durable background job queue for synthesis work: per-user scribe runs,
//! daily and weekly synthesis ticks. Turn commits write outbox rows in
//! the same transaction as the turn append; the engine drains the outbox
//! into jobs so no commit ever loses its scribe run.

pub mod db;
pub mod engine;
pub mod schedule;
pub mod types;

mod error;

pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::SchedulerError;
pub use schedule::compute_next_run;
pub use types::{Job, JobAction, JobStatus, Schedule};
