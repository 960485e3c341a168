//! I/O contracts for the background distillation layer: the per-user
//! profile scribe and the day/week synthesizers. Their LLM internals are
//! external collaborators; the engine only schedules them (via the turn
//! outbox and the recurring job ticks) and consumes their typed output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hmlr_scheduler::{JobAction, Schedule, SchedulerHandle};

/// Distilled patterns for one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySynthesis {
    pub day_id: String,
    pub summary: String,
    pub key_topics: Vec<String>,
    pub decisions: Vec<String>,
    pub open_loops: Vec<String>,
    pub created_at: String,
}

/// Weekly roll-up over day syntheses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeekSynthesis {
    pub week_start_day_id: String,
    pub summary: String,
    pub themes: Vec<String>,
    pub created_at: String,
}

/// Source of the rendered user-profile paragraph injected into prompts.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// A single paragraph describing the user, at most `max_tokens`
    /// estimated tokens, or `None` when no profile exists yet.
    async fn profile_context(&self, user_id: &str, max_tokens: usize) -> Option<String>;
}

/// Profile source for hosts without a scribe; always empty.
pub struct NoProfile;

#[async_trait]
impl ProfileSource for NoProfile {
    async fn profile_context(&self, _user_id: &str, _max_tokens: usize) -> Option<String> {
        None
    }
}

/// The user-profile distiller, invoked once per committed turn via the
/// outbox-backed job queue.
#[async_trait]
pub trait Scribe: Send + Sync {
    async fn run(&self, user_id: &str);
}

#[async_trait]
pub trait DaySynthesizer: Send + Sync {
    async fn synthesize(&self, day_id: &str) -> Option<DaySynthesis>;
}

#[async_trait]
pub trait WeekSynthesizer: Send + Sync {
    async fn synthesize(&self, week_start_day_id: &str) -> Option<WeekSynthesis>;
}

/// Register the recurring synthesis ticks: day synthesis shortly after
/// UTC midnight, week synthesis on Monday mornings. Idempotent.
pub fn install_synthesis_ticks(
    scheduler: &SchedulerHandle,
    day_id: &str,
    week_start_day_id: &str,
) -> Result<(), hmlr_scheduler::SchedulerError> {
    scheduler.ensure_job(
        "day-synthesis",
        Schedule::Daily { hour: 0, minute: 10 },
        &JobAction::DaySynthesis {
            day_id: day_id.to_string(),
        },
    )?;
    scheduler.ensure_job(
        "week-synthesis",
        Schedule::Weekly {
            day: 0,
            hour: 0,
            minute: 30,
        },
        &JobAction::WeekSynthesis {
            week_start_day_id: week_start_day_id.to_string(),
        },
    )?;
    Ok(())
}
