//! The routing and orchestration layer: topic-shift detection, the
//! governor's three-way retrieval fan-out, priority-weighted prompt
//! hydration, response-metadata extraction, the LLM fact scrubber, the
//! scribe/synthesis contracts, and the per-turn chat pipeline that
//! composes all of it.

pub mod engine;
pub mod governor;
pub mod hydrate;
pub mod metadata;
pub mod pipeline;
pub mod scrubber;
pub mod shift;
pub mod synthesis;

pub use engine::{ChatEngine, ChatEngineDeps};
pub use governor::{Governor, GovernorError, GovernorResult, RouteScenario, RoutingDecision};
pub use hydrate::{allocate_token_budget, build_context, HydrationInput, TokenBudget};
pub use metadata::{extract_metadata, metadata_instructions, TurnMetadata};
pub use pipeline::ChatOutcome;
pub use scrubber::{extract_facts, ExtractedFact};
pub use shift::{check_for_shift, check_for_shift_with_metadata, ShiftDecision};
pub use synthesis::{
    DaySynthesis, DaySynthesizer, NoProfile, ProfileSource, Scribe, WeekSynthesis,
    WeekSynthesizer,
};
