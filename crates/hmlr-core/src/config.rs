use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level engine config (`hmlr.toml` + `HMLR_*` env overrides).
///
/// Immutable once loaded; every component receives the section it needs at
/// construction time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HmlrConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl HmlrConfig {
    /// Load from `hmlr.toml` in the working directory, then apply
    /// `HMLR_*` environment overrides (`HMLR_WINDOW__TOP_K` style nesting).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("hmlr.toml"))
            .merge(Env::prefixed("HMLR_").split("__"))
            .extract()
    }
}

/// Chat model tiers: `default_model` generates responses, `governor_model`
/// is the small tier for routing, memory filtering, and metadata synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "governor_model")]
    pub governor_model: String,
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-call timeout for any chat request.
    #[serde(default = "default_llm_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            governor_model: governor_model(),
            max_response_tokens: default_max_response_tokens(),
            temperature: default_temperature(),
            request_timeout_ms: default_llm_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Vector dimension D. Fixed at schema time; stored vectors must match.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
            model: default_embedding_model(),
            request_timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

/// Token budget knobs for the hydrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_system_tokens")]
    pub system_tokens: usize,
    #[serde(default = "default_task_tokens")]
    pub task_tokens: usize,
    #[serde(default = "default_profile_max_tokens")]
    pub profile_max_tokens: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            system_tokens: default_system_tokens(),
            task_tokens: default_task_tokens(),
            profile_max_tokens: default_profile_max_tokens(),
        }
    }
}

/// Sliding-window compression, eviction, and rehydration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_verbatim_hard_cap")]
    pub verbatim_hard_cap: usize,
    #[serde(default = "default_compress_all_keep")]
    pub compress_all_keep: usize,
    #[serde(default = "default_compress_partial_keep")]
    pub compress_partial_keep: usize,
    #[serde(default = "default_very_different")]
    pub very_different_threshold: f64,
    #[serde(default = "default_somewhat_different")]
    pub somewhat_different_threshold: f64,
    #[serde(default = "default_long_gap_hours")]
    pub long_gap_hours: f64,
    #[serde(default = "default_time_eviction_hours")]
    pub time_eviction_hours: f64,
    #[serde(default = "default_max_tier2_turns")]
    pub max_tier2_turns: usize,
    #[serde(default = "default_max_tier2_tokens")]
    pub max_tier2_tokens: usize,
    #[serde(default = "default_max_rehydration_turns")]
    pub max_rehydration_turns: usize,
    #[serde(default = "default_prefetch_window")]
    pub prefetch_window: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            verbatim_hard_cap: default_verbatim_hard_cap(),
            compress_all_keep: default_compress_all_keep(),
            compress_partial_keep: default_compress_partial_keep(),
            very_different_threshold: default_very_different(),
            somewhat_different_threshold: default_somewhat_different(),
            long_gap_hours: default_long_gap_hours(),
            time_eviction_hours: default_time_eviction_hours(),
            max_tier2_turns: default_max_tier2_turns(),
            max_tier2_tokens: default_max_tier2_tokens(),
            max_rehydration_turns: default_max_rehydration_turns(),
            prefetch_window: default_prefetch_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_hybrid_min_score")]
    pub hybrid_min_score: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_gardened_min_similarity")]
    pub gardened_min_similarity: f64,
    /// Exclude memories from the current day in gardened search (today's
    /// turns already live in the sliding window). Disable when the window
    /// is off.
    #[serde(default = "bool_true")]
    pub garden_exclude_current_day: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            hybrid_min_score: default_hybrid_min_score(),
            top_k: default_top_k(),
            gardened_min_similarity: default_gardened_min_similarity(),
            garden_exclude_current_day: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn governor_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_max_response_tokens() -> u32 {
    2000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_ms() -> u64 {
    60_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_dimensions() -> usize {
    1024
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_embedding_timeout_ms() -> u64 {
    15_000
}
fn default_max_context_tokens() -> usize {
    8000
}
fn default_system_tokens() -> usize {
    500
}
fn default_task_tokens() -> usize {
    500
}
fn default_profile_max_tokens() -> usize {
    300
}
fn default_verbatim_hard_cap() -> usize {
    15
}
fn default_compress_all_keep() -> usize {
    5
}
fn default_compress_partial_keep() -> usize {
    10
}
fn default_very_different() -> f64 {
    0.8
}
fn default_somewhat_different() -> f64 {
    0.6
}
fn default_long_gap_hours() -> f64 {
    12.0
}
fn default_time_eviction_hours() -> f64 {
    24.0
}
fn default_max_tier2_turns() -> usize {
    30
}
fn default_max_tier2_tokens() -> usize {
    5000
}
fn default_max_rehydration_turns() -> usize {
    10
}
fn default_prefetch_window() -> usize {
    3
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_hybrid_min_score() -> f64 {
    0.3
}
fn default_top_k() -> usize {
    10
}
fn default_gardened_min_similarity() -> f64 {
    0.4
}
fn default_db_path() -> String {
    "hmlr.db".to_string()
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = HmlrConfig::default();
        assert_eq!(cfg.embedding.dimensions, 1024);
        assert_eq!(cfg.budget.max_context_tokens, 8000);
        assert_eq!(cfg.window.verbatim_hard_cap, 15);
        assert_eq!(cfg.window.max_tier2_turns, 30);
        assert!((cfg.retrieval.vector_weight - 0.7).abs() < f64::EPSILON);
        assert!(cfg.retrieval.garden_exclude_current_day);
    }
}
