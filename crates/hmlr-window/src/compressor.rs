use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::RegexSet;
use serde::Serialize;

use hmlr_core::config::WindowConfig;
use hmlr_core::text::{content_words, jaccard};
use hmlr_llm::{cosine_similarity, mean_vector};

/// Graduated compression outcome for the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionLevel {
    NoCompression,
    CompressPartial,
    CompressAll,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressionDecision {
    pub level: CompressionLevel,
    /// How many recent turns stay verbatim. Clamped to the hard cap.
    pub keep_verbatim_count: usize,
    pub reason: String,
    pub has_explicit_reference: bool,
    pub semantic_distance: Option<f64>,
    pub time_gap_hours: f64,
}

/// Inputs for one compression decision.
#[derive(Debug, Clone, Default)]
pub struct CompressionInput<'a> {
    pub query: &'a str,
    pub recent_queries: &'a [String],
    pub query_embedding: Option<&'a [f32]>,
    pub recent_embeddings: &'a [Vec<f32>],
    pub last_turn_at: Option<DateTime<Utc>>,
}

/// Phrases that explicitly reference earlier conversation. Any hit keeps
/// the whole window verbatim so the referenced turn cannot be lost.
static EXPLICIT_REFERENCE: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\bwe discussed\b",
        r"(?i)\byou mentioned\b",
        r"(?i)\byou said\b",
        r"(?i)\bas i said\b",
        r"(?i)\bearlier you\b",
        r"(?i)\bpreviously\b",
        r"(?i)\bgoing back to\b",
    ])
    .expect("explicit reference patterns")
});

/// Decide how aggressively to compress the recent window for this query.
///
/// The decision is a pure function of its inputs: identical inputs always
/// produce identical decisions.
pub fn decide_compression(
    input: &CompressionInput<'_>,
    now: DateTime<Utc>,
    cfg: &WindowConfig,
) -> CompressionDecision {
    let cap = cfg.verbatim_hard_cap;
    let keep_all = input.recent_queries.len().min(cap);

    if input.recent_queries.is_empty() {
        return CompressionDecision {
            level: CompressionLevel::NoCompression,
            keep_verbatim_count: 0,
            reason: "no recent turns".to_string(),
            has_explicit_reference: false,
            semantic_distance: None,
            time_gap_hours: 0.0,
        };
    }

    if EXPLICIT_REFERENCE.is_match(input.query) {
        return CompressionDecision {
            level: CompressionLevel::NoCompression,
            keep_verbatim_count: keep_all,
            reason: "explicit reference to earlier conversation".to_string(),
            has_explicit_reference: true,
            semantic_distance: None,
            time_gap_hours: 0.0,
        };
    }

    let distance = semantic_distance(input);
    let time_gap_hours = input
        .last_turn_at
        .map(|t| (now - t).num_milliseconds() as f64 / 3_600_000.0)
        .unwrap_or(0.0);
    let long_gap = time_gap_hours > cfg.long_gap_hours;

    let (level, keep, reason) = if distance > cfg.very_different_threshold {
        if long_gap {
            (
                CompressionLevel::CompressAll,
                cfg.compress_all_keep,
                "very different topic after a long gap",
            )
        } else {
            (
                CompressionLevel::CompressPartial,
                cfg.compress_partial_keep,
                "very different topic, recent activity",
            )
        }
    } else if distance > cfg.somewhat_different_threshold {
        if long_gap {
            (
                CompressionLevel::CompressPartial,
                cfg.compress_partial_keep,
                "somewhat different topic after a long gap",
            )
        } else {
            (
                CompressionLevel::NoCompression,
                keep_all,
                "somewhat different topic, recent activity",
            )
        }
    } else {
        (
            CompressionLevel::NoCompression,
            keep_all,
            "query continues the current topic",
        )
    };

    CompressionDecision {
        level,
        keep_verbatim_count: keep.min(cap),
        reason: reason.to_string(),
        has_explicit_reference: false,
        semantic_distance: Some(distance),
        time_gap_hours,
    }
}

/// Cosine distance between the query embedding and the mean of the recent
/// embeddings; Jaccard word distance over content words as the fallback
/// when embeddings are unavailable.
fn semantic_distance(input: &CompressionInput<'_>) -> f64 {
    if let (Some(query_vec), false) = (input.query_embedding, input.recent_embeddings.is_empty()) {
        if let Some(mean) = mean_vector(input.recent_embeddings) {
            return 1.0 - cosine_similarity(query_vec, &mean) as f64;
        }
    }

    let query_words = content_words(input.query);
    let recent_tail = input
        .recent_queries
        .iter()
        .rev()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    let recent_words = content_words(&recent_tail);
    1.0 - jaccard(&query_words, &recent_words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cfg() -> WindowConfig {
        WindowConfig::default()
    }

    fn recents(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_window_needs_no_compression() {
        let d = decide_compression(&CompressionInput::default(), Utc::now(), &cfg());
        assert_eq!(d.level, CompressionLevel::NoCompression);
        assert_eq!(d.keep_verbatim_count, 0);
    }

    #[test]
    fn explicit_reference_keeps_everything() {
        let recent = recents(&["Contract terms outlined"]);
        let input = CompressionInput {
            query: "As we discussed, what were the contract terms?",
            recent_queries: &recent,
            last_turn_at: Some(Utc::now() - Duration::minutes(5)),
            ..Default::default()
        };
        let d = decide_compression(&input, Utc::now(), &cfg());
        assert_eq!(d.level, CompressionLevel::NoCompression);
        assert!(d.has_explicit_reference);
        assert_eq!(d.keep_verbatim_count, 1);
    }

    #[test]
    fn distant_topic_after_long_gap_compresses_all() {
        let recent = recents(&["discussing contract indemnity clauses today"]);
        let input = CompressionInput {
            query: "pineapple smoothie blender wattage",
            recent_queries: &recent,
            last_turn_at: Some(Utc::now() - Duration::hours(20)),
            ..Default::default()
        };
        let d = decide_compression(&input, Utc::now(), &cfg());
        assert_eq!(d.level, CompressionLevel::CompressAll);
        assert_eq!(d.keep_verbatim_count, 5);
        assert!(d.semantic_distance.unwrap() > 0.8);
        assert!(d.time_gap_hours > 12.0);
    }

    #[test]
    fn distant_topic_with_recent_activity_compresses_partially() {
        let recent = recents(&["discussing contract indemnity clauses today"]);
        let input = CompressionInput {
            query: "pineapple smoothie blender wattage",
            recent_queries: &recent,
            last_turn_at: Some(Utc::now() - Duration::hours(1)),
            ..Default::default()
        };
        let d = decide_compression(&input, Utc::now(), &cfg());
        assert_eq!(d.level, CompressionLevel::CompressPartial);
        assert_eq!(d.keep_verbatim_count, 10);
    }

    #[test]
    fn same_topic_keeps_the_window() {
        let recent = recents(&["reviewing the indemnity clauses of this contract"]);
        let input = CompressionInput {
            query: "reviewing contract indemnity clauses again",
            recent_queries: &recent,
            last_turn_at: Some(Utc::now() - Duration::minutes(10)),
            ..Default::default()
        };
        let d = decide_compression(&input, Utc::now(), &cfg());
        assert_eq!(d.level, CompressionLevel::NoCompression);
        assert_eq!(d.keep_verbatim_count, 1);
    }

    #[test]
    fn embedding_distance_takes_priority_over_word_overlap() {
        let recent = recents(&["totally unrelated words here"]);
        let query_vec = vec![1.0f32, 0.0, 0.0, 0.0];
        let recent_vecs = vec![vec![1.0f32, 0.0, 0.0, 0.0]];
        let input = CompressionInput {
            query: "no overlap with anything",
            recent_queries: &recent,
            query_embedding: Some(&query_vec),
            recent_embeddings: &recent_vecs,
            last_turn_at: Some(Utc::now() - Duration::minutes(10)),
            ..Default::default()
        };
        let d = decide_compression(&input, Utc::now(), &cfg());
        // Identical embeddings → distance 0 regardless of word overlap.
        assert!(d.semantic_distance.unwrap() < 0.01);
        assert_eq!(d.level, CompressionLevel::NoCompression);
    }

    #[test]
    fn keep_count_is_clamped_to_the_hard_cap() {
        let recent: Vec<String> = (0..40).map(|i| format!("query {i}")).collect();
        let input = CompressionInput {
            query: "you said something about clamping",
            recent_queries: &recent,
            ..Default::default()
        };
        let d = decide_compression(&input, Utc::now(), &cfg());
        assert_eq!(d.keep_verbatim_count, 15);
    }

    #[test]
    fn decisions_are_idempotent() {
        let recent = recents(&["alpha beta gamma delta"]);
        let now = Utc::now();
        let input = CompressionInput {
            query: "epsilon zeta eta theta",
            recent_queries: &recent,
            last_turn_at: Some(now - Duration::hours(13)),
            ..Default::default()
        };
        let a = decide_compression(&input, now, &cfg());
        let b = decide_compression(&input, now, &cfg());
        assert_eq!(a.level, b.level);
        assert_eq!(a.keep_verbatim_count, b.keep_verbatim_count);
        assert_eq!(a.reason, b.reason);
    }
}
