use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use serde::Serialize;

use hmlr_core::text::{extract_terms, jaccard};

use crate::metadata::TurnMetadata;

/// Jaccard-confidence threshold above which a query counts as a shift.
const SHIFT_THRESHOLD: f64 = 0.7;

const DEFAULT_TOPIC: &str = "General Conversation";

/// Outcome of the topic-shift check for one query.
#[derive(Debug, Clone, Serialize)]
pub struct ShiftDecision {
    pub is_shift: bool,
    pub reason: String,
    pub new_topic_label: Option<String>,
    pub confidence: f64,
}

/// Phrasings that name the next topic outright. The capture is the topic.
static EXPLICIT_SHIFT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)let'?s talk about (.+?)(?:\s+instead)?\s*[.!?]?\s*$",
        r"(?i)changing topics to (.+?)\s*[.!?]?\s*$",
        r"(?i)moving on to (.+?)\s*[.!?]?\s*$",
        r"(?i)new topic:\s*(.+?)\s*[.!?]?\s*$",
        r"(?i)can we discuss (.+?)\s*[.!?]?\s*$",
        r"(?i)switching to (.+?)\s*[.!?]?\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("explicit shift pattern"))
    .collect()
});

/// Openers that signal the query continues the current thread.
static CONTINUATION: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)^(so|and|but|also|additionally|furthermore)\b",
        r"(?i)^as we discussed",
        r"(?i)^going back to",
        r"(?i)^regarding that",
    ])
    .expect("continuation patterns")
});

/// Heuristic topic-shift detector (Tabula Rasa).
///
/// Order of evaluation: no active topic → explicit shift phrasing →
/// continuation opener → Jaccard similarity of query topics against the
/// active block's keywords.
pub fn check_for_shift(query: &str, active_keywords: &[String]) -> ShiftDecision {
    let query_topics = extract_terms(query);

    if active_keywords.is_empty() {
        return ShiftDecision {
            is_shift: true,
            reason: "no active topic".to_string(),
            new_topic_label: Some(
                query_topics
                    .first()
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            ),
            confidence: 1.0,
        };
    }

    let trimmed = query.trim();
    for pattern in EXPLICIT_SHIFT.iter() {
        if let Some(caps) = pattern.captures(trimmed) {
            let label = caps.get(1).map(|m| m.as_str().trim().to_string());
            return ShiftDecision {
                is_shift: true,
                reason: "explicit topic shift phrasing".to_string(),
                new_topic_label: label.filter(|l| !l.is_empty()),
                confidence: 1.0,
            };
        }
    }

    if CONTINUATION.is_match(trimmed) {
        return ShiftDecision {
            is_shift: false,
            reason: "Continuation signal at query start".to_string(),
            new_topic_label: None,
            confidence: 0.1,
        };
    }

    let active_lower: Vec<String> = active_keywords.iter().map(|k| k.to_lowercase()).collect();
    let similarity = jaccard(&query_topics, &active_lower);
    let shift_confidence = 1.0 - similarity;

    if shift_confidence > SHIFT_THRESHOLD {
        ShiftDecision {
            is_shift: true,
            reason: format!("low keyword overlap with active topic (similarity {similarity:.2})"),
            new_topic_label: query_topics.first().cloned(),
            confidence: shift_confidence,
        }
    } else {
        ShiftDecision {
            is_shift: false,
            reason: format!("keyword overlap with active topic (similarity {similarity:.2})"),
            new_topic_label: None,
            confidence: 1.0 - shift_confidence,
        }
    }
}

/// Metadata-trusting variant: when the response metadata carries a shift
/// verdict from the model, use it; otherwise fall back to the heuristic.
pub fn check_for_shift_with_metadata(
    metadata: Option<&TurnMetadata>,
    query: &str,
    active_keywords: &[String],
) -> ShiftDecision {
    if let Some(meta) = metadata {
        if let Some(is_shift) = meta.is_topic_shift {
            return ShiftDecision {
                is_shift,
                reason: "model-provided shift verdict".to_string(),
                new_topic_label: meta.new_topic_label.clone(),
                confidence: meta.confidence.unwrap_or(0.9),
            };
        }
    }
    check_for_shift(query, active_keywords)
}
