//! Text normalisation shared by the chunker, the retrieval scorers, the
//! topic-shift detector, and the compression heuristics. All of them must
//! agree on what a "term" is, so the rules live in exactly one place.

use std::collections::HashSet;

/// Fixed stop-word set applied when extracting lexical filter terms.
pub const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had",
    "her", "was", "one", "our", "out", "his", "has", "have", "this", "that",
    "with", "they", "from", "she", "him", "been", "were", "will", "would",
    "there", "their", "what", "about", "which", "when", "make", "like",
    "just", "know", "into", "your", "some", "could", "them", "than", "then",
    "its", "also", "how", "who", "did", "get", "may", "very", "any", "more",
    "should", "does", "each", "other", "these", "those", "because",
];

fn is_stop_word(w: &str) -> bool {
    STOP_WORDS.contains(&w)
}

/// Lowercase the text, replace non-word characters with spaces, and split.
/// Word characters follow `\w`: alphanumerics plus underscore.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}

/// Extract query/filter terms: tokens longer than 2 characters, stop words
/// removed, deduped while preserving first-seen order.
pub fn extract_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(text)
        .filter(|w| w.len() > 2 && !is_stop_word(w))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Content words for semantic-distance fallbacks: tokens longer than 3
/// characters, no stop-word filtering.
pub fn content_words(text: &str) -> Vec<String> {
    words(text).filter(|w| w.len() > 3).collect()
}

/// Jaccard similarity `|A∩B| / |A∪B|` over two term lists treated as sets.
/// Returns 0.0 when the union is empty.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: HashSet<&str> = a.iter().map(String::as_str).collect();
    let sb: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_drop_short_and_stop_words() {
        let terms = extract_terms("The contract is about the law, and an agreement!");
        assert_eq!(terms, vec!["contract", "law", "agreement"]);
    }

    #[test]
    fn terms_dedupe_preserving_order() {
        let terms = extract_terms("alpha beta alpha gamma beta");
        assert_eq!(terms, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn non_word_chars_become_separators() {
        let terms = extract_terms("serde_json::from_str(payload)");
        assert_eq!(terms, vec!["serde_json", "from_str", "payload"]);
    }

    #[test]
    fn jaccard_identical_and_disjoint() {
        let a = vec!["alpha".to_string(), "beta".to_string()];
        let b = vec!["alpha".to_string(), "beta".to_string()];
        let c = vec!["gamma".to_string()];
        assert!((jaccard(&a, &b) - 1.0).abs() < f64::EPSILON);
        assert!((jaccard(&a, &c)).abs() < f64::EPSILON);
        assert!(jaccard(&[], &[]).abs() < f64::EPSILON);
    }
}
