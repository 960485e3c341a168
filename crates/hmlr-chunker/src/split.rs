use std::sync::LazyLock;

use regex::Regex;

use hmlr_core::text::extract_terms;
use hmlr_core::types::{estimate_tokens, nonce, now_ms, now_rfc3339};

use crate::types::{ChunkDraft, ChunkType};

/// Maximum number of lexical filter terms kept per chunk.
const MAX_LEXICAL_FILTERS: usize = 20;

static PARAGRAPH_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph separator regex"));

/// Split `text` into paragraph chunks and their sentence children.
///
/// The emitted sequence is stable for a given input and monotonic in
/// (paragraph index, sentence index within paragraph): each paragraph is
/// followed immediately by its sentences.
pub fn chunk_text(text: &str, turn_id: &str, block_id: Option<&str>) -> Vec<ChunkDraft> {
    let ts = now_ms();
    let created_at = now_rfc3339();
    let mut out = Vec::new();
    let mut sent_idx = 0usize;

    for (para_idx, para) in paragraphs(text).into_iter().enumerate() {
        let para_id = format!("para_{ts}_{para_idx}_{}", nonce());
        out.push(make_chunk(
            para_id.clone(),
            ChunkType::Paragraph,
            &para,
            None,
            turn_id,
            block_id,
            &created_at,
        ));

        for sentence in split_sentences(&para) {
            let sent_id = format!("sent_{ts}_{sent_idx}_{}", nonce());
            sent_idx += 1;
            out.push(make_chunk(
                sent_id,
                ChunkType::Sentence,
                &sentence,
                Some(para_id.clone()),
                turn_id,
                block_id,
                &created_at,
            ));
        }
    }

    out
}

fn make_chunk(
    chunk_id: String,
    chunk_type: ChunkType,
    text: &str,
    parent_chunk_id: Option<String>,
    turn_id: &str,
    block_id: Option<&str>,
    created_at: &str,
) -> ChunkDraft {
    let mut filters = extract_terms(text);
    filters.truncate(MAX_LEXICAL_FILTERS);
    ChunkDraft {
        chunk_id,
        chunk_type,
        text_verbatim: text.to_string(),
        lexical_filters: filters,
        parent_chunk_id,
        turn_id: turn_id.to_string(),
        block_id: block_id.map(str::to_string),
        token_count: estimate_tokens(text),
        created_at: created_at.to_string(),
    }
}

/// Paragraphs are separated by blank lines. Text without any separator is
/// a single paragraph; all-whitespace input yields nothing.
fn paragraphs(text: &str) -> Vec<String> {
    PARAGRAPH_SEP
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a paragraph on sentence terminators (`.` `!` `?`) followed by
/// whitespace. The terminator stays with its sentence; a trailing fragment
/// without a terminator is kept as the final sentence.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            let s = current.trim();
            if !s.is_empty() {
                sentences.push(s.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn whole_text_is_one_paragraph_without_separators() {
        let chunks = chunk_text("Just one line of text", "turn_1", None);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_type, ChunkType::Paragraph);
        assert_eq!(chunks[0].text_verbatim, "Just one line of text");
        assert_eq!(chunks[1].chunk_type, ChunkType::Sentence);
        assert_eq!(chunks[1].parent_chunk_id, Some(chunks[0].chunk_id.clone()));
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let text = "First paragraph here.\n\nSecond paragraph. With two sentences!";
        let chunks = chunk_text(text, "turn_1", Some("block_1"));
        let paras: Vec<_> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Paragraph)
            .collect();
        assert_eq!(paras.len(), 2);
        assert_eq!(paras[1].text_verbatim, "Second paragraph. With two sentences!");

        let sents: Vec<_> = chunks
            .iter()
            .filter(|c| {
                c.chunk_type == ChunkType::Sentence
                    && c.parent_chunk_id.as_deref() == Some(paras[1].chunk_id.as_str())
            })
            .collect();
        assert_eq!(sents.len(), 2);
        assert_eq!(sents[0].text_verbatim, "Second paragraph.");
        assert_eq!(sents[1].text_verbatim, "With two sentences!");
    }

    #[test]
    fn empty_and_whitespace_input_yield_no_chunks() {
        assert!(chunk_text("", "turn_1", None).is_empty());
        assert!(chunk_text("  \n\n   \n", "turn_1", None).is_empty());
    }

    #[test]
    fn abbreviation_without_trailing_space_does_not_split() {
        let sents = split_sentences("Version 2.5 shipped today");
        assert_eq!(sents, vec!["Version 2.5 shipped today"]);
    }

    #[test]
    fn filters_are_capped_and_stopword_free() {
        let text = (0..40)
            .map(|i| format!("keyword{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, "turn_1", None);
        assert_eq!(chunks[0].lexical_filters.len(), 20);

        let chunks = chunk_text("The cat and the dog", "turn_1", None);
        assert_eq!(chunks[0].lexical_filters, vec!["cat", "dog"]);
    }

    #[test]
    fn token_count_is_quarter_of_length_rounded_up() {
        let chunks = chunk_text("abcdefghij", "turn_1", None);
        assert_eq!(chunks[0].token_count, 3);
    }

    proptest! {
        /// Joining paragraph chunks with blank-line separators reproduces
        /// the original text (modulo surrounding whitespace).
        #[test]
        fn paragraph_round_trip(parts in proptest::collection::vec("[a-zA-Z ,;]{1,40}", 1..5)) {
            let cleaned: Vec<String> = parts
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            prop_assume!(!cleaned.is_empty());
            let text = cleaned.join("\n\n");

            let chunks = chunk_text(&text, "turn_1", None);
            let rejoined = chunks
                .iter()
                .filter(|c| c.chunk_type == ChunkType::Paragraph)
                .map(|c| c.text_verbatim.clone())
                .collect::<Vec<_>>()
                .join("\n\n");
            prop_assert_eq!(rejoined, text);
        }

        /// Sentence chunks concatenate back to their paragraph up to
        /// whitespace normalisation.
        #[test]
        fn sentence_round_trip(words in proptest::collection::vec("[a-z]{1,8}", 1..12)) {
            let paragraph = format!("{}.", words.join(" "));
            let rejoined = split_sentences(&paragraph).join(" ");
            let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
            prop_assert_eq!(norm(&rejoined), norm(&paragraph));
        }
    }
}
