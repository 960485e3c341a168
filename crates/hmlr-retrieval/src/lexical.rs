use hmlr_core::text::extract_terms;
use hmlr_facts::{Fact, FactCategory, FactStore, DELETED_VALUE};
use hmlr_memory::{ChunkRow, MemoryStore, ScoredMemory};

/// How many recent rows feed a lexical scan.
const LEXICAL_CANDIDATES: usize = 500;

/// Score `content` against query terms: `|T ∩ words(c)| / |T|`. A term
/// counts as matched when it appears as an exact word of the content, or
/// (partial-match fallback) as a substring of it. Returns the score and
/// the matched terms.
pub fn lexical_score(content: &str, terms: &[String]) -> (f64, Vec<String>) {
    if terms.is_empty() {
        return (0.0, Vec::new());
    }
    let words = extract_terms(content);
    let lowered = content.to_lowercase();

    let matched: Vec<String> = terms
        .iter()
        .filter(|t| {
            let t = t.to_lowercase();
            words.iter().any(|w| *w == t) || lowered.contains(&t)
        })
        .cloned()
        .collect();

    (matched.len() as f64 / terms.len() as f64, matched)
}

/// Lexical search over recent memories.
pub fn search_memories(
    store: &MemoryStore,
    keywords: &[String],
    limit: usize,
) -> Result<Vec<ScoredMemory>, hmlr_memory::MemoryError> {
    let mut scored: Vec<ScoredMemory> = store
        .recent_memories(LEXICAL_CANDIDATES)?
        .into_iter()
        .filter_map(|m| {
            let (score, matched_terms) = lexical_score(&m.content, keywords);
            (score > 0.0).then_some(ScoredMemory {
                memory: m,
                score,
                matched_terms,
            })
        })
        .collect();
    hmlr_memory::store::sort_scored(&mut scored);
    scored.truncate(limit);
    Ok(scored)
}

/// A chunk with its lexical score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: ChunkRow,
    pub score: f64,
    pub matched_terms: Vec<String>,
}

/// Lexical search over recent chunks, optionally restricted by type.
pub fn search_chunks(
    store: &MemoryStore,
    keywords: &[String],
    chunk_type: Option<&str>,
    limit: usize,
) -> Result<Vec<ScoredChunk>, hmlr_memory::MemoryError> {
    let mut scored: Vec<ScoredChunk> = store
        .recent_chunks(LEXICAL_CANDIDATES, chunk_type)?
        .into_iter()
        .filter_map(|c| {
            let (score, matched_terms) = lexical_score(&c.text_verbatim, keywords);
            (score > 0.0).then_some(ScoredChunk {
                chunk: c,
                score,
                matched_terms,
            })
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.chunk.created_at.cmp(&a.chunk.created_at))
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
    scored.truncate(limit);
    Ok(scored)
}

/// Lexical search over current facts (key and value both score),
/// optionally restricted to a category. Tombstoned facts never surface.
pub fn search_facts(
    store: &FactStore,
    keywords: &[String],
    category: Option<FactCategory>,
    limit: usize,
) -> Result<Vec<(Fact, f64)>, hmlr_facts::FactError> {
    let candidates = match category {
        Some(cat) => store.get_by_category(cat)?,
        None => store.search_by_key_prefix("")?,
    };

    let mut scored: Vec<(Fact, f64)> = candidates
        .into_iter()
        .filter(|f| f.value != DELETED_VALUE)
        .filter_map(|f| {
            let haystack = format!("{} {}", f.key, f.value);
            let (score, _) = lexical_score(&haystack, keywords);
            (score > 0.0).then_some((f, score))
        })
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.created_at.cmp(&a.0.created_at))
            .then_with(|| a.0.fact_id.cmp(&b.0.fact_id))
    });
    scored.truncate(limit);
    Ok(scored)
}
