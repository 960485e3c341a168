use std::collections::HashSet;

use tracing::debug;

use hmlr_blocks::{BlockManager, Turn};
use hmlr_core::text::extract_terms;
use hmlr_memory::MemoryStore;

use crate::error::Result;

/// Hard cap on turns promoted back into verbatim context per query.
const MAX_PREFETCH_TURNS: usize = 5;

/// Promote earlier turns back into verbatim context when the query's
/// keywords overlap a non-current block.
///
/// Candidates score `(turn keyword matches + block keyword matches)`,
/// ties break by timestamp descending, and the result is clipped to
/// `max_turns`. Every rehydrated turn bumps its usage stat.
pub fn rehydrate(
    blocks: &BlockManager,
    usage: &MemoryStore,
    query_keywords: &[String],
    current_block_id: Option<&str>,
    max_turns: usize,
) -> Result<Vec<Turn>> {
    if query_keywords.is_empty() || max_turns == 0 {
        return Ok(Vec::new());
    }
    let wanted: HashSet<String> = query_keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut candidates: Vec<(usize, Turn)> = Vec::new();
    for block in blocks.all_blocks()? {
        if Some(block.block_id.as_str()) == current_block_id {
            continue;
        }
        let block_matches = overlap(&block.keywords, &wanted);
        for turn in blocks.get_turns(&block.block_id)? {
            let turn_matches = overlap(&turn.keywords, &wanted);
            let score = turn_matches + block_matches;
            if score > 0 {
                candidates.push((score, turn));
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
            .then_with(|| b.1.turn_id.cmp(&a.1.turn_id))
    });
    candidates.truncate(max_turns);

    let turns: Vec<Turn> = candidates.into_iter().map(|(_, t)| t).collect();
    for turn in &turns {
        usage.bump_usage(&turn.turn_id, "turn", None)?;
    }
    debug!(rehydrated = turns.len(), "rehydration complete");
    Ok(turns)
}

/// Warm likely-relevant turns for the current topic: the top
/// `prefetch_window` blocks by keyword overlap with the topic string
/// contribute their newest turns, up to 5 turn ids in total.
pub fn prefetch_by_affinity(
    blocks: &BlockManager,
    topic: &str,
    prefetch_window: usize,
) -> Result<Vec<String>> {
    let topic_terms: HashSet<String> = extract_terms(topic).into_iter().collect();
    if topic_terms.is_empty() {
        return Ok(Vec::new());
    }

    let mut scored: Vec<(usize, String)> = blocks
        .all_blocks()?
        .into_iter()
        .filter_map(|b| {
            let score = overlap(&b.keywords, &topic_terms);
            (score > 0).then_some((score, b.block_id))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    scored.truncate(prefetch_window);

    let mut turn_ids = Vec::new();
    'outer: for (_, block_id) in scored {
        let mut turns = blocks.get_turns(&block_id)?;
        turns.reverse();
        for turn in turns {
            turn_ids.push(turn.turn_id);
            if turn_ids.len() == MAX_PREFETCH_TURNS {
                break 'outer;
            }
        }
    }
    Ok(turn_ids)
}

fn overlap(keywords: &[String], wanted: &HashSet<String>) -> usize {
    keywords
        .iter()
        .filter(|k| wanted.contains(&k.to_lowercase()))
        .count()
}
