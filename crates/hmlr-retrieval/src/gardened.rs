use serde::Serialize;
use tracing::debug;

use hmlr_blocks::BlockManager;
use hmlr_memory::MemoryStore;

/// Parameters for the gardened (prior-day) memory search.
#[derive(Debug, Clone)]
pub struct GardenedParams {
    pub top_k: usize,
    pub min_similarity: f64,
    /// Today's memories normally live in the sliding window, so they are
    /// excluded here. Turn this off when the window is disabled.
    pub exclude_current_day: bool,
}

impl Default for GardenedParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_similarity: 0.4,
            exclude_current_day: true,
        }
    }
}

/// A long-term memory hit enriched with block context.
#[derive(Debug, Clone, Serialize)]
pub struct GardenedMemory {
    pub memory_id: String,
    pub turn_id: String,
    pub block_id: String,
    pub day_id: String,
    pub content: String,
    pub score: f64,
    /// Coarse granularity classified from content length.
    pub chunk_type: String,
    /// The owning block's keywords, attached as global meta-tags.
    pub meta_tags: Vec<String>,
}

/// Vector search over gardened memories: pulls `top_k · 2` candidates,
/// drops low-similarity hits, loads each memory's block, optionally
/// excludes the current day, and classifies granularity by length.
pub fn gardened_search(
    memories: &MemoryStore,
    blocks: &BlockManager,
    query: &[f32],
    current_day_id: &str,
    params: &GardenedParams,
) -> Result<Vec<GardenedMemory>, hmlr_memory::MemoryError> {
    let candidates = memories.vector_search(query, params.top_k * 2, params.min_similarity)?;

    let mut out = Vec::with_capacity(params.top_k);
    for hit in candidates {
        if out.len() >= params.top_k {
            break;
        }
        let Ok(block) = blocks.get(&hit.memory.block_id) else {
            debug!(block_id = %hit.memory.block_id, "gardened: orphan memory skipped");
            continue;
        };
        if params.exclude_current_day && block.day_id == current_day_id {
            continue;
        }
        out.push(GardenedMemory {
            chunk_type: classify_granularity(&hit.memory.content).to_string(),
            memory_id: hit.memory.memory_id,
            turn_id: hit.memory.turn_id,
            block_id: hit.memory.block_id,
            day_id: block.day_id,
            content: hit.memory.content,
            score: hit.score,
            meta_tags: block.keywords,
        });
    }

    // Candidates arrive score-sorted; the block filter preserves order.
    Ok(out)
}

fn classify_granularity(content: &str) -> &'static str {
    if content.len() < 200 {
        "sentence"
    } else if content.len() < 500 {
        "paragraph"
    } else {
        "turn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmlr_memory::NewMemory;

    fn fixtures() -> (MemoryStore, BlockManager, String, String) {
        let memories =
            MemoryStore::new(rusqlite::Connection::open_in_memory().unwrap(), 4).unwrap();
        let blocks = BlockManager::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();

        let old = blocks.create("2026-07-30", "Contracts", None).unwrap();
        let today = blocks.create("2026-08-01", "Contracts again", None).unwrap();

        memories
            .insert_memory(NewMemory {
                memory_id: "m_old".into(),
                turn_id: "turn_1".into(),
                block_id: old.block_id.clone(),
                content: "short".into(),
                chunk_index: 0,
                embedding: vec![1.0, 0.0, 0.0, 0.0],
            })
            .unwrap();
        memories
            .insert_memory(NewMemory {
                memory_id: "m_today".into(),
                turn_id: "turn_2".into(),
                block_id: today.block_id.clone(),
                content: "x".repeat(300),
                chunk_index: 0,
                embedding: vec![0.99, 0.1, 0.0, 0.0],
            })
            .unwrap();

        (memories, blocks, old.block_id, today.block_id)
    }

    #[test]
    fn current_day_is_excluded_by_default() {
        let (memories, blocks, _, _) = fixtures();
        let hits = gardened_search(
            &memories,
            &blocks,
            &[1.0, 0.0, 0.0, 0.0],
            "2026-08-01",
            &GardenedParams::default(),
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_id, "m_old");
        assert_eq!(hits[0].chunk_type, "sentence");
    }

    #[test]
    fn exclusion_flag_can_be_disabled() {
        let (memories, blocks, _, _) = fixtures();
        let params = GardenedParams {
            exclude_current_day: false,
            ..Default::default()
        };
        let hits = gardened_search(
            &memories,
            &blocks,
            &[1.0, 0.0, 0.0, 0.0],
            "2026-08-01",
            &params,
        )
        .unwrap();
        assert_eq!(hits.len(), 2);
        // Paragraph-sized content classifies as such.
        let today_hit = hits.iter().find(|h| h.memory_id == "m_today").unwrap();
        assert_eq!(today_hit.chunk_type, "paragraph");
    }

    #[test]
    fn meta_tags_carry_block_keywords() {
        let (memories, blocks, old_block, _) = fixtures();
        blocks
            .update_metadata(
                &old_block,
                &hmlr_blocks::MetadataUpdate {
                    keywords: vec!["contract".into(), "law".into()],
                    ..Default::default()
                },
            )
            .unwrap();

        let hits = gardened_search(
            &memories,
            &blocks,
            &[1.0, 0.0, 0.0, 0.0],
            "2026-08-01",
            &GardenedParams::default(),
        )
        .unwrap();
        assert_eq!(hits[0].meta_tags, vec!["contract", "law"]);
    }
}
