use hmlr_memory::{MemoryStore, ScoredMemory};

use crate::lexical::lexical_score;

/// Weights and bounds for hybrid ranking.
#[derive(Debug, Clone)]
pub struct HybridParams {
    pub vector_weight: f64,
    pub lexical_weight: f64,
    pub min_score: f64,
    pub top_k: usize,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            lexical_weight: 0.3,
            min_score: 0.3,
            top_k: 10,
        }
    }
}

/// Pure vector ranking over memories.
pub fn semantic_search(
    store: &MemoryStore,
    query: &[f32],
    top_k: usize,
    min_score: f64,
) -> Result<Vec<ScoredMemory>, hmlr_memory::MemoryError> {
    store.vector_search(query, top_k, min_score)
}

/// Hybrid ranking: `combined = w_v · vectorScore + w_l · lexicalScore`,
/// filtered to `min_score` and clipped to `top_k`. The vector stage pulls
/// `top_k · 2` candidates so lexical matches can promote borderline hits.
pub fn hybrid_search(
    store: &MemoryStore,
    query: &[f32],
    terms: &[String],
    params: &HybridParams,
) -> Result<Vec<ScoredMemory>, hmlr_memory::MemoryError> {
    let candidates = store.vector_search(query, params.top_k * 2, f64::MIN)?;

    let mut combined: Vec<ScoredMemory> = candidates
        .into_iter()
        .map(|c| {
            let (lex, matched_terms) = lexical_score(&c.memory.content, terms);
            ScoredMemory {
                score: params.vector_weight * c.score + params.lexical_weight * lex,
                matched_terms,
                memory: c.memory,
            }
        })
        .filter(|s| s.score >= params.min_score)
        .collect();

    hmlr_memory::store::sort_scored(&mut combined);
    combined.truncate(params.top_k);
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmlr_memory::NewMemory;
    use proptest::prelude::*;

    fn store_with(items: &[(&str, &str, [f32; 4])]) -> MemoryStore {
        let store =
            MemoryStore::new(rusqlite::Connection::open_in_memory().unwrap(), 4).unwrap();
        for (id, content, emb) in items {
            store
                .insert_memory(NewMemory {
                    memory_id: id.to_string(),
                    turn_id: format!("turn_{id}"),
                    block_id: "b1".to_string(),
                    content: content.to_string(),
                    chunk_index: 0,
                    embedding: emb.to_vec(),
                })
                .unwrap();
        }
        store
    }

    fn terms(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn weights_steer_the_ranking() {
        // "vec" is the vector-space favourite; "lex" matches the query terms.
        let store = store_with(&[
            ("lex", "pasta recipe with tomatoes", [0.0, 1.0, 0.0, 0.0]),
            ("vec", "unrelated content", [1.0, 0.0, 0.0, 0.0]),
        ]);
        let query = [1.0, 0.0, 0.0, 0.0];
        let query_terms = terms(&["pasta", "recipe"]);

        let vector_heavy = HybridParams {
            vector_weight: 0.9,
            lexical_weight: 0.1,
            min_score: 0.0,
            top_k: 10,
        };
        let hits = hybrid_search(&store, &query, &query_terms, &vector_heavy).unwrap();
        assert_eq!(hits[0].memory.memory_id, "vec");

        let lexical_heavy = HybridParams {
            vector_weight: 0.1,
            lexical_weight: 0.9,
            min_score: 0.0,
            top_k: 10,
        };
        let hits = hybrid_search(&store, &query, &query_terms, &lexical_heavy).unwrap();
        assert_eq!(hits[0].memory.memory_id, "lex");
    }

    #[test]
    fn min_score_filters_and_top_k_clips() {
        let store = store_with(&[
            ("a", "alpha", [1.0, 0.0, 0.0, 0.0]),
            ("b", "beta", [0.9, 0.1, 0.0, 0.0]),
            ("c", "gamma", [0.0, 1.0, 0.0, 0.0]),
        ]);
        let params = HybridParams {
            min_score: 0.3,
            top_k: 1,
            ..Default::default()
        };
        let hits = hybrid_search(&store, &[1.0, 0.0, 0.0, 0.0], &[], &params).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.memory_id, "a");
    }

    proptest! {
        /// An item that dominates on both signals ranks first for any
        /// weighting.
        #[test]
        fn dominant_item_wins_under_any_weights(w_v in 0.0f64..1.0, w_l in 0.0f64..1.0) {
            prop_assume!(w_v + w_l > 0.0);
            let store = store_with(&[
                ("best", "pasta recipe", [1.0, 0.0, 0.0, 0.0]),
                ("worst", "unrelated", [0.0, 1.0, 0.0, 0.0]),
            ]);
            let params = HybridParams {
                vector_weight: w_v,
                lexical_weight: w_l,
                min_score: f64::MIN,
                top_k: 2,
            };
            let hits = hybrid_search(
                &store,
                &[1.0, 0.0, 0.0, 0.0],
                &terms(&["pasta"]),
                &params,
            ).unwrap();
            prop_assert_eq!(hits[0].memory.memory_id.as_str(), "best");
        }
    }
}
