use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use hmlr_chunker::ChunkDraft;
use hmlr_core::types::now_rfc3339;
use hmlr_llm::cosine_similarity;

use crate::db::init_db;
use crate::error::{MemoryError, Result};
use crate::types::*;

const MEMORY_COLUMNS: &str =
    "memory_id, turn_id, block_id, content, chunk_index, embedding, created_at";

const CHUNK_COLUMNS: &str = "chunk_id, chunk_type, text_verbatim, lexical_filters,
        parent_chunk_id, turn_id, block_id, embedding, token_count, created_at";

/// SQLite-backed store for memories, chunks, and usage stats.
///
/// Vector search scans stored embeddings and scores by cosine similarity;
/// with unit-norm vectors this equals the dot product. Result order is
/// deterministic: score desc, then `created_at` desc, then id.
pub struct MemoryStore {
    db: Mutex<Connection>,
    dimensions: usize,
}

impl MemoryStore {
    pub fn new(conn: Connection, dimensions: usize) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            dimensions,
        })
    }

    pub fn insert_memory(&self, mem: NewMemory) -> Result<MemoryRow> {
        if mem.embedding.len() != self.dimensions {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimensions,
                actual: mem.embedding.len(),
            });
        }
        let created_at = now_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO memories
                (memory_id, turn_id, block_id, content, chunk_index, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                mem.memory_id,
                mem.turn_id,
                mem.block_id,
                mem.content,
                mem.chunk_index as i64,
                vec_to_blob(&mem.embedding),
                created_at,
            ],
        )?;
        Ok(MemoryRow {
            memory_id: mem.memory_id,
            turn_id: mem.turn_id,
            block_id: mem.block_id,
            content: mem.content,
            chunk_index: mem.chunk_index,
            embedding: mem.embedding,
            created_at,
        })
    }

    pub fn get_memory(&self, memory_id: &str) -> Result<Option<MemoryRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE memory_id = ?1"
        ))?;
        Ok(stmt.query_row([memory_id], row_to_memory).ok())
    }

    pub fn memories_by_block(&self, block_id: &str) -> Result<Vec<MemoryRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE block_id = ?1
             ORDER BY created_at DESC, memory_id ASC"
        ))?;
        let rows = stmt.query_map([block_id], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Most recent memories, newest first. The candidate pool for lexical
    /// search.
    pub fn recent_memories(&self, limit: usize) -> Result<Vec<MemoryRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             ORDER BY created_at DESC, memory_id ASC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Cosine scan over all memories. Returns up to `limit` results with
    /// score ≥ `min_score`, ordered score desc / created_at desc / id.
    pub fn vector_search(
        &self,
        query: &[f32],
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<ScoredMemory>> {
        let all = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(&format!("SELECT {MEMORY_COLUMNS} FROM memories"))?;
            let rows = stmt.query_map([], row_to_memory)?;
            rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
        };

        let mut scored: Vec<ScoredMemory> = all
            .into_iter()
            .map(|m| {
                let score = cosine_similarity(query, &m.embedding) as f64;
                ScoredMemory {
                    memory: m,
                    score,
                    matched_terms: Vec::new(),
                }
            })
            .filter(|s| s.score >= min_score)
            .collect();

        sort_scored(&mut scored);
        scored.truncate(limit);
        debug!(results = scored.len(), "vector search complete");
        Ok(scored)
    }

    // ---- chunks ----

    /// Persist a batch of chunker output in one transaction.
    pub fn insert_chunks(&self, drafts: &[ChunkDraft]) -> Result<usize> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        for d in drafts {
            tx.execute(
                "INSERT INTO chunks
                    (chunk_id, chunk_type, text_verbatim, lexical_filters,
                     parent_chunk_id, turn_id, block_id, embedding,
                     token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9)",
                rusqlite::params![
                    d.chunk_id,
                    d.chunk_type.to_string(),
                    d.text_verbatim,
                    serde_json::to_string(&d.lexical_filters).unwrap_or_else(|_| "[]".into()),
                    d.parent_chunk_id,
                    d.turn_id,
                    d.block_id,
                    d.token_count as i64,
                    d.created_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(drafts.len())
    }

    /// Bulk-patch `block_id` on every chunk of a turn once routing has
    /// determined the owning block.
    pub fn assign_chunks_to_block(&self, turn_id: &str, block_id: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE chunks SET block_id = ?2 WHERE turn_id = ?1",
            rusqlite::params![turn_id, block_id],
        )?;
        Ok(n)
    }

    pub fn chunks_by_turn(&self, turn_id: &str) -> Result<Vec<ChunkRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks
             WHERE turn_id = ?1
             ORDER BY chunk_id ASC"
        ))?;
        let rows = stmt.query_map([turn_id], row_to_chunk)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Most recent chunks, newest first, optionally by type.
    pub fn recent_chunks(&self, limit: usize, chunk_type: Option<&str>) -> Result<Vec<ChunkRow>> {
        let db = self.db.lock().unwrap();
        let (sql, has_filter) = match chunk_type {
            Some(_) => (
                format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks
                     WHERE chunk_type = ?1
                     ORDER BY created_at DESC, chunk_id ASC LIMIT ?2"
                ),
                true,
            ),
            None => (
                format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks
                     ORDER BY created_at DESC, chunk_id ASC LIMIT ?1"
                ),
                false,
            ),
        };
        let mut stmt = db.prepare(&sql)?;
        let rows = if has_filter {
            stmt.query_map(
                rusqlite::params![chunk_type.unwrap_or_default(), limit as i64],
                row_to_chunk,
            )?
        } else {
            stmt.query_map(rusqlite::params![limit as i64], row_to_chunk)?
        };
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---- usage stats ----

    /// Record one retrieval of an item. Upserts the row; `topics` is a
    /// deduped set. Last-writer-wins drift is acceptable here.
    pub fn bump_usage(&self, item_id: &str, item_type: &str, topic: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = now_rfc3339();

        let existing: Option<(u64, String)> = db
            .query_row(
                "SELECT usage_count, topics FROM usage_stats WHERE item_id = ?1",
                [item_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        match existing {
            Some((count, topics_json)) => {
                let mut topics: Vec<String> =
                    serde_json::from_str(&topics_json).unwrap_or_default();
                if let Some(t) = topic {
                    if !topics.iter().any(|x| x == t) {
                        topics.push(t.to_string());
                    }
                }
                db.execute(
                    "UPDATE usage_stats
                     SET usage_count = ?2, last_used = ?3, topics = ?4
                     WHERE item_id = ?1",
                    rusqlite::params![
                        item_id,
                        count + 1,
                        now,
                        serde_json::to_string(&topics).unwrap_or_else(|_| "[]".into()),
                    ],
                )?;
            }
            None => {
                let topics = topic.map(|t| vec![t.to_string()]).unwrap_or_default();
                db.execute(
                    "INSERT INTO usage_stats
                        (item_id, item_type, usage_count, first_used, last_used, topics)
                     VALUES (?1, ?2, 1, ?3, ?3, ?4)",
                    rusqlite::params![
                        item_id,
                        item_type,
                        now,
                        serde_json::to_string(&topics).unwrap_or_else(|_| "[]".into()),
                    ],
                )?;
            }
        }
        Ok(())
    }

    pub fn get_usage(&self, item_id: &str) -> Result<Option<UsageStat>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT item_id, item_type, usage_count, first_used, last_used, topics
             FROM usage_stats WHERE item_id = ?1",
        )?;
        let stat = stmt
            .query_row([item_id], |row| {
                let topics: String = row.get(5)?;
                Ok(UsageStat {
                    item_id: row.get(0)?,
                    item_type: row.get(1)?,
                    usage_count: row.get(2)?,
                    first_used: row.get(3)?,
                    last_used: row.get(4)?,
                    topics: serde_json::from_str(&topics).unwrap_or_default(),
                })
            })
            .ok();
        Ok(stat)
    }
}

/// Deterministic retrieval order: score desc, created_at desc, id asc.
pub fn sort_scored(scored: &mut [ScoredMemory]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.memory_id.cmp(&b.memory.memory_id))
    });
}

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    let chunk_index: i64 = row.get(4)?;
    let blob: Vec<u8> = row.get(5)?;
    Ok(MemoryRow {
        memory_id: row.get(0)?,
        turn_id: row.get(1)?,
        block_id: row.get(2)?,
        content: row.get(3)?,
        chunk_index: chunk_index as usize,
        embedding: blob_to_vec(&blob),
        created_at: row.get(6)?,
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRow> {
    let chunk_type: String = row.get(1)?;
    let filters: String = row.get(3)?;
    let blob: Option<Vec<u8>> = row.get(7)?;
    let token_count: i64 = row.get(8)?;
    Ok(ChunkRow {
        chunk_id: row.get(0)?,
        chunk_type: chunk_type.parse().unwrap_or(hmlr_chunker::ChunkType::Paragraph),
        text_verbatim: row.get(2)?,
        lexical_filters: serde_json::from_str(&filters).unwrap_or_default(),
        parent_chunk_id: row.get(4)?,
        turn_id: row.get(5)?,
        block_id: row.get(6)?,
        embedding: blob.map(|b| blob_to_vec(&b)),
        token_count: token_count as usize,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(Connection::open_in_memory().unwrap(), 4).unwrap()
    }

    fn mem(id: &str, block: &str, embedding: Vec<f32>) -> NewMemory {
        NewMemory {
            memory_id: id.to_string(),
            turn_id: format!("turn_{id}"),
            block_id: block.to_string(),
            content: format!("content of {id}"),
            chunk_index: 0,
            embedding,
        }
    }

    #[test]
    fn embedding_blob_round_trips() {
        let v = vec![0.25f32, -1.5, 3.0, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn vector_search_orders_by_similarity() {
        let s = store();
        s.insert_memory(mem("a", "b1", vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        s.insert_memory(mem("b", "b1", vec![0.0, 1.0, 0.0, 0.0])).unwrap();
        s.insert_memory(mem("c", "b1", vec![0.7071, 0.7071, 0.0, 0.0])).unwrap();

        let hits = s.vector_search(&[1.0, 0.0, 0.0, 0.0], 10, 0.0).unwrap();
        assert_eq!(hits[0].memory.memory_id, "a");
        assert_eq!(hits[1].memory.memory_id, "c");
        assert!((hits[1].score - 0.7071).abs() < 1e-3);
    }

    #[test]
    fn vector_search_applies_min_score_and_limit() {
        let s = store();
        s.insert_memory(mem("a", "b1", vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        s.insert_memory(mem("b", "b1", vec![0.0, 1.0, 0.0, 0.0])).unwrap();

        let hits = s.vector_search(&[1.0, 0.0, 0.0, 0.0], 10, 0.5).unwrap();
        assert_eq!(hits.len(), 1);

        let hits = s.vector_search(&[1.0, 0.0, 0.0, 0.0], 0, 0.0).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn equal_scores_tie_break_on_id() {
        let s = store();
        s.insert_memory(mem("z", "b1", vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        s.insert_memory(mem("a", "b1", vec![1.0, 0.0, 0.0, 0.0])).unwrap();

        let hits = s.vector_search(&[1.0, 0.0, 0.0, 0.0], 10, 0.0).unwrap();
        // Same score and effectively same created_at: lexicographic id wins.
        if hits[0].memory.created_at == hits[1].memory.created_at {
            assert_eq!(hits[0].memory.memory_id, "a");
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let s = store();
        let err = s.insert_memory(mem("a", "b1", vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
    }

    #[test]
    fn chunk_block_assignment_patches_all_turn_chunks() {
        let s = store();
        let drafts = hmlr_chunker::chunk_text("One thing.\n\nAnother thing.", "turn_9", None);
        s.insert_chunks(&drafts).unwrap();

        let patched = s.assign_chunks_to_block("turn_9", "block_42").unwrap();
        assert_eq!(patched, drafts.len());
        assert!(s
            .chunks_by_turn("turn_9")
            .unwrap()
            .iter()
            .all(|c| c.block_id.as_deref() == Some("block_42")));
    }

    #[test]
    fn usage_bump_upserts_and_dedupes_topics() {
        let s = store();
        s.bump_usage("turn_1", "turn", Some("contracts")).unwrap();
        s.bump_usage("turn_1", "turn", Some("contracts")).unwrap();
        s.bump_usage("turn_1", "turn", Some("law")).unwrap();

        let stat = s.get_usage("turn_1").unwrap().unwrap();
        assert_eq!(stat.usage_count, 3);
        assert_eq!(stat.topics, vec!["contracts", "law"]);
        assert!(stat.last_used >= stat.first_used);
    }
}
