use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use hmlr_core::types::now_rfc3339;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{Fact, FactCategory, NewFact, DELETED_VALUE};

const FACT_COLUMNS: &str = "fact_id, key, value, category, block_id, turn_id,
        evidence_snippet, source_chunk_id, source_paragraph_id,
        confidence, superseded_by, created_at";

/// SQLite-backed fact store. Supersession chains are updated inside a
/// transaction, so for any key at most one row is ever current.
pub struct FactStore {
    db: Mutex<Connection>,
}

impl FactStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Newest current fact for `key` (exact, case-sensitive), or `None`.
    pub fn get(&self, key: &str) -> Result<Option<Fact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {FACT_COLUMNS} FROM facts
             WHERE key = ?1 AND superseded_by IS NULL
             ORDER BY created_at DESC, fact_id DESC
             LIMIT 1"
        ))?;
        let fact = stmt.query_row([key], row_to_fact).ok();
        Ok(fact)
    }

    /// All facts observed in a block, newest first, superseded included.
    pub fn get_by_block(&self, block_id: &str) -> Result<Vec<Fact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {FACT_COLUMNS} FROM facts
             WHERE block_id = ?1
             ORDER BY created_at DESC, fact_id DESC"
        ))?;
        let rows = stmt.query_map([block_id], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Current facts for a category, newest first.
    pub fn get_by_category(&self, category: FactCategory) -> Result<Vec<Fact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {FACT_COLUMNS} FROM facts
             WHERE category = ?1 AND superseded_by IS NULL
             ORDER BY created_at DESC, fact_id DESC"
        ))?;
        let rows = stmt.query_map([category.to_string()], row_to_fact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Current facts whose key starts with `prefix`, case-insensitive.
    pub fn search_by_key_prefix(&self, prefix: &str) -> Result<Vec<Fact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {FACT_COLUMNS} FROM facts
             WHERE superseded_by IS NULL
             ORDER BY created_at DESC, fact_id DESC"
        ))?;
        let needle = prefix.to_lowercase();
        let rows = stmt.query_map([], row_to_fact)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter(|f| f.key.to_lowercase().starts_with(&needle))
            .collect())
    }

    /// Insert a new fact and atomically supersede every current row with
    /// the same key. Returns the stored row.
    pub fn store(&self, fact: NewFact) -> Result<Fact> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let stored = insert_superseding(&tx, fact)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Store several facts in order, each superseding its own key chain.
    /// A single transaction covers the whole batch.
    pub fn store_batch(&self, facts: Vec<NewFact>) -> Result<Vec<Fact>> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let mut stored = Vec::with_capacity(facts.len());
        for fact in facts {
            stored.push(insert_superseding(&tx, fact)?);
        }
        tx.commit()?;
        Ok(stored)
    }

    /// Soft-delete: insert a `[DELETED]` successor for the target's key and
    /// link the chain to it. A no-op when the target is already superseded.
    pub fn remove(&self, fact_id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let target: Option<(String, String, Option<String>)> = tx
            .query_row(
                "SELECT key, block_id, superseded_by FROM facts WHERE fact_id = ?1",
                [fact_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        match target {
            None => {
                return Err(crate::FactError::NotFound {
                    id: fact_id.to_string(),
                })
            }
            Some((_, _, Some(_))) => {
                // Already superseded; removal is idempotent.
                debug!(fact_id, "remove: target already superseded");
            }
            Some((key, block_id, None)) => {
                let mut tombstone = NewFact::new(&key, DELETED_VALUE, &block_id);
                tombstone.confidence = 1.0;
                insert_superseding(&tx, tombstone)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Patch `block_id` on every fact extracted for the given turn. Used
    /// when fact extraction raced ahead of routing.
    pub fn update_block_id(&self, turn_id: &str, block_id: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE facts SET block_id = ?2 WHERE turn_id = ?1",
            rusqlite::params![turn_id, block_id],
        )?;
        Ok(n)
    }

    /// Count of current rows for a key. Exposed for invariant checks.
    pub fn current_count(&self, key: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM facts WHERE key = ?1 AND superseded_by IS NULL",
            [key],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

/// Insert one fact inside an open transaction, superseding prior current
/// rows for the same key.
fn insert_superseding(tx: &rusqlite::Transaction<'_>, fact: NewFact) -> Result<Fact> {
    let fact_id = format!("fact_{}", Uuid::new_v4().simple());
    let created_at = now_rfc3339();
    let category = fact.category.map(|c| c.to_string());

    tx.execute(
        "UPDATE facts SET superseded_by = ?2
         WHERE key = ?1 AND superseded_by IS NULL",
        rusqlite::params![fact.key, fact_id],
    )?;
    tx.execute(
        "INSERT INTO facts (fact_id, key, value, category, block_id, turn_id,
            evidence_snippet, source_chunk_id, source_paragraph_id,
            confidence, superseded_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11)",
        rusqlite::params![
            fact_id,
            fact.key,
            fact.value,
            category,
            fact.block_id,
            fact.turn_id,
            fact.evidence_snippet,
            fact.source_chunk_id,
            fact.source_paragraph_id,
            fact.confidence,
            created_at,
        ],
    )?;

    Ok(Fact {
        fact_id,
        key: fact.key,
        value: fact.value,
        category: fact.category,
        block_id: fact.block_id,
        turn_id: fact.turn_id,
        evidence_snippet: fact.evidence_snippet,
        source_chunk_id: fact.source_chunk_id,
        source_paragraph_id: fact.source_paragraph_id,
        confidence: fact.confidence,
        superseded_by: None,
        created_at,
    })
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fact> {
    let category: Option<String> = row.get(3)?;
    Ok(Fact {
        fact_id: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        category: category.and_then(|c| c.parse().ok()),
        block_id: row.get(4)?,
        turn_id: row.get(5)?,
        evidence_snippet: row.get(6)?,
        source_chunk_id: row.get(7)?,
        source_paragraph_id: row.get(8)?,
        confidence: row.get(9)?,
        superseded_by: row.get(10)?,
        created_at: row.get(11)?,
    })
}
