use rusqlite::{Connection, Result};

/// Initialise fact tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS facts (
            fact_id             TEXT PRIMARY KEY,
            key                 TEXT NOT NULL,
            value               TEXT NOT NULL,
            category            TEXT,
            block_id            TEXT NOT NULL,
            turn_id             TEXT,
            evidence_snippet    TEXT,
            source_chunk_id     TEXT,
            source_paragraph_id TEXT,
            confidence          REAL NOT NULL DEFAULT 0.8,
            superseded_by       TEXT,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_facts_key
            ON facts(key);
        CREATE INDEX IF NOT EXISTS idx_facts_block
            ON facts(block_id);
        CREATE INDEX IF NOT EXISTS idx_facts_category
            ON facts(category);
        CREATE INDEX IF NOT EXISTS idx_facts_created
            ON facts(created_at);
        CREATE INDEX IF NOT EXISTS idx_facts_chunk
            ON facts(source_chunk_id);",
    )
}
