use rusqlite::{Connection, Result};

/// Initialise memory, chunk, and usage tables. Safe to call on every
/// startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            memory_id   TEXT PRIMARY KEY,
            turn_id     TEXT NOT NULL,
            block_id    TEXT NOT NULL,
            content     TEXT NOT NULL,
            chunk_index INTEGER NOT NULL DEFAULT 0,
            embedding   BLOB NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_turn
            ON memories(turn_id);
        CREATE INDEX IF NOT EXISTS idx_memories_block
            ON memories(block_id);

        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id        TEXT PRIMARY KEY,
            chunk_type      TEXT NOT NULL,
            text_verbatim   TEXT NOT NULL,
            lexical_filters TEXT NOT NULL DEFAULT '[]',
            parent_chunk_id TEXT,
            turn_id         TEXT NOT NULL,
            block_id        TEXT,
            embedding       BLOB,
            token_count     INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_turn
            ON chunks(turn_id);
        CREATE INDEX IF NOT EXISTS idx_chunks_block
            ON chunks(block_id);

        CREATE TABLE IF NOT EXISTS usage_stats (
            item_id     TEXT PRIMARY KEY,
            item_type   TEXT NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 0,
            first_used  TEXT NOT NULL,
            last_used   TEXT NOT NULL,
            topics      TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_usage_count
            ON usage_stats(usage_count);",
    )
}
