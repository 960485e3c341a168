use rusqlite::{Connection, Result};

/// Initialise block, turn, and outbox tables. Safe to call on every
/// startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bridge_blocks (
            block_id       TEXT PRIMARY KEY,
            day_id         TEXT NOT NULL,
            topic_label    TEXT NOT NULL,
            summary        TEXT NOT NULL DEFAULT '',
            keywords       TEXT NOT NULL DEFAULT '[]',
            status         TEXT NOT NULL,
            prev_block_id  TEXT,
            open_loops     TEXT NOT NULL DEFAULT '[]',
            decisions_made TEXT NOT NULL DEFAULT '[]',
            turn_count     INTEGER NOT NULL DEFAULT 0,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_blocks_day
            ON bridge_blocks(day_id);
        CREATE INDEX IF NOT EXISTS idx_blocks_status
            ON bridge_blocks(status);
        CREATE INDEX IF NOT EXISTS idx_blocks_day_status
            ON bridge_blocks(day_id, status);
        CREATE INDEX IF NOT EXISTS idx_blocks_updated
            ON bridge_blocks(updated_at);

        CREATE TABLE IF NOT EXISTS turns (
            turn_id      TEXT PRIMARY KEY,
            block_id     TEXT NOT NULL,
            user_message TEXT NOT NULL,
            ai_response  TEXT NOT NULL,
            keywords     TEXT NOT NULL DEFAULT '[]',
            affect       TEXT NOT NULL DEFAULT 'neutral',
            timestamp    TEXT NOT NULL,
            evicted      INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_turns_block
            ON turns(block_id);
        CREATE INDEX IF NOT EXISTS idx_turns_timestamp
            ON turns(timestamp);

        CREATE TABLE IF NOT EXISTS turn_outbox (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            kind       TEXT NOT NULL,
            payload    TEXT NOT NULL,
            created_at TEXT NOT NULL
        );",
    )
}
