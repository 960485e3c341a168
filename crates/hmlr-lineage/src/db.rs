use rusqlite::{Connection, Result};

/// Initialise the lineage table. Safe to call on every startup
/// (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS lineage (
            item_id      TEXT PRIMARY KEY,
            item_type    TEXT NOT NULL,
            derived_from TEXT NOT NULL DEFAULT '[]',
            derived_by   TEXT NOT NULL,
            created_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_lineage_type
            ON lineage(item_type);",
    )
}
