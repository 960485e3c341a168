use rusqlite::{Connection, Result};

/// Initialise the jobs table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id         TEXT PRIMARY KEY,
            name       TEXT NOT NULL,
            schedule   TEXT NOT NULL,
            action     TEXT NOT NULL,
            status     TEXT NOT NULL,
            last_run   TEXT,
            next_run   TEXT,
            run_count  INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_next_run
            ON jobs(status, next_run);",
    )
}
