use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;

/// Per-topic residency accounting: how often a topic's turns get evicted
/// and how long they lived in the window beforehand.
#[derive(Debug, Clone, Serialize)]
pub struct TopicAffinity {
    /// Lowercase topic key.
    pub topic: String,
    pub eviction_count: u64,
    pub total_time_in_window_ms: i64,
    pub avg_time_in_window_ms: i64,
}

/// SQLite-backed topic affinity store. Updates are last-writer-wins;
/// benign drift under concurrent eviction passes is acceptable.
pub struct AffinityStore {
    db: Mutex<Connection>,
}

impl AffinityStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS topic_affinity (
                topic                   TEXT PRIMARY KEY,
                eviction_count          INTEGER NOT NULL DEFAULT 0,
                total_time_in_window_ms INTEGER NOT NULL DEFAULT 0,
                avg_time_in_window_ms   INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_affinity_evictions
                ON topic_affinity(eviction_count);",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Upsert the affinity row for `topic` (lowercased), adding the time
    /// the evicted turn spent in the window and recomputing the average.
    pub fn update_topic_affinity(
        &self,
        topic: &str,
        added_at: DateTime<Utc>,
        evicted_at: DateTime<Utc>,
    ) -> Result<()> {
        let topic = topic.to_lowercase();
        let residency_ms = (evicted_at - added_at).num_milliseconds().max(0);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO topic_affinity
                (topic, eviction_count, total_time_in_window_ms, avg_time_in_window_ms)
             VALUES (?1, 1, ?2, ?2)
             ON CONFLICT(topic) DO UPDATE SET
                eviction_count = eviction_count + 1,
                total_time_in_window_ms = total_time_in_window_ms + ?2,
                avg_time_in_window_ms =
                    (total_time_in_window_ms + ?2) / (eviction_count + 1)",
            rusqlite::params![topic, residency_ms],
        )?;
        Ok(())
    }

    pub fn get(&self, topic: &str) -> Result<Option<TopicAffinity>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT topic, eviction_count, total_time_in_window_ms, avg_time_in_window_ms
             FROM topic_affinity WHERE topic = ?1",
        )?;
        let row = stmt
            .query_row([topic.to_lowercase()], |row| {
                Ok(TopicAffinity {
                    topic: row.get(0)?,
                    eviction_count: row.get(1)?,
                    total_time_in_window_ms: row.get(2)?,
                    avg_time_in_window_ms: row.get(3)?,
                })
            })
            .ok();
        Ok(row)
    }
}
