use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    schedule::compute_next_run,
    types::{Job, JobAction, JobStatus, Schedule},
};

/// Shared handle for job management while the engine loop runs. Uses its
/// own `Connection` so callers never contend with the tick loop.
#[derive(Clone)]
pub struct SchedulerHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn add_job(&self, name: &str, schedule: Schedule, action: &JobAction) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        insert_job(&conn, name, schedule, action)
    }

    /// Idempotent setup for the recurring synthesis ticks: inserts the job
    /// only when no job of that name exists yet.
    pub fn ensure_job(&self, name: &str, schedule: Schedule, action: &JobAction) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        if exists == 0 {
            insert_job(&conn, name, schedule, action)?;
        }
        Ok(())
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, schedule, action, status, last_run, next_run,
                    run_count, created_at, updated_at
             FROM jobs ORDER BY created_at",
        )?;
        let jobs = stmt
            .query_map([], row_to_job_parts)?
            .filter_map(|r| r.ok())
            .filter_map(parts_to_job)
            .collect();
        Ok(jobs)
    }
}

/// Drives job execution at second precision and drains the turn-commit
/// outbox into durable jobs.
///
/// The outbox lives in the blocks database (written in the same
/// transaction as each turn append); the engine connects to that same
/// file, so a drained row becomes a job atomically.
pub struct SchedulerEngine {
    conn: Connection,
    /// Fired jobs are forwarded here for the synthesis layer to execute.
    fired_tx: Option<mpsc::Sender<Job>>,
}

impl SchedulerEngine {
    /// Create a new engine, initialising the schema if needed. Pass
    /// `Some(tx)` to receive every fired [`Job`]; `try_send` keeps the
    /// tick loop from ever stalling on a slow consumer.
    pub fn new(conn: Connection, fired_tx: Option<mpsc::Sender<Job>>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn, fired_tx })
    }

    /// Main loop. Polls every second until `shutdown` broadcasts `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        self.mark_missed_on_startup();

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.drain_outbox() {
                        error!("outbox drain error: {e}");
                    }
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Move pending outbox rows into immediate `Once` jobs. Row delete
    /// and job insert share one transaction, so a drained request is
    /// never lost and never duplicated.
    pub fn drain_outbox(&mut self) -> Result<usize> {
        let has_outbox: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name = 'turn_outbox'",
            [],
            |row| row.get(0),
        )?;
        if has_outbox == 0 {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let rows: Vec<(i64, String, String)> = {
            let mut stmt =
                tx.prepare("SELECT id, kind, payload FROM turn_outbox ORDER BY id LIMIT 100")?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            let result = mapped.filter_map(|r| r.ok()).collect();
            result
        };

        let now = Utc::now();
        let mut drained = 0usize;
        for (row_id, kind, payload) in rows {
            match JobAction::from_json(&payload) {
                Some(action) => {
                    insert_job(&tx, &kind, Schedule::Once { at: now }, &action)?;
                    drained += 1;
                }
                None => warn!(row_id, kind = %kind, "outbox row with bad payload dropped"),
            }
            tx.execute("DELETE FROM turn_outbox WHERE id = ?1", [row_id])?;
        }
        tx.commit()?;

        if drained > 0 {
            info!(drained, "outbox drained into jobs");
        }
        Ok(drained)
    }

    /// On startup, mark pending jobs whose window passed as missed.
    fn mark_missed_on_startup(&mut self) {
        let now = Utc::now().to_rfc3339();
        match self.conn.execute(
            "UPDATE jobs SET status = 'missed', updated_at = ?1
             WHERE status = 'pending' AND next_run IS NOT NULL AND next_run < ?1",
            [&now],
        ) {
            Ok(n) if n > 0 => warn!(count = n, "jobs marked missed on startup"),
            Err(e) => error!("missed-on-startup query failed: {e}"),
            _ => {}
        }
    }

    /// Fire every job whose `next_run` has arrived.
    pub fn tick(&mut self) -> Result<()> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        let due: Vec<(String, String, String, String, u32)> = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT id, name, schedule, action, run_count FROM jobs
                 WHERE status = 'pending' AND next_run IS NOT NULL AND next_run <= ?1",
            )?;
            let mapped = stmt.query_map([&now_str], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?;
            let result = mapped.filter_map(|r| r.ok()).collect();
            result
        };

        for (id, name, sched_json, action_json, run_count) in due {
            let (Ok(schedule), Some(action)) = (
                serde_json::from_str::<Schedule>(&sched_json),
                JobAction::from_json(&action_json),
            ) else {
                error!(job_id = %id, "job with undecodable schedule or action skipped");
                continue;
            };

            let new_count = run_count + 1;
            let next = compute_next_run(&schedule, now).map(|dt| dt.to_rfc3339());
            let new_status = if next.is_none() { "completed" } else { "pending" };

            info!(job_id = %id, %name, run = new_count, "firing job");

            self.conn.execute(
                "UPDATE jobs SET status = ?1, last_run = ?2, next_run = ?3,
                    run_count = ?4, updated_at = ?2
                 WHERE id = ?5",
                rusqlite::params![new_status, now_str, next, new_count, id],
            )?;

            if let Some(ref tx) = self.fired_tx {
                let job = Job {
                    id: id.clone(),
                    name,
                    schedule,
                    action,
                    status: JobStatus::Pending,
                    last_run: Some(now_str.clone()),
                    next_run: next,
                    run_count: new_count,
                    created_at: String::new(),
                    updated_at: now_str.clone(),
                };
                if tx.try_send(job).is_err() {
                    warn!(job_id = %id, "delivery channel full or closed — job dropped");
                }
            }
        }
        Ok(())
    }
}

fn insert_job(
    conn: &Connection,
    name: &str,
    schedule: Schedule,
    action: &JobAction,
) -> Result<Job> {
    let now = Utc::now();
    let now_str = now.to_rfc3339();
    // Once{at: now} must stay runnable: compare against the instant just
    // before `at` so the first tick picks it up.
    let next = match &schedule {
        Schedule::Once { at } => Some(at.to_rfc3339()),
        other => compute_next_run(other, now).map(|dt| dt.to_rfc3339()),
    };
    let id = Uuid::new_v4().to_string();
    let schedule_json = serde_json::to_string(&schedule)
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

    conn.execute(
        "INSERT INTO jobs
         (id, name, schedule, action, status, last_run, next_run,
          run_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', NULL, ?5, 0, ?6, ?6)",
        rusqlite::params![id, name, schedule_json, action.to_json(), next, now_str],
    )?;
    info!(job_id = %id, %name, "job added");

    Ok(Job {
        id,
        name: name.to_string(),
        schedule,
        action: action.clone(),
        status: JobStatus::Pending,
        last_run: None,
        next_run: next,
        run_count: 0,
        created_at: now_str.clone(),
        updated_at: now_str,
    })
}

type JobParts = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    u32,
    String,
    String,
);

fn row_to_job_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobParts> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn parts_to_job(parts: JobParts) -> Option<Job> {
    let (id, name, sched_json, action_json, status_str, last_run, next_run, run_count, created_at, updated_at) =
        parts;
    Some(Job {
        id,
        name,
        schedule: serde_json::from_str(&sched_json).ok()?,
        action: JobAction::from_json(&action_json)?,
        status: status_str.parse().ok()?,
        last_run,
        next_run,
        run_count,
        created_at,
        updated_at,
    })
}
