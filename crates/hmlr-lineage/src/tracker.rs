use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use hmlr_core::types::now_rfc3339;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{IntegrityReport, ItemType, LineageEdge};

const DEFAULT_MAX_DEPTH: usize = 10;

/// Records and traverses derivation edges. One row per item; recording
/// again upserts (latest derivation wins).
pub struct LineageTracker {
    db: Mutex<Connection>,
}

impl LineageTracker {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn record(
        &self,
        item_id: &str,
        item_type: ItemType,
        derived_from: &[String],
        derived_by: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO lineage (item_id, item_type, derived_from, derived_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(item_id) DO UPDATE SET
                item_type = excluded.item_type,
                derived_from = excluded.derived_from,
                derived_by = excluded.derived_by",
            rusqlite::params![
                item_id,
                item_type.to_string(),
                serde_json::to_string(derived_from).unwrap_or_else(|_| "[]".into()),
                derived_by,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, item_id: &str) -> Result<Option<LineageEdge>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT item_id, item_type, derived_from, derived_by, created_at
             FROM lineage WHERE item_id = ?1",
        )?;
        Ok(stmt.query_row([item_id], row_to_edge).ok())
    }

    /// BFS up the `derived_from` links, at most `max_depth` levels. The
    /// starting item is not included.
    pub fn get_ancestors(&self, item_id: &str, max_depth: Option<usize>) -> Result<Vec<LineageEdge>> {
        let max_depth = max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        let mut visited: HashSet<String> = HashSet::from([item_id.to_string()]);
        let mut out = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(item_id.to_string(), 0)]);

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(edge) = self.get(&id)? else { continue };
            for parent in &edge.derived_from {
                if !visited.insert(parent.clone()) {
                    continue;
                }
                if let Some(parent_edge) = self.get(parent)? {
                    out.push(parent_edge);
                }
                queue.push_back((parent.clone(), depth + 1));
            }
        }
        debug!(item_id, ancestors = out.len(), "ancestor traversal");
        Ok(out)
    }

    /// BFS down: items whose `derived_from` contains the target,
    /// transitively, at most `max_depth` levels.
    pub fn get_descendants(
        &self,
        item_id: &str,
        max_depth: Option<usize>,
    ) -> Result<Vec<LineageEdge>> {
        let max_depth = max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        let mut visited: HashSet<String> = HashSet::from([item_id.to_string()]);
        let mut out = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(item_id.to_string(), 0)]);

        while let Some((id, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for child in self.children_of(&id)? {
                if !visited.insert(child.item_id.clone()) {
                    continue;
                }
                queue.push_back((child.item_id.clone(), depth + 1));
                out.push(child);
            }
        }
        Ok(out)
    }

    fn children_of(&self, item_id: &str) -> Result<Vec<LineageEdge>> {
        let db = self.db.lock().unwrap();
        // LIKE narrows the scan (underscores in ids are single-char
        // wildcards, so it can over-match); the JSON membership check
        // below is authoritative.
        let mut stmt = db.prepare(
            "SELECT item_id, item_type, derived_from, derived_by, created_at
             FROM lineage WHERE derived_from LIKE ?1",
        )?;
        let pattern = format!("%\"{item_id}\"%");
        let rows = stmt.query_map([pattern], row_to_edge)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter(|e| e.derived_from.iter().any(|p| p == item_id))
            .collect())
    }

    /// Full-table sweep: orphaned rows (no parents, no children) and
    /// parent references that do not resolve inside the table.
    pub fn validate_integrity(&self) -> Result<IntegrityReport> {
        let edges = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT item_id, item_type, derived_from, derived_by, created_at FROM lineage",
            )?;
            let rows = stmt.query_map([], row_to_edge)?;
            rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
        };

        let known: HashSet<&str> = edges.iter().map(|e| e.item_id.as_str()).collect();
        let referenced: HashSet<&str> = edges
            .iter()
            .flat_map(|e| e.derived_from.iter().map(String::as_str))
            .collect();

        let orphaned_items: Vec<String> = edges
            .iter()
            .filter(|e| e.derived_from.is_empty() && !referenced.contains(e.item_id.as_str()))
            .map(|e| e.item_id.clone())
            .collect();

        let mut broken_references: Vec<String> = referenced
            .iter()
            .filter(|id| !known.contains(**id))
            .map(|id| id.to_string())
            .collect();
        broken_references.sort();

        Ok(IntegrityReport {
            valid: orphaned_items.is_empty() && broken_references.is_empty(),
            orphaned_items,
            broken_references,
        })
    }
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<LineageEdge> {
    let item_type: String = row.get(1)?;
    let derived_from: String = row.get(2)?;
    Ok(LineageEdge {
        item_id: row.get(0)?,
        item_type: item_type.parse().unwrap_or(ItemType::Turn),
        derived_from: serde_json::from_str(&derived_from).unwrap_or_default(),
        derived_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}
