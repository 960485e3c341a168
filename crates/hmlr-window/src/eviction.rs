use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use hmlr_blocks::{BlockManager, Turn};
use hmlr_core::config::WindowConfig;
use hmlr_core::types::estimate_tokens;

use crate::affinity::AffinityStore;
use crate::error::Result;

/// Outcome of one eviction pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvictionReport {
    pub time_evicted: usize,
    pub space_evicted: usize,
}

/// Runs the time-based and space-based (FIFO) eviction policies over a
/// day's sliding window and keeps topic affinity up to date.
pub struct WindowMaintainer {
    blocks: Arc<BlockManager>,
    affinity: Arc<AffinityStore>,
    cfg: WindowConfig,
}

impl WindowMaintainer {
    pub fn new(blocks: Arc<BlockManager>, affinity: Arc<AffinityStore>, cfg: WindowConfig) -> Self {
        Self {
            blocks,
            affinity,
            cfg,
        }
    }

    /// Evict until the day's window satisfies both bounds: every turn
    /// younger than the time horizon, and at most `max_tier2_turns` /
    /// `max_tier2_tokens` in total.
    pub fn check_and_evict(&self, day_id: &str, now: DateTime<Utc>) -> Result<EvictionReport> {
        let turns = self.blocks.day_turns(day_id, false)?;
        if turns.is_empty() {
            return Ok(EvictionReport::default());
        }

        let topics: HashMap<String, String> = self
            .blocks
            .get_by_day(day_id)?
            .into_iter()
            .map(|b| (b.block_id, b.topic_label))
            .collect();

        let mut report = EvictionReport::default();
        let mut evicted_ids: Vec<String> = Vec::new();
        let mut remaining: Vec<&Turn> = Vec::new();

        // Time policy: anything older than the horizon leaves the window.
        let horizon_ms = (self.cfg.time_eviction_hours * 3_600_000.0) as i64;
        for turn in &turns {
            let age_ms = turn_age_ms(turn, now);
            if age_ms > horizon_ms {
                self.record_eviction(turn, &topics, now)?;
                evicted_ids.push(turn.turn_id.clone());
                report.time_evicted += 1;
            } else {
                remaining.push(turn);
            }
        }

        // Space policy: FIFO on timestamp until both bounds hold.
        // `day_turns` returns oldest-first, so the front is the FIFO head.
        let mut token_sum: usize = remaining.iter().map(|t| turn_tokens(t)).sum();
        let mut head = 0usize;
        while remaining.len() - head > self.cfg.max_tier2_turns
            || token_sum > self.cfg.max_tier2_tokens
        {
            let Some(turn) = remaining.get(head) else {
                break;
            };
            token_sum -= turn_tokens(turn);
            self.record_eviction(turn, &topics, now)?;
            evicted_ids.push(turn.turn_id.clone());
            report.space_evicted += 1;
            head += 1;
        }

        if !evicted_ids.is_empty() {
            self.blocks.mark_evicted(&evicted_ids)?;
            info!(
                day_id,
                time_evicted = report.time_evicted,
                space_evicted = report.space_evicted,
                "sliding window evicted"
            );
        }
        Ok(report)
    }

    fn record_eviction(
        &self,
        turn: &Turn,
        topics: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let topic = topics
            .get(&turn.block_id)
            .map(String::as_str)
            .unwrap_or("general");
        let added_at = DateTime::parse_from_rfc3339(&turn.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);
        self.affinity.update_topic_affinity(topic, added_at, now)?;
        Ok(())
    }
}

fn turn_age_ms(turn: &Turn, now: DateTime<Utc>) -> i64 {
    DateTime::parse_from_rfc3339(&turn.timestamp)
        .map(|t| (now - t.with_timezone(&Utc)).num_milliseconds())
        .unwrap_or(0)
}

/// `ceil((len(user) + len(assistant)) / 4)`.
fn turn_tokens(turn: &Turn) -> usize {
    estimate_tokens(&turn.user_message) + estimate_tokens(&turn.ai_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmlr_blocks::NewTurn;
    use rusqlite::Connection;

    fn fixtures() -> (Arc<BlockManager>, Arc<AffinityStore>, String) {
        let blocks = Arc::new(BlockManager::new(Connection::open_in_memory().unwrap()).unwrap());
        let affinity = Arc::new(AffinityStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let block = blocks.create("2026-08-01", "Load testing", None).unwrap();
        (blocks, affinity, block.block_id)
    }

    fn append(blocks: &BlockManager, block_id: &str, i: usize, msg: &str) {
        blocks
            .append_turn(
                NewTurn {
                    turn_id: format!("turn_{i:04}"),
                    block_id: block_id.to_string(),
                    user_message: msg.to_string(),
                    ai_response: "reply".to_string(),
                    keywords: vec![],
                    affect: "neutral".to_string(),
                },
                None,
            )
            .unwrap();
    }

    #[test]
    fn space_eviction_converges_to_both_bounds() {
        let (blocks, affinity, block_id) = fixtures();
        for i in 0..40 {
            append(&blocks, &block_id, i, "short message");
        }

        let maintainer =
            WindowMaintainer::new(Arc::clone(&blocks), affinity, WindowConfig::default());
        let report = maintainer.check_and_evict("2026-08-01", Utc::now()).unwrap();
        assert_eq!(report.space_evicted, 10);

        let window = blocks.day_turns("2026-08-01", false).unwrap();
        assert!(window.len() <= 30);
        let tokens: usize = window.iter().map(turn_tokens).sum();
        assert!(tokens <= 5000);
        // FIFO: the oldest turns left first.
        assert_eq!(window[0].turn_id, "turn_0010");
    }

    #[test]
    fn token_bound_evicts_even_under_the_turn_cap() {
        let (blocks, affinity, block_id) = fixtures();
        let long = "x".repeat(4000);
        for i in 0..8 {
            append(&blocks, &block_id, i, &long);
        }

        let maintainer =
            WindowMaintainer::new(Arc::clone(&blocks), affinity, WindowConfig::default());
        maintainer.check_and_evict("2026-08-01", Utc::now()).unwrap();

        let window = blocks.day_turns("2026-08-01", false).unwrap();
        let tokens: usize = window.iter().map(turn_tokens).sum();
        assert!(tokens <= 5000);
        assert!(!window.is_empty());
    }

    #[test]
    fn eviction_updates_topic_affinity() {
        let (blocks, affinity, block_id) = fixtures();
        for i in 0..31 {
            append(&blocks, &block_id, i, "short message");
        }

        let maintainer = WindowMaintainer::new(
            Arc::clone(&blocks),
            Arc::clone(&affinity),
            WindowConfig::default(),
        );
        maintainer.check_and_evict("2026-08-01", Utc::now()).unwrap();

        let row = affinity.get("load testing").unwrap().unwrap();
        assert_eq!(row.eviction_count, 1);
    }

    #[test]
    fn empty_day_is_a_no_op() {
        let (blocks, affinity, _) = fixtures();
        let maintainer =
            WindowMaintainer::new(Arc::clone(&blocks), affinity, WindowConfig::default());
        let report = maintainer.check_and_evict("2026-01-01", Utc::now()).unwrap();
        assert_eq!(report.time_evicted + report.space_evicted, 0);
    }
}
