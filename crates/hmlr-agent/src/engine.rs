use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use hmlr_blocks::BlockManager;
use hmlr_core::config::HmlrConfig;
use hmlr_core::error::{ErrorKind, TurnError};
use hmlr_facts::FactStore;
use hmlr_lineage::LineageTracker;
use hmlr_llm::{ChatLlm, Embedder};
use hmlr_memory::MemoryStore;
use hmlr_memory::ScoredMemory;
use hmlr_retrieval::{gardened_search, hybrid_search, GardenedMemory, GardenedParams, HybridParams};
use hmlr_window::{AffinityStore, EvictionReport, WindowMaintainer};

use crate::governor::Governor;
use crate::synthesis::ProfileSource;

/// Everything the engine needs, injected at construction. The core keeps
/// no other state; all persistence lives in the stores.
pub struct ChatEngineDeps {
    pub cfg: HmlrConfig,
    /// Response-generation tier.
    pub llm: Arc<dyn ChatLlm>,
    /// Small tier for routing, filtering, and extraction.
    pub governor_llm: Arc<dyn ChatLlm>,
    pub embedder: Arc<dyn Embedder>,
    pub blocks: Arc<BlockManager>,
    pub facts: Arc<FactStore>,
    pub memories: Arc<MemoryStore>,
    pub lineage: Arc<LineageTracker>,
    pub affinity: Arc<AffinityStore>,
    pub profile: Arc<dyn ProfileSource>,
}

/// The stateful per-turn pipeline host. One instance serves all callers;
/// concurrent turns are safe because every mutation is serialized by the
/// storage layer, with a per-day advisory lock around the two routing
/// scenarios that pause-and-activate blocks.
pub struct ChatEngine {
    pub(crate) cfg: HmlrConfig,
    pub(crate) llm: Arc<dyn ChatLlm>,
    pub(crate) governor_llm: Arc<dyn ChatLlm>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) blocks: Arc<BlockManager>,
    pub(crate) facts: Arc<FactStore>,
    pub(crate) memories: Arc<MemoryStore>,
    pub(crate) lineage: Arc<LineageTracker>,
    pub(crate) profile: Arc<dyn ProfileSource>,
    pub(crate) governor: Governor,
    maintainer: WindowMaintainer,
    day_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatEngine {
    pub fn new(deps: ChatEngineDeps) -> Self {
        let governor = Governor::new(
            Arc::clone(&deps.blocks),
            Arc::clone(&deps.facts),
            Arc::clone(&deps.memories),
            Arc::clone(&deps.governor_llm),
            deps.cfg.models.governor_model.clone(),
        );
        let maintainer = WindowMaintainer::new(
            Arc::clone(&deps.blocks),
            Arc::clone(&deps.affinity),
            deps.cfg.window.clone(),
        );
        Self {
            governor,
            maintainer,
            cfg: deps.cfg,
            llm: deps.llm,
            governor_llm: deps.governor_llm,
            embedder: deps.embedder,
            blocks: deps.blocks,
            facts: deps.facts,
            memories: deps.memories,
            lineage: deps.lineage,
            profile: deps.profile,
            day_locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Semantic search over gardened (prior-day) memories.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<GardenedMemory>, TurnError> {
        let vector = self.embedder.embed(query).await.map_err(|e| {
            TurnError::new("embedder", ErrorKind::TransientExternal, e.to_string())
        })?;
        let params = GardenedParams {
            top_k: limit.unwrap_or(self.cfg.retrieval.top_k),
            min_similarity: self.cfg.retrieval.gardened_min_similarity,
            exclude_current_day: self.cfg.retrieval.garden_exclude_current_day,
        };
        let day = hmlr_core::types::day_id(Utc::now());
        gardened_search(&self.memories, &self.blocks, &vector, &day, &params)
            .map_err(|e| TurnError::new("search", ErrorKind::Storage, e.to_string()))
    }

    /// Hybrid (vector + lexical) recall over all memories, any day.
    pub async fn recall(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredMemory>, TurnError> {
        let vector = self.embedder.embed(query).await.map_err(|e| {
            TurnError::new("embedder", ErrorKind::TransientExternal, e.to_string())
        })?;
        let params = HybridParams {
            vector_weight: self.cfg.retrieval.vector_weight,
            lexical_weight: self.cfg.retrieval.lexical_weight,
            min_score: self.cfg.retrieval.hybrid_min_score,
            top_k: limit.unwrap_or(self.cfg.retrieval.top_k),
        };
        let terms = hmlr_core::text::extract_terms(query);
        hybrid_search(&self.memories, &vector, &terms, &params)
            .map_err(|e| TurnError::new("recall", ErrorKind::Storage, e.to_string()))
    }

    /// Run the sliding-window eviction policies for a day. Wired to the
    /// daily maintenance tick by the host.
    pub fn maintain(&self, day_id: &str) -> Result<EvictionReport, TurnError> {
        let report = self
            .maintainer
            .check_and_evict(day_id, Utc::now())
            .map_err(|e| TurnError::new("eviction", ErrorKind::Storage, e.to_string()))?;
        info!(
            day_id,
            time_evicted = report.time_evicted,
            space_evicted = report.space_evicted,
            "window maintenance complete"
        );
        Ok(report)
    }

    /// Advisory lock for one day's routing mutations (scenarios 2 and 4).
    pub(crate) async fn day_lock(&self, day_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.day_locks.lock().await;
        Arc::clone(
            locks
                .entry(day_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
