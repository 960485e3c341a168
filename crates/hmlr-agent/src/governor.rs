use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use hmlr_blocks::{BlockManager, BlockMeta};
use hmlr_facts::{Fact, FactStore, DELETED_VALUE};
use hmlr_llm::{ChatLlm, ChatRequest};
use hmlr_memory::{MemoryStore, ScoredMemory};

/// Candidate pool size for the 2-key memory filter.
const FILTER_CANDIDATES: usize = 20;
/// Memories kept when the filter response cannot be parsed.
const FILTER_FALLBACK_KEEP: usize = 5;
/// Blocks listed in the routing prompt.
const ROUTE_MAX_BLOCKS: usize = 10;
/// Candidate keys looked up per query.
const MAX_FACT_KEYS: usize = 10;

/// Where the query goes: an existing block, or a fresh one.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    #[serde(default)]
    pub matched_block_id: Option<String>,
    #[serde(default)]
    pub is_new_topic: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub suggested_label: String,
}

/// The four routing scenarios executed from a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScenario {
    /// 1 — matched block is the last-active block; stays ACTIVE.
    Continuation,
    /// 2 — an earlier block resumes; last-active pauses with a summary.
    Resumption,
    /// 3 — new topic with no last-active block; create fresh.
    NewConversation,
    /// 4 — new topic on top of a live one; pause it, create fresh.
    TopicShift,
}

impl RouteScenario {
    pub fn number(&self) -> u8 {
        match self {
            Self::Continuation => 1,
            Self::Resumption => 2,
            Self::NewConversation => 3,
            Self::TopicShift => 4,
        }
    }
}

/// Map a routing decision and the current last-active block onto one of
/// the four scenarios. Inconsistent input falls back to scenario 3.
pub fn resolve_scenario(
    routing: &RoutingDecision,
    last_active: Option<&str>,
) -> RouteScenario {
    match (&routing.matched_block_id, routing.is_new_topic, last_active) {
        (Some(matched), _, Some(active)) if matched == active => RouteScenario::Continuation,
        (Some(_), false, _) => RouteScenario::Resumption,
        (_, true, None) => RouteScenario::NewConversation,
        (_, true, Some(_)) => RouteScenario::TopicShift,
        _ => RouteScenario::NewConversation,
    }
}

/// Combined result of the governor fan-out.
#[derive(Debug)]
pub struct GovernorResult {
    pub routing: RoutingDecision,
    pub memories: Vec<ScoredMemory>,
    pub facts: Vec<Fact>,
}

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error(transparent)]
    Block(#[from] hmlr_blocks::BlockError),

    #[error(transparent)]
    Fact(#[from] hmlr_facts::FactError),

    #[error(transparent)]
    Memory(#[from] hmlr_memory::MemoryError),
}

/// Routes queries, filters retrieved memories, and looks up exact facts.
/// The three subtasks have no ordering dependency and run concurrently.
///
/// LLM failures never surface: routing falls back to the last-active
/// block and the memory filter falls back to the top candidates by score.
/// Storage failures are real errors.
pub struct Governor {
    blocks: Arc<BlockManager>,
    facts: Arc<FactStore>,
    memories: Arc<MemoryStore>,
    llm: Arc<dyn ChatLlm>,
    model: String,
}

impl Governor {
    pub fn new(
        blocks: Arc<BlockManager>,
        facts: Arc<FactStore>,
        memories: Arc<MemoryStore>,
        llm: Arc<dyn ChatLlm>,
        model: String,
    ) -> Self {
        Self {
            blocks,
            facts,
            memories,
            llm,
            model,
        }
    }

    /// Fan out route / memory-filter / fact-lookup and fan back in.
    pub async fn govern(
        &self,
        query: &str,
        query_embedding: &[f32],
        day_id: &str,
    ) -> Result<GovernorResult, GovernorError> {
        let (routing, memories, facts) = tokio::join!(
            self.route(query, day_id),
            self.filter_memories(query, query_embedding),
            self.lookup_facts(query),
        );
        Ok(GovernorResult {
            routing: routing?,
            memories: memories?,
            facts: facts?,
        })
    }

    /// Decide which block (if any) the query belongs to, against the
    /// day's ledger.
    async fn route(&self, query: &str, day_id: &str) -> Result<RoutingDecision, GovernorError> {
        let metas = self.blocks.get_metadata_by_day(day_id)?;
        if metas.is_empty() {
            return Ok(RoutingDecision {
                matched_block_id: None,
                is_new_topic: true,
                reasoning: "first_query_of_day".to_string(),
                suggested_label: "Initial Conversation".to_string(),
            });
        }

        let ledger = render_ledger(&metas);
        let system = concat!(
            "You route a user query to today's conversation blocks. ",
            "Return ONLY JSON: ",
            r#"{"matchedBlockId": "id or null", "isNewTopic": bool, "#,
            r#""reasoning": "...", "suggestedLabel": "..."}"#,
        );
        let content = format!("Today's blocks:\n{ledger}\nQuery: {query}");
        let req = ChatRequest::single(&self.model, system, &content, 256);

        let fallback = || {
            let last = metas.iter().find(|m| m.is_last_active);
            RoutingDecision {
                matched_block_id: last.map(|m| m.block_id.clone()),
                is_new_topic: false,
                reasoning: "fallback_last_active".to_string(),
                suggested_label: last
                    .map(|m| m.topic_label.clone())
                    .unwrap_or_else(|| "Initial Conversation".to_string()),
            }
        };

        match self.llm.chat(&req).await {
            Ok(resp) => match parse_json_object::<RoutingDecision>(&resp.content) {
                Some(mut decision) => {
                    // The model sometimes echoes "null" as a string.
                    if decision
                        .matched_block_id
                        .as_deref()
                        .is_some_and(|id| id == "null" || id.is_empty())
                    {
                        decision.matched_block_id = None;
                    }
                    debug!(reasoning = %decision.reasoning, "route decided");
                    Ok(decision)
                }
                None => {
                    warn!("routing response unparseable, falling back to last active");
                    Ok(fallback())
                }
            },
            Err(e) => {
                warn!(err = %e, "routing call failed, falling back to last active");
                Ok(fallback())
            }
        }
    }

    /// The 2-key memory filter: vector search proposes, the small model
    /// disposes. Kills semantically close but opposite matches.
    async fn filter_memories(
        &self,
        query: &str,
        query_embedding: &[f32],
    ) -> Result<Vec<ScoredMemory>, GovernorError> {
        let candidates = self
            .memories
            .vector_search(query_embedding, FILTER_CANDIDATES, f64::MIN)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let listing: String = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{i}] {}", truncate(&c.memory.content, 300)))
            .collect::<Vec<_>>()
            .join("\n");
        let system = concat!(
            "You filter retrieved memories for relevance to a query. ",
            "Discard memories that merely look similar but assert the opposite ",
            "or talk about something else. Return ONLY JSON: ",
            r#"{"relevantIndices": [0, 2], "reasoning": "..."}"#,
        );
        let content = format!("Query: {query}\n\nCandidates:\n{listing}");
        let req = ChatRequest::single(&self.model, system, &content, 256);

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct FilterVerdict {
            #[serde(default)]
            relevant_indices: Vec<usize>,
        }

        match self.llm.chat(&req).await {
            Ok(resp) => match parse_json_object::<FilterVerdict>(&resp.content) {
                Some(verdict) => {
                    let kept: Vec<ScoredMemory> = verdict
                        .relevant_indices
                        .iter()
                        .filter_map(|&i| candidates.get(i).cloned())
                        .collect();
                    debug!(kept = kept.len(), of = candidates.len(), "memories filtered");
                    Ok(kept)
                }
                None => {
                    warn!("memory filter unparseable, keeping top candidates");
                    Ok(candidates.into_iter().take(FILTER_FALLBACK_KEEP).collect())
                }
            },
            Err(e) => {
                warn!(err = %e, "memory filter call failed, keeping top candidates");
                Ok(candidates.into_iter().take(FILTER_FALLBACK_KEEP).collect())
            }
        }
    }

    /// Exact fact lookups for candidate keys in the query: capitalized
    /// acronyms first, then bare word tokens. Tombstones never surface.
    async fn lookup_facts(&self, query: &str) -> Result<Vec<Fact>, GovernorError> {
        let mut facts = Vec::new();
        for key in candidate_keys(query) {
            if let Some(fact) = self.facts.get(&key)? {
                if fact.value != DELETED_VALUE {
                    facts.push(fact);
                }
            }
        }
        Ok(facts)
    }
}

static ACRONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z][A-Z0-9_]+").expect("acronym regex"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("word regex"));

/// Candidate fact keys: acronyms (`HMLR`, `API_V2`), then every bare word
/// token, deduped in order, first 10.
fn candidate_keys(query: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for m in ACRONYM.find_iter(query).chain(WORD.find_iter(query)) {
        let token = m.as_str().to_string();
        if !keys.contains(&token) {
            keys.push(token);
        }
        if keys.len() == MAX_FACT_KEYS {
            break;
        }
    }
    keys
}

fn render_ledger(metas: &[BlockMeta]) -> String {
    metas
        .iter()
        .take(ROUTE_MAX_BLOCKS)
        .map(|m| {
            let marker = if m.is_last_active { " [LAST-ACTIVE]" } else { "" };
            let keywords = m
                .keywords
                .iter()
                .take(5)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "- {} \"{}\" ({}{marker}) turns={} keywords=[{}] summary: {}",
                m.block_id,
                m.topic_label,
                m.status,
                m.turn_count,
                keywords,
                truncate(&m.summary, 150),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Outermost `{…}` span of a model response, parsed as `T`.
fn parse_json_object<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
