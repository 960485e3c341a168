use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use hmlr_blocks::{BlockStatus, MetadataUpdate, NewTurn, OutboxEntry, Turn};
use hmlr_core::error::{ErrorKind, TurnError};
use hmlr_core::text::extract_terms;
use hmlr_core::types::{day_id, estimate_tokens, new_turn_id};
use hmlr_facts::NewFact;
use hmlr_lineage::ItemType;
use hmlr_llm::{ChatRequest, LlmError};
use hmlr_memory::NewMemory;
use hmlr_scheduler::JobAction;
use hmlr_window::{decide_compression, rehydrate, CompressionInput};

use crate::engine::ChatEngine;
use crate::governor::{resolve_scenario, RouteScenario, RoutingDecision};
use crate::hydrate::{allocate_token_budget, build_context, HydrationInput};
use crate::metadata::{extract_metadata, metadata_instructions};
use crate::scrubber::extract_facts;

const SYSTEM_PROMPT: &str = "You are a conversational assistant with a long-term memory. \
Ground your answers in the provided conversation history, relevant memories, \
known facts, and user profile. Never invent facts that contradict the known ones.";

const FALLBACK_TOPIC: &str = "General Conversation";
const TURN_KEYWORD_CAP: usize = 10;

/// What the caller receives for a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub block_id: String,
    pub turn_id: String,
    pub is_new_topic: bool,
    pub topic_label: String,
    pub memories_used: usize,
    pub facts_used: usize,
    pub chunks_created: usize,
    pub facts_extracted: usize,
    /// Routing scenario number (1–4).
    pub scenario: u8,
}

impl ChatEngine {
    /// Run one full chat turn.
    ///
    /// Critical steps (embedding, governor, routing, hydration, the LLM
    /// call, the turn append, and the memory insert) abort the turn with
    /// a [`TurnError`] naming the failed step. Everything else (chunking,
    /// fact extraction, profile load, metadata merge, lineage) degrades
    /// with a warning.
    pub async fn send_message(
        &self,
        message: &str,
        user_id: Option<&str>,
    ) -> Result<ChatOutcome, TurnError> {
        let start = Instant::now();
        let turn_id = new_turn_id();
        let day = day_id(Utc::now());
        let user = user_id.unwrap_or("default");
        debug!(turn_id = %turn_id, day = %day, "turn started");

        // Chunks persist before routing; block ids are patched in later.
        let chunks = hmlr_chunker::chunk_text(message, &turn_id, None);
        let chunks_created = match self.memories.insert_chunks(&chunks) {
            Ok(n) => n,
            Err(e) => {
                warn!(err = %e, "chunk persistence failed, continuing without chunks");
                0
            }
        };

        let query_vec = self.embedder.embed(message).await.map_err(|e| {
            TurnError::new("embedder", ErrorKind::TransientExternal, e.to_string())
        })?;

        let governed = self
            .governor
            .govern(message, &query_vec, &day)
            .await
            .map_err(|e| TurnError::new("governor", ErrorKind::Storage, e.to_string()))?;

        let (block_id, is_new_topic, scenario) = self
            .apply_routing(&governed.routing, &day)
            .await
            .map_err(|e| TurnError::new("routing", ErrorKind::Storage, e.to_string()))?;
        info!(
            turn_id = %turn_id,
            block_id = %block_id,
            scenario = scenario.number(),
            "routing applied"
        );

        if chunks_created > 0 {
            if let Err(e) = self.memories.assign_chunks_to_block(&turn_id, &block_id) {
                warn!(err = %e, "chunk block assignment failed");
            }
        }

        // Fact extraction runs concurrently with the context build.
        let fact_task = {
            let llm = Arc::clone(&self.governor_llm);
            let model = self.cfg.models.governor_model.clone();
            let text = message.to_string();
            tokio::spawn(async move { extract_facts(llm, &model, &text).await })
        };

        let (context_text, memories_used, facts_used, turns_in_context) = self
            .build_turn_context(message, &query_vec, &block_id, &day, &governed, user)
            .await?;
        debug!(
            turns = turns_in_context,
            memories = memories_used,
            facts = facts_used,
            "context hydrated"
        );

        let instructions = metadata_instructions(is_new_topic);
        let user_prompt = if context_text.is_empty() {
            format!("{message}{instructions}")
        } else {
            format!("{context_text}\n\nUser message: {message}{instructions}")
        };

        let request = ChatRequest {
            model: self.cfg.models.default_model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![hmlr_llm::Message {
                role: hmlr_llm::Role::User,
                content: user_prompt,
            }],
            max_tokens: self.cfg.models.max_response_tokens,
            temperature: self.cfg.models.temperature,
        };
        let response = self
            .llm
            .chat(&request)
            .await
            .map_err(|e| TurnError::new("llm", llm_error_kind(&e), e.to_string()))?;

        let (clean_response, meta) = extract_metadata(&response.content);
        if let Some(ref meta) = meta {
            let update = MetadataUpdate {
                topic_label: meta.topic_label.clone(),
                summary: meta.summary.clone(),
                keywords: meta.keywords.clone(),
                open_loops: meta.open_loops.clone(),
                decisions_made: meta.decisions_made.clone(),
            };
            if let Err(e) = self.blocks.update_metadata(&block_id, &update) {
                warn!(err = %e, "metadata merge failed");
            }
        }

        let mut keywords = meta
            .as_ref()
            .map(|m| m.keywords.clone())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| extract_terms(message));
        keywords.truncate(TURN_KEYWORD_CAP);
        let affect = meta
            .as_ref()
            .and_then(|m| m.affect.clone())
            .filter(|a| a.parse::<hmlr_core::types::Affect>().is_ok())
            .unwrap_or_else(|| "neutral".to_string());

        let scribe_job = OutboxEntry {
            kind: "scribe".to_string(),
            payload: JobAction::Scribe {
                user_id: user.to_string(),
            }
            .to_json(),
        };
        self.blocks
            .append_turn(
                NewTurn {
                    turn_id: turn_id.clone(),
                    block_id: block_id.clone(),
                    user_message: message.to_string(),
                    ai_response: clean_response.clone(),
                    keywords,
                    affect,
                },
                Some(scribe_job),
            )
            .map_err(|e| TurnError::new("append_turn", ErrorKind::Storage, e.to_string()))?;

        let memory_id = format!("mem_{turn_id}");
        self.memories
            .insert_memory(NewMemory {
                memory_id: memory_id.clone(),
                turn_id: turn_id.clone(),
                block_id: block_id.clone(),
                content: format!("User: {message}\nAssistant: {clean_response}"),
                chunk_index: 0,
                embedding: query_vec,
            })
            .map_err(|e| TurnError::new("memory_insert", ErrorKind::Storage, e.to_string()))?;

        self.record_turn_lineage(&turn_id, &block_id, &memory_id, &chunks);

        let extracted = match fact_task.await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(err = %e, "fact extraction task failed");
                Vec::new()
            }
        };
        let facts_extracted = self.persist_extracted_facts(&extracted, &block_id, &turn_id);

        let topic_label = self
            .blocks
            .get(&block_id)
            .map(|b| b.topic_label)
            .unwrap_or_else(|_| FALLBACK_TOPIC.to_string());

        info!(
            turn_id = %turn_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            scenario = scenario.number(),
            facts_extracted,
            "turn complete"
        );

        Ok(ChatOutcome {
            response: clean_response,
            block_id,
            turn_id,
            is_new_topic,
            topic_label,
            memories_used,
            facts_used,
            chunks_created,
            facts_extracted,
            scenario: scenario.number(),
        })
    }

    /// Execute one of the four routing scenarios.
    ///
    /// Scenarios 2 and 4 pause one block and activate another; they run
    /// under the per-day advisory lock so concurrent turns cannot leave
    /// two blocks ACTIVE.
    async fn apply_routing(
        &self,
        routing: &RoutingDecision,
        day: &str,
    ) -> Result<(String, bool, RouteScenario), hmlr_blocks::BlockError> {
        let active = self.blocks.get_active(None)?;
        let active_id = active.as_ref().map(|b| b.block_id.clone());
        let scenario = resolve_scenario(routing, active_id.as_deref());

        let label = if routing.suggested_label.is_empty() {
            FALLBACK_TOPIC.to_string()
        } else {
            routing.suggested_label.clone()
        };

        match scenario {
            RouteScenario::Continuation => {
                // resolve_scenario only yields Continuation when the
                // matched id equals the active one; keep the fallback
                // path anyway.
                match routing.matched_block_id.clone().or(active_id) {
                    Some(block_id) => Ok((block_id, false, scenario)),
                    None => {
                        let block = self.blocks.create(day, &label, None)?;
                        Ok((block.block_id, true, RouteScenario::NewConversation))
                    }
                }
            }
            RouteScenario::Resumption => {
                let Some(matched) = routing.matched_block_id.clone() else {
                    let block = self.blocks.create(day, &label, None)?;
                    return Ok((block.block_id, true, RouteScenario::NewConversation));
                };
                let lock = self.day_lock(day).await;
                let _guard = lock.lock().await;

                if let Some(active_id) = active_id {
                    self.blocks.pause_with_summary(&active_id)?;
                }
                match self.blocks.update_status(&matched, BlockStatus::Active) {
                    Ok(()) => Ok((matched, false, scenario)),
                    Err(hmlr_blocks::BlockError::NotFound { .. }) => {
                        // The model matched a block that no longer resolves;
                        // degrade to a fresh one (scenario 3 fallback).
                        warn!(matched = %matched, "matched block missing, creating fresh");
                        let block = self.blocks.create(day, &label, None)?;
                        Ok((block.block_id, true, RouteScenario::NewConversation))
                    }
                    Err(e) => Err(e),
                }
            }
            RouteScenario::NewConversation => {
                let block = self.blocks.create(day, &label, None)?;
                Ok((block.block_id, true, scenario))
            }
            RouteScenario::TopicShift => {
                let lock = self.day_lock(day).await;
                let _guard = lock.lock().await;

                if let Some(ref active_id) = active_id {
                    self.blocks.pause_with_summary(active_id)?;
                }
                let block = self.blocks.create(day, &label, active_id.as_deref())?;
                Ok((block.block_id, true, scenario))
            }
        }
    }

    /// Load everything the hydrator needs and assemble the budgeted
    /// context. Turn loading is part of the critical hydration path; the
    /// profile and block facts degrade to empty.
    #[allow(clippy::type_complexity)]
    async fn build_turn_context(
        &self,
        message: &str,
        query_vec: &[f32],
        block_id: &str,
        day: &str,
        governed: &crate::governor::GovernorResult,
        user: &str,
    ) -> Result<(String, usize, usize, usize), TurnError> {
        let block_turns = self
            .blocks
            .get_turns(block_id)
            .map_err(|e| TurnError::new("hydrator", ErrorKind::Storage, e.to_string()))?;

        // Compression decides how much of the window stays verbatim.
        let window_turns = self.blocks.day_turns(day, false).unwrap_or_default();
        let recent_queries: Vec<String> =
            window_turns.iter().map(|t| t.user_message.clone()).collect();
        let last_turn_at = window_turns.last().and_then(|t| {
            chrono::DateTime::parse_from_rfc3339(&t.timestamp)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        });
        let decision = decide_compression(
            &CompressionInput {
                query: message,
                recent_queries: &recent_queries,
                query_embedding: Some(query_vec),
                recent_embeddings: &[],
                last_turn_at,
            },
            Utc::now(),
            &self.cfg.window,
        );
        debug!(
            level = ?decision.level,
            keep = decision.keep_verbatim_count,
            reason = %decision.reason,
            "compression decided"
        );

        // Explicit references promote matching earlier turns back into
        // verbatim context.
        let mut turns: Vec<Turn> = Vec::new();
        if decision.has_explicit_reference {
            match rehydrate(
                &self.blocks,
                &self.memories,
                &extract_terms(message),
                Some(block_id),
                self.cfg.window.max_rehydration_turns,
            ) {
                Ok(mut promoted) => {
                    promoted.reverse();
                    turns.extend(promoted);
                }
                Err(e) => warn!(err = %e, "rehydration failed"),
            }
        }
        let keep = decision.keep_verbatim_count.max(1).min(block_turns.len());
        turns.extend(block_turns[block_turns.len() - keep..].iter().cloned());

        // Block facts join the governor's exact hits, current rows only.
        let mut facts = governed.facts.clone();
        match self.facts.get_by_block(block_id) {
            Ok(block_facts) => {
                for fact in block_facts {
                    if fact.superseded_by.is_none()
                        && fact.value != hmlr_facts::DELETED_VALUE
                        && !facts.iter().any(|f| f.fact_id == fact.fact_id)
                    {
                        facts.push(fact);
                    }
                }
            }
            Err(e) => warn!(err = %e, "block fact load failed"),
        }

        let profile = self
            .profile
            .profile_context(user, self.cfg.budget.profile_max_tokens)
            .await;

        let mut budget = allocate_token_budget(
            self.cfg.budget.max_context_tokens,
            self.cfg.budget.system_tokens,
            self.cfg.budget.task_tokens,
        );
        budget.reallocate_unused(estimate_tokens(SYSTEM_PROMPT), self.cfg.budget.task_tokens);

        let hydrated = build_context(
            &HydrationInput {
                turns: &turns,
                memories: &governed.memories,
                facts: &facts,
                profile: profile.as_deref(),
            },
            &budget,
        );
        Ok((
            hydrated.text,
            hydrated.memories_included,
            hydrated.facts_included,
            hydrated.turns_included,
        ))
    }

    /// Emit the per-turn provenance edges. Best-effort: lineage is
    /// checked eventually by `validate_integrity`, not per turn.
    fn record_turn_lineage(
        &self,
        turn_id: &str,
        block_id: &str,
        memory_id: &str,
        chunks: &[hmlr_chunker::ChunkDraft],
    ) {
        let record = |id: &str, ty: ItemType, parents: Vec<String>, by: &str| {
            if let Err(e) = self.lineage.record(id, ty, &parents, by) {
                warn!(err = %e, item = id, "lineage record failed");
            }
        };

        record(
            turn_id,
            ItemType::Turn,
            vec![block_id.to_string()],
            "chat.sendMessage",
        );
        record(
            memory_id,
            ItemType::Memory,
            vec![turn_id.to_string()],
            "chat.sendMessage",
        );
        for chunk in chunks {
            let mut parents = vec![turn_id.to_string(), block_id.to_string()];
            if let Some(ref parent) = chunk.parent_chunk_id {
                parents.push(parent.clone());
            }
            record(&chunk.chunk_id, ItemType::Chunk, parents, "chunk_engine_v1");
        }
    }

    /// Persist scrubbed facts and their lineage. Non-fatal; returns the
    /// stored count.
    fn persist_extracted_facts(
        &self,
        extracted: &[crate::scrubber::ExtractedFact],
        block_id: &str,
        turn_id: &str,
    ) -> usize {
        if extracted.is_empty() {
            return 0;
        }
        let batch: Vec<NewFact> = extracted
            .iter()
            .map(|f| NewFact {
                key: f.key.clone(),
                value: f.value.clone(),
                category: f.category,
                block_id: block_id.to_string(),
                turn_id: Some(turn_id.to_string()),
                evidence_snippet: f.evidence.clone(),
                source_chunk_id: None,
                source_paragraph_id: None,
                confidence: 0.8,
            })
            .collect();

        match self.facts.store_batch(batch) {
            Ok(stored) => {
                for fact in &stored {
                    if let Err(e) = self.lineage.record(
                        &fact.fact_id,
                        ItemType::Fact,
                        &[turn_id.to_string(), block_id.to_string()],
                        "fact_scrubber_v1",
                    ) {
                        warn!(err = %e, "fact lineage record failed");
                    }
                }
                stored.len()
            }
            Err(e) => {
                warn!(err = %e, "fact batch store failed");
                0
            }
        }
    }
}

fn llm_error_kind(e: &LlmError) -> ErrorKind {
    match e {
        LlmError::Http(_)
        | LlmError::Timeout { .. }
        | LlmError::Unavailable(_)
        | LlmError::RateLimited { .. } => ErrorKind::TransientExternal,
        LlmError::Api { status, .. } if *status >= 500 => ErrorKind::TransientExternal,
        LlmError::Api { .. } => ErrorKind::PermanentExternal,
        LlmError::Parse(_) => ErrorKind::Parse,
    }
}
