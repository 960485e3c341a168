use chrono::DateTime;
use serde::Serialize;

use hmlr_blocks::Turn;
use hmlr_core::types::estimate_tokens;
use hmlr_facts::Fact;
use hmlr_memory::ScoredMemory;

/// Shares of the variable budget `R = total − system − tasks`.
const BLOCK_SHARE: usize = 50;
const MEMORY_SHARE: usize = 30;
const FACT_SHARE: usize = 10;
const PROFILE_SHARE: usize = 10;

/// Priority-weighted token budget for one hydrated prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenBudget {
    pub total: usize,
    pub system: usize,
    pub tasks: usize,
    pub bridge_block: usize,
    pub memories: usize,
    pub facts: usize,
    pub profile: usize,
}

/// Split `total` into the fixed system/task reserves and the four
/// variable buckets at 50/30/10/10 of the remainder.
pub fn allocate_token_budget(total: usize, system: usize, tasks: usize) -> TokenBudget {
    let variable = total.saturating_sub(system + tasks);
    TokenBudget {
        total,
        system,
        tasks,
        bridge_block: variable * BLOCK_SHARE / 100,
        memories: variable * MEMORY_SHARE / 100,
        facts: variable * FACT_SHARE / 100,
        profile: variable * PROFILE_SHARE / 100,
    }
}

impl TokenBudget {
    /// Redistribute unused system/task reserve to the variable buckets,
    /// proportionally to their initial shares.
    pub fn reallocate_unused(&mut self, system_used: usize, tasks_used: usize) {
        let unused = self.system.saturating_sub(system_used)
            + self.tasks.saturating_sub(tasks_used);
        if unused == 0 {
            return;
        }
        self.system = self.system.min(system_used);
        self.tasks = self.tasks.min(tasks_used);
        self.bridge_block += unused * BLOCK_SHARE / 100;
        self.memories += unused * MEMORY_SHARE / 100;
        self.facts += unused * FACT_SHARE / 100;
        self.profile += unused * PROFILE_SHARE / 100;
    }
}

/// Everything available to hydrate one prompt.
#[derive(Debug, Clone, Default)]
pub struct HydrationInput<'a> {
    pub turns: &'a [Turn],
    pub memories: &'a [ScoredMemory],
    pub facts: &'a [Fact],
    pub profile: Option<&'a str>,
}

/// The assembled context plus what actually fit.
#[derive(Debug, Clone)]
pub struct HydratedContext {
    pub text: String,
    pub turns_included: usize,
    pub memories_included: usize,
    pub facts_included: usize,
    pub tokens_used: usize,
}

/// Assemble the budgeted context sections.
///
/// Turns pack newest-first under the budget, then render in chronological
/// order; memories pack by score; facts and the profile fill their own
/// buckets. Every section is skipped entirely when nothing fits.
pub fn build_context(input: &HydrationInput<'_>, budget: &TokenBudget) -> HydratedContext {
    let mut sections: Vec<String> = Vec::new();
    let mut tokens_used = 0usize;

    // Newest turns first while packing, chronological in the prompt.
    let mut by_newest: Vec<&Turn> = input.turns.iter().collect();
    by_newest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut picked: Vec<&Turn> = Vec::new();
    let mut turn_tokens = 0usize;
    for turn in by_newest {
        let formatted = format_turn(turn);
        let cost = estimate_tokens(&formatted);
        if turn_tokens + cost > budget.bridge_block {
            break;
        }
        turn_tokens += cost;
        picked.push(turn);
    }
    picked.reverse();
    if !picked.is_empty() {
        let body: Vec<String> = picked.iter().map(|t| format_turn(t)).collect();
        sections.push(format!("=== Recent Conversation ===\n{}", body.join("\n\n")));
        tokens_used += turn_tokens;
    }
    let turns_included = picked.len();

    let mut memory_lines: Vec<String> = Vec::new();
    let mut memory_tokens = 0usize;
    for (i, hit) in input.memories.iter().enumerate() {
        let line = format!(
            "[Memory {}] (relevance: {}%)\n{}",
            i + 1,
            (hit.score * 100.0).round() as i64,
            hit.memory.content
        );
        let cost = estimate_tokens(&line);
        if memory_tokens + cost > budget.memories {
            break;
        }
        memory_tokens += cost;
        memory_lines.push(line);
    }
    if !memory_lines.is_empty() {
        sections.push(format!("=== Relevant History ===\n{}", memory_lines.join("\n\n")));
        tokens_used += memory_tokens;
    }
    let memories_included = memory_lines.len();

    let mut fact_lines: Vec<String> = Vec::new();
    let mut fact_tokens = 0usize;
    for fact in input.facts {
        let line = match fact.category {
            Some(cat) => format!("{}[{}]: {}", fact.key, cat, fact.value),
            None => format!("{}: {}", fact.key, fact.value),
        };
        let cost = estimate_tokens(&line);
        if fact_tokens + cost > budget.facts {
            break;
        }
        fact_tokens += cost;
        fact_lines.push(line);
    }
    if !fact_lines.is_empty() {
        sections.push(format!("=== Known Facts ===\n{}", fact_lines.join("\n")));
        tokens_used += fact_tokens;
    }
    let facts_included = fact_lines.len();

    if let Some(profile) = input.profile.filter(|p| !p.is_empty()) {
        let truncated = truncate_to_tokens(profile, budget.profile);
        if !truncated.is_empty() {
            tokens_used += estimate_tokens(&truncated);
            sections.push(format!("=== User Profile ===\n{truncated}"));
        }
    }

    HydratedContext {
        text: sections.join("\n\n"),
        turns_included,
        memories_included,
        facts_included,
        tokens_used,
    }
}

/// `[ISO timestamp]\nUser: …\nAssistant: …`
fn format_turn(turn: &Turn) -> String {
    let ts = DateTime::parse_from_rfc3339(&turn.timestamp)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|_| turn.timestamp.clone());
    format!(
        "[{ts}]\nUser: {}\nAssistant: {}",
        turn.user_message, turn.ai_response
    )
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens * 4;
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut cut = max_chars;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: &str, ts: &str, msg: &str) -> Turn {
        Turn {
            turn_id: id.to_string(),
            block_id: "b1".to_string(),
            user_message: msg.to_string(),
            ai_response: "reply".to_string(),
            keywords: vec![],
            affect: "neutral".to_string(),
            timestamp: ts.to_string(),
            evicted: false,
        }
    }

    #[test]
    fn budget_splits_fifty_thirty_ten_ten() {
        let b = allocate_token_budget(4000, 500, 500);
        assert_eq!(b.system, 500);
        assert_eq!(b.tasks, 500);
        assert_eq!(b.bridge_block, 1500);
        assert_eq!(b.memories, 900);
        assert_eq!(b.facts, 300);
        assert_eq!(b.profile, 300);
        assert_eq!(
            b.system + b.tasks + b.bridge_block + b.memories + b.facts + b.profile,
            4000
        );
    }

    #[test]
    fn unused_reserve_redistributes_proportionally() {
        let mut b = allocate_token_budget(4000, 500, 500);
        b.reallocate_unused(300, 500);
        assert_eq!(b.system, 300);
        assert_eq!(b.bridge_block, 1500 + 100);
        assert_eq!(b.memories, 900 + 60);
        assert_eq!(b.facts, 300 + 20);
        assert_eq!(b.profile, 300 + 20);
    }

    #[test]
    fn turns_render_chronologically_under_headings() {
        let turns = vec![
            turn("t1", "2026-08-01T10:00:00+00:00", "first question"),
            turn("t2", "2026-08-01T11:00:00+00:00", "second question"),
        ];
        let budget = allocate_token_budget(4000, 500, 500);
        let ctx = build_context(
            &HydrationInput {
                turns: &turns,
                ..Default::default()
            },
            &budget,
        );
        assert_eq!(ctx.turns_included, 2);
        assert!(ctx.text.starts_with("=== Recent Conversation ==="));
        let first = ctx.text.find("first question").unwrap();
        let second = ctx.text.find("second question").unwrap();
        assert!(first < second);
    }

    #[test]
    fn newest_turns_win_when_the_budget_is_tight() {
        let turns = vec![
            turn("t1", "2026-08-01T10:00:00+00:00", &"old ".repeat(40)),
            turn("t2", "2026-08-01T11:00:00+00:00", "newest question"),
        ];
        let mut budget = allocate_token_budget(4000, 500, 500);
        budget.bridge_block = 30;
        let ctx = build_context(
            &HydrationInput {
                turns: &turns,
                ..Default::default()
            },
            &budget,
        );
        assert_eq!(ctx.turns_included, 1);
        assert!(ctx.text.contains("newest question"));
        assert!(!ctx.text.contains("old old"));
    }

    #[test]
    fn facts_render_with_category_tags() {
        let facts = vec![Fact {
            fact_id: "f1".to_string(),
            key: "project_alpha_deadline".to_string(),
            value: "Monday".to_string(),
            category: Some(hmlr_facts::FactCategory::Date),
            block_id: "b1".to_string(),
            turn_id: None,
            evidence_snippet: None,
            source_chunk_id: None,
            source_paragraph_id: None,
            confidence: 0.9,
            superseded_by: None,
            created_at: String::new(),
        }];
        let budget = allocate_token_budget(4000, 500, 500);
        let ctx = build_context(
            &HydrationInput {
                facts: &facts,
                ..Default::default()
            },
            &budget,
        );
        assert!(ctx
            .text
            .contains("=== Known Facts ===\nproject_alpha_deadline[date]: Monday"));
    }

    #[test]
    fn profile_is_truncated_to_its_bucket() {
        let profile = "p".repeat(5000);
        let budget = allocate_token_budget(4000, 500, 500);
        let ctx = build_context(
            &HydrationInput {
                profile: Some(&profile),
                ..Default::default()
            },
            &budget,
        );
        assert!(ctx.text.starts_with("=== User Profile ==="));
        // 300 tokens ≈ 1200 chars.
        assert!(ctx.text.len() <= 1300);
    }

    #[test]
    fn empty_input_yields_empty_context() {
        let budget = allocate_token_budget(4000, 500, 500);
        let ctx = build_context(&HydrationInput::default(), &budget);
        assert!(ctx.text.is_empty());
        assert_eq!(ctx.tokens_used, 0);
    }
}
