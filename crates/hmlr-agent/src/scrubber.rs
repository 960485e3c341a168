use std::sync::Arc;

use tracing::{debug, warn};

use hmlr_facts::FactCategory;
use hmlr_llm::{ChatLlm, ChatRequest};

/// A fact pulled out of a message by the nano model.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub key: String,
    pub value: String,
    pub category: Option<FactCategory>,
    pub evidence: Option<String>,
}

const MAX_FACTS_PER_MESSAGE: usize = 10;

/// Ask the nano model for durable facts stated in `text`.
///
/// Non-fatal by contract: every failure path (LLM error, malformed JSON,
/// junk items) degrades to fewer or zero facts, never an error.
pub async fn extract_facts(llm: Arc<dyn ChatLlm>, model: &str, text: &str) -> Vec<ExtractedFact> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let system = concat!(
        "You extract durable facts from one user message. ",
        "A fact is a keyed assertion worth remembering across conversations: ",
        "deadlines, names, credentials, decisions, preferences, policies. ",
        "Return ONLY a JSON array. Each element must be: ",
        r#"{"key":"snake_case_label","value":"the fact","category":"credential|preference|policy|decision|contact|date|general","evidence":"short quote"}"#,
        " Maximum 10 items. Skip chit-chat. If nothing qualifies, return []."
    );

    let req = ChatRequest::single(
        model,
        system,
        &format!("Extract facts from this message:\n\n{text}"),
        512,
    );

    let response = match llm.chat(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(err = %e, "fact extraction call failed");
            return Vec::new();
        }
    };

    parse_fact_array(&response.content)
}

/// Pull the JSON array out of the model output (which may wrap it in a
/// code fence or prose) and validate each element.
fn parse_fact_array(raw: &str) -> Vec<ExtractedFact> {
    let raw = raw.trim();
    let json_str = match (raw.find('['), raw.rfind(']')) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    };

    let items: Vec<serde_json::Value> = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            warn!(err = %e, "fact extraction JSON parse failed");
            return Vec::new();
        }
    };

    let facts: Vec<ExtractedFact> = items
        .iter()
        .filter_map(|item| {
            let key = item.get("key")?.as_str()?.trim();
            let value = item.get("value")?.as_str()?.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some(ExtractedFact {
                key: key.to_string(),
                value: value.to_string(),
                category: item
                    .get("category")
                    .and_then(|c| c.as_str())
                    .and_then(|c| c.parse().ok()),
                evidence: item
                    .get("evidence")
                    .and_then(|e| e.as_str())
                    .map(str::to_string),
            })
        })
        .take(MAX_FACTS_PER_MESSAGE)
        .collect();

    debug!(count = facts.len(), "facts extracted");
    facts
}
