use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Structured metadata the chat model embeds in its response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnMetadata {
    #[serde(default)]
    pub topic_label: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub open_loops: Vec<String>,
    #[serde(default)]
    pub decisions_made: Vec<String>,
    #[serde(default)]
    pub affect: Option<String>,
    #[serde(default)]
    pub is_topic_shift: Option<bool>,
    #[serde(default)]
    pub new_topic_label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Fenced metadata block: ```json … ``` with a non-greedy body.
static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("fenced json regex"));

/// Split a model response into the user-facing text and the embedded
/// metadata.
///
/// The fenced ```json block is tried first; when it is absent or
/// unparseable (nested fences degrade it), the outermost `{…}` span of
/// the response is tried instead. Either way the matched span is removed
/// from the returned text.
pub fn extract_metadata(response: &str) -> (String, Option<TurnMetadata>) {
    if let Some(caps) = FENCED_JSON.captures(response) {
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Ok(meta) = serde_json::from_str::<TurnMetadata>(body.trim()) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let mut clean = String::with_capacity(response.len());
            clean.push_str(&response[..whole.start]);
            clean.push_str(&response[whole.end..]);
            return (clean.trim().to_string(), Some(meta));
        }
        debug!("fenced metadata block did not parse, trying brace scan");
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if end > start {
            if let Ok(meta) = serde_json::from_str::<TurnMetadata>(&response[start..=end]) {
                let mut clean = String::with_capacity(response.len());
                clean.push_str(&response[..start]);
                clean.push_str(&response[end + 1..]);
                return (clean.trim().to_string(), Some(meta));
            }
        }
    }

    (response.trim().to_string(), None)
}

/// Instructions appended to the user prompt so the model emits the
/// metadata block. New topics get the full shape; continuations get the
/// update-only variant.
pub fn metadata_instructions(is_new_topic: bool) -> String {
    if is_new_topic {
        concat!(
            "\n\nAfter your response, append a fenced ```json block with: ",
            r#"{"topic_label": "...", "keywords": ["..."], "summary": "...", "#,
            r#""open_loops": ["..."], "decisions_made": ["..."], "affect": "..."}"#,
        )
        .to_string()
    } else {
        concat!(
            "\n\nAfter your response, append a fenced ```json block updating only ",
            "what changed this turn: ",
            r#"{"keywords": ["..."], "summary": "...", "open_loops": ["..."], "#,
            r#""decisions_made": ["..."], "affect": "..."}"#,
        )
        .to_string()
    }
}
