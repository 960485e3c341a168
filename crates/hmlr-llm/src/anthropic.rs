use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{ChatLlm, ChatRequest, ChatResponse, LlmError};

const API_VERSION: &str = "2023-06-01";

/// HTTP chat provider against an Anthropic-compatible `/v1/messages` API.
/// One instance owns the connection pool; both model tiers go through it.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl ChatLlm for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending chat request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "messages": messages,
    });
    if !req.system.is_empty() {
        body["system"] = serde_json::json!(req.system);
    }
    body
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    model: String,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_response(api: ApiResponse) -> ChatResponse {
    // Concatenate text blocks; other block kinds (thinking etc.) are ignored.
    let content: String = api
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text.as_str())
        .collect();

    ChatResponse {
        content,
        model: api.model,
        tokens_in: api.usage.input_tokens,
        tokens_out: api.usage.output_tokens,
        stop_reason: api.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Message, Role};

    #[test]
    fn request_body_includes_system_only_when_set() {
        let mut req = ChatRequest {
            model: "m".into(),
            system: String::new(),
            messages: vec![Message {
                role: Role::User,
                content: "hi".into(),
            }],
            max_tokens: 16,
            temperature: 0.0,
        };
        let body = build_request_body(&req);
        assert!(body.get("system").is_none());

        req.system = "be terse".into();
        let body = build_request_body(&req);
        assert_eq!(body["system"], "be terse");
    }

    #[test]
    fn parse_concatenates_text_blocks() {
        let api = ApiResponse {
            content: vec![
                ContentBlock {
                    kind: "text".into(),
                    text: "hello ".into(),
                },
                ContentBlock {
                    kind: "text".into(),
                    text: "world".into(),
                },
            ],
            model: "m".into(),
            stop_reason: None,
            usage: Usage::default(),
        };
        let resp = parse_response(api);
        assert_eq!(resp.content, "hello world");
        assert_eq!(resp.stop_reason, "end_turn");
    }
}
