use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::provider::{ChatLlm, ChatRequest, ChatResponse, LlmError};

/// Wraps any [`ChatLlm`] with bounded retries, linear backoff, and a
/// per-call timeout.
///
/// Rate-limit errors skip the remaining retries immediately; permanent
/// errors (auth, quota) are never retried. A timed-out attempt counts as a
/// retryable failure.
pub struct RetryingProvider {
    inner: Arc<dyn ChatLlm>,
    max_retries: u32,
    timeout: Duration,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ChatLlm>, max_retries: u32, timeout_ms: u64) -> Self {
        Self {
            inner,
            max_retries,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[async_trait]
impl ChatLlm for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut last_err: Option<LlmError> = None;

        for attempt in 0..=self.max_retries {
            let result = match tokio::time::timeout(self.timeout, self.inner.chat(req)).await {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(resp) => {
                    if attempt > 0 {
                        info!(
                            provider = %self.inner.name(),
                            attempt,
                            "chat request succeeded after retry"
                        );
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(
                        provider = %self.inner.name(),
                        attempt,
                        err = %e,
                        "chat request failed"
                    );

                    let retryable = e.is_retryable();
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }

                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1)))
                            .await;
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| LlmError::Unavailable("provider exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Message, Role};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailThenOk {
        failures: AtomicU32,
    }

    #[async_trait]
    impl ChatLlm for FailThenOk {
        fn name(&self) -> &str {
            "fail-then-ok"
        }
        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, LlmError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            }).is_ok()
            {
                return Err(LlmError::Unavailable("transient".to_string()));
            }
            Ok(ChatResponse {
                content: "ok".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".to_string(),
            })
        }
    }

    struct AlwaysAuthError;

    #[async_trait]
    impl ChatLlm for AlwaysAuthError {
        fn name(&self) -> &str {
            "auth-error"
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, LlmError> {
            Err(LlmError::Api {
                status: 401,
                message: "bad key".to_string(),
            })
        }
    }

    fn dummy_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            system: String::new(),
            messages: vec![Message {
                role: Role::User,
                content: "hello".to_string(),
            }],
            max_tokens: 16,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let provider = RetryingProvider::new(
            Arc::new(FailThenOk {
                failures: AtomicU32::new(2),
            }),
            2,
            5_000,
        );
        let resp = provider.chat(&dummy_request()).await;
        assert_eq!(resp.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn permanent_errors_short_circuit() {
        let provider = RetryingProvider::new(Arc::new(AlwaysAuthError), 3, 5_000);
        let err = provider.chat(&dummy_request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 401, .. }));
    }
}
