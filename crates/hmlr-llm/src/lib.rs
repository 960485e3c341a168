//! External model collaborators: the chat LLM (two tiers) and the text
//! embedder. Both are traits so the engine and its tests can swap in
//! scripted fakes; the HTTP implementations own the connection pools,
//! timeouts, and retry policy.

pub mod anthropic;
pub mod embedder;
pub mod provider;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use embedder::{cosine_similarity, mean_vector, normalize, EmbedError, Embedder, HttpEmbedder};
pub use provider::{ChatLlm, ChatRequest, ChatResponse, LlmError, Message, Role};
pub use retry::RetryingProvider;
