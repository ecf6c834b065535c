//! Unified LLM client trait for chat-completions backends

use crate::error::Result;
use crate::openrouter::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;

/// Unified trait for LLM clients
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the client type for debugging/logging
    fn client_type(&self) -> &str;

    /// Get the endpoint the client talks to
    fn endpoint(&self) -> &str;

    /// Default model used when the caller does not pick one
    fn default_model(&self) -> &str;
}

/// Parse a JSON object out of a model reply, tolerating Markdown code fences
pub fn parse_json_reply(text: &str) -> Result<serde_json::Value> {
    static FENCE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid fence pattern")
    });

    let body = fence
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| text.trim());

    let value: serde_json::Value = serde_json::from_str(body)?;
    if !value.is_object() {
        return Err(crate::error::Error::llm("model reply is not a JSON object"));
    }
    Ok(value)
}
