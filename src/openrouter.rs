//! OpenRouter-compatible chat-completions client

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::llm_client::LlmClient;
use crate::types::TokenUsage;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Chat-completions client for OpenRouter or any compatible endpoint
pub struct OpenRouterClient {
    client: Client,
    config: LlmConfig,
}

impl OpenRouterClient {
    /// Client configured from `OPENROUTER_*` variables, see [`LlmConfig::from_env`]
    pub fn from_env() -> Result<Self> {
        let config = LlmConfig::from_env()?;
        Self::new(config)
    }

    /// The request timeout comes from `config.timeout`
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    /// Send a completion request, retrying on rate limits and server errors
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let url = self.completions_url();
        let mut attempt = 0;

        loop {
            let response = self
                .client
                .post(&url)
                .bearer_auth(self.config.api_key())
                .header("X-Title", &self.config.app_name)
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                let completion: CompletionResponse = response.json().await?;
                return Ok(completion);
            }

            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unreadable body>"));

            if is_retryable(status) && attempt < self.config.max_retries {
                attempt += 1;
                let delay = self.config.retry_backoff * attempt;
                tracing::warn!(
                    status = %status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "completion request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(Error::RateLimitExceeded(error_text));
            }
            return Err(Error::llm(format!(
                "Request failed with status {}: {}",
                status, error_text
            )));
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.as_str().trim_end_matches('/')
        )
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Body of a `POST /chat/completions` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// `{"type": "json_object"}` when structured output is wanted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            response_format: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Cap the length of the reply
    pub fn with_max_tokens(mut self, limit: u32) -> Self {
        self.max_tokens = Some(limit);
        self
    }

    /// Ask the model to reply with a single JSON object
    pub fn with_json_output(mut self) -> Self {
        self.response_format = Some(ResponseFormat::json_object());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
}

impl ResponseFormat {
    fn json_object() -> Self {
        Self {
            format_type: "json_object".into(),
        }
    }
}

/// One chat turn. `content` may be null in replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
        }
    }

    /// Instructions that frame the whole exchange
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Reply to a [`CompletionRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    /// Absent on some backends
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Text of the first choice, if the model produced any
    pub fn text(&self) -> Option<&str> {
        let first = self.choices.first()?;
        first.message.content.as_deref()
    }

    /// Reported usage, or zero when the backend sent none
    pub fn token_usage(&self) -> TokenUsage {
        self.usage
            .as_ref()
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// `stop`, `length`, ... as reported by the backend
    pub finish_reason: Option<String>,
}

/// Usage block of a reply, in the backend's snake_case form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        OpenRouterClient::complete(self, request).await
    }

    fn client_type(&self) -> &str {
        "openrouter"
    }

    fn endpoint(&self) -> &str {
        self.config.base_url.as_str()
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }
}
