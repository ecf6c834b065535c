//! Error type shared by every stage of deck generation
//!
//! Inside a worker most of these end up as a degraded slide rather than a
//! failed run. Only context building and configuration errors are fatal.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The chat-completions backend answered with a non-success status
    #[error("model backend error: {0}")]
    Llm(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom plan files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// A plan item needs a tool the registry does not hold
    #[error("no tool registered as {0}")]
    ToolNotFound(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Slide content did not fit its content type's shape
    #[error("{content_type} content rejected: {message}")]
    Validation {
        content_type: String,
        message: String,
    },

    /// The shared generation context could not be assembled
    #[error("context error: {0}")]
    Context(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Push attempted after the event channel closed
    #[error("event channel closed")]
    ChannelClosed,

    #[error("cancelled: {0}")]
    Cancelled(String),

    /// HTTP 429 that outlived every retry
    #[error("rate limited: {0}")]
    RateLimitExceeded(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn synthesis(msg: impl Into<String>) -> Self {
        Self::Synthesis(msg.into())
    }

    /// `content_type` is the snake_case name, as shown in events
    pub fn validation(content_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            content_type: content_type.into(),
            message: message.into(),
        }
    }

    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
