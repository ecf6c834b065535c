//! Configuration for the deck pipeline
//!
//! Values come from environment variables (`FLYERDECK_*`, with `.env` support)
//! or from a TOML/YAML file layered with `FLYERDECK__` overrides.

use crate::error::{Error, Result};
use crate::telemetry::LogFormat;
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default chat-completions endpoint
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Recommended model identifiers
pub mod presets {
    /// Balanced performance and cost
    pub const BALANCED: &str = "anthropic/claude-sonnet-4";

    /// Fast responses, lower cost
    pub const FAST: &str = "anthropic/claude-haiku-4";
}

/// Chat-completions client configuration
#[derive(Clone)]
pub struct LlmConfig {
    /// API key
    pub api_key: SecretString,
    /// Base URL of the chat-completions API
    pub base_url: Url,
    /// Model used for synthesis and extraction
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum completion tokens per call
    pub max_tokens: Option<u32>,
    /// Request timeout
    pub timeout: Duration,
    /// Retries on 429 / 5xx
    pub max_retries: u32,
    /// Linear backoff step between retries
    pub retry_backoff: Duration,
    /// App name sent as `X-Title`
    pub app_name: String,
}

impl LlmConfig {
    /// Create a configuration with a specific API key and defaults
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url: Url::parse(DEFAULT_BASE_URL).expect("valid default URL"),
            model: presets::BALANCED.to_string(),
            temperature: 0.4,
            max_tokens: Some(2048),
            timeout: Duration::from_secs(90),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            app_name: "flyerdeck".to_string(),
        }
    }

    /// Create a configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env if present so local development picks up OPENROUTER_API_KEY
        let _ = dotenv();

        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| Error::config("OPENROUTER_API_KEY environment variable not set"))?;
        let mut config = Self::new(api_key);

        if let Ok(base_url) = std::env::var("FLYERDECK_LLM_BASE_URL") {
            config.base_url = Url::parse(&base_url)
                .map_err(|e| Error::config(format!("invalid FLYERDECK_LLM_BASE_URL: {}", e)))?;
        }
        if let Ok(model) = std::env::var("FLYERDECK_LLM_MODEL") {
            config.model = model;
        }
        if let Some(secs) = env_parse::<u64>("FLYERDECK_LLM_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("FLYERDECK_LLM_MAX_RETRIES")? {
            config.max_retries = retries;
        }

        Ok(config)
    }

    /// Set the base URL
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the retry backoff step
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Get the API key as a string
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"***REDACTED***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("app_name", &self.app_name)
            .finish()
    }
}

/// Limits on external calls made by workers; unset means unbounded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum tool/synthesizer calls in flight across all workers
    #[serde(default)]
    pub max_concurrent_calls: Option<usize>,
    /// Maximum tool/synthesizer calls started per second
    #[serde(default)]
    pub calls_per_second: Option<u32>,
}

/// Assumptions used by the loan simulation slide
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanAssumptions {
    /// Nominal annual interest rate in percent
    pub annual_rate_pct: f64,
    /// Repayment period in years
    pub years: u32,
    /// Down payment as a percentage of the price
    pub down_payment_pct: f64,
}

impl Default for LoanAssumptions {
    fn default() -> Self {
        Self {
            annual_rate_pct: 1.5,
            years: 35,
            down_payment_pct: 10.0,
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone)]
pub struct DeckConfig {
    /// Chat-completions settings; `None` runs without a model backend
    pub llm: Option<LlmConfig>,
    /// External-call limits
    pub limits: LimitsConfig,
    /// Loan simulation assumptions
    pub loan: LoanAssumptions,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            llm: None,
            limits: LimitsConfig::default(),
            loan: LoanAssumptions::default(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// File representation; secrets never come from files
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    llm: Option<FileLlmConfig>,
    #[serde(default)]
    limits: LimitsConfig,
    #[serde(default)]
    loan: Option<LoanAssumptions>,
    #[serde(default)]
    log_format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLlmConfig {
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

impl DeckConfig {
    /// Build a configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let llm = match std::env::var("OPENROUTER_API_KEY") {
            Ok(_) => Some(LlmConfig::from_env()?),
            Err(_) => None,
        };

        let limits = LimitsConfig {
            max_concurrent_calls: env_parse("FLYERDECK_MAX_CONCURRENT_CALLS")?,
            calls_per_second: env_parse("FLYERDECK_CALLS_PER_SECOND")?,
        };

        let log_format = match std::env::var("FLYERDECK_LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            llm,
            limits,
            loan: LoanAssumptions::default(),
            log_format,
        })
    }

    /// Load a TOML or YAML file, layered with `FLYERDECK__` environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenv();

        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("FLYERDECK")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;

        let file: FileConfig = settings
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to parse {}: {}", path.display(), e)))?;

        let llm = match (file.llm, std::env::var("OPENROUTER_API_KEY").ok()) {
            (Some(section), Some(key)) => Some(section.apply(LlmConfig::new(key))?),
            (Some(_), None) => {
                return Err(Error::config(
                    "llm section present but OPENROUTER_API_KEY is not set",
                ))
            }
            (None, _) => None,
        };

        Ok(Self {
            llm,
            limits: file.limits,
            loan: file.loan.unwrap_or_default(),
            log_format: file.log_format.unwrap_or(LogFormat::Pretty),
        })
    }

    /// Set the LLM configuration
    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set call limits
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Set loan assumptions
    pub fn with_loan(mut self, loan: LoanAssumptions) -> Self {
        self.loan = loan;
        self
    }
}

impl FileLlmConfig {
    fn apply(self, mut config: LlmConfig) -> Result<LlmConfig> {
        if let Some(base_url) = self.base_url {
            config.base_url = Url::parse(&base_url)
                .map_err(|e| Error::config(format!("invalid llm.base_url: {}", e)))?;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if self.max_tokens.is_some() {
            config.max_tokens = self.max_tokens;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
