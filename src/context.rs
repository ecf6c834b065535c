//! Caller input and the shared generation context
//!
//! The context is built once per run, before any worker starts, and is then
//! shared read-only by every worker. A failure while building it is the only
//! run-fatal error in the pipeline.

use crate::config::{LlmConfig, LoanAssumptions};
use crate::error::{Error, Result};
use crate::llm_client::{parse_json_reply, LlmClient};
use crate::openrouter::{CompletionRequest, Message};
use crate::types::{RunId, TokenUsage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Scanned flyer supplied by the caller
#[derive(Clone, Serialize, Deserialize)]
pub struct FlyerImage {
    /// Original file name
    pub file_name: String,
    /// MIME type, must be `image/*`
    pub mime_type: String,
    /// Raw image bytes
    #[serde(default)]
    pub bytes: Vec<u8>,
    /// Text recognized on the flyer, if an OCR pass ran upstream
    #[serde(default)]
    pub ocr_text: Option<String>,
}

impl FlyerImage {
    /// Create a flyer image
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
            ocr_text: None,
        }
    }

    /// Attach OCR text
    pub fn with_ocr_text(mut self, text: impl Into<String>) -> Self {
        self.ocr_text = Some(text.into());
        self
    }
}

impl std::fmt::Debug for FlyerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlyerImage")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &format_args!("{} bytes", self.bytes.len()))
            .field("ocr_text", &self.ocr_text.as_ref().map(|t| t.len()))
            .finish()
    }
}

/// Structured listing facts supplied with the flyer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingFacts {
    pub property_name: String,
    pub address: String,
    /// Asking price in whole currency units
    pub price: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub floor_area_sqm: Option<f64>,
    #[serde(default)]
    pub built_year: Option<u16>,
    #[serde(default)]
    pub nearest_station: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agent_phone: Option<String>,
}

fn default_currency() -> String {
    "JPY".to_string()
}

impl ListingFacts {
    /// Create facts with the required fields
    pub fn new(property_name: impl Into<String>, address: impl Into<String>, price: u64) -> Self {
        Self {
            property_name: property_name.into(),
            address: address.into(),
            price,
            currency: default_currency(),
            layout: None,
            floor_area_sqm: None,
            built_year: None,
            nearest_station: None,
            agent_name: None,
            agent_phone: None,
        }
    }

    /// Price with currency and thousands separators
    pub fn price_label(&self) -> String {
        format!("{} {}", self.currency, format_amount(self.price))
    }
}

/// Everything the caller hands to a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckInput {
    pub flyer: FlyerImage,
    pub facts: ListingFacts,
}

impl DeckInput {
    /// Create an input
    pub fn new(flyer: FlyerImage, facts: ListingFacts) -> Self {
        Self { flyer, facts }
    }

    /// Reject inputs no slide could be generated from
    pub fn validate(&self) -> Result<()> {
        if self.flyer.bytes.is_empty() {
            return Err(Error::invalid_input("flyer image is empty"));
        }
        if !self.flyer.mime_type.starts_with("image/") {
            return Err(Error::invalid_input(format!(
                "flyer must be an image, got {}",
                self.flyer.mime_type
            )));
        }
        if self.facts.property_name.trim().is_empty() {
            return Err(Error::invalid_input("property name is required"));
        }
        if self.facts.address.trim().is_empty() {
            return Err(Error::invalid_input("address is required"));
        }
        if self.facts.price == 0 {
            return Err(Error::invalid_input("price must be greater than zero"));
        }
        if let Some(area) = self.facts.floor_area_sqm {
            if !area.is_finite() || area <= 0.0 {
                return Err(Error::invalid_input("floor area must be a positive number"));
            }
        }
        Ok(())
    }
}

/// Read-only facts shared by every worker in a run
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub flyer: FlyerImage,
    pub facts: ListingFacts,
    /// Selling points pulled from the flyer
    pub highlights: Vec<String>,
    pub loan: LoanAssumptions,
}

/// Result of fact extraction
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Facts after merging anything the extractor recovered
    pub facts: ListingFacts,
    pub highlights: Vec<String>,
    /// Model usage, if a model was called
    pub usage: Option<TokenUsage>,
}

/// Turns the caller's flyer and facts into the facts workers build on
#[async_trait]
pub trait FactExtractor: Send + Sync {
    /// Name used in logs and usage step names
    fn name(&self) -> &str;

    /// Extract facts from the input
    async fn extract(&self, input: &DeckInput) -> Result<Extraction>;
}

/// Uses the supplied facts as-is
pub struct ProvidedFacts;

#[async_trait]
impl FactExtractor for ProvidedFacts {
    fn name(&self) -> &str {
        "provided_facts"
    }

    async fn extract(&self, input: &DeckInput) -> Result<Extraction> {
        Ok(Extraction {
            facts: input.facts.clone(),
            highlights: Vec::new(),
            usage: None,
        })
    }
}

const EXTRACTION_PROMPT: &str = "You read real-estate flyers. Reply with a single JSON object \
{\"highlights\": [string], \"nearest_station\": string|null, \"layout\": string|null}. \
Highlights are at most five short selling points stated on the flyer. Never invent facts.";

/// Asks a chat model for selling points and missing facts
pub struct LlmFactExtractor {
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: Option<u32>,
}

impl LlmFactExtractor {
    /// Create an extractor using the client's default model
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            client,
            model,
            max_tokens: None,
        }
    }

    /// Model and reply cap taken from `config`. Extraction always samples at
    /// temperature 0.
    pub fn from_config(client: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    /// Cap the length of the reply
    pub fn with_max_tokens(mut self, limit: u32) -> Self {
        self.max_tokens = Some(limit);
        self
    }

    /// Override the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl FactExtractor for LlmFactExtractor {
    fn name(&self) -> &str {
        "extract_facts"
    }

    async fn extract(&self, input: &DeckInput) -> Result<Extraction> {
        let facts_json = serde_json::to_string_pretty(&input.facts)?;
        let ocr = input.flyer.ocr_text.as_deref().unwrap_or("(no OCR text)");
        let mut request = CompletionRequest::new(
            self.model.clone(),
            vec![
                Message::system(EXTRACTION_PROMPT),
                Message::user(format!("Listing facts:\n{}\n\nFlyer text:\n{}", facts_json, ocr)),
            ],
        )
        .with_temperature(0.0)
        .with_json_output();
        if let Some(limit) = self.max_tokens {
            request = request.with_max_tokens(limit);
        }

        let response = self
            .client
            .complete(request)
            .await
            .map_err(|e| Error::context(format!("fact extraction failed: {}", e)))?;
        let text = response
            .text()
            .ok_or_else(|| Error::context("fact extraction returned no content"))?;
        let reply = parse_json_reply(text)
            .map_err(|e| Error::context(format!("fact extraction reply unusable: {}", e)))?;

        let highlights = reply
            .get("highlights")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .take(5)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut facts = input.facts.clone();
        if facts.nearest_station.is_none() {
            facts.nearest_station = non_empty_str(&reply, "nearest_station");
        }
        if facts.layout.is_none() {
            facts.layout = non_empty_str(&reply, "layout");
        }

        Ok(Extraction {
            facts,
            highlights,
            usage: Some(response.token_usage()),
        })
    }
}

fn non_empty_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Validate the input and build the shared context
pub async fn build_context(
    run_id: RunId,
    input: DeckInput,
    extractor: &dyn FactExtractor,
    loan: LoanAssumptions,
) -> Result<(GenerationContext, Option<TokenUsage>)> {
    input.validate()?;

    let extraction = extractor.extract(&input).await?;
    tracing::debug!(
        %run_id,
        extractor = extractor.name(),
        highlights = extraction.highlights.len(),
        "context built"
    );

    let context = GenerationContext {
        run_id,
        created_at: Utc::now(),
        flyer: input.flyer,
        facts: extraction.facts,
        highlights: extraction.highlights,
        loan,
    };
    Ok((context, extraction.usage))
}

/// Format an integer amount with comma thousands separators
pub fn format_amount(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::test_support::{sample_input, ScriptedLlm};

    #[test]
    fn test_validate_accepts_sample() {
        assert!(sample_input().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_inputs() {
        let mut empty = sample_input();
        empty.flyer.bytes.clear();
        assert!(matches!(empty.validate(), Err(Error::InvalidInput(_))));

        let mut pdf = sample_input();
        pdf.flyer.mime_type = "application/pdf".into();
        assert!(pdf.validate().is_err());

        let mut free = sample_input();
        free.facts.price = 0;
        assert!(free.validate().is_err());

        let mut blank = sample_input();
        blank.facts.address = "   ".into();
        assert!(blank.validate().is_err());

        let mut area = sample_input();
        area.facts.floor_area_sqm = Some(f64::NAN);
        assert!(area.validate().is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0");
        assert_eq!(format_amount(999), "999");
        assert_eq!(format_amount(1000), "1,000");
        assert_eq!(format_amount(45_800_000), "45,800,000");
    }

    #[test]
    fn test_flyer_debug_hides_bytes() {
        let flyer = FlyerImage::new("f.png", "image/png", vec![1, 2, 3]);
        assert!(format!("{:?}", flyer).contains("3 bytes"));
    }

    #[tokio::test]
    async fn test_provided_facts_pass_through() {
        let input = sample_input();
        let (context, usage) =
            build_context(RunId::new(), input.clone(), &ProvidedFacts, LoanAssumptions::default())
                .await
                .unwrap();
        assert_eq!(context.facts, input.facts);
        assert!(context.highlights.is_empty());
        assert!(usage.is_none());
    }

    #[tokio::test]
    async fn test_build_context_rejects_invalid_input_before_extraction() {
        let mut input = sample_input();
        input.facts.property_name.clear();
        let llm = Arc::new(ScriptedLlm::replying(r#"{"highlights": []}"#));
        let extractor = LlmFactExtractor::new(llm.clone());

        let err = build_context(RunId::new(), input, &extractor, LoanAssumptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_llm_extractor_merges_missing_facts() {
        let llm = Arc::new(ScriptedLlm::replying(
            r#"{"highlights": ["South-facing balcony", " ", "Pets allowed"], "nearest_station": "Ebisu", "layout": "9LDK"}"#,
        ));
        let extractor = LlmFactExtractor::new(llm);
        let mut input = sample_input();
        input.facts.nearest_station = None;

        let extraction = extractor.extract(&input).await.unwrap();
        assert_eq!(extraction.highlights, vec!["South-facing balcony", "Pets allowed"]);
        assert_eq!(extraction.facts.nearest_station.as_deref(), Some("Ebisu"));
        // Supplied facts win over extracted ones
        assert_eq!(extraction.facts.layout, input.facts.layout);
        assert_eq!(extraction.usage, Some(TokenUsage::new(20, 10)));
    }

    #[tokio::test]
    async fn test_llm_extractor_sends_reply_cap() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "temperature": 0.0,
                "max_tokens": 128,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "id": "cmpl-3",
                    "model": "test-model",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "{\"highlights\": [\"Corner unit\"]}"},
                        "finish_reason": "stop"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let mut config = LlmConfig::new("test-key")
            .with_base_url(url::Url::parse(&server.url()).unwrap())
            .with_max_retries(0);
        config.max_tokens = Some(128);
        let client = Arc::new(crate::openrouter::OpenRouterClient::new(config.clone()).unwrap());

        let extraction = LlmFactExtractor::from_config(client, &config)
            .extract(&sample_input())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(extraction.highlights, vec!["Corner unit"]);
        assert_eq!(extraction.usage, Some(TokenUsage::default()));
    }

    #[tokio::test]
    async fn test_llm_extractor_failure_is_context_error() {
        let extractor = LlmFactExtractor::new(Arc::new(ScriptedLlm::replying("no json here")));
        let err = extractor.extract(&sample_input()).await.unwrap_err();
        assert!(matches!(err, Error::Context(_)));
    }
}
