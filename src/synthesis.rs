//! Turning facts and tool payloads into validated slide content
//!
//! Three strategies exist. Static slides skip synthesis and render a
//! template. Slides whose data is fully determined by the flyer, a
//! computation or tool payloads are assembled directly. Everything else goes
//! through a [`Synthesizer`], normally [`LlmSynthesizer`]. Direct and
//! generated content pass the same [`content::validate`] check.

use crate::config::LlmConfig;
use crate::content::{self, SlideContent};
use crate::context::GenerationContext;
use crate::error::{Error, Result};
use crate::llm_client::{parse_json_reply, LlmClient};
use crate::openrouter::{CompletionRequest, Message};
use crate::plan::{ContentType, DataSource, PlanItem};
use crate::tools::ToolResult;
use crate::types::TokenUsage;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Source reference for computed loan figures
pub const LOAN_MODEL_REF: &str = "computed:loan_model";

/// How a slide's content is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStrategy {
    /// Fixed template, no synthesis
    Template,
    /// Assembled from context and tool payloads without a model call
    Direct,
    /// Produced by a [`Synthesizer`]
    Generative,
}

impl SynthesisStrategy {
    /// Pick the strategy for a plan item
    pub fn for_item(item: &PlanItem) -> Self {
        match item.data_source {
            DataSource::Static => Self::Template,
            DataSource::Primary | DataSource::Computed => Self::Direct,
            DataSource::Researched if item.content_type.is_tool_determined() => Self::Direct,
            DataSource::Researched | DataSource::Generated => Self::Generative,
        }
    }

    /// Name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Direct => "direct",
            Self::Generative => "generative",
        }
    }
}

/// Everything a synthesizer may look at for one slide
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub item: &'a PlanItem,
    /// JSON Schema the output must satisfy
    pub schema: &'a Value,
    pub context: &'a GenerationContext,
    pub tool_results: &'a [ToolResult],
}

/// Validated content plus the model usage it cost
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub content: SlideContent,
    pub usage: Option<TokenUsage>,
}

/// Produces validated structured content for one slide
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Produce content; implementations must validate before returning
    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<Synthesis>;
}

/// References cited by a successfully synthesized item
pub fn source_refs(
    item: &PlanItem,
    context: &GenerationContext,
    tool_results: &[ToolResult],
) -> Vec<String> {
    let mut refs: Vec<String> = tool_results
        .iter()
        .filter(|r| r.is_ok())
        .map(|r| r.source_ref.clone())
        .collect();
    match item.data_source {
        DataSource::Primary => refs.push(format!("flyer:{}", context.flyer.file_name)),
        DataSource::Computed => refs.push(LOAN_MODEL_REF.to_string()),
        DataSource::Generated | DataSource::Researched | DataSource::Static => {}
    }
    refs
}

/// Build content without a model call.
///
/// Fails when a required tool result is missing or failed, or when the
/// assembled value does not satisfy the content shape.
pub fn build_direct(
    item: &PlanItem,
    context: &GenerationContext,
    tool_results: &[ToolResult],
) -> Result<SlideContent> {
    let facts = &context.facts;
    let value = match item.content_type {
        ContentType::Cover => {
            let subheadline = context.highlights.first().cloned().unwrap_or_else(|| {
                [facts.layout.as_deref(), facts.nearest_station.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" / ")
            });
            json!({
                "headline": facts.property_name,
                "subheadline": subheadline,
                "price_label": facts.price_label(),
                "issued_on": context.created_at.format("%Y-%m-%d").to_string(),
            })
        }
        ContentType::PropertyOverview => json!({ "facts": overview_facts(context) }),
        ContentType::FloorPlan => {
            let crop = payload(tool_results, "crop_image")?;
            let caption = match (facts.layout.as_deref(), facts.floor_area_sqm) {
                (Some(layout), Some(area)) => format!("{} / {:.2} m²", layout, area),
                (Some(layout), None) => layout.to_string(),
                (None, Some(area)) => format!("{:.2} m²", area),
                (None, None) => "Floor plan".to_string(),
            };
            json!({ "image_url": field(crop, "crop_image", &["image_url", "url"])?, "caption": caption })
        }
        ContentType::AccessMap => {
            let geo = payload(tool_results, "geocode")?;
            let map = payload(tool_results, "render_map")?;
            json!({
                "address": facts.address,
                "latitude": field(geo, "geocode", &["latitude", "lat"])?,
                "longitude": field(geo, "geocode", &["longitude", "lon", "lng"])?,
                "map_image_url": field(map, "render_map", &["image_url", "url"])?,
            })
        }
        ContentType::Transit => {
            let routes = payload(tool_results, "transit_route")?;
            json!({ "routes": field(routes, "transit_route", &["routes"])? })
        }
        ContentType::NearbyFacilities => {
            let found = payload(tool_results, "facility_search")?;
            let facilities = field(found, "facility_search", &["facilities"])?;
            let count = facilities.as_array().map_or(0, Vec::len);
            json!({
                "summary": format!("{} facilities within walking distance", count),
                "facilities": facilities,
            })
        }
        ContentType::HazardRisk => {
            let hazard = payload(tool_results, "hazard_lookup")?;
            let summary = hazard
                .get("summary")
                .cloned()
                .unwrap_or_else(|| json!("See the municipal hazard map for details."));
            json!({ "summary": summary, "risks": field(hazard, "hazard_lookup", &["risks"])? })
        }
        ContentType::EvacuationShelters => {
            let shelters = payload(tool_results, "shelter_search")?;
            json!({ "shelters": field(shelters, "shelter_search", &["shelters"])? })
        }
        ContentType::LoanSimulation => serde_json::to_value(loan_content(context))?,
        ContentType::Neighborhood | ContentType::Disclaimer | ContentType::Closing => {
            return Err(Error::synthesis(format!(
                "{} cannot be assembled directly",
                item.content_type
            )));
        }
    };

    content::validate(item.content_type, value)
}

fn overview_facts(context: &GenerationContext) -> Vec<Value> {
    let facts = &context.facts;
    let mut rows = vec![
        ("Address", facts.address.clone()),
        ("Price", facts.price_label()),
    ];
    if let Some(layout) = &facts.layout {
        rows.push(("Layout", layout.clone()));
    }
    if let Some(area) = facts.floor_area_sqm {
        rows.push(("Floor area", format!("{:.2} m²", area)));
    }
    if let Some(year) = facts.built_year {
        rows.push(("Built", year.to_string()));
    }
    if let Some(station) = &facts.nearest_station {
        rows.push(("Nearest station", station.clone()));
    }
    match (&facts.agent_name, &facts.agent_phone) {
        (Some(name), Some(phone)) => rows.push(("Agent", format!("{} ({})", name, phone))),
        (Some(name), None) => rows.push(("Agent", name.clone())),
        (None, Some(phone)) => rows.push(("Agent", phone.clone())),
        (None, None) => {}
    }
    rows.into_iter()
        .map(|(label, value)| json!({ "label": label, "value": value }))
        .collect()
}

fn payload<'a>(results: &'a [ToolResult], tool: &str) -> Result<&'a Map<String, Value>> {
    let result = results
        .iter()
        .find(|r| r.tool_name == tool)
        .ok_or_else(|| Error::synthesis(format!("no result from {}", tool)))?;
    match &result.error {
        Some(error) => Err(Error::synthesis(format!("{} failed: {}", tool, error))),
        None => Ok(&result.payload),
    }
}

fn field(payload: &Map<String, Value>, tool: &str, keys: &[&str]) -> Result<Value> {
    keys.iter()
        .find_map(|key| payload.get(*key))
        .cloned()
        .ok_or_else(|| Error::synthesis(format!("{} payload has no {}", tool, keys[0])))
}

/// Monthly payment for an amortising loan, rounded to the nearest unit
pub fn monthly_payment(principal: u64, annual_rate_pct: f64, years: u32) -> u64 {
    let months = f64::from(years.max(1) * 12);
    let principal = principal as f64;
    let rate = annual_rate_pct / 100.0 / 12.0;
    let payment = if rate <= 0.0 {
        principal / months
    } else {
        principal * rate / (1.0 - (1.0 + rate).powf(-months))
    };
    payment.round() as u64
}

fn loan_content(context: &GenerationContext) -> content::LoanContent {
    let loan = &context.loan;
    let price = context.facts.price;
    let down_payment = ((price as f64) * loan.down_payment_pct / 100.0).round() as u64;
    let principal = price.saturating_sub(down_payment);
    content::LoanContent {
        currency: context.facts.currency.clone(),
        principal,
        down_payment,
        annual_rate_pct: loan.annual_rate_pct,
        years: loan.years,
        monthly_payment: monthly_payment(principal, loan.annual_rate_pct, loan.years),
    }
}

const SYSTEM_PROMPT: &str = "You write slides for real-estate sales decks. Reply with exactly one \
JSON object that satisfies the given JSON Schema. Use only the listing facts and tool data you are \
given; when data is unavailable say so plainly instead of inventing numbers, names or distances.";

/// Synthesizer backed by a chat-completions model
pub struct LlmSynthesizer {
    client: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl LlmSynthesizer {
    /// Create a synthesizer using the client's default model
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        let model = client.default_model().to_string();
        Self {
            client,
            model,
            temperature: 0.4,
            max_tokens: None,
        }
    }

    /// Model, temperature and reply cap taken from `config`
    pub fn from_config(client: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Override the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Cap the length of each reply
    pub fn with_max_tokens(mut self, limit: u32) -> Self {
        self.max_tokens = Some(limit);
        self
    }

    fn prompt(&self, request: &SynthesisRequest<'_>) -> Result<String> {
        let context = request.context;
        let mut prompt = format!(
            "Slide: {}\nPurpose: {}\n\nJSON Schema:\n{}\n\nListing facts:\n{}\n",
            request.item.title,
            request.item.content_type.description(),
            serde_json::to_string_pretty(request.schema)?,
            serde_json::to_string_pretty(&context.facts)?,
        );
        if !context.highlights.is_empty() {
            prompt.push_str("\nHighlights:\n");
            for highlight in &context.highlights {
                prompt.push_str("- ");
                prompt.push_str(highlight);
                prompt.push('\n');
            }
        }
        if !request.tool_results.is_empty() {
            prompt.push_str("\nTool data:\n");
            for result in request.tool_results {
                match &result.error {
                    None => prompt.push_str(&format!(
                        "{}: {}\n",
                        result.tool_name,
                        serde_json::to_string(&result.payload)?
                    )),
                    Some(_) => prompt.push_str(&format!("{}: unavailable\n", result.tool_name)),
                }
            }
        }
        Ok(prompt)
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    fn name(&self) -> &str {
        "llm"
    }

    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<Synthesis> {
        let mut completion = CompletionRequest::new(
            self.model.clone(),
            vec![Message::system(SYSTEM_PROMPT), Message::user(self.prompt(&request)?)],
        )
        .with_temperature(self.temperature)
        .with_json_output();
        if let Some(limit) = self.max_tokens {
            completion = completion.with_max_tokens(limit);
        }

        let response = self.client.complete(completion).await?;
        let usage = response.token_usage();
        let text = response
            .text()
            .ok_or_else(|| Error::synthesis("model returned no content"))?;
        let value = parse_json_reply(text)
            .map_err(|e| Error::synthesis(format!("unusable model reply: {}", e)))?;

        Ok(Synthesis {
            content: content::validate(request.item.content_type, value)?,
            usage: Some(usage),
        })
    }
}
