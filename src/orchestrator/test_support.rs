//! Scripted doubles shared by the crate's tests

use crate::config::LoanAssumptions;
use crate::content::{self, SlideContent};
use crate::context::{DeckInput, FlyerImage, GenerationContext, ListingFacts};
use crate::error::{Error, Result};
use crate::llm_client::LlmClient;
use crate::openrouter::{Choice, CompletionRequest, CompletionResponse, Message, Role, Usage};
use crate::plan::ContentType;
use crate::synthesis::{Synthesis, SynthesisRequest, Synthesizer};
use crate::tools::{StaticTool, Tool, ToolContext, ToolRegistry};
use crate::types::{RunId, TokenUsage};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn sample_input() -> DeckInput {
    let mut facts = ListingFacts::new("Maison Ebisu 502", "1-2-3 Ebisu, Shibuya-ku, Tokyo", 30_000_000);
    facts.layout = Some("2LDK".into());
    facts.floor_area_sqm = Some(55.2);
    facts.built_year = Some(2012);
    facts.nearest_station = Some("Ebisu".into());
    facts.agent_name = Some("Sakura Realty".into());
    facts.agent_phone = Some("03-0000-0000".into());

    let flyer = FlyerImage::new("flyer.png", "image/png", vec![0x89, b'P', b'N', b'G'])
        .with_ocr_text("2LDK 55.2m2 South-facing balcony");
    DeckInput::new(flyer, facts)
}

pub fn sample_context() -> GenerationContext {
    let input = sample_input();
    GenerationContext {
        run_id: RunId::new(),
        created_at: Utc::now(),
        flyer: input.flyer,
        facts: input.facts,
        highlights: vec!["South-facing balcony".into()],
        loan: LoanAssumptions::default(),
    }
}

/// Chat client that always returns the same reply with usage (20, 10)
pub struct ScriptedLlm {
    reply: String,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedLlm {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content of the last user message received
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock() = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.clone());

        Ok(CompletionResponse {
            id: "scripted".into(),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(self.reply.clone()),
                finish_reason: Some("stop".into()),
            }],
            usage: Some(Usage {
                prompt_tokens: 20,
                completion_tokens: 10,
                total_tokens: 30,
            }),
        })
    }

    fn client_type(&self) -> &str {
        "scripted"
    }

    fn endpoint(&self) -> &str {
        "memory://scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

/// Canned, shape-valid content for every synthesizable content type
pub fn canned_content(content_type: ContentType) -> Value {
    match content_type {
        ContentType::Cover => json!({
            "headline": "Maison Ebisu", "subheadline": "2LDK",
            "price_label": "JPY 30,000,000", "issued_on": "2026-01-01"
        }),
        ContentType::PropertyOverview => json!({"facts": [{"label": "Layout", "value": "2LDK"}]}),
        ContentType::FloorPlan => {
            json!({"image_url": "https://img.example/plan.png", "caption": "2LDK"})
        }
        ContentType::AccessMap => json!({
            "address": "1-2-3 Ebisu", "latitude": 35.64, "longitude": 139.71,
            "map_image_url": "https://tiles.example/map.png"
        }),
        ContentType::Transit => {
            json!({"routes": [{"station": "Shibuya", "line": "Yamanote", "minutes": 3}]})
        }
        ContentType::NearbyFacilities => json!({
            "summary": "Shops and parks nearby.",
            "facilities": [{"name": "Ebisu Park", "category": "park", "distance_m": 300}]
        }),
        ContentType::HazardRisk => json!({
            "summary": "Low overall risk.",
            "risks": [{"hazard": "flood", "level": "low", "note": "Outside inundation zone"}]
        }),
        ContentType::EvacuationShelters => json!({
            "shelters": [{"name": "Ebisu Elementary", "address": "1-1 Ebisu", "distance_m": 450}]
        }),
        ContentType::Neighborhood => {
            json!({"heading": "Quiet and green", "paragraphs": ["Tree-lined streets."]})
        }
        ContentType::LoanSimulation => json!({
            "currency": "JPY", "principal": 27000000, "down_payment": 3000000,
            "annual_rate_pct": 1.5, "years": 35, "monthly_payment": 82670
        }),
        ContentType::Disclaimer | ContentType::Closing => json!({}),
    }
}

/// Synthesizer returning canned content, optionally failing
pub struct ScriptedSynthesizer {
    fail_for: HashSet<ContentType>,
    invalid_for: HashSet<ContentType>,
    calls: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self {
            fail_for: HashSet::new(),
            invalid_for: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Return an error for this content type
    pub fn failing_for(mut self, content_type: ContentType) -> Self {
        self.fail_for.insert(content_type);
        self
    }

    /// Produce an off-shape reply for this content type
    pub fn invalid_for(mut self, content_type: ContentType) -> Self {
        self.invalid_for.insert(content_type);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<Synthesis> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let content_type = request.item.content_type;
        if self.fail_for.contains(&content_type) {
            return Err(Error::synthesis("scripted failure"));
        }
        let value = if self.invalid_for.contains(&content_type) {
            json!({"unexpected": true})
        } else {
            canned_content(content_type)
        };

        let content: SlideContent = content::validate(content_type, value)?;
        Ok(Synthesis {
            content,
            usage: Some(TokenUsage::new(20, 10)),
        })
    }
}

/// Tool that always fails
pub struct FailingTool {
    id: String,
}

impl FailingTool {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
        Err(Error::tool_execution(&self.id, "service unreachable"))
    }
}

/// Tool that panics inside the worker task
pub struct PanickingTool {
    id: String,
}

impl PanickingTool {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Tool for PanickingTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Panics"
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
        panic!("{} exploded", self.id)
    }
}

/// Tool that answers after a delay
pub struct SlowTool {
    inner: StaticTool,
    delay: Duration,
}

impl SlowTool {
    pub fn new(id: impl Into<String>, payload: Value, delay: Duration) -> Self {
        Self {
            inner: StaticTool::new(id, payload),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn description(&self) -> &str {
        "Answers slowly"
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        tokio::time::sleep(self.delay).await;
        self.inner.execute(params, ctx).await
    }
}

/// Static payloads for every tool the standard plan calls
pub fn static_tools() -> ToolRegistry {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(StaticTool::new(
            "crop_image",
            json!({"image_url": "https://img.example/plan.png"}),
        )),
        Arc::new(StaticTool::new("geocode", json!({"lat": 35.6467, "lon": 139.7101}))),
        Arc::new(StaticTool::new(
            "render_map",
            json!({"image_url": "https://tiles.example/map.png"}),
        )),
        Arc::new(StaticTool::new(
            "transit_route",
            json!({"routes": [{"station": "Shibuya", "line": "Yamanote", "minutes": 3}]}),
        )),
        Arc::new(StaticTool::new(
            "facility_search",
            json!({"facilities": [{"name": "Ebisu Park", "category": "park", "distance_m": 300}]}),
        )),
        Arc::new(StaticTool::new(
            "hazard_lookup",
            json!({"risks": [{"hazard": "flood", "level": "low", "note": ""}]}),
        )),
        Arc::new(StaticTool::new(
            "shelter_search",
            json!({"shelters": [{"name": "Ebisu Elementary", "address": "1-1 Ebisu", "distance_m": 450}]}),
        )),
    ];
    tools
        .into_iter()
        .fold(ToolRegistry::new(), |registry, tool| registry.with(tool))
}
