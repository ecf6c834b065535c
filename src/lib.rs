//! # flyerdeck
//!
//! Turns a scanned property flyer plus listing facts into a slide deck,
//! generating every slide concurrently and streaming progress as it goes.
//!
//! ## Features
//!
//! - **Fan-out/fan-in**: one worker per planned slide, merged into a single ordered event stream
//! - **Failure isolation**: a failing tool, model reply or panicking worker degrades only its own slide
//! - **Fail-closed content**: every slide body is checked against a JSON Schema before rendering
//! - **OpenRouter Integration**: fact extraction and slide writing through any chat-completions model
//! - **Opt-in call limits**: cap concurrent external calls and their rate
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flyerdeck::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DeckConfig::from_env()?;
//!     init_tracing(config.log_format)?;
//!
//!     let tools = ToolRegistry::new();
//!     let orchestrator = DeckOrchestrator::from_config(&config, tools)?;
//!
//!     let flyer = FlyerImage::new("flyer.png", "image/png", std::fs::read("flyer.png")?);
//!     let facts = ListingFacts::new("Maison Ebisu 502", "1-2-3 Ebisu, Shibuya-ku", 45_800_000);
//!     let mut run = orchestrator.run(DeckInput::new(flyer, facts));
//!
//!     while let Some(event) = run.next().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod events;
pub mod limiter;
pub mod llm_client;
pub mod openrouter;
pub mod orchestrator;
pub mod plan;
pub mod render;
pub mod synthesis;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod usage;

// Re-exports for convenience
pub use channel::{event_channel, EventSender, EventStream};
pub use config::{DeckConfig, LimitsConfig, LlmConfig, LoanAssumptions};
pub use content::{SlideBody, SlideContent};
pub use context::{
    DeckInput, FactExtractor, FlyerImage, GenerationContext, ListingFacts, LlmFactExtractor,
    ProvidedFacts,
};
pub use error::{Error, Result};
pub use events::{Event, GeneratedItem};
pub use limiter::CallLimiter;
pub use llm_client::LlmClient;
pub use openrouter::{CompletionRequest, CompletionResponse, OpenRouterClient};
pub use orchestrator::{DeckOrchestrator, DeckOrchestratorBuilder, DeckRun};
pub use plan::{ContentType, DataSource, Plan, PlanItem};
pub use synthesis::{LlmSynthesizer, Synthesis, SynthesisRequest, SynthesisStrategy, Synthesizer};
pub use telemetry::{init_tracing, LogFormat};
pub use tools::{HttpTool, StaticTool, Tool, ToolContext, ToolRegistry, ToolResult};
pub use types::{RunId, TokenUsage, UsageRecord};
pub use usage::UsageAggregator;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::DeckConfig;
    pub use crate::context::{DeckInput, FlyerImage, ListingFacts};
    pub use crate::error::{Error, Result};
    pub use crate::events::{Event, GeneratedItem};
    pub use crate::orchestrator::{DeckOrchestrator, DeckRun};
    pub use crate::synthesis::Synthesizer;
    pub use crate::telemetry::init_tracing;
    pub use crate::tools::{Tool, ToolRegistry};
    pub use crate::types::*;
}
