//! Deck orchestrator: context, fan-out, drain, end-of-run
//!
//! ```text
//! run(input) ─► build context ─► spawn one worker per plan item ─┐
//!                                                                 │ push
//!   caller ◄── DeckRun stream ◄── drain EventStream ◄─────────────┘
//!                    └── end-of-run once the driver has joined every worker
//! ```

use crate::channel::{event_channel, CloseOnDrop};
use crate::config::{DeckConfig, LoanAssumptions};
use crate::context::{build_context, DeckInput, FactExtractor, LlmFactExtractor, ProvidedFacts};
use crate::error::{Error, Result};
use crate::events::{Event, GeneratedItem};
use crate::limiter::CallLimiter;
use crate::llm_client::LlmClient;
use crate::openrouter::OpenRouterClient;
use crate::orchestrator::worker::{self, Shared, Worker};
use crate::plan::Plan;
use crate::synthesis::{LlmSynthesizer, Synthesizer};
use crate::tools::ToolRegistry;
use crate::types::{RunId, TokenUsage};
use crate::usage::UsageAggregator;
use async_stream::stream;
use futures::future::join_all;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Generates slide decks from flyers
pub struct DeckOrchestrator {
    plan: Arc<Plan>,
    extractor: Arc<dyn FactExtractor>,
    synthesizer: Arc<dyn Synthesizer>,
    tools: Arc<ToolRegistry>,
    limiter: Arc<CallLimiter>,
    loan: LoanAssumptions,
}

impl DeckOrchestrator {
    /// Start building an orchestrator
    pub fn builder() -> DeckOrchestratorBuilder {
        DeckOrchestratorBuilder::new()
    }

    /// Wire the OpenRouter-backed extractor and synthesizer from configuration
    pub fn from_config(config: &DeckConfig, tools: ToolRegistry) -> Result<Self> {
        let llm = config
            .llm
            .clone()
            .ok_or_else(|| Error::config("OPENROUTER_API_KEY is not set"))?;
        let client: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(llm.clone())?);
        tracing::info!(
            backend = client.client_type(),
            endpoint = client.endpoint(),
            model = %llm.model,
            "model backend configured"
        );

        Self::builder()
            .extractor(Arc::new(LlmFactExtractor::from_config(client.clone(), &llm)))
            .synthesizer(Arc::new(LlmSynthesizer::from_config(client, &llm)))
            .tools(tools)
            .limiter(CallLimiter::from_config(&config.limits)?)
            .loan(config.loan)
            .build()
    }

    /// The plan every run follows
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Start a run
    pub fn run(&self, input: DeckInput) -> DeckRun {
        self.run_with_cancel(input, CancellationToken::new())
    }

    /// Start a run that stops when `cancel` fires.
    ///
    /// Dropping the returned [`DeckRun`] also cancels it.
    pub fn run_with_cancel(&self, input: DeckInput, cancel: CancellationToken) -> DeckRun {
        let run_id = RunId::new();
        let usage = Arc::new(UsageAggregator::new());
        let cancel = cancel.child_token();
        let guard = cancel.clone().drop_guard();

        let plan = self.plan.clone();
        let extractor = self.extractor.clone();
        let synthesizer = self.synthesizer.clone();
        let tools = self.tools.clone();
        let limiter = self.limiter.clone();
        let loan = self.loan;
        let run_usage = usage.clone();
        let run_cancel = cancel.clone();

        let events = stream! {
            let started = Instant::now();
            tracing::info!(%run_id, plan_version = %plan.version, items = plan.len(), "deck run started");

            let built = limiter
                .run(
                    &run_cancel,
                    "build context",
                    build_context(run_id, input, extractor.as_ref(), loan),
                )
                .await
                .and_then(|built| built);
            let (context, extract_usage) = match built {
                Ok(built) => built,
                Err(e) => {
                    tracing::warn!(%run_id, error = %e, "deck run failed before generation");
                    yield Event::error(format!("could not build generation context: {}", e));
                    return;
                }
            };

            if let Some(used) = extract_usage {
                yield Event::usage(run_usage.record(extractor.name(), used));
            }

            if run_cancel.is_cancelled() {
                tracing::info!(%run_id, "deck run cancelled before fan-out");
                yield Event::error("run cancelled before generation started");
                return;
            }

            let (sender, mut receiver) = event_channel();
            let shared = Shared {
                context: Arc::new(context),
                tools,
                synthesizer,
                limiter,
                usage: run_usage.clone(),
                events: sender,
                cancel: run_cancel.clone(),
            };
            let driver = tokio::spawn(drive(plan.clone(), shared));

            while let Some(event) = receiver.recv().await {
                yield event;
            }

            match driver.await {
                Ok(items) => {
                    tracing::info!(
                        %run_id,
                        items = items.len(),
                        degraded = items.iter().filter(|i| crate::render::is_degraded(&i.artifact)).count(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "deck run finished"
                    );
                    yield Event::EndOfRun { items };
                }
                Err(e) => {
                    tracing::warn!(%run_id, error = %e, "deck run driver failed");
                    yield Event::error(format!("run aborted: {}", e));
                }
            }
        };

        DeckRun {
            run_id,
            usage,
            cancel,
            events: Box::pin(events),
            _guard: guard,
        }
    }
}

/// Announce every item, spawn the workers, join them all, then close the channel
async fn drive(plan: Arc<Plan>, shared: Shared) -> Vec<GeneratedItem> {
    let _close = CloseOnDrop(shared.events.clone());

    // Every `start` is queued before any worker can push its `end`
    for item in &plan.items {
        let _ = shared.events.push(Event::start(item.index, &item.title));
    }

    let spawned: Vec<_> = plan
        .items
        .iter()
        .map(|item| {
            let handle = tokio::spawn(Worker::new(item.clone(), shared.clone()).run());
            (item.clone(), handle)
        })
        .collect();

    let settled = spawned.into_iter().map(|(item, handle)| {
        let events = shared.events.clone();
        async move {
            match handle.await {
                Ok(generated) => generated,
                Err(e) => {
                    tracing::warn!(index = item.index, error = %e, "worker did not complete");
                    let generated = worker::degraded(&item, "slide generation aborted");
                    // A worker pushes `end` as its last action, so none was sent
                    let _ = events.push(Event::end(&generated));
                    generated
                }
            }
        }
    });

    let mut items = join_all(settled).await;
    items.sort_by_key(|item| item.index);
    items
}

/// Handle to a running deck generation.
///
/// Yields [`Event`]s until the run ends. Dropping the handle cancels the run.
pub struct DeckRun {
    run_id: RunId,
    usage: Arc<UsageAggregator>,
    cancel: CancellationToken,
    events: Pin<Box<dyn Stream<Item = Event> + Send>>,
    _guard: DropGuard,
}

impl DeckRun {
    /// Identifier of this run
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Usage recorded so far, per step
    pub fn usage(&self) -> &UsageAggregator {
        &self.usage
    }

    /// Total usage recorded so far
    pub fn total_usage(&self) -> TokenUsage {
        self.usage.total()
    }

    /// Cancel the run; the stream still terminates
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that fires when this run is cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for DeckRun {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for DeckRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeckRun")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Builder for [`DeckOrchestrator`]
pub struct DeckOrchestratorBuilder {
    plan: Option<Plan>,
    extractor: Option<Arc<dyn FactExtractor>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    tools: ToolRegistry,
    limiter: CallLimiter,
    loan: LoanAssumptions,
}

impl DeckOrchestratorBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            plan: None,
            extractor: None,
            synthesizer: None,
            tools: ToolRegistry::new(),
            limiter: CallLimiter::unlimited(),
            loan: LoanAssumptions::default(),
        }
    }

    /// Use a custom plan instead of [`Plan::standard`]
    pub fn plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Fact extractor; defaults to [`ProvidedFacts`]
    pub fn extractor(mut self, extractor: Arc<dyn FactExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Synthesizer for generative slides (required)
    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Tools available to workers
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Limits on external calls
    pub fn limiter(mut self, limiter: CallLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Assumptions for the loan simulation slide
    pub fn loan(mut self, loan: LoanAssumptions) -> Self {
        self.loan = loan;
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> Result<DeckOrchestrator> {
        let synthesizer = self
            .synthesizer
            .ok_or_else(|| Error::config("a synthesizer is required"))?;
        let plan = self.plan.unwrap_or_else(Plan::standard);
        if plan.is_empty() {
            return Err(Error::InvalidPlan("plan has no items".into()));
        }

        Ok(DeckOrchestrator {
            plan: Arc::new(plan),
            extractor: self.extractor.unwrap_or_else(|| Arc::new(ProvidedFacts)),
            synthesizer,
            tools: Arc::new(self.tools),
            limiter: Arc::new(self.limiter),
            loan: self.loan,
        })
    }
}

impl Default for DeckOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use crate::orchestrator::test_support::{
        sample_input, static_tools, FailingTool, PanickingTool, ScriptedLlm, ScriptedSynthesizer,
        SlowTool,
    };
    use crate::plan::{ContentType, DataSource, PlanItem};
    use crate::render::is_degraded;
    use crate::tools::StaticTool;
    use futures::StreamExt;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn three_item_plan() -> Plan {
        Plan::new(
            "test",
            vec![
                PlanItem::new(0, ContentType::Closing, "Thanks", DataSource::Static),
                PlanItem::new(1, ContentType::Transit, "Transit", DataSource::Researched),
                PlanItem::new(2, ContentType::Neighborhood, "Neighborhood", DataSource::Generated),
            ],
        )
        .unwrap()
    }

    fn transit_tool() -> Arc<StaticTool> {
        Arc::new(StaticTool::new(
            "transit_route",
            json!({"routes": [{"station": "Shibuya", "line": "Yamanote", "minutes": 3}]}),
        ))
    }

    fn orchestrator(plan: Plan, tools: ToolRegistry) -> DeckOrchestrator {
        DeckOrchestrator::builder()
            .plan(plan)
            .tools(tools)
            .synthesizer(Arc::new(ScriptedSynthesizer::new()))
            .build()
            .unwrap()
    }

    fn end_of_run(events: &[Event]) -> &[GeneratedItem] {
        match events.last() {
            Some(Event::EndOfRun { items }) => items,
            other => panic!("expected end-of-run last, got {:?}", other),
        }
    }

    /// Per-index event kinds, in the order they were received
    fn kinds_by_index(events: &[Event]) -> HashMap<usize, Vec<&'static str>> {
        let mut by_index: HashMap<usize, Vec<&'static str>> = HashMap::new();
        for event in events {
            if let Some(index) = event.index() {
                by_index.entry(index).or_default().push(event.kind());
            }
        }
        by_index
    }

    #[tokio::test]
    async fn test_three_item_run() {
        let orchestrator =
            orchestrator(three_item_plan(), ToolRegistry::new().with(transit_tool()));
        let run = orchestrator.run(sample_input());
        let events: Vec<Event> = run.collect().await;

        let items = end_of_run(&events);
        assert_eq!(items.iter().map(|i| i.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(items.iter().all(|i| !is_degraded(&i.artifact)));
        assert!(items[0].source_refs.is_empty());
        assert_eq!(items[1].source_refs, vec!["tool:transit_route"]);

        let kinds = kinds_by_index(&events);
        assert_eq!(kinds[&0], vec!["start", "end"]);
        assert_eq!(kinds[&1], vec!["start", "end"]);
        assert_eq!(kinds[&2], vec!["start", "generating", "end"]);

        let usage: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Usage { step, .. } => Some(step.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(usage, vec!["synthesize:neighborhood"]);
        assert_eq!(events.iter().filter(|e| e.kind() == "end-of-run").count(), 1);
    }

    async fn assert_all_starts_before_first_end() {
        let orchestrator =
            orchestrator(three_item_plan(), ToolRegistry::new().with(transit_tool()));
        let events: Vec<Event> = orchestrator.run(sample_input()).collect().await;
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();

        let last_start = kinds.iter().rposition(|k| *k == "start").unwrap();
        let first_end = kinds.iter().position(|k| *k == "end").unwrap();
        assert_eq!(kinds.iter().filter(|k| **k == "start").count(), 3);
        assert!(last_start < first_end, "events out of order: {:?}", kinds);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_starts_precede_ends_current_thread() {
        assert_all_starts_before_first_end().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_starts_precede_ends_multi_thread() {
        assert_all_starts_before_first_end().await;
    }

    #[tokio::test]
    async fn test_tool_failure_degrades_only_that_item() {
        let tools = ToolRegistry::new().with(Arc::new(FailingTool::new("transit_route")));
        let events: Vec<Event> = orchestrator(three_item_plan(), tools)
            .run(sample_input())
            .collect()
            .await;

        let items = end_of_run(&events);
        assert!(!is_degraded(&items[0].artifact));
        assert!(is_degraded(&items[1].artifact));
        assert!(items[1].source_refs.is_empty());
        assert!(!is_degraded(&items[2].artifact));
        assert!(events.iter().all(|e| e.kind() != "error"));
    }

    #[tokio::test]
    async fn test_fatal_context_error_ends_run() {
        let mut input = sample_input();
        input.flyer.bytes.clear();
        let events: Vec<Event> = orchestrator(three_item_plan(), ToolRegistry::new())
            .run(input)
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::Error { message } if message.contains("flyer image is empty")));
    }

    #[tokio::test]
    async fn test_panicking_worker_still_ends() {
        let tools = ToolRegistry::new().with(Arc::new(PanickingTool::new("transit_route")));
        let events: Vec<Event> = orchestrator(three_item_plan(), tools)
            .run(sample_input())
            .collect()
            .await;

        let items = end_of_run(&events);
        assert_eq!(items.len(), 3);
        assert!(is_degraded(&items[1].artifact));
        assert_eq!(kinds_by_index(&events)[&1], vec!["start", "end"]);
    }

    #[tokio::test]
    async fn test_invalid_direct_output_degrades() {
        let tools = ToolRegistry::new().with(Arc::new(StaticTool::new(
            "transit_route",
            json!({"routes": [{"line": "Yamanote"}]}),
        )));
        let events: Vec<Event> = orchestrator(three_item_plan(), tools)
            .run(sample_input())
            .collect()
            .await;

        let items = end_of_run(&events);
        assert!(is_degraded(&items[1].artifact));
        assert!(items[1].artifact.contains("transit"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades() {
        let orchestrator = DeckOrchestrator::builder()
            .plan(three_item_plan())
            .tools(ToolRegistry::new().with(transit_tool()))
            .synthesizer(Arc::new(
                ScriptedSynthesizer::new().invalid_for(ContentType::Neighborhood),
            ))
            .build()
            .unwrap();
        let events: Vec<Event> = orchestrator.run(sample_input()).collect().await;

        let items = end_of_run(&events);
        assert!(is_degraded(&items[2].artifact));
        assert!(!is_degraded(&items[1].artifact));
    }

    #[tokio::test]
    async fn test_cancel_before_fan_out() {
        let synthesizer = Arc::new(ScriptedSynthesizer::new());
        let orchestrator = DeckOrchestrator::builder()
            .plan(three_item_plan())
            .synthesizer(synthesizer.clone())
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events: Vec<Event> = orchestrator
            .run_with_cancel(sample_input(), cancel)
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "error");
        assert_eq!(synthesizer.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_terminates() {
        let tools = ToolRegistry::new().with(Arc::new(SlowTool::new(
            "transit_route",
            json!({"routes": []}),
            Duration::from_secs(60),
        )));
        let mut run = orchestrator(three_item_plan(), tools).run(sample_input());

        let mut events = Vec::new();
        while let Some(event) = run.next().await {
            if event.kind() == "start" && event.index() == Some(1) {
                run.cancel();
            }
            events.push(event);
        }

        let items = end_of_run(&events);
        assert_eq!(items.len(), 3);
        assert!(is_degraded(&items[1].artifact));
    }

    #[tokio::test]
    async fn test_dropping_run_cancels_it() {
        let orchestrator = orchestrator(three_item_plan(), ToolRegistry::new());
        let run = orchestrator.run(sample_input());
        let token = run.cancellation_token();
        drop(run);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_standard_plan_end_to_end() {
        let llm = Arc::new(ScriptedLlm::replying(r#"{"highlights": ["Corner unit"]}"#));
        let orchestrator = DeckOrchestrator::builder()
            .extractor(Arc::new(LlmFactExtractor::new(llm)))
            .tools(static_tools())
            .synthesizer(Arc::new(ScriptedSynthesizer::new()))
            .limiter(
                CallLimiter::from_config(&LimitsConfig {
                    max_concurrent_calls: Some(3),
                    calls_per_second: None,
                })
                .unwrap(),
            )
            .build()
            .unwrap();

        let mut run = orchestrator.run(sample_input());
        let mut events = Vec::new();
        while let Some(event) = run.next().await {
            events.push(event);
        }

        assert_eq!(events.first().map(Event::kind), Some("usage"));
        let items = end_of_run(&events);
        assert_eq!(items.len(), 12);
        for (expected, item) in items.iter().enumerate() {
            assert_eq!(item.index, expected);
            assert!(!is_degraded(&item.artifact), "item {} degraded", expected);
        }
        assert!(items[0].source_refs.contains(&"flyer:flyer.png".to_string()));
        assert_eq!(items[9].source_refs, vec!["computed:loan_model"]);
        assert!(items[10].source_refs.is_empty());

        let kinds = kinds_by_index(&events);
        for index in 0..12 {
            let seq = &kinds[&index];
            assert_eq!(seq.first(), Some(&"start"));
            assert_eq!(seq.last(), Some(&"end"));
            assert_eq!(seq.iter().filter(|k| **k == "end").count(), 1);
        }

        // extract_facts plus three generative slides
        assert_eq!(run.usage().by_step().len(), 4);
        assert_eq!(run.total_usage(), TokenUsage::new(80, 40));
    }

    #[test]
    fn test_builder_requires_synthesizer() {
        assert!(matches!(
            DeckOrchestrator::builder().build(),
            Err(Error::Config(_))
        ));
    }
}
