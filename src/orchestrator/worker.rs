//! Per-item worker: tool phase, synthesis, render, end
//!
//! A worker never fails. Tool errors are folded into [`ToolResult`]s and any
//! synthesis error turns into a degraded artifact, so every worker ends with
//! exactly one `end` event as its last push.

use crate::channel::EventSender;
use crate::content::{self, SlideBody, TemplateMarker};
use crate::context::GenerationContext;
use crate::error::{Error, Result};
use crate::events::{Event, GeneratedItem};
use crate::limiter::CallLimiter;
use crate::plan::PlanItem;
use crate::render;
use crate::synthesis::{self, SynthesisRequest, SynthesisStrategy, Synthesizer};
use crate::tools::{call_tool, ToolContext, ToolRegistry, ToolResult};
use crate::usage::UsageAggregator;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run-wide collaborators handed to every worker
#[derive(Clone)]
pub(crate) struct Shared {
    pub context: Arc<GenerationContext>,
    pub tools: Arc<ToolRegistry>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub limiter: Arc<CallLimiter>,
    pub usage: Arc<UsageAggregator>,
    pub events: EventSender,
    pub cancel: CancellationToken,
}

/// Drives one plan item to a [`GeneratedItem`]
pub(crate) struct Worker {
    item: PlanItem,
    shared: Shared,
}

impl Worker {
    pub fn new(item: PlanItem, shared: Shared) -> Self {
        Self { item, shared }
    }

    /// Run the item to completion. Its `start` has already been pushed.
    pub async fn run(self) -> GeneratedItem {
        let tool_results = self.tool_phase().await;
        let generated = match self.produce(&tool_results).await {
            Ok(generated) => generated,
            Err(e) => {
                tracing::warn!(
                    run_id = %self.shared.context.run_id,
                    index = self.item.index,
                    content_type = %self.item.content_type,
                    error = %e,
                    "slide degraded"
                );
                degraded(&self.item, &e.to_string())
            }
        };

        self.emit(Event::end(&generated));
        generated
    }

    async fn tool_phase(&self) -> Vec<ToolResult> {
        let required = self.item.content_type.required_tools();
        let ctx = ToolContext::new(
            self.shared.context.run_id,
            self.item.index,
            self.item.content_type,
        );

        let mut results = Vec::with_capacity(required.len());
        for id in required {
            let result = match self.shared.tools.get(id) {
                Some(tool) => {
                    let params = tool_params(id, &self.shared.context);
                    self.shared
                        .limiter
                        .run(&self.shared.cancel, id, call_tool(tool.as_ref(), params, &ctx))
                        .await
                        .unwrap_or_else(|e| ToolResult::failed(*id, e.to_string()))
                }
                None => ToolResult::failed(*id, Error::ToolNotFound(id.to_string()).to_string()),
            };

            match &result.error {
                Some(error) => tracing::warn!(
                    index = self.item.index,
                    tool = %id,
                    error = %error,
                    "tool call failed"
                ),
                None => tracing::debug!(index = self.item.index, tool = %id, "tool call succeeded"),
            }
            results.push(result);
        }
        results
    }

    async fn produce(&self, tool_results: &[ToolResult]) -> Result<GeneratedItem> {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::cancelled("run cancelled"));
        }

        let item = &self.item;
        let context = self.shared.context.as_ref();
        let strategy = SynthesisStrategy::for_item(item);
        tracing::debug!(
            index = item.index,
            phase = "synthesis",
            strategy = strategy.as_str(),
            "entering phase"
        );

        let body = match strategy {
            SynthesisStrategy::Template => SlideBody::Template(TemplateMarker {
                content_type: item.content_type,
            }),
            SynthesisStrategy::Direct => {
                SlideBody::Content(synthesis::build_direct(item, context, tool_results)?)
            }
            SynthesisStrategy::Generative => {
                let schema = content::schema(item.content_type).ok_or_else(|| {
                    Error::synthesis(format!("{} has no content shape", item.content_type))
                })?;
                self.emit(Event::generating(
                    item.index,
                    &item.title,
                    render::render_skeleton(item),
                ));

                let request = SynthesisRequest {
                    item,
                    schema: &schema,
                    context,
                    tool_results,
                };
                let synthesis = self
                    .shared
                    .limiter
                    .run(
                        &self.shared.cancel,
                        "synthesize",
                        self.shared.synthesizer.synthesize(request),
                    )
                    .await??;

                if let Some(usage) = synthesis.usage {
                    let record = self
                        .shared
                        .usage
                        .record(format!("synthesize:{}", item.content_type), usage);
                    self.emit(Event::usage(record));
                }
                SlideBody::Content(synthesis.content)
            }
        };

        tracing::debug!(index = item.index, phase = "render", "entering phase");
        let source_refs = match strategy {
            SynthesisStrategy::Template => Vec::new(),
            SynthesisStrategy::Direct | SynthesisStrategy::Generative => {
                synthesis::source_refs(item, context, tool_results)
            }
        };

        Ok(GeneratedItem {
            index: item.index,
            title: item.title.clone(),
            artifact: render::render(item, &body),
            source_refs,
        })
    }

    fn emit(&self, event: Event) {
        if self.shared.events.push(event).is_err() {
            tracing::debug!(index = self.item.index, "event dropped, channel closed");
        }
    }
}

/// Item substituted for a slide that could not be generated
pub(crate) fn degraded(item: &PlanItem, reason: &str) -> GeneratedItem {
    GeneratedItem {
        index: item.index,
        title: item.title.clone(),
        artifact: render::render_degraded(item, reason),
        source_refs: Vec::new(),
    }
}

/// Parameters for a tool call, derived from the shared context only
fn tool_params(tool: &str, context: &GenerationContext) -> Value {
    let facts = &context.facts;
    match tool {
        "crop_image" => json!({
            "file_name": context.flyer.file_name,
            "mime_type": context.flyer.mime_type,
            "region": "floor_plan",
        }),
        "render_map" => json!({ "address": facts.address, "zoom": 16 }),
        "transit_route" => match &facts.nearest_station {
            Some(station) => json!({ "origin": facts.address, "station": station }),
            None => json!({ "origin": facts.address }),
        },
        "facility_search" => json!({ "address": facts.address, "radius_m": 1000 }),
        "shelter_search" => json!({ "address": facts.address, "limit": 5 }),
        _ => json!({ "address": facts.address }),
    }
}
