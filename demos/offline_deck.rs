//! Generate the standard deck without any network access.
//!
//! Every tool is a `StaticTool` and generative slides come from a canned
//! synthesizer. Events are printed as NDJSON on stdout, logs go to stderr.
//!
//! ```sh
//! RUST_LOG=flyerdeck=debug cargo run --example offline_deck
//! ```

use async_trait::async_trait;
use flyerdeck::content;
use flyerdeck::prelude::*;
use flyerdeck::{ContentType, LogFormat, StaticTool, Synthesis, SynthesisRequest};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

/// Writes fixed copy for the slides that would normally need a model
struct CannedSynthesizer;

#[async_trait]
impl Synthesizer for CannedSynthesizer {
    fn name(&self) -> &str {
        "canned"
    }

    async fn synthesize(&self, request: SynthesisRequest<'_>) -> flyerdeck::Result<Synthesis> {
        let facts = &request.context.facts;
        let value = match request.item.content_type {
            ContentType::NearbyFacilities => json!({
                "summary": format!("Daily errands are easy around {}.", facts.address),
                "facilities": request
                    .tool_results
                    .iter()
                    .find(|r| r.tool_name == "facility_search")
                    .and_then(|r| r.payload.get("facilities").cloned())
                    .unwrap_or_else(|| json!([])),
            }),
            ContentType::HazardRisk => json!({
                "summary": "Flood and landslide risk are low for this address.",
                "risks": [
                    {"hazard": "flood", "level": "low", "note": "Outside the inundation zone"},
                    {"hazard": "landslide", "level": "low", "note": "No designated slopes nearby"}
                ]
            }),
            ContentType::Neighborhood => json!({
                "heading": format!("Life near {}", facts.nearest_station.as_deref().unwrap_or("the station")),
                "paragraphs": [
                    "Quiet residential streets sit a few minutes from a busy shopping district.",
                    "Parks and schools are within walking distance."
                ]
            }),
            other => {
                return Err(Error::synthesis(format!("no canned copy for {}", other)));
            }
        };

        Ok(Synthesis {
            content: content::validate(request.item.content_type, value)?,
            usage: Some(TokenUsage::new(0, 0)),
        })
    }
}

fn offline_tools() -> ToolRegistry {
    let fixtures: [(&str, Value); 7] = [
        ("crop_image", json!({"image_url": "https://img.example/floor-plan.png"})),
        ("geocode", json!({"lat": 35.6467, "lon": 139.7101})),
        ("render_map", json!({"image_url": "https://tiles.example/ebisu.png"})),
        (
            "transit_route",
            json!({"routes": [
                {"station": "Shibuya", "line": "JR Yamanote", "minutes": 2},
                {"station": "Shinjuku", "line": "JR Yamanote", "minutes": 9}
            ]}),
        ),
        (
            "facility_search",
            json!({"facilities": [
                {"name": "Ebisu Garden Place", "category": "shopping", "distance_m": 650},
                {"name": "Ebisu Park", "category": "park", "distance_m": 300}
            ]}),
        ),
        ("hazard_lookup", json!({"risks": []})),
        (
            "shelter_search",
            json!({"shelters": [
                {"name": "Ebisu Elementary School", "address": "1-1 Ebisu", "distance_m": 450}
            ]}),
        ),
    ];

    fixtures
        .into_iter()
        .fold(ToolRegistry::new(), |registry, (id, payload)| {
            registry.with(Arc::new(StaticTool::new(id, payload)))
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::Pretty)?;

    let orchestrator = DeckOrchestrator::builder()
        .tools(offline_tools())
        .synthesizer(Arc::new(CannedSynthesizer))
        .build()?;

    let mut facts = ListingFacts::new("Maison Ebisu 502", "1-2-3 Ebisu, Shibuya-ku, Tokyo", 45_800_000);
    facts.layout = Some("2LDK".into());
    facts.floor_area_sqm = Some(55.2);
    facts.built_year = Some(2012);
    facts.nearest_station = Some("Ebisu".into());
    let flyer = FlyerImage::new("flyer.png", "image/png", vec![0x89, b'P', b'N', b'G']);

    let mut run = orchestrator.run(DeckInput::new(flyer, facts));
    while let Some(event) = run.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    tracing::info!(run_id = %run.run_id(), usage = ?run.total_usage(), "done");
    Ok(())
}
