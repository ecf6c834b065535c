//! Structured slide content and its shape validation
//!
//! Every synthesized slide body, whether built directly from tool payloads or
//! produced by a model, passes through [`validate`]. The JSON Schema for each
//! content type is derived from the Rust shape with `schemars`, checked with
//! `jsonschema`, and then deserialized into the typed variant.

use crate::error::{Error, Result};
use crate::plan::ContentType;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Title slide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoverContent {
    #[schemars(length(min = 1))]
    pub headline: String,
    pub subheadline: String,
    #[schemars(length(min = 1))]
    pub price_label: String,
    pub issued_on: String,
}

/// Label/value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Fact {
    #[schemars(length(min = 1))]
    pub label: String,
    pub value: String,
}

/// Key facts of the property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverviewContent {
    #[schemars(length(min = 1))]
    pub facts: Vec<Fact>,
}

/// Floor plan cropped from the flyer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FloorPlanContent {
    #[schemars(length(min = 1))]
    pub image_url: String,
    pub caption: String,
}

/// Location map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AccessMapContent {
    #[schemars(length(min = 1))]
    pub address: String,
    #[schemars(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[schemars(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[schemars(length(min = 1))]
    pub map_image_url: String,
}

/// One public transport route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitRoute {
    #[schemars(length(min = 1))]
    pub station: String,
    pub line: String,
    pub minutes: u32,
}

/// Transit routes from the property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitContent {
    #[schemars(length(min = 1))]
    pub routes: Vec<TransitRoute>,
}

/// A nearby facility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Facility {
    #[schemars(length(min = 1))]
    pub name: String,
    pub category: String,
    pub distance_m: u32,
}

/// Nearby facilities with a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FacilitiesContent {
    #[schemars(length(min = 1))]
    pub summary: String,
    pub facilities: Vec<Facility>,
}

/// Risk level for a single hazard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Unknown,
}

impl RiskLevel {
    /// Wire name of the level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Unknown => "unknown",
        }
    }
}

/// One hazard assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RiskEntry {
    #[schemars(length(min = 1))]
    pub hazard: String,
    pub level: RiskLevel,
    pub note: String,
}

/// Hazard risk summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HazardContent {
    #[schemars(length(min = 1))]
    pub summary: String,
    #[schemars(length(min = 1))]
    pub risks: Vec<RiskEntry>,
}

/// An evacuation shelter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Shelter {
    #[schemars(length(min = 1))]
    pub name: String,
    pub address: String,
    pub distance_m: u32,
}

/// Nearby evacuation shelters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SheltersContent {
    #[schemars(length(min = 1))]
    pub shelters: Vec<Shelter>,
}

/// Neighborhood narrative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NeighborhoodContent {
    #[schemars(length(min = 1))]
    pub heading: String,
    #[schemars(length(min = 1))]
    pub paragraphs: Vec<String>,
}

/// Mortgage estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoanContent {
    #[schemars(length(min = 1))]
    pub currency: String,
    pub principal: u64,
    pub down_payment: u64,
    #[schemars(range(min = 0.0, max = 100.0))]
    pub annual_rate_pct: f64,
    #[schemars(range(min = 1, max = 60))]
    pub years: u32,
    pub monthly_payment: u64,
}

/// Validated slide body, one variant per synthesizable content type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "contentType", content = "data", rename_all = "snake_case")]
pub enum SlideContent {
    Cover(CoverContent),
    PropertyOverview(OverviewContent),
    FloorPlan(FloorPlanContent),
    AccessMap(AccessMapContent),
    Transit(TransitContent),
    NearbyFacilities(FacilitiesContent),
    HazardRisk(HazardContent),
    EvacuationShelters(SheltersContent),
    Neighborhood(NeighborhoodContent),
    LoanSimulation(LoanContent),
}

impl SlideContent {
    /// Content type of this body
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Cover(_) => ContentType::Cover,
            Self::PropertyOverview(_) => ContentType::PropertyOverview,
            Self::FloorPlan(_) => ContentType::FloorPlan,
            Self::AccessMap(_) => ContentType::AccessMap,
            Self::Transit(_) => ContentType::Transit,
            Self::NearbyFacilities(_) => ContentType::NearbyFacilities,
            Self::HazardRisk(_) => ContentType::HazardRisk,
            Self::EvacuationShelters(_) => ContentType::EvacuationShelters,
            Self::Neighborhood(_) => ContentType::Neighborhood,
            Self::LoanSimulation(_) => ContentType::LoanSimulation,
        }
    }
}

/// Fixed template stand-in for slides that skip synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateMarker {
    pub content_type: ContentType,
}

/// What the renderer receives for one slide
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideBody {
    /// Validated synthesized content
    Content(SlideContent),
    /// Static template
    Template(TemplateMarker),
}

/// JSON Schema for a content type; `None` for template-only types
pub fn schema(content_type: ContentType) -> Option<Value> {
    let root = match content_type {
        ContentType::Cover => schemars::schema_for!(CoverContent),
        ContentType::PropertyOverview => schemars::schema_for!(OverviewContent),
        ContentType::FloorPlan => schemars::schema_for!(FloorPlanContent),
        ContentType::AccessMap => schemars::schema_for!(AccessMapContent),
        ContentType::Transit => schemars::schema_for!(TransitContent),
        ContentType::NearbyFacilities => schemars::schema_for!(FacilitiesContent),
        ContentType::HazardRisk => schemars::schema_for!(HazardContent),
        ContentType::EvacuationShelters => schemars::schema_for!(SheltersContent),
        ContentType::Neighborhood => schemars::schema_for!(NeighborhoodContent),
        ContentType::LoanSimulation => schemars::schema_for!(LoanContent),
        ContentType::Disclaimer | ContentType::Closing => return None,
    };
    serde_json::to_value(root).ok()
}

/// Check `value` against the shape for `content_type` and convert it.
///
/// Fails closed: anything that does not match the schema is an error.
pub fn validate(content_type: ContentType, value: Value) -> Result<SlideContent> {
    match content_type {
        ContentType::Cover => check(content_type, value).map(SlideContent::Cover),
        ContentType::PropertyOverview => {
            check(content_type, value).map(SlideContent::PropertyOverview)
        }
        ContentType::FloorPlan => check(content_type, value).map(SlideContent::FloorPlan),
        ContentType::AccessMap => check(content_type, value).map(SlideContent::AccessMap),
        ContentType::Transit => check(content_type, value).map(SlideContent::Transit),
        ContentType::NearbyFacilities => {
            check(content_type, value).map(SlideContent::NearbyFacilities)
        }
        ContentType::HazardRisk => check(content_type, value).map(SlideContent::HazardRisk),
        ContentType::EvacuationShelters => {
            check(content_type, value).map(SlideContent::EvacuationShelters)
        }
        ContentType::Neighborhood => check(content_type, value).map(SlideContent::Neighborhood),
        ContentType::LoanSimulation => {
            check(content_type, value).map(SlideContent::LoanSimulation)
        }
        ContentType::Disclaimer | ContentType::Closing => Err(Error::validation(
            content_type.as_str(),
            "template-only content type has no synthesized shape",
        )),
    }
}

fn check<T>(content_type: ContentType, value: Value) -> Result<T>
where
    T: JsonSchema + DeserializeOwned,
{
    let schema = serde_json::to_value(schemars::schema_for!(T))?;
    let validator = jsonschema::validator_for(&schema).map_err(|e| {
        Error::validation(content_type.as_str(), format!("schema did not compile: {}", e))
    })?;

    if !validator.is_valid(&value) {
        // serde usually names the offending field; fall back to a generic message
        let message = match serde_json::from_value::<T>(value) {
            Err(e) => e.to_string(),
            Ok(_) => "value violates schema constraints".to_string(),
        };
        return Err(Error::validation(content_type.as_str(), message));
    }

    serde_json::from_value(value).map_err(|e| Error::validation(content_type.as_str(), e.to_string()))
}
