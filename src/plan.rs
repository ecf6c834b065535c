//! Deck plan: the fixed, versioned list of slides to generate

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the built-in standard plan
pub const PLAN_VERSION: &str = "2";

/// Kind of slide; determines content shape, tools and rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Cover,
    PropertyOverview,
    FloorPlan,
    AccessMap,
    Transit,
    NearbyFacilities,
    HazardRisk,
    EvacuationShelters,
    Neighborhood,
    LoanSimulation,
    Disclaimer,
    Closing,
}

impl ContentType {
    /// Wire name of the content type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::PropertyOverview => "property_overview",
            Self::FloorPlan => "floor_plan",
            Self::AccessMap => "access_map",
            Self::Transit => "transit",
            Self::NearbyFacilities => "nearby_facilities",
            Self::HazardRisk => "hazard_risk",
            Self::EvacuationShelters => "evacuation_shelters",
            Self::Neighborhood => "neighborhood",
            Self::LoanSimulation => "loan_simulation",
            Self::Disclaimer => "disclaimer",
            Self::Closing => "closing",
        }
    }

    /// Tool ids called, in order, during the tool phase
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            Self::FloorPlan => &["crop_image"],
            Self::AccessMap => &["geocode", "render_map"],
            Self::Transit => &["transit_route"],
            Self::NearbyFacilities => &["facility_search"],
            Self::HazardRisk => &["hazard_lookup"],
            Self::EvacuationShelters => &["shelter_search"],
            Self::Cover
            | Self::PropertyOverview
            | Self::Neighborhood
            | Self::LoanSimulation
            | Self::Disclaimer
            | Self::Closing => &[],
        }
    }

    /// Researched content that tool payloads fully determine
    pub fn is_tool_determined(&self) -> bool {
        matches!(
            self,
            Self::AccessMap | Self::Transit | Self::EvacuationShelters
        )
    }

    /// Instruction handed to a generative synthesizer
    pub fn description(&self) -> &'static str {
        match self {
            Self::Cover => "Title slide with a catchy headline for the property.",
            Self::PropertyOverview => "Key facts of the property as label/value pairs.",
            Self::FloorPlan => "Floor plan image cropped from the flyer with a short caption.",
            Self::AccessMap => "Location map of the property.",
            Self::Transit => "Public transport routes from the property to major stations.",
            Self::NearbyFacilities => {
                "Summary of shops, schools, clinics and parks near the property."
            }
            Self::HazardRisk => {
                "Plain-language summary of flood, landslide and earthquake risk for the address."
            }
            Self::EvacuationShelters => "Designated evacuation shelters near the property.",
            Self::Neighborhood => "Short narrative on what living in the neighborhood is like.",
            Self::LoanSimulation => "Monthly mortgage payment estimate.",
            Self::Disclaimer => "Legal disclaimer.",
            Self::Closing => "Closing slide.",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a slide's data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Facts supplied with the flyer
    Primary,
    /// Free-form generated text
    Generated,
    /// External lookups
    Researched,
    /// Deterministic computation from facts
    Computed,
    /// Fixed template
    Static,
}

/// One planned slide; immutable once the plan is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    /// Position in the deck
    pub index: usize,
    /// Kind of slide
    pub content_type: ContentType,
    /// Slide title
    pub title: String,
    /// Data-source strategy
    pub data_source: DataSource,
}

impl PlanItem {
    /// Create a new plan item
    pub fn new(
        index: usize,
        content_type: ContentType,
        title: impl Into<String>,
        data_source: DataSource,
    ) -> Self {
        Self {
            index,
            content_type,
            title: title.into(),
            data_source,
        }
    }
}

/// A versioned list of plan items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan version
    pub version: String,
    /// Items, ordered by index
    pub items: Vec<PlanItem>,
}

impl Plan {
    /// Create a plan, checking indices are exactly `0..N`
    pub fn new(version: impl Into<String>, mut items: Vec<PlanItem>) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::InvalidPlan("plan has no items".to_string()));
        }

        items.sort_by_key(|item| item.index);
        for (expected, item) in items.iter().enumerate() {
            if item.index != expected {
                return Err(Error::InvalidPlan(format!(
                    "expected index {} but found {} (indices must be contiguous from 0)",
                    expected, item.index
                )));
            }
            if item.title.trim().is_empty() {
                return Err(Error::InvalidPlan(format!("item {} has an empty title", item.index)));
            }
        }

        Ok(Self {
            version: version.into(),
            items,
        })
    }

    /// The standard twelve-slide property deck
    pub fn standard() -> Self {
        use ContentType as C;
        use DataSource as D;

        let items = [
            (C::Cover, "Cover", D::Primary),
            (C::PropertyOverview, "Property Overview", D::Primary),
            (C::FloorPlan, "Floor Plan", D::Primary),
            (C::AccessMap, "Access Map", D::Researched),
            (C::Transit, "Transit", D::Researched),
            (C::NearbyFacilities, "Nearby Facilities", D::Researched),
            (C::HazardRisk, "Hazard Risk", D::Researched),
            (C::EvacuationShelters, "Evacuation Shelters", D::Researched),
            (C::Neighborhood, "The Neighborhood", D::Generated),
            (C::LoanSimulation, "Loan Simulation", D::Computed),
            (C::Disclaimer, "Disclaimer", D::Static),
            (C::Closing, "Thank You", D::Static),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, (content_type, title, source))| {
            PlanItem::new(index, content_type, title, source)
        })
        .collect();

        Self {
            version: PLAN_VERSION.to_string(),
            items,
        }
    }

    /// Load and validate a plan from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: Plan = serde_yaml::from_str(yaml)?;
        Self::new(raw.version, raw.items)
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the plan has no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
