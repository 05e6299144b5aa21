use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::schema::OutputSchema;
use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionId {
    Instructions,
    PropertyOverview,
    NeighbourhoodOverview,
    MarketCommentary,
    ValuationMethodology,
    LocationAnalysis,
    Infrastructure,
    Safety,
    ValuationQuality,
}

impl SectionId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionId::Instructions => "instructions",
            SectionId::PropertyOverview => "property_overview",
            SectionId::NeighbourhoodOverview => "neighbourhood_overview",
            SectionId::MarketCommentary => "market_commentary",
            SectionId::ValuationMethodology => "valuation_methodology",
            SectionId::LocationAnalysis => "location_analysis",
            SectionId::Infrastructure => "infrastructure",
            SectionId::Safety => "safety",
            SectionId::ValuationQuality => "valuation_quality",
        }
    }

    /// Variants are declared in registry order, so the discriminant indexes it.
    pub fn spec(&self) -> &'static SectionSpec {
        &REGISTRY[*self as usize]
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(s)
            .map(|spec| spec.id)
            .ok_or_else(|| ConfigError::UnknownSection(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    ExternalGenerated,
    LocalDeterministic,
}

/// Whether a section is produced per property or once per calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionScope {
    Property,
    Month,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSpec {
    pub id: SectionId,
    pub title: &'static str,
    pub mode: GenerationMode,
    pub scope: SectionScope,
    /// Paths into a property record that must be present (arrays non-empty).
    pub required_fields: &'static [&'static str],
    pub output_schema: OutputSchema,
    pub version: &'static str,
    pub in_default_set: bool,
}

pub const COMPARABLES_PATH: &str = "property_data.correction_layer.knn_comparables";

impl SectionSpec {
    pub fn is_valuation_dependent(&self) -> bool {
        self.required_fields.contains(&COMPARABLES_PATH)
    }
}

/// Declared order. Assembly always follows this order.
static REGISTRY: [SectionSpec; 9] = [
    SectionSpec {
        id: SectionId::Instructions,
        title: "Instructions",
        mode: GenerationMode::LocalDeterministic,
        scope: SectionScope::Property,
        required_fields: &["address.postcode"],
        output_schema: OutputSchema::Instructions,
        version: "v1",
        in_default_set: true,
    },
    SectionSpec {
        id: SectionId::PropertyOverview,
        title: "The Property",
        mode: GenerationMode::ExternalGenerated,
        scope: SectionScope::Property,
        required_fields: &[
            "property_data.total_size_sqm",
            "property_data.number_of_bedrooms",
            "property_data.property_type_standardized",
            "property_data.tenure",
        ],
        output_schema: OutputSchema::PropertyOverview,
        version: "v1",
        in_default_set: true,
    },
    SectionSpec {
        id: SectionId::NeighbourhoodOverview,
        title: "Neighbourhood and Location Overview",
        mode: GenerationMode::LocalDeterministic,
        scope: SectionScope::Property,
        required_fields: &["address.postcode"],
        output_schema: OutputSchema::NeighbourhoodOverview,
        version: "v1",
        in_default_set: true,
    },
    SectionSpec {
        id: SectionId::MarketCommentary,
        title: "Market Commentary",
        mode: GenerationMode::ExternalGenerated,
        scope: SectionScope::Month,
        required_fields: &[],
        output_schema: OutputSchema::MarketCommentary,
        version: "v1",
        in_default_set: true,
    },
    SectionSpec {
        id: SectionId::ValuationMethodology,
        title: "Valuation Methodology and Comparable Evidence",
        mode: GenerationMode::ExternalGenerated,
        scope: SectionScope::Property,
        required_fields: &["property_data.correction_layer.final_price", COMPARABLES_PATH],
        output_schema: OutputSchema::ValuationMethodology,
        version: "v1",
        in_default_set: true,
    },
    SectionSpec {
        id: SectionId::LocationAnalysis,
        title: "Location Analysis",
        mode: GenerationMode::ExternalGenerated,
        scope: SectionScope::Property,
        required_fields: &["address.postcode"],
        output_schema: OutputSchema::Narrative,
        version: "v1",
        in_default_set: false,
    },
    SectionSpec {
        id: SectionId::Infrastructure,
        title: "Infrastructure",
        mode: GenerationMode::ExternalGenerated,
        scope: SectionScope::Property,
        required_fields: &["address.postcode"],
        output_schema: OutputSchema::Narrative,
        version: "v1",
        in_default_set: false,
    },
    SectionSpec {
        id: SectionId::Safety,
        title: "Safety",
        mode: GenerationMode::ExternalGenerated,
        scope: SectionScope::Property,
        required_fields: &["address.postcode"],
        output_schema: OutputSchema::Narrative,
        version: "v1",
        in_default_set: false,
    },
    SectionSpec {
        id: SectionId::ValuationQuality,
        title: "Valuation Quality",
        mode: GenerationMode::LocalDeterministic,
        scope: SectionScope::Property,
        required_fields: &["property_data.total_size_sqm", COMPARABLES_PATH],
        output_schema: OutputSchema::ValuationQuality,
        version: "v1",
        in_default_set: false,
    },
];

pub fn lookup(section_id: &str) -> Option<&'static SectionSpec> {
    REGISTRY
        .iter()
        .find(|spec| spec.id.as_str() == section_id.trim())
}

/// Default pipeline, in declared order.
pub fn all_default_sections() -> Vec<&'static SectionSpec> {
    REGISTRY.iter().filter(|spec| spec.in_default_set).collect()
}

/// Every registered section, in declared order.
pub fn all_sections() -> &'static [SectionSpec] {
    &REGISTRY
}

/// Position of a section in the declared order.
pub fn declared_position(id: SectionId) -> usize {
    id as usize
}

/// Resolves a run's section selection. `None` or an empty list means the
/// default set. Duplicates collapse; the result is in declared order.
pub fn resolve_selection(requested: Option<&[String]>) -> Result<Vec<&'static SectionSpec>, ConfigError> {
    let Some(requested) = requested.filter(|ids| !ids.is_empty()) else {
        return Ok(all_default_sections());
    };

    let mut ids = Vec::with_capacity(requested.len());
    for raw in requested {
        let id: SectionId = raw.parse()?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    ids.sort_by_key(|id| declared_position(*id));
    Ok(ids.into_iter().map(|id| id.spec()).collect())
}

/// 1-based display number within a report's own section list.
pub fn display_title(spec: &SectionSpec, number: usize) -> String {
    format!("{number}. {}", spec.title)
}
