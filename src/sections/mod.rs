pub mod comparables;
pub mod external;
pub mod generator;
pub mod instructions;
pub mod neighbourhood;
pub mod parse;
pub mod registry;
pub mod schema;
pub mod valuation_quality;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use generator::{GenerationError, SectionContext, SectionGenerator};
pub use registry::{GenerationMode, SectionId, SectionScope, SectionSpec};
pub use schema::SchemaViolation;

/// Provider marker for sections computed locally.
pub const DETERMINISTIC_PROVIDER: &str = "deterministic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: String,
    pub model_name: String,
}

/// Common envelope for every section, whichever path produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionOutput {
    pub section_id: SectionId,
    pub version: String,
    pub provenance: Provenance,
    pub data: Value,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
}

impl SectionOutput {
    pub fn deterministic(
        spec: &SectionSpec,
        model_name: &str,
        data: Value,
        assumptions: Vec<String>,
        limitations: Vec<String>,
    ) -> Self {
        Self {
            section_id: spec.id,
            version: spec.version.to_string(),
            provenance: Provenance {
                provider: DETERMINISTIC_PROVIDER.to_string(),
                model_name: model_name.to_string(),
            },
            data,
            assumptions,
            limitations,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        self.provenance.provider == DETERMINISTIC_PROVIDER
    }

    /// Checks `data` against the schema its registry entry names, and that
    /// the version tag is current.
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        let spec = self.section_id.spec();
        spec.output_schema.validate(&self.data)?;
        if self.version != spec.version {
            return Err(SchemaViolation {
                schema: spec.output_schema.id(),
                violations: vec![format!(
                    "version: expected {}, found {}",
                    spec.version, self.version
                )],
            });
        }
        Ok(())
    }
}
