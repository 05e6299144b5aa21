use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::input::RejectedProperty;
use crate::sections::generator::{GenerationError, Generated, Origin};
use crate::sections::SectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Succeeded,
    Reused,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionManifest {
    pub section_id: SectionId,
    pub status: SectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal problems, e.g. a result that could not be persisted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SectionManifest {
    pub fn succeeded(section_id: SectionId, generated: &Generated) -> Self {
        let status = match generated.origin {
            Origin::Computed | Origin::Generated => SectionStatus::Succeeded,
            Origin::CacheHit | Origin::SharedInRun | Origin::Resumed => SectionStatus::Reused,
        };
        Self {
            section_id,
            status,
            origin: Some(generated.origin),
            provider: Some(generated.output.provenance.provider.clone()),
            model_name: Some(generated.output.provenance.model_name.clone()),
            error_kind: None,
            error: None,
            warnings: generated
                .warning
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    pub fn failed(section_id: SectionId, error: &GenerationError) -> Self {
        Self {
            section_id,
            status: SectionStatus::Failed,
            origin: None,
            provider: None,
            model_name: None,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn aborted(section_id: SectionId, reason: &str) -> Self {
        Self {
            section_id,
            status: SectionStatus::Failed,
            origin: None,
            provider: None,
            model_name: None,
            error_kind: Some("aborted"),
            error: Some(reason.to_string()),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    /// Every requested section produced real content.
    Complete,
    /// Assembled with at least one placeholder.
    Degraded,
    /// No report could be assembled.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyManifest {
    pub valuation_id: String,
    pub status: PropertyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    pub sections: Vec<SectionManifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub month_label: String,
    pub sections_requested: Vec<SectionId>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub properties: Vec<PropertyManifest>,
    pub rejected: Vec<RejectedProperty>,
}

impl RunManifest {
    /// `(valuation_id, section_id)` pairs to re-run.
    pub fn failed_pairs(&self) -> Vec<(&str, SectionId)> {
        self.properties
            .iter()
            .flat_map(|property| {
                property
                    .sections
                    .iter()
                    .filter(|section| section.status == SectionStatus::Failed)
                    .map(|section| (property.valuation_id.as_str(), section.section_id))
            })
            .collect()
    }

    pub fn property(&self, valuation_id: &str) -> Option<&PropertyManifest> {
        self.properties
            .iter()
            .find(|property| property.valuation_id == valuation_id)
    }

    pub fn section(&self, valuation_id: &str, section_id: SectionId) -> Option<&SectionManifest> {
        self.property(valuation_id)?
            .sections
            .iter()
            .find(|section| section.section_id == section_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::sections::SectionOutput;

    fn generated(origin: Origin, warning: Option<GenerationError>) -> Generated {
        Generated {
            output: Arc::new(SectionOutput::deterministic(
                SectionId::Instructions.spec(),
                "templates/instructions.txt",
                json!({}),
                vec![],
                vec![],
            )),
            origin,
            warning,
        }
    }

    #[test]
    fn test_reused_origins_map_to_reused() {
        for origin in [Origin::CacheHit, Origin::SharedInRun, Origin::Resumed] {
            let entry = SectionManifest::succeeded(SectionId::Instructions, &generated(origin, None));
            assert_eq!(entry.status, SectionStatus::Reused);
        }
        let entry = SectionManifest::succeeded(SectionId::Instructions, &generated(Origin::Computed, None));
        assert_eq!(entry.status, SectionStatus::Succeeded);
        assert_eq!(entry.provider.as_deref(), Some("deterministic"));
    }

    #[test]
    fn test_cache_write_warning_recorded() {
        let warning = GenerationError::CacheWrite("connection reset".to_string());
        let entry = SectionManifest::succeeded(
            SectionId::MarketCommentary,
            &generated(Origin::Generated, Some(warning)),
        );
        assert_eq!(entry.warnings, vec!["shared cache write failed: connection reset".to_string()]);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failed_pairs() {
        let manifest = RunManifest {
            run_id: Uuid::nil(),
            month_label: "January 2026".to_string(),
            sections_requested: vec![SectionId::Instructions, SectionId::PropertyOverview],
            started_at: Utc::now(),
            duration_ms: 10,
            properties: vec![PropertyManifest {
                valuation_id: "v02".to_string(),
                status: PropertyStatus::Degraded,
                report_id: None,
                page_count: Some(5),
                sections: vec![
                    SectionManifest::succeeded(SectionId::Instructions, &generated(Origin::Computed, None)),
                    SectionManifest::failed(
                        SectionId::PropertyOverview,
                        &GenerationError::Transport("timeout".to_string()),
                    ),
                ],
                error: None,
            }],
            rejected: vec![],
        };

        assert_eq!(manifest.failed_pairs(), vec![("v02", SectionId::PropertyOverview)]);
        let failed = manifest.section("v02", SectionId::PropertyOverview).unwrap();
        assert_eq!(failed.error_kind, Some("transport"));
        assert!(manifest.section("v09", SectionId::Instructions).is_none());
    }
}
