use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::external::{ExternalInput, ExternalSection};
use super::registry::{GenerationMode, SectionId, SectionScope, SectionSpec};
use super::schema::SchemaViolation;
use super::{SectionOutput, instructions, neighbourhood, valuation_quality};
use crate::cache::{CacheStatus, SharedCacheManager};
use crate::input::fallback::ResolvedEnrichment;
use crate::input::model::{PropertyRecord, ReportMetadata};
use crate::llm::LlmClient;
use crate::llm::retry::RetryPolicy;

/// Everything a section may read for one property.
#[derive(Clone, Copy)]
pub struct SectionContext<'a> {
    pub metadata: &'a ReportMetadata,
    pub property: &'a PropertyRecord,
    pub enrichment: &'a ResolvedEnrichment,
}

impl<'a> SectionContext<'a> {
    pub fn new(
        metadata: &'a ReportMetadata,
        property: &'a PropertyRecord,
        enrichment: &'a ResolvedEnrichment,
    ) -> Self {
        Self {
            metadata,
            property,
            enrichment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("provider call failed: {0}")]
    Transport(String),

    #[error("reply is not valid JSON: {0}")]
    Parse(String),

    #[error(transparent)]
    Schema(#[from] SchemaViolation),

    #[error("no language model configured for section {0}")]
    MissingCredential(SectionId),

    #[error("shared cache write failed: {0}")]
    CacheWrite(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Transport(_) => "transport",
            GenerationError::Parse(_) => "parse",
            GenerationError::Schema(_) => "schema",
            GenerationError::MissingCredential(_) => "missing_credential",
            GenerationError::CacheWrite(_) => "cache_write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSection {
    Instructions,
    Neighbourhood,
    ValuationQuality,
}

impl LocalSection {
    pub fn build(&self, ctx: &SectionContext<'_>) -> SectionOutput {
        match self {
            LocalSection::Instructions => instructions::build(ctx),
            LocalSection::Neighbourhood => neighbourhood::build(ctx),
            LocalSection::ValuationQuality => valuation_quality::build(ctx),
        }
    }
}

/// Dispatch target for a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Local(LocalSection),
    External(ExternalSection),
}

impl SectionKind {
    pub fn for_spec(spec: &SectionSpec) -> Self {
        match spec.id {
            SectionId::Instructions => SectionKind::Local(LocalSection::Instructions),
            SectionId::NeighbourhoodOverview => SectionKind::Local(LocalSection::Neighbourhood),
            SectionId::ValuationQuality => SectionKind::Local(LocalSection::ValuationQuality),
            SectionId::PropertyOverview => SectionKind::External(ExternalSection::PropertyOverview),
            SectionId::MarketCommentary => SectionKind::External(ExternalSection::MarketCommentary),
            SectionId::ValuationMethodology => {
                SectionKind::External(ExternalSection::ValuationMethodology)
            }
            SectionId::LocationAnalysis => SectionKind::External(ExternalSection::LocationAnalysis),
            SectionId::Infrastructure => SectionKind::External(ExternalSection::Infrastructure),
            SectionId::Safety => SectionKind::External(ExternalSection::Safety),
        }
    }

    pub fn mode(&self) -> GenerationMode {
        match self {
            SectionKind::Local(_) => GenerationMode::LocalDeterministic,
            SectionKind::External(_) => GenerationMode::ExternalGenerated,
        }
    }
}

/// How a section result came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Computed,
    Generated,
    CacheHit,
    SharedInRun,
    Resumed,
}

impl From<CacheStatus> for Origin {
    fn from(status: CacheStatus) -> Self {
        match status {
            CacheStatus::Hit => Origin::CacheHit,
            CacheStatus::Generated => Origin::Generated,
            CacheStatus::Reused => Origin::SharedInRun,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Generated {
    pub output: Arc<SectionOutput>,
    pub origin: Origin,
    /// A non-fatal problem, such as a shared entry that could not be persisted.
    pub warning: Option<GenerationError>,
}

pub struct SectionGenerator {
    llm: Option<Arc<LlmClient>>,
    retry: RetryPolicy,
    shared: Arc<SharedCacheManager>,
    month_label: String,
}

impl SectionGenerator {
    /// `llm` may be absent when no model-written section was requested.
    pub fn new(llm: Option<Arc<LlmClient>>, retry: RetryPolicy, shared: Arc<SharedCacheManager>) -> Self {
        let month_label = shared.month_label();
        Self {
            llm,
            retry,
            shared,
            month_label,
        }
    }

    pub fn month_label(&self) -> &str {
        &self.month_label
    }

    #[tracing::instrument(
        name = "pipeline_stage section",
        skip_all,
        fields(
            section.id = %spec.id,
            section.mode = ?spec.mode,
            valuation.id = %ctx.property.valuation_id,
            section.origin = tracing::field::Empty,
        )
    )]
    pub async fn generate(
        &self,
        spec: &'static SectionSpec,
        ctx: &SectionContext<'_>,
    ) -> Result<Generated, GenerationError> {
        let external = match SectionKind::for_spec(spec) {
            SectionKind::Local(local) => {
                let output = local.build(ctx);
                output.validate()?;
                return Ok(self.finish(Arc::new(output), Origin::Computed, None));
            }
            SectionKind::External(external) => external,
        };

        let client = self
            .llm
            .as_deref()
            .ok_or(GenerationError::MissingCredential(spec.id))?;

        match spec.scope {
            SectionScope::Month => {
                let month = self.month_label.as_str();
                let lookup = self
                    .shared
                    .get_or_generate(spec.id, month, || {
                        external.generate(client, &self.retry, ExternalInput::Month(month))
                    })
                    .await?;
                Ok(self.finish(lookup.output, lookup.status.into(), lookup.write_error))
            }
            SectionScope::Property => {
                let output = external
                    .generate(client, &self.retry, ExternalInput::Property(ctx))
                    .await?;
                Ok(self.finish(Arc::new(output), Origin::Generated, None))
            }
        }
    }

    fn finish(
        &self,
        output: Arc<SectionOutput>,
        origin: Origin,
        warning: Option<GenerationError>,
    ) -> Generated {
        tracing::Span::current().record("section.origin", format!("{origin:?}").as_str());
        Generated {
            output,
            origin,
            warning,
        }
    }
}
