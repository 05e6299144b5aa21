use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::manifest::{PropertyManifest, PropertyStatus, RunManifest, SectionManifest, SectionStatus};
use crate::assembler::{self, AssembledReport, CoverPage, Renderer, SectionSlot};
use crate::cache::{Clock, SharedCacheManager};
use crate::config::{Config, ConfigError, resolve_credential};
use crate::input::{
    self, PropertyRecord, ReportMetadata, ResolvedEnrichment, ValidationErrors,
};
use crate::llm::retry::RetryPolicy;
use crate::llm::{self, LlmClient, Provider};
use crate::sections::generator::{Generated, Origin};
use crate::sections::registry::resolve_selection;
use crate::sections::{GenerationMode, SectionContext, SectionGenerator, SectionScope, SectionSpec};
use crate::store::{ArtifactStore, CacheStore, NewReport, ReportStore, SectionArtifact, StoreError};
use crate::telemetry::metrics::{REPORT_PAGES, REPORT_RUN_DURATION, REPORT_SECTIONS, SECTION_FAILURES};

/// Builds a provider by name from an optional credential.
pub type ProviderFactory = Arc<dyn Fn(&str, Option<&str>) -> Option<Arc<dyn Provider>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Per-run switches.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub sections: Option<Vec<String>>,
    /// Run-time credential override; beats the document and the environment.
    pub api_key: Option<String>,
    pub resume: bool,
    pub skip_invalid_properties: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub llm_provider: String,
    pub llm_model: String,
    pub fallback_provider: String,
    pub fallback_model: String,
    pub env_credential: Option<String>,
    pub fallback_credential: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
    pub max_concurrent_properties: usize,
    pub shared_cache_max_age: chrono::Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            llm_provider: "google".to_string(),
            llm_model: "gemini-2.0-flash".to_string(),
            fallback_provider: String::new(),
            fallback_model: String::new(),
            env_credential: None,
            fallback_credential: None,
            temperature: 0.0,
            max_tokens: 8192,
            retry: RetryPolicy::default(),
            max_concurrent_properties: 4,
            shared_cache_max_age: chrono::Duration::days(30),
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            llm_provider: config.llm_provider.clone(),
            llm_model: config.llm_model.clone(),
            fallback_provider: config.fallback_provider.clone(),
            fallback_model: config.fallback_model.clone(),
            env_credential: config.env_credential(&config.llm_provider).map(str::to_string),
            fallback_credential: config
                .env_credential(&config.fallback_provider)
                .map(str::to_string),
            temperature: config.default_temperature,
            max_tokens: config.default_max_tokens,
            retry: config.retry_policy(),
            max_concurrent_properties: config.max_concurrent_properties,
            shared_cache_max_age: chrono::Duration::days(config.shared_cache_max_age_days),
        }
    }
}

pub struct RunOutcome {
    pub manifest: RunManifest,
    pub reports: Vec<AssembledReport>,
}

/// Long-lived collaborators; each call to [`Pipeline::run`] is one batch.
pub struct Pipeline {
    settings: PipelineSettings,
    providers: ProviderFactory,
    cache_store: Arc<dyn CacheStore>,
    artifacts: Arc<dyn ArtifactStore>,
    reports: Arc<dyn ReportStore>,
    clock: Arc<dyn Clock>,
    renderer: Arc<dyn Renderer>,
}

/// State shared by every task of one run.
struct RunContext {
    run_id: Uuid,
    metadata: ReportMetadata,
    specs: Vec<&'static SectionSpec>,
    generator: SectionGenerator,
    artifacts: Arc<dyn ArtifactStore>,
    renderer: Arc<dyn Renderer>,
    resume: bool,
}

struct PropertyResult {
    index: usize,
    manifest: PropertyManifest,
    report: Option<AssembledReport>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        providers: ProviderFactory,
        cache_store: Arc<dyn CacheStore>,
        artifacts: Arc<dyn ArtifactStore>,
        reports: Arc<dyn ReportStore>,
        clock: Arc<dyn Clock>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            settings,
            providers,
            cache_store,
            artifacts,
            reports,
            clock,
            renderer,
        }
    }

    /// Factory backed by the real provider implementations.
    pub fn default_providers(ollama_base_url: String) -> ProviderFactory {
        Arc::new(move |name, credential| llm::build_provider(name, credential, &ollama_base_url))
    }

    /// Resolves the credential and builds the client, or reports why it
    /// cannot. Runs before any section work starts.
    fn llm_client(&self, options: &RunOptions, metadata: &ReportMetadata) -> Result<LlmClient, ConfigError> {
        let settings = &self.settings;
        let credential = resolve_credential(
            options.api_key.as_deref(),
            metadata.api_key.as_deref(),
            settings.env_credential.as_deref(),
        );
        if credential.is_none() && llm::requires_credential(&settings.llm_provider) {
            return Err(ConfigError::MissingCredential {
                provider: settings.llm_provider.clone(),
            });
        }
        let primary = (self.providers)(&settings.llm_provider, credential.as_deref()).ok_or_else(|| {
            ConfigError::Invalid {
                name: "LLM_PROVIDER",
                value: settings.llm_provider.clone(),
            }
        })?;

        let mut client = LlmClient::new(primary, settings.llm_model.clone());
        client.temperature = settings.temperature;
        client.max_tokens = settings.max_tokens;

        if !settings.fallback_provider.is_empty() && settings.fallback_provider != settings.llm_provider {
            match (self.providers)(&settings.fallback_provider, settings.fallback_credential.as_deref()) {
                Some(fallback) => {
                    client = client.with_fallback(fallback, settings.fallback_model.clone());
                }
                None => tracing::warn!(
                    fallback_provider = %settings.fallback_provider,
                    "Fallback provider unavailable, continuing without it"
                ),
            }
        }
        Ok(client)
    }

    #[tracing::instrument(
        name = "pipeline run",
        skip_all,
        fields(
            run.id = tracing::field::Empty,
            run.properties = tracing::field::Empty,
            run.sections = tracing::field::Empty,
            run.duration_ms = tracing::field::Empty,
        )
    )]
    pub async fn run(&self, raw: &Value, options: RunOptions) -> Result<RunOutcome, RunError> {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = tracing::Span::current();
        span.record("run.id", run_id.to_string());

        let specs = resolve_selection(options.sections.as_deref())?;

        let (request, rejected) = if options.skip_invalid_properties {
            input::validate_partitioned(raw, &specs)?
        } else {
            (input::validate_document(raw, &specs)?, Vec::new())
        };
        for rejected in &rejected {
            tracing::warn!(
                index = rejected.index,
                valuation_id = rejected.valuation_id.as_deref().unwrap_or(""),
                errors = rejected.errors.len(),
                "Skipping invalid property"
            );
        }

        let needs_llm = specs
            .iter()
            .any(|spec| spec.mode == GenerationMode::ExternalGenerated);
        let llm = if needs_llm {
            Some(Arc::new(self.llm_client(&options, &request.metadata)?))
        } else {
            None
        };

        span.record("run.properties", request.properties.len());
        span.record("run.sections", specs.len());

        let shared = Arc::new(SharedCacheManager::new(
            self.cache_store.clone(),
            self.clock.clone(),
            self.settings.shared_cache_max_age,
        ));
        let generator = SectionGenerator::new(llm, self.settings.retry, shared);
        let month_label = generator.month_label().to_string();

        let run = Arc::new(RunContext {
            run_id,
            metadata: request.metadata,
            specs: specs.clone(),
            generator,
            artifacts: self.artifacts.clone(),
            renderer: self.renderer.clone(),
            resume: options.resume,
        });

        tracing::info!(
            run.id = %run_id,
            properties = request.properties.len(),
            sections = specs.len(),
            month = %month_label,
            "Starting report run"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_properties.max(1)));
        let mut tasks = JoinSet::new();
        let mut results: Vec<Option<PropertyResult>> = Vec::new();
        let mut valuation_ids = Vec::new();
        for (index, property) in request.properties.into_iter().enumerate() {
            results.push(None);
            valuation_ids.push(property.valuation_id.clone());
            let run = run.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_property(run, index, property).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    let index = result.index;
                    results[index] = Some(result);
                }
                Err(err) => tracing::error!(error = %err, "Property task aborted"),
            }
        }

        let mut properties = Vec::with_capacity(results.len());
        let mut reports = Vec::new();
        for (slot, valuation_id) in results.into_iter().zip(valuation_ids) {
            match slot {
                Some(result) => {
                    properties.push(result.manifest);
                    if let Some(report) = result.report {
                        reports.push(report);
                    }
                }
                None => properties.push(PropertyManifest {
                    valuation_id,
                    status: PropertyStatus::Failed,
                    report_id: None,
                    page_count: None,
                    sections: Vec::new(),
                    error: Some("property task aborted".to_string()),
                }),
            }
        }

        let mut manifest = RunManifest {
            run_id,
            month_label,
            sections_requested: specs.iter().map(|spec| spec.id).collect(),
            started_at,
            duration_ms: 0,
            properties,
            rejected,
        };

        // Report ids are assigned before persisting so the stored manifest names them.
        let report_ids: Vec<Uuid> = reports.iter().map(|_| Uuid::new_v4()).collect();
        for (report, id) in reports.iter().zip(&report_ids) {
            if let Some(entry) = manifest
                .properties
                .iter_mut()
                .find(|p| p.valuation_id == report.valuation_id)
            {
                entry.report_id = Some(*id);
            }
        }
        manifest.duration_ms = start.elapsed().as_millis() as u64;

        // A report that cannot be stored is still returned; the manifest says why.
        let manifest_json = serde_json::to_value(&manifest).map_err(|err| err.to_string());
        let mut unsaved = Vec::new();
        for (report, id) in reports.iter().zip(&report_ids) {
            let result = match &manifest_json {
                Ok(manifest_json) => self.persist_report(run_id, *id, report, manifest_json).await,
                Err(reason) => Err(StoreError::Unavailable(format!("manifest not serializable: {reason}"))),
            };
            if let Err(err) = result {
                tracing::error!(
                    run.id = %run_id,
                    valuation.id = %report.valuation_id,
                    error = %err,
                    "Failed to persist report"
                );
                unsaved.push((report.valuation_id.clone(), err.to_string()));
            }
        }
        for (valuation_id, reason) in unsaved {
            if let Some(entry) = manifest
                .properties
                .iter_mut()
                .find(|p| p.valuation_id == valuation_id)
            {
                entry.report_id = None;
                entry.error = Some(format!("report not persisted: {reason}"));
            }
        }

        let duration = start.elapsed();
        REPORT_RUN_DURATION.record(duration.as_secs_f64(), &[]);
        span.record("run.duration_ms", duration.as_millis() as i64);

        tracing::info!(
            run.id = %run_id,
            reports = reports.len(),
            failed_sections = manifest.failed_pairs().len(),
            rejected = manifest.rejected.len(),
            duration_ms = duration.as_millis() as u64,
            "Report run finished"
        );

        Ok(RunOutcome { manifest, reports })
    }

    async fn persist_report(
        &self,
        run_id: Uuid,
        id: Uuid,
        report: &AssembledReport,
        manifest: &Value,
    ) -> Result<(), StoreError> {
        let contents = serde_json::to_value(&report.contents)?;
        self.reports
            .insert_report(&NewReport {
                id,
                run_id,
                valuation_id: &report.valuation_id,
                contents: &contents,
                section_order: &report.section_order(),
                limitations: &report.limitations,
                page_count: report.page_count as i32,
                document: &report.document,
                manifest,
            })
            .await?;
        Ok(())
    }
}

#[tracing::instrument(
    name = "pipeline property",
    skip_all,
    fields(valuation.id = %property.valuation_id, report.pages = tracing::field::Empty)
)]
async fn process_property(run: Arc<RunContext>, index: usize, property: PropertyRecord) -> PropertyResult {
    let input_hash = assembler::content_hash(&property);
    // Sections also read the run metadata, so stored artifacts are keyed on both.
    let artifact_hash: Arc<str> = assembler::content_hash(&(&run.metadata, &property)).into();
    let enrichment = Arc::new(input::fallback::resolve(&property));
    let property = Arc::new(property);
    let valuation_id = property.valuation_id.clone();

    let mut sections = JoinSet::new();
    for (position, spec) in run.specs.iter().copied().enumerate() {
        let run = run.clone();
        let property = property.clone();
        let enrichment = enrichment.clone();
        let artifact_hash = artifact_hash.clone();
        sections.spawn(async move {
            let (slot, manifest) =
                generate_section(&run, spec, &property, &enrichment, &artifact_hash).await;
            (position, slot, manifest)
        });
    }

    let mut slots: Vec<(&'static SectionSpec, SectionSlot)> = run
        .specs
        .iter()
        .map(|spec| (*spec, SectionSlot::Failed("section task aborted".to_string())))
        .collect();
    let mut manifests: Vec<SectionManifest> = run
        .specs
        .iter()
        .map(|spec| SectionManifest::aborted(spec.id, "section task aborted"))
        .collect();

    while let Some(joined) = sections.join_next().await {
        match joined {
            Ok((position, slot, manifest)) => {
                slots[position].1 = slot;
                manifests[position] = manifest;
            }
            Err(err) => tracing::error!(error = %err, "Section task aborted"),
        }
    }

    let cover = CoverPage::for_property(&run.metadata, &property, &enrichment);
    let failed = manifests
        .iter()
        .any(|m| m.status == SectionStatus::Failed);

    match assembler::assemble(run.renderer.as_ref(), &cover, &slots, &input_hash) {
        Ok(report) => {
            REPORT_PAGES.record(report.page_count as f64, &[]);
            REPORT_SECTIONS.record(report.contents.len() as f64, &[]);
            tracing::Span::current().record("report.pages", report.page_count as i64);
            PropertyResult {
                index,
                manifest: PropertyManifest {
                    valuation_id,
                    status: if failed {
                        PropertyStatus::Degraded
                    } else {
                        PropertyStatus::Complete
                    },
                    report_id: None,
                    page_count: Some(report.page_count),
                    sections: manifests,
                    error: None,
                },
                report: Some(report),
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "Report assembly failed");
            PropertyResult {
                index,
                manifest: PropertyManifest {
                    valuation_id,
                    status: PropertyStatus::Failed,
                    report_id: None,
                    page_count: None,
                    sections: manifests,
                    error: Some(err.to_string()),
                },
                report: None,
            }
        }
    }
}

async fn generate_section(
    run: &RunContext,
    spec: &'static SectionSpec,
    property: &PropertyRecord,
    enrichment: &ResolvedEnrichment,
    input_hash: &str,
) -> (SectionSlot, SectionManifest) {
    if run.resume
        && spec.scope == SectionScope::Property
        && let Some(resumed) = resume_artifact(run, spec, &property.valuation_id, input_hash).await
    {
        let manifest = SectionManifest::succeeded(spec.id, &resumed);
        return (SectionSlot::Ready(resumed.output), manifest);
    }

    let ctx = SectionContext::new(&run.metadata, property, enrichment);
    match run.generator.generate(spec, &ctx).await {
        Ok(generated) => {
            let artifact = SectionArtifact {
                section_id: spec.id,
                valuation_id: property.valuation_id.clone(),
                input_hash: input_hash.to_string(),
                payload: generated.output.as_ref().clone(),
                updated_at: Utc::now(),
            };
            let mut manifest = SectionManifest::succeeded(spec.id, &generated);
            if let Err(err) = run.artifacts.put_artifact(&artifact).await {
                tracing::warn!(section.id = %spec.id, error = %err, "Failed to persist section artifact");
                manifest.warnings.push(format!("section artifact not persisted: {err}"));
            }
            (SectionSlot::Ready(generated.output), manifest)
        }
        Err(err) => {
            SECTION_FAILURES.add(1, &[KeyValue::new("section.id", spec.id.as_str())]);
            tracing::error!(
                run.id = %run.run_id,
                section.id = %spec.id,
                valuation.id = %property.valuation_id,
                error = %err,
                "Section generation failed"
            );
            (SectionSlot::Failed(err.to_string()), SectionManifest::failed(spec.id, &err))
        }
    }
}

/// A previously persisted artifact, if it was built from the same input and
/// is still valid for this build.
async fn resume_artifact(
    run: &RunContext,
    spec: &'static SectionSpec,
    valuation_id: &str,
    input_hash: &str,
) -> Option<Generated> {
    let artifact = match run.artifacts.get_artifact(spec.id, valuation_id).await {
        Ok(found) => found?,
        Err(err) => {
            tracing::warn!(section.id = %spec.id, error = %err, "Artifact lookup failed, regenerating");
            return None;
        }
    };
    if artifact.input_hash != input_hash {
        tracing::info!(section.id = %spec.id, "Input changed since the artifact was stored, regenerating");
        return None;
    }
    if let Err(err) = artifact.payload.validate() {
        tracing::info!(section.id = %spec.id, error = %err, "Stored artifact is no longer valid, regenerating");
        return None;
    }
    Some(Generated {
        output: Arc::new(artifact.payload),
        origin: Origin::Resumed,
        warning: None,
    })
}
