//! Sections written by the language model.
//!
//! Every attempt runs the whole call, parse, finalize, validate sequence, so
//! a malformed reply is retried exactly like a transport failure.

use serde_json::{Value, json};

use super::comparables;
use super::generator::{GenerationError, SectionContext};
use super::parse::parse_reply;
use super::registry::{SectionId, SectionSpec};
use super::{Provenance, SectionOutput};
use crate::input::fallback::EnrichmentCategory;
use crate::llm::retry::RetryPolicy;
use crate::llm::{GenerateRequest, LlmClient};

const BASE_SYSTEM: &str = include_str!("../../data/prompts/base_system.txt");
const PROPERTY_OVERVIEW_RULES: &str = include_str!("../../data/prompts/property_overview.txt");
const MARKET_COMMENTARY_RULES: &str = include_str!("../../data/prompts/market_commentary.txt");
const VALUATION_METHODOLOGY_RULES: &str =
    include_str!("../../data/prompts/valuation_methodology.txt");
const NARRATIVE_RULES: &str = include_str!("../../data/prompts/narrative.txt");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalSection {
    PropertyOverview,
    MarketCommentary,
    ValuationMethodology,
    LocationAnalysis,
    Infrastructure,
    Safety,
}

/// What a call is generated from: one property, or only the month for
/// month-scoped sections.
#[derive(Clone, Copy)]
pub enum ExternalInput<'a> {
    Property(&'a SectionContext<'a>),
    Month(&'a str),
}

impl ExternalSection {
    pub fn id(&self) -> SectionId {
        match self {
            ExternalSection::PropertyOverview => SectionId::PropertyOverview,
            ExternalSection::MarketCommentary => SectionId::MarketCommentary,
            ExternalSection::ValuationMethodology => SectionId::ValuationMethodology,
            ExternalSection::LocationAnalysis => SectionId::LocationAnalysis,
            ExternalSection::Infrastructure => SectionId::Infrastructure,
            ExternalSection::Safety => SectionId::Safety,
        }
    }

    fn spec(&self) -> &'static SectionSpec {
        self.id().spec()
    }

    /// Enrichment the narrative draws on; its fallbacks become limitations.
    fn categories(&self) -> &'static [EnrichmentCategory] {
        match self {
            ExternalSection::LocationAnalysis => &[
                EnrichmentCategory::Transport,
                EnrichmentCategory::Amenities,
                EnrichmentCategory::Schools,
                EnrichmentCategory::Commute,
            ],
            ExternalSection::Infrastructure => &[
                EnrichmentCategory::Transport,
                EnrichmentCategory::Commute,
                EnrichmentCategory::Solar,
            ],
            ExternalSection::Safety => &[EnrichmentCategory::Crime, EnrichmentCategory::AirQuality],
            _ => &[],
        }
    }

    pub fn system_prompt(&self) -> String {
        let rules = match self {
            ExternalSection::PropertyOverview => PROPERTY_OVERVIEW_RULES,
            ExternalSection::MarketCommentary => MARKET_COMMENTARY_RULES,
            ExternalSection::ValuationMethodology => VALUATION_METHODOLOGY_RULES,
            _ => NARRATIVE_RULES,
        };
        format!("{}\n\nSECTION-SPECIFIC RULES:\n{}", BASE_SYSTEM.trim(), rules.trim())
    }

    pub fn user_prompt(&self, input: ExternalInput<'_>) -> String {
        let ctx = match input {
            ExternalInput::Month(label) => {
                return format!(
                    "Generate the {} section for valuation reports issued in {label}.\n\
                     Month: {label}\n\
                     Reply with the JSON object only.",
                    self.spec().title
                );
            }
            ExternalInput::Property(ctx) => ctx,
        };

        let property = ctx.property;
        let data = &property.property_data;
        let input_json = match self {
            ExternalSection::PropertyOverview => json!({
                "address": property.address.one_line(),
                "property_type": comparables::property_type_name(&data.property_type_standardized),
                "tenure": comparables::tenure_name(&data.tenure),
                "total_size_sqm": data.total_size_sqm,
                "total_size_sqft": (data.total_size_sqm * comparables::SQFT_PER_SQM).round(),
                "number_of_bedrooms": data.number_of_bedrooms,
                "features": data.features,
                "epc": data.epc,
                "last_sale_price": data.correction_layer.last_sale_price,
                "last_sale_date": data.correction_layer.last_sale_date,
            }),
            ExternalSection::ValuationMethodology => {
                let rows = comparables::rows(data);
                let mut table_data = vec![
                    comparables::TABLE_HEADERS
                        .iter()
                        .map(|h| h.to_string())
                        .collect::<Vec<_>>(),
                ];
                table_data.extend(rows.iter().map(comparables::ComparableRow::cells));
                json!({
                    "subject_property": {
                        "address": property.address.one_line(),
                        "property_type": comparables::property_type_name(&data.property_type_standardized),
                        "tenure": comparables::tenure_name(&data.tenure),
                        "total_size_sqm": data.total_size_sqm,
                        "number_of_bedrooms": data.number_of_bedrooms,
                        "final_price": data.correction_layer.final_price,
                        "last_sale_price": data.correction_layer.last_sale_price,
                        "last_sale_price_today": data.correction_layer.last_sale_price_today,
                        "last_sale_date": data.correction_layer.last_sale_date,
                        "valuation_date": ctx.metadata.report_date,
                    },
                    "comparables": rows.iter().map(comparables::ComparableRow::to_prompt_json).collect::<Vec<_>>(),
                    "comparable_table_data": table_data,
                })
            }
            _ => {
                let e = ctx.enrichment;
                let mut location = json!({
                    "address": e.formatted_address.clone().unwrap_or_else(|| property.address.one_line()),
                });
                for category in self.categories() {
                    let (key, value) = match category {
                        EnrichmentCategory::Transport => ("transport", serde_json::to_value(&e.transport)),
                        EnrichmentCategory::Amenities => ("amenities", serde_json::to_value(&e.amenities)),
                        EnrichmentCategory::Schools => ("schools", serde_json::to_value(&e.schools)),
                        EnrichmentCategory::Commute => ("commute_to_city", serde_json::to_value(&e.commute)),
                        EnrichmentCategory::Solar => ("solar", serde_json::to_value(&e.solar)),
                        EnrichmentCategory::Crime => ("crime", serde_json::to_value(&e.crime)),
                        EnrichmentCategory::AirQuality => ("air_quality", serde_json::to_value(&e.air_quality)),
                        EnrichmentCategory::Visuals => continue,
                    };
                    location[key] = if e.is_missing(*category) {
                        Value::String("unavailable".to_string())
                    } else {
                        value.unwrap_or(Value::Null)
                    };
                }
                location
            }
        };

        let mut prompt = format!(
            "Generate the {} section of a UK residential valuation report.\n\
             Valuation reference: {}\n\
             Valuation date: {}\n",
            self.spec().title,
            property.valuation_id,
            ctx.metadata.report_date,
        );
        if *self == ExternalSection::ValuationMethodology {
            prompt.push_str(&format!(
                "The concluded market value MUST be {} (the final price from the correction layer).\n",
                comparables::pounds(data.correction_layer.final_price, 0)
            ));
        }
        prompt.push_str("\nINPUT DATA:\n");
        prompt.push_str(&serde_json::to_string_pretty(&input_json).unwrap_or_default());
        prompt
    }

    /// Fields that are computed locally and always override the reply.
    fn finalize(&self, data: &mut Value, input: ExternalInput<'_>) {
        let (ExternalSection::ValuationMethodology, ExternalInput::Property(ctx)) = (self, input)
        else {
            return;
        };
        let Some(obj) = data.as_object_mut() else {
            return;
        };
        let property_data = &ctx.property.property_data;
        obj.insert(
            "comparable_table".to_string(),
            comparables::table(&comparables::rows(property_data)),
        );
        let conclusion = obj
            .entry("conclusion")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(conclusion) = conclusion.as_object_mut() {
            conclusion.insert(
                "market_value".to_string(),
                json!(property_data.correction_layer.final_price),
            );
        }
    }

    fn default_notes(&self, input: ExternalInput<'_>) -> (Vec<String>, Vec<String>) {
        let owned = |notes: &[&str]| notes.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        match (self, input) {
            (ExternalSection::MarketCommentary, ExternalInput::Month(label)) => (
                vec![format!("Market data is current as of {label}")],
                owned(&["Market commentary is based on third-party reports and subject to change"]),
            ),
            (ExternalSection::ValuationMethodology, _) => (
                owned(&["Valuation based on comparable method using available evidence"]),
                owned(&[
                    "No physical inspection of comparables undertaken",
                    "Desktop valuation only",
                ]),
            ),
            (ExternalSection::PropertyOverview, _) => (
                owned(&["Property attributes are as supplied and have not been verified"]),
                owned(&["Desktop valuation only"]),
            ),
            (_, ExternalInput::Property(ctx)) => {
                let mut limitations = ctx.enrichment.limitations_for(self.categories());
                limitations.push("Desktop analysis only; no physical site visit conducted".to_string());
                (
                    owned(&["Analysis based on available mapping and public data sources"]),
                    limitations,
                )
            }
            (_, ExternalInput::Month(_)) => (Vec::new(), Vec::new()),
        }
    }

    /// Generates the section with bounded retries around the full attempt.
    pub async fn generate(
        &self,
        client: &LlmClient,
        retry: &RetryPolicy,
        input: ExternalInput<'_>,
    ) -> Result<SectionOutput, GenerationError> {
        let req = client.request(
            self.id().as_str(),
            self.system_prompt(),
            self.user_prompt(input),
        );
        retry
            .run(self.id().as_str(), |_| self.attempt(client, &req, input))
            .await
    }

    async fn attempt(
        &self,
        client: &LlmClient,
        req: &GenerateRequest,
        input: ExternalInput<'_>,
    ) -> Result<SectionOutput, GenerationError> {
        let resp = client
            .generate(req)
            .await
            .map_err(|err| GenerationError::Transport(err.to_string()))?;

        let parsed =
            parse_reply(&resp.content).map_err(|err| GenerationError::Parse(err.to_string()))?;

        let mut data = parsed.data;
        self.finalize(&mut data, input);

        let spec = self.spec();
        spec.output_schema.validate(&data)?;

        let (mut assumptions, mut limitations) = self.default_notes(input);
        merge_notes(&mut assumptions, parsed.assumptions);
        merge_notes(&mut limitations, parsed.limitations);

        Ok(SectionOutput {
            section_id: spec.id,
            version: spec.version.to_string(),
            provenance: Provenance {
                provider: resp.provider,
                model_name: resp.model,
            },
            data,
            assumptions,
            limitations,
        })
    }
}

fn merge_notes(into: &mut Vec<String>, extra: Vec<String>) {
    for note in extra {
        let note = note.trim().to_string();
        if !note.is_empty() && !into.contains(&note) {
            into.push(note);
        }
    }
}
