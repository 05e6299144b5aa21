use serde_json::json;

use super::generator::SectionContext;
use super::registry::SectionId;
use super::SectionOutput;

const TEMPLATE: &str = include_str!("../../data/templates/instructions.txt");

pub fn build(ctx: &SectionContext<'_>) -> SectionOutput {
    let metadata = ctx.metadata;
    let address = ctx.property.address.one_line();

    let content = TEMPLATE
        .replace("{{report_date}}", &metadata.report_date)
        .replace("{{client_name}}", &metadata.client_name)
        .replace("{{valuation_purpose}}", &metadata.valuation_purpose)
        .replace("{{property_address_full}}", &address);

    SectionOutput::deterministic(
        SectionId::Instructions.spec(),
        "templates/instructions.txt",
        json!({
            "content": content.trim(),
            "placeholders": {
                "report_date": metadata.report_date,
                "client_name": metadata.client_name,
                "valuation_purpose": metadata.valuation_purpose,
                "address": address,
            }
        }),
        vec!["Standard RICS desktop valuation assumptions apply".to_string()],
        vec!["Desktop only, no physical inspection".to_string()],
    )
}
