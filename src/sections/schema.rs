//! Output-schema contracts for section payloads.
//!
//! Each section's `data` object is checked against a declarative list of
//! fields before it is accepted, regardless of which path produced it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSchema {
    Instructions,
    PropertyOverview,
    NeighbourhoodOverview,
    MarketCommentary,
    ValuationMethodology,
    Narrative,
    ValuationQuality,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload does not match schema {schema}: {}", .violations.join("; "))]
pub struct SchemaViolation {
    pub schema: &'static str,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Text,
    Number,
    Object(&'static [Field]),
    TextList { min: usize },
    ObjectList { min: usize, fields: &'static [Field] },
    Table,
}

#[derive(Debug, Clone, Copy)]
struct Field {
    name: &'static str,
    kind: Kind,
    required: bool,
}

const fn required(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        required: false,
    }
}

const PLACEHOLDERS: &[Field] = &[
    required("report_date", Kind::Text),
    required("client_name", Kind::Text),
    required("valuation_purpose", Kind::Text),
    required("address", Kind::Text),
];

const INSTRUCTIONS: &[Field] = &[
    required("content", Kind::Text),
    required("placeholders", Kind::Object(PLACEHOLDERS)),
];

const PROPERTY_OVERVIEW: &[Field] = &[
    required("summary", Kind::Text),
    required("paragraphs", Kind::TextList { min: 1 }),
    optional("key_features", Kind::TextList { min: 0 }),
];

const TRANSPORT_ROW: &[Field] = &[
    required("name", Kind::Text),
    required("distance", Kind::Text),
    required("type", Kind::Text),
];

const AMENITY_ROW: &[Field] = &[
    required("category", Kind::Text),
    required("count", Kind::Number),
];

const NEIGHBOURHOOD: &[Field] = &[
    required("paragraphs", Kind::TextList { min: 1 }),
    required(
        "transport_data",
        Kind::ObjectList {
            min: 0,
            fields: TRANSPORT_ROW,
        },
    ),
    required(
        "amenities",
        Kind::ObjectList {
            min: 0,
            fields: AMENITY_ROW,
        },
    ),
    optional("visuals", Kind::Object(&[])),
];

const SUBSECTION: &[Field] = &[
    required("heading", Kind::Text),
    required("content", Kind::Text),
];

const MARKET_COMMENTARY: &[Field] = &[
    required("headline", Kind::Text),
    required(
        "subsections",
        Kind::ObjectList {
            min: 1,
            fields: SUBSECTION,
        },
    ),
];

const CONCLUSION: &[Field] = &[
    required("market_value", Kind::Number),
    required("narrative", Kind::Text),
];

const VALUATION_METHODOLOGY: &[Field] = &[
    required("methodology", Kind::Text),
    required("comparable_analysis", Kind::Text),
    required("comparable_table", Kind::Table),
    required("conclusion", Kind::Object(CONCLUSION)),
];

const NARRATIVE: &[Field] = &[
    required("paragraphs", Kind::TextList { min: 1 }),
    optional("key_points", Kind::TextList { min: 0 }),
];

const VALUATION_QUALITY: &[Field] = &[
    required("status", Kind::Text),
    required("ppsqm_dispersion_cv", Kind::Number),
    required("ppsqm_dispersion_score", Kind::Number),
    required("weighted_mean_ppsqm", Kind::Number),
    required("sample_size", Kind::Number),
];

impl OutputSchema {
    pub fn id(&self) -> &'static str {
        match self {
            OutputSchema::Instructions => "instructions.v1",
            OutputSchema::PropertyOverview => "property_overview.v1",
            OutputSchema::NeighbourhoodOverview => "neighbourhood_overview.v1",
            OutputSchema::MarketCommentary => "market_commentary.v1",
            OutputSchema::ValuationMethodology => "valuation_methodology.v1",
            OutputSchema::Narrative => "narrative.v1",
            OutputSchema::ValuationQuality => "valuation_quality.v1",
        }
    }

    fn fields(&self) -> &'static [Field] {
        match self {
            OutputSchema::Instructions => INSTRUCTIONS,
            OutputSchema::PropertyOverview => PROPERTY_OVERVIEW,
            OutputSchema::NeighbourhoodOverview => NEIGHBOURHOOD,
            OutputSchema::MarketCommentary => MARKET_COMMENTARY,
            OutputSchema::ValuationMethodology => VALUATION_METHODOLOGY,
            OutputSchema::Narrative => NARRATIVE,
            OutputSchema::ValuationQuality => VALUATION_QUALITY,
        }
    }

    /// Checks `data` and reports every violation, not just the first.
    pub fn validate(&self, data: &Value) -> Result<(), SchemaViolation> {
        let mut violations = Vec::new();
        match data.as_object() {
            Some(_) => check_fields("data", data, self.fields(), &mut violations),
            None => violations.push("data: expected object".to_string()),
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaViolation {
                schema: self.id(),
                violations,
            })
        }
    }
}

fn check_fields(path: &str, value: &Value, fields: &[Field], out: &mut Vec<String>) {
    for field in fields {
        let child_path = format!("{path}.{}", field.name);
        match value.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    out.push(format!("{child_path}: missing"));
                }
            }
            Some(child) => check_kind(&child_path, child, field.kind, out),
        }
    }
}

fn check_kind(path: &str, value: &Value, kind: Kind, out: &mut Vec<String>) {
    match kind {
        Kind::Text => match value.as_str() {
            Some(text) if !text.trim().is_empty() => {}
            Some(_) => out.push(format!("{path}: empty string")),
            None => out.push(format!("{path}: expected string")),
        },
        Kind::Number => {
            if !value.is_number() {
                out.push(format!("{path}: expected number"));
            }
        }
        Kind::Object(fields) => {
            if value.is_object() {
                check_fields(path, value, fields, out);
            } else {
                out.push(format!("{path}: expected object"));
            }
        }
        Kind::TextList { min } => match value.as_array() {
            Some(items) => {
                if items.len() < min {
                    out.push(format!("{path}: expected at least {min} entries"));
                }
                for (i, item) in items.iter().enumerate() {
                    check_kind(&format!("{path}[{i}]"), item, Kind::Text, out);
                }
            }
            None => out.push(format!("{path}: expected array")),
        },
        Kind::ObjectList { min, fields } => match value.as_array() {
            Some(items) => {
                if items.len() < min {
                    out.push(format!("{path}: expected at least {min} entries"));
                }
                for (i, item) in items.iter().enumerate() {
                    check_kind(&format!("{path}[{i}]"), item, Kind::Object(fields), out);
                }
            }
            None => out.push(format!("{path}: expected array")),
        },
        Kind::Table => check_table(path, value, out),
    }
}

/// `{headers: [string], rows: [[string]]}` with every row as wide as the header.
fn check_table(path: &str, value: &Value, out: &mut Vec<String>) {
    let Some(headers) = value.get("headers").and_then(Value::as_array) else {
        out.push(format!("{path}.headers: expected array"));
        return;
    };
    if headers.is_empty() || !headers.iter().all(Value::is_string) {
        out.push(format!("{path}.headers: expected non-empty array of strings"));
    }

    let Some(rows) = value.get("rows").and_then(Value::as_array) else {
        out.push(format!("{path}.rows: expected array"));
        return;
    };
    for (i, row) in rows.iter().enumerate() {
        match row.as_array() {
            Some(cells) if cells.len() == headers.len() && cells.iter().all(Value::is_string) => {}
            Some(cells) => out.push(format!(
                "{path}.rows[{i}]: expected {} string cells, found {}",
                headers.len(),
                cells.len()
            )),
            None => out.push(format!("{path}.rows[{i}]: expected array")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_narrative_valid() {
        let data = json!({"paragraphs": ["One.", "Two."]});
        assert!(OutputSchema::Narrative.validate(&data).is_ok());
    }

    #[test]
    fn test_collects_all_violations() {
        let data = json!({"headline": "", "subsections": [{"heading": "Rates"}]});
        let err = OutputSchema::MarketCommentary.validate(&data).unwrap_err();
        assert_eq!(err.schema, "market_commentary.v1");
        assert_eq!(
            err.violations,
            vec![
                "data.headline: empty string".to_string(),
                "data.subsections[0].content: missing".to_string(),
            ]
        );
    }

    #[test]
    fn test_non_object_payload() {
        let err = OutputSchema::Narrative.validate(&json!(["text"])).unwrap_err();
        assert_eq!(err.violations, vec!["data: expected object".to_string()]);
    }

    #[test]
    fn test_table_row_width() {
        let data = json!({
            "methodology": "Comparable method.",
            "comparable_analysis": "Five sales.",
            "comparable_table": {"headers": ["Address", "Price"], "rows": [["1 High St"]]},
            "conclusion": {"market_value": 1.0, "narrative": "Value."}
        });
        let err = OutputSchema::ValuationMethodology.validate(&data).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert!(err.violations[0].starts_with("data.comparable_table.rows[0]"));
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let data = json!({
            "paragraphs": ["Quiet street."],
            "transport_data": [],
            "amenities": []
        });
        assert!(OutputSchema::NeighbourhoodOverview.validate(&data).is_ok());
    }

    #[test]
    fn test_market_value_must_be_number() {
        let data = json!({
            "methodology": "Comparable method.",
            "comparable_analysis": "Five sales.",
            "comparable_table": {"headers": ["Address"], "rows": [["1 High St"]]},
            "conclusion": {"market_value": "£1m", "narrative": "Value."}
        });
        let err = OutputSchema::ValuationMethodology.validate(&data).unwrap_err();
        assert_eq!(
            err.violations,
            vec!["data.conclusion.market_value: expected number".to_string()]
        );
    }
}
