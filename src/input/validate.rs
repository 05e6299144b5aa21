//! Structural validation of the unified input document.
//!
//! The walk is total: every violation across `metadata` and every property
//! is collected before anything is returned. Only a document with no
//! violations is converted into the typed [`ReportRequest`].

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::model::ReportRequest;
use crate::sections::SectionSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}, found {}", self.path, self.expected, self.actual)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("input document has {} error(s): {}", .0.len(), join_errors(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn mentions(&self, path: &str) -> bool {
        self.0.iter().any(|err| err.path == path)
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A property excluded from a lenient run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedProperty {
    pub index: usize,
    pub valuation_id: Option<String>,
    pub errors: Vec<FieldError>,
}

/// Validates the whole document. Any violation fails the run.
pub fn validate_document(
    raw: &Value,
    sections: &[&SectionSpec],
) -> Result<ReportRequest, ValidationErrors> {
    let (request, rejected) = validate_partitioned(raw, sections)?;
    if rejected.is_empty() {
        return Ok(request);
    }
    Err(ValidationErrors(
        rejected.into_iter().flat_map(|r| r.errors).collect(),
    ))
}

/// Validates the document but only fails on document-level errors.
/// Properties with violations are returned separately; the request keeps
/// the valid ones in their original order. If no property is valid the
/// whole document fails.
pub fn validate_partitioned(
    raw: &Value,
    sections: &[&SectionSpec],
) -> Result<(ReportRequest, Vec<RejectedProperty>), ValidationErrors> {
    let mut walker = Walker::default();
    walker.document(raw, sections);

    let mut fatal = Vec::new();
    let mut per_property: HashMap<usize, Vec<FieldError>> = HashMap::new();
    for err in walker.errors {
        match property_index(&err.path) {
            Some(index) => per_property.entry(index).or_default().push(err),
            None => fatal.push(err),
        }
    }

    let properties = raw
        .get("properties")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if !fatal.is_empty() || per_property.len() == properties.len() {
        let mut all = fatal;
        let mut indices: Vec<usize> = per_property.keys().copied().collect();
        indices.sort_unstable();
        for index in indices {
            all.extend(per_property.remove(&index).unwrap_or_default());
        }
        return Err(ValidationErrors(all));
    }

    let mut rejected = Vec::new();
    let mut accepted = Vec::with_capacity(properties.len());
    for (index, property) in properties.into_iter().enumerate() {
        match per_property.remove(&index) {
            Some(errors) => rejected.push(RejectedProperty {
                index,
                valuation_id: property
                    .get("valuation_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                errors,
            }),
            None => accepted.push(property),
        }
    }

    let document = serde_json::json!({
        "metadata": raw.get("metadata").cloned().unwrap_or(Value::Null),
        "properties": accepted,
    });
    let request = serde_json::from_value(document).map_err(|err| {
        ValidationErrors(vec![FieldError {
            path: "$".to_string(),
            expected: "well-formed report document".to_string(),
            actual: err.to_string(),
        }])
    })?;

    Ok((request, rejected))
}

/// `properties[3].address.postcode` -> 3
fn property_index(path: &str) -> Option<usize> {
    let rest = path.strip_prefix("properties[")?;
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    String,
    NonEmptyString,
    Number,
    Count,
    Object,
    Array,
}

impl Expect {
    fn describe(self) -> &'static str {
        match self {
            Expect::String => "string",
            Expect::NonEmptyString => "non-empty string",
            Expect::Number => "number",
            Expect::Count => "non-negative integer",
            Expect::Object => "object",
            Expect::Array => "array",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Expect::String => value.is_string(),
            Expect::NonEmptyString => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            Expect::Number => value.is_number(),
            Expect::Count => value
                .as_u64()
                .is_some_and(|n| u32::try_from(n).is_ok()),
            Expect::Object => value.is_object(),
            Expect::Array => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Required,
    /// Absent or null is fine.
    Optional,
    /// Absent is fine, an explicit null is not.
    OptionalNotNull,
}

fn describe_value(value: Option<&Value>) -> String {
    match value {
        None => "missing".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => format!("boolean {b}"),
        Some(Value::Number(n)) => format!("number {n}"),
        Some(Value::String(s)) if s.trim().is_empty() => "empty string".to_string(),
        Some(Value::String(s)) => format!("string {:?}", crate::llm::client::truncate(s, 40)),
        Some(Value::Array(items)) if items.is_empty() => "empty array".to_string(),
        Some(Value::Array(items)) => format!("array of {}", items.len()),
        Some(Value::Object(_)) => "object".to_string(),
    }
}

/// Logical comparable fields and the names each may arrive under.
const COMPARABLE_FIELDS: &[(&[&str], Expect)] = &[
    (&["address", "full_address"], Expect::NonEmptyString),
    (&["distance_m", "distance_to_subject_m"], Expect::Number),
    (&["property_type", "property_type_standardized"], Expect::String),
    (&["tenure"], Expect::String),
    (&["size_sqm", "total_size_sqm"], Expect::Number),
    (&["bedrooms", "estimated_bedrooms"], Expect::Number),
    (&["price", "original_price"], Expect::Number),
    (&["sale_date", "date"], Expect::String),
];

#[derive(Default)]
struct Walker {
    errors: Vec<FieldError>,
}

impl Walker {
    fn push(&mut self, path: String, expected: impl Into<String>, actual: Option<&Value>) {
        self.errors.push(FieldError {
            path,
            expected: expected.into(),
            actual: describe_value(actual),
        });
    }

    /// Checks one field and returns it if it is present and well typed.
    fn field<'a>(
        &mut self,
        parent: &'a Map<String, Value>,
        path: &str,
        key: &str,
        expect: Expect,
        presence: Presence,
    ) -> Option<&'a Value> {
        let path = if path == "$" {
            key.to_string()
        } else {
            format!("{path}.{key}")
        };
        let value = parent.get(key);
        match (value, presence) {
            (None, Presence::Required) | (Some(Value::Null), Presence::Required) => {
                self.push(path, expect.describe(), value);
                None
            }
            (None, _) | (Some(Value::Null), Presence::Optional) => None,
            (Some(v), _) if expect.accepts(v) => Some(v),
            (Some(v), _) => {
                self.push(path, expect.describe(), Some(v));
                None
            }
        }
    }

    fn object_field<'a>(
        &mut self,
        parent: &'a Map<String, Value>,
        path: &str,
        key: &str,
        presence: Presence,
    ) -> Option<&'a Map<String, Value>> {
        self.field(parent, path, key, Expect::Object, presence)
            .and_then(Value::as_object)
    }

    fn document(&mut self, raw: &Value, sections: &[&SectionSpec]) {
        let Some(root) = raw.as_object() else {
            self.push("$".to_string(), "object", Some(raw));
            return;
        };

        if let Some(metadata) = self.object_field(root, "$", "metadata", Presence::Required) {
            for key in ["report_date", "client_name", "valuation_purpose"] {
                self.field(metadata, "metadata", key, Expect::NonEmptyString, Presence::Required);
            }
            self.field(metadata, "metadata", "api_key", Expect::String, Presence::Optional);
        }

        let Some(properties) = self.field(root, "$", "properties", Expect::Array, Presence::Required)
        else {
            return;
        };
        let properties = properties.as_array().map(Vec::as_slice).unwrap_or_default();
        if properties.is_empty() {
            self.push("properties".to_string(), "at least one property", Some(&Value::Array(vec![])));
            return;
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (index, property) in properties.iter().enumerate() {
            let path = format!("properties[{index}]");
            let Some(record) = property.as_object() else {
                self.push(path, "object", Some(property));
                continue;
            };

            if let Some(id) = self
                .field(record, &path, "valuation_id", Expect::NonEmptyString, Presence::Required)
                .and_then(Value::as_str)
            {
                if let Some(first) = seen.get(id) {
                    self.errors.push(FieldError {
                        path: format!("{path}.valuation_id"),
                        expected: "valuation_id unique within the request".to_string(),
                        actual: format!("duplicate of properties[{first}]"),
                    });
                } else {
                    seen.insert(id, index);
                }
            }

            self.property(record, &path);
            self.section_requirements(property, &path, sections);
        }
    }

    fn property(&mut self, record: &Map<String, Value>, path: &str) {
        if let Some(address) = self.object_field(record, path, "address", Presence::Required) {
            let address_path = format!("{path}.address");
            self.field(address, &address_path, "postcode", Expect::NonEmptyString, Presence::Required);
            for key in ["paon", "saon", "street", "formatted_address"] {
                self.field(address, &address_path, key, Expect::String, Presence::Optional);
            }
        }

        if let Some(data) = self.object_field(record, path, "property_data", Presence::Required) {
            self.property_data(data, &format!("{path}.property_data"));
        }

        if let Some(enrichment) =
            self.object_field(record, path, "enrichment_data", Presence::Optional)
        {
            self.enrichment(enrichment, &format!("{path}.enrichment_data"));
        }
    }

    fn property_data(&mut self, data: &Map<String, Value>, path: &str) {
        self.field(data, path, "latitude", Expect::Number, Presence::Optional);
        self.field(data, path, "longitude", Expect::Number, Presence::Optional);
        self.field(data, path, "total_size_sqm", Expect::Number, Presence::Required);
        self.field(data, path, "number_of_bedrooms", Expect::Count, Presence::Required);
        self.field(data, path, "property_type_standardized", Expect::NonEmptyString, Presence::Required);
        self.field(data, path, "tenure", Expect::NonEmptyString, Presence::Required);
        self.field(data, path, "features", Expect::Object, Presence::OptionalNotNull);
        self.field(data, path, "epc", Expect::Object, Presence::Optional);

        let Some(layer) = self.object_field(data, path, "correction_layer", Presence::Required)
        else {
            return;
        };
        let layer_path = format!("{path}.correction_layer");
        self.field(layer, &layer_path, "final_price", Expect::Number, Presence::Required);
        self.field(layer, &layer_path, "last_sale_price", Expect::Number, Presence::Optional);
        self.field(layer, &layer_path, "last_sale_price_today", Expect::Number, Presence::Optional);
        self.field(layer, &layer_path, "last_sale_date", Expect::String, Presence::Optional);

        let comparables = self
            .field(layer, &layer_path, "knn_comparables", Expect::Array, Presence::OptionalNotNull)
            .and_then(Value::as_array);
        for (i, comp) in comparables.into_iter().flatten().enumerate() {
            let comp_path = format!("{layer_path}.knn_comparables[{i}]");
            match comp.as_object() {
                Some(comp) => self.comparable(comp, &comp_path),
                None => self.push(comp_path, "object", Some(comp)),
            }
        }
    }

    fn comparable(&mut self, comp: &Map<String, Value>, path: &str) {
        for (names, expect) in COMPARABLE_FIELDS {
            let present: Vec<&str> = names
                .iter()
                .copied()
                .filter(|name| comp.contains_key(*name))
                .collect();
            match present.as_slice() {
                [] => self.push(format!("{path}.{}", names[0]), expect.describe(), None),
                [name] => {
                    self.field(comp, path, name, *expect, Presence::Required);
                }
                _ => self.errors.push(FieldError {
                    path: format!("{path}.{}", names[0]),
                    expected: format!("exactly one of {}", names.join(" / ")),
                    actual: format!("both {}", present.join(" and ")),
                }),
            }
        }
        self.field(comp, path, "similarity_score", Expect::Number, Presence::Optional);
    }

    fn enrichment(&mut self, data: &Map<String, Value>, path: &str) {
        if let Some(address) = self.object_field(data, path, "address", Presence::Optional) {
            let p = format!("{path}.address");
            self.field(address, &p, "formatted_address", Expect::String, Presence::Optional);
            self.field(address, &p, "latitude", Expect::Number, Presence::Optional);
            self.field(address, &p, "longitude", Expect::Number, Presence::Optional);
        }

        if let Some(visuals) = self.object_field(data, path, "visuals", Presence::Optional) {
            let p = format!("{path}.visuals");
            for key in ["street_view_url", "satellite_map_url", "roadmap_url"] {
                self.field(visuals, &p, key, Expect::String, Presence::Optional);
            }
        }

        if let Some(amenities) = self.object_field(data, path, "amenities", Presence::Optional) {
            for (category, entry) in amenities {
                let p = format!("{path}.amenities.{category}");
                match entry.as_object() {
                    Some(entry) => {
                        self.field(entry, &p, "count", Expect::Count, Presence::OptionalNotNull);
                    }
                    None => self.push(p, "object", Some(entry)),
                }
            }
        }

        self.object_list(
            data,
            path,
            "transport",
            &[
                ("name", Expect::String),
                ("distance", Expect::String),
                ("distance_estimate_m", Expect::Number),
                ("type", Expect::String),
            ],
        );
        self.object_list(data, path, "schools", &[("name", Expect::String)]);

        if let Some(crime) = self.object_field(data, path, "crime", Presence::Optional) {
            let p = format!("{path}.crime");
            self.field(crime, &p, "total_incidents", Expect::Count, Presence::OptionalNotNull);
            self.field(crime, &p, "top_categories", Expect::Array, Presence::OptionalNotNull);
        }

        if let Some(air) = self.object_field(data, path, "air_quality", Presence::Optional) {
            self.field(air, &format!("{path}.air_quality"), "category", Expect::String, Presence::Optional);
        }

        if let Some(solar) = self.object_field(data, path, "solar", Presence::Optional) {
            self.field(solar, &format!("{path}.solar"), "annual_kwh", Expect::Number, Presence::Optional);
        }

        if let Some(commute) = self.object_field(data, path, "commute_to_city", Presence::Optional) {
            self.field(commute, &format!("{path}.commute_to_city"), "duration", Expect::String, Presence::Optional);
        }
    }

    /// Optional array of objects whose listed fields are each optional.
    fn object_list(
        &mut self,
        data: &Map<String, Value>,
        path: &str,
        key: &str,
        fields: &[(&str, Expect)],
    ) {
        let Some(items) = self
            .field(data, path, key, Expect::Array, Presence::Optional)
            .and_then(Value::as_array)
        else {
            return;
        };
        for (i, item) in items.iter().enumerate() {
            let p = format!("{path}.{key}[{i}]");
            match item.as_object() {
                Some(item) => {
                    for (field, expect) in fields {
                        self.field(item, &p, field, *expect, Presence::Optional);
                    }
                }
                None => self.push(p, "object", Some(item)),
            }
        }
    }

    /// Paths a requested section needs. Arrays must also be non-empty.
    fn section_requirements(&mut self, property: &Value, path: &str, sections: &[&SectionSpec]) {
        for spec in sections {
            for required in spec.required_fields {
                let full_path = format!("{path}.{required}");
                if self.errors.iter().any(|err| err.path == full_path) {
                    continue;
                }
                let value = required
                    .split('.')
                    .try_fold(property, |node, key| node.get(key));
                match value {
                    None | Some(Value::Null) => self.errors.push(FieldError {
                        path: full_path,
                        expected: format!("value required by section {}", spec.id),
                        actual: describe_value(value),
                    }),
                    Some(Value::Array(items)) if items.is_empty() => self.errors.push(FieldError {
                        path: full_path,
                        expected: format!("at least one entry for section {}", spec.id),
                        actual: describe_value(value),
                    }),
                    Some(_) => {}
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{document, property};
    use super::*;
    use crate::sections::registry::{SectionId, all_default_sections};
    use serde_json::json;

    #[test]
    fn test_valid_document() {
        let doc = document(vec![property("v01", true), property("v02", false)]);
        let request = validate_document(&doc, &all_default_sections()).unwrap();
        assert_eq!(request.properties.len(), 2);
        assert_eq!(request.properties[0].property_data.correction_layer.final_price, 2786504.88);
        assert!(request.properties[1].enrichment_data.is_none());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut doc = document(vec![property("v01", false), property("v02", false)]);
        doc["metadata"]["client_name"] = json!("");
        doc["properties"][0]["property_data"]["total_size_sqm"] = json!("large");
        doc["properties"][1]["address"]
            .as_object_mut()
            .unwrap()
            .remove("postcode");

        let errors = validate_document(&doc, &all_default_sections()).unwrap_err();
        assert!(errors.mentions("metadata.client_name"));
        assert!(errors.mentions("properties[0].property_data.total_size_sqm"));
        assert!(errors.mentions("properties[1].address.postcode"));
    }

    #[test]
    fn test_error_describes_expected_and_actual() {
        let mut doc = document(vec![property("v01", false)]);
        doc["properties"][0]["property_data"]["number_of_bedrooms"] = json!(2.5);
        let errors = validate_document(&doc, &[]).unwrap_err();
        assert_eq!(
            errors.errors()[0].to_string(),
            "properties[0].property_data.number_of_bedrooms: expected non-negative integer, found number 2.5"
        );
    }

    #[test]
    fn test_duplicate_valuation_id() {
        let doc = document(vec![property("v01", false), property("v01", false)]);
        let errors = validate_document(&doc, &[]).unwrap_err();
        assert_eq!(errors.errors().len(), 1);
        assert_eq!(errors.errors()[0].path, "properties[1].valuation_id");
    }

    #[test]
    fn test_empty_comparables_only_fail_valuation_sections() {
        let mut doc = document(vec![property("v01", false)]);
        doc["properties"][0]["property_data"]["correction_layer"]["knn_comparables"] = json!([]);

        let overview_only = [SectionId::PropertyOverview.spec()];
        assert!(validate_document(&doc, &overview_only).is_ok());

        let errors = validate_document(&doc, &all_default_sections()).unwrap_err();
        assert!(errors.mentions("properties[0].property_data.correction_layer.knn_comparables"));
    }

    #[test]
    fn test_comparable_alias_conflict() {
        let mut doc = document(vec![property("v01", false)]);
        doc["properties"][0]["property_data"]["correction_layer"]["knn_comparables"][0]["price"] =
            json!(1.0);
        let errors = validate_document(&doc, &[]).unwrap_err();
        assert_eq!(
            errors.errors()[0].path,
            "properties[0].property_data.correction_layer.knn_comparables[0].price"
        );
        assert_eq!(errors.errors()[0].actual, "both price and original_price");
    }

    #[test]
    fn test_enrichment_types_checked() {
        let mut doc = document(vec![property("v01", true)]);
        doc["properties"][0]["enrichment_data"]["transport"] = json!({"name": "Bank"});
        doc["properties"][0]["enrichment_data"]["amenities"]["parks"]["count"] = json!(-1);
        let errors = validate_document(&doc, &[]).unwrap_err();
        assert!(errors.mentions("properties[0].enrichment_data.transport"));
        assert!(errors.mentions("properties[0].enrichment_data.amenities.parks.count"));
    }

    #[test]
    fn test_null_enrichment_is_absent() {
        let mut doc = document(vec![property("v01", false)]);
        doc["properties"][0]["enrichment_data"] = Value::Null;
        let request = validate_document(&doc, &all_default_sections()).unwrap();
        assert!(request.properties[0].enrichment_data.is_none());
    }

    #[test]
    fn test_properties_must_be_non_empty() {
        let doc = document(vec![]);
        let errors = validate_document(&doc, &[]).unwrap_err();
        assert!(errors.mentions("properties"));
    }

    #[test]
    fn test_non_object_document() {
        let errors = validate_document(&json!([1, 2]), &[]).unwrap_err();
        assert_eq!(errors.errors()[0].path, "$");
        assert_eq!(errors.errors()[0].actual, "array of 2");
    }

    #[test]
    fn test_partitioned_keeps_valid_properties() {
        let mut doc = document(vec![
            property("v01", false),
            property("v02", false),
            property("v03", false),
        ]);
        doc["properties"][1]["property_data"]["tenure"] = json!(7);

        let (request, rejected) = validate_partitioned(&doc, &all_default_sections()).unwrap();
        let ids: Vec<&str> = request
            .properties
            .iter()
            .map(|p| p.valuation_id.as_str())
            .collect();
        assert_eq!(ids, vec!["v01", "v03"]);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 1);
        assert_eq!(rejected[0].valuation_id.as_deref(), Some("v02"));
    }

    #[test]
    fn test_partitioned_metadata_errors_stay_fatal() {
        let mut doc = document(vec![property("v01", false)]);
        doc["metadata"]["report_date"] = json!(2026);
        assert!(validate_partitioned(&doc, &[]).is_err());
    }

    #[test]
    fn test_partitioned_all_invalid_fails() {
        let mut doc = document(vec![property("v01", false)]);
        doc["properties"][0]["property_data"]["tenure"] = Value::Null;
        let errors = validate_partitioned(&doc, &[]).unwrap_err();
        assert!(errors.mentions("properties[0].property_data.tenure"));
    }

    #[test]
    fn test_property_index() {
        assert_eq!(property_index("properties[12].address"), Some(12));
        assert_eq!(property_index("metadata.client_name"), None);
        assert_eq!(property_index("properties"), None);
    }
}
