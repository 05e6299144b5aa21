//! Typed form of the unified input document.
//!
//! Values of these types only exist after [`super::validate`] has accepted
//! the raw document, so required fields are plain values here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub metadata: ReportMetadata,
    pub properties: Vec<PropertyRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub report_date: String,
    pub client_name: String,
    pub valuation_purpose: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub valuation_id: String,
    pub address: Address,
    pub property_data: PropertyData,
    #[serde(default)]
    pub enrichment_data: Option<EnrichmentData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub paon: Option<String>,
    #[serde(default)]
    pub saon: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    pub postcode: String,
    #[serde(default)]
    pub formatted_address: Option<String>,
}

impl Address {
    /// "saon paon street, postcode", skipping absent parts.
    pub fn one_line(&self) -> String {
        if let Some(formatted) = self.formatted_address.as_deref()
            && !formatted.trim().is_empty()
        {
            return formatted.trim().to_string();
        }

        let building: Vec<&str> = [&self.saon, &self.paon, &self.street]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        if building.is_empty() {
            self.postcode.trim().to_string()
        } else {
            format!("{}, {}", building.join(" "), self.postcode.trim())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyData {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub total_size_sqm: f64,
    pub number_of_bedrooms: u32,
    pub property_type_standardized: String,
    pub tenure: String,
    #[serde(default)]
    pub features: Map<String, Value>,
    #[serde(default)]
    pub epc: Option<Map<String, Value>>,
    pub correction_layer: CorrectionLayer,
}

impl PropertyData {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    pub fn feature_str(&self, key: &str) -> Option<&str> {
        self.features.get(key).and_then(Value::as_str)
    }

    pub fn feature_f64(&self, key: &str) -> Option<f64> {
        self.features.get(key).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionLayer {
    pub final_price: f64,
    #[serde(default)]
    pub last_sale_price: Option<f64>,
    #[serde(default)]
    pub last_sale_date: Option<String>,
    #[serde(default)]
    pub last_sale_price_today: Option<f64>,
    #[serde(default)]
    pub knn_comparables: Vec<Comparable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparable {
    #[serde(alias = "full_address")]
    pub address: String,
    #[serde(alias = "distance_to_subject_m")]
    pub distance_m: f64,
    #[serde(alias = "property_type_standardized")]
    pub property_type: String,
    pub tenure: String,
    #[serde(alias = "total_size_sqm")]
    pub size_sqm: f64,
    #[serde(alias = "estimated_bedrooms")]
    pub bedrooms: f64,
    #[serde(alias = "original_price")]
    pub price: f64,
    #[serde(alias = "date")]
    pub sale_date: String,
    #[serde(default)]
    pub similarity_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentData {
    #[serde(default)]
    pub address: Option<EnrichmentAddress>,
    #[serde(default)]
    pub visuals: Option<Visuals>,
    #[serde(default)]
    pub amenities: Option<BTreeMap<String, AmenityCategory>>,
    #[serde(default)]
    pub transport: Option<Vec<TransportStation>>,
    #[serde(default)]
    pub schools: Option<Vec<School>>,
    #[serde(default)]
    pub crime: Option<CrimeSummary>,
    #[serde(default)]
    pub air_quality: Option<AirQuality>,
    #[serde(default)]
    pub solar: Option<Solar>,
    #[serde(default)]
    pub commute_to_city: Option<Commute>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentAddress {
    #[serde(default)]
    pub formatted_address: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Visuals {
    #[serde(default)]
    pub street_view_url: Option<String>,
    #[serde(default)]
    pub satellite_map_url: Option<String>,
    #[serde(default)]
    pub roadmap_url: Option<String>,
}

impl Visuals {
    /// First usable image for the cover page.
    pub fn cover_image(&self) -> Option<&str> {
        [&self.street_view_url, &self.satellite_map_url, &self.roadmap_url]
            .into_iter()
            .filter_map(|url| url.as_deref())
            .find(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmenityCategory {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub top_pick: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportStation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub distance: Option<String>,
    #[serde(default)]
    pub distance_estimate_m: Option<f64>,
    #[serde(default, rename = "type")]
    pub station_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct School {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrimeSummary {
    #[serde(default)]
    pub total_incidents: u32,
    #[serde(default)]
    pub top_categories: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    #[serde(default)]
    pub aqi: Option<Value>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solar {
    #[serde(default)]
    pub annual_kwh: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commute {
    #[serde(default)]
    pub duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(paon: Option<&str>, street: Option<&str>) -> Address {
        Address {
            paon: paon.map(str::to_string),
            saon: None,
            street: street.map(str::to_string),
            postcode: "SW1A 1AA".to_string(),
            formatted_address: None,
        }
    }

    #[test]
    fn test_one_line_address() {
        assert_eq!(
            address(Some("12"), Some("Cheyne Walk")).one_line(),
            "12 Cheyne Walk, SW1A 1AA"
        );
        assert_eq!(address(None, None).one_line(), "SW1A 1AA");
    }

    #[test]
    fn test_formatted_address_preferred() {
        let mut addr = address(Some("12"), Some("Cheyne Walk"));
        addr.formatted_address = Some("12 Cheyne Walk, London SW3".to_string());
        assert_eq!(addr.one_line(), "12 Cheyne Walk, London SW3");
    }

    #[test]
    fn test_comparable_aliases() {
        let comp: Comparable = serde_json::from_value(serde_json::json!({
            "full_address": "Flat 3, 1 King's Road, SW3 4AA",
            "distance_to_subject_m": 240.0,
            "property_type_standardized": "F",
            "tenure": "L",
            "total_size_sqm": 82.0,
            "estimated_bedrooms": 2.0,
            "original_price": 1250000.0,
            "date": "2025-03-14"
        }))
        .unwrap();
        assert_eq!(comp.address, "Flat 3, 1 King's Road, SW3 4AA");
        assert_eq!(comp.price, 1250000.0);
        assert_eq!(comp.similarity_score, None);
    }

    #[test]
    fn test_cover_image_skips_blank() {
        let visuals = Visuals {
            street_view_url: Some(" ".to_string()),
            satellite_map_url: Some("https://maps.example/sat.png".to_string()),
            roadmap_url: None,
        };
        assert_eq!(visuals.cover_image(), Some("https://maps.example/sat.png"));
        assert_eq!(Visuals::default().cover_image(), None);
    }

    #[test]
    fn test_api_key_never_serialized() {
        let metadata = ReportMetadata {
            report_date: "January 2026".to_string(),
            client_name: "Client".to_string(),
            valuation_purpose: "Desktop Valuation".to_string(),
            api_key: Some("secret".to_string()),
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert!(json.get("api_key").is_none());
    }
}
