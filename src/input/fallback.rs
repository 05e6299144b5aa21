//! Defaults for optional enrichment data.
//!
//! Section generators never look at `Option`s in the enrichment payload:
//! the property is resolved once into a [`ResolvedEnrichment`] where every
//! absent category already holds its fallback value and a limitation note.

use std::collections::BTreeMap;

use serde::Serialize;

use super::model::{
    AirQuality, AmenityCategory, Commute, CrimeSummary, EnrichmentData, PropertyRecord, School,
    Solar, TransportStation, Visuals,
};

/// Enrichment further than this from the subject is treated as absent.
pub const MATCH_TOLERANCE_M: f64 = 300.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentCategory {
    Visuals,
    Amenities,
    Transport,
    Schools,
    Crime,
    AirQuality,
    Solar,
    Commute,
}

struct Fallback {
    category: EnrichmentCategory,
    limitation: &'static str,
}

/// One row per optional category. The default value is the category type's
/// `Default`; the note is recorded whenever that default is used.
const FALLBACKS: &[Fallback] = &[
    Fallback {
        category: EnrichmentCategory::Visuals,
        limitation: "No street-level or map imagery available; placeholder graphic used",
    },
    Fallback {
        category: EnrichmentCategory::Amenities,
        limitation: "Amenity data unavailable; local amenity provision not assessed",
    },
    Fallback {
        category: EnrichmentCategory::Transport,
        limitation: "Transport data unavailable; connectivity not assessed",
    },
    Fallback {
        category: EnrichmentCategory::Schools,
        limitation: "School data unavailable; educational provision not assessed",
    },
    Fallback {
        category: EnrichmentCategory::Crime,
        limitation: "Crime data unavailable; safety context not assessed",
    },
    Fallback {
        category: EnrichmentCategory::AirQuality,
        limitation: "Air quality data unavailable",
    },
    Fallback {
        category: EnrichmentCategory::Solar,
        limitation: "Solar potential data unavailable",
    },
    Fallback {
        category: EnrichmentCategory::Commute,
        limitation: "Commute time to the city centre unavailable",
    },
];

pub fn limitation_for(category: EnrichmentCategory) -> &'static str {
    FALLBACKS
        .iter()
        .find(|row| row.category == category)
        .map(|row| row.limitation)
        .unwrap_or("Enrichment data unavailable")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedEnrichment {
    pub formatted_address: Option<String>,
    pub visuals: Visuals,
    pub amenities: BTreeMap<String, AmenityCategory>,
    pub transport: Vec<TransportStation>,
    pub schools: Vec<School>,
    pub crime: CrimeSummary,
    pub air_quality: AirQuality,
    pub solar: Solar,
    pub commute: Commute,
    /// Categories that fell back to their default.
    pub missing: Vec<EnrichmentCategory>,
    /// Notes about the enrichment as a whole (absent or discarded).
    pub limitations: Vec<String>,
}

impl ResolvedEnrichment {
    pub fn is_missing(&self, category: EnrichmentCategory) -> bool {
        self.missing.contains(&category)
    }

    /// Widened so large per-category counts cannot overflow.
    pub fn total_amenities(&self) -> u64 {
        self.amenities.values().map(|a| u64::from(a.count)).sum()
    }

    pub fn amenity_count(&self, category: &str) -> u32 {
        self.amenities.get(category).map_or(0, |a| a.count)
    }

    /// Limitations for the categories a section actually uses.
    pub fn limitations_for(&self, categories: &[EnrichmentCategory]) -> Vec<String> {
        let mut notes = self.limitations.clone();
        notes.extend(
            categories
                .iter()
                .filter(|category| self.is_missing(**category))
                .map(|category| limitation_for(*category).to_string()),
        );
        notes
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Applies the match rule and the fallback table to one property.
pub fn resolve(property: &PropertyRecord) -> ResolvedEnrichment {
    let mut resolved = ResolvedEnrichment::default();

    let enrichment = match property.enrichment_data.as_ref() {
        None => {
            resolved
                .limitations
                .push("No enrichment data supplied; neighbourhood analysis based on address only".to_string());
            None
        }
        Some(data) => match mismatch_distance(property, data) {
            Some(distance) => {
                tracing::warn!(
                    valuation_id = %property.valuation_id,
                    distance_m = distance,
                    "enrichment data does not match property location, discarding"
                );
                resolved.limitations.push(format!(
                    "Enrichment data discarded: its location is {distance:.0} m from the subject property"
                ));
                None
            }
            None => Some(data),
        },
    };

    let data = enrichment.cloned().unwrap_or_default();

    resolved.formatted_address = data.address.and_then(|a| a.formatted_address);
    resolved.visuals = take_or_default(
        &mut resolved.missing,
        EnrichmentCategory::Visuals,
        data.visuals.filter(|v| v.cover_image().is_some()),
    );
    resolved.amenities = take_or_default(
        &mut resolved.missing,
        EnrichmentCategory::Amenities,
        data.amenities.filter(|a| !a.is_empty()),
    );
    resolved.transport = take_or_default(
        &mut resolved.missing,
        EnrichmentCategory::Transport,
        data.transport.filter(|t| !t.is_empty()),
    );
    resolved.schools = take_or_default(
        &mut resolved.missing,
        EnrichmentCategory::Schools,
        data.schools.filter(|s| !s.is_empty()),
    );
    resolved.crime = take_or_default(&mut resolved.missing, EnrichmentCategory::Crime, data.crime);
    resolved.air_quality = take_or_default(
        &mut resolved.missing,
        EnrichmentCategory::AirQuality,
        data.air_quality,
    );
    resolved.solar = take_or_default(&mut resolved.missing, EnrichmentCategory::Solar, data.solar);
    resolved.commute = take_or_default(
        &mut resolved.missing,
        EnrichmentCategory::Commute,
        data.commute_to_city,
    );

    resolved
}

fn take_or_default<T: Default>(
    missing: &mut Vec<EnrichmentCategory>,
    category: EnrichmentCategory,
    value: Option<T>,
) -> T {
    match value {
        Some(value) => value,
        None => {
            missing.push(category);
            T::default()
        }
    }
}

/// Distance between the property and its enrichment when both carry
/// coordinates and they are at least the tolerance apart.
fn mismatch_distance(property: &PropertyRecord, data: &EnrichmentData) -> Option<f64> {
    let subject = property.property_data.coordinates()?;
    let address = data.address.as_ref()?;
    let enriched = (address.latitude?, address.longitude?);
    let distance = haversine_m(subject, enriched);
    (distance >= MATCH_TOLERANCE_M).then_some(distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::validate::fixtures::property;

    fn record(with_enrichment: bool) -> PropertyRecord {
        serde_json::from_value(property("v01", with_enrichment)).unwrap()
    }

    #[test]
    fn test_haversine_known_distance() {
        // One thousandth of a degree of latitude is about 111 m.
        let d = haversine_m((51.5, -0.1), (51.501, -0.1));
        assert!((d - 111.2).abs() < 0.5, "got {d}");
        assert_eq!(haversine_m((51.5, -0.1), (51.5, -0.1)), 0.0);
    }

    #[test]
    fn test_full_enrichment_has_no_fallbacks() {
        let resolved = resolve(&record(true));
        assert!(resolved.missing.is_empty());
        assert!(resolved.limitations.is_empty());
        assert_eq!(resolved.transport.len(), 2);
        assert_eq!(resolved.total_amenities(), 33);
        assert_eq!(resolved.amenity_count("gyms"), 0);
    }

    #[test]
    fn test_total_amenities_does_not_overflow() {
        let mut raw = property("v01", true);
        raw["enrichment_data"]["amenities"] = serde_json::json!({
            "supermarkets": {"count": u32::MAX},
            "parks": {"count": 1}
        });
        let record: PropertyRecord = serde_json::from_value(raw).unwrap();
        let resolved = resolve(&record);
        assert_eq!(resolved.total_amenities(), u64::from(u32::MAX) + 1);
    }

    #[test]
    fn test_absent_enrichment_falls_back_everywhere() {
        let resolved = resolve(&record(false));
        assert_eq!(resolved.missing.len(), FALLBACKS.len());
        assert!(resolved.transport.is_empty());
        assert!(resolved.amenities.is_empty());
        assert_eq!(resolved.limitations.len(), 1);

        let notes = resolved.limitations_for(&[EnrichmentCategory::Transport]);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1], limitation_for(EnrichmentCategory::Transport));
    }

    #[test]
    fn test_distant_enrichment_is_discarded() {
        let mut record = record(true);
        if let Some(address) = record
            .enrichment_data
            .as_mut()
            .and_then(|e| e.address.as_mut())
        {
            // Roughly 550 m north of the subject.
            address.latitude = Some(51.4886);
        }
        let resolved = resolve(&record);
        assert!(resolved.transport.is_empty());
        assert!(resolved.is_missing(EnrichmentCategory::Amenities));
        assert!(resolved.limitations[0].starts_with("Enrichment data discarded"));
    }

    #[test]
    fn test_enrichment_without_coordinates_is_kept() {
        let mut record = record(true);
        record.property_data.latitude = None;
        let resolved = resolve(&record);
        assert!(resolved.missing.is_empty());
    }

    #[test]
    fn test_partial_enrichment() {
        let mut record = record(true);
        if let Some(data) = record.enrichment_data.as_mut() {
            data.schools = Some(Vec::new());
            data.solar = None;
        }
        let resolved = resolve(&record);
        assert_eq!(
            resolved.missing,
            vec![EnrichmentCategory::Schools, EnrichmentCategory::Solar]
        );
        assert!(resolved.limitations.is_empty());
    }

    #[test]
    fn test_every_category_has_a_note() {
        for category in [
            EnrichmentCategory::Visuals,
            EnrichmentCategory::Amenities,
            EnrichmentCategory::Transport,
            EnrichmentCategory::Schools,
            EnrichmentCategory::Crime,
            EnrichmentCategory::AirQuality,
            EnrichmentCategory::Solar,
            EnrichmentCategory::Commute,
        ] {
            assert_ne!(limitation_for(category), "Enrichment data unavailable");
        }
    }
}
