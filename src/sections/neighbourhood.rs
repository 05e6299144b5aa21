//! Neighbourhood and location overview, reflected from enrichment data.

use serde_json::{Value, json};

use super::SectionOutput;
use super::comparables::group_thousands;
use super::generator::SectionContext;
use super::registry::SectionId;
use crate::input::fallback::{EnrichmentCategory, ResolvedEnrichment};
use crate::input::model::TransportStation;

const MAX_STATIONS: usize = 10;

const USED_CATEGORIES: &[EnrichmentCategory] = &[
    EnrichmentCategory::Transport,
    EnrichmentCategory::Amenities,
    EnrichmentCategory::Schools,
    EnrichmentCategory::Crime,
    EnrichmentCategory::AirQuality,
    EnrichmentCategory::Commute,
];

pub fn build(ctx: &SectionContext<'_>) -> SectionOutput {
    let enrichment = ctx.enrichment;
    let address = enrichment
        .formatted_address
        .clone()
        .unwrap_or_else(|| ctx.property.address.one_line());

    let mut data = json!({
        "paragraphs": paragraphs(&address, enrichment),
        "transport_data": transport_rows(&enrichment.transport),
        "amenities": enrichment
            .amenities
            .iter()
            .map(|(category, entry)| json!({"category": category, "count": entry.count}))
            .collect::<Vec<_>>(),
    });

    if !enrichment.is_missing(EnrichmentCategory::Visuals)
        && let Ok(visuals) = serde_json::to_value(&enrichment.visuals)
    {
        data["visuals"] = visuals;
    }

    let mut limitations = enrichment.limitations_for(USED_CATEGORIES);
    limitations.push("Desktop analysis only; no physical site visit conducted".to_string());

    SectionOutput::deterministic(
        SectionId::NeighbourhoodOverview.spec(),
        "neighbourhood-reflector",
        data,
        vec!["Analysis based on available mapping and public data sources".to_string()],
        limitations,
    )
}

fn paragraphs(address: &str, e: &ResolvedEnrichment) -> Vec<String> {
    let commute = e.commute.duration.as_deref().unwrap_or("not available");
    let mut out = vec![format!(
        "The subject property at {address} lies within an established residential \
         neighbourhood. The immediate area combines period housing stock with mature \
         urban infrastructure, and values have historically been supported by both \
         locational quality and connectivity."
    )];

    let stations: Vec<&str> = e
        .transport
        .iter()
        .take(5)
        .filter_map(|s| s.name.as_deref())
        .filter(|name| !name.trim().is_empty())
        .collect();
    if stations.is_empty() {
        if e.commute.duration.is_some() {
            out.push(format!(
                "Travel time to central London is approximately {commute}, giving reasonable \
                 access to the main employment centres."
            ));
        }
    } else {
        out.push(format!(
            "The area is served by several public transport nodes, including {}. Travel time \
             to central London is approximately {commute}. Good connectivity supports both \
             owner-occupier demand and rental liquidity.",
            stations.iter().take(3).copied().collect::<Vec<_>>().join(", ")
        ));
    }

    let total = e.total_amenities();
    if total > 0 {
        let details: Vec<String> = [
            ("supermarkets", "retail and grocery outlets"),
            ("restaurants", "dining venues"),
            ("gyms", "fitness facilities"),
            ("parks", "green spaces"),
        ]
        .into_iter()
        .filter_map(|(key, label)| match e.amenity_count(key) {
            0 => None,
            n => Some(format!("{n} {label}")),
        })
        .collect();
        let summary = if details.is_empty() {
            format!("{total} amenities")
        } else {
            details.join(", ")
        };
        out.push(format!(
            "Day-to-day amenity provision is well developed, with {summary} in the immediate \
             vicinity. This supports a walkable neighbourhood character and reduces dependence \
             on private transport."
        ));
    }

    let schools: Vec<&str> = e
        .schools
        .iter()
        .filter_map(|s| s.name.as_deref())
        .take(2)
        .collect();
    if !schools.is_empty() {
        out.push(format!(
            "The area is served by {} educational institutions, including {}. School provision \
             underpins family demand and long-term price resilience.",
            e.schools.len(),
            schools.join(", ")
        ));
    }

    if e.crime.total_incidents > 0 {
        out.push(format!(
            "Local crime data records {} incidents over the analysis period, with {} the main \
             category. This level is consistent with a dense urban residential area and is not \
             expected to weigh materially on demand.",
            e.crime.total_incidents,
            top_crime_category(&e.crime.top_categories)
        ));
    }

    let mut environment = Vec::new();
    if let Some(aqi) = e.air_quality.aqi.as_ref().filter(|v| !v.is_null()) {
        let aqi = aqi.as_str().map_or_else(|| aqi.to_string(), str::to_string);
        match e.air_quality.category.as_deref() {
            Some(category) => environment.push(format!("an Air Quality Index of {aqi} ({category})")),
            None => environment.push(format!("an Air Quality Index of {aqi}")),
        }
    }
    if let Some(kwh) = e.solar.annual_kwh.filter(|kwh| *kwh > 0.0) {
        environment.push(format!(
            "solar generation potential of about {} kWh a year",
            group_thousands(kwh.round() as u64)
        ));
    }
    let parks = e.amenity_count("parks");
    if !environment.is_empty() || parks > 0 {
        let mut text = String::from("Environmental quality adds to residential appeal.");
        if !environment.is_empty() {
            text.push_str(&format!(" The area records {}.", environment.join(" and ")));
        }
        if parks > 0 {
            text.push_str(&format!(" There are {parks} parks and green spaces nearby."));
        }
        out.push(text);
    }

    out.push(
        "Taken together, the neighbourhood's connectivity, amenities and residential character \
         support demand across several buyer segments, which tends to sustain liquidity and \
         price stability through the market cycle."
            .to_string(),
    );
    out
}

fn top_crime_category(categories: &[Value]) -> String {
    let raw = match categories.first() {
        Some(Value::Array(pair)) => pair.first().and_then(Value::as_str),
        Some(Value::String(name)) => Some(name.as_str()),
        _ => None,
    };
    raw.map(title_case).unwrap_or_else(|| "local incidents".to_string())
}

fn title_case(raw: &str) -> String {
    raw.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn transport_rows(stations: &[TransportStation]) -> Vec<Value> {
    stations
        .iter()
        .take(MAX_STATIONS)
        .filter_map(|station| {
            let name = station.name.as_deref().filter(|n| !n.trim().is_empty())?;
            Some(json!({
                "name": name,
                "distance": station_distance(station),
                "type": station
                    .station_type
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| infer_station_type(name)),
            }))
        })
        .collect()
}

fn station_distance(station: &TransportStation) -> String {
    match (station.distance_estimate_m, station.distance.as_deref()) {
        (Some(m), _) if m > 0.0 && m < 1000.0 => format!("{} m", m as u64),
        (Some(m), _) if m >= 1000.0 => format!("{:.1} km", m / 1000.0),
        (_, Some(text)) if !text.trim().is_empty() => text.trim().to_string(),
        _ => "N/A".to_string(),
    }
}

fn infer_station_type(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    // "station" wins over "rail": named stations in the feed are mostly Underground.
    if has(&["underground", "tube", "station"]) {
        "Underground"
    } else if has(&["rail", "railway", "train"]) {
        "Rail"
    } else if has(&["bus", "stop"]) {
        "Bus"
    } else {
        // Most London stations in the enrichment feed are Underground.
        "Underground"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::validate::fixtures::resolved_request;

    #[test]
    fn test_full_enrichment() {
        let (request, enrichment) = resolved_request(true);
        let ctx = SectionContext::new(&request.metadata, &request.properties[0], &enrichment[0]);
        let output = build(&ctx);

        assert!(output.validate().is_ok());
        let transport = output.data["transport_data"].as_array().unwrap();
        assert_eq!(transport.len(), 2);
        assert_eq!(transport[0]["distance"], "850 m");
        assert_eq!(transport[1]["distance"], "1.6 km");
        assert_eq!(transport[1]["type"], "Rail");
        assert_eq!(output.data["amenities"].as_array().unwrap().len(), 3);
        assert!(output.data["visuals"]["street_view_url"].is_string());
        assert_eq!(output.limitations.len(), 1);

        let paragraphs = output.data["paragraphs"].as_array().unwrap();
        assert!(paragraphs[0].as_str().unwrap().contains("12 Cheyne Walk, London SW3 5RA, UK"));
        assert!(paragraphs.iter().any(|p| p.as_str().unwrap().contains("Anti Social Behaviour")));
    }

    #[test]
    fn test_missing_enrichment_degrades() {
        let (request, enrichment) = resolved_request(false);
        let ctx = SectionContext::new(&request.metadata, &request.properties[0], &enrichment[0]);
        let output = build(&ctx);

        assert!(output.validate().is_ok());
        assert_eq!(output.data["transport_data"], json!([]));
        assert_eq!(output.data["amenities"], json!([]));
        assert!(output.data.get("visuals").is_none());
        assert!(output.limitations.iter().any(|l| l.starts_with("No enrichment data supplied")));
        assert!(output.limitations.iter().any(|l| l.starts_with("Transport data unavailable")));
        assert_eq!(output.data["paragraphs"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_station_distance_formats() {
        let station = |m: Option<f64>, text: Option<&str>| TransportStation {
            name: Some("Bank".to_string()),
            distance: text.map(str::to_string),
            distance_estimate_m: m,
            station_type: None,
        };
        assert_eq!(station_distance(&station(Some(999.9), None)), "999 m");
        assert_eq!(station_distance(&station(Some(2360.0), None)), "2.4 km");
        assert_eq!(station_distance(&station(None, Some("0.3 mi"))), "0.3 mi");
        assert_eq!(station_distance(&station(None, None)), "N/A");
    }

    #[test]
    fn test_transport_rows_capped_and_named() {
        let mut stations: Vec<TransportStation> = (0..12)
            .map(|i| TransportStation {
                name: Some(format!("Stop {i} Bus")),
                ..Default::default()
            })
            .collect();
        stations.insert(0, TransportStation::default());
        let rows = transport_rows(&stations);
        assert_eq!(rows.len(), 9);
        assert_eq!(rows[0]["type"], "Bus");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(group_thousands(3200), "3,200");
        assert_eq!(title_case("vehicle-crime"), "Vehicle Crime");
        assert_eq!(infer_station_type("Sloane Square"), "Underground");
    }

    #[test]
    fn test_station_type_precedence() {
        assert_eq!(infer_station_type("Clapham Junction Rail Station"), "Underground");
        assert_eq!(infer_station_type("Imperial Wharf Rail"), "Rail");
        assert_eq!(infer_station_type("King's Road Bus Stop"), "Bus");
    }

    #[test]
    fn test_huge_amenity_counts_keep_paragraph() {
        let (request, mut enrichment) = resolved_request(true);
        enrichment[0].amenities.get_mut("supermarkets").unwrap().count = u32::MAX;
        let ctx = SectionContext::new(&request.metadata, &request.properties[0], &enrichment[0]);
        let output = build(&ctx);

        let paragraphs = output.data["paragraphs"].as_array().unwrap();
        assert!(paragraphs
            .iter()
            .any(|p| p.as_str().unwrap().contains("4294967295 retail and grocery outlets")));
    }
}
