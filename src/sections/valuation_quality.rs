//! Comparable quality: similarity-weighted price-per-sqm dispersion.

use serde::Serialize;
use serde_json::json;

use super::SectionOutput;
use super::generator::SectionContext;
use super::registry::SectionId;
use crate::input::model::Comparable;

/// Decay constant of the dispersion penalty.
const ALPHA: f64 = 6.0;
const MIN_SIZE_SQM: f64 = 10.0;

pub const INSUFFICIENT: &str = "Insufficient valid comparables";
pub const COMPUTED: &str = "Computed";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispersion {
    pub status: &'static str,
    pub ppsqm_dispersion_cv: f64,
    pub ppsqm_dispersion_score: f64,
    pub weighted_mean_ppsqm: f64,
    pub sample_size: usize,
}

pub fn ppsqm_dispersion(comparables: &[Comparable]) -> Dispersion {
    let valid: Vec<(f64, f64)> = comparables
        .iter()
        .filter_map(|c| {
            let similarity = c.similarity_score.unwrap_or(0.0);
            (c.size_sqm > MIN_SIZE_SQM && c.price > 0.0 && similarity > 0.0)
                .then(|| (c.price / c.size_sqm, similarity))
        })
        .collect();

    if valid.is_empty() {
        return Dispersion {
            status: INSUFFICIENT,
            ppsqm_dispersion_cv: 0.0,
            ppsqm_dispersion_score: 0.0,
            weighted_mean_ppsqm: 0.0,
            sample_size: 0,
        };
    }

    let total: f64 = valid.iter().map(|(_, w)| w).sum();
    let mean: f64 = valid.iter().map(|(p, w)| (w / total) * p).sum();
    let variance: f64 = valid
        .iter()
        .map(|(p, w)| (w / total) * (p - mean).powi(2))
        .sum();
    let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };

    let mut score = (-ALPHA * cv).exp();
    if cv > 0.35 {
        score *= 0.6;
    }
    if cv > 0.50 {
        score *= 0.4;
    }

    Dispersion {
        status: COMPUTED,
        ppsqm_dispersion_cv: round_to(cv, 4),
        ppsqm_dispersion_score: round_to(score.clamp(0.0, 1.0), 4),
        weighted_mean_ppsqm: round_to(mean, 2),
        sample_size: valid.len(),
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn build(ctx: &SectionContext<'_>) -> SectionOutput {
    let dispersion =
        ppsqm_dispersion(&ctx.property.property_data.correction_layer.knn_comparables);

    let mut limitations = vec!["Statistics computed from supplied comparables only".to_string()];
    if dispersion.status == INSUFFICIENT {
        limitations.push(
            "No comparable had a usable size, price and similarity score; dispersion not assessed"
                .to_string(),
        );
    }

    let data = serde_json::to_value(&dispersion).unwrap_or_else(|_| json!({}));

    SectionOutput::deterministic(
        SectionId::ValuationQuality.spec(),
        "ppsqm-dispersion",
        data,
        vec!["Similarity scores from the comparable model are used as weights".to_string()],
        limitations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(price: f64, size_sqm: f64, similarity: Option<f64>) -> Comparable {
        Comparable {
            address: "1 Test Street".to_string(),
            distance_m: 100.0,
            property_type: "F".to_string(),
            tenure: "L".to_string(),
            size_sqm,
            bedrooms: 2.0,
            price,
            sale_date: "2025-06-01".to_string(),
            similarity_score: similarity,
        }
    }

    #[test]
    fn test_tight_cluster_scores_high() {
        let comps = vec![
            comp(500_000.0, 50.0, Some(0.95)),
            comp(510_000.0, 52.0, Some(0.90)),
            comp(480_000.0, 48.0, Some(0.85)),
            comp(700_000.0, 50.0, Some(0.40)),
        ];
        let result = ppsqm_dispersion(&comps);
        assert_eq!(result.status, COMPUTED);
        assert_eq!(result.sample_size, 4);
        assert!(result.ppsqm_dispersion_cv > 0.1 && result.ppsqm_dispersion_cv < 0.2);
        assert!(result.ppsqm_dispersion_score > 0.3 && result.ppsqm_dispersion_score < 0.6);
    }

    #[test]
    fn test_identical_comparables_score_one() {
        let comps = vec![comp(600_000.0, 60.0, Some(0.5)), comp(600_000.0, 60.0, Some(0.8))];
        let result = ppsqm_dispersion(&comps);
        assert_eq!(result.ppsqm_dispersion_cv, 0.0);
        assert_eq!(result.ppsqm_dispersion_score, 1.0);
        assert_eq!(result.weighted_mean_ppsqm, 10_000.0);
    }

    #[test]
    fn test_wide_dispersion_is_penalised() {
        let comps = vec![comp(200_000.0, 50.0, Some(1.0)), comp(900_000.0, 50.0, Some(1.0))];
        let result = ppsqm_dispersion(&comps);
        // cv is about 0.64, so both overrides apply: exp(-3.82) * 0.6 * 0.4
        assert!(result.ppsqm_dispersion_cv > 0.5);
        assert!(result.ppsqm_dispersion_score < 0.01);
    }

    #[test]
    fn test_filters_unusable_comparables() {
        let comps = vec![
            comp(500_000.0, 8.0, Some(0.9)),
            comp(0.0, 60.0, Some(0.9)),
            comp(500_000.0, 60.0, None),
            comp(500_000.0, 60.0, Some(0.0)),
        ];
        let result = ppsqm_dispersion(&comps);
        assert_eq!(result.status, INSUFFICIENT);
        assert_eq!(result.sample_size, 0);
        assert_eq!(result.ppsqm_dispersion_score, 0.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(1234.5678, 2), 1234.57);
    }
}
