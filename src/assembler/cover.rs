use serde::Serialize;

use crate::input::fallback::{EnrichmentCategory, ResolvedEnrichment};
use crate::input::model::{PropertyRecord, ReportMetadata};

pub const PLACEHOLDER_NOTE: &str = "No property photograph available; a placeholder graphic is used on the cover";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoverImage {
    Photo { url: String },
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverPage {
    pub valuation_id: String,
    pub address: String,
    pub client_name: String,
    pub report_date: String,
    pub valuation_purpose: String,
    pub image: CoverImage,
}

impl CoverPage {
    pub fn for_property(
        metadata: &ReportMetadata,
        property: &PropertyRecord,
        enrichment: &ResolvedEnrichment,
    ) -> Self {
        let image = if enrichment.is_missing(EnrichmentCategory::Visuals) {
            None
        } else {
            enrichment.visuals.cover_image()
        };

        Self {
            valuation_id: property.valuation_id.clone(),
            address: enrichment
                .formatted_address
                .clone()
                .unwrap_or_else(|| property.address.one_line()),
            client_name: metadata.client_name.clone(),
            report_date: metadata.report_date.clone(),
            valuation_purpose: metadata.valuation_purpose.clone(),
            image: match image {
                Some(url) => CoverImage::Photo { url: url.to_string() },
                None => CoverImage::Placeholder,
            },
        }
    }

    pub fn limitation(&self) -> Option<&'static str> {
        matches!(self.image, CoverImage::Placeholder).then_some(PLACEHOLDER_NOTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::validate::fixtures::resolved_request;

    #[test]
    fn test_cover_uses_street_view() {
        let (request, enrichment) = resolved_request(true);
        let cover = CoverPage::for_property(&request.metadata, &request.properties[0], &enrichment[0]);
        assert!(matches!(cover.image, CoverImage::Photo { .. }));
        assert_eq!(cover.address, "12 Cheyne Walk, London SW3 5RA, UK");
        assert!(cover.limitation().is_none());
    }

    #[test]
    fn test_cover_placeholder_without_visuals() {
        let (request, enrichment) = resolved_request(false);
        let cover = CoverPage::for_property(&request.metadata, &request.properties[0], &enrichment[0]);
        assert_eq!(cover.image, CoverImage::Placeholder);
        assert_eq!(cover.limitation(), Some(PLACEHOLDER_NOTE));
        assert_eq!(cover.client_name, "Harbour Private Bank");
    }
}
