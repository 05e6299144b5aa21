use axum::Json;

use crate::sections::SectionSpec;
use crate::sections::registry::all_sections;

/// Registered sections in declared order.
pub async fn list_sections() -> Json<&'static [SectionSpec]> {
    Json(all_sections())
}
