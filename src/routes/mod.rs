pub mod health;
pub mod reports;
pub mod sections;

use axum::Router;
use axum::routing::get;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/sections", get(sections::list_sections))
        .route(
            "/api/reports",
            get(reports::list_reports).post(reports::create_reports),
        )
        .route("/api/reports/{id}", get(reports::get_report))
        .with_state(state)
}
