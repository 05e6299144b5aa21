use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::AppState;
use crate::assembler::ContentsEntry;
use crate::error::{AppError, AppResult};
use crate::pipeline::{RunManifest, RunOptions};
use crate::store::{ReportSummary, StoredReport};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Default, Deserialize)]
pub struct CreateQuery {
    /// Comma-separated section ids.
    pub sections: Option<String>,
    #[serde(default)]
    pub resume: bool,
    #[serde(default)]
    pub skip_invalid_properties: bool,
}

impl CreateQuery {
    fn into_options(self, api_key: Option<String>) -> RunOptions {
        let sections = self.sections.map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        });
        RunOptions {
            sections,
            api_key,
            resume: self.resume,
            skip_invalid_properties: self.skip_invalid_properties,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReportView {
    pub valuation_id: String,
    pub report_id: Option<Uuid>,
    pub page_count: usize,
    pub contents: Vec<ContentsEntry>,
    pub limitations: Vec<String>,
    pub input_hash: String,
    pub document_hash: String,
}

#[derive(Debug, Serialize)]
pub struct CreateReportsResponse {
    pub manifest: RunManifest,
    pub reports: Vec<ReportView>,
}

pub async fn create_reports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CreateQuery>,
    Json(body): Json<Value>,
) -> AppResult<Json<CreateReportsResponse>> {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let outcome = state.pipeline.run(&body, query.into_options(api_key)).await?;

    let reports = outcome
        .reports
        .into_iter()
        .map(|report| ReportView {
            report_id: outcome
                .manifest
                .property(&report.valuation_id)
                .and_then(|p| p.report_id),
            valuation_id: report.valuation_id,
            page_count: report.page_count,
            contents: report.contents,
            limitations: report.limitations,
            input_hash: report.input_hash,
            document_hash: report.document_hash,
        })
        .collect();

    Ok(Json(CreateReportsResponse {
        manifest: outcome.manifest,
        reports,
    }))
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> AppResult<Json<Vec<ReportSummary>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);

    Ok(Json(state.reports.list_reports(limit, offset).await?))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StoredReport>> {
    let report = state
        .reports
        .get_report(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Report {} not found", id)))?;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::assembler::PlainTextRenderer;
    use crate::cache::test_support::ManualClock;
    use crate::input::validate::fixtures::{document, property};
    use crate::pipeline::{Pipeline, PipelineSettings, ProviderFactory};
    use crate::store::MemoryStore;

    fn state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let providers: ProviderFactory = Arc::new(|_, _| None);
        let pipeline = Pipeline::new(
            PipelineSettings::default(),
            providers,
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(ManualClock::at(2026, 1, 10)),
            Arc::new(PlainTextRenderer::default()),
        );
        AppState {
            pipeline: Arc::new(pipeline),
            reports: store,
        }
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = crate::routes::router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_query_sections_split() {
        let query = CreateQuery {
            sections: Some("instructions, valuation_quality,,".to_string()),
            ..CreateQuery::default()
        };
        let options = query.into_options(Some("k".to_string()));
        assert_eq!(
            options.sections,
            Some(vec!["instructions".to_string(), "valuation_quality".to_string()])
        );
        assert_eq!(options.api_key.as_deref(), Some("k"));
        assert!(!options.resume);
    }

    #[test]
    fn test_list_query_defaults() {
        let query: ListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, None);
        assert_eq!(query.offset, None);
    }

    #[tokio::test]
    async fn test_create_then_fetch_report() {
        let state = state();
        let doc = document(vec![property("v01", true)]);
        let (status, body) = send(
            state.clone(),
            post("/api/reports?sections=instructions,valuation_quality", &doc),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["manifest"]["properties"][0]["status"], "complete");
        let report = &body["reports"][0];
        assert_eq!(report["contents"][0]["start_page"], 3);
        let id = report["report_id"].as_str().unwrap().to_string();

        let (status, listed) = send(
            state.clone(),
            Request::get("/api/reports").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["id"], id);

        let (status, stored) = send(
            state,
            Request::get(format!("/api/reports/{id}")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["section_order"], json!(["instructions", "valuation_quality"]));
    }

    #[tokio::test]
    async fn test_invalid_document_is_unprocessable() {
        let mut doc = document(vec![property("v01", true)]);
        doc["properties"][0]["property_data"]["tenure"] = json!(7);

        let (status, body) = send(state(), post("/api/reports", &doc)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"][0]["path"], "properties[0].property_data.tenure");
    }

    #[tokio::test]
    async fn test_missing_credential_is_bad_request() {
        let doc = document(vec![property("v01", true)]);
        let (status, body) = send(state(), post("/api/reports", &doc)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("no credential"));
    }

    #[tokio::test]
    async fn test_unknown_report_is_not_found() {
        let uri = format!("/api/reports/{}", Uuid::new_v4());
        let (status, _) = send(state(), Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sections_listing_in_declared_order() {
        let (status, body) = send(
            state(),
            Request::get("/api/sections").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "instructions");
        assert_eq!(body.as_array().unwrap().len(), 9);
    }
}
