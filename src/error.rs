use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opentelemetry::trace::TraceContextExt;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::ConfigError;
use crate::input::ValidationErrors;
use crate::pipeline::RunError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Validation(errors) => AppError::Validation(errors),
            RunError::Config(err) => AppError::Config(err),
        }
    }
}

fn get_trace_id() -> Option<String> {
    let span = Span::current();
    let context = span.context();
    let span_ref = context.span();
    let span_context = span_ref.span_context();

    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        match self {
            AppError::Validation(errors) => json!({
                "error": "input document failed validation",
                "errors": errors.errors(),
            }),
            AppError::Store(err) => {
                tracing::error!(error = %err, "Store error");
                json!({ "error": "Internal server error" })
            }
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = self.body();
        body["status"] = json!(status.as_u16());
        if let Some(trace_id) = get_trace_id() {
            body["trace_id"] = json!(trace_id);
        }

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FieldError;

    fn validation() -> AppError {
        AppError::Validation(ValidationErrors(vec![FieldError {
            path: "properties[0].property_data.tenure".to_string(),
            expected: "string".to_string(),
            actual: "number".to_string(),
        }]))
    }

    #[test]
    fn test_error_status_codes() {
        let cases = vec![
            (validation(), StatusCode::UNPROCESSABLE_ENTITY),
            (
                AppError::Config(ConfigError::MissingCredential {
                    provider: "google".to_string(),
                }),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::NotFound("report".to_string()), StatusCode::NOT_FOUND),
            (
                AppError::Store(StoreError::Unavailable("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status(), expected, "{error}");
        }
    }

    #[test]
    fn test_validation_body_lists_every_error() {
        let body = validation().body();
        assert_eq!(body["errors"][0]["path"], "properties[0].property_data.tenure");
        assert_eq!(body["errors"][0]["expected"], "string");
    }

    #[test]
    fn test_store_errors_are_not_leaked() {
        let body = AppError::Store(StoreError::Unavailable("password=hunter2".to_string())).body();
        assert_eq!(body["error"], "Internal server error");
    }

    #[test]
    fn test_run_error_conversion() {
        let err: AppError = RunError::Config(ConfigError::UnknownSection("bogus".to_string())).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Configuration error: unknown section \"bogus\"");
    }
}
