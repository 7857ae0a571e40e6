use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use thiserror::Error;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::db::StoreError;
use crate::pipeline::PipelineError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No route for {0}")]
    RouteNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Internal error: {0}")]
    Internal(String),
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
    /// Status code, client-facing message and error detail for the body.
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "invalid request", msg.clone()),
            AppError::RouteNotFound(path) => (
                StatusCode::NOT_FOUND,
                "route not found",
                format!("no route for {path}"),
            ),
            AppError::Store(StoreError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "record not found",
                format!("record {id} not found"),
            ),
            AppError::Store(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error",
                e.to_string(),
            ),
            AppError::Pipeline(e) => {
                let (status, message) = match e {
                    PipelineError::Classification(_) => {
                        (StatusCode::BAD_GATEWAY, "disease detection failed")
                    }
                    PipelineError::SpreadEstimation(_) => {
                        (StatusCode::BAD_GATEWAY, "spread estimation failed")
                    }
                    PipelineError::Weather(_) => {
                        (StatusCode::BAD_GATEWAY, "error fetching weather data")
                    }
                    PipelineError::ReportGeneration(_) | PipelineError::MissingOutput(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "report generation failed",
                    ),
                    PipelineError::ImageStorage(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "failed to store image")
                    }
                    PipelineError::Persistence { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "database error")
                    }
                };
                (status, message, e.to_string())
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error",
                msg.clone(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, error) = self.parts();

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = if let Some(trace_id) = get_trace_id() {
            json!({
                "message": message,
                "error": error,
                "trace_id": trace_id,
            })
        } else {
            json!({
                "message": message,
                "error": error,
            })
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
