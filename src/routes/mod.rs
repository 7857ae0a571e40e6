pub mod diagnose;
pub mod health;
pub mod reports;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::Uri,
    routing::{get, post},
};
use tower_http::services::ServeDir;

use crate::AppState;
use crate::error::AppError;

pub fn create_router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/crop/save", post(diagnose::save_crop))
        .route("/getReports", get(reports::list_reports))
        .route("/getSingleReport/{id}", get(reports::get_single_report))
        .nest_service("/uploads", uploads)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn not_found(uri: Uri) -> AppError {
    AppError::RouteNotFound(uri.path().to_string())
}
