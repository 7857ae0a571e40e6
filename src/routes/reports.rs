use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::AppState;
use crate::db::StoreError;
use crate::error::{AppError, AppResult};
use crate::models::RecordSummary;

/// `GET /getReports`: every record's summary, oldest first, under `array`.
pub async fn list_reports(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let records: Vec<RecordSummary> = state.store.list().await?;
    Ok(Json(json!({ "array": records })))
}

/// `GET /getSingleReport/{id}`: the stored report, `null` until the pipeline
/// has written it.
pub async fn get_single_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| AppError::Validation(format!("invalid record id: {id}")))?;

    let record = state
        .store
        .get(id)
        .await?
        .ok_or(StoreError::NotFound(id))?;

    Ok(Json(json!({ "report": record.report })))
}
