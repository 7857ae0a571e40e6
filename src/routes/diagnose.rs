use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use tracing::Instrument;

use crate::AppState;
use crate::clients::ImageUpload;
use crate::error::{AppError, AppResult};
use crate::models::Location;

/// `POST /api/crop/save`: multipart upload of `image`, optional `location`
/// (JSON text) and optional `language`.
pub async fn save_crop(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<Value>)> {
    let form = read_form(multipart).await?;

    let image = form
        .image
        .filter(|image| !image.bytes.is_empty())
        .ok_or_else(|| AppError::Validation("No image file uploaded".to_string()))?;
    let location = match form.location.as_deref() {
        Some(raw) => parse_location(raw)?,
        None => None,
    };
    let language = form.language;

    tracing::info!(
        image_bytes = image.bytes.len(),
        has_location = location.is_some(),
        language = language.as_deref().unwrap_or("(default)"),
        "Diagnosis requested"
    );

    // Detached so a client disconnect does not cancel a half-written record.
    let pipeline = state.pipeline.clone();
    let diagnosis = tokio::spawn(
        async move { pipeline.diagnose(image, location, language).await }
            .instrument(tracing::Span::current()),
    )
    .await
    .map_err(|e| AppError::Internal(format!("diagnosis task failed: {e}")))??;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "report": diagnosis.report })),
    ))
}

#[derive(Debug, Default)]
struct CropForm {
    image: Option<ImageUpload>,
    location: Option<String>,
    language: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> AppResult<CropForm> {
    let mut form = CropForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("failed to read image: {e}")))?;
                form.image = Some(ImageUpload {
                    bytes,
                    file_name,
                    content_type,
                });
            }
            "location" | "language" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("failed to read {name}: {e}")))?;
                if name == "location" {
                    form.location = Some(text);
                } else {
                    form.language = Some(text);
                }
            }
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

/// Empty text and JSON `null` mean no location. Anything else must be a
/// `{latitude, longitude}` object.
fn parse_location(raw: &str) -> AppResult<Option<Location>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Option<Location>>(raw).map_err(|e| {
        AppError::Validation(format!(
            "location must be JSON {{latitude, longitude}}: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location_full() {
        let location = parse_location(r#"{"latitude": 18.52, "longitude": 73.85}"#)
            .unwrap()
            .unwrap();
        assert_eq!(location.coordinates(), Some((18.52, 73.85)));
    }

    #[test]
    fn test_parse_location_absent_values() {
        assert_eq!(parse_location("").unwrap(), None);
        assert_eq!(parse_location("  ").unwrap(), None);
        assert_eq!(parse_location("null").unwrap(), None);
    }

    #[test]
    fn test_parse_location_partial_object() {
        let location = parse_location(r#"{"latitude": null, "longitude": 73.85}"#)
            .unwrap()
            .unwrap();
        assert_eq!(location.coordinates(), None);
    }

    #[test]
    fn test_parse_location_rejects_garbage() {
        let err = parse_location("somewhere near Pune").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
