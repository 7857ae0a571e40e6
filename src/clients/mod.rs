//! HTTP clients for the services the diagnosis pipeline depends on.

pub mod classifier;
pub mod spread;
pub mod weather;

pub use classifier::{ClassificationError, DiseaseClassifier, HttpDiseaseClassifier};
pub use spread::{HttpSpreadEstimator, SpreadEstimationError, SpreadEstimator};
pub use weather::{OpenMeteoAggregator, WeatherAggregator, WeatherError};

use std::time::{Duration, Instant};

use bytes::Bytes;
use opentelemetry::KeyValue;
use reqwest::multipart::{Form, Part};

use crate::telemetry::UPSTREAM_CALL_DURATION;

/// An uploaded crop photo, shared by every stage that needs the pixels.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{service} timed out")]
    Timeout { service: &'static str },

    #[error("request to {service} failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },
}

impl UpstreamError {
    pub(crate) fn from_reqwest(service: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            UpstreamError::Timeout { service }
        } else {
            UpstreamError::Transport { service, source }
        }
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Posts the image as the `image` field of a multipart form and decodes a
/// JSON reply. Non-2xx responses become `UpstreamError::Status`.
pub(crate) async fn post_image<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    service: &'static str,
    url: &str,
    image: &ImageUpload,
) -> Result<T, UpstreamError> {
    let start = Instant::now();
    let result = send_image(client, service, url, image).await;

    let outcome = if result.is_ok() { "ok" } else { "error" };
    UPSTREAM_CALL_DURATION.record(
        start.elapsed().as_secs_f64(),
        &[
            KeyValue::new("upstream.service", service),
            KeyValue::new("upstream.outcome", outcome),
        ],
    );

    result
}

async fn send_image<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    service: &'static str,
    url: &str,
    image: &ImageUpload,
) -> Result<T, UpstreamError> {
    let mut part = Part::bytes(image.bytes.to_vec()).file_name(image.file_name.clone());
    if let Some(content_type) = image.content_type.as_deref() {
        part = part
            .mime_str(content_type)
            .map_err(|e| UpstreamError::from_reqwest(service, e))?;
    }
    let form = Form::new().part("image", part);

    let response = client
        .post(url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| UpstreamError::from_reqwest(service, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(UpstreamError::Status {
            service,
            status,
            body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| UpstreamError::InvalidResponse {
            service,
            reason: e.to_string(),
        })
}
