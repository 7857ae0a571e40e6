use std::time::Duration;

use serde::Deserialize;

use super::{ImageUpload, UpstreamError, build_http_client, post_image};

const SERVICE: &str = "disease_classifier";

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ClassificationError(#[from] pub UpstreamError);

/// Maps a crop photo to a disease label.
#[async_trait::async_trait]
pub trait DiseaseClassifier: Send + Sync {
    async fn classify(&self, image: &ImageUpload) -> Result<String, ClassificationError>;
}

#[derive(Deserialize)]
struct PredictionResponse {
    prediction: Option<String>,
}

pub struct HttpDiseaseClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpDiseaseClassifier {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            url: url.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl DiseaseClassifier for HttpDiseaseClassifier {
    #[tracing::instrument(
        name = "upstream disease_classifier",
        skip(self, image),
        fields(upstream.url = %self.url, disease.label)
    )]
    async fn classify(&self, image: &ImageUpload) -> Result<String, ClassificationError> {
        let resp: PredictionResponse = post_image(&self.client, SERVICE, &self.url, image).await?;
        let label = parse_label(resp)?;

        tracing::Span::current().record("disease.label", label.as_str());

        Ok(label)
    }
}

fn parse_label(resp: PredictionResponse) -> Result<String, ClassificationError> {
    match resp.prediction.map(|p| p.trim().to_string()) {
        Some(label) if !label.is_empty() => Ok(label),
        _ => Err(ClassificationError(UpstreamError::InvalidResponse {
            service: SERVICE,
            reason: "missing prediction label".to_string(),
        })),
    }
}
