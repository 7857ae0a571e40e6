use std::time::Duration;

use serde::Deserialize;

use super::{ImageUpload, UpstreamError, build_http_client, post_image};

const SERVICE: &str = "spread_estimator";

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct SpreadEstimationError(#[from] pub UpstreamError);

/// Estimates the share of leaf area showing disease, in percent.
#[async_trait::async_trait]
pub trait SpreadEstimator: Send + Sync {
    async fn estimate(&self, image: &ImageUpload) -> Result<f64, SpreadEstimationError>;
}

#[derive(Deserialize)]
struct SpreadResponse {
    spread_percentage: Option<f64>,
}

pub struct HttpSpreadEstimator {
    client: reqwest::Client,
    url: String,
}

impl HttpSpreadEstimator {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            url: url.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl SpreadEstimator for HttpSpreadEstimator {
    #[tracing::instrument(
        name = "upstream spread_estimator",
        skip(self, image),
        fields(upstream.url = %self.url, spread.percent)
    )]
    async fn estimate(&self, image: &ImageUpload) -> Result<f64, SpreadEstimationError> {
        let resp: SpreadResponse = post_image(&self.client, SERVICE, &self.url, image).await?;
        let percent = parse_spread(resp)?;

        tracing::Span::current().record("spread.percent", percent);

        Ok(percent)
    }
}

fn parse_spread(resp: SpreadResponse) -> Result<f64, SpreadEstimationError> {
    match resp.spread_percentage {
        Some(p) if (0.0..=100.0).contains(&p) => Ok(p),
        Some(p) => Err(invalid(format!("spread {p} outside 0..=100"))),
        None => Err(invalid("missing spread_percentage".to_string())),
    }
}

fn invalid(reason: String) -> SpreadEstimationError {
    SpreadEstimationError(UpstreamError::InvalidResponse {
        service: SERVICE,
        reason,
    })
}
