use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate, Utc};
use opentelemetry::KeyValue;
use serde::Deserialize;

use super::{UpstreamError, build_http_client};
use crate::models::WeeklyAverages;
use crate::telemetry::UPSTREAM_CALL_DURATION;

const SERVICE: &str = "weather_provider";
const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("incomplete weather payload: {0}")]
    Incomplete(String),
}

/// Reduces a week of historical weather at a location to three averages.
#[async_trait::async_trait]
pub trait WeatherAggregator: Send + Sync {
    async fn weekly_averages(&self, latitude: f64, longitude: f64)
    -> Result<WeeklyAverages, WeatherError>;
}

/// The seven full days before `today`: `[today - 7, today - 1]`.
pub fn weekly_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today.checked_sub_days(Days::new(7)).unwrap_or(NaiveDate::MIN);
    let end = today.checked_sub_days(Days::new(1)).unwrap_or(NaiveDate::MIN);
    (start, end)
}

#[derive(Debug, Deserialize)]
pub struct ForecastPayload {
    pub hourly: Option<HourlySeries>,
    pub daily: Option<DailySeries>,
}

#[derive(Debug, Deserialize)]
pub struct HourlySeries {
    pub temperature_2m: Option<Vec<Option<f64>>>,
    pub relative_humidity_2m: Option<Vec<Option<f64>>>,
}

#[derive(Debug, Deserialize)]
pub struct DailySeries {
    pub sunshine_duration: Option<Vec<Option<f64>>>,
}

/// Averages a provider payload. Any missing, empty or gappy series is an
/// error; partial data is never averaged.
pub fn aggregate(payload: &ForecastPayload) -> Result<WeeklyAverages, WeatherError> {
    let hourly = payload
        .hourly
        .as_ref()
        .ok_or_else(|| WeatherError::Incomplete("missing hourly series".to_string()))?;
    let daily = payload
        .daily
        .as_ref()
        .ok_or_else(|| WeatherError::Incomplete("missing daily series".to_string()))?;

    let temps = complete_series("temperature_2m", hourly.temperature_2m.as_deref())?;
    let humidity = complete_series(
        "relative_humidity_2m",
        hourly.relative_humidity_2m.as_deref(),
    )?;
    if temps.len() != humidity.len() {
        return Err(WeatherError::Incomplete(format!(
            "hourly series lengths differ ({} temperature, {} humidity)",
            temps.len(),
            humidity.len()
        )));
    }
    let sunshine = complete_series("sunshine_duration", daily.sunshine_duration.as_deref())?;

    Ok(WeeklyAverages {
        avg_temp: mean(&temps),
        avg_humidity: mean(&humidity),
        avg_sunlight: mean(&sunshine) / SECONDS_PER_HOUR,
    })
}

fn complete_series(name: &str, series: Option<&[Option<f64>]>) -> Result<Vec<f64>, WeatherError> {
    let series = series.ok_or_else(|| WeatherError::Incomplete(format!("missing {name}")))?;
    if series.is_empty() {
        return Err(WeatherError::Incomplete(format!("empty {name}")));
    }
    series
        .iter()
        .map(|v| v.ok_or_else(|| WeatherError::Incomplete(format!("gap in {name}"))))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Open-Meteo historical forecast API.
pub struct OpenMeteoAggregator {
    client: reqwest::Client,
    url: String,
}

impl OpenMeteoAggregator {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            url: url.to_string(),
        }
    }

    async fn fetch(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ForecastPayload, UpstreamError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("start_date", start.to_string()),
                ("end_date", end.to_string()),
                (
                    "hourly",
                    "temperature_2m,relative_humidity_2m".to_string(),
                ),
                ("daily", "sunshine_duration".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                service: SERVICE,
                status,
                body,
            });
        }

        response
            .json::<ForecastPayload>()
            .await
            .map_err(|e| UpstreamError::InvalidResponse {
                service: SERVICE,
                reason: e.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl WeatherAggregator for OpenMeteoAggregator {
    #[tracing::instrument(
        name = "upstream weather_provider",
        skip(self),
        fields(
            weather.start_date,
            weather.end_date,
            weather.avg_temp,
            weather.avg_humidity,
            weather.avg_sunlight,
        )
    )]
    async fn weekly_averages(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<WeeklyAverages, WeatherError> {
        let (start, end) = weekly_window(Utc::now().date_naive());

        let span = tracing::Span::current();
        span.record("weather.start_date", start.to_string());
        span.record("weather.end_date", end.to_string());

        let started = Instant::now();
        let result = self.fetch(latitude, longitude, start, end).await;
        UPSTREAM_CALL_DURATION.record(
            started.elapsed().as_secs_f64(),
            &[
                KeyValue::new("upstream.service", SERVICE),
                KeyValue::new("upstream.outcome", if result.is_ok() { "ok" } else { "error" }),
            ],
        );

        let averages = aggregate(&result?)?;

        span.record("weather.avg_temp", averages.avg_temp);
        span.record("weather.avg_humidity", averages.avg_humidity);
        span.record("weather.avg_sunlight", averages.avg_sunlight);

        Ok(averages)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::{
        Json, Router,
        extract::{Query, State},
        http::StatusCode,
        routing::get,
    };
    use serde_json::{Value, json};

    use super::*;
    use crate::clients::tests::serve;

    fn payload(temps: Vec<f64>, humidity: Vec<f64>, sunshine: Vec<f64>) -> ForecastPayload {
        ForecastPayload {
            hourly: Some(HourlySeries {
                temperature_2m: Some(temps.into_iter().map(Some).collect()),
                relative_humidity_2m: Some(humidity.into_iter().map(Some).collect()),
            }),
            daily: Some(DailySeries {
                sunshine_duration: Some(sunshine.into_iter().map(Some).collect()),
            }),
        }
    }

    #[test]
    fn test_weekly_window_excludes_today() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let (start, end) = weekly_window(today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
    }

    #[test]
    fn test_weekly_window_crosses_month_boundary() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        let (start, end) = weekly_window(today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 2, 23).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }

    #[test]
    fn test_constant_week_averages_to_the_constant() {
        let hours = 7 * 24;
        let p = payload(vec![20.0; hours], vec![65.0; hours], vec![3600.0; 7]);
        let avg = aggregate(&p).unwrap();
        assert_eq!(avg.avg_temp, 20.0);
        assert_eq!(avg.avg_humidity, 65.0);
        assert_eq!(avg.avg_sunlight, 1.0);
    }

    #[test]
    fn test_sunlight_is_mean_daily_seconds_in_hours() {
        let p = payload(vec![10.0, 30.0], vec![50.0, 70.0], vec![3600.0, 7200.0]);
        let avg = aggregate(&p).unwrap();
        assert_eq!(avg.avg_temp, 20.0);
        assert_eq!(avg.avg_humidity, 60.0);
        assert_eq!(avg.avg_sunlight, 1.5);
    }

    #[test]
    fn test_decodes_provider_json() {
        let raw = r#"{
            "latitude": 18.5,
            "longitude": 73.875,
            "hourly": {
                "time": ["2025-03-03T00:00", "2025-03-03T01:00"],
                "temperature_2m": [21.4, 22.6],
                "relative_humidity_2m": [80, 84]
            },
            "daily": {
                "time": ["2025-03-03"],
                "sunshine_duration": [36000.0]
            }
        }"#;
        let p: ForecastPayload = serde_json::from_str(raw).unwrap();
        let avg = aggregate(&p).unwrap();
        assert!((avg.avg_temp - 22.0).abs() < 1e-9);
        assert_eq!(avg.avg_humidity, 82.0);
        assert_eq!(avg.avg_sunlight, 10.0);
    }

    #[test]
    fn test_missing_daily_series_is_an_error() {
        let p = ForecastPayload {
            daily: None,
            ..payload(vec![20.0], vec![50.0], vec![])
        };
        let err = aggregate(&p).unwrap_err();
        assert!(err.to_string().contains("missing daily series"));
    }

    #[test]
    fn test_empty_series_is_an_error() {
        let p = payload(vec![], vec![], vec![3600.0]);
        assert!(matches!(aggregate(&p), Err(WeatherError::Incomplete(_))));
    }

    #[test]
    fn test_null_sample_is_an_error() {
        let raw = r#"{
            "hourly": {"temperature_2m": [20.0, null], "relative_humidity_2m": [50, 55]},
            "daily": {"sunshine_duration": [3600.0]}
        }"#;
        let p: ForecastPayload = serde_json::from_str(raw).unwrap();
        let err = aggregate(&p).unwrap_err();
        assert!(err.to_string().contains("gap in temperature_2m"));
    }

    #[test]
    fn test_mismatched_hourly_lengths_is_an_error() {
        let p = payload(vec![20.0, 21.0], vec![50.0], vec![3600.0]);
        assert!(matches!(aggregate(&p), Err(WeatherError::Incomplete(_))));
    }

    type SeenQueries = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn record_query(
        State(seen): State<SeenQueries>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        seen.lock().unwrap().push(params);
        Json(json!({
            "hourly": {
                "temperature_2m": [20.0, 20.0],
                "relative_humidity_2m": [80, 90]
            },
            "daily": {"sunshine_duration": [3600.0, 7200.0]}
        }))
    }

    #[tokio::test]
    async fn test_open_meteo_query_and_averages() {
        let seen = SeenQueries::default();
        let base = serve(
            Router::new()
                .route("/v1/forecast", get(record_query))
                .with_state(seen.clone()),
        )
        .await;

        let weather =
            OpenMeteoAggregator::new(&format!("{base}/v1/forecast"), Duration::from_secs(5));
        let avg = weather.weekly_averages(18.52, 73.85).await.unwrap();

        assert_eq!(avg.avg_temp, 20.0);
        assert_eq!(avg.avg_humidity, 85.0);
        assert_eq!(avg.avg_sunlight, 1.5);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let q = &seen[0];
        assert_eq!(q["latitude"], "18.52");
        assert_eq!(q["longitude"], "73.85");
        assert_eq!(q["hourly"], "temperature_2m,relative_humidity_2m");
        assert_eq!(q["daily"], "sunshine_duration");
        assert_eq!(q["timezone"], "auto");
        let start: NaiveDate = q["start_date"].parse().unwrap();
        let end: NaiveDate = q["end_date"].parse().unwrap();
        assert_eq!((end - start).num_days(), 6);
    }

    #[tokio::test]
    async fn test_open_meteo_server_error_is_status() {
        let base = serve(Router::new().route(
            "/v1/forecast",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;

        let weather =
            OpenMeteoAggregator::new(&format!("{base}/v1/forecast"), Duration::from_secs(5));
        let err = weather.weekly_averages(18.52, 73.85).await.unwrap_err();

        assert!(
            matches!(
                &err,
                WeatherError::Upstream(UpstreamError::Status { status, .. })
                    if *status == reqwest::StatusCode::BAD_GATEWAY
            ),
            "expected status error, got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_open_meteo_slow_reply_is_timeout() {
        let base = serve(Router::new().route(
            "/v1/forecast",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({}))
            }),
        ))
        .await;

        let weather =
            OpenMeteoAggregator::new(&format!("{base}/v1/forecast"), Duration::from_millis(100));
        let err = weather.weekly_averages(18.52, 73.85).await.unwrap_err();

        assert!(
            matches!(
                err,
                WeatherError::Upstream(UpstreamError::Timeout {
                    service: "weather_provider"
                })
            ),
            "expected timeout, got {err:?}"
        );
    }
}
