use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use uuid::Uuid;

use crate::clients::{
    ClassificationError, DiseaseClassifier, ImageUpload, SpreadEstimationError, SpreadEstimator,
    WeatherAggregator, WeatherError,
};
use crate::db::{RecordStore, StoreError};
use crate::models::{GeneratedReport, Location, RecordUpdate, WeeklyAverages};
use crate::telemetry::metrics::{DIAGNOSES_TOTAL, DIAGNOSIS_DURATION, STAGE_FAILURES};
use crate::uploads::{ImageStore, ImageStoreError};

use super::policy::{FailurePolicy, Stage, StagePolicies};
use super::report::{ReportGenerationError, ReportGenerator};

pub const DEFAULT_LANGUAGE: &str = "English";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to store image: {0}")]
    ImageStorage(#[from] ImageStoreError),

    #[error("failed to persist {stage} result: {source}")]
    Persistence {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("disease classification failed: {0}")]
    Classification(#[from] ClassificationError),

    #[error("spread estimation failed: {0}")]
    SpreadEstimation(#[from] SpreadEstimationError),

    #[error("weather lookup failed: {0}")]
    Weather(#[from] WeatherError),

    #[error("report generation failed: {0}")]
    ReportGeneration(#[from] ReportGenerationError),

    #[error("{0} produced no output")]
    MissingOutput(Stage),
}

impl PipelineError {
    /// Short label used for the `diagnosis.outcome` metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ImageStorage(_) => "image_storage",
            PipelineError::Persistence { .. } => "persistence",
            PipelineError::Classification(_) => "classification",
            PipelineError::SpreadEstimation(_) => "spread_estimation",
            PipelineError::Weather(_) => "weather",
            PipelineError::ReportGeneration(_) => "report_generation",
            PipelineError::MissingOutput(_) => "missing_output",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub record_id: Uuid,
    pub report: GeneratedReport,
}

/// Runs one submission through every stage, persisting each result as soon
/// as it is known.
pub struct DiagnosisPipeline {
    pub store: Arc<dyn RecordStore>,
    pub images: Arc<dyn ImageStore>,
    pub classifier: Arc<dyn DiseaseClassifier>,
    pub spread: Arc<dyn SpreadEstimator>,
    pub weather: Arc<dyn WeatherAggregator>,
    pub reports: Arc<dyn ReportGenerator>,
    pub policies: StagePolicies,
    pub user_id: i32,
}

impl DiagnosisPipeline {
    #[tracing::instrument(
        name = "pipeline diagnosis",
        skip(self, image, location, language),
        fields(
            diagnosis.record_id,
            diagnosis.image_bytes = image.bytes.len(),
            diagnosis.weather_known,
            diagnosis.outcome,
            diagnosis.duration_ms,
        )
    )]
    pub async fn diagnose(
        &self,
        image: ImageUpload,
        location: Option<Location>,
        language: Option<String>,
    ) -> Result<Diagnosis, PipelineError> {
        let start = Instant::now();

        let result = self.run(&image, location, language).await;

        let outcome = match &result {
            Ok(diagnosis) if diagnosis.report.is_raw() => "raw_report",
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        let duration = start.elapsed();

        let span = tracing::Span::current();
        span.record("diagnosis.outcome", outcome);
        span.record("diagnosis.duration_ms", duration.as_millis() as i64);

        DIAGNOSES_TOTAL.add(1, &[KeyValue::new("diagnosis.outcome", outcome)]);
        DIAGNOSIS_DURATION.record(
            duration.as_secs_f64(),
            &[KeyValue::new("diagnosis.outcome", outcome)],
        );

        match &result {
            Ok(diagnosis) => tracing::info!(
                record_id = %diagnosis.record_id,
                duration_ms = duration.as_millis() as u64,
                "Diagnosis completed"
            ),
            Err(err) => tracing::error!(error = %err, "Diagnosis failed"),
        }

        result
    }

    async fn run(
        &self,
        image: &ImageUpload,
        location: Option<Location>,
        language: Option<String>,
    ) -> Result<Diagnosis, PipelineError> {
        let span = tracing::Span::current();

        let stored = self.images.save(image).await?;
        let record = self
            .store
            .create(self.user_id, &stored.public_uri)
            .await
            .map_err(|source| PipelineError::Persistence {
                stage: "create",
                source,
            })?;
        let id = record.id;
        span.record("diagnosis.record_id", tracing::field::display(id));

        let (label, spread) = tokio::join!(
            self.classifier.classify(image),
            self.spread.estimate(image)
        );

        let disease = self
            .handle(Stage::Classification, label)?
            .ok_or(PipelineError::MissingOutput(Stage::Classification))?;
        self.persist(
            id,
            RecordUpdate::Disease {
                name: disease.clone(),
            },
        )
        .await?;

        if let Some(percent) = self.handle(Stage::SpreadEstimation, spread)? {
            self.persist(id, RecordUpdate::Spread { percent }).await?;
        }

        let weather = self.weekly_weather(id, location.as_ref()).await?;
        span.record("diagnosis.weather_known", weather.is_some());

        let language = language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let generated = self
            .reports
            .generate(&disease, weather.as_ref(), &language)
            .await;
        let report = self
            .handle(Stage::ReportGeneration, generated)?
            .ok_or(PipelineError::MissingOutput(Stage::ReportGeneration))?;

        let update = RecordUpdate::Report {
            language,
            report: report.clone(),
        };
        let persisted = self.store.update(id, &update).await.map_err(|source| {
            PipelineError::Persistence {
                stage: update.stage_name(),
                source,
            }
        });
        self.handle(Stage::ReportPersist, persisted)?;

        Ok(Diagnosis {
            record_id: id,
            report,
        })
    }

    async fn weekly_weather(
        &self,
        id: Uuid,
        location: Option<&Location>,
    ) -> Result<Option<WeeklyAverages>, PipelineError> {
        let Some((latitude, longitude)) = location.and_then(Location::coordinates) else {
            tracing::info!(record_id = %id, "No usable location, skipping weather");
            return Ok(None);
        };

        let fetched = self.weather.weekly_averages(latitude, longitude).await;
        let weather = self.handle(Stage::Weather, fetched)?;
        if let Some(averages) = weather {
            self.persist(id, RecordUpdate::Weather(averages)).await?;
        }
        Ok(weather)
    }

    /// Intermediate writes are always fatal.
    async fn persist(&self, id: Uuid, update: RecordUpdate) -> Result<(), PipelineError> {
        self.store
            .update(id, &update)
            .await
            .map_err(|source| PipelineError::Persistence {
                stage: update.stage_name(),
                source,
            })
    }

    /// Applies the stage's failure policy. `Ok(None)` means the stage failed
    /// and the run continues without its output.
    fn handle<T, E>(&self, stage: Stage, result: Result<T, E>) -> Result<Option<T>, PipelineError>
    where
        E: Into<PipelineError>,
    {
        let err = match result {
            Ok(value) => return Ok(Some(value)),
            Err(err) => err.into(),
        };

        let policy = self.policies.policy(stage);
        STAGE_FAILURES.add(
            1,
            &[
                KeyValue::new("diagnosis.stage", stage.as_str()),
                KeyValue::new("diagnosis.policy", policy.to_string()),
            ],
        );

        match policy {
            FailurePolicy::Fatal => {
                tracing::error!(stage = %stage, error = %err, "Stage failed, aborting");
                Err(err)
            }
            FailurePolicy::Degrade => {
                tracing::warn!(stage = %stage, error = %err, "Stage failed, continuing without it");
                Ok(None)
            }
        }
    }
}
