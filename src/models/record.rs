use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{GeneratedReport, WeeklyAverages};

/// One diagnosis submission, filled in stage by stage.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Record {
    pub id: Uuid,
    pub user_id: i32,
    pub image_uri: String,
    pub disease_name: Option<String>,
    pub spread_percent: Option<f64>,
    pub avg_weekly_temp: Option<f64>,
    pub avg_weekly_humidity: Option<f64>,
    pub avg_weekly_sunlight: Option<f64>,
    pub language: Option<String>,
    pub report: Option<serde_json::Value>,
    pub time_stamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(user_id: i32, image_uri: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            image_uri: image_uri.to_string(),
            disease_name: None,
            spread_percent: None,
            avg_weekly_temp: None,
            avg_weekly_humidity: None,
            avg_weekly_sunlight: None,
            language: None,
            report: None,
            time_stamp: now,
            updated_at: now,
        }
    }

    pub fn weather(&self) -> Option<WeeklyAverages> {
        Some(WeeklyAverages {
            avg_temp: self.avg_weekly_temp?,
            avg_humidity: self.avg_weekly_humidity?,
            avg_sunlight: self.avg_weekly_sunlight?,
        })
    }

    /// Applies a stage result in memory. Mirrors what the SQL store does in
    /// a single `UPDATE`.
    pub fn apply(&mut self, update: &RecordUpdate) {
        match update {
            RecordUpdate::Disease { name } => self.disease_name = Some(name.clone()),
            RecordUpdate::Spread { percent } => self.spread_percent = Some(*percent),
            RecordUpdate::Weather(w) => {
                self.avg_weekly_temp = Some(w.avg_temp);
                self.avg_weekly_humidity = Some(w.avg_humidity);
                self.avg_weekly_sunlight = Some(w.avg_sunlight);
            }
            RecordUpdate::Report { language, report } => {
                self.language = Some(language.clone());
                self.report = Some(report.to_value());
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id,
            image_uri: self.image_uri.clone(),
            disease_name: self.disease_name.clone(),
            time_stamp: self.time_stamp,
            spread_percent: self.spread_percent,
        }
    }
}

/// Fields returned by the history listing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RecordSummary {
    pub id: Uuid,
    pub image_uri: String,
    pub disease_name: Option<String>,
    pub time_stamp: DateTime<Utc>,
    pub spread_percent: Option<f64>,
}

/// A single stage's contribution to a record. Each variant is persisted as
/// one atomic write.
#[derive(Debug, Clone)]
pub enum RecordUpdate {
    Disease { name: String },
    Spread { percent: f64 },
    Weather(WeeklyAverages),
    Report {
        language: String,
        report: GeneratedReport,
    },
}

impl RecordUpdate {
    pub fn stage_name(&self) -> &'static str {
        match self {
            RecordUpdate::Disease { .. } => "disease",
            RecordUpdate::Spread { .. } => "spread",
            RecordUpdate::Weather(_) => "weather",
            RecordUpdate::Report { .. } => "report",
        }
    }
}
