use sqlx::PgPool;
use sqlx::postgres::PgQueryResult;
use tracing::instrument;
use uuid::Uuid;

use super::{RecordStore, StoreError};
use crate::models::{Record, RecordSummary, RecordUpdate};

const RECORD_COLUMNS: &str = "id, user_id, image_uri, disease_name, spread_percent, \
     avg_weekly_temp, avg_weekly_humidity, avg_weekly_sunlight, \
     language, report, time_stamp, updated_at";

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn ensure_found(result: PgQueryResult, id: Uuid) -> Result<(), StoreError> {
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

#[async_trait::async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(name = "db.records.create", skip(self))]
    async fn create(&self, user_id: i32, image_uri: &str) -> Result<Record, StoreError> {
        let record = Record::new(user_id, image_uri);

        let row = sqlx::query_as::<_, Record>(&format!(
            "INSERT INTO records (id, user_id, image_uri, time_stamp, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.image_uri)
        .bind(record.time_stamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    #[instrument(
        name = "db.records.update",
        skip(self, update),
        fields(record.id = %id, record.stage = update.stage_name())
    )]
    async fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<(), StoreError> {
        let result = match update {
            RecordUpdate::Disease { name } => {
                sqlx::query(
                    "UPDATE records SET disease_name = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .bind(name)
                .execute(&self.pool)
                .await?
            }
            RecordUpdate::Spread { percent } => {
                sqlx::query(
                    "UPDATE records SET spread_percent = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .bind(percent)
                .execute(&self.pool)
                .await?
            }
            RecordUpdate::Weather(weather) => {
                sqlx::query(
                    "UPDATE records \
                     SET avg_weekly_temp = $2, avg_weekly_humidity = $3, \
                         avg_weekly_sunlight = $4, updated_at = NOW() \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(weather.avg_temp)
                .bind(weather.avg_humidity)
                .bind(weather.avg_sunlight)
                .execute(&self.pool)
                .await?
            }
            RecordUpdate::Report { language, report } => {
                sqlx::query(
                    "UPDATE records SET language = $2, report = $3, updated_at = NOW() \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(language)
                .bind(report.to_value())
                .execute(&self.pool)
                .await?
            }
        };

        ensure_found(result, id)
    }

    #[instrument(name = "db.records.get", skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<Record>, StoreError> {
        let record = sqlx::query_as::<_, Record>(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(name = "db.records.list", skip(self))]
    async fn list(&self) -> Result<Vec<RecordSummary>, StoreError> {
        let rows = sqlx::query_as::<_, RecordSummary>(
            "SELECT id, image_uri, disease_name, time_stamp, spread_percent FROM records",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
