use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::instrument;
use uuid::Uuid;

use super::{RecordStore, StoreError};
use crate::models::{Record, RecordSummary, RecordUpdate};

/// Process-local record store, used when no database is configured.
///
/// The map lock is only held long enough to find a record; each record has
/// its own mutex so writes to different records never contend.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Record>>>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: Uuid) -> Option<Arc<Mutex<Record>>> {
        self.records.read().await.get(&id).cloned()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    #[instrument(name = "db.records.create", skip(self))]
    async fn create(&self, user_id: i32, image_uri: &str) -> Result<Record, StoreError> {
        let record = Record::new(user_id, image_uri);
        self.records
            .write()
            .await
            .insert(record.id, Arc::new(Mutex::new(record.clone())));
        Ok(record)
    }

    #[instrument(
        name = "db.records.update",
        skip(self, update),
        fields(record.id = %id, record.stage = update.stage_name())
    )]
    async fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<(), StoreError> {
        let entry = self.entry(id).await.ok_or(StoreError::NotFound(id))?;
        entry.lock().await.apply(update);
        Ok(())
    }

    #[instrument(name = "db.records.get", skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<Record>, StoreError> {
        match self.entry(id).await {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    #[instrument(name = "db.records.list", skip(self))]
    async fn list(&self) -> Result<Vec<RecordSummary>, StoreError> {
        let entries: Vec<Arc<Mutex<Record>>> =
            self.records.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(entry.lock().await.summary());
        }
        summaries.sort_by_key(|s| s.time_stamp);

        Ok(summaries)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
