pub mod memory;
pub mod pool;
pub mod records;

pub use memory::MemoryRecordStore;
pub use pool::create_pool;
pub use records::PgRecordStore;

use uuid::Uuid;

use crate::models::{Record, RecordSummary, RecordUpdate};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for diagnosis records.
///
/// Every `update` is a single atomic write touching only the fields of the
/// given stage (plus `updated_at`). Implementations must allow concurrent
/// writes to different records without blocking each other.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, user_id: i32, image_uri: &str) -> Result<Record, StoreError>;

    async fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Record>, StoreError>;

    async fn list(&self) -> Result<Vec<RecordSummary>, StoreError>;

    fn backend(&self) -> &'static str;
}
