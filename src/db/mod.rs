use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobFilter};
use crate::models::quote::{Record, RecordPage};
use crate::services::storage::StorageError;

pub mod memory;
pub mod queries;

pub use memory::MemoryStore;
pub use queries::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Image upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Stored row is invalid: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable projection of jobs, their records, and uploaded images.
///
/// The orchestrator's in-memory registry stays authoritative while a job runs;
/// everything written here is a copy.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Write `job`, inserting it if an earlier `create_job` never landed.
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Insert records, skipping ones already stored for the job (same text and author).
    /// Returns how many were new.
    async fn save_records(&self, job_id: Uuid, records: &[Record]) -> Result<u64, StoreError>;

    async fn get_records(&self, job_id: Uuid, page: RecordPage) -> Result<Vec<Record>, StoreError>;

    async fn count_records(&self, job_id: Uuid) -> Result<u64, StoreError>;

    /// Store image bytes and return the URL they are served from.
    async fn upload_image(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<String, StoreError>;

    /// Returns false when there was nothing to delete.
    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Every record of a job in extraction order.
    async fn all_records(&self, job_id: Uuid) -> Result<Vec<Record>, StoreError> {
        let mut all = Vec::new();
        let mut page = RecordPage::new(1, RecordPage::MAX_PER_PAGE);
        loop {
            let batch = self.get_records(job_id, page).await?;
            let done = batch.len() < page.limit();
            all.extend(batch);
            if done {
                return Ok(all);
            }
            page = RecordPage::new(page.page + 1, page.per_page);
        }
    }
}

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
