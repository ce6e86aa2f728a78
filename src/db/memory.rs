//! Process-local store, used when no database is configured and in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::{Job, JobFilter};
use crate::models::quote::{Record, RecordPage};
use crate::services::storage::IMAGE_PREFIX;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    records: RwLock<HashMap<Uuid, Vec<Record>>>,
    images: RwLock<HashMap<String, StoredImage>>,
    uploads: AtomicUsize,
    fail_saves: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `save_records` fail until switched back.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make job reads (`get_job`, `list_jobs`) fail until switched back.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of `upload_image` calls so far.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub async fn image(&self, filename: &str) -> Option<StoredImage> {
        self.images.read().await.get(filename).cloned()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.check_reads()?;
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        self.check_reads()?;
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(filter.effective_limit());
        Ok(jobs)
    }

    async fn save_records(&self, job_id: Uuid, records: &[Record]) -> Result<u64, StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("record writes disabled".to_string()));
        }

        let mut all = self.records.write().await;
        let stored = all.entry(job_id).or_default();
        let mut inserted = 0;
        for record in records {
            let duplicate = stored
                .iter()
                .any(|r| r.text == record.text && r.author == record.author);
            if !duplicate {
                stored.push(record.clone());
                inserted += 1;
            }
        }
        stored.sort_by_key(|r| r.extraction_index);
        Ok(inserted)
    }

    async fn get_records(&self, job_id: Uuid, page: RecordPage) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .get(&job_id)
            .map(|records| {
                records
                    .iter()
                    .skip(page.offset())
                    .take(page.limit())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_records(&self, job_id: Uuid) -> Result<u64, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .get(&job_id)
            .map_or(0, |records| records.len() as u64))
    }

    async fn upload_image(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.images.write().await.insert(
            filename.to_string(),
            StoredImage {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("memory://{IMAGE_PREFIX}/{filename}"))
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        self.records.write().await.remove(&id);
        Ok(self.jobs.write().await.remove(&id).is_some())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_reads()
    }
}
