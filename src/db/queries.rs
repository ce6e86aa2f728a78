use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::{JobStore, StoreError};
use crate::models::job::{Job, JobDiagnostics, JobFilter, JobStatus};
use crate::models::quote::{Record, RecordPage};
use crate::services::storage::R2Client;

const JOB_COLUMNS: &str =
    "id, topic, status, total_expected, processed, error_message, diagnostics, created_at, updated_at";

/// Postgres for jobs and records, R2 for images.
pub struct PgStore {
    pool: PgPool,
    storage: R2Client,
}

impl PgStore {
    pub fn new(pool: PgPool, storage: R2Client) -> Self {
        Self { pool, storage }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status)
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{status}'")))?;
    let Json(diagnostics): Json<JobDiagnostics> = row.try_get("diagnostics")?;
    let total_expected: i32 = row.try_get("total_expected")?;
    let processed: i32 = row.try_get("processed")?;

    Ok(Job {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        status,
        total_expected: total_expected.max(0) as u32,
        processed: processed.max(0) as u32,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        error_message: row.try_get("error_message")?,
        diagnostics,
    })
}

fn record_from_row(row: &PgRow) -> Result<Record, StoreError> {
    let index: i32 = row.try_get("extraction_index")?;
    Ok(Record {
        text: row.try_get("text")?,
        author: row.try_get("author")?,
        source_link: row.try_get("source_link")?,
        image_url: row.try_get("image_url")?,
        image_blob_ref: row.try_get("image_blob_ref")?,
        extraction_index: index.max(0) as u32,
    })
}

#[async_trait]
impl JobStore for PgStore {
    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scrape_jobs (id, topic, status, total_expected, processed,
                                     error_message, diagnostics, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id)
        .bind(&job.topic)
        .bind(job.status.to_string())
        .bind(job.total_expected as i32)
        .bind(job.processed as i32)
        .bind(&job.error_message)
        .bind(Json(&job.diagnostics))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert, so a job whose insert failed still lands once the database is back.
    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scrape_jobs (id, topic, status, total_expected, processed,
                                     error_message, diagnostics, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                total_expected = EXCLUDED.total_expected,
                processed = EXCLUDED.processed,
                error_message = EXCLUDED.error_message,
                diagnostics = EXCLUDED.diagnostics,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.id)
        .bind(&job.topic)
        .bind(job.status.to_string())
        .bind(job.total_expected as i32)
        .bind(job.processed as i32)
        .bind(&job.error_message)
        .bind(Json(&job.diagnostics))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM scrape_jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM scrape_jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR lower(topic) = lower($2))
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(&filter.topic)
        .bind(filter.effective_limit() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn save_records(&self, job_id: Uuid, records: &[Record]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO quotes (job_id, text, author, source_link, image_url, image_blob_ref, extraction_index)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (job_id, text, author) DO NOTHING
                "#,
            )
            .bind(job_id)
            .bind(&record.text)
            .bind(&record.author)
            .bind(&record.source_link)
            .bind(&record.image_url)
            .bind(&record.image_blob_ref)
            .bind(record.extraction_index as i32)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_records(&self, job_id: Uuid, page: RecordPage) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT text, author, source_link, image_url, image_blob_ref, extraction_index
            FROM quotes
            WHERE job_id = $1
            ORDER BY extraction_index ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(job_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count_records(&self, job_id: Uuid) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM quotes WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn upload_image(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        Ok(self.storage.upload_image(filename, bytes, content_type).await?)
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        // quotes rows go with the job (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM scrape_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
