use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Job, JobDiagnostics, JobStatus};
use crate::models::quote::Record;

/// Request to start scraping a topic.
#[derive(Debug, Deserialize, Validate)]
pub struct ScrapeRequest {
    #[garde(length(min = 1, max = 100))]
    pub topic: String,

    #[garde(range(min = 1, max = 500))]
    pub max_records: Option<u32>,

    #[serde(default = "default_include_images")]
    #[garde(skip)]
    pub include_images: bool,
}

fn default_include_images() -> bool {
    true
}

/// Response after starting a scrape job.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response to a stop request.
#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Query string for `GET /api/v1/jobs/{id}/quotes`.
#[derive(Debug, Deserialize)]
pub struct QuotesQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuotesResponse {
    pub job_id: Uuid,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub quotes: Vec<Record>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
}

/// Summary figures for one job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatistics {
    pub job_id: Uuid,
    pub topic: String,
    pub status: JobStatus,
    pub total_expected: u32,
    pub processed: u32,
    pub diagnostics: JobDiagnostics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Time from creation to the last update, or to now while the job is active.
    pub duration_secs: f64,
}

impl JobStatistics {
    pub fn from_job(job: &Job, now: DateTime<Utc>) -> Self {
        let end = if job.status.is_terminal() { job.updated_at } else { now };
        let duration_secs = (end - job.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        Self {
            job_id: job.id,
            topic: job.topic.clone(),
            status: job.status,
            total_expected: job.total_expected,
            processed: job.processed,
            diagnostics: job.diagnostics.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            duration_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_request_validation() {
        let ok: ScrapeRequest = serde_json::from_str(r#"{"topic": "wisdom"}"#).unwrap();
        assert!(ok.validate().is_ok());
        assert!(ok.include_images);

        let empty: ScrapeRequest = serde_json::from_str(r#"{"topic": ""}"#).unwrap();
        assert!(empty.validate().is_err());

        let too_many: ScrapeRequest =
            serde_json::from_str(r#"{"topic": "wisdom", "max_records": 501}"#).unwrap();
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_statistics_duration_for_finished_job() {
        let mut job = Job::new(Uuid::new_v4(), "wisdom");
        job.status = JobStatus::Completed;
        job.updated_at = job.created_at + Duration::seconds(12);

        let stats = JobStatistics::from_job(&job, job.created_at + Duration::hours(1));
        assert_eq!(stats.duration_secs, 12.0);
    }
}
