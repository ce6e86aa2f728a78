use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{JobListResponse, JobStatistics, QuotesQuery, QuotesResponse};
use crate::models::job::JobFilter;
use crate::models::quote::RecordPage;
use crate::routes::error::ApiError;
use crate::services::export::{self, ExportFormat};

const MAX_LIST_LIMIT: usize = 500;

/// GET /api/v1/jobs — list jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(mut filter): Query<JobFilter>,
) -> Json<JobListResponse> {
    filter.limit = Some(filter.effective_limit().min(MAX_LIST_LIMIT));
    let jobs = state.orchestrator.list(&filter).await;
    Json(JobListResponse {
        count: jobs.len(),
        jobs,
    })
}

/// GET /api/v1/jobs/{job_id}/quotes — paged records of a job.
pub async fn list_quotes(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<QuotesQuery>,
) -> Result<Json<QuotesResponse>, ApiError> {
    let defaults = RecordPage::default();
    let page = RecordPage::new(
        query.page.unwrap_or(defaults.page),
        query.per_page.unwrap_or(defaults.per_page),
    );
    let (quotes, total) = state.orchestrator.records(job_id, page).await?;

    Ok(Json(QuotesResponse {
        job_id,
        page: page.page,
        per_page: page.per_page,
        total,
        quotes,
    }))
}

/// GET /api/v1/jobs/{job_id}/statistics
pub async fn job_statistics(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatistics>, ApiError> {
    let job = state.orchestrator.status(job_id).await?;
    Ok(Json(JobStatistics::from_job(&job, chrono::Utc::now())))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

/// GET /api/v1/jobs/{job_id}/export?format=json|csv
pub async fn export_quotes(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let records = state.orchestrator.all_records(job_id).await?;
    let body = export::render(&records, query.format)
        .map_err(|e| ApiError::Internal(format!("export failed: {e}")))?;
    let disposition = format!(
        "attachment; filename=\"quotes_{job_id}.{}\"",
        query.format.extension()
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, query.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// DELETE /api/v1/jobs/{job_id} — remove a finished job and its records.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
