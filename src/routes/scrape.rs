use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{ScrapeRequest, ScrapeResponse, StopResponse};
use crate::models::job::{Job, JobStatus};
use crate::routes::error::ApiError;
use crate::services::orchestrator::{StartOptions, StopOutcome};

/// POST /api/v1/scrape — start a scrape job for a topic.
pub async fn start_scrape(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<(StatusCode, Json<ScrapeResponse>), ApiError> {
    request.validate()?;

    let options = StartOptions {
        max_records: request.max_records,
        include_images: request.include_images,
    };
    let job_id = state.orchestrator.start(&request.topic, options).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ScrapeResponse {
            job_id,
            status: JobStatus::Pending,
            message: format!("Scrape job started for topic '{}'", request.topic.trim()),
        }),
    ))
}

/// GET /api/v1/scrape/{job_id} — current job state.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.orchestrator.status(job_id).await?))
}

/// POST /api/v1/scrape/{job_id}/stop — request a stop.
pub async fn stop_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<StopResponse>, ApiError> {
    let outcome = state.orchestrator.stop(job_id).await?;
    let job = state.orchestrator.status(job_id).await?;

    let message = match outcome {
        StopOutcome::Stopped => "Job stopped before it started",
        StopOutcome::Stopping => "Job will stop after the current item",
    };

    Ok(Json(StopResponse {
        job_id,
        status: job.status,
        message: message.to_string(),
    }))
}
