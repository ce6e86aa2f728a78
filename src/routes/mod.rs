use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod error;
pub mod events;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod scrape;

/// Health and API routes. The metrics endpoint is added by the binary.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/scrape", post(scrape::start_scrape))
        .route("/api/v1/scrape/{job_id}", get(scrape::get_job_status))
        .route("/api/v1/scrape/{job_id}/stop", post(scrape::stop_job))
        .route("/api/v1/jobs", get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", axum::routing::delete(jobs::delete_job))
        .route("/api/v1/jobs/{job_id}/quotes", get(jobs::list_quotes))
        .route("/api/v1/jobs/{job_id}/statistics", get(jobs::job_statistics))
        .route("/api/v1/jobs/{job_id}/export", get(jobs::export_quotes))
        .route("/api/v1/jobs/{job_id}/events", get(events::job_events))
        .with_state(state)
}
