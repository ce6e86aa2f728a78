use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the scraper's metrics.
pub fn describe() {
    metrics::describe_counter!("scrape_jobs_total", "Total scrape jobs created");
    metrics::describe_counter!("scrape_jobs_completed", "Total scrape jobs completed");
    metrics::describe_counter!("scrape_jobs_failed", "Total scrape jobs that failed");
    metrics::describe_counter!("scrape_jobs_stopped", "Total scrape jobs stopped by request");
    metrics::describe_counter!("scrape_records_extracted", "Records accepted by the extractor");
    metrics::describe_counter!("scrape_records_rejected", "Containers rejected, by reason");
    metrics::describe_counter!("scrape_images_fetched", "Images downloaded and stored");
    metrics::describe_histogram!("scrape_job_seconds", "Wall time of a scrape job run");
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}
