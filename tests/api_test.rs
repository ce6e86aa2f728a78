//! HTTP API tests driven through the router without binding a socket.

mod fixtures;
mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;
use uuid::Uuid;

use fixtures::*;
use helpers::*;
use quote_scrape::app_state::AppState;
use quote_scrape::models::api::{QuotesResponse, ScrapeResponse};
use quote_scrape::models::job::JobStatus;
use quote_scrape::routes;

fn app(harness: &Harness) -> Router {
    routes::api_router(AppState::new(harness.orchestrator.clone()))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>, Option<String>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec(), content_type)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn start_job(app: &Router, topic: &str) -> Uuid {
    let (status, body, _) = send(
        app,
        post_json("/api/v1/scrape", json!({ "topic": topic, "include_images": false })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let response: ScrapeResponse = assert_ok!(serde_json::from_slice(&body));
    assert_eq!(response.status, JobStatus::Pending);
    response.job_id
}

#[tokio::test]
async fn test_health_reports_store() {
    let harness = Harness::new(PageScript::serving(topic_page(&[])));
    let (status, body, _) = send(&app(&harness), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["checks"]["store"]["status"], "ok");
}

#[tokio::test]
async fn test_start_rejects_invalid_requests() {
    let harness = Harness::new(PageScript::serving(topic_page(&[])));
    let app = app(&harness);

    let (status, body, _) = send(&app, post_json("/api/v1/scrape", json!({ "topic": "" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].is_string());

    let (status, _, _) = send(
        &app,
        post_json("/api/v1/scrape", json!({ "topic": "love", "max_records": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _, _) = send(&app, post_json("/api/v1/scrape", json!({ "topic": "   " }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let harness = Harness::new(PageScript::serving(topic_page(&[])));
    let app = app(&harness);
    let id = Uuid::new_v4();

    let (status, _, _) = send(&app, get(&format!("/api/v1/scrape/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, post_json(&format!("/api/v1/scrape/{id}/stop"), json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_completed_job_results() {
    let harness = Harness::new(PageScript::serving(topic_page(&valid_containers(5, ""))));
    let app = app(&harness);

    let job_id = start_job(&app, "motivational").await;
    harness.wait_for_terminal(job_id).await;

    let (status, body, _) = send(&app, get(&format!("/api/v1/scrape/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let job: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(job["status"], "completed");
    assert_eq!(job["processed"], 5);

    let (status, body, _) = send(
        &app,
        get(&format!("/api/v1/jobs/{job_id}/quotes?page=2&per_page=2")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page: QuotesResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.quotes.len(), 2);
    assert_eq!(page.quotes[0].extraction_index, 2);

    let (status, body, _) = send(&app, get(&format!("/api/v1/jobs/{job_id}/statistics"))).await;
    assert_eq!(status, StatusCode::OK);
    let stats: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["total_expected"], 5);
    assert_eq!(stats["diagnostics"]["rejected"], 0);

    let (status, body, _) = send(&app, get("/api/v1/jobs?status=completed")).await;
    assert_eq!(status, StatusCode::OK);
    let list: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(list["count"], 1);
    assert_eq!(list["jobs"][0]["id"], job_id.to_string());
}

#[tokio::test]
async fn test_export_formats() {
    let harness = Harness::new(PageScript::serving(topic_page(&valid_containers(3, ""))));
    let app = app(&harness);
    let job_id = start_job(&app, "motivational").await;
    harness.wait_for_terminal(job_id).await;

    let (status, body, content_type) =
        send(&app, get(&format!("/api/v1/jobs/{job_id}/export?format=csv"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/csv"));
    let csv = String::from_utf8(body).unwrap();
    let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[1].contains("Albert Einstein"));

    let (status, body, content_type) = send(&app, get(&format!("/api/v1/jobs/{job_id}/export"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("application/json"));
    let records: Vec<Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn test_stop_completed_job_conflicts() {
    let harness = Harness::new(PageScript::serving(topic_page(&valid_containers(3, ""))));
    let app = app(&harness);
    let job_id = start_job(&app, "motivational").await;
    harness.wait_for_terminal(job_id).await;

    let (status, _, _) = send(
        &app,
        post_json(&format!("/api/v1/scrape/{job_id}/stop"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let job = harness.orchestrator.status(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_stop_and_delete_running_job() {
    let script = PageScript {
        html: topic_page(&valid_containers(6, "")),
        pause_at: Some(1),
        ..Default::default()
    };
    let harness = Harness::new(script);
    let app = app(&harness);
    let mut events = harness.orchestrator.broadcaster().subscribe(None).await;
    let job_id = start_job(&app, "motivational").await;
    harness.pages.wait_paused().await;

    let delete = Request::delete(format!("/api/v1/jobs/{job_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body, _) = send(
        &app,
        post_json(&format!("/api/v1/scrape/{job_id}/stop"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stop: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stop["status"], "running");

    harness.pages.resume.notify_one();
    let status = harness.wait_for_final_event(&mut events, job_id).await;
    assert_eq!(status, JobStatus::Stopped);
    assert_eq!(harness.orchestrator.status(job_id).await.unwrap().processed, 2);

    let delete = Request::delete(format!("/api/v1/jobs/{job_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app, get(&format!("/api/v1/scrape/{job_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_events_of_finished_job_end_after_snapshot() {
    let harness = Harness::new(PageScript::serving(topic_page(&valid_containers(3, ""))));
    let app = app(&harness);
    let job_id = start_job(&app, "motivational").await;
    harness.wait_for_terminal(job_id).await;

    let (status, body, content_type) =
        send(&app, get(&format!("/api/v1/jobs/{job_id}/events"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/event-stream"));

    let stream = String::from_utf8(body).unwrap();
    assert!(stream.contains("event: snapshot"));
    assert!(stream.contains("\"status\":\"completed\""));
    assert_eq!(stream.matches("event:").count(), 1);
}
