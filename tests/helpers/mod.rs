//! Test doubles and harness for driving the orchestrator without a network.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tempfile::TempDir;
use tokio::sync::Notify;
use url::Url;
use uuid::Uuid;

use quote_scrape::config::ScrapeSettings;
use quote_scrape::db::{JobStore, MemoryStore};
use quote_scrape::models::event::ProgressEvent;
use quote_scrape::models::job::{Job, JobStatus};
use quote_scrape::services::broadcaster::Subscription;
use quote_scrape::services::browser::{Browser, BrowserError, HttpPage, Page};
use quote_scrape::services::images::ImageFetcher;
use quote_scrape::services::orchestrator::JobOrchestrator;
use quote_scrape::services::snapshot::ContainerSnapshot;

use crate::fixtures::PNG_PIXEL;

/// What every page opened by a [`ScriptedBrowser`] does.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub html: String,
    /// Number of initial `goto` calls that time out.
    pub fail_first: u32,
    /// Block inside `snapshot(_, index)` until [`PageGauge::resume`] is notified.
    pub pause_at: Option<usize>,
}

impl PageScript {
    pub fn serving(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }
}

/// Counters and gates shared between a test and its fake pages.
#[derive(Clone, Default)]
pub struct PageGauge {
    pub gotos: Arc<AtomicU32>,
    pub snapshots: Arc<AtomicUsize>,
    pub reached: Arc<Notify>,
    pub resume: Arc<Notify>,
}

impl PageGauge {
    pub fn gotos(&self) -> u32 {
        self.gotos.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    /// Wait until a page pauses at its `pause_at` container.
    pub async fn wait_paused(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.reached.notified())
            .await
            .expect("page never reached the pause point");
    }
}

pub struct ScriptedBrowser {
    script: PageScript,
    gauge: PageGauge,
}

impl ScriptedBrowser {
    pub fn new(script: PageScript, gauge: PageGauge) -> Self {
        Self { script, gauge }
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn open(&self) -> Result<Box<dyn Page>, BrowserError> {
        Ok(Box::new(ScriptedPage {
            script: self.script.clone(),
            gauge: self.gauge.clone(),
            loaded: None,
        }))
    }
}

struct ScriptedPage {
    script: PageScript,
    gauge: PageGauge,
    loaded: Option<HttpPage>,
}

impl ScriptedPage {
    fn page(&self) -> Result<&HttpPage, BrowserError> {
        self.loaded.as_ref().ok_or(BrowserError::NotLoaded)
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn goto(&mut self, _url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let attempt = self.gauge.gotos.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.script.fail_first {
            return Err(BrowserError::Timeout(timeout));
        }
        self.loaded = Some(HttpPage::from_html(self.script.html.clone()));
        Ok(())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page()?.content().await
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.page()?.title().await
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.page()?.wait_for_selector(selector, timeout).await
    }

    async fn count(&self, selector: &str) -> Result<usize, BrowserError> {
        self.page()?.count(selector).await
    }

    async fn snapshot(&self, selector: &str, index: usize) -> Result<Option<ContainerSnapshot>, BrowserError> {
        self.gauge.snapshots.fetch_add(1, Ordering::SeqCst);
        if self.script.pause_at == Some(index) {
            self.gauge.reached.notify_one();
            self.gauge.resume.notified().await;
        }
        self.page()?.snapshot(selector, index).await
    }

    async fn diagnostic_snapshot(&self) -> Result<String, BrowserError> {
        self.page()?.diagnostic_snapshot().await
    }
}

pub fn test_settings(root: &std::path::Path) -> ScrapeSettings {
    ScrapeSettings {
        site_base_url: Url::parse("http://quotes.test").unwrap(),
        image_cache_dir: root.join("cache"),
        diagnostics_dir: root.join("diagnostics"),
        navigation_timeout: Duration::from_secs(2),
        navigation_attempts: 3,
        navigation_retry_delay: Duration::ZERO,
        settle_delay: Duration::ZERO,
        image_timeout: Duration::from_secs(2),
        image_concurrency: 4,
        max_concurrent_jobs: 3,
        min_container_count: 3,
        user_agent: "quote-scrape-tests".to_string(),
    }
}

pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub store: Arc<MemoryStore>,
    pub pages: PageGauge,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(script: PageScript) -> Self {
        Self::with_settings(script, |_| {})
    }

    pub fn with_settings(script: PageScript, tweak: impl FnOnce(&mut ScrapeSettings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        tweak(&mut settings);

        let pages = PageGauge::default();
        let store = Arc::new(MemoryStore::new());
        let images = ImageFetcher::new(
            reqwest::Client::new(),
            settings.image_cache_dir.clone(),
            settings.image_timeout,
        );
        let orchestrator = JobOrchestrator::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            Arc::new(ScriptedBrowser::new(script, pages.clone())),
            images,
            settings,
        );

        Self {
            orchestrator,
            store,
            pages,
            dir,
        }
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, job_id: Uuid) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let job = self.orchestrator.status(job_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            assert!(tokio::time::Instant::now() < deadline, "job {job_id} never finished: {job:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for the job's terminal status event. It is published after the
    /// final state is stored and the job has left the registry.
    pub async fn wait_for_final_event(&self, subscription: &mut Subscription, job_id: Uuid) -> JobStatus {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), subscription.receiver.recv())
                .await
                .expect("no terminal event within ten seconds")
                .expect("broadcaster dropped the subscription");
            if let ProgressEvent::StatusChanged { job_id: id, status } = event {
                if id == job_id && status.is_terminal() {
                    return status;
                }
            }
        }
    }

    pub fn diagnostics_file(&self, job_id: Uuid, reason: &str) -> std::path::PathBuf {
        self.dir
            .path()
            .join("diagnostics")
            .join(format!("{job_id}_{reason}.html"))
    }

    pub fn cached_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.dir.path().join("cache")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Holds `/slow/{name}` responses until released.
#[derive(Clone, Default)]
pub struct ImageGate {
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl ImageGate {
    /// Wait until a request is parked on the gate.
    pub async fn wait_reached(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.reached.notified())
            .await
            .expect("no request reached the image gate");
    }
}

#[derive(Clone, Default)]
struct ServerState {
    hits: Arc<Mutex<HashMap<String, usize>>>,
    gate: ImageGate,
}

impl ServerState {
    fn count(&self, name: String) {
        *self.hits.lock().unwrap().entry(name).or_default() += 1;
    }
}

/// Local image host counting requests per path.
#[derive(Clone, Default)]
pub struct ImageServer {
    pub base_url: String,
    pub gate: ImageGate,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl ImageServer {
    pub async fn spawn() -> Self {
        let state = ServerState::default();
        let app = Router::new()
            .route("/img/{name}", get(serve_image))
            .route("/slow/{name}", get(serve_gated_image))
            .route("/missing/{name}", get(|| async { StatusCode::NOT_FOUND }))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            gate: state.gate,
            hits: state.hits,
        }
    }

    pub fn hits(&self, name: &str) -> usize {
        self.hits.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

async fn serve_image(State(state): State<ServerState>, Path(name): Path<String>) -> impl IntoResponse {
    state.count(name);
    ([(header::CONTENT_TYPE, "image/png")], PNG_PIXEL)
}

async fn serve_gated_image(State(state): State<ServerState>, Path(name): Path<String>) -> impl IntoResponse {
    state.count(name);
    state.gate.reached.notify_one();
    state.gate.release.notified().await;
    ([(header::CONTENT_TYPE, "image/png")], PNG_PIXEL)
}
