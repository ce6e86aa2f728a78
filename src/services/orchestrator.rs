//! Job Orchestrator: owns each job's lifecycle and drives the scraping pipeline.
//!
//! A job runs as its own task: navigation, selector resolution, container
//! extraction, image download, then persistence. Stop requests are cooperative
//! and observed between containers and between image downloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use crate::config::ScrapeSettings;
use crate::db::{JobStore, StoreError};
use crate::models::event::ProgressEvent;
use crate::models::image::ImageAsset;
use crate::models::job::{Job, JobFilter, JobStatus};
use crate::models::quote::{Record, RecordPage};
use crate::services::broadcaster::{ProgressBroadcaster, Subscription};
use crate::services::browser::{Browser, BrowserError, Page};
use crate::services::extractor::RecordExtractor;
use crate::services::images::{dedupe_key, ImageFailure, ImageFetcher};
use crate::services::navigation::{NavigationGuard, NavigationOutcome};
use crate::services::registry::{JobHandle, JobRegistry, StopEffect};
use crate::services::selector::SelectorResolver;
use crate::services::snapshot::ContainerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Stop extracting once this many records were accepted.
    pub max_records: Option<u32>,
    pub include_images: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            max_records: None,
            include_images: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The job had not started and is now Stopped.
    Stopped,
    /// The job is running and will stop at its next checkpoint.
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} is not running (status: {status})")]
    NotRunning { id: Uuid, status: JobStatus },

    #[error("Job {id} is still {status}")]
    StillActive { id: Uuid, status: JobStatus },

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a run ended in Failed. The Display text becomes the job's error_message.
#[derive(Debug, thiserror::Error)]
pub enum JobFailure {
    #[error("Navigation failed after {attempts} attempts: {last_error}")]
    Navigation { attempts: u32, last_error: String },

    #[error("Blocked by target site (matched \"{indicator}\")")]
    Blocked { indicator: String },

    #[error("No container selector matched at least {min_count} elements")]
    NoContainers { min_count: usize },

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Failed to persist results: {0}")]
    Persist(#[from] StoreError),
}

struct Inner {
    store: Arc<dyn JobStore>,
    browser: Arc<dyn Browser>,
    images: Arc<ImageFetcher>,
    settings: ScrapeSettings,
    registry: JobRegistry,
    broadcaster: ProgressBroadcaster,
    navigation: NavigationGuard,
    resolver: SelectorResolver,
    extractor: RecordExtractor,
    permits: Semaphore,
}

#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        browser: Arc<dyn Browser>,
        images: ImageFetcher,
        settings: ScrapeSettings,
    ) -> Self {
        let navigation = NavigationGuard::new(
            settings.navigation_attempts,
            settings.navigation_retry_delay,
            settings.settle_delay,
            settings.navigation_timeout,
        );
        let resolver = SelectorResolver::with_min_count(settings.min_container_count);
        let extractor = RecordExtractor::new(settings.site_base_url.clone());
        let permits = Semaphore::new(settings.max_concurrent_jobs);

        Self {
            inner: Arc::new(Inner {
                store,
                browser,
                images: Arc::new(images),
                settings,
                registry: JobRegistry::new(),
                broadcaster: ProgressBroadcaster::new(),
                navigation,
                resolver,
                extractor,
                permits,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.inner.broadcaster
    }

    /// Create a job for `topic` and start it in the background.
    pub async fn start(&self, topic: &str, options: StartOptions) -> Result<Uuid, OrchestratorError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(OrchestratorError::InvalidTopic("topic is empty".to_string()));
        }
        let url = self
            .inner
            .settings
            .topic_url(topic)
            .map_err(|e| OrchestratorError::InvalidTopic(e.to_string()))?;

        let job = Job::new(Uuid::new_v4(), topic);
        let job_id = job.id;
        if let Err(e) = self.inner.store.create_job(&job).await {
            warn!(job_id = %job_id, error = %e, "Failed to persist new job");
        }
        let handle = self.inner.registry.insert(job).await;

        metrics::counter!("scrape_jobs_total").increment(1);
        info!(job_id = %job_id, topic, url = %url, "Scrape job created");
        self.publish(ProgressEvent::StatusChanged {
            job_id,
            status: JobStatus::Pending,
        })
        .await;

        let span = info_span!("scrape_job", job_id = %job_id, topic = %topic);
        tokio::spawn(self.clone().run(handle, url, options).instrument(span));

        Ok(job_id)
    }

    /// Current state: live registry first, then the store.
    pub async fn status(&self, id: Uuid) -> Result<Job, OrchestratorError> {
        if let Some(handle) = self.inner.registry.get(id).await {
            return Ok(handle.snapshot().await);
        }
        self.inner
            .store
            .get_job(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    pub async fn stop(&self, id: Uuid) -> Result<StopOutcome, OrchestratorError> {
        let Some(handle) = self.inner.registry.get(id).await else {
            // Known only to the store: it finished in an earlier process.
            return match self.inner.store.get_job(id).await? {
                Some(job) => Err(OrchestratorError::NotRunning { id, status: job.status }),
                None => Err(OrchestratorError::NotFound(id)),
            };
        };

        match handle.stop().await {
            Ok(StopEffect::Stopped(job)) => {
                info!(job_id = %id, "Pending job stopped before start");
                self.finalize(&job).await;
                Ok(StopOutcome::Stopped)
            }
            Ok(StopEffect::Signalled) => {
                info!(job_id = %id, "Stop requested for running job");
                Ok(StopOutcome::Stopping)
            }
            Err(e) => Err(OrchestratorError::NotRunning { id, status: e.from }),
        }
    }

    /// Stored jobs overlaid with live state, newest first.
    pub async fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let unbounded = JobFilter {
            limit: Some(usize::MAX),
            ..filter.clone()
        };
        let live = self.inner.registry.list(&unbounded).await;

        let stored = match self.inner.store.list_jobs(filter).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Job store unavailable, listing live jobs only");
                Vec::new()
            }
        };

        let mut by_id: HashMap<Uuid, Job> = stored.into_iter().map(|job| (job.id, job)).collect();
        for job in live {
            by_id.insert(job.id, job);
        }

        let mut jobs: Vec<Job> = by_id.into_values().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(filter.effective_limit());
        jobs
    }

    /// One page of a job's stored records plus the total count.
    pub async fn records(&self, id: Uuid, page: RecordPage) -> Result<(Vec<Record>, u64), OrchestratorError> {
        self.status(id).await?;
        let records = self.inner.store.get_records(id, page).await?;
        let total = self.inner.store.count_records(id).await?;
        Ok((records, total))
    }

    pub async fn all_records(&self, id: Uuid) -> Result<Vec<Record>, OrchestratorError> {
        self.status(id).await?;
        Ok(self.inner.store.all_records(id).await?)
    }

    /// Remove a finished job and its records.
    pub async fn delete(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let job = self.status(id).await?;
        if !job.status.is_terminal() {
            return Err(OrchestratorError::StillActive { id, status: job.status });
        }
        self.inner.registry.remove(id).await;
        self.inner.store.delete_job(id).await?;
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Progress events for one job.
    pub async fn subscribe(&self, id: Uuid) -> Result<Subscription, OrchestratorError> {
        self.status(id).await?;
        Ok(self.inner.broadcaster.subscribe(Some(id)).await)
    }

    async fn run(self, handle: Arc<JobHandle>, url: Url, options: StartOptions) {
        let Ok(_permit) = self.inner.permits.acquire().await else {
            error!("Job semaphore closed");
            return;
        };

        let job = match handle.transition(JobStatus::Running).await {
            Ok(job) => job,
            Err(e) => {
                // Stopped while waiting for a permit.
                debug!(error = %e, "Job will not start");
                return;
            }
        };
        self.persist(&job).await;
        self.publish(ProgressEvent::StatusChanged {
            job_id: job.id,
            status: JobStatus::Running,
        })
        .await;
        info!("Scrape job running");

        let started = Instant::now();
        let result = self.execute(&handle, &url, options).await;

        let finished = match result {
            // Stopped or Completed is decided under the same lock `stop` takes.
            Ok(()) => handle.finish().await,
            Err(failure) => {
                let message = failure.to_string();
                warn!(error = %message, "Scrape job failed");
                self.publish(ProgressEvent::Failed {
                    job_id: job.id,
                    error: message.clone(),
                })
                .await;
                handle
                    .transition_with(JobStatus::Failed, |job| job.error_message = Some(message))
                    .await
            }
        };

        match finished {
            Ok(job) => {
                metrics::histogram!("scrape_job_seconds").record(started.elapsed().as_secs_f64());
                info!(
                    status = %job.status,
                    processed = job.processed,
                    rejected = job.diagnostics.rejected,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scrape job finished"
                );
                self.finalize(&job).await;
            }
            Err(e) => error!(error = %e, "Could not record terminal state"),
        }
    }

    async fn execute(&self, handle: &JobHandle, url: &Url, options: StartOptions) -> Result<(), JobFailure> {
        let job_id = handle.snapshot().await.id;
        let cancel = handle.cancel_token();

        let mut page = self.inner.browser.open().await?;
        match self.inner.navigation.navigate(&mut *page, url.as_str()).await {
            NavigationOutcome::Ready => {}
            NavigationOutcome::Blocked { indicator } => {
                self.write_diagnostic(job_id, "blocked", &*page).await;
                return Err(JobFailure::Blocked { indicator });
            }
            NavigationOutcome::Failed { attempts, last_error } => {
                return Err(JobFailure::Navigation { attempts, last_error });
            }
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let Some(choice) = self.inner.resolver.resolve(&*page).await else {
            self.write_diagnostic(job_id, "no_containers", &*page).await;
            return Err(JobFailure::NoContainers {
                min_count: self.inner.settings.min_container_count,
            });
        };
        let job = handle
            .update(|job| {
                job.total_expected = choice.count as u32;
                job.diagnostics.selector = Some(choice.selector.clone());
            })
            .await;
        self.persist(&job).await;

        let (mut records, stopped) = self
            .extract_all(handle, &*page, &choice.selector, choice.count, options, &cancel)
            .await;
        drop(page);

        let mut stopped = stopped;
        let mut images = 0;
        if options.include_images && !stopped {
            let (uploaded, interrupted) = self.fetch_images(handle, &mut records, &cancel).await;
            images = uploaded;
            stopped = interrupted;
        }

        match self.inner.store.save_records(job_id, &records).await {
            Ok(inserted) => {
                info!(records = records.len(), inserted, images, "Records stored");
                self.publish(ProgressEvent::Stored {
                    job_id,
                    records: records.len() as u32,
                    images,
                })
                .await;
            }
            // Keep what the operator asked to stop with, but do not fail a stopped job.
            Err(e) if stopped => warn!(error = %e, "Failed to store records of stopped job"),
            Err(e) => return Err(JobFailure::Persist(e)),
        }

        Ok(())
    }

    /// Extract containers in page order until done, stopped, or `max_records` reached.
    async fn extract_all(
        &self,
        handle: &JobHandle,
        page: &dyn Page,
        selector: &str,
        count: usize,
        options: StartOptions,
        cancel: &CancellationToken,
    ) -> (Vec<Record>, bool) {
        let mut records: Vec<Record> = Vec::new();
        let limit = options.max_records.map(|max| max as usize);

        for index in 0..count {
            if cancel.is_cancelled() {
                info!(index, remaining = count - index, "Stopping before next container");
                return (records, true);
            }
            if limit.is_some_and(|max| records.len() >= max) {
                debug!(index, "Record limit reached");
                break;
            }

            let snapshot = match page.snapshot(selector, index).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => ContainerSnapshot::default(),
                Err(e) => {
                    warn!(index, error = %e, "Container snapshot failed");
                    ContainerSnapshot::default()
                }
            };

            match self.inner.extractor.extract(&snapshot, index as u32) {
                Ok(record) => {
                    let author = record.author.clone();
                    records.push(record);
                    let accepted = records.len() as u32;
                    let job = handle.update(|job| job.processed = accepted).await;
                    metrics::counter!("scrape_records_extracted").increment(1);
                    self.publish(ProgressEvent::RecordExtracted {
                        job_id: job.id,
                        index: index as u32,
                        author,
                        processed: job.processed,
                        total_expected: job.total_expected,
                    })
                    .await;
                }
                Err(reason) => {
                    debug!(index, reason = %reason, "Container rejected");
                    metrics::counter!("scrape_records_rejected", "reason" => reason.to_string()).increment(1);
                    handle.update(|job| job.diagnostics.record_rejection(reason)).await;
                }
            }
        }

        (records, false)
    }

    /// Download and upload images, filling `image_blob_ref`. Returns the number of
    /// records that got an image and whether a stop interrupted the phase.
    async fn fetch_images(
        &self,
        handle: &JobHandle,
        records: &mut [Record],
        cancel: &CancellationToken,
    ) -> (u32, bool) {
        let job_id = handle.snapshot().await.id;
        let wanted: Vec<(usize, String, String)> = records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| {
                record
                    .image_url
                    .clone()
                    .map(|url| (i, url, dedupe_key(&record.author, record.extraction_index)))
            })
            .collect();
        if wanted.is_empty() {
            return (0, false);
        }

        let total = wanted.len() as u32;
        self.publish(ProgressEvent::ImagesPhase {
            job_id,
            total,
            fetched: 0,
            failed: 0,
        })
        .await;

        let session = Arc::new(self.inner.images.session());
        let results: Vec<(usize, Option<Result<Arc<ImageAsset>, ImageFailure>>)> = stream::iter(wanted)
            .map(|(i, url, key)| {
                let session = Arc::clone(&session);
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return (i, None);
                    }
                    (i, Some(session.fetch(&url, &key).await))
                }
            })
            .buffered(self.inner.settings.image_concurrency)
            .collect()
            .await;

        let mut uploaded: HashMap<String, Option<String>> = HashMap::new();
        let (mut fetched, mut failed, mut interrupted) = (0u32, 0u32, false);

        for (i, result) in results {
            let asset = match result {
                None => {
                    interrupted = true;
                    continue;
                }
                Some(Err(failure)) => {
                    debug!(url = ?records[i].image_url, error = %failure, "Image skipped");
                    failed += 1;
                    continue;
                }
                Some(Ok(asset)) => asset,
            };

            // Records sharing a source URL share one asset and one upload.
            let blob_ref = match uploaded.get(&asset.filename) {
                Some(blob_ref) => blob_ref.clone(),
                None => {
                    let blob_ref = match self
                        .inner
                        .store
                        .upload_image(&asset.bytes, &asset.filename, &asset.content_type)
                        .await
                    {
                        Ok(url) => Some(url),
                        Err(e) => {
                            warn!(filename = %asset.filename, error = %e, "Image upload failed");
                            None
                        }
                    };
                    uploaded.insert(asset.filename.clone(), blob_ref.clone());
                    blob_ref
                }
            };

            match blob_ref {
                Some(blob_ref) => {
                    records[i].image_blob_ref = Some(blob_ref);
                    fetched += 1;
                }
                None => failed += 1,
            }
        }

        metrics::counter!("scrape_images_fetched").increment(fetched as u64);
        let job = handle
            .update(|job| {
                job.diagnostics.images_fetched = fetched;
                job.diagnostics.images_failed = failed;
            })
            .await;
        self.persist(&job).await;
        self.publish(ProgressEvent::ImagesPhase {
            job_id,
            total,
            fetched,
            failed,
        })
        .await;

        (fetched, interrupted || cancel.is_cancelled())
    }

    /// Persist, count, and announce a terminal job. Once the store holds the
    /// final state the job leaves the registry.
    async fn finalize(&self, job: &Job) {
        let persisted = self.persist(job).await;
        match job.status {
            JobStatus::Completed => metrics::counter!("scrape_jobs_completed").increment(1),
            JobStatus::Failed => metrics::counter!("scrape_jobs_failed").increment(1),
            JobStatus::Stopped => metrics::counter!("scrape_jobs_stopped").increment(1),
            JobStatus::Pending | JobStatus::Running => {}
        }
        if persisted && job.status.is_terminal() {
            self.inner.registry.remove(job.id).await;
        }
        self.publish(ProgressEvent::StatusChanged {
            job_id: job.id,
            status: job.status,
        })
        .await;
    }

    async fn persist(&self, job: &Job) -> bool {
        match self.inner.store.update_job(job).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job.id, status = %job.status, error = %e, "Failed to persist job state");
                false
            }
        }
    }

    async fn publish(&self, event: ProgressEvent) {
        self.inner.broadcaster.publish(event).await;
    }

    async fn write_diagnostic(&self, job_id: Uuid, reason: &str, page: &dyn Page) {
        let html = match page.diagnostic_snapshot().await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "Could not capture diagnostic snapshot");
                return;
            }
        };
        let dir = &self.inner.settings.diagnostics_dir;
        let path = dir.join(format!("{job_id}_{reason}.html"));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, html).await
        };
        match written.await {
            Ok(()) => info!(path = %path.display(), "Diagnostic snapshot written"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write diagnostic snapshot"),
        }
    }
}
