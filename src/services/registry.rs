//! In-memory registry of job state, authoritative while a job runs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::{Job, JobFilter, JobStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One job's live state plus its cancellation flag.
pub struct JobHandle {
    state: RwLock<Job>,
    cancel: CancellationToken,
}

impl JobHandle {
    fn new(job: Job) -> Self {
        Self {
            state: RwLock::new(job),
            cancel: CancellationToken::new(),
        }
    }

    /// Consistent copy of the job.
    pub async fn snapshot(&self) -> Job {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> JobStatus {
        self.state.read().await.status
    }

    /// Move to `next` if the state machine allows it; returns the updated job.
    pub async fn transition(&self, next: JobStatus) -> Result<Job, TransitionError> {
        let mut job = self.state.write().await;
        if !job.status.can_transition_to(next) {
            return Err(TransitionError {
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        job.touch();
        Ok(job.clone())
    }

    /// Like [`transition`](Self::transition) but also applies `f` under the same lock.
    pub async fn transition_with<F>(&self, next: JobStatus, f: F) -> Result<Job, TransitionError>
    where
        F: FnOnce(&mut Job),
    {
        let mut job = self.state.write().await;
        if !job.status.can_transition_to(next) {
            return Err(TransitionError {
                from: job.status,
                to: next,
            });
        }
        f(&mut job);
        job.status = next;
        job.touch();
        Ok(job.clone())
    }

    /// Mutate counters of a non-terminal job. Terminal jobs are left untouched.
    pub async fn update<F>(&self, f: F) -> Job
    where
        F: FnOnce(&mut Job),
    {
        let mut job = self.state.write().await;
        if !job.status.is_terminal() {
            f(&mut job);
            job.touch();
        }
        job.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the job, deciding under the state lock.
    ///
    /// A Pending job becomes Stopped at once. A Running job only has its token
    /// cancelled and stops at its next checkpoint. Terminal jobs are refused.
    pub async fn stop(&self) -> Result<StopEffect, TransitionError> {
        let mut job = self.state.write().await;
        match job.status {
            JobStatus::Pending => {
                self.cancel.cancel();
                job.status = JobStatus::Stopped;
                job.touch();
                Ok(StopEffect::Stopped(job.clone()))
            }
            JobStatus::Running => {
                self.cancel.cancel();
                Ok(StopEffect::Signalled)
            }
            status => Err(TransitionError {
                from: status,
                to: JobStatus::Stopped,
            }),
        }
    }

    /// End a run that did not fail: Stopped if a stop was accepted, else Completed.
    pub async fn finish(&self) -> Result<Job, TransitionError> {
        let mut job = self.state.write().await;
        let next = if self.cancel.is_cancelled() {
            JobStatus::Stopped
        } else {
            JobStatus::Completed
        };
        if !job.status.can_transition_to(next) {
            return Err(TransitionError {
                from: job.status,
                to: next,
            });
        }
        job.status = next;
        job.touch();
        Ok(job.clone())
    }
}

/// What [`JobHandle::stop`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum StopEffect {
    /// The job had not started and is now Stopped.
    Stopped(Job),
    /// The job is running and will stop at its next checkpoint.
    Signalled,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<JobHandle>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle::new(job.clone()));
        self.jobs.write().await.insert(job.id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<JobHandle>> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<JobHandle>> {
        self.jobs.write().await.remove(&id)
    }

    /// Matching jobs, newest first.
    pub async fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let handles: Vec<Arc<JobHandle>> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(handles.len());
        for handle in handles {
            let job = handle.snapshot().await;
            if filter.matches(&job) {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(filter.effective_limit());
        jobs
    }
}
