use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::quote::RejectReason;

/// Lifecycle status of a scraping job.
///
/// `Pending -> Running -> {Completed | Failed | Stopped}`, with `Pending -> Stopped`
/// allowed when a stop arrives before any work started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Stopped)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Stopped)
        )
    }
}

/// Per-job statistics that are not part of the counters proper.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobDiagnostics {
    /// Container selector chosen by the resolver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub rejected: u32,
    #[serde(default)]
    pub rejections: BTreeMap<RejectReason, u32>,
    pub images_fetched: u32,
    pub images_failed: u32,
}

impl JobDiagnostics {
    pub fn record_rejection(&mut self, reason: RejectReason) {
        self.rejected += 1;
        *self.rejections.entry(reason).or_default() += 1;
    }

    pub fn rejections_for(&self, reason: RejectReason) -> u32 {
        self.rejections.get(&reason).copied().unwrap_or(0)
    }
}

/// A topic-scoped extraction run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub topic: String,
    pub status: JobStatus,
    pub total_expected: u32,
    pub processed: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub diagnostics: JobDiagnostics,
}

impl Job {
    pub fn new(id: Uuid, topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            topic: topic.into(),
            status: JobStatus::Pending,
            total_expected: 0,
            processed: 0,
            created_at: now,
            updated_at: now,
            error_message: None,
            diagnostics: JobDiagnostics::default(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Selection criteria for listing jobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub topic: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(topic) = &self.topic {
            if !job.topic.eq_ignore_ascii_case(topic) {
                return false;
            }
        }
        true
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}
