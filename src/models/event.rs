use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Transient job progress notification fanned out to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StatusChanged {
        job_id: Uuid,
        status: JobStatus,
    },
    RecordExtracted {
        job_id: Uuid,
        index: u32,
        author: String,
        processed: u32,
        total_expected: u32,
    },
    ImagesPhase {
        job_id: Uuid,
        total: u32,
        fetched: u32,
        failed: u32,
    },
    Stored {
        job_id: Uuid,
        records: u32,
        images: u32,
    },
    Failed {
        job_id: Uuid,
        error: String,
    },
}

impl ProgressEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::StatusChanged { job_id, .. }
            | Self::RecordExtracted { job_id, .. }
            | Self::ImagesPhase { job_id, .. }
            | Self::Stored { job_id, .. }
            | Self::Failed { job_id, .. } => *job_id,
        }
    }

    /// Event name used on the wire (SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::RecordExtracted { .. } => "record_extracted",
            Self::ImagesPhase { .. } => "images_phase",
            Self::Stored { .. } => "stored",
            Self::Failed { .. } => "failed",
        }
    }
}
