//! Wire payloads carried by the ingestion and notification queues.
//!
//! Both queues carry JSON bodies. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::error::IntakeError;
use crate::job::{JobId, JobStatus};

/// Default name of the queue the gateway publishes to and the worker drains.
pub const INGESTION_QUEUE: &str = "import-queue";

/// Default name of the queue the worker publishes terminal outcomes to.
pub const NOTIFICATION_QUEUE: &str = "notify-queue";

/// Instructs the worker to process one staged file for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionMessage {
    pub file_path: String,
    pub job_id: JobId,
}

/// Envelope as it arrives, before validation. Missing fields stay `None`
/// so that a malformed body is reported precisely instead of as a serde error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIngestionMessage {
    file_path: Option<String>,
    job_id: Option<i64>,
}

impl IngestionMessage {
    pub fn new(job_id: JobId, file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            job_id,
        }
    }

    /// Parse and validate an ingestion envelope.
    ///
    /// `jobId` must be a positive integer and `filePath` non-empty; anything
    /// else is a malformed (poison) envelope.
    pub fn from_json(body: &str) -> Result<Self, IntakeError> {
        let raw: RawIngestionMessage = serde_json::from_str(body)
            .map_err(|e| IntakeError::MalformedEnvelope(format!("not a valid envelope: {e}")))?;

        let job_id = match raw.job_id {
            Some(id) if id > 0 => JobId(id),
            Some(id) => {
                return Err(IntakeError::MalformedEnvelope(format!("invalid jobId: {id}")))
            }
            None => return Err(IntakeError::MalformedEnvelope("missing jobId".into())),
        };

        let file_path = match raw.file_path {
            Some(p) if !p.trim().is_empty() => p,
            _ => return Err(IntakeError::MalformedEnvelope("missing filePath".into())),
        };

        Ok(Self { file_path, job_id })
    }

    pub fn to_json(&self) -> Result<String, IntakeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Terminal job outcome, published by the worker and fanned out by the relay.
///
/// The `type` tag is closed: unknown values fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationMessage {
    #[serde(rename = "jobCompleted", rename_all = "camelCase")]
    JobCompleted { job_id: JobId },
    #[serde(rename = "jobFailed", rename_all = "camelCase")]
    JobFailed { job_id: JobId },
}

impl NotificationMessage {
    /// Notification matching a terminal status; `None` for non-terminal ones.
    pub fn for_status(job_id: JobId, status: JobStatus) -> Option<Self> {
        match status {
            JobStatus::Completed => Some(Self::JobCompleted { job_id }),
            JobStatus::Failed => Some(Self::JobFailed { job_id }),
            JobStatus::Pending | JobStatus::Processing => None,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Self::JobCompleted { job_id } | Self::JobFailed { job_id } => *job_id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::JobCompleted { .. } => JobStatus::Completed,
            Self::JobFailed { .. } => JobStatus::Failed,
        }
    }

    /// Event name used on the wire and on the push channel.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JobCompleted { .. } => "jobCompleted",
            Self::JobFailed { .. } => "jobFailed",
        }
    }

    pub fn from_json(body: &str) -> Result<Self, IntakeError> {
        serde_json::from_str(body).map_err(|e| IntakeError::MalformedEnvelope(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, IntakeError> {
        Ok(serde_json::to_string(self)?)
    }
}
