//! Notifier trait definition and shared event types.

use serde::Serialize;

use intake_core::{JobId, JobStatus, NotificationMessage};

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("channel closed: {0}")]
    Closed(String),

    #[error("event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A terminal job outcome as pushed to subscribers.
///
/// Only built from a [`NotificationMessage`], so it is always `completed` or
/// `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobEvent(NotificationMessage);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventData {
    job_id: JobId,
    status: JobStatus,
}

#[derive(Serialize)]
struct PushFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: EventData,
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        self.0.job_id()
    }

    pub fn status(&self) -> JobStatus {
        self.0.status()
    }

    pub fn event_name(&self) -> &'static str {
        self.0.event_name()
    }

    /// Push-channel frame: `{"type":"jobCompleted","data":{"jobId":1,"status":"completed"}}`.
    pub fn to_push_json(&self) -> Result<String, NotifyError> {
        Ok(serde_json::to_string(&PushFrame {
            kind: self.event_name(),
            data: EventData {
                job_id: self.job_id(),
                status: self.status(),
            },
        })?)
    }
}

impl From<NotificationMessage> for JobEvent {
    fn from(msg: NotificationMessage) -> Self {
        Self(msg)
    }
}

/// A push channel for job events.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an event. Returns how many live subscribers received it.
    async fn send(&self, event: &JobEvent) -> Result<usize, NotifyError>;

    /// Human-readable name for this channel (e.g., "websocket").
    fn channel_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_frame_shape() {
        let event = JobEvent::from(NotificationMessage::JobCompleted { job_id: JobId(4) });
        let json: serde_json::Value = serde_json::from_str(&event.to_push_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "jobCompleted", "data": { "jobId": 4, "status": "completed" } })
        );
    }

    #[test]
    fn failed_event_name() {
        let event = JobEvent::from(NotificationMessage::JobFailed { job_id: JobId(5) });
        assert_eq!(event.event_name(), "jobFailed");
        assert_eq!(event.status(), JobStatus::Failed);
    }

    #[test]
    fn events_exist_only_for_terminal_outcomes() {
        for status in [JobStatus::Pending, JobStatus::Processing] {
            assert!(NotificationMessage::for_status(JobId(1), status).map(JobEvent::from).is_none());
        }
        for (status, name) in [(JobStatus::Completed, "jobCompleted"), (JobStatus::Failed, "jobFailed")] {
            let event = NotificationMessage::for_status(JobId(1), status).map(JobEvent::from).unwrap();
            assert_eq!(event.status(), status);
            assert_eq!(event.event_name(), name);
        }
    }
}
