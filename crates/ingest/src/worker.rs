//! Per-message job state machine for the ingestion queue.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use intake_core::config::WorkerConfig;
use intake_core::{IngestionMessage, Job, JobId, JobStatus, NotificationMessage};
use intake_queue::{decode_ingestion, Disposition, MessageHandler, PublishOptions, QueueHandle, QueueMessage};
use intake_storage::{JobStore, RepoStore, StoreError};

use crate::error::IngestError;
use crate::pipeline::{ingest_file, IngestReport};

pub struct IngestWorker {
    jobs: Arc<dyn JobStore>,
    repos: Arc<dyn RepoStore>,
    notifications: QueueHandle,
    notification_queue: String,
    config: WorkerConfig,
}

impl IngestWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        repos: Arc<dyn RepoStore>,
        notifications: QueueHandle,
        notification_queue: impl Into<String>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            repos,
            notifications,
            notification_queue: notification_queue.into(),
            config,
        }
    }

    /// Run one job to a terminal status.
    ///
    /// `Ack` means the job reached `completed` (or already was terminal) and
    /// its notification has been published.
    pub async fn process(&self, message: &IngestionMessage) -> Disposition {
        let job_id = message.job_id;

        let job = match self.jobs.get_job(job_id).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                error!(job_id = %job_id, "Ingestion message for unknown job, dead-lettering");
                return Disposition::DeadLetter;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Cannot load job, retrying later");
                return Disposition::Nack;
            }
        };

        match job.status {
            JobStatus::Completed | JobStatus::Failed => return self.renotify(&job).await,
            JobStatus::Processing => {
                info!(job_id = %job_id, "Resuming job left in processing");
            }
            JobStatus::Pending => {
                if let Err(e) = self.jobs.update_status(job_id, JobStatus::Processing).await {
                    // Untouched job; the redelivery starts over.
                    warn!(job_id = %job_id, error = %e, "Cannot mark job processing, retrying later");
                    return Disposition::Nack;
                }
                info!(job_id = %job_id, file_path = %message.file_path, "Job processing");
            }
        }

        match self.ingest(&message.file_path).await {
            Ok(report) => self.complete(job_id, report).await,
            Err(e) => self.fail(job_id, e).await,
        }
    }

    async fn ingest(&self, file_path: &str) -> Result<IngestReport, IngestError> {
        ingest_file(Path::new(file_path), self.repos.clone(), self.config.max_in_flight_rows).await
    }

    async fn complete(&self, job_id: JobId, report: IngestReport) -> Disposition {
        if let Err(e) = self.jobs.update_status(job_id, JobStatus::Completed).await {
            return self.fail(job_id, IngestError::Store(e)).await;
        }
        info!(
            job_id = %job_id,
            rows_written = report.rows_written,
            rows_skipped = report.rows_skipped,
            "Job completed"
        );

        match self.notify(NotificationMessage::JobCompleted { job_id }).await {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Completion notice not published");
                Disposition::Nack
            }
        }
    }

    /// Mark the job failed and announce it. Without a recorded `failed`
    /// status nothing is announced.
    async fn fail(&self, job_id: JobId, cause: IngestError) -> Disposition {
        error!(job_id = %job_id, error = %cause, "Job failed");

        if let Err(e) = self.jobs.update_status(job_id, JobStatus::Failed).await {
            error!(job_id = %job_id, error = %e, "Could not record failure, leaving message for redelivery");
            return Disposition::Nack;
        }

        if let Err(e) = self.notify(NotificationMessage::JobFailed { job_id }).await {
            warn!(job_id = %job_id, error = %e, "Failure notice not published");
        }
        Disposition::Nack
    }

    /// Redelivery of a job that already finished: publish its outcome again
    /// without touching the store.
    async fn renotify(&self, job: &Job) -> Disposition {
        info!(job_id = %job.id, status = %job.status, "Job already terminal, re-announcing");
        let Some(notice) = NotificationMessage::for_status(job.id, job.status) else {
            return Disposition::Ack;
        };
        match self.notify(notice).await {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Re-announcement not published");
                Disposition::Nack
            }
        }
    }

    async fn notify(&self, notice: NotificationMessage) -> Result<(), IngestError> {
        let body = notice.to_json()?;
        self.notifications
            .publish(&self.notification_queue, body, PublishOptions::persistent())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for IngestWorker {
    async fn handle(&self, message: &QueueMessage) -> Disposition {
        match decode_ingestion(message) {
            Ok(envelope) => self.process(&envelope).await,
            // Poison: retried until the delivery limit moves it aside.
            Err(_) => Disposition::Nack,
        }
    }
}
