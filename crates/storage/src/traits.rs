//! Store interfaces shared by the worker, the gateway, and the poll path.

use async_trait::async_trait;

use intake_core::{Job, JobId, JobStatus, NewRepo, Repo};

use crate::error::StoreError;

/// Durable record of each submitted job and its status.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `pending` and return it with its generated id.
    async fn create_job(&self, file_path: &str) -> Result<Job, StoreError>;

    /// Move the job to `status`. Backward or skipping moves fail with
    /// [`StoreError::InvalidTransition`]; repeating a terminal status succeeds.
    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<Job, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError>;
}

/// Destination of ingested rows.
#[async_trait]
pub trait RepoStore: Send + Sync {
    async fn insert(&self, repo: NewRepo) -> Result<Repo, StoreError>;

    /// Newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Repo>, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;
}
