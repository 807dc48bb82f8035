//! Poll path: job status straight from the store.

use std::sync::Arc;

use intake_core::{Job, JobId};
use intake_storage::{JobStore, StoreError};

#[derive(Clone)]
pub struct StatusService {
    jobs: Arc<dyn JobStore>,
}

impl StatusService {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Current job record; [`StoreError::NotFound`] for unknown ids.
    pub async fn get_job_status(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs.get_job(id).await
    }
}
