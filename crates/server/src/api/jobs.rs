use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use intake_core::{Job, JobId};
use intake_storage::StoreError;

use super::{not_found, store_error, ApiResult};
use crate::state::AppState;

/// Poll path for clients that missed the push.
pub async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<Json<Job>> {
    match state.status.get_job_status(JobId(id)).await {
        Ok(job) => Ok(Json(job)),
        Err(StoreError::NotFound(id)) => Err(not_found("job", id)),
        Err(e) => Err(store_error(e)),
    }
}
