//! Submission gateway: stage the upload, create its job, enqueue it.

use std::path::Path;
use std::sync::Arc;

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

use intake_core::{IngestionMessage, JobId};
use intake_queue::PublishOptions;

use super::{bad_request, internal_error, store_error, unavailable, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportAccepted {
    pub job_id: JobId,
    pub file_path: String,
}

pub async fn import_csv(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ImportAccepted>)> {
    let field = loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(format!("Multipart error: {e}")))?
            .ok_or_else(|| bad_request("No file provided (expected field \"file\")"))?;
        if field.name() == Some("file") {
            break field;
        }
    };

    let filename = sanitize_filename(field.file_name().unwrap_or(""));
    let dir = &state.config.server.upload_dir;
    tokio::fs::create_dir_all(dir).await.map_err(internal_error)?;
    let staged = dir.join(format!("{}-{}", Uuid::new_v4(), filename));
    let bytes = stage(field, &staged).await?;
    let file_path = staged.display().to_string();

    let job = state.stores.jobs.create_job(&file_path).await.map_err(|e| {
        discard(&staged);
        store_error(e)
    })?;

    let body = IngestionMessage::new(job.id, file_path.clone())
        .to_json()
        .map_err(internal_error)?;
    // Waits out a queue outage; only a non-transport failure ends up here.
    // The job is left pending: only the worker moves it forward.
    if let Err(e) = state
        .gateway
        .publish(&state.config.queue.ingestion_queue, body, PublishOptions::persistent())
        .await
    {
        error!(job_id = %job.id, error = %e, "Ingestion message not enqueued");
        return Err(unavailable(format!("job {} could not be queued: {e}", job.id)));
    }

    info!(job_id = %job.id, file_path = %file_path, bytes, "Upload accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(ImportAccepted {
            job_id: job.id,
            file_path,
        }),
    ))
}

/// Stream one multipart field to disk, returning the byte count.
async fn stage(mut field: Field<'_>, path: &Path) -> ApiResult<u64> {
    let mut file = tokio::fs::File::create(path).await.map_err(internal_error)?;
    let mut written = 0u64;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                discard(path);
                return Err(bad_request(format!("Failed to read file: {e}")));
            }
        };
        written += chunk.len() as u64;
        if let Err(e) = file.write_all(&chunk).await {
            discard(path);
            return Err(internal_error(e));
        }
    }
    file.flush().await.map_err(internal_error)?;

    if written == 0 {
        discard(path);
        return Err(bad_request("Uploaded file is empty"));
    }
    Ok(written)
}

fn discard(path: &Path) {
    let path = path.to_path_buf();
    tokio::spawn(async move {
        let _ = tokio::fs::remove_file(path).await;
    });
}

/// Last path component, restricted to `[A-Za-z0-9._-]`.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned.to_string()
    }
}
