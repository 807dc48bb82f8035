//! Streams a staged CSV into the repository store.
//!
//! Rows are validated one by one; rejected rows are logged and skipped. Valid
//! rows are written concurrently, at most `max_in_flight` at a time, and every
//! write has finished by the time [`ingest_file`] returns.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use intake_core::{NewRepo, RawRow};
use intake_storage::{RepoStore, StoreError};

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
}

type WriteResult = (u64, Result<(), StoreError>);

pub async fn ingest_file(
    path: &Path,
    repos: Arc<dyn RepoStore>,
    max_in_flight: usize,
) -> Result<IngestReport, IngestError> {
    let file = tokio::fs::File::open(path).await.map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut deserializer = csv_async::AsyncReaderBuilder::new()
        .trim(csv_async::Trim::All)
        .flexible(true)
        .create_deserializer(file);
    let records = deserializer.deserialize::<RawRow>();
    tokio::pin!(records);

    let max_in_flight = max_in_flight.max(1);
    let mut report = IngestReport::default();
    let mut in_flight: JoinSet<WriteResult> = JoinSet::new();
    let mut fatal: Option<IngestError> = None;
    // Line 1 is the header.
    let mut line: u64 = 1;

    while let Some(record) = records.next().await {
        line += 1;
        report.rows_read += 1;

        let raw = match record {
            Ok(raw) => raw,
            Err(e) if matches!(e.kind(), csv_async::ErrorKind::Io(_)) => {
                fatal = Some(IngestError::Csv(e));
                break;
            }
            Err(e) => {
                warn!(line, error = %e, "Skipping unreadable row");
                report.rows_skipped += 1;
                continue;
            }
        };

        let repo = match NewRepo::try_from(raw) {
            Ok(repo) => repo,
            Err(e) => {
                warn!(line, error = %e, "Skipping invalid row");
                report.rows_skipped += 1;
                continue;
            }
        };

        let store = repos.clone();
        in_flight.spawn(async move { (line, store.insert(repo).await.map(|_| ())) });

        if in_flight.len() >= max_in_flight {
            if let Some(joined) = in_flight.join_next().await {
                if let Err(e) = settle(joined, &mut report) {
                    fatal = Some(e);
                    break;
                }
            }
        }
    }

    // Drain every outstanding write, even when the job is already lost.
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = settle(joined, &mut report) {
            fatal.get_or_insert(e);
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    info!(
        path = %path.display(),
        rows_read = report.rows_read,
        rows_written = report.rows_written,
        rows_skipped = report.rows_skipped,
        "CSV ingested"
    );
    Ok(report)
}

/// Record one finished write. An unavailable store fails the whole job;
/// anything else only loses the row.
fn settle(
    joined: Result<WriteResult, tokio::task::JoinError>,
    report: &mut IngestReport,
) -> Result<(), IngestError> {
    match joined {
        Ok((line, Ok(()))) => {
            debug!(line, "Row written");
            report.rows_written += 1;
            Ok(())
        }
        Ok((_, Err(e))) if e.is_unavailable() => Err(IngestError::Store(e)),
        Ok((line, Err(e))) => {
            warn!(line, error = %e, "Row write rejected");
            report.rows_skipped += 1;
            Ok(())
        }
        Err(e) => Err(IngestError::Task(e.to_string())),
    }
}
