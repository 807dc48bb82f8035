use intake_core::IntakeError;
use intake_queue::QueueError;
use intake_storage::StoreError;
use thiserror::Error;

/// Failures that end a job as `failed`.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("cannot read staged file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV stream broken: {0}")]
    Csv(#[from] csv_async::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("cannot encode notice: {0}")]
    Encode(#[from] IntakeError),

    #[error("row write task failed: {0}")]
    Task(String),
}
