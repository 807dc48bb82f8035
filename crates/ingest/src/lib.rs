//! Ingestion worker: turns a staged CSV named by an ingestion message into
//! stored repositories and a terminal job status.
//!
//! - [`pipeline`]: streaming CSV → [`intake_storage::RepoStore`] with bounded concurrent writes
//! - [`worker`]: the per-message job state machine, a [`intake_queue::MessageHandler`]

pub mod error;
pub mod pipeline;
pub mod worker;

pub use error::IngestError;
pub use pipeline::{ingest_file, IngestReport};
pub use worker::IngestWorker;
