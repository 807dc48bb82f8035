//! ingest-worker: drains the ingestion queue.
//!
//! Consumes `{filePath, jobId}` envelopes, ingests the staged CSV, moves the
//! job to a terminal status, and publishes `jobCompleted` / `jobFailed` to the
//! notification queue.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use intake_core::config::{load_dotenv, Config};
use intake_ingest::IngestWorker;
use intake_queue::{connector_from_config, notify_on_shutdown, ConsumeOptions, Consumer, QueueHandle};
use intake_storage::open_stores;

// ── CLI ─────────────────────────────────────────────────────────────

/// Ingestion worker: CSV files in, repositories and job outcomes out.
#[derive(Parser, Debug)]
#[command(name = "ingest-worker", version, about)]
struct Cli {
    /// Config profile (prefix for every environment key).
    #[arg(long, env = "INTAKE_PROFILE", default_value = "")]
    profile: String,

    /// Override the number of concurrent row writes per job.
    #[arg(long, env = "WORKER_MAX_IN_FLIGHT_ROWS")]
    max_in_flight_rows: Option<usize>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::for_profile(&cli.profile);
    if let Some(n) = cli.max_in_flight_rows {
        config.worker.max_in_flight_rows = n.max(1);
    }
    config.log_summary();

    let stores = open_stores(&config.postgres).await?;
    let connector = connector_from_config(&config.queue, &config.aws)?;

    // Publishing has its own connection so notices never wait behind a long poll.
    let consumer_handle = QueueHandle::spawn(connector.clone(), config.queue.reconnect_interval());
    let publisher_handle = QueueHandle::spawn(connector, config.queue.reconnect_interval());
    publisher_handle.declare(&config.queue.notification_queue).await?;

    let worker = Arc::new(IngestWorker::new(
        stores.jobs,
        stores.repos,
        publisher_handle,
        config.queue.notification_queue.clone(),
        config.worker.clone(),
    ));

    let consumer = Consumer::new(
        consumer_handle,
        config.queue.ingestion_queue.clone(),
        worker,
        ConsumeOptions::from_config(&config.queue),
    );
    let metrics = consumer.metrics();

    info!(queue = %config.queue.ingestion_queue, "ingest-worker starting");
    consumer.run(notify_on_shutdown()).await?;
    info!(stats = ?metrics.snapshot(), "ingest-worker exited cleanly");

    Ok(())
}
