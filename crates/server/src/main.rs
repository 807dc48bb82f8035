//! intake-server: submission gateway, read endpoints and notification relay.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info};

use intake_core::config::{load_dotenv, Config};
use intake_ingest::IngestWorker;
use intake_notify::{Dispatcher, NotificationHandler, Notifier, SubscriberHub};
use intake_queue::{
    connector_from_config, notify_on_shutdown, shutdown_signal, ConsumeOptions, Consumer, QueueHandle,
};
use intake_server::{build_router, AppState};
use intake_storage::open_stores;

// ── CLI ─────────────────────────────────────────────────────────────

/// Intake API server.
#[derive(Parser, Debug)]
#[command(name = "intake-server", version, about)]
struct Cli {
    /// Config profile (prefix for every environment key).
    #[arg(long, env = "INTAKE_PROFILE", default_value = "")]
    profile: String,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Also drain the ingestion queue in this process. Required for the
    /// in-memory queue backend, which is not shared between processes.
    #[arg(long, env = "INTAKE_EMBEDDED_WORKER")]
    embedded_worker: bool,
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
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.log_summary();

    let stores = open_stores(&config.postgres).await?;
    let connector = connector_from_config(&config.queue, &config.aws)?;
    let reconnect = config.queue.reconnect_interval();
    let shutdown = notify_on_shutdown();

    // Gateway publishes on its own connection so uploads never queue behind
    // the relay's long poll.
    let gateway = QueueHandle::spawn(connector.clone(), reconnect);
    gateway.declare(&config.queue.ingestion_queue).await?;

    // ── Notification relay ──
    let hub = SubscriberHub::new(config.server.push_buffer);
    let channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(hub.clone())];
    let handler = Arc::new(NotificationHandler::new(Arc::new(Dispatcher::new(channels))));
    let relay = Consumer::new(
        QueueHandle::spawn(connector.clone(), reconnect),
        config.queue.notification_queue.clone(),
        handler,
        ConsumeOptions::from_config(&config.queue),
    );
    let relay_metrics = relay.metrics();
    let relay_task = tokio::spawn(relay.run(shutdown.clone()));

    let worker_task = if cli.embedded_worker {
        let publisher = QueueHandle::spawn(connector.clone(), reconnect);
        publisher.declare(&config.queue.notification_queue).await?;
        let worker = Arc::new(IngestWorker::new(
            stores.jobs.clone(),
            stores.repos.clone(),
            publisher,
            config.queue.notification_queue.clone(),
            config.worker.clone(),
        ));
        let consumer = Consumer::new(
            QueueHandle::spawn(connector, reconnect),
            config.queue.ingestion_queue.clone(),
            worker,
            ConsumeOptions::from_config(&config.queue),
        );
        info!(queue = %config.queue.ingestion_queue, "Embedded ingest worker enabled");
        Some(tokio::spawn(consumer.run(shutdown.clone())))
    } else {
        None
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = Arc::new(AppState::new(config, stores, gateway, hub).with_relay(relay_metrics));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(serve_shutdown(shutdown.clone()))
        .await?;

    // The HTTP side stopped on a signal; make sure the consumers see it too.
    shutdown.notify_waiters();
    join_consumer("relay", relay_task).await;
    if let Some(task) = worker_task {
        join_consumer("worker", task).await;
    }

    info!("intake-server exited cleanly");
    Ok(())
}

async fn serve_shutdown(shutdown: Arc<Notify>) {
    tokio::select! {
        _ = shutdown_signal() => {},
        _ = shutdown.notified() => {},
    }
}

async fn join_consumer(
    role: &str,
    task: tokio::task::JoinHandle<Result<(), intake_queue::QueueError>>,
) {
    match task.await {
        Ok(Ok(())) => info!(role, "Consumer stopped"),
        Ok(Err(e)) => error!(role, error = %e, "Consumer ended with error"),
        Err(e) => error!(role, error = %e, "Consumer task panicked"),
    }
}
