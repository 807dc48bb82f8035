//! Durable, acknowledgement-based message queues.
//!
//! - [`Broker`] / [`Connector`]: one broker connection and how to open it
//! - [`SqsConnector`] and [`MemoryConnector`]: the two backends
//! - [`QueueHandle`]: client of the single task that owns the connection and
//!   reconnects on transport failure
//! - [`Consumer`]: poll loop that dispatches deliveries to a
//!   [`MessageHandler`] and applies ack / nack / dead-letter

pub mod broker;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod parser;
pub mod signal;
pub mod sqs;

pub use broker::{Broker, Connector, PublishOptions, QueueHealth, QueueMessage};
pub use connection::QueueHandle;
pub use consumer::{
    consume, dead_letter_queue_name, ConsumeOptions, Consumer, ConsumerMetrics, ConsumerStats,
    Disposition, MessageHandler,
};
pub use error::QueueError;
pub use memory::{MemoryBroker, MemoryConnector};
pub use parser::{decode_ingestion, decode_notification};
pub use signal::{notify_on_shutdown, shutdown_signal};
pub use sqs::{SqsBroker, SqsConnector};

use std::sync::Arc;

use intake_core::config::{AwsConfig, QueueConfig};

/// Build the connector selected by `QUEUE_BACKEND` (`sqs` or `memory`).
///
/// A memory broker lives inside this process only, so every role sharing it
/// must share the returned connector.
pub fn connector_from_config(
    queue: &QueueConfig,
    aws: &AwsConfig,
) -> Result<Arc<dyn Connector>, QueueError> {
    match queue.backend.as_str() {
        "sqs" => Ok(Arc::new(SqsConnector::new(aws.clone(), queue.clone()))),
        "memory" => Ok(Arc::new(MemoryConnector::new(MemoryBroker::new()))),
        other => Err(QueueError::Provider(format!("unknown queue backend: {other}"))),
    }
}
