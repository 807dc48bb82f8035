//! Broker connection trait and shared message types.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A raw message received from a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body (JSON string).
    pub body: String,
    /// Provider-specific handle for ack/nack (e.g., SQS receipt handle).
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been delivered, this delivery included.
    pub attempt_count: u32,
}

/// Health status of a queue connection.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    /// Whether the queue is reachable.
    pub connected: bool,
    /// Approximate number of messages waiting in the queue.
    pub approximate_message_count: Option<u64>,
    /// Queue provider name (e.g., "sqs", "memory").
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueHealth {{ connected: {}, messages: {:?}, provider: {} }}",
            self.connected, self.approximate_message_count, self.provider
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Persistent messages survive a broker restart until acknowledged.
    pub persistent: bool,
}

impl PublishOptions {
    pub fn persistent() -> Self {
        Self { persistent: true }
    }

    pub fn transient() -> Self {
        Self { persistent: false }
    }
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self::persistent()
    }
}

/// One live connection to a message broker.
///
/// Implementations report lost connectivity as [`QueueError::Connection`];
/// the connection task treats that as the signal to reconnect.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a durable queue, creating it when it does not exist yet.
    async fn declare_queue(&self, queue: &str) -> Result<(), QueueError>;

    /// Enqueue one message.
    async fn publish(
        &self,
        queue: &str,
        body: &str,
        options: PublishOptions,
    ) -> Result<(), QueueError>;

    /// Take up to `max_messages` deliveries from the queue.
    ///
    /// May block for up to the provider's long-poll timeout (e.g., 20s for SQS).
    /// Returns an empty vec if no messages are available.
    async fn poll(&self, queue: &str, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge successful processing; removes the message from the queue.
    async fn ack(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError>;

    /// Negative-acknowledge: returns the message to the queue for redelivery.
    async fn nack(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError>;

    /// Check queue connectivity and return health status.
    async fn health(&self, queue: &str) -> Result<QueueHealth, QueueError>;

    /// Provider name used in logs and health output.
    fn provider(&self) -> &'static str;
}

/// Opens broker connections. Called again after every transport failure.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Broker>, QueueError>;
}
