//! Poll loop that hands each delivery to a [`MessageHandler`] and applies the
//! handler's [`Disposition`].
//!
//! A message is acknowledged only after its handler has returned. A message
//! that keeps being nacked is moved to `<queue>-dead-letter` once it has been
//! delivered `max_deliveries` times.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use intake_core::config::QueueConfig;

use crate::broker::{PublishOptions, QueueMessage};
use crate::connection::QueueHandle;
use crate::error::QueueError;

/// What to do with a delivery once the handler is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; remove it from the queue.
    Ack,
    /// Not processed; redeliver it.
    Nack,
    /// Never processable; park it on the dead-letter queue.
    DeadLetter,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueueMessage) -> Disposition;
}

/// Name of the queue that receives messages given up on from `queue`.
pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}-dead-letter")
}

#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Messages taken per poll.
    pub prefetch: u32,
    /// Deliveries after which a nacked message is dead-lettered (0 = never).
    pub max_deliveries: u32,
    /// Pause after an empty poll or a failed one.
    pub idle_backoff: Duration,
    /// How long shutdown waits for an outstanding poll so its deliveries can
    /// be handed back.
    pub drain_timeout: Duration,
}

impl ConsumeOptions {
    pub fn from_config(queue: &QueueConfig) -> Self {
        Self {
            prefetch: queue.prefetch.max(1),
            max_deliveries: queue.max_deliveries,
            drain_timeout: Duration::from_secs(u64::from(queue.wait_time_secs) + 5),
            ..Self::default()
        }
    }
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            prefetch: 1,
            max_deliveries: 5,
            idle_backoff: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(25),
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    pub received: AtomicU64,
    pub acked: AtomicU64,
    pub nacked: AtomicU64,
    pub dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`ConsumerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
    pub dead_lettered: u64,
}

impl ConsumerMetrics {
    pub fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

pub struct Consumer {
    handle: QueueHandle,
    queue: String,
    dead_letter_queue: String,
    handler: Arc<dyn MessageHandler>,
    options: ConsumeOptions,
    metrics: Arc<ConsumerMetrics>,
}

impl Consumer {
    pub fn new(
        handle: QueueHandle,
        queue: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        options: ConsumeOptions,
    ) -> Self {
        let queue = queue.into();
        Self {
            handle,
            dead_letter_queue: dead_letter_queue_name(&queue),
            queue,
            handler,
            options,
            metrics: Arc::new(ConsumerMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        self.metrics.clone()
    }

    /// Declare the queue and its dead-letter queue.
    pub async fn declare(&self) -> Result<(), QueueError> {
        self.handle.declare(&self.queue).await?;
        self.handle.declare(&self.dead_letter_queue).await
    }

    /// Consume until `shutdown` is notified.
    ///
    /// Shutdown never interrupts a running handler. A poll already sent to the
    /// broker is awaited (up to `drain_timeout`) and whatever it delivers is
    /// nacked unhandled.
    pub async fn run(self, shutdown: Arc<Notify>) -> Result<(), QueueError> {
        self.declare().await?;
        info!(
            queue = %self.queue,
            prefetch = self.options.prefetch,
            max_deliveries = self.options.max_deliveries,
            "Queue consumer started"
        );

        let notified = shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        loop {
            let poll = self.handle.poll(&self.queue, self.options.prefetch);
            tokio::pin!(poll);
            let polled = tokio::select! {
                polled = &mut poll => polled,
                _ = notified.as_mut() => {
                    match tokio::time::timeout(self.options.drain_timeout, poll).await {
                        Ok(Ok(messages)) => self.release(messages).await,
                        Ok(Err(e)) => debug!(queue = %self.queue, error = %e, "Final poll failed"),
                        Err(_) => warn!(queue = %self.queue, "Outstanding poll abandoned at shutdown"),
                    }
                    break;
                }
            };

            match polled {
                Ok(messages) if !messages.is_empty() => {
                    for message in messages {
                        self.dispatch(message).await;
                    }
                    continue;
                }
                Ok(_) => {}
                Err(QueueError::Closed) => return Err(QueueError::Closed),
                Err(e) => warn!(queue = %self.queue, error = %e, "Queue poll failed"),
            }

            tokio::select! {
                _ = notified.as_mut() => break,
                _ = tokio::time::sleep(self.options.idle_backoff) => {}
            }
        }

        info!(queue = %self.queue, stats = ?self.metrics.snapshot(), "Queue consumer stopped");
        Ok(())
    }

    /// Poll once and dispatch whatever arrived. Returns the number of
    /// messages handled.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let messages = self.handle.poll(&self.queue, self.options.prefetch).await?;
        let count = messages.len();
        for message in messages {
            self.dispatch(message).await;
        }
        Ok(count)
    }

    async fn dispatch(&self, message: QueueMessage) {
        self.metrics.received.fetch_add(1, Ordering::Relaxed);
        let mut disposition = self.handler.handle(&message).await;

        if disposition == Disposition::Nack
            && self.options.max_deliveries > 0
            && message.attempt_count >= self.options.max_deliveries
        {
            warn!(
                queue = %self.queue,
                message_id = %message.id,
                attempts = message.attempt_count,
                "Delivery limit reached, dead-lettering"
            );
            disposition = Disposition::DeadLetter;
        }

        debug!(queue = %self.queue, message_id = %message.id, ?disposition, "Settling message");
        let result = match disposition {
            Disposition::Ack => self
                .handle
                .ack(&self.queue, &message)
                .await
                .map(|_| &self.metrics.acked),
            Disposition::Nack => self
                .handle
                .nack(&self.queue, &message)
                .await
                .map(|_| &self.metrics.nacked),
            Disposition::DeadLetter => self.dead_letter(&message).await.map(|_| &self.metrics.dead_lettered),
        };

        match result {
            Ok(counter) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(
                queue = %self.queue,
                message_id = %message.id,
                ?disposition,
                error = %e,
                "Failed to settle message"
            ),
        }
    }

    /// Return deliveries that will not be handled.
    async fn release(&self, messages: Vec<QueueMessage>) {
        for message in messages {
            match self.handle.nack(&self.queue, &message).await {
                Ok(()) => {
                    debug!(queue = %self.queue, message_id = %message.id, "Released undelivered message");
                    self.metrics.nacked.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!(queue = %self.queue, message_id = %message.id, error = %e, "Failed to release message"),
            }
        }
    }

    async fn dead_letter(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.handle
            .publish(&self.dead_letter_queue, message.body.clone(), PublishOptions::persistent())
            .await?;
        self.handle.ack(&self.queue, message).await
    }
}

/// Spawn a consumer task.
pub fn consume(
    handle: QueueHandle,
    queue: impl Into<String>,
    handler: Arc<dyn MessageHandler>,
    options: ConsumeOptions,
    shutdown: Arc<Notify>,
) -> (Arc<ConsumerMetrics>, JoinHandle<Result<(), QueueError>>) {
    let consumer = Consumer::new(handle, queue, handler, options);
    let metrics = consumer.metrics();
    (metrics, tokio::spawn(consumer.run(shutdown)))
}
