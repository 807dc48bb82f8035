//! In-process broker with the same delivery semantics as the durable backends.
//!
//! Used for local runs (`QUEUE_BACKEND=memory`) and as the test double for
//! the queue. Deliveries move to an in-flight set until acked; nack and
//! [`MemoryBroker::restart`] return them to the queue with the delivery
//! counter preserved. A restart drops transient messages only.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::broker::{Broker, Connector, PublishOptions, QueueHealth, QueueMessage};
use crate::error::QueueError;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    persistent: bool,
    timestamp: DateTime<Utc>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    ready: VecDeque<StoredMessage>,
    /// Receipt handle → delivered message awaiting ack/nack.
    in_flight: HashMap<String, StoredMessage>,
}

#[derive(Debug)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    reachable: AtomicBool,
    connects: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            connects: AtomicU64::new(0),
        })
    }

    /// Simulate the broker going down or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Number of successful connects, for reconnect assertions.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Simulate a broker restart: unacked deliveries return to their queue
    /// and every transient message is lost.
    pub fn restart(&self) {
        let mut queues = self.lock();
        for queue in queues.values_mut() {
            let in_flight: Vec<StoredMessage> = queue.in_flight.drain().map(|(_, m)| m).collect();
            queue.ready.extend(in_flight);
            queue.ready.retain(|m| m.persistent);
        }
    }

    /// Bodies waiting for delivery, oldest first.
    pub fn pending_bodies(&self, queue: &str) -> Vec<String> {
        self.lock()
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Ready plus in-flight messages.
    pub fn depth(&self, queue: &str) -> usize {
        self.lock()
            .get(queue)
            .map(|q| q.ready.len() + q.in_flight.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemoryQueue>> {
        // A poisoned lock only means a test panicked mid-operation; the map
        // itself is still consistent.
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_reachable(&self) -> Result<(), QueueError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(QueueError::Connection("memory broker unreachable".into()))
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.ensure_reachable()?;
        self.lock().entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        body: &str,
        options: PublishOptions,
    ) -> Result<(), QueueError> {
        self.ensure_reachable()?;
        let mut queues = self.lock();
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.to_string()))?;
        q.ready.push_back(StoredMessage {
            id: Uuid::new_v4().to_string(),
            body: body.to_string(),
            persistent: options.persistent,
            timestamp: Utc::now(),
            deliveries: 0,
        });
        debug!(queue, persistent = options.persistent, "memory broker accepted message");
        Ok(())
    }

    async fn poll(&self, queue: &str, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        self.ensure_reachable()?;
        let mut queues = self.lock();
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.to_string()))?;

        let mut delivered = Vec::new();
        while delivered.len() < max_messages as usize {
            let Some(mut stored) = q.ready.pop_front() else {
                break;
            };
            stored.deliveries += 1;
            let receipt_handle = format!("{}#{}", stored.id, stored.deliveries);
            delivered.push(QueueMessage {
                id: stored.id.clone(),
                body: stored.body.clone(),
                receipt_handle: receipt_handle.clone(),
                timestamp: stored.timestamp,
                attempt_count: stored.deliveries,
            });
            q.in_flight.insert(receipt_handle, stored);
        }
        Ok(delivered)
    }

    async fn ack(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        self.ensure_reachable()?;
        let mut queues = self.lock();
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.to_string()))?;
        q.in_flight
            .remove(&message.receipt_handle)
            .map(|_| ())
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle {}", message.receipt_handle)))
    }

    async fn nack(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        self.ensure_reachable()?;
        let mut queues = self.lock();
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::NotFound(queue.to_string()))?;
        let stored = q
            .in_flight
            .remove(&message.receipt_handle)
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle {}", message.receipt_handle)))?;
        q.ready.push_back(stored);
        Ok(())
    }

    async fn health(&self, queue: &str) -> Result<QueueHealth, QueueError> {
        self.ensure_reachable()?;
        let count = self.lock().get(queue).map(|q| q.ready.len() as u64);
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: count,
            provider: "memory".to_string(),
        })
    }

    fn provider(&self) -> &'static str {
        "memory"
    }
}

/// Hands out the shared [`MemoryBroker`] while it is reachable.
#[derive(Clone)]
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
}

impl MemoryConnector {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn Broker>, QueueError> {
        self.broker.ensure_reachable()?;
        self.broker.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.broker.clone())
    }
}
