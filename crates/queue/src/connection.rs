//! Connection actor.
//!
//! A single background task owns the broker connection. [`QueueHandle`]s send
//! it commands over an mpsc channel and await the reply on a oneshot. When an
//! operation fails with a transport error the task drops the connection,
//! waits the fixed reconnect interval, reconnects, re-declares every queue it
//! has declared so far, and retries the same operation. Callers therefore
//! never observe a lost connection; they just wait.
//!
//! Commands are executed one at a time. A long poll holds the task for its
//! full wait time, so processes that both publish and consume use one handle
//! per role. Health checks do not queue behind a stalled command: the task
//! publishes its link state on a `watch` channel that handles read directly.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::broker::{Broker, Connector, PublishOptions, QueueHealth, QueueMessage};
use crate::error::QueueError;

type Reply<T> = oneshot::Sender<Result<T, QueueError>>;

/// Longest a health check waits for the task before answering from the
/// link state alone.
const HEALTH_WAIT: Duration = Duration::from_secs(2);

/// Connection state as last observed by the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Nothing attempted yet.
    Idle,
    Up(&'static str),
    Down,
}

fn disconnected(provider: &str) -> QueueHealth {
    QueueHealth {
        connected: false,
        approximate_message_count: None,
        provider: provider.to_string(),
    }
}

enum Command {
    Declare {
        queue: String,
        reply: Reply<()>,
    },
    Publish {
        queue: String,
        body: String,
        options: PublishOptions,
        reply: Reply<()>,
    },
    Poll {
        queue: String,
        max_messages: u32,
        reply: Reply<Vec<QueueMessage>>,
    },
    Ack {
        queue: String,
        message: QueueMessage,
        reply: Reply<()>,
    },
    Nack {
        queue: String,
        message: QueueMessage,
        reply: Reply<()>,
    },
    Health {
        queue: String,
        reply: Reply<QueueHealth>,
    },
}

/// Cloneable client of the connection task.
///
/// The task exits once every handle has been dropped.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Command>,
    link: watch::Receiver<Link>,
}

impl QueueHandle {
    /// Spawn the connection task. No connection is attempted until the first
    /// command arrives.
    pub fn spawn(connector: Arc<dyn Connector>, reconnect_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<Command>(256);
        let (link_tx, link) = watch::channel(Link::Idle);
        let task = ConnectionTask {
            connector,
            reconnect_interval,
            broker: None,
            declared: Vec::new(),
            link: link_tx,
        };
        tokio::spawn(task.run(rx));
        Self { tx, link }
    }

    /// Declare a durable queue. Re-declared automatically after reconnects.
    pub async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        self.request(|reply| Command::Declare {
            queue: queue.to_string(),
            reply,
        })
        .await
    }

    /// Publish one message, waiting through outages until the broker accepts it.
    pub async fn publish(
        &self,
        queue: &str,
        body: impl Into<String>,
        options: PublishOptions,
    ) -> Result<(), QueueError> {
        let body = body.into();
        self.request(|reply| Command::Publish {
            queue: queue.to_string(),
            body,
            options,
            reply,
        })
        .await
    }

    pub async fn poll(&self, queue: &str, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        self.request(|reply| Command::Poll {
            queue: queue.to_string(),
            max_messages,
            reply,
        })
        .await
    }

    pub async fn ack(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        self.request(|reply| Command::Ack {
            queue: queue.to_string(),
            message: message.clone(),
            reply,
        })
        .await
    }

    pub async fn nack(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        self.request(|reply| Command::Nack {
            queue: queue.to_string(),
            message: message.clone(),
            reply,
        })
        .await
    }

    /// Report connectivity without waiting for a reconnect.
    ///
    /// During an outage this answers from the link state at once. Otherwise
    /// it asks the broker, falling back to the link state when the task is
    /// busy for longer than [`HEALTH_WAIT`].
    pub async fn health(&self, queue: &str) -> Result<QueueHealth, QueueError> {
        if *self.link.borrow() == Link::Down {
            return Ok(disconnected("unknown"));
        }

        let request = self.request(|reply| Command::Health {
            queue: queue.to_string(),
            reply,
        });
        match tokio::time::timeout(HEALTH_WAIT, request).await {
            Ok(result) => result,
            Err(_) => Ok(match *self.link.borrow() {
                Link::Up(provider) => QueueHealth {
                    connected: true,
                    approximate_message_count: None,
                    provider: provider.to_string(),
                },
                Link::Idle | Link::Down => disconnected("unknown"),
            }),
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)?
    }
}

struct ConnectionTask {
    connector: Arc<dyn Connector>,
    reconnect_interval: Duration,
    broker: Option<Arc<dyn Broker>>,
    /// Queues to re-declare on every new connection, in declaration order.
    declared: Vec<String>,
    link: watch::Sender<Link>,
}

impl ConnectionTask {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            self.execute(cmd).await;
        }
        debug!("All queue handles dropped, connection task exiting");
    }

    async fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Declare { queue, reply } => {
                let name = queue.clone();
                let result = self
                    .with_retry(move |b| {
                        let queue = queue.clone();
                        Box::pin(async move { b.declare_queue(&queue).await })
                    })
                    .await;
                if result.is_ok() && !self.declared.contains(&name) {
                    self.declared.push(name);
                }
                let _ = reply.send(result);
            }
            Command::Publish {
                queue,
                body,
                options,
                reply,
            } => {
                let result = self
                    .with_retry(move |b| {
                        let queue = queue.clone();
                        let body = body.clone();
                        Box::pin(async move { b.publish(&queue, &body, options).await })
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Poll {
                queue,
                max_messages,
                reply,
            } => {
                let result = self
                    .with_retry(move |b| {
                        let queue = queue.clone();
                        Box::pin(async move { b.poll(&queue, max_messages).await })
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Ack {
                queue,
                message,
                reply,
            } => {
                let result = self
                    .with_retry(move |b| {
                        let queue = queue.clone();
                        let message = message.clone();
                        Box::pin(async move { b.ack(&queue, &message).await })
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Nack {
                queue,
                message,
                reply,
            } => {
                let result = self
                    .with_retry(move |b| {
                        let queue = queue.clone();
                        let message = message.clone();
                        Box::pin(async move { b.nack(&queue, &message).await })
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Health { queue, reply } => {
                let _ = reply.send(Ok(self.health(&queue).await));
            }
        }
    }

    async fn health(&mut self, queue: &str) -> QueueHealth {
        let broker = match &self.broker {
            Some(b) => Some(b.clone()),
            None => self.try_connect().await,
        };
        let Some(broker) = broker else {
            return disconnected("unknown");
        };

        match broker.health(queue).await {
            Ok(health) => health,
            Err(e) => {
                if e.is_transport() {
                    self.drop_connection();
                }
                disconnected(broker.provider())
            }
        }
    }

    /// One connect attempt, including re-declaration of known queues.
    async fn try_connect(&mut self) -> Option<Arc<dyn Broker>> {
        let broker = match self.connector.connect().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, retry_in = ?self.reconnect_interval, "Queue connection failed");
                self.link.send_replace(Link::Down);
                return None;
            }
        };

        for queue in &self.declared {
            if let Err(e) = broker.declare_queue(queue).await {
                warn!(queue = %queue, error = %e, "Re-declaring queue after reconnect failed");
                if e.is_transport() {
                    self.link.send_replace(Link::Down);
                    return None;
                }
            }
        }

        info!(provider = broker.provider(), queues = self.declared.len(), "Queue connection established");
        self.broker = Some(broker.clone());
        self.link.send_replace(Link::Up(broker.provider()));
        Some(broker)
    }

    fn drop_connection(&mut self) {
        self.broker = None;
        self.link.send_replace(Link::Down);
    }

    /// Connect, retrying forever at the fixed interval.
    async fn connected(&mut self) -> Arc<dyn Broker> {
        loop {
            if let Some(broker) = &self.broker {
                return broker.clone();
            }
            if let Some(broker) = self.try_connect().await {
                return broker;
            }
            tokio::time::sleep(self.reconnect_interval).await;
        }
    }

    async fn with_retry<T, F>(&mut self, op: F) -> Result<T, QueueError>
    where
        F: Fn(Arc<dyn Broker>) -> BoxFuture<'static, Result<T, QueueError>>,
    {
        loop {
            let broker = self.connected().await;
            match op(broker).await {
                Err(e) if e.is_transport() => {
                    warn!(error = %e, retry_in = ?self.reconnect_interval, "Queue connection lost, reconnecting");
                    self.drop_connection();
                    tokio::time::sleep(self.reconnect_interval).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBroker, MemoryConnector};
    use tokio::time::Instant;

    fn handle_for(broker: &Arc<MemoryBroker>) -> QueueHandle {
        QueueHandle::spawn(
            Arc::new(MemoryConnector::new(broker.clone())),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn publish_and_poll_through_handle() {
        let broker = MemoryBroker::new();
        let handle = handle_for(&broker);
        handle.declare("jobs").await.unwrap();
        handle.publish("jobs", "{}", PublishOptions::persistent()).await.unwrap();

        let msgs = handle.poll("jobs", 10).await.unwrap();
        assert_eq!(msgs.len(), 1);
        handle.ack("jobs", &msgs[0]).await.unwrap();
        assert_eq!(broker.depth("jobs"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_waits_out_outage_at_fixed_interval() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let handle = handle_for(&broker);

        let toggler = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            toggler.set_reachable(true);
        });

        let start = Instant::now();
        handle.declare("jobs").await.unwrap();
        handle.publish("jobs", "hello", PublishOptions::persistent()).await.unwrap();

        // Attempts at 0s, 5s, 10s fail; the one at 15s succeeds.
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(broker.pending_bodies("jobs"), vec!["hello".to_string()]);
        assert_eq!(broker.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_is_reopened_and_queues_redeclared() {
        let broker = MemoryBroker::new();
        let handle = handle_for(&broker);
        handle.declare("jobs").await.unwrap();
        assert_eq!(broker.connect_count(), 1);

        broker.set_reachable(false);
        let toggler = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            toggler.set_reachable(true);
        });

        handle.publish("jobs", "after-outage", PublishOptions::persistent()).await.unwrap();
        assert_eq!(broker.connect_count(), 2);
        assert_eq!(broker.pending_bodies("jobs"), vec!["after-outage".to_string()]);
    }

    #[tokio::test]
    async fn non_transport_errors_are_returned() {
        let broker = MemoryBroker::new();
        let handle = handle_for(&broker);
        let err = handle
            .publish("never-declared", "x", PublishOptions::persistent())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn dropping_every_handle_ends_the_task() {
        let broker = MemoryBroker::new();
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new(broker));
        let task_alive = Arc::downgrade(&connector);

        let handle = QueueHandle::spawn(connector, Duration::from_secs(5));
        let second = handle.clone();
        drop(handle);
        second.declare("jobs").await.unwrap();
        drop(second);

        tokio::time::timeout(Duration::from_secs(1), async {
            while task_alive.upgrade().is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connection task should exit");
    }

    #[tokio::test(start_paused = true)]
    async fn health_answers_while_publish_waits_out_outage() {
        let broker = MemoryBroker::new();
        let handle = handle_for(&broker);
        handle.declare("jobs").await.unwrap();
        broker.set_reachable(false);

        let publisher = handle.clone();
        let publish = tokio::spawn(async move {
            publisher
                .publish("jobs", "queued", PublishOptions::persistent())
                .await
        });
        // The first attempt has failed and the task is waiting to reconnect.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let health = tokio::time::timeout(Duration::from_millis(100), handle.health("jobs"))
            .await
            .expect("health waited for the outage to end")
            .unwrap();
        assert!(!health.connected);

        broker.set_reachable(true);
        publish.await.unwrap().unwrap();
        assert_eq!(broker.pending_bodies("jobs"), vec!["queued".to_string()]);
        assert!(handle.health("jobs").await.unwrap().connected);
    }

    #[tokio::test]
    async fn health_reports_disconnected_without_blocking() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let handle = handle_for(&broker);

        let health = handle.health("jobs").await.unwrap();
        assert!(!health.connected);
    }
}
