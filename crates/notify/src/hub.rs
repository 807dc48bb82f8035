//! In-process fan-out to currently connected subscribers.

use tokio::sync::broadcast;
use tracing::debug;

use crate::traits::{JobEvent, Notifier, NotifyError};

/// Broadcast hub behind the WebSocket endpoint.
///
/// Only subscribers connected when an event is sent receive it. A subscriber
/// that falls more than `capacity` events behind loses the oldest ones.
#[derive(Clone)]
pub struct SubscriberHub {
    tx: broadcast::Sender<JobEvent>,
}

impl SubscriberHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait::async_trait]
impl Notifier for SubscriberHub {
    async fn send(&self, event: &JobEvent) -> Result<usize, NotifyError> {
        // No subscribers is not an error: the event is simply not seen.
        let delivered = self.tx.send(*event).unwrap_or(0);
        debug!(job_id = %event.job_id(), delivered, "Event broadcast");
        Ok(delivered)
    }

    fn channel_name(&self) -> &str {
        "websocket"
    }
}
