//! Notification-queue consumer feeding the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use intake_queue::{decode_notification, Disposition, MessageHandler, QueueMessage};

use crate::dispatcher::Dispatcher;
use crate::traits::JobEvent;

pub struct NotificationHandler {
    dispatcher: Arc<Dispatcher>,
}

impl NotificationHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl MessageHandler for NotificationHandler {
    async fn handle(&self, message: &QueueMessage) -> Disposition {
        let notice = match decode_notification(message) {
            Ok(notice) => notice,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Unknown notification, dead-lettering");
                return Disposition::DeadLetter;
            }
        };

        self.dispatcher.dispatch(&JobEvent::from(notice)).await;
        Disposition::Ack
    }
}
