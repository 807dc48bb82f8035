//! Decode queue message bodies into the typed payloads in `intake_core`.

use intake_core::{IngestionMessage, NotificationMessage};
use tracing::warn;

use crate::broker::QueueMessage;
use crate::error::QueueError;

/// Decode an ingestion envelope. A failure here marks a poison message.
pub fn decode_ingestion(msg: &QueueMessage) -> Result<IngestionMessage, QueueError> {
    IngestionMessage::from_json(&msg.body).map_err(|e| {
        warn!(message_id = %msg.id, error = %e, "Malformed ingestion envelope");
        QueueError::Parse(format!("message {}: {e}", msg.id))
    })
}

/// Decode a notification. Unknown `type` tags are rejected.
pub fn decode_notification(msg: &QueueMessage) -> Result<NotificationMessage, QueueError> {
    NotificationMessage::from_json(&msg.body).map_err(|e| {
        warn!(message_id = %msg.id, error = %e, "Malformed notification");
        QueueError::Parse(format!("message {}: {e}", msg.id))
    })
}
