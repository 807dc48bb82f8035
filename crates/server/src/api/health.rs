use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use intake_queue::{ConsumerStats, QueueHealth};

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub queue: QueueHealth,
    pub subscribers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<ConsumerStats>,
}

/// Liveness plus queue connectivity. Never waits for a reconnect.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let queue = match state.gateway.health(&state.config.queue.ingestion_queue).await {
        Ok(health) => health,
        Err(e) => {
            tracing::warn!(error = %e, "Queue health check failed");
            QueueHealth {
                connected: false,
                approximate_message_count: None,
                provider: "unknown".to_string(),
            }
        }
    };

    Json(HealthResponse {
        status: if queue.connected { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        queue,
        subscribers: state.hub.subscriber_count(),
        relay: state.relay.as_ref().map(|m| m.snapshot()),
    })
}
