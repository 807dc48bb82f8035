//! `GET /ws`: pushes job outcomes to connected clients.
//!
//! Each socket gets its own hub receiver. A client that falls behind the
//! push buffer skips the missed events and is told how many it lost; it can
//! recover them through `GET /jobs/{id}`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

#[derive(Serialize)]
struct WsMessage<T: Serialize> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    data: T,
}

fn ws_json<T: Serialize>(msg_type: &'static str, data: T) -> String {
    serde_json::to_string(&WsMessage { msg_type, data }).unwrap_or_default()
}

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.hub.subscribe();
    debug!(subscribers = state.hub.subscriber_count(), "Push subscriber connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            let text = match rx.recv().await {
                Ok(event) => match event.to_push_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(job_id = %event.job_id(), error = %e, "Could not encode push event");
                        continue;
                    }
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Push subscriber lagging, events dropped");
                    ws_json("lagged", serde_json::json!({ "missed": missed }))
                }
                Err(RecvError::Closed) => break,
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Drain pings and close frames; content is ignored.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    // Whichever side ends first takes the other down, releasing the hub
    // receiver with the socket.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!("Push subscriber disconnected");
}
