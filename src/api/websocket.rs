use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{sink::{Sink, SinkExt}, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::api::rest::ApiState;

/// Pushed to every socket when the emergency stop flips, and once on connect
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopEvent {
    pub is_emergency_stopped: bool,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

pub type StopEvents = broadcast::Sender<StopEvent>;

pub async fn emergency_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.stop_events.subscribe();
    let current = state.current_stop_event();

    // Spawn task to send events to client
    let mut send_task = tokio::spawn(async move {
        if send_event(&mut sender, &current).await.is_err() {
            return;
        }
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Emergency stop socket lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Clients only listen; drain until they close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }
    tracing::debug!("Emergency stop socket closed");
}

async fn send_event<S>(sender: &mut S, event: &StopEvent) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            tracing::error!("Failed to encode stop event: {}", e);
            Ok(())
        }
    }
}
