//! WebSocket Handler for User Event Streams
//!
//! The live-connection surface of the event bus. The collaborating HTTP
//! router mounts this handler (authentication happens there); each socket
//! carries exactly one user's events. Closing the socket ends only this
//! subscription - in-flight worker passes are unaffected.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use super::bus::EventBus;

/// WebSocket upgrade handler for one user's events
///
/// Route: /ws/users/:user_id/events
pub async fn ws_user_events(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(bus): State<Arc<EventBus>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, bus))
}

/// Forward the user's events until either side closes
async fn handle_socket(socket: WebSocket, user_id: String, bus: Arc<EventBus>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = bus.subscribe(&user_id);

    let send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(_) => continue,
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Err(_) => break,
                _ => {}
            }
        }
    });

    // Whichever half finishes first tears this subscription down
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    tracing::debug!(target: "paydesk::events", %user_id, "event stream closed");
}
