//! WebSocket connection handling for `GET /call`.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use duet_common::protocol::{
    ERROR_MALFORMED, ERROR_NOT_IDENTIFIED, ERROR_RECIPIENT_OFFLINE, ERROR_SENDER_MISMATCH,
    RelayFrame,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::RelayState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> Response {
    ws.max_message_size(state.settings.max_frame_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state))
}

/// Handle a single relay connection.
async fn handle_connection(socket: WebSocket, state: Arc<RelayState>) {
    let (mut sender, mut receiver) = socket.split();
    let session_id = uuid::Uuid::new_v4().to_string();

    // Everything bound for this client goes through one queue: replies from
    // the receive loop and signals routed from other sessions.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<RelayFrame>(state.settings.session_buffer);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode relay frame");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut username: Option<String> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame = match serde_json::from_str::<RelayFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(session = %session_id, error = %e, "Malformed frame");
                reply(&outbound_tx, ERROR_MALFORMED, format!("malformed frame: {e}")).await;
                continue;
            }
        };

        match frame {
            RelayFrame::Identify { username: name } => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    reply(&outbound_tx, ERROR_MALFORMED, "username must not be empty").await;
                    continue;
                }
                // Re-identifying moves the session to the new name.
                if username.is_some() {
                    state.sessions.remove(&session_id).await;
                }
                state
                    .sessions
                    .register(session_id.clone(), name.clone(), outbound_tx.clone())
                    .await;

                let _ = outbound_tx
                    .send(RelayFrame::Ready {
                        session_id: session_id.clone(),
                    })
                    .await;
                tracing::info!(session = %session_id, user = %name, "Relay session identified");
                username = Some(name);
            }

            RelayFrame::Signal(message) => {
                let Some(user) = username.as_deref() else {
                    reply(&outbound_tx, ERROR_NOT_IDENTIFIED, "identify before signaling").await;
                    continue;
                };
                if message.from() != user {
                    tracing::warn!(
                        session = %session_id,
                        user = %user,
                        claimed = %message.from(),
                        "Signal sender does not match session"
                    );
                    reply(
                        &outbound_tx,
                        ERROR_SENDER_MISMATCH,
                        format!("session is identified as {user}"),
                    )
                    .await;
                    continue;
                }

                let to = message.to().to_string();
                let topic = message.topic();
                let call_id = message.call_id().clone();
                let delivered = state.sessions.deliver(&to, RelayFrame::Signal(message)).await;

                tracing::debug!(
                    session = %session_id,
                    topic = %topic,
                    call = %call_id,
                    from = %user,
                    to = %to,
                    delivered,
                    "Relayed signal"
                );
                if delivered == 0 {
                    reply(
                        &outbound_tx,
                        ERROR_RECIPIENT_OFFLINE,
                        format!("{to} is not connected"),
                    )
                    .await;
                }
            }

            RelayFrame::Ready { .. } | RelayFrame::Error { .. } => {
                reply(&outbound_tx, ERROR_MALFORMED, "frame is relay-to-client only").await;
            }
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────
    state.sessions.remove(&session_id).await;
    drop(outbound_tx);
    send_task.abort();
    tracing::info!(session = %session_id, user = ?username, "Client disconnected from relay");
}

async fn reply(outbound: &mpsc::Sender<RelayFrame>, code: u16, message: impl Into<String>) {
    let _ = outbound.send(RelayFrame::error(code, message)).await;
}
