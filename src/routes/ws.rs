use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value as JsonValue};

use crate::state::AppState;

async fn alarm_ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Sends the current alarm snapshot on connect, then streams broadcaster
/// messages. Client pings get a pong; a failed send just ends this client's
/// session.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let snapshot = state.alarm.current_snapshot(false, state.clock.now());
    let initial = state.broadcaster.alarm_state_message(&snapshot);
    if send_json(&mut socket, &initial).await.is_err() {
        return;
    }

    let mut rx = state.broadcaster.subscribe();
    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(message) => {
                        if send_json(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    // Lagged receivers skip missed messages instead of
                    // blocking the broadcaster.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "ws client lagged behind broadcasts");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: Option<JsonValue> = serde_json::from_str(&text).ok();
                        let is_ping = parsed
                            .as_ref()
                            .and_then(|value| value.get("type"))
                            .and_then(JsonValue::as_str)
                            == Some("ping");
                        if is_ping && send_json(&mut socket, &json!({"type": "pong"})).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "ws receive error");
                        break;
                    }
                }
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, message: &JsonValue) -> Result<(), axum::Error> {
    socket.send(Message::Text(message.to_string().into())).await
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/alarm", get(alarm_ws_handler))
}
