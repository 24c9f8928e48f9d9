use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::hub::{FeedEvent, HubHandle};
use super::server::AppState;

// ---------------------------------------------------------------------------
// GET /ws/live — WebSocket upgrade
// ---------------------------------------------------------------------------

/// Client control messages: {"action":"subscribe","agent_id":N} narrows the
/// feed to one agent, {"action":"unsubscribe"} restores the firehose.
#[derive(Deserialize)]
struct ControlMessage {
    action: String,
    agent_id: Option<i64>,
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live(socket, state.hub.clone()))
}

async fn handle_live(mut socket: WebSocket, hub: HubHandle) {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let Some(session_id) = hub.connect(out_tx).await else {
        return; // hub is gone, nothing to serve
    };

    let ack = FeedEvent::Connected {
        session_id: session_id.to_string(),
        timestamp: Utc::now().timestamp(),
    };
    if let Ok(json) = serde_json::to_string(&ack) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            hub.disconnect(session_id);
            return;
        }
    }

    loop {
        tokio::select! {
            event = out_rx.recv() => {
                match event {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(_) => continue,
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break; // Client disconnected
                        }
                    }
                    // Hub evicted this session (e.g. during a broadcast)
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ControlMessage>(&text) {
                            Ok(ctl) if ctl.action == "subscribe" => {
                                if let Some(agent_id) = ctl.agent_id {
                                    hub.subscribe(session_id, agent_id);
                                } else {
                                    tracing::debug!("live: subscribe without agent_id ignored");
                                }
                            }
                            Ok(ctl) if ctl.action == "unsubscribe" => {
                                hub.unsubscribe(session_id);
                            }
                            _ => tracing::debug!("live: ignoring unrecognized client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Binary, Ping, Pong — ignore
                }
            }
        }
    }

    hub.disconnect(session_id);
}
