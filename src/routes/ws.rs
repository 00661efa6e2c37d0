//! WebSocket handler — pushes viewer snapshots to map clients.
//!
//! DESIGN
//! ======
//! On upgrade the current snapshot is sent, then a `select!` loop forwards
//! every snapshot the viewer publishes. Inbound frames are ignored apart
//! from close. A client that lags behind the broadcast buffer gets one fresh
//! snapshot instead of the dropped ones, since each snapshot is complete.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::viewer::ViewerSnapshot;
use crate::state::AppState;

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    // Subscribe before the first send so nothing published in between is lost.
    let mut events = state.viewer.subscribe_events();

    if send_snapshot(&mut socket, &state.viewer.snapshot()).await.is_err() {
        return;
    }
    info!(%client_id, "ws: map client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
            event = events.recv() => {
                let snapshot = match event {
                    Ok(snapshot) => snapshot,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(%client_id, skipped, "ws: client lagged; resending current snapshot");
                        state.viewer.snapshot()
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_snapshot(&mut socket, &snapshot).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(%client_id, "ws: map client disconnected");
}

async fn send_snapshot(socket: &mut WebSocket, snapshot: &ViewerSnapshot) -> Result<(), ()> {
    let json = match serde_json::to_string(snapshot) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: snapshot serialization failed");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}
