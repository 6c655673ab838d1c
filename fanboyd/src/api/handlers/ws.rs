//! WebSocket handler for live channel updates
//!
//! Every connection registers a listener with the driver and receives the
//! channel table as JSON after each completed poll. Clients may send
//! `{"cmd":"setspeed","speed":"60"}` (or a numeric speed) to set all
//! channels.

use crate::api::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use fanboy_core::api::WsCommand;
use fanboy_core::{Channel, ChannelSelector};
use fanboy_hardware::{FanDriver, ListenerId, Notifier};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upgrade `GET /ws` to a WebSocket session
pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener_id = subscribe_snapshots(&state.driver, tx);
    info!("WebSocket client connected (listener {:?})", listener_id);

    loop {
        tokio::select! {
            Some(json) = rx.recv() => {
                if let Err(e) = socket.send(Message::Text(json)).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Text(text))) => apply_command(&state.driver, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive failed: {}", e);
                        break;
                    }
                }
            }
            _ = state.shutdown.triggered() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.driver.unsubscribe(listener_id);
    info!("WebSocket client disconnected (listener {:?})", listener_id);
}

/// Forward every snapshot to `tx` as JSON
///
/// The listener unsubscribes itself once `tx` has no receiver left, so a
/// connection that vanished without a close frame stops being fed.
fn subscribe_snapshots(driver: &FanDriver, tx: mpsc::UnboundedSender<String>) -> ListenerId {
    let registry: Weak<Notifier> = Arc::downgrade(&driver.notifier());
    let own_id: Arc<OnceLock<ListenerId>> = Arc::new(OnceLock::new());
    let handle = own_id.clone();

    let id = driver.subscribe(move |channels: &[Channel]| {
        let json = match serde_json::to_string(channels) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode snapshot: {}", e);
                return;
            }
        };
        if tx.send(json).is_err() {
            if let (Some(registry), Some(id)) = (registry.upgrade(), handle.get()) {
                debug!("Dropping listener {:?}, connection gone", id);
                registry.unsubscribe(*id);
            }
        }
    });

    let _ = own_id.set(id);
    id
}

fn apply_command(driver: &FanDriver, text: &str) {
    let command: WsCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("Ignoring malformed WebSocket message: {}", e);
            return;
        }
    };

    let Some(speed) = command.set_speed() else {
        debug!("Ignoring WebSocket command '{}'", command.cmd);
        return;
    };

    if let Err(e) = driver.set_speed(ChannelSelector::All, speed as i64) {
        warn!("WebSocket speed request failed: {}", e);
    }
}
