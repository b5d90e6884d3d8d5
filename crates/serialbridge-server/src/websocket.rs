use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serialbridge_core::broadcast::Event;
use serialbridge_core::dispatch::Dispatcher;
use tracing::{debug, info, warn};

/// Router state: every socket talks to the same session
#[derive(Clone)]
pub struct BridgeState {
    dispatcher: Dispatcher,
}

impl BridgeState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Serialize an event into a websocket text frame
pub fn encode_event(event: &Event) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<BridgeState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one observer connection
async fn handle_socket(socket: WebSocket, state: BridgeState) {
    let session = state.dispatcher.session().clone();
    let broadcaster = session.broadcaster().clone();
    let (mut sender, mut receiver) = socket.split();

    // Bounded channel for everything headed to this observer: broadcasts and replies
    let (tx, mut rx) = broadcaster.channel();

    // New observers get the port list before anything else
    match session.ports().await {
        Ok(ports) => {
            let _ = tx.try_send(Event::Ports { data: ports });
        }
        Err(e) => warn!("port scan for new observer failed: {e}"),
    }

    let observer_id = broadcaster.add(Box::new(tx.clone()));
    info!(observer = %observer_id, observers = broadcaster.len(), "observer connected");

    let forward = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match encode_event(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to encode event: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        debug!(observer = %observer_id, "forward task ended");
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => state.dispatcher.handle_text(&text, &tx).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => debug!(observer = %observer_id, "ignoring binary frame"),
            Ok(_) => {}
            Err(e) => {
                debug!(observer = %observer_id, "websocket error: {e}");
                break;
            }
        }
    }

    broadcaster.remove(&observer_id);
    drop(tx);
    forward.abort();
    info!(observer = %observer_id, observers = broadcaster.len(), "observer disconnected");
}
