use crate::protocol::{data_frame, error_frame, notify_frame, parse_client_frame, reply_frame, ClientFrame};
use crate::routes::AppState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use mesh_inspect_core::notify::Notification;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// One client connection.
///
/// Commands are dispatched on their own tasks, so a slow tool never holds up
/// the next command or the notification stream. All outbound frames funnel
/// through one channel into the socket writer.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Client connected");
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let forwarder = forward_notifications(state.notifier.subscribe(), tx.clone());

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        handle_frame(&state, &text, &tx);
    }

    forwarder.abort();
    drop(tx);
    let _ = writer.await;
    info!("Client disconnected");
}

/// Relays broadcast events to one client as `NOTIFY:` frames until the
/// client's outbound channel closes.
fn forward_notifications(
    mut events: broadcast::Receiver<Notification>,
    tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if tx.send(notify_frame(&event)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client lagging, {} notifications skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Answers one inbound text frame. Command replies are sent from their own
/// task once the command settles.
fn handle_frame(state: &Arc<AppState>, text: &str, tx: &mpsc::UnboundedSender<String>) {
    debug!("Received frame: {}", text);
    match parse_client_frame(text) {
        Ok(ClientFrame::Command(request)) => {
            let dispatcher = state.dispatcher.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = dispatcher.dispatch(request).await;
                let _ = tx.send(reply_frame(&outcome.message));
            });
        }
        Ok(ClientFrame::Catalog) => {
            let _ = tx.send(data_frame("CATALOG", &state.dispatcher.catalog().export()));
        }
        Ok(ClientFrame::Sessions) => {
            let _ = tx.send(data_frame("SESSIONS", &state.dispatcher.store().list()));
        }
        Err(reason) => {
            warn!("Bad frame from client: {}", reason);
            let _ = tx.send(error_frame("BAD_FRAME", &reason));
        }
    }
}
