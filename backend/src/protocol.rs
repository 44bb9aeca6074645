//! Text frames on the `/ws` channel.
//!
//! Every frame is `PREFIX:{json}` or a bare `PREFIX`.
//!
//! Client → server: `COMMAND:{CommandRequest}`, `CATALOG`, `SESSIONS`.
//! Server → client: `ACCEPTED:`, `REJECTED:`, `STALE:` (one per command),
//! `NOTIFY:` (broadcast events), `CATALOG:`, `SESSIONS:`, `ERROR:`.

use mesh_inspect_core::dispatch::{CommandRequest, ServerMessage};
use mesh_inspect_core::notify::Notification;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Command(CommandRequest),
    Catalog,
    Sessions,
}

pub fn parse_client_frame(text: &str) -> Result<ClientFrame, String> {
    let text = text.trim();
    if let Some(body) = text.strip_prefix("COMMAND:") {
        return serde_json::from_str(body)
            .map(ClientFrame::Command)
            .map_err(|e| format!("malformed COMMAND frame: {}", e));
    }
    match text {
        "CATALOG" => Ok(ClientFrame::Catalog),
        "SESSIONS" => Ok(ClientFrame::Sessions),
        _ => {
            let prefix = text.split(':').next().unwrap_or_default();
            Err(format!("unknown frame '{}'", prefix))
        }
    }
}

fn frame(prefix: &str, body: &impl Serialize) -> String {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    format!("{}:{}", prefix, json)
}

pub fn reply_frame(message: &ServerMessage) -> String {
    let prefix = match message {
        ServerMessage::Accepted { .. } => "ACCEPTED",
        ServerMessage::Rejected { .. } => "REJECTED",
        ServerMessage::Stale { .. } => "STALE",
    };
    frame(prefix, message)
}

pub fn notify_frame(notification: &Notification) -> String {
    frame("NOTIFY", notification)
}

pub fn data_frame(prefix: &str, body: &impl Serialize) -> String {
    frame(prefix, body)
}

/// Format an error as a frame for the client
pub fn error_frame(code: &str, message: &str) -> String {
    frame("ERROR", &json!({ "code": code, "message": message }))
}
