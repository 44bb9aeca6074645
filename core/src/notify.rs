//! Outbound events for connected clients.

use crate::dispatch::RejectCode;
use crate::executor::ToolOutput;
use crate::ids::{CommandId, SessionId, StateVersion};
use crate::session::SessionInfo;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Committed {
        session_id: SessionId,
        command_id: CommandId,
        tool: String,
        new_state_version: StateVersion,
        result: ToolOutput,
    },
    /// Clients holding an optimistic preview of this command must drop it and
    /// resynchronise to `current_state_version`.
    Stale {
        session_id: SessionId,
        command_id: CommandId,
        current_state_version: StateVersion,
    },
    Rejected {
        session_id: SessionId,
        command_id: CommandId,
        code: RejectCode,
        reason: String,
    },
    ModelLoaded {
        session: SessionInfo,
    },
    ModelUnloaded {
        session_id: SessionId,
        final_state_version: StateVersion,
    },
}

impl Notification {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Committed { session_id, .. }
            | Self::Stale { session_id, .. }
            | Self::Rejected { session_id, .. }
            | Self::ModelUnloaded { session_id, .. } => *session_id,
            Self::ModelLoaded { session } => session.session_id,
        }
    }
}

pub trait NotificationChannel: Send + Sync {
    /// Fire and forget. Delivery problems never fail the command.
    fn publish(&self, notification: Notification);
}

/// Fans notifications out to every subscriber over a tokio broadcast channel.
/// Slow subscribers lag and lose the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationChannel for BroadcastNotifier {
    fn publish(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("Notification dropped, no subscribers");
        }
    }
}
