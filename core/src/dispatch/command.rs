use crate::ids::{CommandId, SessionId, StateVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Client → server: one natural-language command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default = "CommandId::generate")]
    pub command_id: CommandId,
    pub session_id: SessionId,
    pub base_state_version: StateVersion,
    pub text: String,
}

/// A command with its tool already chosen. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub session_id: SessionId,
    pub base_version: StateVersion,
    pub tool_name: String,
    pub arguments: Value,
    pub submitted_at: DateTime<Utc>,
}

impl Command {
    pub fn new(
        id: CommandId,
        session_id: SessionId,
        base_version: StateVersion,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            id,
            session_id,
            base_version,
            tool_name: tool_name.into(),
            arguments,
            submitted_at: Utc::now(),
        }
    }
}

/// Lifecycle of one command.
///
/// `Received → Resolving → Validated | Rejected`, `Validated → Executing`,
/// `Executing → Completed | Failed`, `Completed → Committed | Stale`.
/// Two short cuts exist: a command for an unknown session is rejected on
/// receipt, and a mutation whose base is already behind goes from `Validated`
/// straight to `Stale` without running. Queries bypass the gate, so for them
/// `Completed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Received,
    Resolving,
    Validated,
    Rejected,
    Executing,
    Completed,
    Failed,
    Committed,
    Stale,
}

impl CommandState {
    pub fn can_transition_to(self, next: CommandState) -> bool {
        use CommandState::*;
        matches!(
            (self, next),
            (Received, Resolving)
                | (Received, Rejected)
                | (Resolving, Validated)
                | (Resolving, Rejected)
                | (Validated, Executing)
                | (Validated, Rejected)
                | (Validated, Stale)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Completed, Committed)
                | (Completed, Stale)
                | (Completed, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Stale | Self::Rejected | Self::Failed)
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Resolving => "resolving",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Committed => "committed",
            Self::Stale => "stale",
        };
        f.write_str(name)
    }
}
