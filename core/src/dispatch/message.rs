use super::CommandState;
use crate::executor::ToolOutput;
use crate::ids::{CommandId, StateVersion};
use serde::{Deserialize, Serialize};

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    Validation,
    AmbiguousIntent,
    ExecutionFailed,
    Timeout,
    ModelNotLoaded,
    ResolverUnavailable,
}

/// Server → client reply to one command.
///
/// Every reply that is not an acceptance carries the session's authoritative
/// version when it is known, so a client can always resynchronise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Accepted {
        command_id: CommandId,
        new_state_version: StateVersion,
        result: ToolOutput,
    },
    Rejected {
        command_id: CommandId,
        code: RejectCode,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_state_version: Option<StateVersion>,
        /// Degraded result of a failed tool, when one could be computed.
        #[serde(skip_serializing_if = "Option::is_none")]
        partial: Option<ToolOutput>,
    },
    Stale {
        command_id: CommandId,
        current_state_version: StateVersion,
    },
}

impl ServerMessage {
    pub fn command_id(&self) -> &CommandId {
        match self {
            Self::Accepted { command_id, .. } | Self::Rejected { command_id, .. } | Self::Stale { command_id, .. } => {
                command_id
            }
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Reply plus the states the command went through.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub message: ServerMessage,
    pub states: Vec<CommandState>,
}

impl DispatchOutcome {
    pub fn final_state(&self) -> CommandState {
        self.states.last().copied().unwrap_or(CommandState::Received)
    }

    pub fn passed_through(&self, state: CommandState) -> bool {
        self.states.contains(&state)
    }
}
