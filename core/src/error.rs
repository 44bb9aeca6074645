//! Error taxonomy for command dispatch.
//!
//! Validation and resolution errors are raised before any tool runs. Execution
//! errors are caught per command. Staleness is an expected outcome of the
//! concurrency model and is reported, never retried.

use crate::executor::ToolOutput;
use crate::ids::{SessionId, StateVersion};
use thiserror::Error;

/// Tool name or arguments do not match the catalog.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("tool '{tool}' is missing required argument '{argument}'")]
    MissingArgument { tool: String, argument: String },

    #[error("tool '{tool}' has an invalid argument: {message}")]
    InvalidArgument { tool: String, message: String },

    #[error("argument '{argument}' is out of range: {constraint}")]
    OutOfRange { argument: String, constraint: String },

    #[error("no selection named '{0}'")]
    UnknownSelection(String),
}

/// The resolver could not ground the text in a catalog tool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("ambiguous command: {clarification}")]
pub struct AmbiguousIntentError {
    pub clarification: String,
}

/// The session moved on between the command's base version and its commit.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("stale state: command based on version {expected}, session is at {current}")]
pub struct StaleStateError {
    pub expected: StateVersion,
    pub current: StateVersion,
}

#[derive(Debug, Error, Clone)]
pub enum ToolExecutionError {
    /// The operation failed. `partial` holds whatever could still be computed.
    #[error("tool '{tool}' failed: {message}")]
    Failed {
        tool: String,
        message: String,
        partial: Option<Box<ToolOutput>>,
    },

    #[error("tool '{tool}' exceeded its {budget_ms} ms budget")]
    TimedOut { tool: String, budget_ms: u64 },

    #[error("no model loaded for session {0}")]
    ModelNotLoaded(SessionId),
}

impl ToolExecutionError {
    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            message: message.into(),
            partial: None,
        }
    }

    pub fn partial(&self) -> Option<&ToolOutput> {
        match self {
            Self::Failed { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }
}

/// Load-time failures. Fatal for the session being created, nothing else.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt model: {0}")]
    CorruptModel(String),
}

pub type LoadResult<T> = Result<T, LoadError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session {0} already exists")]
    AlreadyExists(SessionId),
}

/// Failures reported by an intent resolver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error(transparent)]
    Ambiguous(#[from] AmbiguousIntentError),

    #[error("intent resolver timed out")]
    Timeout,

    #[error("intent resolver unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a compare-and-commit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error(transparent)]
    Stale(#[from] StaleStateError),

    #[error(transparent)]
    Session(#[from] SessionError),
}
