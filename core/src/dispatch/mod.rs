//! Command lifecycle: resolve, validate, execute, commit, report.
//!
//! Many commands may be resolved and executed at once. Execution happens on
//! the blocking pool against an immutable snapshot; only mutations reach the
//! `ConcurrencyGate`, and only the gate changes session state. Every command
//! ends in exactly one `ServerMessage`.

mod command;
mod config;
mod message;

pub use command::*;
pub use config::*;
pub use message::*;

use crate::budget::Deadline;
use crate::catalog::{ToolCall, ToolCandidate, ToolCatalog, ToolKind};
use crate::error::{ResolverError, SessionError, ToolExecutionError, ValidationError};
use crate::executor::{Execution, ExecutionContext, GeometryToolExecutor, ToolExecutor};
use crate::gate::{CommitOutcome, ConcurrencyGate, PendingCommit};
use crate::ids::{CommandId, SessionId, StateVersion};
use crate::mesh::MeshModel;
use crate::notify::{Notification, NotificationChannel};
use crate::resolver::{IntentResolver, ResolveRequest};
use crate::session::{SessionInfo, SessionSnapshot, SessionStateStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tracks one command's path through the state machine.
struct Trace {
    command_id: CommandId,
    session_id: SessionId,
    states: Vec<CommandState>,
}

impl Trace {
    fn new(command_id: CommandId, session_id: SessionId) -> Self {
        Self {
            command_id,
            session_id,
            states: vec![CommandState::Received],
        }
    }

    fn current(&self) -> CommandState {
        self.states.last().copied().unwrap_or(CommandState::Received)
    }

    fn advance(&mut self, next: CommandState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal transition {} -> {}",
            self.current(),
            next
        );
        debug!("Command {}: {} -> {}", self.command_id, self.current(), next);
        self.states.push(next);
    }

    fn finish(self, message: ServerMessage) -> DispatchOutcome {
        DispatchOutcome {
            message,
            states: self.states,
        }
    }
}

pub struct CommandDispatcher {
    catalog: Arc<ToolCatalog>,
    store: Arc<SessionStateStore>,
    gate: Arc<ConcurrencyGate>,
    executor: Arc<dyn ToolExecutor>,
    resolver: Arc<dyn IntentResolver>,
    notifier: Arc<dyn NotificationChannel>,
    config: DispatcherConfig,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<SessionStateStore>,
        resolver: Arc<dyn IntentResolver>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            catalog: Arc::new(ToolCatalog::new()),
            gate: Arc::new(ConcurrencyGate::new(store.clone())),
            store,
            executor: Arc::new(GeometryToolExecutor),
            resolver,
            notifier,
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<ToolCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Opens a session for `model` and announces it.
    pub fn open_session(&self, model: MeshModel) -> SessionInfo {
        let info = self.store.load(model).info();
        self.notifier.publish(Notification::ModelLoaded { session: info.clone() });
        info
    }

    pub fn close_session(&self, session_id: &SessionId) -> Result<SessionInfo, SessionError> {
        let last = self.store.unload(session_id)?;
        self.gate.forget(session_id);
        self.notifier.publish(Notification::ModelUnloaded {
            session_id: *session_id,
            final_state_version: last.version,
        });
        Ok(last.info())
    }

    /// Runs a natural-language command to its terminal state.
    pub async fn dispatch(&self, request: CommandRequest) -> DispatchOutcome {
        let submitted_at = chrono::Utc::now();
        let mut trace = Trace::new(request.command_id.clone(), request.session_id);

        let snapshot = match self.store.get(&request.session_id) {
            Ok(snapshot) => snapshot,
            Err(err) => return self.model_not_loaded(trace, err),
        };

        trace.advance(CommandState::Resolving);
        let resolve = ResolveRequest {
            text: request.text.clone(),
            selections: snapshot.selections.summaries(),
            base_version: request.base_state_version,
        };
        let candidate = match self.resolve_with_retry(&resolve).await {
            Ok(candidate) => candidate,
            Err(err) => {
                let (code, reason) = match &err {
                    ResolverError::Ambiguous(ambiguous) => (RejectCode::AmbiguousIntent, ambiguous.clarification.clone()),
                    ResolverError::Timeout => (RejectCode::Timeout, err.to_string()),
                    ResolverError::Unavailable(_) => (RejectCode::ResolverUnavailable, err.to_string()),
                };
                return self.reject(trace, code, reason, Some(snapshot.version));
            }
        };

        let command = Command {
            id: request.command_id,
            session_id: request.session_id,
            base_version: request.base_state_version,
            tool_name: candidate.tool_name,
            arguments: candidate.arguments,
            submitted_at,
        };
        self.run(command, trace).await
    }

    /// Runs a command whose tool and arguments are already known, for
    /// callers that do their own intent resolution.
    pub async fn dispatch_resolved(&self, command: Command) -> DispatchOutcome {
        let mut trace = Trace::new(command.id.clone(), command.session_id);
        if let Err(err) = self.store.get(&command.session_id) {
            return self.model_not_loaded(trace, err);
        }
        trace.advance(CommandState::Resolving);
        self.run(command, trace).await
    }

    async fn resolve_with_retry(&self, request: &ResolveRequest) -> Result<ToolCandidate, ResolverError> {
        let attempts = self.config.resolver_max_attempts.max(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.resolver_timeout(), self.resolver.resolve(request)).await {
                Ok(Err(ResolverError::Timeout)) | Err(_) => {
                    warn!("Intent resolver timed out (attempt {} of {})", attempt, attempts);
                }
                Ok(result) => return result,
            }
        }
        Err(ResolverError::Timeout)
    }

    async fn run(&self, command: Command, mut trace: Trace) -> DispatchOutcome {
        let candidate = ToolCandidate::new(command.tool_name.clone(), command.arguments.clone());
        let invocation = match self.catalog.validate(&candidate) {
            Ok(invocation) => invocation,
            Err(err) => {
                let current = self.store.version(&command.session_id).ok();
                return self.reject(trace, RejectCode::Validation, err.to_string(), current);
            }
        };
        trace.advance(CommandState::Validated);

        // Snapshot taken after validation; execution never sees later commits.
        let snapshot = match self.store.get(&command.session_id) {
            Ok(snapshot) => snapshot,
            Err(err) => return self.model_not_loaded(trace, err),
        };

        if let Some(name) = invocation.call.selection_ref() {
            if snapshot.selections.get(name).is_none() {
                let err = ValidationError::UnknownSelection(name.to_owned());
                return self.reject(trace, RejectCode::Validation, err.to_string(), Some(snapshot.version));
            }
        }

        if invocation.kind == ToolKind::Mutation && self.config.stale_precheck && snapshot.version != command.base_version {
            debug!(
                "Command {} short-circuited: based on {}, session {} at {}",
                command.id, command.base_version, command.session_id, snapshot.version
            );
            return self.stale(trace, snapshot.version);
        }

        trace.advance(CommandState::Executing);
        let execution = match self.execute(&command, invocation.call, snapshot.clone()).await {
            Ok(execution) => execution,
            Err(err) => {
                warn!("Command {} ({}) failed: {}", command.id, command.tool_name, err);
                let code = match &err {
                    ToolExecutionError::TimedOut { .. } => RejectCode::Timeout,
                    ToolExecutionError::ModelNotLoaded(_) => RejectCode::ModelNotLoaded,
                    ToolExecutionError::Failed { .. } => RejectCode::ExecutionFailed,
                };
                let partial = err.partial().cloned();
                trace.advance(CommandState::Failed);
                let message = ServerMessage::Rejected {
                    command_id: command.id.clone(),
                    code,
                    reason: err.to_string(),
                    current_state_version: self.store.version(&command.session_id).ok(),
                    partial,
                };
                self.publish_rejection(&command.session_id, &command.id, code, err.to_string());
                return trace.finish(message);
            }
        };
        trace.advance(CommandState::Completed);

        match execution {
            Execution::Query(result) => trace.finish(ServerMessage::Accepted {
                command_id: command.id,
                new_state_version: snapshot.version,
                result,
            }),
            Execution::Mutation(delta) => {
                let pending = PendingCommit {
                    session_id: command.session_id,
                    command_id: command.id.clone(),
                    tool: command.tool_name.clone(),
                    base_version: command.base_version,
                    submitted_at: command.submitted_at,
                    delta,
                };
                let gate = self.gate.clone();
                match tokio::task::spawn_blocking(move || gate.submit(pending)).await {
                    Ok(outcome) => self.settle(command, outcome, trace),
                    Err(join) => {
                        warn!("Commit of {} aborted: {}", command.id, join);
                        let current = self.store.version(&command.session_id).ok();
                        self.reject(trace, RejectCode::ExecutionFailed, format!("commit aborted: {join}"), current)
                    }
                }
            }
        }
    }

    /// Runs the tool on the blocking pool under the executor budget.
    ///
    /// The budget is enforced twice: the tool polls `ctx.deadline` and frees
    /// its worker thread, and the outer timeout answers the client even if a
    /// tool never polls.
    async fn execute(
        &self,
        command: &Command,
        call: ToolCall,
        snapshot: SessionSnapshot,
    ) -> Result<Execution, ToolExecutionError> {
        let executor = self.executor.clone();
        let budget = self.config.executor_timeout();
        let ctx = ExecutionContext {
            command_id: command.id.clone(),
            base_version: command.base_version,
            deadline: Deadline::after(budget),
        };
        let tool = call.name();
        let handle = tokio::task::spawn_blocking(move || executor.execute(&call, &snapshot, &ctx));
        match tokio::time::timeout(budget, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ToolExecutionError::failed(tool, format!("tool run aborted: {join}"))),
            Err(_) => Err(ToolExecutionError::TimedOut {
                tool: tool.to_owned(),
                budget_ms: self.config.executor_timeout_ms,
            }),
        }
    }

    fn settle(&self, command: Command, outcome: CommitOutcome, mut trace: Trace) -> DispatchOutcome {
        match outcome {
            CommitOutcome::Committed { version, result } => {
                trace.advance(CommandState::Committed);
                self.notifier.publish(Notification::Committed {
                    session_id: command.session_id,
                    command_id: command.id.clone(),
                    tool: command.tool_name,
                    new_state_version: version,
                    result: result.clone(),
                });
                trace.finish(ServerMessage::Accepted {
                    command_id: command.id,
                    new_state_version: version,
                    result,
                })
            }
            CommitOutcome::Stale(stale) => self.stale(trace, stale.current),
            CommitOutcome::SessionClosed(err) => {
                info!("Command {} dropped: {}", command.id, err);
                self.reject(trace, RejectCode::ModelNotLoaded, err.to_string(), None)
            }
        }
    }

    fn stale(&self, mut trace: Trace, current: StateVersion) -> DispatchOutcome {
        trace.advance(CommandState::Stale);
        self.notifier.publish(Notification::Stale {
            session_id: trace.session_id,
            command_id: trace.command_id.clone(),
            current_state_version: current,
        });
        let message = ServerMessage::Stale {
            command_id: trace.command_id.clone(),
            current_state_version: current,
        };
        trace.finish(message)
    }

    fn reject(
        &self,
        mut trace: Trace,
        code: RejectCode,
        reason: String,
        current_state_version: Option<StateVersion>,
    ) -> DispatchOutcome {
        debug!("Command {} rejected ({:?}): {}", trace.command_id, code, reason);
        trace.advance(CommandState::Rejected);
        self.publish_rejection(&trace.session_id, &trace.command_id, code, reason.clone());
        let message = ServerMessage::Rejected {
            command_id: trace.command_id.clone(),
            code,
            reason,
            current_state_version,
            partial: None,
        };
        trace.finish(message)
    }

    fn model_not_loaded(&self, trace: Trace, err: SessionError) -> DispatchOutcome {
        self.reject(trace, RejectCode::ModelNotLoaded, err.to_string(), None)
    }

    fn publish_rejection(&self, session_id: &SessionId, command_id: &CommandId, code: RejectCode, reason: String) {
        self.notifier.publish(Notification::Rejected {
            session_id: *session_id,
            command_id: command_id.clone(),
            code,
            reason,
        });
    }
}

#[cfg(test)]
mod tests_dispatch;
