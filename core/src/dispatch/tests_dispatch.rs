use super::*;
use crate::error::AmbiguousIntentError;
use crate::executor::ToolOutput;
use crate::mesh::fixtures::{cube, open_cube};
use crate::notify::BroadcastNotifier;
use crate::resolver::RuleBasedResolver;
use crate::session::SessionState;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Times out `failures` times, then answers with `candidate`.
struct FlakyResolver {
    failures: usize,
    calls: AtomicUsize,
    candidate: ToolCandidate,
}

#[async_trait]
impl IntentResolver for FlakyResolver {
    async fn resolve(&self, _request: &ResolveRequest) -> Result<ToolCandidate, ResolverError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(self.candidate.clone())
    }
}

struct SlowExecutor(Duration);

impl ToolExecutor for SlowExecutor {
    fn execute(
        &self,
        call: &ToolCall,
        snapshot: &SessionState,
        ctx: &ExecutionContext,
    ) -> Result<Execution, ToolExecutionError> {
        std::thread::sleep(self.0);
        GeometryToolExecutor.execute(call, snapshot, ctx)
    }
}

/// Keeps its worker busy until the deadline passes, polling like the
/// geometry loops do.
struct PollingExecutor {
    released: Arc<AtomicBool>,
}

impl ToolExecutor for PollingExecutor {
    fn execute(
        &self,
        call: &ToolCall,
        _snapshot: &SessionState,
        ctx: &ExecutionContext,
    ) -> Result<Execution, ToolExecutionError> {
        let mut result = Err(ToolExecutionError::failed(call.name(), "deadline never passed"));
        for _ in 0..5_000 {
            if let Err(e) = ctx.deadline.check() {
                result = Err(ToolExecutionError::TimedOut {
                    tool: call.name().to_owned(),
                    budget_ms: e.budget_ms,
                });
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.released.store(true, Ordering::SeqCst);
        result
    }
}

fn rule_based(store: Arc<SessionStateStore>, notifier: Arc<BroadcastNotifier>) -> CommandDispatcher {
    let resolver = Arc::new(RuleBasedResolver::new(ToolCatalog::new().names()).unwrap());
    CommandDispatcher::new(store, resolver, notifier)
}

fn request(session: SessionId, base: StateVersion, text: &str) -> CommandRequest {
    CommandRequest {
        command_id: CommandId::generate(),
        session_id: session,
        base_state_version: base,
        text: text.into(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_query_path_ends_completed() {
    let notifier = Arc::new(BroadcastNotifier::default());
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), notifier);
    let session = dispatcher.open_session(cube(10.0)).session_id;

    let outcome = dispatcher.dispatch(request(session, 0, "measure volume")).await;

    assert_eq!(
        outcome.states,
        vec![
            CommandState::Received,
            CommandState::Resolving,
            CommandState::Validated,
            CommandState::Executing,
            CommandState::Completed,
        ]
    );
    let ServerMessage::Accepted { new_state_version, result, .. } = outcome.message else {
        panic!("expected accepted");
    };
    assert_eq!(new_state_version, 0);
    assert!(matches!(result, ToolOutput::Measurement { value, .. } if (value - 1000.0).abs() < 1e-9));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mutation_commits_and_notifies() {
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut events = notifier.subscribe();
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), notifier.clone());
    let session = dispatcher.open_session(cube(1.0)).session_id;
    assert!(matches!(events.recv().await.unwrap(), Notification::ModelLoaded { .. }));

    let outcome = dispatcher.dispatch(request(session, 0, "scale by 2")).await;

    assert_eq!(outcome.final_state(), CommandState::Committed);
    assert!(matches!(outcome.message, ServerMessage::Accepted { new_state_version: 1, .. }));
    assert!(matches!(
        events.recv().await.unwrap(),
        Notification::Committed { new_state_version: 1, .. }
    ));
    let state = dispatcher.store().get(&session).unwrap();
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history.get(0).unwrap().tool, "scale_model");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ambiguous_text_is_rejected_with_clarification() {
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), Arc::new(BroadcastNotifier::default()));
    let session = dispatcher.open_session(cube(1.0)).session_id;

    let outcome = dispatcher.dispatch(request(session, 0, "make it nicer")).await;

    assert!(!outcome.passed_through(CommandState::Executing));
    let ServerMessage::Rejected { code, reason, current_state_version, .. } = outcome.message else {
        panic!("expected rejection");
    };
    assert_eq!(code, RejectCode::AmbiguousIntent);
    assert!(reason.contains("measure_volume"));
    assert_eq!(current_state_version, Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_session_is_rejected_on_receipt() {
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), Arc::new(BroadcastNotifier::default()));
    let outcome = dispatcher.dispatch(request(SessionId::new(), 0, "measure volume")).await;
    assert_eq!(outcome.states, vec![CommandState::Received, CommandState::Rejected]);
    assert!(matches!(
        outcome.message,
        ServerMessage::Rejected {
            code: RejectCode::ModelNotLoaded,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_selection_reference_is_rejected() {
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), Arc::new(BroadcastNotifier::default()));
    let session = dispatcher.open_session(open_cube(1.0)).session_id;
    let command = Command::new(
        CommandId::new("fill"),
        session,
        0,
        "fill_holes",
        json!({ "selection": "nope" }),
    );

    let outcome = dispatcher.dispatch_resolved(command).await;

    assert_eq!(outcome.final_state(), CommandState::Rejected);
    assert!(outcome.passed_through(CommandState::Validated));
    assert!(!outcome.passed_through(CommandState::Executing));
    let ServerMessage::Rejected { reason, .. } = outcome.message else {
        panic!("expected rejection");
    };
    assert!(reason.contains("nope"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_tool_reports_partial_result() {
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), Arc::new(BroadcastNotifier::default()));
    let session = dispatcher.open_session(open_cube(1.0)).session_id;

    let outcome = dispatcher.dispatch(request(session, 0, "what is the volume")).await;

    assert_eq!(outcome.final_state(), CommandState::Failed);
    let ServerMessage::Rejected { code, partial, .. } = outcome.message else {
        panic!("expected rejection");
    };
    assert_eq!(code, RejectCode::ExecutionFailed);
    assert!(matches!(partial, Some(ToolOutput::Measurement { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolver_timeout_is_retried() {
    let resolver = Arc::new(FlakyResolver {
        failures: 2,
        calls: AtomicUsize::new(0),
        candidate: ToolCandidate::new("model_info", json!({})),
    });
    let config = DispatcherConfig {
        resolver_timeout_ms: 20,
        ..Default::default()
    };
    let dispatcher = CommandDispatcher::new(
        Arc::new(SessionStateStore::new()),
        resolver.clone(),
        Arc::new(BroadcastNotifier::default()),
    )
    .with_config(config);
    let session = dispatcher.open_session(cube(1.0)).session_id;

    let outcome = dispatcher.dispatch(request(session, 0, "anything")).await;

    assert!(outcome.message.is_accepted());
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolver_gives_up_after_max_attempts() {
    let resolver = Arc::new(FlakyResolver {
        failures: 10,
        calls: AtomicUsize::new(0),
        candidate: ToolCandidate::new("model_info", json!({})),
    });
    let config = DispatcherConfig {
        resolver_timeout_ms: 10,
        resolver_max_attempts: 2,
        ..Default::default()
    };
    let dispatcher = CommandDispatcher::new(
        Arc::new(SessionStateStore::new()),
        resolver.clone(),
        Arc::new(BroadcastNotifier::default()),
    )
    .with_config(config);
    let session = dispatcher.open_session(cube(1.0)).session_id;

    let outcome = dispatcher.dispatch(request(session, 0, "anything")).await;

    assert!(matches!(
        outcome.message,
        ServerMessage::Rejected {
            code: RejectCode::Timeout,
            ..
        }
    ));
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_executor_budget_exceeded() {
    let config = DispatcherConfig {
        executor_timeout_ms: 20,
        ..Default::default()
    };
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), Arc::new(BroadcastNotifier::default()))
        .with_executor(Arc::new(SlowExecutor(Duration::from_millis(300))))
        .with_config(config);
    let session = dispatcher.open_session(cube(1.0)).session_id;

    let outcome = dispatcher.dispatch(request(session, 0, "scale by 3")).await;

    assert_eq!(outcome.final_state(), CommandState::Failed);
    assert!(matches!(
        outcome.message,
        ServerMessage::Rejected {
            code: RejectCode::Timeout,
            current_state_version: Some(0),
            ..
        }
    ));
    assert_eq!(dispatcher.store().version(&session), Ok(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timed_out_tool_releases_its_worker() {
    let released = Arc::new(AtomicBool::new(false));
    let config = DispatcherConfig {
        executor_timeout_ms: 30,
        ..Default::default()
    };
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), Arc::new(BroadcastNotifier::default()))
        .with_executor(Arc::new(PollingExecutor {
            released: released.clone(),
        }))
        .with_config(config);
    let session = dispatcher.open_session(cube(1.0)).session_id;

    let outcome = dispatcher.dispatch(request(session, 0, "check topology")).await;

    assert!(matches!(
        outcome.message,
        ServerMessage::Rejected {
            code: RejectCode::Timeout,
            ..
        }
    ));
    for _ in 0..100 {
        if released.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_session_rejects_later_commands() {
    let dispatcher = rule_based(Arc::new(SessionStateStore::new()), Arc::new(BroadcastNotifier::default()));
    let session = dispatcher.open_session(cube(1.0)).session_id;
    let info = dispatcher.close_session(&session).unwrap();
    assert_eq!(info.version, 0);
    assert!(dispatcher.close_session(&session).is_err());

    let outcome = dispatcher.dispatch(request(session, 0, "model info")).await;
    assert!(!outcome.message.is_accepted());
}

#[test]
fn test_rejection_message_shape() {
    let message = ServerMessage::Rejected {
        command_id: CommandId::new("c1"),
        code: RejectCode::AmbiguousIntent,
        reason: AmbiguousIntentError {
            clarification: "which holes?".into(),
        }
        .to_string(),
        current_state_version: Some(3),
        partial: None,
    };
    let json = serde_json::to_value(&message).unwrap();
    assert_eq!(json["type"], "rejected");
    assert_eq!(json["code"], "ambiguous_intent");
    assert_eq!(json["current_state_version"], 3);
    assert!(json.get("partial").is_none());
}
