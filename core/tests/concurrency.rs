mod common;

use common::*;
use mesh_inspect_core::catalog::ToolCandidate;
use mesh_inspect_core::dispatch::{Command, CommandState, RejectCode};
use mesh_inspect_core::executor::ToolOutput;
use mesh_inspect_core::notify::Notification;
use mesh_inspect_core::{CommandDispatcher, CommandId, DispatcherConfig, ServerMessage};
use std::sync::Arc;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn test_sequential_commands_commit_in_order() {
    let h = harness();
    let session = h.dispatcher.open_session(plate()).session_id;
    let texts = [
        "select holes wider than 10mm",
        "select faces facing up named \"top\"",
        "translate by 1 0 0",
        "scale by 2",
        "clear selection",
    ];

    for (base, text) in texts.iter().enumerate() {
        let base = base as u64;
        let outcome = h
            .dispatcher
            .dispatch(request(&format!("c{base}"), session, base, text))
            .await;
        assert!(
            matches!(outcome.message, ServerMessage::Accepted { new_state_version, .. } if new_state_version == base + 1),
            "{text}: {:?}",
            outcome.message
        );
    }

    let state = h.dispatcher.store().get(&session).unwrap();
    assert_eq!(state.version, texts.len() as u64);
    let versions: Vec<u64> = state.history.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_racing_same_base_first_committer_wins() {
    let h = harness();
    let session = h.dispatcher.open_session(plate()).session_id;
    let (finished, release) = h.executor.hold("a");

    let a = tokio::spawn({
        let dispatcher = h.dispatcher.clone();
        async move {
            dispatcher
                .dispatch(request("a", session, 0, "select holes with diameter > 10mm"))
                .await
        }
    });
    // A has finished executing but not committed yet.
    tokio::task::spawn_blocking(move || finished.recv()).await.unwrap().unwrap();

    let b = h
        .dispatcher
        .dispatch(request("b", session, 0, "select holes with diameter > 5mm"))
        .await;
    release.send(()).unwrap();
    let a = a.await.unwrap();

    assert!(matches!(b.message, ServerMessage::Accepted { new_state_version: 1, .. }));
    assert_eq!(
        a.message,
        ServerMessage::Stale {
            command_id: CommandId::new("a"),
            current_state_version: 1,
        }
    );
    assert!(a.passed_through(CommandState::Completed));
    assert_eq!(a.final_state(), CommandState::Stale);

    let state = h.dispatcher.store().get(&session).unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.history.get(0).unwrap().command_id, CommandId::new("b"));
    assert_eq!(state.selections.get("holes").unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_older_base_loses_to_newer_commit_found_at_commit_time() {
    let h = harness_with(|d| {
        d.with_config(DispatcherConfig {
            stale_precheck: false,
            ..Default::default()
        })
    });
    let session = h.dispatcher.open_session(plate()).session_id;
    h.dispatcher
        .dispatch(request("setup", session, 0, "select holes"))
        .await;
    let (finished, release) = h.executor.hold("older");

    let older = tokio::spawn({
        let dispatcher = h.dispatcher.clone();
        async move { dispatcher.dispatch(request("older", session, 0, "scale by 2")).await }
    });
    tokio::task::spawn_blocking(move || finished.recv()).await.unwrap().unwrap();

    let newer = h.dispatcher.dispatch(request("newer", session, 1, "scale by 3")).await;
    release.send(()).unwrap();
    let older = older.await.unwrap();

    assert!(matches!(newer.message, ServerMessage::Accepted { new_state_version: 2, .. }));
    assert!(matches!(older.message, ServerMessage::Stale { current_state_version: 2, .. }));
    let model = h.dispatcher.store().get(&session).unwrap().model.clone();
    assert!((model.bounding_box().size().x - 90.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_from_the_start_never_executes() {
    let h = harness();
    let session = h.dispatcher.open_session(plate()).session_id;
    for base in 0..3 {
        h.dispatcher
            .dispatch(request(&format!("s{base}"), session, base, "select holes"))
            .await;
    }
    let runs = h.executor.calls();

    let outcome = h
        .dispatcher
        .dispatch(request("late", session, 1, "select holes larger than 10 mm"))
        .await;

    assert_eq!(
        outcome.message,
        ServerMessage::Stale {
            command_id: CommandId::new("late"),
            current_state_version: 3,
        }
    );
    assert!(!outcome.passed_through(CommandState::Executing));
    assert_eq!(h.executor.calls(), runs);
    assert_eq!(h.dispatcher.store().version(&session), Ok(3));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queries_leave_version_alone() {
    let h = harness();
    let session = h.dispatcher.open_session(plate()).session_id;
    h.dispatcher.dispatch(request("m", session, 0, "select holes")).await;

    let queries = [
        "model info",
        "measure the surface area",
        "detect holes",
        "check topology",
        "is it watertight",
        "list selections",
        "nearest face to 2 2 1",
        "distance between 0 0 0 and 3 4 0",
    ];
    let handles: Vec<_> = queries
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let dispatcher = h.dispatcher.clone();
            // a stale base does not matter for queries
            let req = request(&format!("q{i}"), session, 0, text);
            tokio::spawn(async move { dispatcher.dispatch(req).await })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(
            matches!(outcome.message, ServerMessage::Accepted { new_state_version: 1, .. }),
            "{:?}",
            outcome.message
        );
        assert_eq!(outcome.final_state(), CommandState::Completed);
    }
    let state = h.dispatcher.store().get(&session).unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.history.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resubmission_is_evaluated_fresh() {
    let h = harness();
    let session = h.dispatcher.open_session(cube()).session_id;

    let first = h.dispatcher.dispatch(request("dup", session, 0, "scale by 2")).await;
    assert!(matches!(first.message, ServerMessage::Accepted { new_state_version: 1, .. }));

    // same payload, old base: stale, not a cached acceptance
    let replay = h.dispatcher.dispatch(request("dup", session, 0, "scale by 2")).await;
    assert!(matches!(replay.message, ServerMessage::Stale { current_state_version: 1, .. }));

    // same payload against the new version: a new, independent commit
    let again = h.dispatcher.dispatch(request("dup", session, 1, "scale by 2")).await;
    assert!(matches!(again.message, ServerMessage::Accepted { new_state_version: 2, .. }));

    let state = h.dispatcher.store().get(&session).unwrap();
    assert_eq!(state.history.len(), 2);
    assert!((state.model.volume() - 64.0).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_arguments_always_rejected() {
    let h = harness();
    let session = h.dispatcher.open_session(plate()).session_id;
    let malformed = [
        ToolCandidate::new("select_holes", json!({ "min_diameter": -4.0 })),
        ToolCandidate::new("scale_model", json!({})),
        ToolCandidate::new("scale_model", json!({ "factor": "big" })),
        ToolCandidate::new("translate_model", json!({ "offset": [1, 2, 3], "speed": 9 })),
        ToolCandidate::new("rm_rf", json!({})),
    ];

    for candidate in &malformed {
        let mut reasons = Vec::new();
        for attempt in 0..3 {
            let command = Command::new(
                CommandId::new(format!("{}-{attempt}", candidate.tool_name)),
                session,
                0,
                candidate.tool_name.clone(),
                candidate.arguments.clone(),
            );
            let outcome = h.dispatcher.dispatch_resolved(command).await;
            let ServerMessage::Rejected { code, reason, .. } = outcome.message else {
                panic!("{candidate:?} was not rejected");
            };
            assert_eq!(code, RejectCode::Validation);
            reasons.push(reason);
        }
        assert!(reasons.windows(2).all(|w| w[0] == w[1]));
    }
    assert_eq!(h.executor.calls(), 0);
    assert_eq!(h.dispatcher.store().version(&session), Ok(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_watertight_query_on_open_model() {
    let h = harness();
    let mut events = h.notifier.subscribe();
    let session = h.dispatcher.open_session(open_cube()).session_id;

    let outcome = h
        .dispatcher
        .dispatch(request("wt", session, 0, "is this model watertight"))
        .await;

    let ServerMessage::Accepted { new_state_version, result, .. } = outcome.message else {
        panic!("expected acceptance");
    };
    assert_eq!(new_state_version, 0);
    let ToolOutput::Verdict { value, selection, .. } = result else {
        panic!("expected verdict");
    };
    assert!(!value);
    let edges = selection.unwrap();
    assert_eq!(edges.len(), 4);
    assert_eq!(h.dispatcher.store().version(&session), Ok(0));

    // only the load was announced; queries publish nothing
    assert!(matches!(events.try_recv(), Ok(Notification::ModelLoaded { .. })));
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multi_turn_reference_to_selected_holes() {
    let h = harness();
    let session = h.dispatcher.open_session(plate()).session_id;

    let select = h
        .dispatcher
        .dispatch(request("sel", session, 0, "select holes smaller than 10mm named \"small\""))
        .await;
    assert!(select.message.is_accepted());

    let fill = h
        .dispatcher
        .dispatch(request("fill", session, 1, "fill the selected holes"))
        .await;
    let ServerMessage::Accepted { result, .. } = fill.message else {
        panic!("expected acceptance: {:?}", fill.message);
    };
    assert!(matches!(result, ToolOutput::ModelChanged { ref operation, .. } if operation == "fill 1 holes"));
    assert_eq!(h.dispatcher.store().get(&session).unwrap().model.holes().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stale_is_broadcast_with_current_version() {
    let h = harness();
    let mut events = h.notifier.subscribe();
    let session = h.dispatcher.open_session(cube()).session_id;
    h.dispatcher.dispatch(request("one", session, 0, "scale by 2")).await;
    h.dispatcher.dispatch(request("two", session, 0, "scale by 3")).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event);
    }
    assert!(matches!(kinds[0], Notification::ModelLoaded { .. }));
    assert!(matches!(kinds[1], Notification::Committed { new_state_version: 1, .. }));
    assert!(matches!(kinds[2], Notification::Stale { current_state_version: 1, .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolver_output_is_still_validated() {
    let h = harness();
    let resolver = Arc::new(FixedResolver(ToolCandidate::new(
        "select_faces",
        json!({ "direction": [0.0, 0.0, 0.0] }),
    )));
    let dispatcher = CommandDispatcher::new(h.dispatcher.store().clone(), resolver, h.notifier.clone())
        .with_executor(h.executor.clone());
    let session = dispatcher.open_session(cube()).session_id;

    let outcome = dispatcher.dispatch(request("x", session, 0, "whatever")).await;

    let ServerMessage::Rejected { code, reason, .. } = outcome.message else {
        panic!("expected rejection");
    };
    assert_eq!(code, RejectCode::Validation);
    assert!(reason.contains("direction"));
    assert_eq!(h.executor.calls(), 0);
}
