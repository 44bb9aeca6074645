use super::*;
use crate::catalog::{ClearSelectionArgs, FillHolesArgs, HoleFilter, NearestArgs, ScaleArgs, SelectHolesArgs, UnitArgs};
use crate::geometry::ApproxEq;
use crate::mesh::fixtures::*;
use crate::mesh::MeshModel;
use crate::session::SessionStateStore;
use crate::units::LengthUnit;

fn snapshot(model: MeshModel) -> Arc<SessionState> {
    SessionStateStore::new().load(model)
}

fn ctx(id: &str, base: StateVersion) -> ExecutionContext {
    ExecutionContext {
        command_id: CommandId::new(id),
        base_version: base,
        deadline: Deadline::never(),
    }
}

fn run(call: ToolCall, state: &SessionState) -> Result<Execution, ToolExecutionError> {
    GeometryToolExecutor.execute(&call, state, &ctx("t", state.version))
}

fn query(call: ToolCall, state: &SessionState) -> ToolOutput {
    match run(call, state) {
        Ok(Execution::Query(output)) => output,
        other => panic!("expected query output, got {other:?}"),
    }
}

fn delta(call: ToolCall, state: &SessionState) -> MutationDelta {
    match run(call, state) {
        Ok(Execution::Mutation(delta)) => delta,
        other => panic!("expected mutation, got {other:?}"),
    }
}

fn sheet() -> MeshModel {
    // 5 mm cells: one single-cell hole (~7.07 mm) and one 2x2 hole (~12.07 mm)
    perforated_sheet(6, 5.0, &[(1, 1), (3, 3), (3, 4), (4, 3), (4, 4)])
}

#[test]
fn test_watertight_open_cube_returns_open_edges() {
    let state = snapshot(open_cube(1.0));
    let ToolOutput::Verdict { value, selection, .. } = query(ToolCall::CheckWatertight, &state) else {
        panic!("expected verdict");
    };
    assert!(!value);
    let selection = selection.unwrap();
    assert_eq!(selection.name, OPEN_EDGE_SELECTION);
    assert_eq!(selection.len(), 4);
    for id in &selection.elements {
        assert_eq!(id.kind, ElementKind::Edge);
        assert!(state.model.edges()[id.index as usize].is_boundary());
    }
}

#[test]
fn test_watertight_closed_cube() {
    let state = snapshot(cube(1.0));
    let ToolOutput::Verdict { value, selection, .. } = query(ToolCall::CheckWatertight, &state) else {
        panic!("expected verdict");
    };
    assert!(value);
    assert!(selection.is_none());
}

#[test]
fn test_volume_in_centimetres() {
    let state = snapshot(cube(10.0));
    let output = query(ToolCall::MeasureVolume(UnitArgs { unit: LengthUnit::Centimeter }), &state);
    let ToolOutput::Measurement { value, unit, .. } = output else {
        panic!("expected measurement");
    };
    assert!(value.approx_eq(&1.0));
    assert_eq!(unit, "cm^3");
}

#[test]
fn test_volume_of_open_model_is_partial() {
    let state = snapshot(open_cube(1.0));
    let err = run(ToolCall::MeasureVolume(UnitArgs::default()), &state).unwrap_err();
    assert!(matches!(err.partial(), Some(ToolOutput::Measurement { .. })));
}

#[test]
fn test_detect_holes_filter() {
    let state = snapshot(sheet());
    let filter = HoleFilter {
        min_diameter: Some(10.0),
        max_diameter: Some(20.0),
        unit: LengthUnit::Millimeter,
    };
    let ToolOutput::Holes { holes } = query(ToolCall::DetectHoles(filter), &state) else {
        panic!("expected holes");
    };
    assert_eq!(holes.len(), 1);
    assert_eq!(holes[0].vertex_count, 8);
}

#[test]
fn test_select_holes_is_a_delta_not_a_change() {
    let state = snapshot(sheet());
    let args = SelectHolesArgs {
        min_diameter: Some(5.0),
        ..Default::default()
    };
    let delta = delta(ToolCall::SelectHoles(args), &state);
    // nothing applied yet
    assert!(state.selections.is_empty());

    let (next, output) = delta.apply(&state, 1);
    assert_eq!(next.version, 1);
    let holes = next.selections.get("holes").unwrap();
    assert_eq!(holes.len(), 3);
    assert_eq!(holes.provenance.version, 1);
    assert_eq!(holes.provenance.tool, "select_holes");
    assert!(matches!(output, ToolOutput::Selection(s) if s.len() == 3));
    assert!(state.selections.is_empty());
}

#[test]
fn test_topology_with_degenerate_faces_is_partial() {
    let mut builder = crate::mesh::MeshBuilder::new();
    let a = builder.add_vertex(Point3::new(0.0, 0.0, 0.0));
    let b = builder.add_vertex(Point3::new(1.0, 0.0, 0.0));
    let c = builder.add_vertex(Point3::new(2.0, 0.0, 0.0));
    builder.add_face([a, b, c]);
    let state = snapshot(builder.build("flat", crate::mesh::ModelFormat::Obj));

    let err = run(ToolCall::CheckTopology, &state).unwrap_err();
    assert!(err.to_string().contains("could not determine manifoldness on 1 of 1 faces"));
    assert!(matches!(err.partial(), Some(ToolOutput::Topology(r)) if r.analysed_faces == 0));
}

#[test]
fn test_nearest_feature_respects_limit() {
    let state = snapshot(cube(1.0));
    let near = NearestArgs {
        point: [0.5, 0.5, 3.0],
        max_distance: None,
        unit: LengthUnit::Millimeter,
    };
    let ToolOutput::Nearest { face, distance, .. } = query(ToolCall::NearestFeature(near.clone()), &state) else {
        panic!("expected nearest");
    };
    assert!(matches!(face, Some(2) | Some(3)));
    assert!(distance.unwrap().approx_eq(&2.0));

    let limited = NearestArgs {
        max_distance: Some(1.0),
        ..near
    };
    let ToolOutput::Nearest { face, .. } = query(ToolCall::NearestFeature(limited), &state) else {
        panic!("expected nearest");
    };
    assert_eq!(face, None);
}

#[test]
fn test_fill_selected_holes() {
    let state = snapshot(sheet());
    let select = delta(
        ToolCall::SelectHoles(SelectHolesArgs {
            max_diameter: Some(10.0),
            ..Default::default()
        }),
        &state,
    );
    let (state, _) = select.apply(&state, 1);
    let fill = delta(
        ToolCall::FillHoles(FillHolesArgs {
            selection: Some("holes".into()),
        }),
        &state,
    );
    let (next, output) = fill.apply(&state, 2);

    assert_eq!(next.model.holes().len(), 2);
    assert!(matches!(output, ToolOutput::ModelChanged { ref operation, .. } if operation == "fill 1 holes"));
    // four boundary edges, four fan triangles
    assert_eq!(next.model.face_count(), state.model.face_count() + 4);
    assert_eq!(state.model.holes().len(), 3);
}

#[test]
fn test_fill_keeps_other_selections_on_the_same_holes() {
    let state = snapshot(sheet());
    let select = |state: &SessionState, name: &str, min: Option<f64>, max: f64| {
        delta(
            ToolCall::SelectHoles(SelectHolesArgs {
                min_diameter: min,
                max_diameter: Some(max),
                name: Some(name.into()),
                ..Default::default()
            }),
            state,
        )
    };
    let (state, _) = select(&state, "small", None, 10.0).apply(&state, 1);
    let (state, _) = select(&state, "big", Some(10.0), 30.0).apply(&state, 2);
    let big_before = state.selections.get("big").unwrap().indices_of(ElementKind::Hole);
    assert_eq!(big_before.len(), 1);
    let big_diameter = state.model.holes()[big_before[0] as usize].diameter;

    let fill = delta(
        ToolCall::FillHoles(FillHolesArgs {
            selection: Some("small".into()),
        }),
        &state,
    );
    let (next, _) = fill.apply(&state, 3);

    assert!(next.selections.get("small").unwrap().is_empty());
    let big_after = next.selections.get("big").unwrap().indices_of(ElementKind::Hole);
    assert_eq!(big_after.len(), 1);
    assert!(next.model.holes()[big_after[0] as usize].diameter.approx_eq(&big_diameter));

    // filling "small" again finds nothing rather than the big hole
    let err = run(
        ToolCall::FillHoles(FillHolesArgs {
            selection: Some("small".into()),
        }),
        &next,
    )
    .unwrap_err();
    assert!(err.to_string().contains("no holes to fill"));
}

#[test]
fn test_long_tools_stop_at_the_deadline() {
    let state = snapshot(sheet());
    let expired = ExecutionContext {
        deadline: Deadline::after(std::time::Duration::ZERO),
        ..ctx("late", 0)
    };
    for call in [
        ToolCall::CheckTopology,
        ToolCall::DetectHoles(HoleFilter::default()),
        ToolCall::FillHoles(FillHolesArgs::default()),
    ] {
        let err = GeometryToolExecutor.execute(&call, &state, &expired).unwrap_err();
        assert!(
            matches!(err, ToolExecutionError::TimedOut { ref tool, budget_ms: 0 } if tool == call.name()),
            "{err}"
        );
    }
    // cheap tools do not poll
    assert!(GeometryToolExecutor.execute(&ToolCall::ModelInfo, &state, &expired).is_ok());
}

#[test]
fn test_fill_without_holes_fails() {
    let state = snapshot(cube(1.0));
    let err = run(ToolCall::FillHoles(FillHolesArgs::default()), &state).unwrap_err();
    assert!(matches!(err, ToolExecutionError::Failed { .. }));
}

#[test]
fn test_scale_replaces_model_on_commit_only() {
    let state = snapshot(cube(1.0));
    let delta = delta(ToolCall::ScaleModel(ScaleArgs { factor: 2.0 }), &state);
    assert!(state.model.volume().approx_eq(&1.0));
    let (next, _) = delta.apply(&state, 1);
    assert!(next.model.volume().approx_eq(&8.0));
}

#[test]
fn test_clear_all_selections() {
    let state = snapshot(sheet());
    let select = delta(ToolCall::SelectHoles(SelectHolesArgs::default()), &state);
    let (state, _) = select.apply(&state, 1);
    let clear = delta(ToolCall::ClearSelection(ClearSelectionArgs::default()), &state);
    let (next, output) = clear.apply(&state, 2);
    assert!(next.selections.is_empty());
    assert_eq!(
        output,
        ToolOutput::SelectionCleared {
            removed: vec!["holes".to_string()]
        }
    );
}

#[test]
fn test_list_selections_reports_current() {
    let state = snapshot(sheet());
    let select = delta(ToolCall::SelectHoles(SelectHolesArgs::default()), &state);
    let (state, _) = select.apply(&state, 1);
    let ToolOutput::Selections { current, selections } = query(ToolCall::ListSelections, &state) else {
        panic!("expected selections");
    };
    assert_eq!(current.as_deref(), Some("holes"));
    assert_eq!(selections[0].count, 3);
}

#[test]
fn test_model_info() {
    let state = snapshot(cube(2.0));
    let ToolOutput::ModelInfo(info) = query(ToolCall::ModelInfo, &state) else {
        panic!("expected info");
    };
    assert_eq!(info.face_count, 12);
    assert_eq!(info.bounding_box, [0.0, 0.0, 0.0, 2.0, 2.0, 2.0]);
    assert!(info.is_watertight);
}
