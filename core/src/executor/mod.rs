//! Runs catalog tools against a session snapshot.
//!
//! Tools only read the snapshot they are given. Queries return a
//! `ToolOutput`; mutations return a `MutationDelta` that the gate applies if
//! and when the command is allowed to commit.

mod output;
pub use output::*;

use crate::budget::{Deadline, DeadlineExceeded};
use crate::catalog::{ToolCall, OPEN_EDGE_SELECTION};
use crate::error::ToolExecutionError;
use crate::geometry::Point3;
use crate::ids::{CommandId, StateVersion};
use crate::mesh::topology::check_topology;
use crate::session::SessionState;
use crate::topo::{ElementId, ElementKind, FeatureSelection, Provenance};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub command_id: CommandId,
    pub base_version: StateVersion,
    /// Long-running tools poll this and stop with `TimedOut` once it passes.
    pub deadline: Deadline,
}

/// Seam between the dispatcher and the geometry tools.
pub trait ToolExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        call: &ToolCall,
        snapshot: &SessionState,
        ctx: &ExecutionContext,
    ) -> Result<Execution, ToolExecutionError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryToolExecutor;

impl ToolExecutor for GeometryToolExecutor {
    fn execute(
        &self,
        call: &ToolCall,
        snapshot: &SessionState,
        ctx: &ExecutionContext,
    ) -> Result<Execution, ToolExecutionError> {
        let model = snapshot.model.as_ref();
        let tool = call.name();
        let provenance = || Provenance {
            command_id: ctx.command_id.clone(),
            tool: tool.to_owned(),
            version: ctx.base_version,
        };
        let timed_out = |e: DeadlineExceeded| ToolExecutionError::TimedOut {
            tool: tool.to_owned(),
            budget_ms: e.budget_ms,
        };

        let output = match call {
            ToolCall::ModelInfo => ToolOutput::ModelInfo(ModelSummary::of(model)),

            ToolCall::MeasureVolume(args) => {
                let k = args.unit.from_mm(1.0);
                let volume = ToolOutput::Measurement {
                    quantity: "volume".into(),
                    value: model.volume() * k * k * k,
                    unit: format!("{}^3", args.unit),
                };
                if !model.is_watertight() {
                    return Err(ToolExecutionError::Failed {
                        tool: tool.into(),
                        message: format!(
                            "model is not watertight ({} open edges); volume is an estimate",
                            model.boundary_edges().len()
                        ),
                        partial: Some(Box::new(volume)),
                    });
                }
                volume
            }

            ToolCall::MeasureSurfaceArea(args) => {
                let k = args.unit.from_mm(1.0);
                ToolOutput::Measurement {
                    quantity: "surface_area".into(),
                    value: model.surface_area() * k * k,
                    unit: format!("{}^2", args.unit),
                }
            }

            ToolCall::MeasureDistance(args) => {
                let from = Point3::from(args.from);
                let to = Point3::from(args.to);
                ToolOutput::Measurement {
                    quantity: "distance".into(),
                    value: nalgebra::distance(&from, &to),
                    unit: args.unit.to_string(),
                }
            }

            ToolCall::MeasureBoundingBox(args) => {
                let bbox = model.bounding_box();
                let conv = |v: nalgebra::Vector3<f64>| {
                    let v = v.map(|c| args.unit.from_mm(c));
                    [v.x, v.y, v.z]
                };
                ToolOutput::BoundingBox {
                    min: conv(bbox.min.coords),
                    max: conv(bbox.max.coords),
                    size: conv(bbox.size()),
                    unit: args.unit,
                }
            }

            ToolCall::CheckWatertight => {
                let open = model.boundary_edges();
                if open.is_empty() {
                    ToolOutput::Verdict {
                        value: true,
                        detail: "every edge is shared by two faces".into(),
                        selection: None,
                    }
                } else {
                    let detail = format!("{} open boundary edges", open.len());
                    let selection = FeatureSelection::new(
                        OPEN_EDGE_SELECTION,
                        open.into_iter().map(ElementId::edge),
                        provenance(),
                    );
                    ToolOutput::Verdict {
                        value: false,
                        detail,
                        selection: Some(selection),
                    }
                }
            }

            ToolCall::CheckTopology => {
                let report = check_topology(model, &ctx.deadline).map_err(timed_out)?;
                if !report.is_complete() {
                    return Err(ToolExecutionError::Failed {
                        tool: tool.into(),
                        message: format!(
                            "could not determine manifoldness on {} of {} faces",
                            report.degenerate_faces.len(),
                            report.total_faces
                        ),
                        partial: Some(Box::new(ToolOutput::Topology(report))),
                    });
                }
                ToolOutput::Topology(report)
            }

            ToolCall::DetectHoles(filter) => ToolOutput::Holes {
                holes: model
                    .holes_within(&ctx.deadline)
                    .map_err(timed_out)?
                    .iter()
                    .filter(|h| filter.matches(h.diameter))
                    .map(|h| HoleSummary::of(h, filter.unit))
                    .collect(),
            },

            ToolCall::NearestFeature(args) => {
                let found = model.spatial_index().nearest_face(&args.point_mm());
                let limit = args.max_distance.map(|d| args.unit.to_mm(d));
                let found = found.filter(|(_, dist)| limit.map_or(true, |l| *dist <= l));
                ToolOutput::Nearest {
                    face: found.map(|(face, _)| face as u32),
                    distance: found.map(|(_, dist)| args.unit.from_mm(dist)),
                    unit: args.unit,
                }
            }

            ToolCall::ListSelections => ToolOutput::Selections {
                current: snapshot.selections.current_name().map(str::to_owned),
                selections: snapshot.selections.summaries(),
            },

            ToolCall::SelectHoles(args) => {
                let filter = args.filter();
                let holes = model
                    .holes_within(&ctx.deadline)
                    .map_err(timed_out)?
                    .iter()
                    .filter(|h| filter.matches(h.diameter))
                    .map(|h| ElementId::hole(h.index));
                let selection = FeatureSelection::new(args.selection_name(), holes, provenance());
                return Ok(Execution::Mutation(MutationDelta::SetSelection(selection)));
            }

            ToolCall::SelectFaces(args) => {
                let faces = model
                    .faces_facing(&args.direction(), args.tolerance_deg)
                    .into_iter()
                    .map(ElementId::face);
                let selection = FeatureSelection::new(args.selection_name(), faces, provenance());
                return Ok(Execution::Mutation(MutationDelta::SetSelection(selection)));
            }

            ToolCall::ClearSelection(args) => {
                return Ok(Execution::Mutation(MutationDelta::ClearSelection(args.name.clone())));
            }

            ToolCall::TranslateModel(args) => {
                let offset = args.offset_mm();
                return Ok(Execution::Mutation(MutationDelta::ReplaceModel {
                    operation: format!(
                        "translate by ({}, {}, {}) {}",
                        args.offset[0], args.offset[1], args.offset[2], args.unit
                    ),
                    model: Arc::new(model.translated(&offset)),
                }));
            }

            ToolCall::ScaleModel(args) => {
                return Ok(Execution::Mutation(MutationDelta::ReplaceModel {
                    operation: format!("scale by {}", args.factor),
                    model: Arc::new(model.scaled(args.factor)),
                }));
            }

            ToolCall::FillHoles(args) => {
                let holes = model.holes_within(&ctx.deadline).map_err(timed_out)?;
                let targets: Vec<u32> = match &args.selection {
                    Some(name) => snapshot
                        .selections
                        .get(name)
                        .ok_or_else(|| ToolExecutionError::failed(tool, format!("no selection named '{name}'")))?
                        .indices_of(ElementKind::Hole),
                    None => holes.iter().map(|h| h.index).collect(),
                };
                if targets.is_empty() {
                    return Err(ToolExecutionError::failed(tool, "no holes to fill"));
                }
                let (filled_model, filled) = model.with_holes_filled(&targets);
                return Ok(Execution::Mutation(MutationDelta::ReplaceModel {
                    operation: format!("fill {filled} holes"),
                    model: Arc::new(filled_model),
                }));
            }
        };

        Ok(Execution::Query(output))
    }
}

#[cfg(test)]
mod tests_executor;
