use crate::ids::StateVersion;
use crate::mesh::{Hole, MeshModel, ModelFormat, ModelRevision, TopologyReport};
use crate::session::SessionState;
use crate::topo::{FeatureSelection, SelectionSummary};
use crate::units::LengthUnit;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub format: ModelFormat,
    pub vertex_count: usize,
    pub face_count: usize,
    pub edge_count: usize,
    /// `[min_x, min_y, min_z, max_x, max_y, max_z]` in millimetres.
    pub bounding_box: [f64; 6],
    pub is_watertight: bool,
}

impl ModelSummary {
    pub fn of(model: &MeshModel) -> Self {
        Self {
            name: model.name().to_owned(),
            format: model.format(),
            vertex_count: model.vertex_count(),
            face_count: model.face_count(),
            edge_count: model.edge_count(),
            bounding_box: model.bounding_box().to_array(),
            is_watertight: model.is_watertight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoleSummary {
    pub hole: u32,
    pub diameter: f64,
    pub perimeter: f64,
    pub centroid: [f64; 3],
    pub vertex_count: usize,
    pub unit: LengthUnit,
}

impl HoleSummary {
    pub fn of(hole: &Hole, unit: LengthUnit) -> Self {
        let c = hole.centroid.coords.map(|v| unit.from_mm(v));
        Self {
            hole: hole.index,
            diameter: unit.from_mm(hole.diameter),
            perimeter: unit.from_mm(hole.perimeter),
            centroid: [c.x, c.y, c.z],
            vertex_count: hole.vertices.len(),
            unit,
        }
    }
}

/// Result payload of a tool, as reported to the client and kept in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutput {
    /// Boolean analysis; failing elements are attached as a selection.
    Verdict {
        value: bool,
        detail: String,
        selection: Option<FeatureSelection>,
    },
    Measurement {
        quantity: String,
        value: f64,
        unit: String,
    },
    BoundingBox {
        min: [f64; 3],
        max: [f64; 3],
        size: [f64; 3],
        unit: LengthUnit,
    },
    ModelInfo(ModelSummary),
    Topology(TopologyReport),
    Holes {
        holes: Vec<HoleSummary>,
    },
    Nearest {
        face: Option<u32>,
        distance: Option<f64>,
        unit: LengthUnit,
    },
    Selections {
        current: Option<String>,
        selections: Vec<SelectionSummary>,
    },
    Selection(FeatureSelection),
    SelectionCleared {
        removed: Vec<String>,
    },
    ModelChanged {
        operation: String,
        model: ModelSummary,
    },
}

/// State transform produced by a mutation tool, applied only at commit time.
#[derive(Debug, Clone)]
pub enum MutationDelta {
    SetSelection(FeatureSelection),
    /// `None` clears every selection.
    ClearSelection(Option<String>),
    ReplaceModel {
        operation: String,
        model: Arc<MeshModel>,
    },
}

impl MutationDelta {
    /// Builds the next state from `state`. Pure: `state` is not modified.
    /// When the model is replaced, stored selections are carried over to the
    /// new model's ids and elements it no longer has are dropped.
    pub fn apply(&self, state: &SessionState, version: StateVersion) -> (SessionState, ToolOutput) {
        let mut next = state.clone();
        next.version = version;
        let output = match self {
            Self::SetSelection(selection) => {
                let mut selection = selection.clone();
                selection.provenance.version = version;
                next.selections.insert(selection.clone());
                ToolOutput::Selection(selection)
            }
            Self::ClearSelection(Some(name)) => {
                let removed = if next.selections.remove(name) {
                    vec![name.clone()]
                } else {
                    Vec::new()
                };
                ToolOutput::SelectionCleared { removed }
            }
            Self::ClearSelection(None) => {
                let removed = next.selections.iter().map(|s| s.name.clone()).collect();
                next.selections.clear();
                ToolOutput::SelectionCleared { removed }
            }
            Self::ReplaceModel { operation, model } => {
                next.model = model.clone();
                let revision = ModelRevision {
                    previous: state.model.as_ref(),
                    next: model.as_ref(),
                };
                let report = next.selections.carry_over(&revision);
                if !report.lost.is_empty() {
                    debug!("{}: {} selected elements no longer exist", operation, report.lost.len());
                }
                ToolOutput::ModelChanged {
                    operation: operation.clone(),
                    model: ModelSummary::of(model),
                }
            }
        };
        (next, output)
    }
}

/// What a tool run yields: a result to report, or a change to commit.
#[derive(Debug, Clone)]
pub enum Execution {
    Query(ToolOutput),
    Mutation(MutationDelta),
}
