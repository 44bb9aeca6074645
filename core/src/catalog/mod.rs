//! The closed set of tools an intent resolver may call.
//!
//! A resolver produces a `ToolCandidate` (plain data: a name and a JSON
//! argument object). The catalog turns it into a typed `ToolInvocation` or
//! rejects it with a `ValidationError`. Nothing outside the catalog ever runs.

pub mod args;

pub use args::*;

use crate::error::ValidationError;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CATALOG_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Read-only; never changes session state and never goes through the gate.
    Query,
    /// Produces a state transform committed through the gate.
    Mutation,
}

/// Structured resolver output, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCandidate {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCandidate {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// One validated tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    ModelInfo,
    MeasureVolume(UnitArgs),
    MeasureSurfaceArea(UnitArgs),
    MeasureDistance(DistanceArgs),
    MeasureBoundingBox(UnitArgs),
    CheckWatertight,
    CheckTopology,
    DetectHoles(HoleFilter),
    NearestFeature(NearestArgs),
    ListSelections,
    SelectHoles(SelectHolesArgs),
    SelectFaces(SelectFacesArgs),
    ClearSelection(ClearSelectionArgs),
    TranslateModel(TranslateArgs),
    ScaleModel(ScaleArgs),
    FillHoles(FillHolesArgs),
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ModelInfo => "model_info",
            Self::MeasureVolume(_) => "measure_volume",
            Self::MeasureSurfaceArea(_) => "measure_surface_area",
            Self::MeasureDistance(_) => "measure_distance",
            Self::MeasureBoundingBox(_) => "measure_bounding_box",
            Self::CheckWatertight => "check_watertight",
            Self::CheckTopology => "check_topology",
            Self::DetectHoles(_) => "detect_holes",
            Self::NearestFeature(_) => "nearest_feature",
            Self::ListSelections => "list_selections",
            Self::SelectHoles(_) => "select_holes",
            Self::SelectFaces(_) => "select_faces",
            Self::ClearSelection(_) => "clear_selection",
            Self::TranslateModel(_) => "translate_model",
            Self::ScaleModel(_) => "scale_model",
            Self::FillHoles(_) => "fill_holes",
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::SelectHoles(_)
            | Self::SelectFaces(_)
            | Self::ClearSelection(_)
            | Self::TranslateModel(_)
            | Self::ScaleModel(_)
            | Self::FillHoles(_) => ToolKind::Mutation,
            _ => ToolKind::Query,
        }
    }

    /// Name of a stored selection this call reads, if any.
    pub fn selection_ref(&self) -> Option<&str> {
        match self {
            Self::ClearSelection(args) => args.name.as_deref(),
            Self::FillHoles(args) => args.selection.as_deref(),
            _ => None,
        }
    }
}

/// A validated call, ready to run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool_name: &'static str,
    pub kind: ToolKind,
    pub call: ToolCall,
}

impl From<ToolCall> for ToolInvocation {
    fn from(call: ToolCall) -> Self {
        Self {
            tool_name: call.name(),
            kind: call.kind(),
            call,
        }
    }
}

/// Catalog entry as exported to resolvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    pub argument_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogExport {
    pub version: String,
    pub tools: Vec<ToolSpec>,
}

type ParseFn = fn(&str, Value) -> Result<ToolCall, ValidationError>;

struct Entry {
    name: &'static str,
    kind: ToolKind,
    description: &'static str,
    schema: fn() -> Value,
    parse: ParseFn,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default()
}

/// Decodes and bounds-checks one argument object.
fn parse_args<T: DeserializeOwned + Validate>(tool: &str, arguments: Value) -> Result<T, ValidationError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let parsed: T = serde_json::from_value(arguments).map_err(|e| {
        let message = e.to_string();
        match message.strip_prefix("missing field `").and_then(|rest| rest.split('`').next()) {
            Some(argument) => ValidationError::MissingArgument {
                tool: tool.to_owned(),
                argument: argument.to_owned(),
            },
            None => ValidationError::InvalidArgument {
                tool: tool.to_owned(),
                message,
            },
        }
    })?;
    parsed.validate()?;
    Ok(parsed)
}

macro_rules! entry {
    ($name:literal, $kind:ident, $desc:literal, $args:ty, $build:expr) => {
        Entry {
            name: $name,
            kind: ToolKind::$kind,
            description: $desc,
            schema: schema_of::<$args>,
            parse: |tool, value| parse_args::<$args>(tool, value).map($build),
        }
    };
}

/// Registry of every callable tool.
pub struct ToolCatalog {
    entries: Vec<Entry>,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        let entries = vec![
            entry!("model_info", Query, "Vertex, edge and face counts, bounding box and source format.", NoArgs, |_| ToolCall::ModelInfo),
            entry!("measure_volume", Query, "Enclosed volume of a watertight model.", UnitArgs, ToolCall::MeasureVolume),
            entry!("measure_surface_area", Query, "Total surface area.", UnitArgs, ToolCall::MeasureSurfaceArea),
            entry!("measure_distance", Query, "Straight-line distance between two points.", DistanceArgs, ToolCall::MeasureDistance),
            entry!("measure_bounding_box", Query, "Axis-aligned bounding box and its dimensions.", UnitArgs, ToolCall::MeasureBoundingBox),
            entry!("check_watertight", Query, "Whether the surface is closed; open edges are returned as a selection.", NoArgs, |_| ToolCall::CheckWatertight),
            entry!("check_topology", Query, "Manifoldness, watertightness and self-intersection report.", NoArgs, |_| ToolCall::CheckTopology),
            entry!("detect_holes", Query, "Closed boundary loops with estimated diameter.", HoleFilter, ToolCall::DetectHoles),
            entry!("nearest_feature", Query, "Face closest to a point.", NearestArgs, ToolCall::NearestFeature),
            entry!("list_selections", Query, "Named selections stored in the session.", NoArgs, |_| ToolCall::ListSelections),
            entry!("select_holes", Mutation, "Store the holes within a diameter window as a named selection.", SelectHolesArgs, ToolCall::SelectHoles),
            entry!("select_faces", Mutation, "Store the faces pointing along a direction as a named selection.", SelectFacesArgs, ToolCall::SelectFaces),
            entry!("clear_selection", Mutation, "Remove one named selection, or all of them.", ClearSelectionArgs, ToolCall::ClearSelection),
            entry!("translate_model", Mutation, "Move the model by an offset.", TranslateArgs, ToolCall::TranslateModel),
            entry!("scale_model", Mutation, "Scale the model uniformly about the origin.", ScaleArgs, ToolCall::ScaleModel),
            entry!("fill_holes", Mutation, "Close holes with a triangle fan, optionally only the selected ones.", FillHolesArgs, ToolCall::FillHoles),
        ];
        Self { entries }
    }

    pub fn version(&self) -> &'static str {
        CATALOG_VERSION
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.kind)
    }

    /// Checks a candidate against the catalog. Deterministic: the same
    /// candidate always yields the same outcome.
    pub fn validate(&self, candidate: &ToolCandidate) -> Result<ToolInvocation, ValidationError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == candidate.tool_name)
            .ok_or_else(|| ValidationError::UnknownTool(candidate.tool_name.clone()))?;
        let call = (entry.parse)(entry.name, candidate.arguments.clone())?;
        Ok(call.into())
    }

    pub fn spec(&self, name: &str) -> Option<ToolSpec> {
        self.entries.iter().find(|e| e.name == name).map(Self::to_spec)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(Self::to_spec).collect()
    }

    pub fn export(&self) -> CatalogExport {
        CatalogExport {
            version: CATALOG_VERSION.to_owned(),
            tools: self.specs(),
        }
    }

    fn to_spec(entry: &Entry) -> ToolSpec {
        ToolSpec {
            name: entry.name.to_owned(),
            description: entry.description.to_owned(),
            kind: entry.kind,
            argument_schema: (entry.schema)(),
        }
    }
}
