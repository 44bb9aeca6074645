//! Argument shapes for catalog tools.
//!
//! Every struct rejects unknown fields, so a resolver cannot smuggle extra
//! parameters past validation. Bounds that the type system cannot express are
//! checked by `Validate`.

use crate::error::ValidationError;
use crate::geometry::{Point3, Vector3};
use crate::units::LengthUnit;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOLE_SELECTION: &str = "holes";
pub const DEFAULT_FACE_SELECTION: &str = "faces";
pub const OPEN_EDGE_SELECTION: &str = "open_edges";
const MAX_NAME_LEN: usize = 64;

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

fn out_of_range(argument: &str, constraint: &str) -> ValidationError {
    ValidationError::OutOfRange {
        argument: argument.to_owned(),
        constraint: constraint.to_owned(),
    }
}

fn positive(argument: &str, value: Option<f64>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !(v.is_finite() && v > 0.0) => Err(out_of_range(argument, "must be a positive number")),
        _ => Ok(()),
    }
}

fn finite3(argument: &str, value: &[f64; 3]) -> Result<(), ValidationError> {
    if value.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(out_of_range(argument, "coordinates must be finite"))
    }
}

fn selection_name(argument: &str, name: Option<&str>) -> Result<(), ValidationError> {
    match name {
        Some(n) if n.trim().is_empty() || n.len() > MAX_NAME_LEN => {
            Err(out_of_range(argument, "must be 1 to 64 characters"))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

impl Validate for NoArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Unit the result is reported in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UnitArgs {
    #[serde(default)]
    pub unit: LengthUnit,
}

impl Validate for UnitArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DistanceArgs {
    pub from: [f64; 3],
    pub to: [f64; 3],
    /// Unit of the coordinates and of the result.
    #[serde(default)]
    pub unit: LengthUnit,
}

impl Validate for DistanceArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        finite3("from", &self.from)?;
        finite3("to", &self.to)
    }
}

/// Diameter window for holes. Both bounds are exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HoleFilter {
    #[schemars(description = "Only holes strictly wider than this (positive)")]
    pub min_diameter: Option<f64>,
    #[schemars(description = "Only holes strictly narrower than this (positive)")]
    pub max_diameter: Option<f64>,
    #[serde(default)]
    pub unit: LengthUnit,
}

impl HoleFilter {
    /// `diameter_mm` is in model units (millimetres).
    pub fn matches(&self, diameter_mm: f64) -> bool {
        let above = self.min_diameter.map_or(true, |min| diameter_mm > self.unit.to_mm(min));
        let below = self.max_diameter.map_or(true, |max| diameter_mm < self.unit.to_mm(max));
        above && below
    }
}

impl Validate for HoleFilter {
    fn validate(&self) -> Result<(), ValidationError> {
        positive("min_diameter", self.min_diameter)?;
        positive("max_diameter", self.max_diameter)?;
        if let (Some(min), Some(max)) = (self.min_diameter, self.max_diameter) {
            if min >= max {
                return Err(out_of_range("min_diameter", "must be smaller than max_diameter"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectHolesArgs {
    #[schemars(description = "Only holes strictly wider than this (positive)")]
    pub min_diameter: Option<f64>,
    #[schemars(description = "Only holes strictly narrower than this (positive)")]
    pub max_diameter: Option<f64>,
    #[serde(default)]
    pub unit: LengthUnit,
    #[schemars(description = "Selection name, defaults to \"holes\"")]
    pub name: Option<String>,
}

impl SelectHolesArgs {
    pub fn filter(&self) -> HoleFilter {
        HoleFilter {
            min_diameter: self.min_diameter,
            max_diameter: self.max_diameter,
            unit: self.unit,
        }
    }

    pub fn selection_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_HOLE_SELECTION)
    }
}

impl Validate for SelectHolesArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        self.filter().validate()?;
        selection_name("name", self.name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NearestArgs {
    pub point: [f64; 3],
    #[schemars(description = "Search radius (positive); unbounded when omitted")]
    pub max_distance: Option<f64>,
    #[serde(default)]
    pub unit: LengthUnit,
}

impl NearestArgs {
    pub fn point_mm(&self) -> Point3 {
        let [x, y, z] = self.point.map(|c| self.unit.to_mm(c));
        Point3::new(x, y, z)
    }
}

impl Validate for NearestArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        finite3("point", &self.point)?;
        positive("max_distance", self.max_distance)
    }
}

fn default_tolerance() -> f64 {
    5.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectFacesArgs {
    #[schemars(description = "Direction the faces should point towards (non-zero)")]
    pub direction: [f64; 3],
    #[serde(default = "default_tolerance")]
    #[schemars(description = "Angular tolerance in degrees, in (0, 180]")]
    pub tolerance_deg: f64,
    #[schemars(description = "Selection name, defaults to \"faces\"")]
    pub name: Option<String>,
}

impl SelectFacesArgs {
    pub fn direction(&self) -> Vector3 {
        Vector3::from(self.direction)
    }

    pub fn selection_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_FACE_SELECTION)
    }
}

impl Validate for SelectFacesArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        finite3("direction", &self.direction)?;
        if self.direction().norm_squared() == 0.0 {
            return Err(out_of_range("direction", "must be non-zero"));
        }
        if !(self.tolerance_deg > 0.0 && self.tolerance_deg <= 180.0) {
            return Err(out_of_range("tolerance_deg", "must be in (0, 180]"));
        }
        selection_name("name", self.name.as_deref())
    }
}

/// Clears one named selection, or all of them when `name` is omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClearSelectionArgs {
    pub name: Option<String>,
}

impl Validate for ClearSelectionArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        selection_name("name", self.name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TranslateArgs {
    pub offset: [f64; 3],
    #[serde(default)]
    pub unit: LengthUnit,
}

impl TranslateArgs {
    pub fn offset_mm(&self) -> Vector3 {
        Vector3::from(self.offset.map(|c| self.unit.to_mm(c)))
    }
}

impl Validate for TranslateArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        finite3("offset", &self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScaleArgs {
    #[schemars(description = "Uniform scale factor about the origin (positive)")]
    pub factor: f64,
}

impl Validate for ScaleArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        positive("factor", Some(self.factor))
    }
}

/// Fills every hole, or only the holes in the named selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FillHolesArgs {
    pub selection: Option<String>,
}

impl Validate for FillHolesArgs {
    fn validate(&self) -> Result<(), ValidationError> {
        selection_name("selection", self.selection.as_deref())
    }
}
