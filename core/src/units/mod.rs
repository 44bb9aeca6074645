use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length units accepted in tool arguments. Model coordinates are millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum LengthUnit {
    #[default]
    #[serde(rename = "mm")]
    Millimeter,
    #[serde(rename = "cm")]
    Centimeter,
    #[serde(rename = "m")]
    Meter,
    #[serde(rename = "in")]
    Inch,
    #[serde(rename = "ft")]
    Foot,
}

impl LengthUnit {
    pub fn to_mm(&self, value: f64) -> f64 {
        match self {
            Self::Millimeter => value,
            Self::Centimeter => value * 10.0,
            Self::Meter => value * 1000.0,
            Self::Inch => value * 25.4,
            Self::Foot => value * 304.8,
        }
    }

    pub fn from_mm(&self, mm: f64) -> f64 {
        match self {
            Self::Millimeter => mm,
            Self::Centimeter => mm / 10.0,
            Self::Meter => mm / 1000.0,
            Self::Inch => mm / 25.4,
            Self::Foot => mm / 304.8,
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millimeter => write!(f, "mm"),
            Self::Centimeter => write!(f, "cm"),
            Self::Meter => write!(f, "m"),
            Self::Inch => write!(f, "in"),
            Self::Foot => write!(f, "ft"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown length unit '{0}'")]
pub struct UnknownUnit(pub String);

impl FromStr for LengthUnit {
    type Err = UnknownUnit;

    /// Accepts the short symbol and the common spelled-out forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => Ok(Self::Millimeter),
            "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => Ok(Self::Centimeter),
            "m" | "meter" | "meters" | "metre" | "metres" => Ok(Self::Meter),
            "in" | "inch" | "inches" | "\"" => Ok(Self::Inch),
            "ft" | "foot" | "feet" | "'" => Ok(Self::Foot),
            other => Err(UnknownUnit(other.to_owned())),
        }
    }
}
