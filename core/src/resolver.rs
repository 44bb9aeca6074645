//! Intent resolution: natural-language text to a catalog tool candidate.
//!
//! The resolver only produces data. Whatever it returns is validated by the
//! catalog before anything runs.

use crate::catalog::ToolCandidate;
use crate::error::{AmbiguousIntentError, ResolverError};
use crate::ids::StateVersion;
use crate::topo::SelectionSummary;
use crate::units::LengthUnit;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

/// Everything a resolver may look at.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest {
    pub text: String,
    /// Stored selections, for "the selected holes" style references.
    pub selections: Vec<SelectionSummary>,
    pub base_version: StateVersion,
}

impl ResolveRequest {
    pub fn current_selection(&self) -> Option<&SelectionSummary> {
        self.selections.iter().find(|s| s.is_current)
    }
}

#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(&self, request: &ResolveRequest) -> Result<ToolCandidate, ResolverError>;
}

/// Keyword and pattern based resolver for a fixed English command vocabulary.
pub struct RuleBasedResolver {
    number: Regex,
    comparison: Regex,
    between: Regex,
    quoted_name: Regex,
    unit_only: Regex,
    trailing_unit: Regex,
    tool_names: Vec<&'static str>,
}

const NUM: &str = r"-?\d+(?:\.\d+)?";
// Bare "in" is only a unit at the very end of the text; elsewhere it is the
// preposition ("over 5 in the top plate").
const UNIT: &str = r"mm|millimet(?:er|re)s?|cm|centimet(?:er|re)s?|inch(?:es)?|in$|ft|feet|foot|m|met(?:er|re)s?";

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Window {
    min: Option<(f64, LengthUnit)>,
    max: Option<(f64, LengthUnit)>,
}

impl RuleBasedResolver {
    pub fn new(tool_names: impl IntoIterator<Item = &'static str>) -> Result<Self, regex::Error> {
        Ok(Self {
            number: Regex::new(NUM)?,
            comparison: Regex::new(&format!(
                r"(?P<op>>=|<=|>|<|greater than|larger than|wider than|bigger than|more than|over|above|at least|less than|smaller than|narrower than|under|below|at most)\s*(?P<num>{NUM})\s*(?:(?P<unit>{UNIT})\b)?"
            ))?,
            between: Regex::new(&format!(
                r"between\s+(?P<a>{NUM})\s*(?:(?P<ua>{UNIT})\b)?\s*and\s+(?P<b>{NUM})\s*(?:(?P<ub>{UNIT})\b)?"
            ))?,
            quoted_name: Regex::new(r#"(?:named|called|as)\s+["'](?P<name>[^"']+)["']"#)?,
            unit_only: Regex::new(&format!(r"\b(?:in|into)\s+(?P<unit>{UNIT})\b"))?,
            trailing_unit: Regex::new(&format!(r"{NUM}\s*(?P<unit>{UNIT})\b"))?,
            tool_names: tool_names.into_iter().collect(),
        })
    }

    fn ambiguous(&self, text: &str) -> ResolverError {
        AmbiguousIntentError {
            clarification: format!(
                "could not map \"{}\" to a tool; try one of: {}",
                text.trim(),
                self.tool_names.join(", ")
            ),
        }
        .into()
    }

    fn numbers(&self, text: &str) -> Vec<f64> {
        self.number
            .find_iter(text)
            .filter_map(|m| m.as_str().parse().ok())
            .collect()
    }

    /// Last trailing unit mention (e.g. "translate by 1 2 3 cm").
    fn any_unit(&self, text: &str) -> Option<LengthUnit> {
        self.trailing_unit
            .captures_iter(text)
            .filter_map(|c| c.name("unit")?.as_str().parse().ok())
            .last()
    }

    fn report_unit(&self, text: &str) -> Option<LengthUnit> {
        self.unit_only
            .captures(text)
            .and_then(|c| c.name("unit")?.as_str().parse().ok())
    }

    fn window(&self, text: &str) -> Window {
        let mut window = Window::default();
        if let Some(c) = self.between.captures(text) {
            let a: f64 = c["a"].parse().unwrap_or(0.0);
            let b: f64 = c["b"].parse().unwrap_or(0.0);
            let ub = c.name("ub").and_then(|u| u.as_str().parse().ok());
            let ua = c.name("ua").and_then(|u| u.as_str().parse().ok()).or(ub).unwrap_or_default();
            let ub = ub.unwrap_or(ua);
            window.min = Some((a, ua));
            window.max = Some((b, ub));
            return window;
        }
        for c in self.comparison.captures_iter(text) {
            let Ok(value) = c["num"].parse::<f64>() else {
                continue;
            };
            let unit = c
                .name("unit")
                .and_then(|u| u.as_str().parse().ok())
                .unwrap_or_default();
            match &c["op"] {
                ">" | ">=" | "greater than" | "larger than" | "wider than" | "bigger than" | "more than" | "over"
                | "above" | "at least" => window.min = Some((value, unit)),
                _ => window.max = Some((value, unit)),
            }
        }
        window
    }

    fn hole_arguments(&self, text: &str) -> Map<String, Value> {
        let window = self.window(text);
        let mut args = Map::new();
        // one unit for both bounds; mixed units are normalised to mm
        let unit = match (window.min, window.max) {
            (Some((_, a)), Some((_, b))) if a != b => LengthUnit::Millimeter,
            (Some((_, u)), _) | (None, Some((_, u))) => u,
            (None, None) => LengthUnit::Millimeter,
        };
        let convert = |(v, u): (f64, LengthUnit)| if u == unit { v } else { unit.from_mm(u.to_mm(v)) };
        if let Some(min) = window.min {
            args.insert("min_diameter".into(), json!(convert(min)));
        }
        if let Some(max) = window.max {
            args.insert("max_diameter".into(), json!(convert(max)));
        }
        args.insert("unit".into(), json!(unit));
        args
    }

    fn quoted_name(&self, text: &str) -> Option<String> {
        self.quoted_name
            .captures(text)
            .map(|c| c["name"].to_string())
    }

    fn direction(text: &str) -> Option<[f64; 3]> {
        let words = [
            (&["up", "upward", "upwards", "top", "+z"][..], [0.0, 0.0, 1.0]),
            (&["down", "downward", "downwards", "bottom", "-z"][..], [0.0, 0.0, -1.0]),
            (&["front", "-y"][..], [0.0, -1.0, 0.0]),
            (&["back", "rear", "+y"][..], [0.0, 1.0, 0.0]),
            (&["left", "-x"][..], [-1.0, 0.0, 0.0]),
            (&["right", "+x"][..], [1.0, 0.0, 0.0]),
        ];
        let tokens: Vec<&str> = text
            .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
            .filter(|t| !t.is_empty())
            .collect();
        words
            .iter()
            .find(|(names, _)| tokens.iter().any(|t| names.contains(t)))
            .map(|(_, dir)| *dir)
    }

    fn classify(&self, request: &ResolveRequest) -> Result<ToolCandidate, ResolverError> {
        let text = request.text.trim().to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
        let mentions_holes = has(&["hole", "opening"]);
        let refers_to_selection = has(&["selected", "selection", "those", "them"]);

        if has(&["clear", "reset", "deselect", "unselect"]) && (refers_to_selection || has(&["select"])) {
            let mut args = Map::new();
            if let Some(name) = self.quoted_name(&request.text) {
                args.insert("name".into(), json!(name));
            }
            return Ok(ToolCandidate::new("clear_selection", Value::Object(args)));
        }

        if has(&["list selections", "show selections", "what is selected", "which selections"]) {
            return Ok(ToolCandidate::new("list_selections", json!({})));
        }

        if mentions_holes && has(&["fill", "close", "patch", "repair", "cap"]) {
            let mut args = Map::new();
            if refers_to_selection {
                let current = request.current_selection().ok_or_else(|| -> ResolverError {
                    AmbiguousIntentError {
                        clarification: "there is no current selection to refer to; select holes first".into(),
                    }
                    .into()
                })?;
                args.insert("selection".into(), json!(current.name));
            }
            return Ok(ToolCandidate::new("fill_holes", Value::Object(args)));
        }

        if mentions_holes && has(&["select", "pick", "highlight", "mark"]) {
            let mut args = self.hole_arguments(&text);
            if let Some(name) = self.quoted_name(&request.text) {
                args.insert("name".into(), json!(name));
            }
            return Ok(ToolCandidate::new("select_holes", Value::Object(args)));
        }

        if mentions_holes {
            return Ok(ToolCandidate::new("detect_holes", Value::Object(self.hole_arguments(&text))));
        }

        if has(&["face", "surface"]) && has(&["select", "pick", "highlight"]) {
            let Some(direction) = Self::direction(&text) else {
                return Err(AmbiguousIntentError {
                    clarification: "which way should the faces point? e.g. \"select faces facing up\"".into(),
                }
                .into());
            };
            let mut args = Map::new();
            args.insert("direction".into(), json!(direction));
            if let Some(name) = self.quoted_name(&request.text) {
                args.insert("name".into(), json!(name));
            }
            return Ok(ToolCandidate::new("select_faces", Value::Object(args)));
        }

        if has(&["watertight", "water-tight", "water tight", "leak", "closed surface", "is it closed"]) {
            return Ok(ToolCandidate::new("check_watertight", json!({})));
        }

        if has(&["topology", "manifold", "self-intersect", "self intersect", "intersecting"]) {
            return Ok(ToolCandidate::new("check_topology", json!({})));
        }

        let report_unit = self.report_unit(&text).unwrap_or_default();

        if has(&["volume"]) {
            return Ok(ToolCandidate::new("measure_volume", json!({ "unit": report_unit })));
        }

        if has(&["surface area", "area"]) {
            return Ok(ToolCandidate::new("measure_surface_area", json!({ "unit": report_unit })));
        }

        if has(&["bounding box", "bbox", "dimensions", "extent"]) {
            return Ok(ToolCandidate::new("measure_bounding_box", json!({ "unit": report_unit })));
        }

        if has(&["distance"]) {
            let n = self.numbers(&text);
            if n.len() < 6 {
                return Err(AmbiguousIntentError {
                    clarification: "give two points, e.g. \"distance between 0 0 0 and 10 0 0 mm\"".into(),
                }
                .into());
            }
            let unit = self.any_unit(&text).unwrap_or_default();
            return Ok(ToolCandidate::new(
                "measure_distance",
                json!({ "from": [n[0], n[1], n[2]], "to": [n[3], n[4], n[5]], "unit": unit }),
            ));
        }

        if has(&["nearest", "closest"]) {
            let n = self.numbers(&text);
            if n.len() < 3 {
                return Err(AmbiguousIntentError {
                    clarification: "give a point, e.g. \"nearest face to 1 2 3\"".into(),
                }
                .into());
            }
            let unit = self.any_unit(&text).unwrap_or_default();
            return Ok(ToolCandidate::new(
                "nearest_feature",
                json!({ "point": [n[0], n[1], n[2]], "unit": unit }),
            ));
        }

        if has(&["translate", "move", "shift"]) {
            let n = self.numbers(&text);
            let unit = self.any_unit(&text).unwrap_or_default();
            let offset = match n.as_slice() {
                [x, y, z, ..] => [*x, *y, *z],
                [d] if text.contains(" x") => [*d, 0.0, 0.0],
                [d] if text.contains(" y") => [0.0, *d, 0.0],
                [d] if text.contains(" z") => [0.0, 0.0, *d],
                _ => {
                    return Err(AmbiguousIntentError {
                        clarification: "give an offset, e.g. \"translate by 10 0 0 mm\"".into(),
                    }
                    .into())
                }
            };
            return Ok(ToolCandidate::new(
                "translate_model",
                json!({ "offset": offset, "unit": unit }),
            ));
        }

        if has(&["scale", "resize", "enlarge", "shrink"]) {
            let Some(&factor) = self.numbers(&text).first() else {
                return Err(AmbiguousIntentError {
                    clarification: "give a factor, e.g. \"scale by 2\"".into(),
                }
                .into());
            };
            let factor = if text.contains('%') { factor / 100.0 } else { factor };
            return Ok(ToolCandidate::new("scale_model", json!({ "factor": factor })));
        }

        if has(&["info", "information", "statistics", "stats", "how many faces", "how many vertices", "summary"]) {
            return Ok(ToolCandidate::new("model_info", json!({})));
        }

        if has(&["selections"]) {
            return Ok(ToolCandidate::new("list_selections", json!({})));
        }

        Err(self.ambiguous(&request.text))
    }
}

#[async_trait]
impl IntentResolver for RuleBasedResolver {
    async fn resolve(&self, request: &ResolveRequest) -> Result<ToolCandidate, ResolverError> {
        self.classify(request)
    }
}
