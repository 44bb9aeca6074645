use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of geometric element a selection can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Vertex,
    Edge,
    Face,
    /// A closed boundary loop of the mesh.
    Hole,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Vertex => "vertex",
            Self::Edge => "edge",
            Self::Face => "face",
            Self::Hole => "hole",
        };
        f.write_str(s)
    }
}

/// Identifier of one element of a mesh model: its kind plus its index in the
/// model's canonical ordering for that kind (faces in file order, edges and
/// holes sorted by vertex indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId {
    pub kind: ElementKind,
    pub index: u32,
}

impl ElementId {
    pub fn new(kind: ElementKind, index: u32) -> Self {
        Self { kind, index }
    }

    pub fn face(index: u32) -> Self {
        Self::new(ElementKind::Face, index)
    }

    pub fn edge(index: u32) -> Self {
        Self::new(ElementKind::Edge, index)
    }

    pub fn vertex(index: u32) -> Self {
        Self::new(ElementKind::Vertex, index)
    }

    pub fn hole(index: u32) -> Self {
        Self::new(ElementKind::Hole, index)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.index)
    }
}

/// Something that can answer whether an element id still exists.
pub trait ElementLookup {
    fn contains_element(&self, id: &ElementId) -> bool;
}

/// Carries element ids from one model revision to the next.
///
/// Index-based ids are only meaningful for the model that produced them; an
/// edit can renumber holes or edges, so a stored id must be matched against
/// the new revision rather than range-checked.
pub trait ElementRemap {
    /// The id naming the same element in the new revision, if it survived.
    fn remap(&self, id: &ElementId) -> Option<ElementId>;
}
