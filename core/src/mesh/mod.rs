//! Triangle mesh model handle.
//!
//! A `MeshModel` is immutable once built. Derived data (edges, the spatial
//! index, boundary loops) lives with the model and is dropped with it, so every
//! snapshot handed to a tool carries an index that matches its geometry.

pub mod edit;
pub mod loader;
pub mod topology;

pub use loader::{MeshLoader, ModelLoader};
pub use topology::{Hole, TopologyReport};

use crate::budget::{Deadline, DeadlineExceeded};
use crate::geometry::{Aabb, Point3, Triangle, TriangleIndex};
use crate::topo::{ElementId, ElementKind, ElementLookup, ElementRemap};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    Stl,
    Obj,
    Ply,
    Step,
}

impl ModelFormat {
    /// Guesses the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        ext.parse().ok()
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stl => "stl",
            Self::Obj => "obj",
            Self::Ply => "ply",
            Self::Step => "step",
        };
        f.write_str(s)
    }
}

impl FromStr for ModelFormat {
    type Err = crate::error::LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stl" => Ok(Self::Stl),
            "obj" => Ok(Self::Obj),
            "ply" => Ok(Self::Ply),
            "step" | "stp" => Ok(Self::Step),
            other => Err(crate::error::LoadError::UnsupportedFormat(other.to_owned())),
        }
    }
}

/// An undirected edge, stored with sorted vertex indices, and the faces using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub vertices: [u32; 2],
    pub faces: Vec<u32>,
}

impl Edge {
    pub fn is_boundary(&self) -> bool {
        self.faces.len() == 1
    }

    /// Shared by other than exactly two faces.
    pub fn is_non_manifold(&self) -> bool {
        self.faces.len() > 2
    }
}

pub struct MeshModel {
    name: String,
    format: ModelFormat,
    vertices: Vec<Point3>,
    faces: Vec<[u32; 3]>,
    edges: Vec<Edge>,
    index: OnceLock<TriangleIndex>,
    holes: OnceLock<Vec<Hole>>,
}

impl fmt::Debug for MeshModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshModel")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("vertices", &self.vertices.len())
            .field("faces", &self.faces.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

impl MeshModel {
    /// Builds a model from triangle soup, welding coincident corners.
    pub fn from_triangles(name: impl Into<String>, triangles: &[[Point3; 3]]) -> Self {
        let mut builder = MeshBuilder::new();
        for tri in triangles {
            builder.add_triangle(tri);
        }
        builder.build(name, ModelFormat::Stl)
    }

    /// Indices must already be in range; callers go through `MeshBuilder`.
    fn from_parts(name: String, format: ModelFormat, vertices: Vec<Point3>, faces: Vec<[u32; 3]>) -> Self {
        let edges = derive_edges(&faces);
        Self {
            name,
            format,
            vertices,
            faces,
            edges,
            index: OnceLock::new(),
            holes: OnceLock::new(),
        }
    }

    /// Same name and format, new geometry.
    pub(crate) fn with_geometry(&self, vertices: Vec<Point3>, faces: Vec<[u32; 3]>) -> Self {
        Self::from_parts(self.name.clone(), self.format, vertices, faces)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> ModelFormat {
        self.format
    }

    pub fn vertices(&self) -> &[Point3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn triangle(&self, face: usize) -> Option<Triangle> {
        let [a, b, c] = *self.faces.get(face)?;
        Some(Triangle::new(
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ))
    }

    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(move |&[a, b, c]| {
            Triangle::new(
                self.vertices[a as usize],
                self.vertices[b as usize],
                self.vertices[c as usize],
            )
        })
    }

    /// Index of the edge joining two vertices, if any.
    pub fn edge_between(&self, a: u32, b: u32) -> Option<usize> {
        let key = if a < b { [a, b] } else { [b, a] };
        self.edges.binary_search_by(|e| e.vertices.cmp(&key)).ok()
    }

    pub fn bounding_box(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter())
    }

    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|t| t.area()).sum()
    }

    /// Enclosed volume by the divergence theorem. Only meaningful for a
    /// watertight model with consistent winding.
    pub fn volume(&self) -> f64 {
        self.triangles().map(|t| t.signed_volume()).sum::<f64>().abs()
    }

    pub fn boundary_edges(&self) -> Vec<u32> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_boundary())
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn non_manifold_edges(&self) -> Vec<u32> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_non_manifold())
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn is_watertight(&self) -> bool {
        !self.edges.iter().any(Edge::is_boundary)
    }

    /// R-tree over the faces, built on first use.
    pub fn spatial_index(&self) -> &TriangleIndex {
        self.index
            .get_or_init(|| TriangleIndex::build(self.triangles().enumerate()))
    }

    /// Closed boundary loops, built on first use.
    pub fn holes(&self) -> &[Hole] {
        self.holes
            .get_or_init(|| topology::find_holes(self, &Deadline::never()).unwrap_or_default())
    }

    /// Like `holes`, but gives up once `deadline` passes. Nothing is cached
    /// on a give-up, so a later call starts over.
    pub fn holes_within(&self, deadline: &Deadline) -> Result<&[Hole], DeadlineExceeded> {
        if let Some(holes) = self.holes.get() {
            return Ok(holes);
        }
        let holes = topology::find_holes(self, deadline)?;
        Ok(self.holes.get_or_init(|| holes))
    }
}

impl ElementLookup for MeshModel {
    fn contains_element(&self, id: &ElementId) -> bool {
        let index = id.index as usize;
        match id.kind {
            ElementKind::Vertex => index < self.vertices.len(),
            ElementKind::Edge => index < self.edges.len(),
            ElementKind::Face => index < self.faces.len(),
            ElementKind::Hole => index < self.holes().len(),
        }
    }
}

/// A model and the revision it was edited from.
///
/// Every edit keeps existing vertex and face ids and only appends, so those
/// carry over unchanged. Edge ids are re-derived and hole ids follow loop
/// discovery order, so both are matched by their vertices instead.
pub struct ModelRevision<'a> {
    pub previous: &'a MeshModel,
    pub next: &'a MeshModel,
}

impl ElementRemap for ModelRevision<'_> {
    fn remap(&self, id: &ElementId) -> Option<ElementId> {
        let mapped = match id.kind {
            ElementKind::Vertex | ElementKind::Face => Some(*id),
            ElementKind::Edge => {
                let [a, b] = self.previous.edges().get(id.index as usize)?.vertices;
                self.next.edge_between(a, b).map(|e| ElementId::edge(e as u32))
            }
            ElementKind::Hole => {
                let key = self.previous.holes().get(id.index as usize)?.vertex_key();
                self.next
                    .holes()
                    .iter()
                    .find(|h| h.vertex_key() == key)
                    .map(|h| ElementId::hole(h.index))
            }
        };
        mapped.filter(|m| self.next.contains_element(m))
    }
}

fn derive_edges(faces: &[[u32; 3]]) -> Vec<Edge> {
    let mut map: BTreeMap<[u32; 2], Vec<u32>> = BTreeMap::new();
    for (fi, face) in faces.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            let key = if a < b { [a, b] } else { [b, a] };
            map.entry(key).or_default().push(fi as u32);
        }
    }
    map.into_iter()
        .map(|(vertices, faces)| Edge { vertices, faces })
        .collect()
}

/// Accumulates vertices and faces, welding vertices with identical coordinates
/// and dropping faces that collapse onto fewer than three distinct vertices.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    vertices: Vec<Point3>,
    faces: Vec<[u32; 3]>,
    lookup: HashMap<[u64; 3], u32>,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, p: Point3) -> u32 {
        // -0.0 and 0.0 must weld
        let key = [(p.x + 0.0).to_bits(), (p.y + 0.0).to_bits(), (p.z + 0.0).to_bits()];
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let id = self.vertices.len() as u32;
        self.vertices.push(p);
        self.lookup.insert(key, id);
        id
    }

    /// Adds a face over vertex ids returned by `add_vertex`. Returns false if
    /// the face was dropped.
    pub fn add_face(&mut self, face: [u32; 3]) -> bool {
        let [a, b, c] = face;
        if a == b || b == c || a == c {
            return false;
        }
        self.faces.push(face);
        true
    }

    pub fn add_triangle(&mut self, corners: &[Point3; 3]) -> bool {
        let ids = corners.map(|p| self.add_vertex(p));
        self.add_face(ids)
    }

    /// Fan-triangulates a convex polygon given as vertex ids.
    pub fn add_polygon(&mut self, polygon: &[u32]) {
        if polygon.len() < 3 {
            return;
        }
        for i in 1..polygon.len() - 1 {
            self.add_face([polygon[0], polygon[i], polygon[i + 1]]);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn build(self, name: impl Into<String>, format: ModelFormat) -> MeshModel {
        MeshModel::from_parts(name.into(), format, self.vertices, self.faces)
    }
}
