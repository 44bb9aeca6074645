use super::MeshModel;
use crate::budget::{Deadline, DeadlineExceeded};
use crate::geometry::Point3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A closed boundary loop of the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hole {
    pub index: u32,
    /// Loop vertices in boundary order (the winding of the adjacent faces).
    pub vertices: Vec<u32>,
    /// Edge ids along the loop, aligned with `vertices`.
    pub edges: Vec<u32>,
    pub centroid: Point3,
    /// Twice the mean distance of the loop vertices from their centroid.
    pub diameter: f64,
    pub perimeter: f64,
}

/// Walks directed boundary edges into closed loops.
///
/// Each face contributes its three directed edges; the ones whose undirected
/// edge has a single face form the boundary. Loops start at the smallest
/// unvisited directed edge, so hole order is stable for a given model.
/// Chains that do not close (non-manifold boundary) are skipped.
pub(crate) fn find_holes(model: &MeshModel, deadline: &Deadline) -> Result<Vec<Hole>, DeadlineExceeded> {
    let mut outgoing: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    for (step, face) in model.faces().iter().enumerate() {
        deadline.check_every(step)?;
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            let boundary = model
                .edge_between(a, b)
                .map(|e| model.edges()[e].is_boundary())
                .unwrap_or(false);
            if boundary {
                outgoing.entry(a).or_default().insert(b);
            }
        }
    }

    let mut holes = Vec::new();
    loop {
        deadline.check()?;
        let Some((&start, next)) = outgoing.iter().find(|(_, targets)| !targets.is_empty()) else {
            break;
        };
        let Some(&first) = next.iter().next() else {
            break;
        };

        let mut loop_vertices = vec![start];
        let mut current = first;
        take_edge(&mut outgoing, start, first);
        let mut closed = current == start;
        while !closed {
            loop_vertices.push(current);
            let Some(&step) = outgoing.get(&current).and_then(|t| t.iter().next()) else {
                break;
            };
            take_edge(&mut outgoing, current, step);
            current = step;
            closed = current == start;
        }

        if closed && loop_vertices.len() >= 3 {
            let index = holes.len() as u32;
            holes.push(describe_loop(model, index, loop_vertices));
        }
    }
    Ok(holes)
}

impl Hole {
    /// Loop vertices in ascending order; identifies the loop independently of
    /// where the walk started or in which order loops were found.
    pub fn vertex_key(&self) -> Vec<u32> {
        let mut key = self.vertices.clone();
        key.sort_unstable();
        key
    }
}

fn take_edge(outgoing: &mut BTreeMap<u32, BTreeSet<u32>>, from: u32, to: u32) {
    if let Some(targets) = outgoing.get_mut(&from) {
        targets.remove(&to);
    }
}

fn describe_loop(model: &MeshModel, index: u32, vertices: Vec<u32>) -> Hole {
    let points: Vec<Point3> = vertices.iter().map(|&v| model.vertices()[v as usize]).collect();
    let n = points.len() as f64;
    let sum = points.iter().fold(Point3::origin().coords, |acc, p| acc + p.coords);
    let centroid = Point3::from(sum / n);
    let mean_radius = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;

    let mut edges = Vec::with_capacity(vertices.len());
    let mut perimeter = 0.0;
    for i in 0..vertices.len() {
        let (a, b) = (vertices[i], vertices[(i + 1) % vertices.len()]);
        if let Some(e) = model.edge_between(a, b) {
            edges.push(e as u32);
        }
        perimeter += (points[(i + 1) % points.len()] - points[i]).norm();
    }

    Hole {
        index,
        vertices,
        edges,
        centroid,
        diameter: 2.0 * mean_radius,
        perimeter,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyReport {
    /// Every edge shared by exactly two faces.
    pub is_manifold: bool,
    pub is_watertight: bool,
    pub has_self_intersections: bool,
    pub boundary_edges: usize,
    pub non_manifold_edges: usize,
    pub self_intersecting_pairs: Vec<(u32, u32)>,
    /// Faces too small to have a normal; excluded from the intersection test.
    pub degenerate_faces: Vec<u32>,
    pub analysed_faces: usize,
    pub total_faces: usize,
    pub issues: Vec<String>,
}

impl TopologyReport {
    pub fn is_complete(&self) -> bool {
        self.degenerate_faces.is_empty()
    }
}

/// Manifoldness, watertightness and self-intersection check.
///
/// Intersection candidates come from the model's R-tree; only pairs whose
/// bounding boxes overlap and that share no vertex are tested exactly.
pub fn check_topology(model: &MeshModel, deadline: &Deadline) -> Result<TopologyReport, DeadlineExceeded> {
    let boundary_edges = model.boundary_edges().len();
    let non_manifold_edges = model.non_manifold_edges().len();

    let degenerate_faces: Vec<u32> = model
        .triangles()
        .enumerate()
        .filter(|(_, t)| t.is_degenerate())
        .map(|(i, _)| i as u32)
        .collect();
    let degenerate: BTreeSet<u32> = degenerate_faces.iter().copied().collect();

    let faces = model.faces();
    let mut self_intersecting_pairs = Vec::new();
    for (step, (i, j)) in model.spatial_index().candidate_pairs(deadline)?.into_iter().enumerate() {
        deadline.check_every(step)?;
        let (fi, fj) = (i as u32, j as u32);
        if degenerate.contains(&fi) || degenerate.contains(&fj) {
            continue;
        }
        if faces[i].iter().any(|v| faces[j].contains(v)) {
            continue;
        }
        let (Some(a), Some(b)) = (model.triangle(i), model.triangle(j)) else {
            continue;
        };
        if a.intersects(&b) {
            self_intersecting_pairs.push((fi, fj));
        }
    }

    let is_manifold = boundary_edges == 0 && non_manifold_edges == 0;
    let is_watertight = boundary_edges == 0;
    let has_self_intersections = !self_intersecting_pairs.is_empty();

    let mut issues = Vec::new();
    if non_manifold_edges > 0 {
        issues.push(format!("{non_manifold_edges} edges are shared by more than two faces"));
    }
    if boundary_edges > 0 {
        issues.push(format!("{boundary_edges} open boundary edges, model is not watertight"));
    }
    if has_self_intersections {
        issues.push(format!(
            "{} pairs of faces intersect each other",
            self_intersecting_pairs.len()
        ));
    }
    if !degenerate_faces.is_empty() {
        issues.push(format!(
            "could not determine manifoldness on {} of {} faces",
            degenerate_faces.len(),
            faces.len()
        ));
    }

    Ok(TopologyReport {
        is_manifold,
        is_watertight,
        has_self_intersections,
        boundary_edges,
        non_manifold_edges,
        self_intersecting_pairs,
        analysed_faces: faces.len() - degenerate_faces.len(),
        total_faces: faces.len(),
        degenerate_faces,
        issues,
    })
}
