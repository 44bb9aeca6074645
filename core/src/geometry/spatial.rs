//! Spatial index over mesh triangles.
//!
//! Backed by an R-tree (`rstar`) of per-triangle bounding boxes, so pairwise
//! checks (self-intersection) and nearest-element queries avoid scanning every
//! triangle. An index is built once per `MeshModel` and lives as long as it.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use super::{Point3, Triangle};
use crate::budget::{Deadline, DeadlineExceeded};

/// Index entry: one triangle of the mesh and its face index.
#[derive(Debug, Clone)]
pub struct IndexedTriangle {
    pub face: usize,
    pub triangle: Triangle,
    envelope: AABB<[f64; 3]>,
}

impl IndexedTriangle {
    pub fn new(face: usize, triangle: Triangle) -> Self {
        let bounds = triangle.aabb();
        let envelope = AABB::from_corners(
            [bounds.min.x, bounds.min.y, bounds.min.z],
            [bounds.max.x, bounds.max.y, bounds.max.z],
        );
        Self { face, triangle, envelope }
    }
}

impl RTreeObject for IndexedTriangle {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for IndexedTriangle {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let p = Point3::new(point[0], point[1], point[2]);
        (p - self.triangle.closest_point(&p)).norm_squared()
    }
}

#[derive(Debug, Clone)]
pub struct TriangleIndex {
    tree: RTree<IndexedTriangle>,
}

impl TriangleIndex {
    /// Bulk-loads the tree from `(face index, triangle)` pairs.
    pub fn build(triangles: impl Iterator<Item = (usize, Triangle)>) -> Self {
        let entries: Vec<_> = triangles
            .map(|(face, triangle)| IndexedTriangle::new(face, triangle))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Face pairs `(i, j)` with `i < j` whose bounding boxes overlap.
    /// Only these pairs need an exact intersection test.
    pub fn candidate_pairs(&self, deadline: &Deadline) -> Result<Vec<(usize, usize)>, DeadlineExceeded> {
        let mut pairs = Vec::new();
        for (step, entry) in self.tree.iter().enumerate() {
            deadline.check_every(step)?;
            for other in self.tree.locate_in_envelope_intersecting(&entry.envelope) {
                if entry.face < other.face {
                    pairs.push((entry.face, other.face));
                }
            }
        }
        pairs.sort_unstable();
        Ok(pairs)
    }

    /// Nearest face to `point` with its distance.
    pub fn nearest_face(&self, point: &Point3) -> Option<(usize, f64)> {
        let query = [point.x, point.y, point.z];
        self.tree
            .nearest_neighbor(&query)
            .map(|entry| (entry.face, entry.distance_2(&query).sqrt()))
    }

    /// All faces within `radius` of `point`, closest first.
    pub fn faces_within(&self, point: &Point3, radius: f64) -> Vec<(usize, f64)> {
        let query = [point.x, point.y, point.z];
        let mut hits: Vec<_> = self
            .tree
            .locate_within_distance(query, radius * radius)
            .map(|entry| (entry.face, entry.distance_2(&query).sqrt()))
            .collect();
        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        hits
    }
}
