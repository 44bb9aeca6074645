//! Copy-on-write edits. Each returns a new `MeshModel`; the source is untouched.

use super::MeshModel;
use crate::geometry::{Point3, Vector3};

impl MeshModel {
    pub fn translated(&self, offset: &Vector3) -> MeshModel {
        let vertices = self.vertices().iter().map(|p| p + offset).collect();
        self.with_geometry(vertices, self.faces().to_vec())
    }

    /// Uniform scale about the origin. A negative factor would flip winding, so
    /// callers validate `factor > 0`.
    pub fn scaled(&self, factor: f64) -> MeshModel {
        let vertices = self.vertices().iter().map(|p| Point3::from(p.coords * factor)).collect();
        self.with_geometry(vertices, self.faces().to_vec())
    }

    /// Closes the given boundary loops with a fan around each loop's centroid.
    /// Unknown hole indices are ignored. Returns the new model and how many
    /// loops were filled.
    pub fn with_holes_filled(&self, holes: &[u32]) -> (MeshModel, usize) {
        let mut vertices = self.vertices().to_vec();
        let mut faces = self.faces().to_vec();
        let mut filled = 0;

        for hole in self.holes().iter().filter(|h| holes.contains(&h.index)) {
            let center = vertices.len() as u32;
            vertices.push(hole.centroid);
            let n = hole.vertices.len();
            for i in 0..n {
                let (a, b) = (hole.vertices[i], hole.vertices[(i + 1) % n]);
                // boundary runs a->b in the adjacent face, the patch runs b->a
                faces.push([b, a, center]);
            }
            filled += 1;
        }

        (self.with_geometry(vertices, faces), filled)
    }

    /// Faces whose normal is within `tolerance_deg` of `direction`.
    /// Degenerate faces never match.
    pub fn faces_facing(&self, direction: &Vector3, tolerance_deg: f64) -> Vec<u32> {
        let Some(dir) = direction.try_normalize(f64::EPSILON) else {
            return Vec::new();
        };
        let min_cos = tolerance_deg.to_radians().cos();
        self.triangles()
            .enumerate()
            .filter_map(|(i, t)| {
                let n = t.normal()?;
                (n.dot(&dir) >= min_cos - 1e-12).then_some(i as u32)
            })
            .collect()
    }
}
