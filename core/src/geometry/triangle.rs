//! Triangle-level geometry used by the mesh analysis tools.
//!
//! Pure functions over `Point3` triples: area, normals, signed volume
//! contributions, closest-point and intersection tests.

use super::{Aabb, Point3, Vector3, EPSILON};

/// Area below which a triangle is treated as degenerate.
pub const DEGENERATE_AREA: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: Point3,
    pub b: Point3,
    pub c: Point3,
}

impl Triangle {
    pub fn new(a: Point3, b: Point3, c: Point3) -> Self {
        Self { a, b, c }
    }

    pub fn vertices(&self) -> [Point3; 3] {
        [self.a, self.b, self.c]
    }

    /// Non-normalized normal; its length is twice the area.
    pub fn scaled_normal(&self) -> Vector3 {
        (self.b - self.a).cross(&(self.c - self.a))
    }

    pub fn area(&self) -> f64 {
        self.scaled_normal().norm() * 0.5
    }

    /// Unit normal, or `None` for a degenerate triangle.
    pub fn normal(&self) -> Option<Vector3> {
        let n = self.scaled_normal();
        let len = n.norm();
        if len * 0.5 < DEGENERATE_AREA {
            None
        } else {
            Some(n / len)
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.area() < DEGENERATE_AREA
    }

    pub fn centroid(&self) -> Point3 {
        Point3::from((self.a.coords + self.b.coords + self.c.coords) / 3.0)
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(&[self.a, self.b, self.c])
    }

    /// Signed volume of the tetrahedron (origin, a, b, c).
    /// Summed over a closed, consistently wound mesh this yields the enclosed volume.
    pub fn signed_volume(&self) -> f64 {
        self.a.coords.dot(&self.b.coords.cross(&self.c.coords)) / 6.0
    }

    /// Closest point on the triangle to `p` (Ericson, Real-Time Collision Detection 5.1.5).
    pub fn closest_point(&self, p: &Point3) -> Point3 {
        let (a, b, c) = (self.a, self.b, self.c);
        let ab = b - a;
        let ac = c - a;
        let ap = p - a;

        let d1 = ab.dot(&ap);
        let d2 = ac.dot(&ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return a;
        }

        let bp = p - b;
        let d3 = ab.dot(&bp);
        let d4 = ac.dot(&bp);
        if d3 >= 0.0 && d4 <= d3 {
            return b;
        }

        let vc = d1 * d4 - d3 * d2;
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
            let v = d1 / (d1 - d3);
            return a + ab * v;
        }

        let cp = p - c;
        let d5 = ab.dot(&cp);
        let d6 = ac.dot(&cp);
        if d6 >= 0.0 && d5 <= d6 {
            return c;
        }

        let vb = d5 * d2 - d1 * d6;
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
            let w = d2 / (d2 - d6);
            return a + ac * w;
        }

        let va = d3 * d6 - d5 * d4;
        if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
            let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
            return b + (c - b) * w;
        }

        let denom = 1.0 / (va + vb + vc);
        let v = vb * denom;
        let w = vc * denom;
        a + ab * v + ac * w
    }

    pub fn distance_to_point(&self, p: &Point3) -> f64 {
        (p - self.closest_point(p)).norm()
    }

    /// True if the open segment `p0..p1` crosses the interior of this triangle.
    /// Touching at an edge or vertex does not count.
    pub fn segment_crosses(&self, p0: &Point3, p1: &Point3) -> bool {
        let dir = p1 - p0;
        let e1 = self.b - self.a;
        let e2 = self.c - self.a;
        let h = dir.cross(&e2);
        let det = e1.dot(&h);
        if det.abs() < EPSILON * EPSILON {
            // Segment parallel to the triangle plane.
            return false;
        }
        let inv = 1.0 / det;
        let s = p0 - self.a;
        let u = inv * s.dot(&h);
        if u <= EPSILON || u >= 1.0 - EPSILON {
            return false;
        }
        let q = s.cross(&e1);
        let v = inv * dir.dot(&q);
        if v <= EPSILON || u + v >= 1.0 - EPSILON {
            return false;
        }
        let t = inv * e2.dot(&q);
        t > EPSILON && t < 1.0 - EPSILON
    }

    /// Proper (non-coplanar) intersection test between two triangles.
    ///
    /// Two triangles that cross each other always have at least one edge of one
    /// piercing the other, so six segment tests are sufficient. Coplanar overlap
    /// is not reported.
    pub fn intersects(&self, other: &Triangle) -> bool {
        let edges = |t: &Triangle| [(t.a, t.b), (t.b, t.c), (t.c, t.a)];
        edges(self).iter().any(|(p, q)| other.segment_crosses(p, q))
            || edges(other).iter().any(|(p, q)| self.segment_crosses(p, q))
    }
}
