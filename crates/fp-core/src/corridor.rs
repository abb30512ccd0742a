//! Polyline offsetting for corridor, facade and building hulls.
//!
//! Each joint of the centerline gets two miter normals (one per adjacent
//! segment) scaled so that an offset of `s` meters keeps both adjacent
//! segments exactly `s` away. Self-intersections produced on the inside of
//! sharp bends are cut out afterwards.

use crate::geometry::{segment_intersection, Vec3};

/// Offsets below this are returned as the unshifted centerline.
pub const MINIMAL_POSSIBLE_SHIFT: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct CorridorHelper {
    path: Vec<Vec3>,
    normals: Vec<Vec3>,
    origins: Vec<Vec3>,
    center_length: f64,
    looped: bool,
    valid: bool,
}

impl CorridorHelper {
    /// Build a helper over `path`. A looped path is treated as a closed ring
    /// (first corner follows the last one).
    pub fn new(path: &[Vec3], looped: bool) -> Self {
        let mut helper = Self {
            path: path.to_vec(),
            normals: Vec::new(),
            origins: Vec::new(),
            center_length: 0.0,
            looped,
            valid: false,
        };
        helper.compute();
        helper
    }

    fn compute(&mut self) {
        if self.path.len() < 2 {
            return;
        }
        self.path.dedup_by(|a, b| (a.xy() - b.xy()).norm() < 1e-9);
        if self.looped && self.path.len() > 2 {
            if let (Some(first), Some(last)) = (self.path.first(), self.path.last()) {
                if (first.xy() - last.xy()).norm() < 1e-9 {
                    self.path.pop();
                }
            }
        }
        remove_loops(&mut self.path);

        let mut ring = self.path.clone();
        if self.looped {
            if let (Some(&first), Some(&last)) = (self.path.first(), self.path.last()) {
                ring.insert(0, last);
                ring.push(first);
            }
        }

        let mut side_normals = Vec::with_capacity(ring.len() - 1);
        for w in ring.windows(2) {
            let d = w[1] - w[0];
            let len = d.xy().norm();
            if len < 1e-12 {
                continue;
            }
            // rotate +90° about z
            side_normals.push(Vec3::new(-d.y / len, d.x / len, 0.0));
        }
        self.center_length = crate::geometry::polyline_length_2d(&self.path);
        if side_normals.is_empty() {
            return;
        }

        self.normals.clear();
        self.origins.clear();
        self.normals.push(side_normals[0]);
        self.origins.push(ring[0]);

        let mut last = side_normals[0];
        for (i, next) in side_normals.iter().enumerate().skip(1) {
            let sum = last + next;
            let center = if sum.norm() < 1e-12 {
                // U-turn: fall back to the segment normal
                last
            } else {
                sum.normalize()
            };
            let cos2 = last.dot(&center);
            let normal1 = last + center;
            let normal2 = next + center;
            let len = (2.0 / ((cos2 + 1.0) * normal1.norm_squared())).sqrt();
            self.normals.push(normal1 * len);
            self.normals.push(normal2 * len);
            self.origins.push(ring[i]);
            self.origins.push(ring[i]);
            last = *next;
        }

        self.normals.push(last);
        self.origins.push(ring[ring.len() - 1]);
        self.valid = true;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// 2-D length of the (loop-free) centerline.
    pub fn center_length(&self) -> f64 {
        self.center_length
    }

    pub fn center_path(&self) -> &[Vec3] {
        &self.path
    }

    /// Centerline offset sideways by `shift` meters (positive = left of
    /// travel direction).
    pub fn shifted(&self, shift: f64) -> Vec<Vec3> {
        if shift.abs() < MINIMAL_POSSIBLE_SHIFT || !self.valid {
            return self.path.clone();
        }

        let mut out: Vec<Vec3> = self
            .origins
            .iter()
            .zip(&self.normals)
            .map(|(o, n)| o + n * shift)
            .collect();

        if self.looped && out.len() > 2 {
            out.remove(0);
            out.pop();
        }
        remove_loops(&mut out);

        if self.looped && !out.is_empty() {
            // ring-shift and clean again so loops across the seam are caught
            let k = 4.min(out.len());
            out.rotate_left(k);
            remove_loops(&mut out);
            out.push(out[0]);
        }
        out
    }

    /// Closed hull: right offset followed by the reversed left offset.
    pub fn hull(&self, width_right: f64, width_left: f64) -> Vec<Vec3> {
        let mut out = self.shifted(width_right);
        let back = self.shifted(width_left);
        out.extend(back.into_iter().rev());
        out
    }
}

/// Cut out self-intersections, preferring cuts toward the end of the path.
pub fn remove_loops(path: &mut Vec<Vec3>) {
    if path.len() < 4 {
        return;
    }
    let mut a1 = path[0];
    let mut i = 1;
    while i + 2 < path.len() {
        let mut a2 = path[i];
        let mut b2 = path[path.len() - 1];
        let mut k = path.len() - 2;
        while k > i {
            let b1 = path[k];
            if let Some(hit) = intersect(&a1, &a2, &b1, &b2) {
                path[i] = hit;
                path.drain(i + 1..=k);
                a2 = hit;
                break;
            }
            b2 = b1;
            k -= 1;
        }
        a1 = a2;
        i += 1;
    }
}

/// Intersection point of two segments in the xy plane, z interpolated
/// along the second segment.
pub fn intersect(a1: &Vec3, a2: &Vec3, b1: &Vec3, b2: &Vec3) -> Option<Vec3> {
    let (_, u) = segment_intersection(&a1.xy(), &a2.xy(), &b1.xy(), &b2.xy())?;
    Some(b1 + (b2 - b1) * u)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::polygon_signed_area;

    #[test]
    fn test_straight_corridor_hull_is_rectangle() {
        let path = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(100.0, 0.0, 0.0)];
        let helper = CorridorHelper::new(&path, false);
        let hull = helper.hull(5.0, -5.0);
        assert_eq!(hull.len(), 4);
        assert!((polygon_signed_area(&hull).abs() - 1000.0).abs() < 1e-6);
        assert!((helper.center_length() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_miter_keeps_distance_at_right_angle() {
        let path = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.0, 10.0, 0.0),
        ];
        let helper = CorridorHelper::new(&path, false);
        let outer = helper.shifted(-2.0);
        assert_eq!(outer.len(), 4);
        // each joint normal keeps its own segment 2m away
        assert!((outer[1].y + 2.0).abs() < 1e-9 && outer[1].x > 10.0);
        assert!((outer[2].x - 12.0).abs() < 1e-9 && outer[2].y < 0.0);
    }

    #[test]
    fn test_step_offset_does_not_self_intersect() {
        // inner side of the second bend loops without trimming
        let path = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.0, 1.0, 0.0),
            Vec3::new(20.0, 1.0, 0.0),
        ];
        let helper = CorridorHelper::new(&path, false);
        let shifted = helper.shifted(-3.0);
        assert_eq!(shifted.len(), 4, "loop should be cut: {shifted:?}");
        for i in 0..shifted.len().saturating_sub(1) {
            for k in (i + 2)..shifted.len().saturating_sub(1) {
                let hit = intersect(&shifted[i], &shifted[i + 1], &shifted[k], &shifted[k + 1]);
                assert!(hit.is_none(), "segments {i} and {k} cross");
            }
        }
    }

    #[test]
    fn test_looped_shift_offsets_every_side() {
        let square = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.0, 10.0, 0.0),
            Vec3::new(0.0, 10.0, 0.0),
        ];
        let helper = CorridorHelper::new(&square, true);
        let grown = helper.shifted(-1.0);
        let area = polygon_signed_area(&grown[..grown.len() - 1]).abs();
        // 12x12 square with four chamfered corners
        let leg = 2.0 - std::f64::consts::SQRT_2;
        let expected = 144.0 - 2.0 * leg * leg;
        assert!((area - expected).abs() < 1e-6, "area {area}");
    }
}
