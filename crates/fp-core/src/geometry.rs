//! Planar and spatial math shared by the hull builder, planners and the
//! collision checker.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub type Vec2 = Vector2<f64>;
pub type Vec3 = Vector3<f64>;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate distance between two points in meters using Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
///
/// # Returns
/// Distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

// ==== Intervals ====

/// Closed interval that grows as values are folded in.
///
/// A freshly created interval is empty (`min > max`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl Default for MinMax {
    fn default() -> Self {
        Self::empty()
    }
}

impl MinMax {
    pub fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn new(a: f64, b: f64) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn update(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn enlarge(&mut self, other: &MinMax) {
        if other.is_valid() {
            self.update(other.min);
            self.update(other.max);
        }
    }

    /// Grow both ends outward by `amount` (shrinks for negative values).
    pub fn widen(&mut self, amount: f64) {
        self.min -= amount;
        self.max += amount;
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    pub fn size(&self) -> f64 {
        if self.is_valid() {
            self.max - self.min
        } else {
            0.0
        }
    }

    pub fn mean(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn overlaps(&self, other: &MinMax) -> bool {
        self.is_valid() && other.is_valid() && self.min <= other.max && other.min <= self.max
    }
}

// ==== Polygons (xy plane) ====

/// Signed shoelace area of a closed polygon in the xy plane.
///
/// Positive for counter-clockwise vertex order.
pub fn polygon_signed_area(points: &[Vec3]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let a = &points[i];
        let b = &points[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Check if a point is inside a polygon (xy only).
/// Uses ray casting algorithm.
pub fn point_in_polygon(x: f64, y: f64, polygon: &[Vec3]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (polygon[i].x, polygon[i].y);
        let (xj, yj) = (polygon[j].x, polygon[j].y);

        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Axis-aligned bounds of a point set as (x, y, z) intervals.
pub fn bounds(points: &[Vec3]) -> (MinMax, MinMax, MinMax) {
    let mut x = MinMax::empty();
    let mut y = MinMax::empty();
    let mut z = MinMax::empty();
    for p in points {
        x.update(p.x);
        y.update(p.y);
        z.update(p.z);
    }
    (x, y, z)
}

/// Sum of 2-D distances between consecutive points.
pub fn polyline_length_2d(points: &[Vec3]) -> f64 {
    points
        .windows(2)
        .map(|w| (w[1].xy() - w[0].xy()).norm())
        .sum()
}

/// Sum of 3-D distances between consecutive points, optionally closing the ring.
pub fn polyline_length_3d(points: &[Vec3], closed: bool) -> f64 {
    let mut len: f64 = points.windows(2).map(|w| (w[1] - w[0]).norm()).sum();
    if closed && points.len() > 2 {
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            len += (first - last).norm();
        }
    }
    len
}

/// Intersection of segments `a1-a2` and `b1-b2` in the xy plane.
///
/// Returns the parameters `(t, u)` along each segment when both lie in
/// `[0, 1]`. Collinear segments that overlap report the start of the overlap.
pub fn segment_intersection(a1: &Vec2, a2: &Vec2, b1: &Vec2, b2: &Vec2) -> Option<(f64, f64)> {
    let r = a2 - a1;
    let s = b2 - b1;
    let denom = r.perp(&s);
    let qp = b1 - a1;

    if denom.abs() < 1e-12 {
        // Parallel. Only collinear overlaps count.
        if qp.perp(&r).abs() > 1e-9 {
            return None;
        }
        let rr = r.norm_squared();
        if rr < 1e-18 {
            return None;
        }
        let t0 = qp.dot(&r) / rr;
        let t1 = t0 + s.dot(&r) / rr;
        let lo = t0.min(t1).max(0.0);
        let hi = t0.max(t1).min(1.0);
        if lo > hi {
            return None;
        }
        let u = if s.norm_squared() < 1e-18 {
            0.0
        } else {
            ((a1 + r * lo) - b1).dot(&s) / s.norm_squared()
        };
        return Some((lo, u));
    }

    let t = qp.perp(&s) / denom;
    let u = qp.perp(&r) / denom;
    if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
        Some((t, u))
    } else {
        None
    }
}

/// Extent in x of the polygon inside the horizontal band `y ± tolerance/2`.
///
/// Used by the raster planners to decide how long a scan line at height `y`
/// has to be so that the whole band seen by the camera is covered.
pub fn band_intersections_x(polygon: &[Vec3], y: f64, tolerance: f64) -> MinMax {
    let mut result = MinMax::empty();
    let n = polygon.len();
    if n < 2 {
        return result;
    }
    let band = MinMax::new(y - tolerance / 2.0, y + tolerance / 2.0);

    for i in 0..n {
        let a = &polygon[i];
        let b = &polygon[(i + 1) % n];
        if band.contains(a.y) {
            result.update(a.x);
        }
        for edge_y in [band.min, band.max] {
            if (a.y - edge_y) * (b.y - edge_y) <= 0.0 && (a.y - b.y).abs() > 1e-12 {
                let t = (edge_y - a.y) / (b.y - a.y);
                result.update(a.x + t * (b.x - a.x));
            }
        }
    }
    result
}

/// Same as [`band_intersections_x`] with the axes swapped.
pub fn band_intersections_y(polygon: &[Vec3], x: f64, tolerance: f64) -> MinMax {
    let swapped: Vec<Vec3> = polygon.iter().map(|p| Vec3::new(p.y, p.x, p.z)).collect();
    band_intersections_x(&swapped, x, tolerance)
}

/// Normalize an angle in degrees to `(-180, 180]`.
pub fn normalize_deg(angle: f64) -> f64 {
    let mut a = angle % 360.0;
    if a <= -180.0 {
        a += 360.0;
    } else if a > 180.0 {
        a -= 360.0;
    }
    a
}

/// Normalize an angle in degrees to `[0, 360)`.
pub fn normalize_deg_positive(angle: f64) -> f64 {
    let a = angle % 360.0;
    if a < 0.0 {
        a + 360.0
    } else {
        a
    }
}
