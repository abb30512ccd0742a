//! Connector obstacle checks.
//!
//! Connectors are straight hops between consecutive plan elements, given in
//! the plan frame (tangent plane at the reference point, heights relative to
//! it). Every obstacle reports the height band a hit connector has to clear.
//! Degenerate inputs count as hits.

use nalgebra::{Isometry3, Point3};
use tracing::debug;

use crate::corridor::CorridorHelper;
use crate::elevation::ElevationModel;
use crate::frame::CoordinateFrame;
use crate::geometry::{point_in_polygon, segment_intersection, MinMax, Vec2, Vec3};
use crate::hull::circle;
use crate::models::{AreaOfInterest, HeightReference, PlanType, RestrictionHeights};
use crate::windmill::WindmillGeometry;

/// Half width of the strip standing in for a facade wall.
const FACADE_WALL_HALF_WIDTH_M: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub from: Vec3,
    pub to: Vec3,
}

impl Segment {
    pub fn new(from: Vec3, to: Vec3) -> Self {
        Self { from, to }
    }

    fn at(&self, t: f64) -> Vec3 {
        self.from + (self.to - self.from) * t
    }

    fn is_finite(&self) -> bool {
        self.from.iter().chain(self.to.iter()).all(|v| v.is_finite())
    }
}

/// One obstacle hit by a connector.
#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub obstacle: String,
    /// Heights (plan frame) the connector has to get clear of
    pub clearance: MinMax,
}

impl Collision {
    /// Height a connector has to reach to pass; infinite when unreachable.
    pub fn required_height(&self) -> f64 {
        self.clearance.max
    }
}

#[derive(Debug, Clone)]
enum Shape {
    /// Vertical extrusion of a polygon between two heights
    Prism { polygon: Vec<Vec3>, band: MinMax },
    Windmill { geometry: Box<WindmillGeometry>, locked: bool },
}

#[derive(Debug, Clone)]
pub struct Obstacle {
    pub name: String,
    shape: Shape,
}

impl Obstacle {
    /// Polygon extruded between `floor` and `ceiling` (plan frame heights).
    pub fn prism(name: impl Into<String>, polygon: Vec<Vec3>, floor: f64, ceiling: f64) -> Self {
        Self {
            name: name.into(),
            shape: Shape::Prism {
                polygon,
                band: MinMax::new(floor, ceiling),
            },
        }
    }

    pub fn windmill(name: impl Into<String>, geometry: WindmillGeometry, locked: bool) -> Self {
        Self {
            name: name.into(),
            shape: Shape::Windmill {
                geometry: Box::new(geometry),
                locked,
            },
        }
    }

    /// Test one connector; `margin` enlarges the obstacle horizontally and
    /// vertically.
    pub fn check(&self, seg: &Segment, margin: f64) -> Option<Collision> {
        let clearance = match &self.shape {
            Shape::Prism { polygon, band } => prism_hit(polygon, *band, seg, margin)?,
            Shape::Windmill { geometry, locked } => windmill_hit(geometry, *locked, seg, margin)?,
        };
        Some(Collision {
            obstacle: self.name.clone(),
            clearance,
        })
    }

    /// Whether a connector touches this volume at all: crosses a wall inside
    /// the height band or has an end point inside.
    fn intersects(&self, seg: &Segment) -> bool {
        self.check(seg, 0.0).is_some()
    }
}

fn edges(polygon: &[Vec3]) -> impl Iterator<Item = (Vec3, Vec3)> + '_ {
    let n = polygon.len();
    (0..n).map(move |i| (polygon[i], polygon[(i + 1) % n]))
}

/// Parameters `t` where the connector pierces the vertical edge planes.
fn edge_crossings(polygon: &[Vec3], seg: &Segment) -> Vec<f64> {
    edges(polygon)
        .filter_map(|(a, b)| segment_intersection(&seg.from.xy(), &seg.to.xy(), &a.xy(), &b.xy()))
        .map(|(t, _)| t)
        .collect()
}

fn distance_to_edge(p: &Vec2, a: &Vec2, b: &Vec2) -> f64 {
    let d = b - a;
    let len2 = d.norm_squared();
    let t = if len2 < 1e-12 { 0.0 } else { ((p - a).dot(&d) / len2).clamp(0.0, 1.0) };
    (p - (a + d * t)).norm()
}

fn prism_hit(polygon: &[Vec3], band: MinMax, seg: &Segment, margin: f64) -> Option<MinMax> {
    if polygon.len() < 3 || !seg.is_finite() || band.min.is_nan() || band.max.is_nan() {
        return Some(band);
    }
    let mut zone = band;
    zone.widen(margin);

    let pierces = edge_crossings(polygon, seg)
        .into_iter()
        .any(|t| zone.contains(seg.at(t).z));
    let inside = |p: &Vec3| point_in_polygon(p.x, p.y, polygon) && zone.contains(p.z);
    let near_wall = |p: &Vec3| {
        zone.contains(p.z) && edges(polygon).any(|(a, b)| distance_to_edge(&p.xy(), &a.xy(), &b.xy()) < margin)
    };
    let mid = seg.at(0.5);

    if pierces || inside(&seg.from) || inside(&seg.to) || inside(&mid) || near_wall(&seg.from) || near_wall(&seg.to) {
        Some(band)
    } else {
        None
    }
}

/// Elliptical cylinder along +z of a component frame.
struct Cylinder<'a> {
    to_component: &'a Isometry3<f64>,
    radius_x: f64,
    radius_y: f64,
    length: f64,
}

impl Cylinder<'_> {
    fn hit(&self, seg: &Segment, margin: f64) -> bool {
        let p0 = self.to_component.transform_point(&Point3::from(seg.from)).coords;
        let p1 = self.to_component.transform_point(&Point3::from(seg.to)).coords;
        let d = p1 - p0;
        let (a, b) = (self.radius_x + margin, self.radius_y + margin);
        if a <= 0.0 || b <= 0.0 {
            return true;
        }
        let (z_lo, z_hi) = (-margin, self.length + margin);
        let in_z = |z: f64| z >= z_lo && z <= z_hi;
        let ellipse = |p: &Vec3| (p.x / a).powi(2) + (p.y / b).powi(2);

        if (ellipse(&p0) <= 1.0 && in_z(p0.z)) || (ellipse(&p1) <= 1.0 && in_z(p1.z)) {
            return true;
        }
        let qa = (d.x / a).powi(2) + (d.y / b).powi(2);
        let qb = 2.0 * (p0.x * d.x / (a * a) + p0.y * d.y / (b * b));
        let qc = ellipse(&p0) - 1.0;
        if qa > 1e-12 {
            let disc = qb * qb - 4.0 * qa * qc;
            if disc >= 0.0 {
                let s = disc.sqrt();
                for t in [(-qb - s) / (2.0 * qa), (-qb + s) / (2.0 * qa)] {
                    if (0.0..=1.0).contains(&t) && in_z(p0.z + d.z * t) {
                        return true;
                    }
                }
            }
        }
        // caps
        if d.z.abs() > 1e-12 {
            for cap in [z_lo, z_hi] {
                let t = (cap - p0.z) / d.z;
                if (0.0..=1.0).contains(&t) && ellipse(&(p0 + d * t)) <= 1.0 {
                    return true;
                }
            }
        }
        false
    }
}

fn windmill_hit(geo: &WindmillGeometry, locked: bool, seg: &Segment, margin: f64) -> Option<MinMax> {
    if !seg.is_finite() {
        return Some(MinMax::new(0.0, f64::INFINITY));
    }
    let p = &geo.params;
    let base = geo.center.inverse_transform_point(&Point3::origin()).coords;
    let clearance = MinMax::new(base.z, base.z + p.total_height() + geo.clearance);

    // rotor at any rotation and pitch
    let swept = Cylinder {
        to_component: &geo.center,
        radius_x: p.unlocked_radius() + geo.clearance,
        radius_y: p.unlocked_radius() + geo.clearance,
        length: p.total_height() + geo.clearance,
    };
    if !swept.hit(seg, margin) {
        return None;
    }
    if !locked {
        return Some(clearance);
    }

    let tower = Cylinder {
        to_component: &geo.center,
        radius_x: p.tower_radius_m,
        radius_y: p.tower_radius_m,
        length: p.tower_height_m,
    };
    let hub = Cylinder {
        to_component: &geo.hub,
        radius_x: p.hub_radius_m,
        radius_y: p.hub_radius_m,
        length: 2.0 * (p.hub_half_length_m + geo.clearance),
    };
    let mut blades = geo.blades.iter().map(|blade| Cylinder {
        to_component: blade,
        radius_x: p.blade_radius_m,
        radius_y: p.blade_thin_radius_m,
        length: p.blade_length_m,
    });
    if tower.hit(seg, margin) || hub.hit(seg, margin) || blades.any(|b| b.hit(seg, margin)) {
        Some(clearance)
    } else {
        None
    }
}

// ==== Obstacles from the plan ====

fn restriction_height(value: f64, reference: HeightReference, terrain: f64, ref_alt: f64) -> f64 {
    match reference {
        HeightReference::AboveGround => terrain + value - ref_alt,
        HeightReference::AboveSeaLevel => value - ref_alt,
        HeightReference::AboveReference => value,
    }
}

fn restriction_band(r: &RestrictionHeights, terrain: f64, ref_alt: f64) -> MinMax {
    let floor = if r.floor_enabled {
        restriction_height(r.floor_m, r.floor_reference, terrain, ref_alt)
    } else {
        f64::NEG_INFINITY
    };
    let ceiling = if r.ceiling_enabled {
        restriction_height(r.ceiling_m, r.ceiling_reference, terrain, ref_alt)
    } else {
        f64::INFINITY
    };
    MinMax { min: floor, max: ceiling }
}

/// Obstacle volume of an AOI in the plan frame, if it is one.
pub fn obstacle_for(aoi: &AreaOfInterest, frame: &CoordinateFrame, elevation: &dyn ElevationModel) -> Option<Obstacle> {
    let kind = aoi.plan_type;
    if !kind.is_obstacle() && !kind.is_geofence() {
        return None;
    }
    let first = *aoi.corners().first()?;
    let p = aoi.params();
    let corners: Vec<Vec3> = aoi.corners().iter().map(|c| frame.to_local(c)).collect();
    let base = corners[0].z;
    let ref_alt = frame.origin().alt;

    match kind {
        PlanType::Windmill => {
            let geo = WindmillGeometry::new(&p.windmill, corners[0], 0.0);
            Some(Obstacle::windmill(aoi.name.clone(), geo, p.windmill.locked))
        }
        PlanType::Building => Some(Obstacle::prism(
            aoi.name.clone(),
            corners,
            f64::NEG_INFINITY,
            base + p.crop_height_max_m,
        )),
        PlanType::Facade => {
            let wall = CorridorHelper::new(&corners, false).hull(-FACADE_WALL_HALF_WIDTH_M, FACADE_WALL_HALF_WIDTH_M);
            Some(Obstacle::prism(aoi.name.clone(), wall, f64::NEG_INFINITY, base + p.crop_height_max_m))
        }
        PlanType::Tower => Some(Obstacle::prism(
            aoi.name.clone(),
            circle(corners[0], p.corridor_width_m.max(0.1), 5.0),
            f64::NEG_INFINITY,
            base + p.crop_height_max_m,
        )),
        _ => {
            let polygon: Vec<Vec3> = if aoi.derived.hull.is_empty() {
                corners
            } else {
                aoi.derived.hull.iter().map(|c| frame.to_local(c)).collect()
            };
            let terrain = elevation.elevation(first.lat, first.lon);
            let band = restriction_band(&p.restriction, terrain, ref_alt);
            Some(Obstacle::prism(aoi.name.clone(), polygon, band.min, band.max))
        }
    }
}

/// All obstacle checks for the connectors of one plan.
pub struct CollisionChecker<'a> {
    obstacles: Vec<Obstacle>,
    geofences: Vec<Obstacle>,
    frame: &'a CoordinateFrame,
    elevation: &'a dyn ElevationModel,
    margin: f64,
    min_ground_distance: f64,
}

impl<'a> CollisionChecker<'a> {
    pub fn new(frame: &'a CoordinateFrame, elevation: &'a dyn ElevationModel, margin: f64, min_ground_distance: f64) -> Self {
        Self {
            obstacles: Vec::new(),
            geofences: Vec::new(),
            frame,
            elevation,
            margin,
            min_ground_distance,
        }
    }

    /// Collect the obstacle and geofence volumes of `aois`.
    pub fn with_aois<'b>(mut self, aois: impl Iterator<Item = &'b AreaOfInterest>) -> Self {
        for aoi in aois {
            if let Some(ob) = obstacle_for(aoi, self.frame, self.elevation) {
                if aoi.plan_type.is_geofence() {
                    self.geofences.push(ob);
                } else {
                    self.obstacles.push(ob);
                }
            }
        }
        self
    }

    pub fn add_obstacle(&mut self, obstacle: Obstacle) {
        self.obstacles.push(obstacle);
    }

    pub fn add_geofence(&mut self, geofence: Obstacle) {
        self.geofences.push(geofence);
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len() + self.geofences.len()
    }

    /// Every collision of one connector, including terrain and geofences.
    pub fn check(&self, seg: &Segment) -> Vec<Collision> {
        self.check_with_terrain(seg, true)
    }

    /// Like [`check`](Self::check); connectors touching the ground at takeoff
    /// or landing skip the terrain clearance test.
    pub fn check_with_terrain(&self, seg: &Segment, terrain: bool) -> Vec<Collision> {
        let mut hits: Vec<Collision> = self
            .obstacles
            .iter()
            .filter_map(|ob| ob.check(seg, self.margin))
            .collect();

        if !self.geofences.is_empty() && !self.geofences.iter().any(|g| g.intersects(seg)) {
            // touches no allowed volume; climbing does not help
            hits.extend(self.geofences.iter().map(|g| Collision {
                obstacle: g.name.clone(),
                clearance: MinMax::new(seg.from.z.min(seg.to.z), f64::INFINITY),
            }));
        }

        if terrain {
            hits.extend(self.terrain_hit(seg));
        }
        if !hits.is_empty() {
            debug!(count = hits.len(), "connector collides");
        }
        hits
    }

    fn terrain_hit(&self, seg: &Segment) -> Option<Collision> {
        if self.min_ground_distance <= 0.0 {
            return None;
        }
        if !seg.is_finite() {
            return Some(Collision {
                obstacle: "terrain".into(),
                clearance: MinMax::new(0.0, f64::INFINITY),
            });
        }
        let a = self.frame.to_global(&seg.from);
        let b = self.frame.to_global(&seg.to);
        let ground = self.elevation.distance_to_ground(self.frame, &a, &b);
        if !ground.is_valid() || ground.min >= self.min_ground_distance {
            return None;
        }
        let low = seg.from.z.min(seg.to.z);
        let high = seg.from.z.max(seg.to.z) + (self.min_ground_distance - ground.min);
        Some(Collision {
            obstacle: "terrain".into(),
            clearance: MinMax::new(low, high),
        })
    }
}

/// Highest height any collision requires, `None` without collisions.
pub fn required_clearance(collisions: &[Collision]) -> Option<f64> {
    collisions.iter().map(Collision::required_height).reduce(f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::windmill::WindmillParams;

    fn square(side: f64) -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(side, 0.0, 0.0),
            Vec3::new(side, side, 0.0),
            Vec3::new(0.0, side, 0.0),
        ]
    }

    #[test]
    fn test_prism_pierced_through_wall() {
        let ob = Obstacle::prism("box", square(10.0), 0.0, 20.0);
        let seg = Segment::new(Vec3::new(-5.0, 5.0, 10.0), Vec3::new(15.0, 5.0, 10.0));
        let hit = ob.check(&seg, 1.0).unwrap();
        assert_eq!(hit.clearance, MinMax::new(0.0, 20.0));
    }

    #[test]
    fn test_segment_next_to_wall_counts_as_hit() {
        let ob = Obstacle::prism("box", square(10.0), 0.0, 20.0);
        let seg = Segment::new(Vec3::new(10.5, 20.0, 10.0), Vec3::new(10.5, 30.0, 5.0));
        assert!(ob.check(&seg, 1.0).is_none());
        let seg = Segment::new(Vec3::new(10.5, 5.0, 10.0), Vec3::new(30.0, 5.0, 10.0));
        assert!(ob.check(&seg, 1.0).is_some());
    }

    #[test]
    fn test_degenerate_segment_fails_closed() {
        let ob = Obstacle::prism("box", square(10.0), 0.0, 20.0);
        let seg = Segment::new(Vec3::new(f64::NAN, 0.0, 0.0), Vec3::new(100.0, 100.0, 50.0));
        assert!(ob.check(&seg, 1.0).is_some());
    }

    #[test]
    fn test_windmill_tower_hit_and_overflight() {
        let params = WindmillParams::default();
        let geo = WindmillGeometry::new(&params, Vec3::zeros(), 0.0);
        let ob = Obstacle::windmill("wka", geo, true);

        let through_tower = Segment::new(Vec3::new(-50.0, 0.0, 30.0), Vec3::new(50.0, 0.0, 30.0));
        let hit = ob.check(&through_tower, 1.0).unwrap();
        assert!((hit.required_height() - params.total_height()).abs() < 1e-9);

        let above = params.total_height() + 10.0;
        let over = Segment::new(Vec3::new(-50.0, 0.0, above), Vec3::new(50.0, 0.0, above));
        assert!(ob.check(&over, 1.0).is_none());
    }

    #[test]
    fn test_geofence_violation_is_unreachable() {
        let frame = CoordinateFrame::new(crate::frame::GeoPosition::new(47.0, 8.0, 400.0));
        let flat = crate::elevation::FlatElevation::new(400.0);
        let mut checker = CollisionChecker::new(&frame, &flat, 1.0, 0.0);
        checker.add_geofence(Obstacle::prism("fence", square(100.0), 0.0, 120.0));

        let inside = Segment::new(Vec3::new(10.0, 10.0, 50.0), Vec3::new(90.0, 90.0, 50.0));
        assert!(checker.check(&inside).is_empty());

        let outside = Segment::new(Vec3::new(150.0, 10.0, 50.0), Vec3::new(250.0, 10.0, 50.0));
        let hits = checker.check(&outside);
        assert_eq!(hits.len(), 1);
        assert_eq!(required_clearance(&hits), Some(f64::INFINITY));
    }

    #[test]
    fn test_connector_crossing_geofence_wall_is_allowed() {
        let frame = CoordinateFrame::new(crate::frame::GeoPosition::new(47.0, 8.0, 400.0));
        let flat = crate::elevation::FlatElevation::new(400.0);
        let mut checker = CollisionChecker::new(&frame, &flat, 1.0, 0.0);
        checker.add_geofence(Obstacle::prism("fence", square(100.0), 0.0, 120.0));

        let entering = Segment::new(Vec3::new(150.0, 50.0, 50.0), Vec3::new(50.0, 50.0, 50.0));
        assert!(checker.check_with_terrain(&entering, false).is_empty());
        let leaving = Segment::new(Vec3::new(50.0, 50.0, 50.0), Vec3::new(150.0, 50.0, 50.0));
        assert!(checker.check_with_terrain(&leaving, false).is_empty());

        // a second fence elsewhere does not matter once one is touched
        let far = vec![
            Vec3::new(1000.0, 1000.0, 0.0),
            Vec3::new(1100.0, 1000.0, 0.0),
            Vec3::new(1100.0, 1100.0, 0.0),
        ];
        checker.add_geofence(Obstacle::prism("far", far, 0.0, 120.0));
        assert!(checker.check_with_terrain(&leaving, false).is_empty());
    }

    #[test]
    fn test_unlocked_rotor_disk_is_swept_volume() {
        let params = WindmillParams {
            locked: false,
            ..Default::default()
        };
        let geo = WindmillGeometry::new(&params, Vec3::zeros(), 0.0);
        let ob = Obstacle::windmill("wka", geo, false);
        let hub_z = params.tower_height_m + params.hub_radius_m;

        // ring of radius 30 m around the hub in the xz plane
        let mut misses = 0;
        for step in 0..36 {
            let a = f64::from(step * 10).to_radians();
            let (x, z) = (30.0 * a.cos(), hub_z + 30.0 * a.sin());
            let along_x = Segment::new(Vec3::new(x - 5.0, 0.0, z), Vec3::new(x + 5.0, 0.0, z));
            let along_y = Segment::new(Vec3::new(x, -5.0, z), Vec3::new(x, 5.0, z));
            for seg in [along_x, along_y] {
                match ob.check(&seg, 1.0) {
                    Some(hit) => assert!((hit.required_height() - params.total_height()).abs() < 1e-9),
                    None => misses += 1,
                }
            }
        }
        assert_eq!(misses, 0);

        let beside = Segment::new(Vec3::new(60.0, -50.0, hub_z), Vec3::new(60.0, 50.0, hub_z));
        assert!(ob.check(&beside, 1.0).is_none());
    }

    #[test]
    fn test_terrain_clearance_required() {
        let frame = CoordinateFrame::new(crate::frame::GeoPosition::new(47.0, 8.0, 400.0));
        let flat = crate::elevation::FlatElevation::new(400.0);
        let checker = CollisionChecker::new(&frame, &flat, 1.0, 10.0);
        let low = Segment::new(Vec3::new(0.0, 0.0, 4.0), Vec3::new(100.0, 0.0, 4.0));
        let hits = checker.check(&low);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].required_height() - 10.0).abs() < 1e-3);
    }
}
