//! Effective scan boundary ("hull") and area of an area of interest.
//!
//! The AOI frame is anchored at the first corner and rotated to the scan
//! heading. Multi-corner patterns are additionally shifted so their local
//! corners start at `(0, 0)`; single-corner patterns stay centered on the
//! corner.

use std::f64::consts::PI;

use crate::corridor::CorridorHelper;
use crate::error::{PlanResult, RecomputeError};
use crate::frame::{AoiFrame, GeoPosition};
use crate::geometry::{bounds, polygon_signed_area, Vec2, Vec3};
use crate::models::{AreaOfInterest, FacadeScanningSide, PlanType};

/// Fraction of the line spacing a sampled spiral may deviate from the curve.
pub const CROSS_TRACK_TOLERANCE: f64 = 0.1;

/// Inputs the hull needs besides the AOI itself.
#[derive(Debug, Clone, Copy)]
pub struct HullOptions {
    /// Angular sampling step of circular hulls, degrees
    pub angle_step_deg: f64,
    /// Effective line spacing, when footprint sizes are already known
    pub line_spacing: Option<f64>,
    /// Stand-off distance of vertical patterns
    pub altitude_m: f64,
}

/// Local geometry of one AOI after the hull pass.
#[derive(Debug, Clone)]
pub struct HullGeometry {
    pub frame: AoiFrame,
    pub corners_local: Vec<Vec3>,
    pub hull_local: Vec<Vec3>,
    pub area_m2: f64,
    pub corridor_length_m: f64,
    pub length_x: f64,
    pub length_y: f64,
}

impl HullGeometry {
    pub fn hull_global(&self) -> Vec<GeoPosition> {
        self.hull_local.iter().map(|p| self.frame.to_global(p)).collect()
    }
}

/// Heading the AOI frame's x axis points to.
pub fn scan_yaw(aoi: &AreaOfInterest) -> f64 {
    aoi.plan_type.fixed_scan_yaw().unwrap_or(aoi.params().yaw_deg)
}

/// Build the AOI frame and its local corners.
pub fn local_frame(aoi: &AreaOfInterest, plan_reference_alt: f64) -> PlanResult<(AoiFrame, Vec<Vec3>)> {
    let first = *aoi.corners().first().ok_or(RecomputeError::TooFewCorners {
        required: aoi.plan_type.min_corners().max(1),
        actual: 0,
    })?;
    let mut frame = AoiFrame::new(first, plan_reference_alt, scan_yaw(aoi));
    let mut corners: Vec<Vec3> = aoi.corners().iter().map(|c| frame.to_local(c)).collect();

    if aoi.corners().len() > 1 && aoi.plan_type.fixed_scan_yaw().is_none() {
        let (x, y, _) = bounds(&corners);
        let shift = Vec2::new(x.min, y.min);
        frame.set_shift(shift);
        for c in &mut corners {
            c.x -= shift.x;
            c.y -= shift.y;
        }
    }
    Ok((frame, corners))
}

/// Regular polygon around `center`.
pub fn circle(center: Vec3, radius: f64, step_deg: f64) -> Vec<Vec3> {
    let step = step_deg.max(0.1).to_radians();
    let n = (2.0 * PI / step).ceil() as usize;
    (0..n)
        .map(|i| {
            let a = i as f64 * 2.0 * PI / n as f64;
            Vec3::new(center.x + radius * a.cos(), center.y + radius * a.sin(), center.z)
        })
        .collect()
}

/// Angular step keeping a circle of `radius` within `tolerance` of its chords.
fn tolerance_step_deg(radius: f64, tolerance: f64) -> f64 {
    if radius <= tolerance || tolerance <= 0.0 {
        return 5.0;
    }
    (2.0 * (1.0 - tolerance / radius).acos()).to_degrees()
}

fn square(center: Vec3, half: f64) -> Vec<Vec3> {
    [(1.0, 1.0), (-1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)]
        .iter()
        .map(|(sx, sy)| Vec3::new(center.x + sx * half, center.y + sy * half, center.z))
        .collect()
}

pub fn compute(aoi: &AreaOfInterest, plan_reference_alt: f64, opts: HullOptions) -> PlanResult<HullGeometry> {
    let (frame, corners) = local_frame(aoi, plan_reference_alt)?;
    let p = aoi.params();
    let width = p.corridor_width_m.max(0.0);
    let center = corners.first().copied().unwrap_or_else(Vec3::zeros);
    let mut corridor_length_m = 0.0;

    let (hull_local, area) = match aoi.plan_type {
        PlanType::Polygon
        | PlanType::City
        | PlanType::NoFlyZonePoly
        | PlanType::GeofencePoly
        | PlanType::Copter3d => {
            let area = polygon_signed_area(&corners).abs();
            (corners.clone(), area)
        }
        PlanType::Building => {
            let perimeter = crate::geometry::polyline_length_3d(&corners, true);
            let height = (p.crop_height_max_m - p.crop_height_min_m).max(0.0);
            let mut area = perimeter * height;
            if p.add_ceiling {
                area += polygon_signed_area(&corners).abs();
            }
            (corners.clone(), area)
        }
        PlanType::Corridor => {
            let helper = CorridorHelper::new(&corners, false);
            corridor_length_m = helper.center_length();
            let hull = helper.hull(-width / 2.0, width / 2.0);
            let area = polygon_signed_area(&hull).abs();
            (hull, area)
        }
        PlanType::Facade => {
            let helper = CorridorHelper::new(&corners, false);
            corridor_length_m = helper.center_length();
            let side = match p.facade_scanning_side {
                FacadeScanningSide::Left => -1.0,
                FacadeScanningSide::Right => 1.0,
            };
            let hull = helper.hull(0.0, side * opts.altitude_m.max(0.0));
            let height = (p.crop_height_max_m - p.crop_height_min_m).max(0.0);
            (hull, corridor_length_m * height)
        }
        PlanType::Windmill => {
            let radius = p.windmill.unlocked_radius();
            let hull = circle(center, radius, opts.angle_step_deg);
            let area = polygon_signed_area(&hull).abs();
            (hull, area)
        }
        PlanType::Tower => {
            let hull = circle(center, width, opts.angle_step_deg);
            let height = (p.crop_height_max_m - p.crop_height_min_m).max(0.0);
            let mut area = 2.0 * PI * width * height;
            if p.add_ceiling {
                area += PI * width * width;
            }
            (hull, area)
        }
        PlanType::Star
        | PlanType::Poi
        | PlanType::Panorama
        | PlanType::NoFlyZoneCirc
        | PlanType::GeofenceCirc => {
            let hull = circle(center, width, opts.angle_step_deg);
            let area = polygon_signed_area(&hull).abs();
            (hull, area)
        }
        PlanType::Spiral => {
            let step = match opts.line_spacing {
                Some(eff) if eff > 0.0 => tolerance_step_deg(width, eff * CROSS_TRACK_TOLERANCE),
                _ => opts.angle_step_deg,
            };
            let hull = circle(center, width, step);
            let area = polygon_signed_area(&hull).abs();
            (hull, area)
        }
        PlanType::Search => {
            let hull = square(center, width);
            (hull, 4.0 * width * width)
        }
        PlanType::TargetPoints => (corners.clone(), 0.0),
    };

    let (x, y, _) = bounds(&corners);
    Ok(HullGeometry {
        frame,
        corners_local: corners,
        hull_local,
        area_m2: area.max(0.0),
        corridor_length_m,
        length_x: x.size(),
        length_y: y.size(),
    })
}

/// Store a hull result on the AOI.
pub fn apply(aoi: &mut AreaOfInterest, geo: HullGeometry) {
    let hull = geo.hull_global();
    let d = &mut aoi.derived;
    d.hull = hull;
    d.hull_local = geo.hull_local;
    d.corners_local = geo.corners_local;
    d.area_m2 = geo.area_m2;
    d.corridor_length_m = geo.corridor_length_m;
    d.length_x = geo.length_x;
    d.length_y = geo.length_y;
    d.frame = Some(geo.frame);
}
