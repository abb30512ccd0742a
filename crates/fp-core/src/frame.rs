//! Geodetic ↔ local tangent-plane transforms.
//!
//! Horizontal coordinates are exact east/north offsets on the WGS84
//! ellipsoid (through ECEF), while heights are carried through unchanged as
//! meters above the plan reference altitude. That keeps every altitude in
//! the engine comparable without earth-curvature drift.

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::{Vec2, Vec3};

// WGS84 ellipsoid
pub const WGS84_A: f64 = 6_378_137.0;
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
pub const WGS84_E2: f64 = 2.0 * WGS84_F - WGS84_F * WGS84_F;

const ECEF_ITERATIONS: usize = 8;
const SURFACE_ITERATIONS: usize = 6;

/// A geodetic position. `alt` is meters; its datum depends on context
/// (plan reference points carry WGS84 height, everything else is relative
/// to the plan reference altitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: f64,
}

impl GeoPosition {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }
}

// ==== ECEF ====

/// Convert geodetic coordinates (degrees, meters) to ECEF.
pub fn lla_to_ecef(lat_deg: f64, lon_deg: f64, height_m: f64) -> Vec3 {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    Vec3::new(
        (n + height_m) * cos_lat * cos_lon,
        (n + height_m) * cos_lat * sin_lon,
        (n * (1.0 - WGS84_E2) + height_m) * sin_lat,
    )
}

/// Convert ECEF to geodetic (degrees, degrees, meters) by fixed-point
/// iteration on latitude.
pub fn ecef_to_lla(ecef: &Vec3) -> (f64, f64, f64) {
    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();
    let lon = ecef.y.atan2(ecef.x);

    if p < 1e-9 {
        // On the polar axis.
        let b = WGS84_A * (1.0 - WGS84_F);
        let lat = if ecef.z >= 0.0 { 90.0 } else { -90.0 };
        return (lat, lon.to_degrees(), ecef.z.abs() - b);
    }

    let mut lat = ecef.z.atan2(p * (1.0 - WGS84_E2));
    let mut height = 0.0;
    for _ in 0..ECEF_ITERATIONS {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        height = p / lat.cos() - n;
        lat = ecef.z.atan2(p * (1.0 - WGS84_E2 * n / (n + height)));
    }

    (lat.to_degrees(), lon.to_degrees(), height)
}

/// Rotation taking ECEF deltas into east/north/up at the given origin.
fn enu_rotation(lat_deg: f64, lon_deg: f64) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
    Matrix3::new(
        -sin_lon,
        cos_lon,
        0.0,
        -sin_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lat,
        cos_lat * cos_lon,
        cos_lat * sin_lon,
        sin_lat,
    )
}

// ==== Plan frame ====

/// Local tangent-plane frame centered at a plan reference point.
#[derive(Debug, Clone)]
pub struct CoordinateFrame {
    origin: GeoPosition,
    origin_ecef: Vec3,
    to_enu: Matrix3<f64>,
}

impl CoordinateFrame {
    /// Create a frame at `origin`. `origin.alt` is the WGS84 height of the
    /// reference point; local heights are relative to it.
    pub fn new(origin: GeoPosition) -> Self {
        Self {
            origin,
            origin_ecef: lla_to_ecef(origin.lat, origin.lon, origin.alt),
            to_enu: enu_rotation(origin.lat, origin.lon),
        }
    }

    pub fn origin(&self) -> &GeoPosition {
        &self.origin
    }

    /// Geodetic position (alt relative to the reference) → local meters.
    pub fn to_local(&self, pos: &GeoPosition) -> Vec3 {
        let ecef = lla_to_ecef(pos.lat, pos.lon, self.origin.alt);
        let enu = self.to_enu * (ecef - self.origin_ecef);
        Vec3::new(enu.x, enu.y, pos.alt)
    }

    /// Local meters → geodetic position (alt relative to the reference).
    ///
    /// Walks along the local up axis until the point sits on the reference
    /// height surface, so east/north round-trip exactly.
    pub fn to_global(&self, local: &Vec3) -> GeoPosition {
        let from_enu = self.to_enu.transpose();
        let mut up = -(local.x * local.x + local.y * local.y) / (2.0 * WGS84_A);
        let mut lat = self.origin.lat;
        let mut lon = self.origin.lon;

        for _ in 0..SURFACE_ITERATIONS {
            let ecef = self.origin_ecef + from_enu * Vector3::new(local.x, local.y, up);
            let (la, lo, h) = ecef_to_lla(&ecef);
            lat = la;
            lon = lo;
            let err = h - self.origin.alt;
            if err.abs() < 1e-7 {
                break;
            }
            up -= err;
        }

        GeoPosition::new(lat, lon, local.z)
    }
}

// ==== AOI frame ====

/// Per-AOI frame: tangent plane at the AOI's own reference point, rotated so
/// the x axis points along the scan heading, then shifted so the AOI's
/// corners start at the origin.
#[derive(Debug, Clone)]
pub struct AoiFrame {
    plane: CoordinateFrame,
    rotation: Rotation3<f64>,
    shift: Vec2,
}

impl AoiFrame {
    /// `scan_yaw_deg` is the compass heading of the scan lines.
    pub fn new(reference: GeoPosition, plan_reference_alt: f64, scan_yaw_deg: f64) -> Self {
        let origin = GeoPosition::new(reference.lat, reference.lon, plan_reference_alt);
        Self {
            plane: CoordinateFrame::new(origin),
            rotation: Rotation3::from_axis_angle(&Vector3::z_axis(), (scan_yaw_deg - 90.0).to_radians()),
            shift: Vec2::zeros(),
        }
    }

    /// Set the polygon-local offset subtracted after rotation.
    pub fn set_shift(&mut self, shift: Vec2) {
        self.shift = shift;
    }

    pub fn shift(&self) -> Vec2 {
        self.shift
    }

    pub fn to_local(&self, pos: &GeoPosition) -> Vec3 {
        let mut v = self.rotation * self.plane.to_local(pos);
        v.x -= self.shift.x;
        v.y -= self.shift.y;
        v
    }

    pub fn to_global(&self, local: &Vec3) -> GeoPosition {
        let unshifted = Vec3::new(local.x + self.shift.x, local.y + self.shift.y, local.z);
        let v = self.rotation.inverse() * unshifted;
        self.plane.to_global(&v)
    }
}
