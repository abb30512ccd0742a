//! Wind turbine parameters and the rigid transforms of its components.
//!
//! All transforms map plan-local coordinates into a component frame in
//! which the component is a cylinder standing on the xy plane along +z.
//! The same transforms place the blade inspection path, so the path and the
//! collision volumes always agree.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;

/// User-facing turbine description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindmillParams {
    pub tower_height_m: f64,
    pub tower_radius_m: f64,
    pub hub_radius_m: f64,
    pub hub_half_length_m: f64,
    /// Compass heading of the hub axis
    pub hub_yaw_deg: f64,
    pub number_of_blades: u32,
    pub blade_length_m: f64,
    /// Blade cross-section, wide side
    pub blade_radius_m: f64,
    /// Blade cross-section, thin side
    pub blade_thin_radius_m: f64,
    pub blade_pitch_deg: f64,
    pub blade_start_rotation_deg: f64,
    /// Distance from the blade root where inspection starts
    pub blade_start_length_m: f64,
    /// Rotor locked in place (components checked individually)
    pub locked: bool,
}

impl Default for WindmillParams {
    fn default() -> Self {
        Self {
            tower_height_m: 80.0,
            tower_radius_m: 2.0,
            hub_radius_m: 2.0,
            hub_half_length_m: 3.0,
            hub_yaw_deg: 0.0,
            number_of_blades: 3,
            blade_length_m: 40.0,
            blade_radius_m: 1.5,
            blade_thin_radius_m: 0.5,
            blade_pitch_deg: 0.0,
            blade_start_rotation_deg: 0.0,
            blade_start_length_m: 0.0,
            locked: true,
        }
    }
}

impl WindmillParams {
    /// Height of the rotor tip above the tower base.
    pub fn total_height(&self) -> f64 {
        self.tower_height_m + 2.0 * self.hub_radius_m + self.blade_length_m
    }

    /// Radius of a vertical cylinder around the tower containing the rotor
    /// at any rotation and pitch.
    pub fn unlocked_radius(&self) -> f64 {
        (self.hub_radius_m + self.blade_length_m).hypot(self.hub_half_length_m)
    }

    pub fn blade_rotation_step_deg(&self) -> f64 {
        360.0 / f64::from(self.number_of_blades.max(1))
    }
}

fn rot(axis: Vector3<f64>, deg: f64) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::identity(),
        UnitQuaternion::from_axis_angle(&nalgebra::Unit::new_normalize(axis), deg.to_radians()),
    )
}

fn shift(x: f64, y: f64, z: f64) -> Isometry3<f64> {
    Isometry3::translation(x, y, z)
}

/// Composite obstacle built from [`WindmillParams`] at a base position.
#[derive(Debug, Clone)]
pub struct WindmillGeometry {
    pub params: WindmillParams,
    /// Plan-local → tower frame (origin at the tower base)
    pub center: Isometry3<f64>,
    /// Plan-local → hub cylinder frame
    pub hub: Isometry3<f64>,
    /// Plan-local → blade cylinder frames, one per blade
    pub blades: Vec<Isometry3<f64>>,
    /// Same as `blades` without the pitch twist
    pub blades_no_twist: Vec<Isometry3<f64>>,
    pub clearance: f64,
}

impl WindmillGeometry {
    /// `base` is the tower base in plan-local coordinates; `clearance`
    /// enlarges the hub cylinder along its axis.
    pub fn new(params: &WindmillParams, base: Vec3, clearance: f64) -> Self {
        let p = params;
        let center = shift(-base.x, -base.y, -base.z);
        let hub_center = shift(0.0, 0.0, -(p.tower_height_m + p.hub_radius_m))
            * rot(Vector3::z(), 90.0 - p.hub_yaw_deg)
            * center;

        let hub = shift(0.0, 0.0, p.hub_half_length_m + clearance) * rot(Vector3::y(), -90.0) * hub_center;

        let rotor_plane = shift(p.hub_half_length_m - p.blade_radius_m, 0.0, 0.0) * hub_center;
        let mut blades = Vec::with_capacity(p.number_of_blades as usize);
        let mut blades_no_twist = Vec::with_capacity(p.number_of_blades as usize);
        let mut rotation = p.blade_start_rotation_deg;
        for _ in 0..p.number_of_blades {
            let root = shift(0.0, 0.0, -p.hub_radius_m) * rot(Vector3::x(), rotation) * rotor_plane;
            blades.push(rot(Vector3::z(), p.blade_pitch_deg) * root);
            blades_no_twist.push(root);
            rotation -= p.blade_rotation_step_deg();
        }

        Self {
            params: params.clone(),
            center,
            hub,
            blades,
            blades_no_twist,
            clearance,
        }
    }

    /// Map a point given in blade `index`'s frame back to plan-local.
    pub fn blade_to_local(&self, index: usize, p: &Vec3, twisted: bool) -> Option<Vec3> {
        let tf = if twisted {
            self.blades.get(index)?
        } else {
            self.blades_no_twist.get(index)?
        };
        Some(tf.inverse_transform_point(&(*p).into()).coords)
    }
}
