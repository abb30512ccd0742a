//! Wind turbine inspection: hub front plus four faces per blade.
//!
//! Blade columns are built in the blade frame (blade axis along +z, z = 0 at
//! the hub surface) and mapped back through the same transforms the
//! collision checker uses.

use std::f64::consts::PI;

use nalgebra::{Point3, Vector3};

use crate::geometry::Vec3;
use crate::models::{FlightLine, LinePoint};
use crate::windmill::WindmillGeometry;

use super::LineInput;

struct BladeFrame<'g> {
    geo: &'g WindmillGeometry,
    index: usize,
}

impl BladeFrame<'_> {
    fn to_local(&self, p: Vec3) -> Option<Vec3> {
        self.geo.blade_to_local(self.index, &p, true)
    }
}

/// Camera position on the blade face at angle `phi`, looking at the axis.
fn face_point(frame: &BladeFrame<'_>, input: &LineInput<'_>, radius: f64, phi: f64, z: f64) -> Option<LinePoint> {
    let pos = frame.to_local(Vec3::new(radius * phi.cos(), radius * phi.sin(), z))?;
    let target = frame.to_local(Vec3::new(0.0, 0.0, z))?;
    Some(LinePoint::oriented(pos, input.look_at(&pos, &target)))
}

fn heights(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if stop <= start {
        return vec![start];
    }
    let n = ((stop - start) / step).ceil().max(1.0) as usize;
    (0..=n).map(|k| start + (stop - start) * k as f64 / n as f64).collect()
}

fn blade_line(geo: &WindmillGeometry, index: usize, input: &LineInput<'_>) -> Vec<LinePoint> {
    let wp = &geo.params;
    let cam = &input.hw.camera;
    let dist = input.altitude;
    let eff = input.sizes.size_in_flight_eff.max(0.1);
    let wide = dist + wp.blade_radius_m + cam.offset_to_tail_m;
    let thin = wide - wp.blade_radius_m + wp.blade_thin_radius_m;
    let start = wp.blade_start_length_m.max(0.0);
    let stop = wp.blade_length_m;
    let zs = heights(start, stop, eff);
    let frame = BladeFrame { geo, index };

    let mut pts = Vec::new();
    for k in 0..4 {
        let phi = k as f64 * PI / 2.0;
        let radius = if k % 2 == 0 { wide } else { thin };
        let up = k % 2 == 0;
        let column: Vec<f64> = if up { zs.clone() } else { zs.iter().rev().copied().collect() };
        pts.extend(column.iter().filter_map(|&z| face_point(&frame, input, radius, phi, z)));

        if k == 0 {
            // over the tip, looking back down the blade axis
            if let (Some(pos), Some(target)) = (
                frame.to_local(Vec3::new(0.0, 0.0, stop + dist)),
                frame.to_local(Vec3::new(0.0, 0.0, stop)),
            ) {
                pts.push(LinePoint::oriented(pos, input.look_at(&pos, &target)));
            }
        } else if k < 3 {
            let z = if up { stop } else { start };
            let mid = phi + PI / 4.0;
            pts.extend(face_point(&frame, input, (wide + thin) / 2.0, mid, z));
        }
    }
    pts
}

/// Three shots across the hub front, parallel to the hub axis.
fn hub_line(geo: &WindmillGeometry, input: &LineInput<'_>) -> Vec<LinePoint> {
    let wp = &geo.params;
    let Some(rotor) = geo.blade_to_local(0, &Vec3::new(0.0, 0.0, -wp.hub_radius_m), false) else {
        return Vec::new();
    };
    let hub_center = geo
        .hub
        .inverse_transform_point(&Point3::new(0.0, 0.0, wp.hub_half_length_m + geo.clearance))
        .coords;
    let mut front = rotor - hub_center;
    front.z = 0.0;
    if front.norm() < 1e-6 {
        front = -geo.hub.inverse_transform_vector(&Vector3::z());
        front.z = 0.0;
    }
    if front.norm() < 1e-6 {
        return Vec::new();
    }
    let front = front.normalize();
    let side = Vec3::new(-front.y, front.x, 0.0);
    let lateral = wp.hub_radius_m * (PI / f64::from(wp.number_of_blades.max(1))).tan().abs();
    let dist = input.altitude + input.hw.camera.offset_to_tail_m;

    [-lateral, 0.0, lateral]
        .iter()
        .map(|&off| {
            let target = rotor + side * off;
            let pos = target + front * dist;
            LinePoint::oriented(pos, input.look_at(&pos, &target))
        })
        .collect()
}

pub fn blades(input: &LineInput<'_>) -> Vec<FlightLine> {
    let Some(base) = input.corners.first() else {
        return Vec::new();
    };
    let geo = WindmillGeometry::new(&input.params.windmill, *base, 0.0);
    let mut lines = Vec::new();
    let hub = hub_line(&geo, input);
    if !hub.is_empty() {
        lines.push(FlightLine::oriented(hub, 0));
    }
    for i in 0..geo.blades.len() {
        let pts = blade_line(&geo, i, input);
        if !pts.is_empty() {
            lines.push(FlightLine::oriented(pts, lines.len()));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::ScanSizes;
    use crate::hardware::HardwareConfiguration;
    use crate::models::{AoiParameters, PlanType};

    #[test]
    fn test_blade_points_keep_stand_off() {
        let params = AoiParameters::default();
        let corners = vec![Vec3::zeros()];
        let sizes = ScanSizes {
            size_in_flight_eff: 5.0,
            size_parallel_eff: 5.0,
            ..Default::default()
        };
        let hw = HardwareConfiguration::default();
        let input = LineInput {
            plan_type: PlanType::Windmill,
            params: &params,
            corners: &corners,
            sizes: &sizes,
            altitude: 8.0,
            length_x: 0.0,
            length_y: 0.0,
            hw: &hw,
            scan_yaw: 90.0,
            prev: None,
            next: None,
        };
        let lines = blades(&input);
        // hub plus one line per blade
        assert_eq!(lines.len(), 1 + params.windmill.number_of_blades as usize);

        let geo = WindmillGeometry::new(&params.windmill, Vec3::zeros(), 0.0);
        for lp in &lines[1].points {
            let in_blade = geo.blades[0].transform_point(&lp.pos.into()).coords;
            let radial = in_blade.xy().norm();
            assert!(radial >= 8.0 + params.windmill.blade_thin_radius_m - 1e-6 || in_blade.z > params.windmill.blade_length_m);
        }
    }
}
