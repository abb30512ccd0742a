//! Patterns flown at one altitude over the ground: raster grids, corridor
//! strips, spirals, the search square and the star.

use std::f64::consts::PI;

use crate::corridor::CorridorHelper;
use crate::error::{PlanResult, RecomputeError};
use crate::geometry::{band_intersections_x, band_intersections_y, bounds, MinMax, Vec3};
use crate::hull::{circle, CROSS_TRACK_TOLERANCE};
use crate::models::FlightLine;

use super::LineInput;

/// Inner radius where a spiral hands over to raster lines.
pub const MIN_RADIUS_SPIRAL: f64 = 150.0;

fn flight_z(input: &LineInput<'_>) -> f64 {
    input.base_z() + input.altitude
}

fn lift(points: Vec<Vec3>, z: f64) -> Vec<Vec3> {
    points.into_iter().map(|p| Vec3::new(p.x, p.y, z)).collect()
}

fn set_z(line: &mut FlightLine, z: f64) {
    for p in &mut line.points {
        p.pos.z = z;
    }
}

/// Parallel lines over `polygon`, one every parallel spacing, swept from the
/// high cross-track side down. `rot90` lines run along y.
fn raster_pass(input: &LineInput<'_>, polygon: &[Vec3], rot90: bool, first_index: usize) -> Vec<FlightLine> {
    let s = input.sizes;
    let eff = s.size_parallel_eff;
    let mut lines = Vec::new();
    if eff <= 0.0 || polygon.len() < 3 {
        return lines;
    }
    let (xr, yr, _) = bounds(polygon);
    let cross = if rot90 { xr } else { yr };
    let min_c = cross.min - s.overshoot_parallel;
    let max_c = cross.max + s.overshoot_parallel;
    let span = max_c - min_c;
    let n = (span / eff).ceil().max((s.size_parallel / eff).round()).max(1.0) as usize;
    let offset = ((n - 1) as f64 * eff - span) / 2.0;

    let z = flight_z(input);
    let mut c = max_c + offset;
    for _ in 0..n {
        let mut band = if rot90 {
            band_intersections_y(polygon, c, eff)
        } else {
            band_intersections_x(polygon, c, eff)
        };
        if band.is_valid() {
            band.widen(s.overshoot_total_lines_end);
            let mut line = FlightLine::raster(c, band, first_index + lines.len(), rot90);
            set_z(&mut line, z);
            lines.push(line);
        }
        c -= eff;
    }
    lines
}

pub fn polygon(input: &LineInput<'_>) -> PlanResult<Vec<FlightLine>> {
    let lines = raster_pass(input, input.corners, false, 0);
    if lines.is_empty() {
        return Err(RecomputeError::AreaTooSmall);
    }
    Ok(lines)
}

/// Two perpendicular raster passes; line numbers restart for the second.
pub fn city(input: &LineInput<'_>) -> PlanResult<Vec<FlightLine>> {
    let mut lines = raster_pass(input, input.corners, false, 0);
    let cross = raster_pass(input, input.corners, true, 0);
    if lines.is_empty() && cross.is_empty() {
        return Err(RecomputeError::AreaTooSmall);
    }
    lines.extend(cross);
    Ok(lines)
}

pub fn corridor(input: &LineInput<'_>) -> PlanResult<Vec<FlightLine>> {
    let s = input.sizes;
    let p = input.params;
    let eff = s.size_parallel_eff;
    let helper = CorridorHelper::new(input.corners, false);
    if !helper.is_valid() || eff <= 0.0 {
        return Err(RecomputeError::AreaTooSmall);
    }
    let needed = ((2.0 * s.overshoot_parallel + p.corridor_width_m) / eff).ceil().max(0.0) as usize;
    let n = (p.corridor_min_lines as usize).max(1 + needed);
    let extend = s.overshoot_total_lines_end + s.centrency_in_flight;
    let z = flight_z(input);

    let lines = (0..n)
        .map(|i| {
            let shift = -eff * (i as f64 - (n - 1) as f64 / 2.0);
            let mut line = FlightLine::path(lift(helper.shifted(shift), z), i, shift, false);
            line.linear = true;
            line.enlarge(extend, extend);
            line
        })
        .filter(|l| l.points.len() >= 2)
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return Err(RecomputeError::AreaTooSmall);
    }
    Ok(lines)
}

/// Arms through the center every `max(yaw, 1)` degrees.
pub fn star(input: &LineInput<'_>) -> Vec<FlightLine> {
    let w = input.params.corridor_width_m;
    let step = input.params.yaw_deg.max(1.0);
    let z = flight_z(input);
    let mut points = Vec::new();
    let mut yaw: f64 = 0.0;
    while yaw < 180.0 {
        let r = yaw.to_radians();
        let v = Vec3::new(w * r.sin(), w * r.cos(), z);
        points.push(v);
        points.push(Vec3::new(-v.x, -v.y, z));
        points.push(v);
        yaw += step;
    }
    let mut line = FlightLine::path(points, 0, 0.0, true);
    line.linear = true;
    vec![line]
}

/// Square spiral growing one line spacing per side.
pub fn search(input: &LineInput<'_>) -> Vec<FlightLine> {
    let p = input.params;
    let eff = input.sizes.size_parallel_eff.max(1e-3);
    let w = p.corridor_width_m;
    let s = if p.circle_left { 1.0 } else { -1.0 };
    let circles = ((w - 0.5 * eff) / eff).ceil().max(1.0) as usize;
    let z = flight_z(input);

    let mut points = vec![Vec3::new(0.0, 0.0, z)];
    for c in 1..=circles {
        let r = c as f64 * eff;
        points.push(Vec3::new(r, -s * (r - eff), z));
        points.push(Vec3::new(r, s * r, z));
        points.push(Vec3::new(-r, s * r, z));
        points.push(Vec3::new(-r, -s * r, z));
    }
    let outer = circles as f64 * eff;
    points.push(Vec3::new(outer, -s * outer, z));

    let mut line = FlightLine::path(points, 0, 0.0, false);
    line.linear = true;
    vec![line]
}

/// Archimedean spiral sampled within the cross-track tolerance.
fn spiral_arm(a: f64, r_start: f64, phi_end: Option<f64>, r_max: f64, phase: f64, eff: f64, z: f64) -> (Vec<Vec3>, f64) {
    let mut points = Vec::new();
    let mut phi = r_start / a;
    let offset = phase - phi;
    loop {
        let r = phi * a;
        let done = match phi_end {
            Some(end) => phi > end,
            None => r > r_max,
        };
        if done || r <= 0.0 {
            break;
        }
        let angle = phi + offset;
        points.push(Vec3::new(r * angle.sin(), r * angle.cos(), z));
        let cos_half = (1.0 - eff * CROSS_TRACK_TOLERANCE / r).clamp(-1.0, 1.0);
        phi += (2.0 * cos_half.acos()).max(1e-3);
    }
    (points, phi)
}

pub fn spiral(input: &LineInput<'_>) -> PlanResult<Vec<FlightLine>> {
    let s = input.sizes;
    let p = input.params;
    let eff = s.size_parallel_eff;
    if eff <= 0.0 {
        return Err(RecomputeError::AreaTooSmall);
    }
    let w = p.corridor_width_m;
    let z = flight_z(input);
    let mut a = eff / (2.0 * PI);
    if !p.single_direction {
        a *= 2.0;
    }
    let r_min = MIN_RADIUS_SPIRAL.min(w);

    // inner disc as raster lines
    let inner = circle(Vec3::new(0.0, 0.0, z), r_min, 5.0);
    let mut lines: Vec<FlightLine> = raster_pass(input, &inner, false, 0)
        .into_iter()
        .filter_map(|mut l| {
            let mut span = MinMax::new(l.points[0].pos.x, l.points[1].pos.x);
            span.widen(-s.overshoot_total_lines_end - eff / 2.0 + s.overshoot_inner_lines_end);
            if !span.is_valid() || span.size() <= 0.0 {
                return None;
            }
            l.points[0].pos.x = span.min;
            l.points[1].pos.x = span.max;
            Some(l)
        })
        .collect();

    let (outward, phi_end) = spiral_arm(a, r_min, None, w, 0.0, eff, z);
    if outward.len() >= 2 {
        let mut line = FlightLine::path(outward, lines.len(), 0.0, false);
        line.linear = true;
        lines.push(line);
    }
    if !p.single_direction {
        let (mut inward, _) = spiral_arm(a, r_min, Some(phi_end - PI), w, PI, eff, z);
        inward.reverse();
        if inward.len() >= 2 {
            let mut line = FlightLine::path(inward, lines.len(), 0.0, false);
            line.linear = true;
            lines.push(line);
        }
    }
    if lines.is_empty() {
        return Err(RecomputeError::AreaTooSmall);
    }
    Ok(lines)
}
