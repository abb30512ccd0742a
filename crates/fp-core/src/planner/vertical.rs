//! Structure patterns: buildings, facades, towers and orbits around a point.
//!
//! Vertical patterns place "stations" around the object at the stand-off
//! distance and stack a column of images above each station. Columns are
//! sorted by the scan-start heuristic and then cut into flight lines either
//! per column (up/down) or per height row (left/right).

use std::f64::consts::PI;

use crate::corridor::CorridorHelper;
use crate::geometry::{
    band_intersections_x, bounds, normalize_deg, point_in_polygon, polygon_signed_area, segment_intersection,
    Vec3,
};
use crate::models::{
    FacadeScanningSide, FlightLine, LinePoint, Orientation, PlanType, ScanDirection, StartCaptureVertically,
    VerticalScanPattern,
};

use super::LineInput;

/// Distance kept between the no-go outline and the clamp path.
const SAFETY_EXTRA_M: f64 = 1.2;

/// A horizontal camera position and the object point it looks at.
#[derive(Debug, Clone, Copy)]
struct Station {
    pos: Vec3,
    target: Vec3,
    yaw: f64,
}

/// Outline of the scanned object with the drone-side offsets.
struct StructurePath {
    path: Vec<Vec3>,
    closed: bool,
    /// Lateral shift direction pointing away from the object
    sign: f64,
    no_go: Vec<Vec3>,
    safety: Vec<Vec3>,
    helper: CorridorHelper,
}

fn stand_off(input: &LineInput<'_>) -> f64 {
    let p = input.params;
    input
        .altitude
        .min(p.max_object_distance_m)
        .max(p.min_object_distance_m)
}

fn left_normal(d: &Vec3) -> Vec3 {
    let len = d.xy().norm();
    Vec3::new(-d.y / len, d.x / len, 0.0)
}

fn building_path(input: &LineInput<'_>) -> StructurePath {
    let p = input.params;
    let base = input.base_z();
    let mut circle_left = p.circle_left;
    if p.start_capture_vertically == StartCaptureVertically::Up {
        circle_left = !circle_left;
    }
    let mut path: Vec<Vec3> = input.corners.iter().map(|c| Vec3::new(c.x, c.y, base)).collect();
    let mut sign = if polygon_signed_area(&path) > 0.0 { -1.0 } else { 1.0 };
    if circle_left == (sign > 0.0) {
        path.reverse();
        sign = -sign;
    }
    let helper = CorridorHelper::new(&path, true);
    let safety = helper.shifted(sign * (p.min_object_distance_m + SAFETY_EXTRA_M));
    let no_go = helper.shifted(sign * p.min_object_distance_m);
    StructurePath {
        path: helper.center_path().to_vec(),
        closed: true,
        sign,
        no_go,
        safety,
        helper,
    }
}

fn facade_path(input: &LineInput<'_>) -> StructurePath {
    let p = input.params;
    let s = input.sizes;
    let base = input.base_z();
    let sign = match p.facade_scanning_side {
        FacadeScanningSide::Left => -1.0,
        FacadeScanningSide::Right => 1.0,
    };
    let mut line = FlightLine::path(
        input.corners.iter().map(|c| Vec3::new(c.x, c.y, base)).collect(),
        0,
        0.0,
        false,
    );
    line.enlarge(
        s.overshoot_parallel - s.centrency_parallel,
        s.overshoot_parallel + s.centrency_parallel,
    );
    let path = line.positions();
    let helper = CorridorHelper::new(&path, false);
    let safety = helper.shifted(sign * (p.min_object_distance_m + SAFETY_EXTRA_M));
    let no_go = helper.hull(-sign * 0.02, sign * p.min_object_distance_m);
    StructurePath {
        path: helper.center_path().to_vec(),
        closed: false,
        sign,
        no_go,
        safety,
        helper,
    }
}

/// Number of crossings of `from → to` with the object outline.
fn crossings(sp: &StructurePath, from: &Vec3, to: &Vec3) -> usize {
    let n = sp.path.len();
    let segs = if sp.closed { n } else { n.saturating_sub(1) };
    (0..segs)
        .filter(|&i| {
            let a = sp.path[i];
            let b = sp.path[(i + 1) % n];
            segment_intersection(&from.xy(), &to.xy(), &a.xy(), &b.xy()).is_some()
        })
        .count()
}

fn is_legal(sp: &StructurePath, pos: &Vec3, target: &Vec3) -> bool {
    if point_in_polygon(pos.x, pos.y, &sp.no_go) {
        return false;
    }
    // aim slightly in front of the wall so the hit wall itself does not count
    let toward = pos - target;
    let aim = if toward.xy().norm() > 1e-9 {
        target + toward.normalize() * 0.05
    } else {
        *target
    };
    crossings(sp, pos, &aim) == 0
}

/// Move an illegal station onto the safety path, keeping its distance to the
/// target when a circle intersection exists.
fn clamp_to_safety(sp: &StructurePath, pos: &Vec3, target: &Vec3, dist: f64, normal: &Vec3) -> Option<Vec3> {
    let mut best: Option<(f64, Vec3)> = None;
    for w in sp.safety.windows(2) {
        let (a, b) = (w[0], w[1]);
        let d = b - a;
        let f = a - target;
        let qa = d.xy().norm_squared();
        if qa < 1e-12 {
            continue;
        }
        let qb = 2.0 * f.xy().dot(&d.xy());
        let qc = f.xy().norm_squared() - dist * dist;
        let disc = qb * qb - 4.0 * qa * qc;
        if disc < 0.0 {
            continue;
        }
        for t in [(-qb - disc.sqrt()) / (2.0 * qa), (-qb + disc.sqrt()) / (2.0 * qa)] {
            if !(0.0..=1.0).contains(&t) {
                continue;
            }
            let cand = Vec3::new(a.x + d.x * t, a.y + d.y * t, pos.z);
            let dir = cand - target;
            let score = dir.xy().normalize().dot(&normal.xy());
            if crossings(sp, &cand, target) <= 1 && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, cand));
            }
        }
    }
    if let Some((_, p)) = best {
        return Some(p);
    }

    // nearest point on the safety path
    let mut nearest: Option<(f64, Vec3)> = None;
    for w in sp.safety.windows(2) {
        let (a, b) = (w[0], w[1]);
        let d = (b - a).xy();
        let len2 = d.norm_squared();
        let t = if len2 < 1e-12 { 0.0 } else { ((pos - a).xy().dot(&d) / len2).clamp(0.0, 1.0) };
        let cand = Vec3::new(a.x + d.x * t, a.y + d.y * t, pos.z);
        let dd = (cand - pos).xy().norm();
        if nearest.map_or(true, |(n, _)| dd < n) {
            nearest = Some((dd, cand));
        }
    }
    nearest.map(|(_, p)| p)
}

fn yaw_diff(a: f64, b: f64) -> f64 {
    normalize_deg(a - b).abs()
}

/// Stations along the object outline, refined so consecutive yaws never
/// differ by more than the allowed rotation.
fn stations(sp: &StructurePath, input: &LineInput<'_>) -> Vec<Station> {
    let p = input.params;
    let eff_par = input.sizes.size_parallel_eff.max(0.1);
    let max_yaw = p.max_yaw_roll_change_deg.max(1.0);
    let dist = stand_off(input);
    let n = sp.path.len();
    if n < 2 {
        return Vec::new();
    }
    let segs = if sp.closed { n } else { n - 1 };

    let seg_out = |i: usize| -> Option<Vec3> {
        let a = sp.path[i % n];
        let b = sp.path[(i + 1) % n];
        let d = b - a;
        (d.xy().norm() > 1e-9).then(|| left_normal(&d) * sp.sign)
    };
    let seg_yaw = |out: &Vec3| input.heading(&-out);

    let mut out = Vec::new();
    for i in 0..segs {
        let Some(normal) = seg_out(i) else { continue };
        let a = sp.path[i];
        let b = sp.path[(i + 1) % n];
        let d = b - a;
        let yaw = seg_yaw(&normal);
        let sub = (d.xy().norm() / eff_par).ceil().max(1.0) as usize;

        let prev = if sp.closed || i > 0 { seg_out((i + segs - 1) % segs) } else { None };
        let next = if sp.closed || i + 1 < segs { seg_out((i + 1) % segs) } else { None };
        let include_end = match next {
            None => true,
            Some(nn) => yaw_diff(seg_yaw(&nn), yaw) > max_yaw,
        };
        let count = if include_end { sub + 1 } else { sub };

        for k in 0..count {
            let target = a + d * (k as f64 / sub as f64);
            let mut dir = normal;
            if k == 0 {
                if let Some(pn) = prev {
                    if yaw_diff(seg_yaw(&pn), yaw) <= max_yaw {
                        let avg = pn + normal;
                        if avg.norm() > 1e-9 {
                            dir = avg.normalize();
                        }
                    }
                }
            }
            let mut pos = target + dir * dist;
            if !is_legal(sp, &pos, &target) {
                match clamp_to_safety(sp, &pos, &target, dist, &dir) {
                    Some(c) => pos = c,
                    None => continue,
                }
            }
            let view = target - pos;
            let yaw = if view.xy().norm() > 1e-9 { input.heading(&view) } else { yaw };
            out.push(Station { pos, target, yaw });
        }
    }
    refine_yaw(out, sp.closed, max_yaw)
}

fn refine_yaw(stations: Vec<Station>, closed: bool, max_yaw: f64) -> Vec<Station> {
    let n = stations.len();
    if n < 2 {
        return stations;
    }
    let mut out = Vec::with_capacity(n);
    let pairs = if closed { n } else { n - 1 };
    for i in 0..n {
        out.push(stations[i]);
        if i >= pairs {
            continue;
        }
        let a = stations[i];
        let b = stations[(i + 1) % n];
        let delta = normalize_deg(b.yaw - a.yaw);
        let steps = (delta.abs() / max_yaw).ceil() as usize;
        for j in 1..steps {
            let t = j as f64 / steps as f64;
            out.push(Station {
                pos: a.pos + (b.pos - a.pos) * t,
                target: a.target + (b.target - a.target) * t,
                yaw: a.yaw + delta * t,
            });
        }
    }
    out
}

/// Image column above one station, bottom to top.
fn column(st: &Station, input: &LineInput<'_>, alt_min: f64, alt_max: f64) -> Vec<LinePoint> {
    let p = input.params;
    let eff = input.sizes.size_in_flight_eff.max(0.1);
    let base = input.base_z();
    let dist = stand_off(input);
    let level = 90.0 + p.camera_pitch_offset_deg;
    let mut pts = vec![LinePoint::oriented(
        Vec3::new(st.pos.x, st.pos.y, base + alt_min),
        Orientation::new(0.0, level, st.yaw),
    )];

    // ground strip below the lowest legal height is shot looking down
    let crop_to_ground = p.min_ground_distance_m - p.crop_height_min_m;
    if crop_to_ground > 0.0 {
        let steps = (crop_to_ground / eff).ceil() as usize;
        let step_size = eff / (steps as f64 + 1.0);
        let toward = (st.target - st.pos).xy();
        let toward = if toward.norm() > 1e-9 { toward.normalize() } else { toward };
        for j in 0..steps {
            let h = p.min_ground_distance_m + step_size * (j as f64 + 1.0);
            let aim = p.crop_height_min_m + eff * j as f64;
            let pitch = dist.atan2(h - aim);
            let shift = dist * (1.0 - pitch.sin());
            pts.push(LinePoint::oriented(
                Vec3::new(st.pos.x + toward.x * shift, st.pos.y + toward.y * shift, base + h),
                Orientation::new(0.0, pitch.to_degrees(), st.yaw),
            ));
        }
    }

    let d_alt = alt_max - alt_min - eff;
    if d_alt >= -1e-9 {
        let steps = if d_alt > 0.0 { (d_alt / eff).ceil() as usize } else { 0 };
        let step_alt = if steps > 0 { d_alt / steps as f64 } else { 0.0 };
        for k in 0..=steps {
            let z = alt_min + eff + k as f64 * step_alt;
            pts.push(LinePoint::oriented(
                Vec3::new(st.pos.x, st.pos.y, base + z),
                Orientation::new(0.0, level, st.yaw),
            ));
        }
    }
    pts
}

fn column_heights(input: &LineInput<'_>) -> (f64, f64) {
    let p = input.params;
    let alt_min = p
        .crop_height_min_m
        .max(p.min_ground_distance_m)
        .max(input.hw.platform.min_ground_distance_m);
    let mut alt_max = p.crop_height_max_m;
    if !p.add_ceiling {
        alt_max += input.sizes.overshoot_total_lines_end;
    }
    (alt_min, alt_max)
}

/// Rotate or flip columns so scanning starts at the preferred end.
fn sort_columns(columns: &mut [Vec<LinePoint>], input: &LineInput<'_>) {
    let p = input.params;
    let n = columns.len();
    if n == 0 {
        return;
    }
    let facade = input.plan_type == PlanType::Facade;
    match p.scan_direction {
        ScanDirection::FromStarting | ScanDirection::TowardLanding => {
            let from_start = p.scan_direction == ScanDirection::FromStarting;
            let reference = if from_start { input.prev } else { input.next };
            let Some(reference) = reference else { return };
            let idx = columns
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.first().map(|lp| (i, (lp.pos - reference).norm())))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map_or(0, |(i, _)| i);
            if facade {
                let keep = (idx <= n / 2 && from_start) || (idx > n / 2 && !from_start);
                if !keep {
                    columns.reverse();
                }
            } else {
                columns.rotate_left(idx);
            }
        }
        ScanDirection::Custom => {}
        ScanDirection::Left if p.facade_scanning_side == FacadeScanningSide::Left => {}
        ScanDirection::Right if p.facade_scanning_side == FacadeScanningSide::Right => {}
        _ => columns.reverse(),
    }
}

/// Cut sorted columns into flight lines per the vertical scan pattern.
fn make_flight_lines(columns: Vec<Vec<LinePoint>>, input: &LineInput<'_>, first_index: usize) -> Vec<FlightLine> {
    let p = input.params;
    match p.vertical_scan_pattern {
        VerticalScanPattern::UpDown => columns
            .into_iter()
            .enumerate()
            .filter(|(_, c)| !c.is_empty())
            .map(|(i, mut c)| {
                if i % 2 == 0 {
                    c.reverse();
                }
                FlightLine::oriented(c, first_index + i)
            })
            .collect(),
        VerticalScanPattern::LeftRight => {
            let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
            (0..rows)
                .map(|r| {
                    let mut row: Vec<LinePoint> = columns.iter().filter_map(|c| c.get(r).copied()).collect();
                    if input.plan_type == PlanType::Facade && r % 2 == 1 {
                        row.reverse();
                    }
                    FlightLine::oriented(row, first_index + r)
                })
                .filter(|l| !l.points.is_empty())
                .collect()
        }
    }
}

/// Points every line spacing along a path, with a level-to-down tilt.
fn sample_path(path: &[Vec3], closed: bool, out_sign: f64, z: f64, pitch: f64, input: &LineInput<'_>) -> Vec<LinePoint> {
    let eff_par = input.sizes.size_parallel_eff.max(0.1);
    let n = path.len();
    let mut pts = Vec::new();
    if n < 2 {
        return pts;
    }
    let segs = if closed { n } else { n - 1 };
    for i in 0..segs {
        let a = path[i];
        let b = path[(i + 1) % n];
        let d = b - a;
        if d.xy().norm() < 1e-9 {
            continue;
        }
        let yaw = input.heading(&-(left_normal(&d) * out_sign));
        let sub = (d.xy().norm() / eff_par).ceil().max(1.0) as usize;
        let count = if !closed && i + 1 == segs { sub + 1 } else { sub };
        for k in 0..count {
            let q = a + d * (k as f64 / sub as f64);
            pts.push(LinePoint::oriented(Vec3::new(q.x, q.y, z), Orientation::new(0.0, pitch, yaw)));
        }
    }
    pts
}

fn tilt_steps(input: &LineInput<'_>) -> (usize, f64) {
    let p = input.params;
    let total = 90.0 + p.camera_pitch_offset_deg;
    if total <= 0.0 {
        return (0, 0.0);
    }
    let steps = (total / p.max_pitch_change_deg.max(1.0)).ceil().max(1.0) as usize;
    (steps, total / steps as f64)
}

/// Tilt rings above the crop height, stepping the camera from level to down.
fn ceiling_rings(sp: &StructurePath, input: &LineInput<'_>, last: Option<Vec3>, first_index: usize) -> Vec<FlightLine> {
    let p = input.params;
    let facade = !sp.closed;
    let dist = stand_off(input);
    let base = input.base_z();
    let (steps, step_deg) = tilt_steps(input);
    let rings = if facade { steps + 1 } else { steps };
    let mut last = last;
    let mut lines = Vec::new();

    for s in 1..rings {
        let tilt = (s as f64 * step_deg).to_radians();
        let z = base + p.crop_height_max_m + dist * tilt.sin();
        let mut ring = sp.helper.shifted(sp.sign * dist * tilt.cos());
        if sp.closed && ring.len() > 1 && (ring[0] - ring[ring.len() - 1]).xy().norm() < 1e-9 {
            ring.pop();
        }
        let mut pts = sample_path(&ring, sp.closed, sp.sign, z, 90.0 - tilt.to_degrees(), input);
        if pts.is_empty() {
            continue;
        }
        if let Some(l) = last {
            if facade {
                let d_start = (pts[0].pos - l).norm();
                let d_end = (pts[pts.len() - 1].pos - l).norm();
                if d_end < d_start {
                    pts.reverse();
                }
            } else {
                let best = pts
                    .iter()
                    .enumerate()
                    .min_by(|a, b| (a.1.pos - l).norm().total_cmp(&(b.1.pos - l).norm()))
                    .map_or(0, |(i, _)| i);
                pts.rotate_left(best);
            }
        }
        last = pts.last().map(|lp| lp.pos);
        lines.push(FlightLine::oriented(pts, first_index + lines.len()));
    }
    lines
}

/// Nadir raster over the roof at stand-off height.
fn roof_raster(outline: &[Vec3], input: &LineInput<'_>, index: usize) -> Option<FlightLine> {
    let p = input.params;
    let eff_par = input.sizes.size_parallel_eff.max(0.1);
    let eff_if = input.sizes.size_in_flight_eff.max(0.1);
    let (_, yr, _) = bounds(outline);
    if !yr.is_valid() {
        return None;
    }
    let n = (yr.size() / eff_par).round().max(1.0) as usize;
    let step_y = yr.size() / n as f64;
    let z = input.base_z() + p.crop_height_max_m + stand_off(input);

    let mut pts = Vec::new();
    for line_no in 0..=n {
        let y = yr.min + line_no as f64 * step_y;
        let band = band_intersections_x(outline, y, step_y / 2.0);
        if !band.is_valid() {
            continue;
        }
        let imgs = (band.size() / eff_if).ceil().max(1.0) as usize;
        let forward = line_no % 2 == 0;
        let yaw = input.heading(&Vec3::new(if forward { 1.0 } else { -1.0 }, 0.0, 0.0));
        for k in 0..=imgs {
            let t = k as f64 / imgs as f64;
            let x = if forward { band.min + t * band.size() } else { band.max - t * band.size() };
            pts.push(LinePoint::oriented(Vec3::new(x, y, z), Orientation::new(0.0, 0.0, yaw)));
        }
    }
    (!pts.is_empty()).then(|| FlightLine::oriented(pts, index))
}

fn structure_lines(sp: StructurePath, input: &LineInput<'_>) -> Vec<FlightLine> {
    let (alt_min, alt_max) = column_heights(input);
    let mut columns: Vec<Vec<LinePoint>> = stations(&sp, input)
        .iter()
        .map(|st| column(st, input, alt_min, alt_max))
        .collect();
    sort_columns(&mut columns, input);
    let mut lines = make_flight_lines(columns, input, 0);

    if input.params.add_ceiling {
        let last = lines.last().and_then(FlightLine::last).copied();
        let rings = ceiling_rings(&sp, input, last, lines.len());
        lines.extend(rings);
        if sp.closed {
            if let Some(roof) = roof_raster(&sp.path, input, lines.len()) {
                lines.push(roof);
            }
        }
    }
    lines
}

pub fn building(input: &LineInput<'_>) -> Vec<FlightLine> {
    structure_lines(building_path(input), input)
}

pub fn facade(input: &LineInput<'_>) -> Vec<FlightLine> {
    structure_lines(facade_path(input), input)
}

fn orbit_direction(input: &LineInput<'_>) -> f64 {
    if input.params.circle_left {
        1.0
    } else {
        -1.0
    }
}

fn orbit_count(circumference_radius: f64, input: &LineInput<'_>) -> usize {
    let eff_par = input.sizes.size_parallel_eff.max(0.1);
    let by_overlap = if circumference_radius > 0.0 {
        (2.0 * PI / (eff_par / circumference_radius)).ceil() as usize
    } else {
        1
    };
    by_overlap.max(input.params.corridor_min_lines as usize)
}

/// Cylinder scan: columns around a round tower, then rings and a top raster.
pub fn tower(input: &LineInput<'_>) -> Vec<FlightLine> {
    let p = input.params;
    let w = p.corridor_width_m.max(0.0);
    let dist = stand_off(input);
    let r = dist + w + input.hw.camera.offset_to_tail_m;
    let n = orbit_count(w, input)
        .max((360.0 / p.max_yaw_roll_change_deg.max(1.0)).ceil() as usize)
        .max(3);
    let step = 2.0 * PI / n as f64 * orbit_direction(input);
    let (alt_min, alt_max) = column_heights(input);

    let stations: Vec<Station> = (0..n)
        .map(|k| {
            let theta = PI / 2.0 + k as f64 * step;
            let dir = Vec3::new(theta.cos(), theta.sin(), 0.0);
            Station {
                pos: dir * r,
                target: dir * w,
                yaw: input.heading(&-dir),
            }
        })
        .collect();
    let mut columns: Vec<Vec<LinePoint>> = stations.iter().map(|st| column(st, input, alt_min, alt_max)).collect();
    sort_columns(&mut columns, input);
    let mut lines = make_flight_lines(columns, input, 0);

    if !p.add_ceiling {
        return lines;
    }
    let base = input.base_z();
    let yaw_start = lines
        .last()
        .and_then(FlightLine::last)
        .map_or(PI / 2.0, |l| l.y.atan2(l.x));
    let (steps, step_deg) = tilt_steps(input);
    for s in 1..steps {
        let tilt = (s as f64 * step_deg).to_radians();
        let rr = w + dist * tilt.cos();
        let z = base + p.crop_height_max_m + dist * tilt.sin();
        let pts = (0..n)
            .map(|k| {
                let theta = yaw_start + k as f64 * step;
                let dir = Vec3::new(theta.cos(), theta.sin(), 0.0);
                let pos = Vec3::new(dir.x * rr, dir.y * rr, z);
                LinePoint::oriented(pos, Orientation::new(0.0, 90.0 - tilt.to_degrees(), input.heading(&-dir)))
            })
            .collect();
        lines.push(FlightLine::oriented(pts, lines.len()));
    }

    let z = base + p.crop_height_max_m + dist;
    let eff_if = input.sizes.size_in_flight_eff.max(0.1);
    let eff_par = input.sizes.size_parallel_eff.max(0.1);
    let u = Vec3::new(yaw_start.cos(), yaw_start.sin(), 0.0);
    let v = Vec3::new(-u.y, u.x, 0.0);
    let nadir = |pos: Vec3, heading_dir: Vec3| {
        LinePoint::oriented(pos, Orientation::new(0.0, 0.0, input.heading(&heading_dir)))
    };
    let mut top = Vec::new();
    if 2.0 * w < eff_if {
        top.push(nadir(Vec3::new(0.0, 0.0, z), -u));
    } else {
        top.push(nadir(u * w + Vec3::new(0.0, 0.0, z), -u));
        let inner = w - eff_if;
        let rows = ((2.0 * inner / eff_par).round() as usize).max(1);
        for i in 0..=rows {
            let along = inner - i as f64 * 2.0 * inner / rows as f64;
            let half = (w * w - along * along).max(0.0).sqrt();
            let sgn = if i % 2 == 0 { 1.0 } else { -1.0 };
            for side in [-sgn, sgn] {
                let q = u * along + v * (side * half);
                top.push(nadir(Vec3::new(q.x, q.y, z), v * sgn));
            }
        }
        top.push(nadir(-u * w + Vec3::new(0.0, 0.0, z), -u));
    }
    lines.push(FlightLine::oriented(top, lines.len()));
    lines
}

/// Orbit looking inward at a point of interest.
pub fn poi(input: &LineInput<'_>) -> Vec<FlightLine> {
    let p = input.params;
    let w = p.corridor_width_m.max(0.0);
    let r = input.hw.camera.offset_to_tail_m + stand_off(input) + w;
    let n = orbit_count(if w > 0.0 { w } else { r }, input).max(3);
    let base = input.base_z();
    let z = base + p.crop_height_max_m.max(input.hw.platform.min_ground_distance_m);
    let target = Vec3::new(0.0, 0.0, base + (p.crop_height_min_m + p.crop_height_max_m) / 2.0);
    let step = 2.0 * PI / n as f64 * orbit_direction(input);

    let pts = (0..n)
        .map(|k| {
            let theta = k as f64 * step;
            let pos = Vec3::new(r * theta.cos(), r * theta.sin(), z);
            LinePoint::oriented(pos, input.look_at(&pos, &target))
        })
        .collect();
    vec![FlightLine::oriented(pts, 0)]
}

/// Rotation in place (or on a small circle) looking outward.
pub fn panorama(input: &LineInput<'_>) -> Vec<FlightLine> {
    let p = input.params;
    let cam = &input.hw.camera;
    let r = cam.offset_to_tail_m;
    let half_fov = (cam.ccd_width_mm / 2.0 / cam.focal_length_mm.max(1e-6)).atan();
    let opening = 2.0 * half_fov * (1.0 - p.overlap_parallel / 100.0);
    let n = if opening > 1e-6 { (2.0 * PI / opening).ceil() as usize } else { 1 }.max(1);
    let z = input.base_z() + p.crop_height_max_m.max(input.hw.platform.min_ground_distance_m);
    let step = 2.0 * PI / n as f64 * orbit_direction(input);

    let pts = (0..n)
        .map(|k| {
            let theta = k as f64 * step;
            let dir = Vec3::new(theta.cos(), theta.sin(), 0.0);
            LinePoint::oriented(
                Vec3::new(dir.x * r, dir.y * r, z),
                Orientation::new(0.0, 90.0 + p.camera_pitch_offset_deg, input.heading(&dir)),
            )
        })
        .collect();
    vec![FlightLine::oriented(pts, 0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::ScanSizes;
    use crate::hardware::HardwareConfiguration;
    use crate::models::AoiParameters;

    fn sizes() -> ScanSizes {
        ScanSizes {
            size_in_flight: 10.0,
            size_parallel: 10.0,
            size_in_flight_eff: 5.0,
            size_in_flight_eff_max: 5.0,
            size_parallel_eff: 5.0,
            ..Default::default()
        }
    }

    fn square_input<'a>(
        params: &'a AoiParameters,
        corners: &'a [Vec3],
        sizes: &'a ScanSizes,
        hw: &'a HardwareConfiguration,
    ) -> LineInput<'a> {
        LineInput {
            plan_type: PlanType::Building,
            params,
            corners,
            sizes,
            altitude: 10.0,
            length_x: 20.0,
            length_y: 20.0,
            hw,
            scan_yaw: 0.0,
            prev: None,
            next: None,
        }
    }

    fn square() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(20.0, 0.0, 0.0),
            Vec3::new(20.0, 20.0, 0.0),
            Vec3::new(0.0, 20.0, 0.0),
        ]
    }

    #[test]
    fn test_building_stations_stay_outside_no_go() {
        let params = AoiParameters {
            add_ceiling: false,
            ..Default::default()
        };
        let corners = square();
        let sizes = sizes();
        let hw = HardwareConfiguration::default();
        let input = square_input(&params, &corners, &sizes, &hw);
        let sp = building_path(&input);
        let st = stations(&sp, &input);
        assert!(!st.is_empty());
        for s in &st {
            assert!(!point_in_polygon(s.pos.x, s.pos.y, &corners), "station inside building: {:?}", s.pos);
        }
    }

    #[test]
    fn test_building_columns_reach_crop_height() {
        let params = AoiParameters {
            add_ceiling: false,
            crop_height_max_m: 30.0,
            ..Default::default()
        };
        let corners = square();
        let sizes = sizes();
        let hw = HardwareConfiguration::default();
        let input = square_input(&params, &corners, &sizes, &hw);
        let lines = building(&input);
        assert!(!lines.is_empty());
        let top = lines
            .iter()
            .flat_map(|l| l.points.iter())
            .map(|p| p.pos.z)
            .fold(f64::MIN, f64::max);
        assert!((top - 30.0).abs() < 1e-6, "top {top}");
        // first column flown top down
        let first = &lines[0];
        assert!(first.first().unwrap().z > first.last().unwrap().z);
    }

    #[test]
    fn test_yaw_refinement_limits_rotation() {
        let a = Station { pos: Vec3::zeros(), target: Vec3::zeros(), yaw: 0.0 };
        let b = Station { pos: Vec3::new(1.0, 0.0, 0.0), target: Vec3::zeros(), yaw: 90.0 };
        let out = refine_yaw(vec![a, b], false, 15.0);
        assert_eq!(out.len(), 7);
        for w in out.windows(2) {
            assert!(yaw_diff(w[0].yaw, w[1].yaw) <= 15.0 + 1e-9);
        }
    }

    #[test]
    fn test_poi_orbit_looks_at_center() {
        let params = AoiParameters {
            corridor_width_m: 5.0,
            ..Default::default()
        };
        let corners = vec![Vec3::zeros()];
        let sizes = sizes();
        let hw = HardwareConfiguration::default();
        let mut input = square_input(&params, &corners, &sizes, &hw);
        input.plan_type = PlanType::Poi;
        let lines = poi(&input);
        assert_eq!(lines.len(), 1);
        for lp in &lines[0].points {
            let o = lp.orientation.unwrap();
            let back = Vec3::new(-lp.pos.x, -lp.pos.y, 0.0);
            assert!(yaw_diff(o.yaw, input.heading(&back)) < 1e-6);
        }
    }
}
