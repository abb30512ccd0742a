//! Coverage path planning: footprint sizing, line generation per pattern,
//! line ordering and waypoint emission.

pub mod grid;
pub mod target_points;
pub mod vertical;
pub mod waypoints;
pub mod windmill;

use tracing::debug;

use crate::config::EngineConfig;
use crate::elevation::ElevationModel;
use crate::error::{PlanResult, RecomputeError};
use crate::footprint::{FootprintCalculator, Overlaps, ScanSizes};
use crate::frame::GeoPosition;
use crate::geometry::{normalize_deg_positive, Vec3};
use crate::hardware::{AltitudeAdjustMode, HardwareConfiguration, PhotoSettings, SpeedMode};
use crate::hull::{self, HullOptions};
use crate::models::{
    AoiParameters, AreaOfInterest, FlightLine, JumpPattern, Orientation, PlanType, ScanDirection,
    StartCaptureVertically, VerticalScanPattern,
};

/// Read-only collaborators of one planning run.
pub struct PlanEnv<'a> {
    pub hw: &'a HardwareConfiguration,
    pub config: &'a EngineConfig,
    pub elevation: &'a dyn ElevationModel,
    /// Plan reference point, `alt` is its WGS84 height
    pub reference: GeoPosition,
}

/// What a line generator reads. All positions are in the AOI frame.
pub struct LineInput<'a> {
    pub plan_type: PlanType,
    pub params: &'a AoiParameters,
    pub corners: &'a [Vec3],
    pub sizes: &'a ScanSizes,
    /// Flight altitude, or stand-off distance for structure patterns
    pub altitude: f64,
    pub length_x: f64,
    pub length_y: f64,
    pub hw: &'a HardwareConfiguration,
    /// Compass heading of the frame's x axis
    pub scan_yaw: f64,
    pub prev: Option<Vec3>,
    pub next: Option<Vec3>,
}

impl LineInput<'_> {
    /// Ground level of the AOI relative to the plan reference.
    pub fn base_z(&self) -> f64 {
        self.corners.first().map(|c| c.z).unwrap_or(0.0)
    }

    pub fn heading(&self, dir: &Vec3) -> f64 {
        compass_heading(self.scan_yaw, dir)
    }

    pub fn look_at(&self, from: &Vec3, to: &Vec3) -> Orientation {
        look_orientation(self.scan_yaw, &(to - from))
    }

    /// Turn radius the line ordering has to respect.
    pub fn turn_radius(&self) -> f64 {
        if self.hw.platform.copter_mode {
            0.0
        } else {
            self.hw.platform.turn_radius_m
        }
    }
}

/// Compass heading of an AOI-frame direction.
pub fn compass_heading(scan_yaw: f64, dir: &Vec3) -> f64 {
    normalize_deg_positive(scan_yaw - dir.y.atan2(dir.x).to_degrees())
}

/// Camera orientation looking along `view` (stored pitch: 0 = down, 90 = level).
pub fn look_orientation(scan_yaw: f64, view: &Vec3) -> Orientation {
    let horizontal = view.xy().norm();
    let yaw = if horizontal < 1e-9 { scan_yaw } else { compass_heading(scan_yaw, view) };
    Orientation::new(0.0, 90.0 + view.z.atan2(horizontal).to_degrees(), yaw)
}

fn overlaps(p: &AoiParameters) -> Overlaps {
    Overlaps {
        in_flight: p.overlap_in_flight,
        in_flight_min: p.overlap_in_flight_min,
        parallel: p.overlap_parallel,
    }
}

/// Regenerate hull, lines and waypoints of one AOI.
///
/// `prev` and `next` are the positions flown before and after the AOI; they
/// steer where the pattern starts. `plan_photo` is never modified; speeds
/// derived for this AOI end up on its waypoints and `optimal_speed_mps`.
pub fn compute_aoi(
    aoi: &mut AreaOfInterest,
    env: &PlanEnv<'_>,
    plan_photo: &PhotoSettings,
    prev: Option<GeoPosition>,
    next: Option<GeoPosition>,
) -> PlanResult<()> {
    {
        let d = &mut aoi.derived;
        d.flight_lines.clear();
        d.waypoints.clear();
        d.last_error = None;
        d.overlap_warning = false;
    }
    let plan_type = aoi.plan_type;
    let required = plan_type.min_corners();
    if aoi.corners().len() < required {
        return Err(RecomputeError::TooFewCorners {
            required,
            actual: aoi.corners().len(),
        });
    }
    if plan_type.requires_copter() && !env.hw.platform.copter_mode {
        return Err(RecomputeError::AoiTypeNotSupported);
    }

    let calc = FootprintCalculator::new(env.hw);
    let altitude = if plan_type == PlanType::TargetPoints {
        1.0
    } else {
        calc.resolve_altitude(aoi.params().altitude_m, aoi.params().gsd_m)?
    };
    let footprint = calc.footprint(altitude);
    let prelim = footprint
        .as_ref()
        .ok()
        .map(|fp| ScanSizes::compute(fp, overlaps(aoi.params()), env.hw));

    let geo = hull::compute(
        aoi,
        env.reference.alt,
        HullOptions {
            angle_step_deg: env.config.hull_angle_step_deg,
            line_spacing: prelim.map(|s| s.size_parallel_eff),
            altitude_m: altitude,
        },
    )?;
    hull::apply(aoi, geo);
    if !plan_type.has_waypoints() {
        aoi.derived.valid_size = true;
        return Ok(());
    }

    let area = aoi.derived.area_m2;
    aoi.derived.valid_size = true;
    if area > 0.0 && altitude > 0.0 && plan_type != PlanType::TargetPoints {
        let p = aoi.params();
        let estimate = calc.estimate_pics(area, altitude, p.overlap_parallel, p.overlap_in_flight);
        if estimate > env.config.max_num_pics as f64 {
            aoi.derived.valid_size = false;
            return Err(RecomputeError::TooManyPoints {
                limit: env.config.max_num_pics,
            });
        }
    }

    let fp = footprint?;
    aoi.derived.altitude_m = altitude;
    aoi.derived.gsd_m = fp.gsd_m;

    let mut aoi_photo = plan_photo.clone();
    if aoi_photo.speed_mode.is_automatically_adjusting() {
        let eff = prelim.map(|s| s.size_in_flight_eff).unwrap_or(fp.size_in_flight);
        calc.compensate_motion_blur(&mut aoi_photo, fp.gsd_m, eff);
    }
    let photo = &aoi_photo;
    check_overlap_possible(aoi, photo, env.hw, fp.size_in_flight);

    let sizes = ScanSizes::compute(&fp, overlaps(aoi.params()), env.hw);
    aoi.derived.sizes = sizes;
    aoi.derived.optimal_speed_mps = photo.max_ground_speed_mps;

    let frame = aoi.derived.frame.clone().ok_or_else(|| {
        RecomputeError::Exception("AOI frame missing after hull pass".into())
    })?;
    let prev_local = prev.map(|p| frame.to_local(&p));
    let next_local = next.map(|p| frame.to_local(&p));

    let (lines, mut waypoints) = {
        let input = LineInput {
            plan_type,
            params: aoi.params(),
            corners: &aoi.derived.corners_local,
            sizes: &sizes,
            altitude,
            length_x: aoi.derived.length_x,
            length_y: aoi.derived.length_y,
            hw: env.hw,
            scan_yaw: hull::scan_yaw(aoi),
            prev: prev_local,
            next: next_local,
        };
        match plan_type {
            PlanType::TargetPoints => {
                let text = input.params.target_points.as_deref().unwrap_or_default();
                let wps = target_points::build(text, &fp, env, photo)?;
                (Vec::new(), wps)
            }
            PlanType::Copter3d => {
                let lines = aoi.derived.object_coverage.clone().ok_or(RecomputeError::NoWaypoints)?;
                let wps = waypoints::fill_container(&lines, &input, &frame, photo)?;
                (lines, wps)
            }
            _ => {
                let lines = generate_lines(&input)?;
                let lines = order_lines(lines, &input);
                let wps = waypoints::fill_container(&lines, &input, &frame, photo)?;
                (lines, wps)
            }
        }
    };

    if photo.altitude_adjust_mode == AltitudeAdjustMode::FollowTerrain && plan_type.follows_terrain() {
        waypoints::follow_terrain(
            &mut waypoints,
            env.elevation,
            env.reference.alt,
            altitude,
            sizes.size_in_flight_eff,
        );
    }

    if waypoints.is_empty() {
        return Err(RecomputeError::NoWaypoints);
    }
    if waypoints.len() > env.config.max_num_pics {
        return Err(RecomputeError::TooManyPoints {
            limit: env.config.max_num_pics,
        });
    }
    debug!(aoi = %aoi.name, lines = lines.len(), waypoints = waypoints.len(), "AOI planned");
    aoi.derived.flight_lines = lines;
    aoi.derived.waypoints = waypoints;
    Ok(())
}

/// Compare the requested forward overlap with what the speed allows.
///
/// An overlap the user already accepted as reduced is applied silently;
/// otherwise a warning is flagged and the overlap stays as requested.
fn check_overlap_possible(
    aoi: &mut AreaOfInterest,
    photo: &PhotoSettings,
    hw: &HardwareConfiguration,
    size_in_flight: f64,
) {
    aoi.derived.overlap_warning = false;
    if hw.platform.copter_mode {
        if photo.speed_mode.is_automatically_adjusting() {
            return;
        }
        if photo.speed_mode == SpeedMode::ManualConstant && photo.stop_at_waypoints {
            return;
        }
    }
    let max_possible = FootprintCalculator::new(hw)
        .max_possible_overlap_in_flight(photo.max_ground_speed_mps, size_in_flight);
    aoi.derived.overlap_in_flight_max_possible = max_possible;

    let p = aoi.params();
    if p.overlap_in_flight <= max_possible {
        return;
    }
    let reduced = p.overlap_in_flight.min(max_possible);
    let reduced_min = p.overlap_in_flight_min.min(max_possible);
    let accepted = p.accepted_overlap_in_flight.is_some_and(|a| a <= reduced)
        && p.accepted_overlap_in_flight_min.is_some_and(|a| a <= reduced_min);
    if accepted {
        let p = aoi.params_internal_mut();
        p.overlap_in_flight = reduced;
        p.overlap_in_flight_min = reduced_min;
    } else {
        tracing::warn!(
            aoi = %aoi.name,
            requested = p.overlap_in_flight,
            max_possible,
            "forward overlap not reachable at current speed"
        );
        aoi.derived.overlap_warning = true;
    }
}

/// Dispatch to the pattern's line generator.
pub fn generate_lines(input: &LineInput<'_>) -> PlanResult<Vec<FlightLine>> {
    match input.plan_type {
        PlanType::Polygon => grid::polygon(input),
        PlanType::City => grid::city(input),
        PlanType::Corridor => grid::corridor(input),
        PlanType::Spiral => grid::spiral(input),
        PlanType::Search => Ok(grid::search(input)),
        PlanType::Star => Ok(grid::star(input)),
        PlanType::Poi => Ok(vertical::poi(input)),
        PlanType::Panorama => Ok(vertical::panorama(input)),
        PlanType::Tower => Ok(vertical::tower(input)),
        PlanType::Building => Ok(vertical::building(input)),
        PlanType::Facade => Ok(vertical::facade(input)),
        PlanType::Windmill => Ok(windmill::blades(input)),
        _ => Ok(Vec::new()),
    }
}

// ==== Line ordering ====

/// Reorder lines so the pattern starts where the previous leg ends.
pub fn order_lines(mut lines: Vec<FlightLine>, input: &LineInput<'_>) -> Vec<FlightLine> {
    if lines.is_empty() {
        return lines;
    }
    let p = input.params;
    if input.plan_type.uses_vertical_start_capture() {
        apply_vertical_start(&mut lines, input);
        return lines;
    }
    if !input.plan_type.permutes_lines() {
        return lines;
    }

    // (reverse + switch blocks, mirror all)
    let options: &[(bool, bool)] = match p.scan_direction {
        ScanDirection::FromStarting | ScanDirection::TowardLanding => {
            &[(false, false), (false, true), (true, false), (true, true)]
        }
        ScanDirection::CornerXminYmax => &[(false, false)],
        ScanDirection::CornerXmaxYmax => &[(false, true)],
        ScanDirection::CornerXminYmin => &[(true, false)],
        ScanDirection::CornerXmaxYmin => &[(true, true)],
        ScanDirection::Left | ScanDirection::Right | ScanDirection::Custom => &[(false, false)],
    };

    let target = match p.scan_direction {
        ScanDirection::TowardLanding => input.next,
        _ => input.prev,
    };

    let mut best: Option<(f64, Vec<FlightLine>)> = None;
    for &(reverse, mirror_all) in options {
        let mut candidate = lines.clone();
        if reverse {
            candidate.reverse();
            switch_blocks(&mut candidate);
        }
        if mirror_all {
            candidate.iter_mut().for_each(FlightLine::mirror);
        }
        permute_lines(&mut candidate, input);
        assure_turn_radius(&mut candidate, input);

        let dist = match (target, p.scan_direction) {
            (Some(t), ScanDirection::TowardLanding) => candidate
                .last()
                .and_then(FlightLine::last)
                .map_or(f64::INFINITY, |e| (e - t).norm()),
            (Some(t), _) => candidate
                .first()
                .and_then(FlightLine::first)
                .map_or(f64::INFINITY, |s| (s - t).norm()),
            (None, _) => 0.0,
        };
        if best.as_ref().map_or(true, |(d, _)| dist < *d) {
            best = Some((dist, candidate));
        }
    }
    best.map(|(_, l)| l).unwrap_or(lines)
}

fn apply_vertical_start(lines: &mut [FlightLine], input: &LineInput<'_>) {
    let p = input.params;
    let up = p.start_capture_vertically == StartCaptureVertically::Up;
    let ceiling_type = matches!(input.plan_type, PlanType::Building | PlanType::Tower | PlanType::Windmill);
    if up && ((p.add_ceiling && ceiling_type) || p.vertical_scan_pattern == VerticalScanPattern::LeftRight) {
        lines.reverse();
        for line in lines.iter_mut() {
            line.points.reverse();
        }
        return;
    }

    let z_of = |v: Option<&Vec3>| v.map_or(0.0, |p| p.z);
    let first = &lines[0];
    let starts_at_top = if p.vertical_scan_pattern == VerticalScanPattern::UpDown {
        z_of(first.first()) > z_of(first.last())
    } else {
        z_of(first.first()) > z_of(lines[lines.len() - 1].first())
    };
    if up == starts_at_top {
        return;
    }
    for line in lines.iter_mut() {
        if (z_of(line.first()) - z_of(line.last())).abs() > 1e-9 {
            line.points.reverse();
        }
    }
}

/// Move the lines of the other rotation in front, keeping relative order.
fn switch_blocks(lines: &mut Vec<FlightLine>) {
    let Some(first_rot) = lines.first().map(|l| l.rot90) else {
        return;
    };
    if lines.iter().all(|l| l.rot90 == first_rot) {
        return;
    }
    let (mut other, same): (Vec<_>, Vec<_>) = lines.drain(..).partition(|l| l.rot90 != first_rot);
    other.extend(same);
    *lines = other;
}

fn jump_step(input: &LineInput<'_>) -> usize {
    if input.params.jump_pattern == JumpPattern::LineByLine {
        return 1;
    }
    let eff = input.sizes.size_parallel_eff;
    if eff <= 0.0 {
        return 1;
    }
    ((0.5 + 2.0 * input.turn_radius() / eff).round() as usize).max(1)
}

/// Alternate line directions; with wide turns, fly lines in a racetrack
/// order so consecutive lines are far enough apart.
pub fn permute_lines(lines: &mut Vec<FlightLine>, input: &LineInput<'_>) {
    if lines.len() < 2 {
        return;
    }
    let single = input.params.single_direction;
    let jump = jump_step(input);

    if jump > 1 {
        let eff = input.sizes.size_parallel_eff;
        let mut blocks: Vec<Vec<FlightLine>> = Vec::new();
        for line in lines.drain(..) {
            let split = blocks.last().and_then(|b| b.last()).map_or(true, |last: &FlightLine| {
                last.rot90 != line.rot90
                    || (last.parallel_coordinate - line.parallel_coordinate).abs() > 1.1 * eff
            });
            if split {
                blocks.push(vec![line]);
            } else if let Some(b) = blocks.last_mut() {
                b.push(line);
            }
        }
        for block in blocks {
            lines.extend(racetrack(block, jump));
        }
    }

    let first_forward = lines[0].forward;
    for i in 1..lines.len() {
        let rotation_change = lines[i].rot90 != lines[i - 1].rot90;
        if rotation_change {
            orient_after_rotation_change(lines, i);
            continue;
        }
        let want_forward = if single { first_forward } else { !lines[i - 1].forward };
        if lines[i].forward != want_forward {
            lines[i].mirror();
        }
    }
}

/// Order of a block flown with a jump of `jump` lines.
fn racetrack(block: Vec<FlightLine>, jump: usize) -> Vec<FlightLine> {
    let n = block.len();
    let mut order = Vec::with_capacity(n);
    let mut base = 0;
    while base < n {
        let remaining = n - base;
        let j = jump.min(remaining.div_ceil(2)).max(1);
        let cycle = 2 * j - 1;
        let mut idx = base;
        for step in 0..cycle.min(remaining) {
            order.push(idx);
            if step % 2 == 0 {
                idx += j;
            } else {
                idx -= j - 1;
            }
        }
        base += cycle.min(remaining);
    }
    let mut slots: Vec<Option<FlightLine>> = block.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots.get_mut(i).and_then(Option::take)).collect()
}

/// At a rotation change pick the cheapest way to enter the next block.
fn orient_after_rotation_change(lines: &mut [FlightLine], i: usize) {
    let Some(end) = lines[i - 1].last().copied() else {
        return;
    };
    let n = lines.len();
    let dist = |p: Option<&Vec3>| p.map_or(f64::INFINITY, |p| (p - end).norm());
    let d_next_begin = dist(lines[i].first());
    let d_next_end = dist(lines[i].last());
    let d_last_begin = dist(lines[n - 1].first());
    let d_last_end = dist(lines[n - 1].last());
    let min = d_next_begin.min(d_next_end).min(d_last_begin).min(d_last_end);

    let rest = &mut lines[i..];
    if min == d_next_begin {
        return;
    }
    if min == d_next_end {
        rest.iter_mut().for_each(FlightLine::mirror);
    } else if min == d_last_begin {
        rest.reverse();
    } else {
        rest.reverse();
        rest.iter_mut().for_each(FlightLine::mirror);
    }
}

/// Camera centrency shift plus line-end alignment so a fixed wing can
/// turn between neighbouring lines.
pub fn assure_turn_radius(lines: &mut [FlightLine], input: &LineInput<'_>) {
    if matches!(input.plan_type, PlanType::Polygon | PlanType::City) {
        for line in lines.iter_mut().filter(|l| l.linear) {
            line.apply_cam_centrency(input.sizes.centrency_in_flight, input.sizes.centrency_parallel);
        }
    }
    if input.hw.platform.plan_individual_image_positions {
        return;
    }
    let radius = input.turn_radius();
    let single = input.params.single_direction;
    for i in 1..lines.len() {
        let (head, tail) = lines.split_at_mut(i);
        let a = &mut head[i - 1];
        let b = &mut tail[0];
        if a.rot90 != b.rot90 || a.points.len() < 2 || b.points.len() < 2 || !a.linear || !b.linear {
            continue;
        }
        let along = |v: &Vec3, rot90: bool| if rot90 { v.y } else { v.x };
        let dy = (a.parallel_coordinate - b.parallel_coordinate).abs();
        let offset = (radius - dy).max(0.0);
        let (Some(a_end), Some(b_start)) = (a.last().copied(), b.first().copied()) else {
            continue;
        };
        let a_along = along(&a_end, a.rot90);
        if single {
            // return leg turns outside the line end
            let dir = if a.forward { 1.0 } else { -1.0 };
            let mut ret = a_end;
            let mid = (a.parallel_coordinate + b.parallel_coordinate) / 2.0;
            if a.rot90 {
                ret.y += dir * offset;
                ret.x = mid;
            } else {
                ret.x += dir * offset;
                ret.y = mid;
            }
            a.points.push(crate::models::LinePoint::new(ret));
            continue;
        }
        let b_along = along(&b_start, b.rot90);
        let ends_high = a_along >= along(&a.points[0].pos, a.rot90);
        let aligned = if ends_high {
            a_along.max(b_along) + offset
        } else {
            a_along.min(b_along) - offset
        };
        let set = |p: &mut Vec3, rot90: bool| {
            if rot90 {
                p.y = aligned;
            } else {
                p.x = aligned;
            }
        };
        let last = a.points.len() - 1;
        set(&mut a.points[last].pos, a.rot90);
        set(&mut b.points[0].pos, b.rot90);
    }
}
