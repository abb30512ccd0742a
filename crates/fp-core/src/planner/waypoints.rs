//! Flight lines → geodetic waypoints.

use crate::elevation::ElevationModel;
use crate::error::{PlanResult, RecomputeError};
use crate::frame::{AoiFrame, GeoPosition};
use crate::geometry::{haversine_distance, normalize_deg, normalize_deg_positive, Vec3};
use crate::hardware::PhotoSettings;
use crate::models::{FlightLine, LinePoint, Orientation, PlanType, StartCapture, Waypoint};

use super::LineInput;

/// Point at arc length `s` along the line and the direction of travel there.
fn point_at(points: &[LinePoint], s: f64) -> (Vec3, Vec3) {
    let mut remaining = s;
    for w in points.windows(2) {
        let d = w[1].pos - w[0].pos;
        let len = d.norm();
        if len < 1e-12 {
            continue;
        }
        if remaining <= len {
            return (w[0].pos + d * (remaining / len), d);
        }
        remaining -= len;
    }
    let n = points.len();
    let dir = if n >= 2 { points[n - 1].pos - points[n - 2].pos } else { Vec3::x() };
    (points[n - 1].pos, dir)
}

/// Image positions spaced along a straight or piecewise-linear line.
fn image_positions(line: &FlightLine, input: &LineInput<'_>) -> PlanResult<Vec<LinePoint>> {
    let p = input.params;
    let length = line.length();
    if !length.is_finite() {
        return Err(RecomputeError::Exception(format!("line {} has no finite length", line.line_index)));
    }
    if line.points.is_empty() {
        return Ok(Vec::new());
    }
    let step = input.sizes.size_in_flight_eff;
    let n = if step > 0.0 { (length / step).ceil().max(1.0) as usize } else { 1 };
    let spacing = length / n as f64;
    let offsets: Vec<f64> = match p.start_capture {
        StartCapture::EndOfLine => (0..=n).map(|k| k as f64 * spacing).collect(),
        StartCapture::InsideLine => (0..n).map(|k| (k as f64 + 0.5) * spacing).collect(),
    };

    Ok(offsets
        .iter()
        .enumerate()
        .map(|(k, &s)| {
            let (pos, dir) = point_at(&line.points, s);
            let mut pitch = p.camera_pitch_offset_deg;
            if k == 0 {
                pitch += p.pitch_offset_line_begin_deg;
            }
            LinePoint::oriented(pos, Orientation::new(0.0, pitch, input.heading(&dir)))
        })
        .collect())
}

/// Raster line flown with distance-triggered images: vertices only.
fn vertices(line: &FlightLine, input: &LineInput<'_>) -> Vec<LinePoint> {
    let p = input.params;
    let n = line.points.len();
    line.points
        .iter()
        .enumerate()
        .map(|(k, lp)| {
            let dir = if k + 1 < n {
                line.points[k + 1].pos - lp.pos
            } else if k > 0 {
                lp.pos - line.points[k - 1].pos
            } else {
                Vec3::x()
            };
            let orientation = lp
                .orientation
                .unwrap_or_else(|| Orientation::new(0.0, p.camera_pitch_offset_deg, input.heading(&dir)));
            LinePoint::oriented(lp.pos, orientation)
        })
        .collect()
}

/// Split hops whose yaw change exceeds `max_yaw` into interpolated steps.
/// Inserted points are flagged `true`.
fn limit_yaw_steps(points: Vec<LinePoint>, max_yaw: f64) -> Vec<(LinePoint, bool)> {
    let mut out: Vec<(LinePoint, bool)> = Vec::with_capacity(points.len());
    for lp in points {
        let prev = out.last().map(|(p, _)| (p.pos, p.orientation.unwrap_or_default()));
        if let (Some((start, from)), Some(to)) = (prev, lp.orientation) {
            let dyaw = normalize_deg(to.yaw - from.yaw);
            if max_yaw > 0.0 && dyaw.abs() > max_yaw {
                let steps = (dyaw.abs() / max_yaw).ceil() as usize;
                for k in 1..steps {
                    let t = k as f64 / steps as f64;
                    let orientation = Orientation::new(
                        from.roll + (to.roll - from.roll) * t,
                        from.pitch + (to.pitch - from.pitch) * t,
                        normalize_deg_positive(from.yaw + dyaw * t),
                    );
                    out.push((LinePoint::oriented(start + (lp.pos - start) * t, orientation), true));
                }
            }
        }
        out.push((lp, false));
    }
    out
}

/// Convert ordered flight lines into the AOI's waypoint list.
pub fn fill_container(
    lines: &[FlightLine],
    input: &LineInput<'_>,
    frame: &AoiFrame,
    photo: &PhotoSettings,
) -> PlanResult<Vec<Waypoint>> {
    let hw = input.hw;
    let individual = hw.platform.plan_individual_image_positions;
    let stop = if photo.stop_at_waypoints {
        hw.camera.min_trigger_interval_s
    } else {
        0.0
    };
    let target_distance = (input.plan_type.needs_heights()
        || matches!(input.plan_type, PlanType::Poi | PlanType::Panorama))
    .then_some(input.altitude);

    let mut out = Vec::new();
    let max_yaw = input.params.max_yaw_roll_change_deg;
    for line in lines {
        let (points, trigger_last) = if line.linear && individual {
            (image_positions(line, input)?, true)
        } else if line.linear {
            (vertices(line, input), false)
        } else {
            (vertices(line, input), true)
        };
        let points = if line.linear {
            points.into_iter().map(|lp| (lp, false)).collect()
        } else {
            limit_yaw_steps(points, max_yaw)
        };
        let n = points.len();
        for (k, (lp, inserted)) in points.into_iter().enumerate() {
            let mut wp = Waypoint::new(frame.to_global(&lp.pos));
            wp.speed_mps = photo.max_ground_speed_mps;
            wp.stop_time_s = if inserted { 0.0 } else { stop };
            wp.trigger_image = !inserted && (trigger_last || k + 1 < n);
            wp.orientation = lp.orientation.unwrap_or_default();
            wp.begins_flight_line = k == 0;
            wp.target_distance_m = target_distance;
            out.push(wp);
        }
    }
    Ok(out)
}

/// Put every waypoint `altitude` above the terrain below it. Hops within a
/// line longer than `sample_distance` get intermediate waypoints so the
/// height follows the ground between vertices.
pub fn follow_terrain(
    waypoints: &mut Vec<Waypoint>,
    elevation: &dyn ElevationModel,
    reference_alt: f64,
    altitude: f64,
    sample_distance: f64,
) {
    let mut out = Vec::with_capacity(waypoints.len());
    for (i, wp) in waypoints.iter().enumerate() {
        out.push(wp.clone());
        let Some(next) = waypoints.get(i + 1) else { continue };
        if next.begins_flight_line || sample_distance <= 0.0 {
            continue;
        }
        let (a, b) = (wp.position, next.position);
        let steps = (haversine_distance(a.lat, a.lon, b.lat, b.lon) / sample_distance).ceil() as usize;
        for k in 1..steps {
            let t = k as f64 / steps as f64;
            let mut sample = wp.clone();
            sample.position = GeoPosition::new(a.lat + (b.lat - a.lat) * t, a.lon + (b.lon - a.lon) * t, a.alt);
            sample.begins_flight_line = false;
            sample.stop_time_s = 0.0;
            out.push(sample);
        }
    }
    for wp in &mut out {
        let ground = elevation.elevation(wp.position.lat, wp.position.lon);
        wp.position.alt = ground - reference_alt + altitude;
    }
    *waypoints = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::TerrainGrid;
    use crate::footprint::ScanSizes;
    use crate::geometry::MinMax;
    use crate::hardware::HardwareConfiguration;
    use crate::models::AoiParameters;

    fn input<'a>(params: &'a AoiParameters, sizes: &'a ScanSizes, hw: &'a HardwareConfiguration) -> LineInput<'a> {
        LineInput {
            plan_type: PlanType::Polygon,
            params,
            corners: &[],
            sizes,
            altitude: 50.0,
            length_x: 100.0,
            length_y: 100.0,
            hw,
            scan_yaw: 0.0,
            prev: None,
            next: None,
        }
    }

    #[test]
    fn test_end_of_line_images_hit_both_ends() {
        let params = AoiParameters::default();
        let sizes = ScanSizes {
            size_in_flight_eff: 10.0,
            ..Default::default()
        };
        let hw = HardwareConfiguration::default();
        let inp = input(&params, &sizes, &hw);
        let line = FlightLine::raster(0.0, MinMax::new(0.0, 95.0), 0, false);
        let pts = image_positions(&line, &inp).unwrap();
        assert_eq!(pts.len(), 11);
        assert!((pts[0].pos.x).abs() < 1e-9);
        assert!((pts[10].pos.x - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_inside_line_images_are_centered() {
        let params = AoiParameters {
            start_capture: StartCapture::InsideLine,
            ..Default::default()
        };
        let sizes = ScanSizes {
            size_in_flight_eff: 10.0,
            ..Default::default()
        };
        let hw = HardwareConfiguration::default();
        let inp = input(&params, &sizes, &hw);
        let line = FlightLine::raster(0.0, MinMax::new(0.0, 40.0), 0, false);
        let xs: Vec<f64> = image_positions(&line, &inp).unwrap().iter().map(|p| p.pos.x).collect();
        assert_eq!(xs, vec![5.0, 15.0, 25.0, 35.0]);
    }

    #[test]
    fn test_large_yaw_change_split_into_steps() {
        let points = vec![
            LinePoint::oriented(Vec3::zeros(), Orientation::new(0.0, 0.0, 350.0)),
            LinePoint::oriented(Vec3::new(60.0, 0.0, 0.0), Orientation::new(0.0, 0.0, 80.0)),
        ];
        let out = limit_yaw_steps(points, 15.0);
        // 90 degrees through north in six 15 degree steps
        assert_eq!(out.len(), 7);
        assert_eq!(out.iter().filter(|(_, inserted)| *inserted).count(), 5);
        let (mid, _) = &out[2];
        assert!((mid.orientation.unwrap().yaw - 20.0).abs() < 1e-9);
        assert!((mid.pos.x - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_wing_lines_stop_triggering_at_end() {
        let params = AoiParameters::default();
        let sizes = ScanSizes::default();
        let mut hw = HardwareConfiguration::default();
        hw.platform.plan_individual_image_positions = false;
        let inp = input(&params, &sizes, &hw);
        let frame = AoiFrame::new(GeoPosition::new(47.0, 8.0, 0.0), 400.0, 0.0);
        let lines = vec![FlightLine::raster(0.0, MinMax::new(0.0, 50.0), 0, false)];
        let wps = fill_container(&lines, &inp, &frame, &PhotoSettings::default()).unwrap();
        assert_eq!(wps.len(), 2);
        assert!(wps[0].trigger_image && wps[0].begins_flight_line);
        assert!(!wps[1].trigger_image);
    }

    #[test]
    fn test_follow_terrain_tracks_slope_between_vertices() {
        // ground rises 100 m from west to east over 0.01 degrees of longitude
        let ramp = TerrainGrid::new(46.99, 8.0, 0.02, 0.01, 2, 2, vec![400.0, 500.0, 400.0, 500.0]).unwrap();
        let mut start = Waypoint::new(GeoPosition::new(47.0, 8.0, 50.0));
        start.begins_flight_line = true;
        start.trigger_image = true;
        let end = Waypoint::new(GeoPosition::new(47.0, 8.01, 50.0));
        let mut next_line = Waypoint::new(GeoPosition::new(47.001, 8.01, 50.0));
        next_line.begins_flight_line = true;
        let mut wps = vec![start, end, next_line];

        follow_terrain(&mut wps, &ramp, 400.0, 50.0, 100.0);

        // about 760 m of line sampled every 100 m, nothing added across lines
        assert_eq!(wps.len(), 10);
        assert!((wps[0].position.alt - 50.0).abs() < 1e-6);
        assert!((wps[8].position.alt - 150.0).abs() < 1e-6);
        assert!((wps[9].position.alt - 150.0).abs() < 1e-6);
        let middle = &wps[4];
        assert!(middle.position.alt > 90.0 && middle.position.alt < 110.0);
        assert!(middle.trigger_image && !middle.begins_flight_line);
        assert!(wps.windows(2).take(8).all(|w| w[1].position.alt > w[0].position.alt));
    }
}
