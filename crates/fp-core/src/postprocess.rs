//! Path post-processing over one waypoint container: dynamic speeds,
//! phantom turn waypoints, gimbal pitch limits and the minimum separation
//! filter.

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::elevation::ElevationModel;
use crate::frame::CoordinateFrame;
use crate::geometry::{haversine_distance, normalize_deg_positive, Vec3};
use crate::hardware::{HardwareConfiguration, PhotoSettings, SpeedMode};
use crate::models::{Orientation, Waypoint};

/// Hover time at line ends whose turn cannot be flown smoothly. No image
/// is waited for.
const FORCED_STOP_S: f64 = 1.0;

/// Straight-line distance between two waypoints, heights included.
pub fn waypoint_distance(a: &Waypoint, b: &Waypoint) -> f64 {
    let horizontal = haversine_distance(a.position.lat, a.position.lon, b.position.lat, b.position.lon);
    horizontal.hypot(b.position.alt - a.position.alt)
}

/// Drop waypoints closer than `min_separation_m` to the previous kept one.
/// Returns the number removed.
pub fn remove_close(waypoints: &mut Vec<Waypoint>, min_separation_m: f64) -> usize {
    if min_separation_m <= 0.0 || waypoints.len() < 2 {
        return 0;
    }
    let before = waypoints.len();
    let mut kept: Vec<Waypoint> = Vec::with_capacity(before);
    for wp in waypoints.drain(..) {
        match kept.last() {
            Some(last) if waypoint_distance(last, &wp) < min_separation_m => {}
            _ => kept.push(wp),
        }
    }
    *waypoints = kept;
    before - waypoints.len()
}

pub struct PathPostprocessor<'a> {
    pub hw: &'a HardwareConfiguration,
    pub photo: &'a PhotoSettings,
    pub config: &'a EngineConfig,
    pub frame: &'a CoordinateFrame,
    pub elevation: &'a dyn ElevationModel,
    /// Lowest height above ground the container may be flown at
    pub crop_height_min_m: Option<f64>,
}

/// Where and how fast the two phantom waypoints of a line transition fly.
struct TurnPlan {
    speed_in: f64,
    speed_out: f64,
    /// Distance past the line ends
    reach: f64,
    feasible: bool,
}

impl PathPostprocessor<'_> {
    /// All steps in order.
    pub fn run(&self, mut waypoints: Vec<Waypoint>) -> Vec<Waypoint> {
        if self.photo.speed_mode == SpeedMode::AutomaticDynamic {
            self.assign_speeds(&mut waypoints);
        }
        if self.hw.platform.insert_phantom_waypoints {
            waypoints = self.insert_phantoms(waypoints);
        }
        if self.hw.platform.enforce_pitch_range {
            self.enforce_pitch_range(&mut waypoints);
        }
        let removed = remove_close(&mut waypoints, self.hw.platform.min_waypoint_separation_m);
        if removed > 0 {
            warn!(count = removed, "removed waypoints below minimum separation");
        }
        waypoints
    }

    /// Per-waypoint speed from the hop length and the time the gimbal needs.
    pub fn assign_speeds(&self, waypoints: &mut [Waypoint]) {
        let cam = &self.hw.camera;
        let platform_max = self.hw.platform.max_speed_mps;
        for i in 0..waypoints.len().saturating_sub(1) {
            let dist = waypoint_distance(&waypoints[i], &waypoints[i + 1]);
            let rotation = waypoints[i].orientation.max_abs_delta(&waypoints[i + 1].orientation);
            let rotation_time = if cam.angular_speed_deg_s > 0.0 {
                rotation / cam.angular_speed_deg_s
            } else {
                0.0
            };
            let time = cam.min_trigger_interval_s.max(rotation_time);
            let speed = if time > 0.0 { (dist / time).min(platform_max) } else { platform_max };

            let wp = &mut waypoints[i];
            if speed < self.config.min_speed_mps {
                wp.stop_time_s = wp.stop_time_s.max(time);
                wp.speed_mps = self.photo.max_ground_speed_mps.min(platform_max);
            } else {
                wp.speed_mps = speed;
            }
        }
    }

    fn ground_clearance(&self, local: &Vec3) -> f64 {
        let g = self.frame.to_global(local);
        local.z + self.frame.origin().alt - self.elevation.elevation(g.lat, g.lon)
    }

    fn phantom_allowed(&self, local: &Vec3) -> bool {
        let clearance = self.ground_clearance(local);
        clearance >= self.hw.platform.min_ground_distance_m
            && self.crop_height_min_m.map_or(true, |min| clearance >= min)
    }

    fn phantom(&self, line_end: &Waypoint, local: Vec3, orientation: Orientation, speed: f64) -> Waypoint {
        let mut wp = line_end.clone();
        wp.position = self.frame.to_global(&local);
        wp.orientation = orientation;
        wp.speed_mps = speed;
        wp.trigger_image = false;
        wp.stop_time_s = 0.0;
        wp.begins_flight_line = false;
        wp.target_distance_m = None;
        wp.label.clear();
        wp
    }

    /// Turn distances for leaving a line along `dir_in`, crossing `gap`
    /// meters along `dir_turn` and entering the next line along `dir_out`.
    /// Speeds drop when the gap is too short for the turn.
    fn plan_turn(&self, speed: f64, dir_in: Vec3, dir_turn: Vec3, dir_out: Vec3, gap: f64) -> TurnPlan {
        let cfg = self.config;
        let accel = cfg.phantom_max_accel_mps2.max(1e-6);
        let k_in = (dir_turn - dir_in).norm() / 2.0;
        let k_out = (dir_out - dir_turn).norm() / 2.0;
        let usable = cfg.phantom_safety_factor * gap;
        let turn_in = speed * speed * k_in / accel;
        let turn_out = speed * speed * k_out / accel;

        if usable > turn_in + turn_out {
            return TurnPlan {
                speed_in: speed,
                speed_out: speed,
                reach: turn_in.max(turn_out) + cfg.phantom_offset_m,
                feasible: true,
            };
        }
        let slowed = (usable / (k_in + k_out)).sqrt();
        let turn_in = slowed * slowed * k_in / accel;
        let turn_out = slowed * slowed * k_out / accel;
        let braking = (speed * speed - slowed * slowed) / 2.0 / accel;
        TurnPlan {
            speed_in: slowed,
            speed_out: slowed,
            reach: turn_in.max(turn_out) + braking + cfg.phantom_offset_m,
            feasible: k_in > 0.0 && k_out > 0.0,
        }
    }

    /// Smooth the transition between consecutive flight lines with two
    /// waypoints beyond the line ends, slowing down when lines are close.
    /// Transitions whose phantoms would sit too low stop at both line ends
    /// instead.
    pub fn insert_phantoms(&self, mut waypoints: Vec<Waypoint>) -> Vec<Waypoint> {
        let n = waypoints.len();
        if n < 4 {
            return waypoints;
        }
        let local: Vec<Vec3> = waypoints.iter().map(|w| self.frame.to_local(&w.position)).collect();
        let mut phantoms: Vec<Option<[Waypoint; 2]>> = vec![None; n];
        let mut forced_stops = 0usize;

        for i in 1..n - 2 {
            let (end, start) = (&waypoints[i], &waypoints[i + 1]);
            if !start.begins_flight_line || !end.trigger_image || !start.trigger_image {
                continue;
            }
            if end.has_stop() || start.has_stop() {
                continue;
            }
            let gap_vec = local[i + 1] - local[i];
            let gap = gap_vec.norm();
            let (Some(dir_in), Some(dir_out)) = (
                (local[i] - local[i - 1]).try_normalize(1e-9),
                (local[i + 2] - local[i + 1]).try_normalize(1e-9),
            ) else {
                continue;
            };
            if gap < 1e-9 {
                continue;
            }
            let speed = if end.speed_mps > 0.0 {
                end.speed_mps
            } else {
                self.photo.max_ground_speed_mps
            };
            if speed <= 0.0 {
                continue;
            }

            let turn = self.plan_turn(speed, dir_in, gap_vec / gap, dir_out, gap);
            let leave = local[i] + dir_in * turn.reach;
            let enter = local[i + 1] - dir_out * turn.reach;
            if turn.feasible && self.phantom_allowed(&leave) && self.phantom_allowed(&enter) {
                phantoms[i] = Some([
                    self.phantom(end, leave, end.orientation, turn.speed_in),
                    self.phantom(end, enter, start.orientation, turn.speed_out),
                ]);
            } else {
                waypoints[i].stop_time_s = FORCED_STOP_S;
                waypoints[i + 1].stop_time_s = FORCED_STOP_S;
                forced_stops += 1;
            }
        }

        let inserted = phantoms.iter().flatten().count() * 2;
        if inserted > 0 {
            debug!(count = inserted, "phantom waypoints inserted");
        }
        if forced_stops > 0 {
            debug!(count = forced_stops, "line transitions turned into stops");
        }
        let mut out = Vec::with_capacity(n + inserted);
        for (wp, extra) in waypoints.into_iter().zip(phantoms) {
            out.push(wp);
            out.extend(extra.into_iter().flatten());
        }
        out
    }

    /// Keep the gimbal pitch within the payload limits, turning around first
    /// and clamping as a last resort.
    pub fn enforce_pitch_range(&self, waypoints: &mut [Waypoint]) {
        let cam = &self.hw.camera;
        let tol = self.config.pitch_tolerance_deg;
        let (lo, hi) = (cam.min_pitch_deg.min(cam.max_pitch_deg), cam.max_pitch_deg.max(cam.min_pitch_deg));
        let in_range = |p: f64| p >= lo - tol && p <= hi + tol;
        for wp in waypoints.iter_mut() {
            let mut pitch = wp.orientation.pitch - 90.0;
            if !in_range(pitch) {
                // look the other way: turn around and mirror the gimbal
                let mirrored = -180.0 - pitch;
                if in_range(mirrored) {
                    pitch = mirrored;
                    wp.orientation.yaw = normalize_deg_positive(wp.orientation.yaw + 180.0);
                    wp.orientation.roll = -wp.orientation.roll;
                }
            }
            wp.orientation.pitch = pitch.clamp(lo, hi) + 90.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::FlatElevation;
    use crate::frame::GeoPosition;

    struct Fixture {
        hw: HardwareConfiguration,
        photo: PhotoSettings,
        config: EngineConfig,
        frame: CoordinateFrame,
        flat: FlatElevation,
        crop_height_min_m: Option<f64>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                hw: HardwareConfiguration::default(),
                photo: PhotoSettings::default(),
                config: EngineConfig::default(),
                frame: CoordinateFrame::new(GeoPosition::new(47.0, 8.0, 400.0)),
                flat: FlatElevation::new(400.0),
                crop_height_min_m: None,
            }
        }

        fn pp(&self) -> PathPostprocessor<'_> {
            PathPostprocessor {
                hw: &self.hw,
                photo: &self.photo,
                config: &self.config,
                frame: &self.frame,
                elevation: &self.flat,
                crop_height_min_m: self.crop_height_min_m,
            }
        }

        fn wp(&self, x: f64, y: f64, z: f64) -> Waypoint {
            let mut wp = Waypoint::new(self.frame.to_global(&Vec3::new(x, y, z)));
            wp.speed_mps = 10.0;
            wp
        }

        /// Two 100 m lines `spacing` apart, flown back and forth.
        fn two_lines(&self, spacing: f64, z: f64, speed: f64) -> Vec<Waypoint> {
            let ends = [(0.0, 0.0), (100.0, 0.0), (100.0, spacing), (0.0, spacing)];
            ends.iter()
                .enumerate()
                .map(|(k, &(x, y))| {
                    let mut wp = self.wp(x, y, z);
                    wp.speed_mps = speed;
                    wp.trigger_image = true;
                    wp.begins_flight_line = k % 2 == 0;
                    wp
                })
                .collect()
        }

        fn local(&self, wp: &Waypoint) -> Vec3 {
            self.frame.to_local(&wp.position)
        }
    }

    #[test]
    fn test_pitch_flipped_before_clamping() {
        let f = Fixture::new();
        let mut wps = vec![f.wp(0.0, 0.0, 50.0), f.wp(0.0, 0.0, 50.0)];
        // 10 degrees past nadir, camera rolled
        wps[0].orientation = Orientation::new(15.0, -10.0, 90.0);
        // 60 degrees up, beyond the 30 degree limit
        wps[1].orientation = Orientation::new(5.0, 150.0, 0.0);
        f.pp().enforce_pitch_range(&mut wps);
        assert!((wps[0].orientation.pitch - 10.0).abs() < 1e-9);
        assert!((wps[0].orientation.yaw - 270.0).abs() < 1e-9);
        assert!((wps[0].orientation.roll + 15.0).abs() < 1e-9);
        assert!((wps[1].orientation.pitch - 120.0).abs() < 1e-9);
        assert_eq!(wps[1].orientation.yaw, 0.0);
        assert_eq!(wps[1].orientation.roll, 5.0);
    }

    #[test]
    fn test_phantoms_beyond_line_ends() {
        let mut f = Fixture::new();
        f.hw.platform.insert_phantom_waypoints = true;
        let out = f.pp().insert_phantoms(f.two_lines(20.0, 50.0, 3.0));
        assert_eq!(out.len(), 6);
        let (leave, enter) = (&out[2], &out[3]);
        assert!(!leave.trigger_image && !enter.trigger_image);
        assert!(!leave.has_stop() && !enter.has_stop());
        // 9 m^2/s^2 * sin(45 deg) / 3 m/s^2 of turn plus the 0.5 m offset
        let reach = 9.0 * std::f64::consts::FRAC_1_SQRT_2 / 3.0 + 0.5;
        let (a, b) = (f.local(leave), f.local(enter));
        assert!((a.x - (100.0 + reach)).abs() < 1e-3 && a.y.abs() < 1e-3);
        assert!((b.x - (100.0 + reach)).abs() < 1e-3 && (b.y - 20.0).abs() < 1e-3);
        assert_eq!(leave.speed_mps, 3.0);
        assert_eq!(enter.orientation, out[4].orientation);
    }

    #[test]
    fn test_close_lines_slow_the_turn_down() {
        let f = Fixture::new();
        let out = f.pp().insert_phantoms(f.two_lines(20.0, 50.0, 10.0));
        assert_eq!(out.len(), 6);
        // 0.9 * 20 m shared by both turn halves
        let slowed = (18.0 / std::f64::consts::SQRT_2).sqrt();
        assert!((out[2].speed_mps - slowed).abs() < 1e-6);
        assert!((out[3].speed_mps - slowed).abs() < 1e-6);
        assert!(f.local(&out[2]).x > 110.0);
    }

    #[test]
    fn test_corner_inside_a_line_is_left_alone() {
        let f = Fixture::new();
        let mut wps: Vec<Waypoint> = [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]
            .iter()
            .map(|&(x, y)| f.wp(x, y, 50.0))
            .collect();
        for wp in &mut wps {
            wp.trigger_image = true;
        }
        wps[0].begins_flight_line = true;
        let out = f.pp().insert_phantoms(wps.clone());
        assert_eq!(out, wps);
    }

    #[test]
    fn test_low_phantoms_become_stops() {
        let f = Fixture::new();
        let out = f.pp().insert_phantoms(f.two_lines(20.0, 2.0, 3.0));
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].stop_time_s, FORCED_STOP_S);
        assert_eq!(out[2].stop_time_s, FORCED_STOP_S);
        assert!(!out[0].has_stop() && !out[3].has_stop());
    }

    #[test]
    fn test_phantoms_respect_crop_height() {
        let mut f = Fixture::new();
        f.crop_height_min_m = Some(60.0);
        let out = f.pp().insert_phantoms(f.two_lines(20.0, 50.0, 3.0));
        assert_eq!(out.len(), 4);
        assert!(out[1].has_stop() && out[2].has_stop());
    }

    #[test]
    fn test_dynamic_speed_slows_for_gimbal() {
        let mut f = Fixture::new();
        f.photo.speed_mode = SpeedMode::AutomaticDynamic;
        let mut wps = vec![f.wp(0.0, 0.0, 50.0), f.wp(20.0, 0.0, 50.0), f.wp(20.0, 0.0, 50.0)];
        wps[1].orientation = Orientation::new(0.0, 0.0, 180.0);
        f.pp().assign_speeds(&mut wps);
        // 20 m over the 4 s the gimbal needs for half a turn
        assert!((wps[0].speed_mps - 5.0).abs() < 0.05);
        // zero distance turns into a stop
        assert!(wps[1].has_stop());
    }
}
