//! Imported target list: one camera waypoint per target.
//!
//! Each non-comment line holds `;`-separated fields:
//! `name;name2;lon;lat;h_msl;h_terrain_ft;heading;pitch;_;fov_h_ft;fov_v_ft`.
//! Decimal commas are accepted. The drone is placed on the view ray so the
//! requested field of view fills the image.

use tracing::{debug, warn};

use crate::error::{PlanResult, RecomputeError};
use crate::footprint::Footprint;
use crate::frame::{CoordinateFrame, GeoPosition};
use crate::geometry::Vec3;
use crate::hardware::{PhotoSettings, SpeedMode};
use crate::models::{AltAssertMode, Orientation, Waypoint};

use super::PlanEnv;

const FEET_TO_M: f64 = 0.3048;
const MIN_FIELDS: usize = 11;

#[derive(Debug, Clone, PartialEq)]
struct Target {
    name: String,
    lat: f64,
    lon: f64,
    height_over_terrain_m: f64,
    heading_deg: f64,
    /// Stored pitch (0 = down)
    pitch_deg: f64,
    fov_h_m: f64,
    fov_v_m: f64,
}

fn number(fields: &[&str], i: usize) -> Result<f64, String> {
    let raw = fields[i].trim().replace(',', ".");
    raw.parse::<f64>().map_err(|_| format!("field {i} is not a number: '{raw}'"))
}

fn parse_line(line: &str) -> Result<Target, String> {
    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < MIN_FIELDS {
        return Err(format!("expected {MIN_FIELDS} fields, found {}", fields.len()));
    }
    Ok(Target {
        name: format!("{} {}", fields[0].trim(), fields[1].trim()).trim().to_string(),
        lon: number(&fields, 2)?,
        lat: number(&fields, 3)?,
        height_over_terrain_m: number(&fields, 5)? * FEET_TO_M,
        heading_deg: number(&fields, 6)?,
        pitch_deg: number(&fields, 7)? + 90.0,
        fov_h_m: number(&fields, 9)? * FEET_TO_M,
        fov_v_m: number(&fields, 10)? * FEET_TO_M,
    })
}

/// Build the waypoints for a target list. `fp` is the footprint at 1 m.
pub fn build(text: &str, fp: &Footprint, env: &PlanEnv<'_>, photo: &PhotoSettings) -> PlanResult<Vec<Waypoint>> {
    if fp.size_parallel <= 0.0 || fp.size_in_flight <= 0.0 {
        return Err(RecomputeError::CamNotMatchable);
    }
    let frame = CoordinateFrame::new(env.reference);
    let stop = if photo.stop_at_waypoints && photo.speed_mode == SpeedMode::ManualConstant {
        env.hw.camera.min_trigger_interval_s
    } else {
        0.0
    };

    let mut out = Vec::new();
    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let target = match parse_line(line) {
            Ok(t) => t,
            Err(reason) => {
                warn!(line = line_no + 1, %reason, "skipping target point");
                continue;
            }
        };

        let distance = (target.fov_h_m / fp.size_parallel).max(target.fov_v_m / fp.size_in_flight);
        let terrain = env.elevation.elevation(target.lat, target.lon);
        let center = frame.to_local(&GeoPosition::new(
            target.lat,
            target.lon,
            terrain + target.height_over_terrain_m - env.reference.alt,
        ));
        let (p, h) = (target.pitch_deg.to_radians(), target.heading_deg.to_radians());
        let view = Vec3::new(p.sin() * h.sin(), p.sin() * h.cos(), -p.cos());
        let drone = center - view * distance;

        let mut wp = Waypoint::new(frame.to_global(&drone));
        wp.alt_mode = AltAssertMode::Linear;
        wp.label = target.name;
        wp.target_distance_m = Some(distance);
        wp.trigger_image = true;
        wp.speed_mps = photo.max_ground_speed_mps;
        wp.stop_time_s = stop;
        wp.orientation = Orientation::new(0.0, target.pitch_deg, target.heading_deg);
        wp.begins_flight_line = out.is_empty();
        out.push(wp);
    }
    debug!(count = out.len(), "target points imported");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_decimal_commas() {
        let t = parse_line("Mast;North;8,5;47,25;500;100;90;-45;0;10;20").unwrap();
        assert_eq!(t.name, "Mast North");
        assert!((t.lon - 8.5).abs() < 1e-12);
        assert!((t.lat - 47.25).abs() < 1e-12);
        assert!((t.height_over_terrain_m - 30.48).abs() < 1e-9);
        assert!((t.pitch_deg - 45.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_line_rejected() {
        assert!(parse_line("a;b;1;2;3").is_err());
        assert!(parse_line("a;b;x;2;3;4;5;6;7;8;9").is_err());
    }
}
