//! Engine tunables with environment overrides.

use std::env;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Estimated image count above which an AOI is rejected
    pub max_num_pics: usize,
    /// Extra height added on top of a required obstacle clearance
    pub jump_safety_margin_m: f64,
    /// Lowest automatic safety altitude above the takeoff
    pub min_height_over_takeoff_m: f64,
    /// Turn acceleration assumed when placing phantom waypoints
    pub phantom_max_accel_mps2: f64,
    /// Extra distance between a line end and its phantom waypoint
    pub phantom_offset_m: f64,
    /// Share of the gap between two lines a turn may use
    pub phantom_safety_factor: f64,
    pub pitch_tolerance_deg: f64,
    /// Below this a waypoint becomes a timed stop
    pub min_speed_mps: f64,
    /// Horizontal clearance kept around planar obstacles
    pub collision_margin_m: f64,
    pub hull_angle_step_deg: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_num_pics: 10_000,
            jump_safety_margin_m: 1.0,
            min_height_over_takeoff_m: 10.0,
            phantom_max_accel_mps2: 3.0,
            phantom_offset_m: 0.5,
            phantom_safety_factor: 0.9,
            pitch_tolerance_deg: 2.0,
            min_speed_mps: 0.1,
            collision_margin_m: 1.0,
            hull_angle_step_deg: 5.0,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FP_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `FP_*` keys.
    /// Values that fail to parse keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env_or = |key: &str, default: f64| lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default);
        let d = Self::default();
        Self {
            max_num_pics: lookup("FP_MAX_NUM_PICS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.max_num_pics),
            jump_safety_margin_m: env_or("FP_JUMP_SAFETY_MARGIN_M", d.jump_safety_margin_m),
            min_height_over_takeoff_m: env_or("FP_MIN_HEIGHT_OVER_TAKEOFF_M", d.min_height_over_takeoff_m),
            phantom_max_accel_mps2: env_or("FP_PHANTOM_MAX_ACCEL_MPS2", d.phantom_max_accel_mps2),
            phantom_offset_m: env_or("FP_PHANTOM_OFFSET_M", d.phantom_offset_m),
            phantom_safety_factor: env_or("FP_PHANTOM_SAFETY_FACTOR", d.phantom_safety_factor),
            pitch_tolerance_deg: env_or("FP_PITCH_TOLERANCE_DEG", d.pitch_tolerance_deg),
            min_speed_mps: env_or("FP_MIN_SPEED_MPS", d.min_speed_mps),
            collision_margin_m: env_or("FP_COLLISION_MARGIN_M", d.collision_margin_m),
            hull_angle_step_deg: env_or("FP_HULL_ANGLE_STEP_DEG", d.hull_angle_step_deg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    #[test]
    fn test_override_and_fallback() {
        let vars: HashMap<&str, &str> = [
            ("FP_MAX_NUM_PICS", "42"),
            ("FP_MIN_SPEED_MPS", "not-a-number"),
            ("FP_JUMP_SAFETY_MARGIN_M", "2.5"),
        ]
        .into_iter()
        .collect();
        let cfg = EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(cfg.max_num_pics, 42);
        assert_eq!(cfg.min_speed_mps, 0.1);
        assert_eq!(cfg.jump_safety_margin_m, 2.5);
        assert_eq!(cfg.hull_angle_step_deg, 5.0);
    }

    #[test]
    fn test_empty_lookup_is_default() {
        let cfg = EngineConfig::from_lookup(|_| None);
        let d = EngineConfig::default();
        assert_eq!(cfg.max_num_pics, d.max_num_pics);
        assert_eq!(cfg.min_height_over_takeoff_m, d.min_height_over_takeoff_m);
    }
}
