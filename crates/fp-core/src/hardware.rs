//! Camera, lens and platform descriptors plus the plan-level photo settings.
//!
//! These are read-only for the duration of a recompute and reach the engine
//! through [`crate::recompute::EngineContext`].

use serde::{Deserialize, Serialize};

/// Image sensor and lens of the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDescription {
    /// Sensor width in millimeters (along flight direction)
    pub ccd_width_mm: f64,
    /// Sensor height in millimeters (across flight direction)
    pub ccd_height_mm: f64,
    /// Pixel count along the sensor width
    pub ccd_res_x: u32,
    /// Pixel count along the sensor height
    pub ccd_res_y: u32,
    /// Sensor shift relative to the optical axis, millimeters
    pub ccd_x_transl_mm: f64,
    pub ccd_y_transl_mm: f64,
    /// Lens focal length in millimeters
    pub focal_length_mm: f64,
    /// Minimum time between two triggers (seconds)
    pub min_trigger_interval_s: f64,
    /// Delay between trigger command and exposure (seconds)
    pub camera_delay_s: f64,
    /// Exposure time used for the motion-blur limit (seconds)
    pub exposure_time_s: f64,
    /// Tolerated motion blur in pixels
    pub max_motion_blur_px: f64,
    /// Fixed mount tilt around the flight axis
    pub mount_roll_deg: f64,
    /// Fixed mount tilt around the cross-track axis
    pub mount_pitch_deg: f64,
    /// Camera position relative to the autopilot, meters
    pub offset_to_tail_m: f64,
    pub offset_to_right_wing_m: f64,
    /// Gimbal pitch limits (0 = horizontal, -90 = straight down)
    pub min_pitch_deg: f64,
    pub max_pitch_deg: f64,
    /// Gimbal slew rate, degrees per second
    pub angular_speed_deg_s: f64,
}

impl Default for CameraDescription {
    fn default() -> Self {
        Self {
            ccd_width_mm: 13.2,
            ccd_height_mm: 8.8,
            ccd_res_x: 5472,
            ccd_res_y: 3648,
            ccd_x_transl_mm: 0.0,
            ccd_y_transl_mm: 0.0,
            focal_length_mm: 8.8,
            min_trigger_interval_s: 2.0,
            camera_delay_s: 0.0,
            exposure_time_s: 1.0 / 1000.0,
            max_motion_blur_px: 0.5,
            mount_roll_deg: 0.0,
            mount_pitch_deg: 0.0,
            offset_to_tail_m: 0.0,
            offset_to_right_wing_m: 0.0,
            min_pitch_deg: -90.0,
            max_pitch_deg: 30.0,
            angular_speed_deg_s: 45.0,
        }
    }
}

impl CameraDescription {
    /// Mean pixel pitch of the sensor in millimeters.
    pub fn pixel_size_mm(&self) -> f64 {
        let px = self.ccd_width_mm / f64::from(self.ccd_res_x.max(1));
        let py = self.ccd_height_mm / f64::from(self.ccd_res_y.max(1));
        (px + py) / 2.0
    }

    /// Ground sample distance (meters) at `distance_m` from the sensor.
    pub fn gsd_at_distance(&self, distance_m: f64) -> f64 {
        distance_m / self.focal_length_mm * self.pixel_size_mm()
    }

    /// Distance (meters) at which the sensor achieves `gsd_m`.
    pub fn distance_for_gsd(&self, gsd_m: f64) -> f64 {
        gsd_m * self.focal_length_mm / self.pixel_size_mm()
    }
}

/// Flight platform capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformDescription {
    pub name: String,
    /// Multicopter (true) or fixed wing (false)
    pub copter_mode: bool,
    /// Maximum horizontal speed in m/s
    pub max_speed_mps: f64,
    /// Cruise speed of a fixed wing in m/s
    pub plane_speed_mps: f64,
    pub turn_radius_m: f64,
    /// Minimum distance to ground in meters
    pub min_ground_distance_m: f64,
    /// Waypoints closer than this are merged (0 disables)
    pub min_waypoint_separation_m: f64,
    /// Extra line length a fixed wing needs to settle, meters
    pub overshoot_m: f64,
    /// Plan an individual waypoint per image instead of trigger-by-distance
    pub plan_individual_image_positions: bool,
    /// Autopilot triggers images on both sides of each corner
    pub images_before_after_corners: bool,
    pub insert_phantom_waypoints: bool,
    pub enforce_pitch_range: bool,
}

impl Default for PlatformDescription {
    fn default() -> Self {
        Self {
            name: "generic-copter".into(),
            copter_mode: true,
            max_speed_mps: 12.0,
            plane_speed_mps: 12.0,
            turn_radius_m: 0.0,
            min_ground_distance_m: 5.0,
            min_waypoint_separation_m: 0.0,
            overshoot_m: 0.0,
            plan_individual_image_positions: true,
            images_before_after_corners: false,
            insert_phantom_waypoints: false,
            enforce_pitch_range: true,
        }
    }
}

/// Camera + platform, fixed for one recompute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfiguration {
    #[serde(default)]
    pub camera: CameraDescription,
    #[serde(default)]
    pub platform: PlatformDescription,
}

/// How flight speed is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    /// Fly `max_ground_speed_mps` everywhere
    #[default]
    ManualConstant,
    /// One speed for the whole plan, derived from overlap and blur limits
    AutomaticConstant,
    /// Per-waypoint speed from distance and gimbal rotation time
    AutomaticDynamic,
}

impl SpeedMode {
    pub fn is_automatically_adjusting(self) -> bool {
        matches!(self, SpeedMode::AutomaticConstant | SpeedMode::AutomaticDynamic)
    }
}

/// What AOI flight altitudes are measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeAdjustMode {
    /// Constant height above the plan reference point
    #[default]
    ConstantOverReference,
    /// Height above the terrain below each waypoint
    FollowTerrain,
}

impl AltitudeAdjustMode {
    pub fn uses_absolute_heights(self) -> bool {
        self == AltitudeAdjustMode::FollowTerrain
    }
}

/// Plan-level photo settings as the user chose them. Speeds derived per AOI
/// are stored on the AOI, never written back here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoSettings {
    pub speed_mode: SpeedMode,
    pub max_ground_speed_mps: f64,
    /// Stop at each waypoint before triggering (copters)
    pub stop_at_waypoints: bool,
    pub altitude_adjust_mode: AltitudeAdjustMode,
}

impl Default for PhotoSettings {
    fn default() -> Self {
        Self {
            speed_mode: SpeedMode::ManualConstant,
            max_ground_speed_mps: 5.0,
            stop_at_waypoints: false,
            altitude_adjust_mode: AltitudeAdjustMode::ConstantOverReference,
        }
    }
}
