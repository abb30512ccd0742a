//! Camera footprint and the speed / altitude / GSD trade-off.
//!
//! Local convention: x points along the flight direction, y to the left,
//! z up. The sensor width lies along x, the sensor height along y.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{PlanResult, RecomputeError};
use crate::geometry::{MinMax, Vec3};
use crate::hardware::{CameraDescription, HardwareConfiguration, PhotoSettings, SpeedMode};

/// Projected ground footprint at one altitude, reduced to the largest
/// axis-aligned rectangle inside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub altitude_m: f64,
    pub gsd_m: f64,
    /// Usable footprint length along the flight direction
    pub size_in_flight: f64,
    /// Usable footprint width across the flight direction
    pub size_parallel: f64,
    /// Center of the usable rectangle relative to the platform
    pub centrency_in_flight: f64,
    pub centrency_parallel: f64,
    /// In-flight skew between the left and right border of a tilted footprint
    pub shape_overshoot: f64,
    /// Usable rectangle area / full footprint area
    pub efficiency: f64,
}

/// Footprint math for one camera. Stateless; methods borrow the hardware.
pub struct FootprintCalculator<'a> {
    hw: &'a HardwareConfiguration,
}

impl<'a> FootprintCalculator<'a> {
    pub fn new(hw: &'a HardwareConfiguration) -> Self {
        Self { hw }
    }

    fn camera(&self) -> &CameraDescription {
        &self.hw.camera
    }

    /// Resolve the flight altitude from a GSD target, or pass an explicit
    /// altitude through.
    ///
    /// Fails with `CamNotMatchable` when the GSD would require flying below
    /// the platform's minimum ground distance or the optics are degenerate.
    pub fn resolve_altitude(&self, altitude_m: f64, gsd_m: Option<f64>) -> PlanResult<f64> {
        let cam = self.camera();
        if cam.focal_length_mm <= 0.0 || cam.pixel_size_mm() <= 0.0 {
            return Err(RecomputeError::CamNotMatchable);
        }
        let alt = match gsd_m {
            Some(gsd) if gsd > 0.0 => {
                let tilt = self.mount_tilt_cos();
                let alt = cam.distance_for_gsd(gsd) * tilt;
                if alt < self.hw.platform.min_ground_distance_m {
                    return Err(RecomputeError::CamNotMatchable);
                }
                alt
            }
            Some(_) => return Err(RecomputeError::CamNotMatchable),
            None => altitude_m,
        };
        if !alt.is_finite() || alt <= 0.0 {
            return Err(RecomputeError::CamNotMatchable);
        }
        Ok(alt)
    }

    fn mount_tilt_cos(&self) -> f64 {
        let cam = self.camera();
        cam.mount_roll_deg.to_radians().cos() * cam.mount_pitch_deg.to_radians().cos()
    }

    /// Sensor corner rays in platform coordinates, in ring order.
    fn corner_directions(&self) -> [Vec3; 4] {
        let cam = self.camera();
        let w = cam.ccd_width_mm / 2.0;
        let h = cam.ccd_height_mm / 2.0;
        let f = cam.focal_length_mm;
        let mount = Rotation3::from_axis_angle(&Vector3::x_axis(), cam.mount_roll_deg.to_radians())
            * Rotation3::from_axis_angle(&Vector3::y_axis(), cam.mount_pitch_deg.to_radians());

        [(1.0, 1.0), (1.0, -1.0), (-1.0, -1.0), (-1.0, 1.0)].map(|(sx, sy)| {
            mount * Vec3::new(sx * w + cam.ccd_x_transl_mm, sy * h + cam.ccd_y_transl_mm, -f)
        })
    }

    /// Compute the footprint at `altitude_m` above flat ground.
    pub fn footprint(&self, altitude_m: f64) -> PlanResult<Footprint> {
        let mut ground = [Vec3::zeros(); 4];
        for (slot, dir) in ground.iter_mut().zip(self.corner_directions()) {
            if dir.z >= -1e-9 {
                // Ray points at or above the horizon.
                return Err(RecomputeError::CamNotMatchable);
            }
            *slot = dir * (altitude_m / -dir.z);
        }

        let mut ys: Vec<f64> = ground.iter().map(|p| p.y).collect();
        ys.sort_by(f64::total_cmp);
        let (cut_low, cut_high) = (ys[1], ys[2]);

        let span_low = x_span_at(&ground, cut_low);
        let span_high = x_span_at(&ground, cut_high);
        let inner = MinMax {
            min: span_low.min.max(span_high.min),
            max: span_low.max.min(span_high.max),
        };

        let size_parallel = cut_high - cut_low;
        let size_in_flight = inner.size();
        if size_parallel <= 0.0 || size_in_flight <= 0.0 {
            return Err(RecomputeError::CamNotMatchable);
        }

        let full_area = crate::geometry::polygon_signed_area(&ground).abs();
        let cam = self.camera();
        let center_dist = (altitude_m / self.mount_tilt_cos()).abs();

        Ok(Footprint {
            altitude_m,
            gsd_m: cam.gsd_at_distance(center_dist),
            size_in_flight,
            size_parallel,
            centrency_in_flight: inner.mean() + cam.offset_to_tail_m,
            centrency_parallel: (cut_low + cut_high) / 2.0 - cam.offset_to_right_wing_m,
            shape_overshoot: (span_low.mean() - span_high.mean()).abs(),
            efficiency: if full_area > 0.0 {
                size_parallel * size_in_flight / full_area
            } else {
                0.0
            },
        })
    }

    /// Fastest ground speed keeping motion blur within tolerance.
    pub fn max_speed_for_motion_blur(&self, gsd_m: f64) -> f64 {
        let cam = self.camera();
        if cam.exposure_time_s <= 0.0 {
            return f64::INFINITY;
        }
        gsd_m * cam.max_motion_blur_px / cam.exposure_time_s
    }

    /// Raise the plan speed toward the fastest speed the overlap and blur
    /// limits allow.
    ///
    /// A speed still sitting at the platform maximum is treated as "never
    /// chosen" and replaced outright; otherwise the speed only grows.
    pub fn compensate_motion_blur(
        &self,
        photo: &mut PhotoSettings,
        gsd_m: f64,
        size_in_flight_eff: f64,
    ) {
        let platform_max = self.hw.platform.max_speed_mps;
        let blur_max = self.max_speed_for_motion_blur(gsd_m);
        let optimal = if photo.speed_mode == SpeedMode::AutomaticDynamic {
            blur_max.min(platform_max)
        } else {
            let interval = self.camera().min_trigger_interval_s.max(1e-6);
            blur_max.min(size_in_flight_eff / interval).min(platform_max)
        };

        if photo.max_ground_speed_mps == platform_max || photo.max_ground_speed_mps < optimal {
            photo.max_ground_speed_mps = optimal;
        }
    }

    /// Highest forward overlap (percent) reachable at `speed_mps`.
    pub fn max_possible_overlap_in_flight(&self, speed_mps: f64, size_in_flight: f64) -> f64 {
        if size_in_flight <= 0.0 {
            return 0.0;
        }
        100.0 * (1.0 - speed_mps * self.camera().min_trigger_interval_s / size_in_flight)
    }

    /// Rough image count for an area, used as a safety cap before planning.
    pub fn estimate_pics(&self, area_m2: f64, altitude_m: f64, overlap_parallel: f64, overlap_in_flight: f64) -> f64 {
        let cam = self.camera();
        let f = cam.focal_length_mm;
        let across = altitude_m * cam.ccd_height_mm * (1.0 - overlap_parallel / 100.0) / f;
        let along = altitude_m * cam.ccd_width_mm * (1.0 - overlap_in_flight / 100.0) / f;
        let per_image = across * along;
        if per_image <= 0.0 {
            return f64::INFINITY;
        }
        area_m2 / per_image
    }
}

/// In-flight extent of the footprint quad along the cross-track line `y`.
fn x_span_at(quad: &[Vec3; 4], y: f64) -> MinMax {
    let mut span = MinMax::empty();
    for i in 0..4 {
        let a = &quad[i];
        let b = &quad[(i + 1) % 4];
        if (a.y - y).abs() < 1e-9 {
            span.update(a.x);
        }
        if (a.y - y) * (b.y - y) < 0.0 {
            let t = (y - a.y) / (b.y - a.y);
            span.update(a.x + t * (b.x - a.x));
        }
    }
    span
}

/// Derived line spacing and line-end extensions for one AOI.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScanSizes {
    pub size_in_flight: f64,
    pub size_parallel: f64,
    pub size_in_flight_eff: f64,
    pub size_in_flight_eff_max: f64,
    pub size_parallel_eff: f64,
    pub overshoot_parallel: f64,
    pub overshoot_inner_lines_end: f64,
    pub overshoot_total_lines_end: f64,
    pub centrency_in_flight: f64,
    pub centrency_parallel: f64,
}

/// Overlap inputs for [`ScanSizes::compute`], all in percent.
#[derive(Debug, Clone, Copy)]
pub struct Overlaps {
    pub in_flight: f64,
    pub in_flight_min: f64,
    pub parallel: f64,
}

impl ScanSizes {
    pub fn compute(fp: &Footprint, ov: Overlaps, hw: &HardwareConfiguration) -> Self {
        let platform = &hw.platform;
        let individual = platform.plan_individual_image_positions;

        let size_in_flight_eff = (1.0 - ov.in_flight / 100.0) * fp.size_in_flight;
        let size_in_flight_eff_max = (1.0 - ov.in_flight_min / 100.0) * fp.size_in_flight;
        let size_parallel_eff = (1.0 - ov.parallel / 100.0) * fp.size_parallel;
        let overshoot_parallel = (ov.parallel - 50.0) / 100.0 * fp.size_parallel;

        let base = if individual { 0.0 } else { platform.overshoot_m };
        let overshoot_inner_lines_end = base - size_in_flight_eff / 2.0;

        let mut overshoot_total_lines_end = base;
        if !individual {
            overshoot_total_lines_end += if platform.images_before_after_corners {
                platform.plane_speed_mps * hw.camera.min_trigger_interval_s / 2.0
            } else {
                size_in_flight_eff_max / 2.0
            };
        }
        let end_overlap = if platform.copter_mode { ov.in_flight } else { ov.in_flight_min };
        overshoot_total_lines_end += (end_overlap - 50.0) / 100.0 * fp.size_in_flight;
        overshoot_total_lines_end += fp.shape_overshoot;

        Self {
            size_in_flight: fp.size_in_flight,
            size_parallel: fp.size_parallel,
            size_in_flight_eff,
            size_in_flight_eff_max,
            size_parallel_eff,
            overshoot_parallel,
            overshoot_inner_lines_end,
            overshoot_total_lines_end,
            centrency_in_flight: fp.centrency_in_flight,
            centrency_parallel: fp.centrency_parallel,
        }
    }
}
