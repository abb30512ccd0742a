//! Terrain elevation sampling.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::frame::{CoordinateFrame, GeoPosition};
use crate::geometry::{MinMax, Vec3};

/// Spacing of the samples taken along a line-of-sight query, meters.
const LINE_SAMPLE_SPACING_M: f64 = 10.0;
const MAX_LINE_SAMPLES: usize = 2_000;

pub trait ElevationModel: Send + Sync {
    /// Ground height above the WGS84 ellipsoid at a point.
    fn elevation(&self, lat: f64, lon: f64) -> f64;

    /// Minimum and maximum clearance between the straight line `a → b` and
    /// the ground. Positions carry heights relative to the frame origin.
    fn distance_to_ground(&self, frame: &CoordinateFrame, a: &GeoPosition, b: &GeoPosition) -> MinMax {
        let la = frame.to_local(a);
        let lb = frame.to_local(b);
        let len = (lb - la).xy().norm();
        let samples = ((len / LINE_SAMPLE_SPACING_M).ceil() as usize).clamp(1, MAX_LINE_SAMPLES);
        let ref_alt = frame.origin().alt;

        let mut clearance = MinMax::empty();
        for i in 0..=samples {
            let t = i as f64 / samples as f64;
            let p: Vec3 = la + (lb - la) * t;
            let g = frame.to_global(&p);
            clearance.update(p.z + ref_alt - self.elevation(g.lat, g.lon));
        }
        clearance
    }
}

/// Constant ground height everywhere.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FlatElevation {
    pub height_m: f64,
}

impl FlatElevation {
    pub fn new(height_m: f64) -> Self {
        Self { height_m }
    }
}

impl ElevationModel for FlatElevation {
    fn elevation(&self, _lat: f64, _lon: f64) -> f64 {
        self.height_m
    }
}

/// Regular lat/lon grid sampled bilinearly, clamped at its borders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct TerrainGrid {
    min_lat: f64,
    min_lon: f64,
    lat_step_deg: f64,
    lon_step_deg: f64,
    rows: usize,
    cols: usize,
    elevations_m: Vec<f64>,
}

#[derive(Deserialize)]
struct RawGrid {
    min_lat: f64,
    min_lon: f64,
    lat_step_deg: f64,
    lon_step_deg: f64,
    rows: usize,
    cols: usize,
    elevations_m: Vec<f64>,
}

impl TryFrom<RawGrid> for TerrainGrid {
    type Error = EngineError;

    fn try_from(raw: RawGrid) -> EngineResult<Self> {
        Self::new(
            raw.min_lat,
            raw.min_lon,
            raw.lat_step_deg,
            raw.lon_step_deg,
            raw.rows,
            raw.cols,
            raw.elevations_m,
        )
    }
}

impl TerrainGrid {
    /// Row-major grid starting at the south-west corner.
    pub fn new(
        min_lat: f64,
        min_lon: f64,
        lat_step_deg: f64,
        lon_step_deg: f64,
        rows: usize,
        cols: usize,
        elevations_m: Vec<f64>,
    ) -> EngineResult<Self> {
        if rows == 0 || cols == 0 || elevations_m.len() != rows * cols {
            return Err(EngineError::InvalidInput(format!(
                "terrain grid {rows}x{cols} does not match {} samples",
                elevations_m.len()
            )));
        }
        if !(lat_step_deg > 0.0 && lon_step_deg > 0.0) {
            return Err(EngineError::InvalidInput("terrain grid step must be positive".into()));
        }
        Ok(Self {
            min_lat,
            min_lon,
            lat_step_deg,
            lon_step_deg,
            rows,
            cols,
            elevations_m,
        })
    }

    pub fn max_lat(&self) -> f64 {
        self.min_lat + (self.rows - 1) as f64 * self.lat_step_deg
    }

    pub fn max_lon(&self) -> f64 {
        self.min_lon + (self.cols - 1) as f64 * self.lon_step_deg
    }

    pub fn sample(&self, lat: f64, lon: f64) -> f64 {
        if !lat.is_finite() || !lon.is_finite() {
            return 0.0;
        }
        let y = ((lat.clamp(self.min_lat, self.max_lat()) - self.min_lat) / self.lat_step_deg)
            .clamp(0.0, (self.rows - 1) as f64);
        let x = ((lon.clamp(self.min_lon, self.max_lon()) - self.min_lon) / self.lon_step_deg)
            .clamp(0.0, (self.cols - 1) as f64);

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(self.rows - 1);
        let x1 = (x0 + 1).min(self.cols - 1);
        let dy = y - y0 as f64;
        let dx = x - x0 as f64;

        let v00 = self.value_at(y0, x0);
        let v10 = self.value_at(y0, x1);
        let v01 = self.value_at(y1, x0);
        let v11 = self.value_at(y1, x1);

        let v0 = v00 + (v10 - v00) * dx;
        let v1 = v01 + (v11 - v01) * dx;
        v0 + (v1 - v0) * dy
    }

    fn value_at(&self, row: usize, col: usize) -> f64 {
        let idx = row.saturating_mul(self.cols) + col.min(self.cols - 1);
        self.elevations_m.get(idx).copied().unwrap_or(0.0)
    }
}

impl ElevationModel for TerrainGrid {
    fn elevation(&self, lat: f64, lon: f64) -> f64 {
        self.sample(lat, lon)
    }
}

fn grid_cache() -> &'static DashMap<String, Arc<TerrainGrid>> {
    static CACHE: OnceLock<DashMap<String, Arc<TerrainGrid>>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Process-wide grid shared by key; `load` runs once per key.
pub fn shared_grid<F>(key: &str, load: F) -> EngineResult<Arc<TerrainGrid>>
where
    F: FnOnce() -> EngineResult<TerrainGrid>,
{
    if let Some(grid) = grid_cache().get(key) {
        return Ok(Arc::clone(&grid));
    }
    let grid = Arc::new(load()?);
    let entry = grid_cache().entry(key.to_string()).or_insert(grid);
    Ok(Arc::clone(&entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> TerrainGrid {
        // 3x3, rising 10 m per column eastward
        let elevations = vec![0.0, 10.0, 20.0, 0.0, 10.0, 20.0, 0.0, 10.0, 20.0];
        TerrainGrid::new(47.0, 8.0, 0.01, 0.01, 3, 3, elevations).unwrap()
    }

    #[test]
    fn test_bilinear_sample_and_clamp() {
        let grid = ramp();
        assert!((grid.sample(47.005, 8.005) - 5.0).abs() < 1e-9);
        assert!((grid.sample(47.0, 8.5) - 20.0).abs() < 1e-9);
        assert_eq!(grid.sample(f64::NAN, 8.0), 0.0);
    }

    #[test]
    fn test_grid_size_mismatch_rejected() {
        assert!(TerrainGrid::new(0.0, 0.0, 0.1, 0.1, 2, 2, vec![0.0; 3]).is_err());
        let json = r#"{"min_lat":0,"min_lon":0,"lat_step_deg":0.1,"lon_step_deg":0.1,"rows":0,"cols":0,"elevations_m":[]}"#;
        assert!(serde_json::from_str::<TerrainGrid>(json).is_err());
    }

    #[test]
    fn test_distance_to_ground_over_flat_terrain() {
        let frame = CoordinateFrame::new(GeoPosition::new(47.0, 8.0, 400.0));
        let flat = FlatElevation::new(390.0);
        let a = GeoPosition::new(47.0, 8.0, 20.0);
        let b = GeoPosition::new(47.001, 8.0, 40.0);
        let d = flat.distance_to_ground(&frame, &a, &b);
        assert!((d.min - 30.0).abs() < 1e-6 && (d.max - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_shared_grid_loads_once() {
        let first = shared_grid("elevation-test-ramp", || Ok(ramp())).unwrap();
        let second = shared_grid("elevation-test-ramp", || Err(EngineError::Cancelled)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
