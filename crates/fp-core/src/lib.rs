//! Flight-plan geometry engine
//!
//! Turns areas of interest into camera waypoints for survey drones: footprint
//! sizing, per-pattern coverage lines, connector collision checks with
//! climb-over avoidance, and path post-processing.

pub mod background;
pub mod collision;
pub mod config;
pub mod corridor;
pub mod elevation;
pub mod error;
pub mod footprint;
pub mod frame;
pub mod geometry;
pub mod hardware;
pub mod hull;
pub mod models;
pub mod planner;
pub mod postprocess;
pub mod recompute;
pub mod windmill;

pub use background::{apply_object_coverage, spawn_object_coverage, CoverageTask};
pub use collision::{Collision, CollisionChecker, Obstacle, Segment};
pub use config::EngineConfig;
pub use elevation::{ElevationModel, FlatElevation, TerrainGrid};
pub use error::{EngineError, EngineResult, PlanResult, RecomputeError};
pub use footprint::{Footprint, FootprintCalculator, ScanSizes};
pub use frame::{AoiFrame, CoordinateFrame, GeoPosition};
pub use hardware::{
    AltitudeAdjustMode, CameraDescription, HardwareConfiguration, PhotoSettings, PlatformDescription, SpeedMode,
};
pub use models::{
    AoiParameters, AreaOfInterest, EventList, FlightLine, FlightPlan, Landing, Orientation, PlanType,
    PreApproach, Statement, Takeoff, Waypoint,
};
pub use postprocess::{remove_close, PathPostprocessor};
pub use recompute::{BatchScope, Engine, EngineContext, PlanChanged, RecomputeStatus};
pub use windmill::{WindmillGeometry, WindmillParams};
