//! Error types for the flight-plan engine.
//!
//! Two layers exist: [`RecomputeError`] is recorded on an area of interest
//! as its "last error" and never aborts a recompute pass, while
//! [`EngineError`] aborts the whole pass.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-AOI failure, stored on the AOI after a recompute.
///
/// When one of these is recorded the AOI's generated lines and waypoints
/// are cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum RecomputeError {
    #[error("too few corners for this pattern (need {required}, have {actual})")]
    TooFewCorners { required: usize, actual: usize },
    #[error("camera cannot be matched to the requested altitude or GSD")]
    CamNotMatchable,
    #[error("area is too small to place any scan line")]
    AreaTooSmall,
    #[error("too many waypoints (limit {limit})")]
    TooManyPoints { limit: usize },
    #[error("pattern type is not supported by this platform")]
    AoiTypeNotSupported,
    #[error("no waypoints could be produced")]
    NoWaypoints,
    #[error("internal error: {0}")]
    Exception(String),
}

/// Failures that abort a recompute pass or an engine entry point.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("obstacle '{aoi}' requires an unreachable clearance height")]
    UnreachableObstacle { aoi: String },

    #[error("coordinate frame used before a reference point was set")]
    FrameNotInitialized,

    #[error("no takeoff or landing container available to place an avoidance waypoint")]
    NoContainerForAvoidance,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("background computation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for the per-AOI planning steps.
pub type PlanResult<T> = Result<T, RecomputeError>;
