//! Long-running object-coverage planning for free 3-D AOIs.
//!
//! The lines are computed on a blocking worker from a snapshot of the AOI.
//! Progress runs from 0 to [`PROGRESS_DONE`]; cancellation is checked between
//! phases and a cancelled run never touches the AOI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult, RecomputeError};
use crate::footprint::{FootprintCalculator, Overlaps, ScanSizes};
use crate::frame::GeoPosition;
use crate::hull::{self, HullOptions};
use crate::models::{AreaOfInterest, FlightLine, PlanType};
use crate::planner::{vertical, LineInput};
use crate::recompute::EngineContext;

pub const PROGRESS_DONE: u32 = 1000;

/// Handle to a running object-coverage computation.
pub struct CoverageTask {
    aoi: String,
    progress: watch::Receiver<u32>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<EngineResult<Vec<FlightLine>>>,
}

impl CoverageTask {
    /// Latest progress in per mille.
    pub fn progress(&self) -> u32 {
        *self.progress.borrow()
    }

    pub fn progress_watch(&self) -> watch::Receiver<u32> {
        self.progress.clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub async fn join(self) -> EngineResult<Vec<FlightLine>> {
        let result = match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(EngineError::Cancelled),
            Err(e) => Err(EngineError::InvalidInput(format!("coverage worker failed: {e}"))),
        };
        if let Err(e) = &result {
            warn!(aoi = %self.aoi, error = %e, "object coverage not applied");
        }
        result
    }
}

struct Worker {
    aoi: AreaOfInterest,
    ctx: EngineContext,
    reference: GeoPosition,
    progress: watch::Sender<u32>,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    fn step(&self, value: u32) -> EngineResult<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(EngineError::Cancelled);
        }
        self.progress.send_replace(value);
        Ok(())
    }

    fn run(mut self) -> EngineResult<Vec<FlightLine>> {
        let hw = &self.ctx.hardware;
        let calc = FootprintCalculator::new(hw);
        let p = self.aoi.params();
        let planned = calc
            .resolve_altitude(p.altitude_m, p.gsd_m)
            .and_then(|alt| calc.footprint(alt).map(|fp| (alt, fp)));
        let (altitude, fp) = planned.map_err(invalid)?;
        let sizes = ScanSizes::compute(
            &fp,
            Overlaps {
                in_flight: p.overlap_in_flight,
                in_flight_min: p.overlap_in_flight_min,
                parallel: p.overlap_parallel,
            },
            hw,
        );
        self.step(250)?;

        let geo = hull::compute(
            &self.aoi,
            self.reference.alt,
            HullOptions {
                angle_step_deg: self.ctx.config.hull_angle_step_deg,
                line_spacing: Some(sizes.size_parallel_eff),
                altitude_m: altitude,
            },
        )
        .map_err(invalid)?;
        hull::apply(&mut self.aoi, geo);
        self.step(500)?;

        let aoi = &self.aoi;
        let input = LineInput {
            plan_type: PlanType::Copter3d,
            params: aoi.params(),
            corners: &aoi.derived.corners_local,
            sizes: &sizes,
            altitude,
            length_x: aoi.derived.length_x,
            length_y: aoi.derived.length_y,
            hw,
            scan_yaw: hull::scan_yaw(aoi),
            prev: None,
            next: None,
        };
        let lines = vertical::building(&input);
        if lines.is_empty() {
            return Err(invalid(RecomputeError::NoWaypoints));
        }
        self.step(900)?;

        debug!(aoi = %aoi.name, lines = lines.len(), "object coverage computed");
        self.step(PROGRESS_DONE)?;
        Ok(lines)
    }
}

fn invalid(e: RecomputeError) -> EngineError {
    EngineError::InvalidInput(e.to_string())
}

/// Start object-coverage planning for a COPTER3D AOI.
///
/// Must be called from within a tokio runtime.
pub fn spawn_object_coverage(
    aoi: &AreaOfInterest,
    ctx: &EngineContext,
    reference: GeoPosition,
) -> EngineResult<CoverageTask> {
    if aoi.plan_type != PlanType::Copter3d {
        return Err(EngineError::InvalidInput(format!(
            "AOI '{}' is not an object coverage pattern",
            aoi.name
        )));
    }
    let (tx, rx) = watch::channel(0);
    let cancel = Arc::new(AtomicBool::new(false));
    let worker = Worker {
        aoi: aoi.clone(),
        ctx: ctx.clone(),
        reference,
        progress: tx,
        cancel: Arc::clone(&cancel),
    };
    info!(aoi = %aoi.name, "object coverage started");
    let handle = tokio::task::spawn_blocking(move || worker.run());
    Ok(CoverageTask {
        aoi: aoi.name.clone(),
        progress: rx,
        cancel,
        handle,
    })
}

/// Store finished coverage lines on the AOI so the next recompute uses them.
pub fn apply_object_coverage(aoi: &mut AreaOfInterest, lines: Vec<FlightLine>) {
    info!(aoi = %aoi.name, lines = lines.len(), "object coverage applied");
    aoi.derived.object_coverage = Some(lines);
}
