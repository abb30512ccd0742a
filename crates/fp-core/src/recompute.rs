//! Recompute orchestration over a flight plan.
//!
//! A recompute runs on a working copy of the plan and replaces the caller's
//! plan only when every step succeeded, so an aborted pass leaves the
//! previous state in place. Overlapping requests on one [`Engine`] are
//! dropped, not queued, and reported as [`RecomputeStatus::StaleRequestDropped`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::collision::{required_clearance, CollisionChecker, Segment};
use crate::config::EngineConfig;
use crate::elevation::{ElevationModel, FlatElevation};
use crate::error::{EngineError, EngineResult, RecomputeError};
use crate::frame::{CoordinateFrame, GeoPosition};
use crate::hardware::HardwareConfiguration;
use crate::models::{AltAssertMode, FlightPlan, Statement, Waypoint};
use crate::planner::{compute_aoi, PlanEnv};
use crate::postprocess::PathPostprocessor;

const CHANGE_CHANNEL_CAPACITY: usize = 64;
/// Hover at a climb waypoint before moving on.
const JUMP_STOP_S: f64 = 1.0;
const JUMP_LABEL: &str = "jump over";

/// Collaborators every recompute reads; fixed for the duration of a pass.
#[derive(Clone)]
pub struct EngineContext {
    pub elevation: Arc<dyn ElevationModel>,
    pub hardware: HardwareConfiguration,
    pub config: EngineConfig,
}

impl EngineContext {
    /// Flat terrain at the ellipsoid and default tunables.
    pub fn new(hardware: HardwareConfiguration) -> Self {
        Self {
            elevation: Arc::new(FlatElevation::default()),
            hardware,
            config: EngineConfig::default(),
        }
    }

    pub fn with_elevation(mut self, elevation: Arc<dyn ElevationModel>) -> Self {
        self.elevation = elevation;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecomputeStatus {
    /// The pass ran to completion and the engine is idle again
    Idle = 0,
    Running = 1,
    /// Another pass was already running; this request did nothing
    StaleRequestDropped = 2,
}

impl RecomputeStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RecomputeStatus::Running,
            2 => RecomputeStatus::StaleRequestDropped,
            _ => RecomputeStatus::Idle,
        }
    }
}

/// Aggregated change notification, one per recompute pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanChanged {
    pub plan: String,
    pub waypoints: usize,
    pub failed_aois: usize,
    /// False when the pass aborted and the plan kept its previous state
    pub applied: bool,
    pub at: DateTime<Utc>,
}

/// Collects the outcome of a pass and emits exactly one [`PlanChanged`]
/// when dropped, on error paths too.
pub struct BatchScope<'a> {
    tx: &'a broadcast::Sender<PlanChanged>,
    event: PlanChanged,
}

impl<'a> BatchScope<'a> {
    pub fn begin(tx: &'a broadcast::Sender<PlanChanged>, plan: &str) -> Self {
        Self {
            tx,
            event: PlanChanged {
                plan: plan.to_string(),
                waypoints: 0,
                failed_aois: 0,
                applied: false,
                at: Utc::now(),
            },
        }
    }

    pub fn commit(&mut self, plan: &FlightPlan) {
        self.event.waypoints = plan.waypoints().len();
        self.event.failed_aois = plan.aois().filter(|a| a.last_error().is_some()).count();
        self.event.applied = true;
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        self.event.at = Utc::now();
        // no subscribers is fine
        let _ = self.tx.send(self.event.clone());
    }
}

/// Resets the engine to idle when a pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicU8);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(RecomputeStatus::Idle as u8, Ordering::Release);
    }
}

pub struct Engine {
    ctx: EngineContext,
    state: AtomicU8,
    events: broadcast::Sender<PlanChanged>,
}

impl Engine {
    pub fn new(ctx: EngineContext) -> Self {
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            ctx,
            state: AtomicU8::new(RecomputeStatus::Idle as u8),
            events,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlanChanged> {
        self.events.subscribe()
    }

    pub fn status(&self) -> RecomputeStatus {
        RecomputeStatus::from_u8(self.state.load(Ordering::Acquire))
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.state
            .compare_exchange(
                RecomputeStatus::Idle as u8,
                RecomputeStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| RunGuard(&self.state))
    }

    /// Regenerate every AOI, check connectors, post-process and renumber.
    pub fn recompute(&self, plan: &mut FlightPlan) -> EngineResult<RecomputeStatus> {
        let Some(_guard) = self.try_begin() else {
            info!(plan = %plan.name, "recompute already running, request dropped");
            return Ok(RecomputeStatus::StaleRequestDropped);
        };
        let mut batch = BatchScope::begin(&self.events, &plan.name);

        let mut work = plan.clone();
        match self.run_passes(&mut work) {
            Ok(()) => {
                batch.commit(&work);
                *plan = work;
                Ok(RecomputeStatus::Idle)
            }
            Err(e) => {
                error!(plan = %plan.name, error = %e, "recompute aborted");
                Err(e)
            }
        }
    }

    fn run_passes(&self, plan: &mut FlightPlan) -> EngineResult<()> {
        plan.validate()?;

        if plan.reference.is_none() {
            plan.reference = self.define_reference(plan);
        }
        self.topology_pass(plan);
        let Some(reference) = plan.reference else {
            if plan.aois().next().is_some() {
                return Err(EngineError::FrameNotInitialized);
            }
            plan.reassign_ids();
            return Ok(());
        };

        self.geometry_pass(plan, reference);
        let all_valid = plan.aois().all(|a| a.derived.valid_size);
        plan.all_aois_size_valid = all_valid;

        let frame = CoordinateFrame::new(reference);
        self.insert_avoidance(plan, &frame)?;
        if self.ctx.hardware.platform.copter_mode {
            self.postprocess(plan, &frame);
        }
        self.update_safety_height(plan);
        plan.reassign_ids();
        plan.updated_at = Some(Utc::now());
        for aoi in plan.aois_mut() {
            aoi.mark_clean();
        }

        let failed = plan.aois().filter(|a| a.last_error().is_some()).count();
        info!(
            plan = %plan.name,
            aois = plan.aois().count(),
            failed,
            waypoints = plan.waypoints().len(),
            "recompute complete"
        );
        Ok(())
    }

    /// Takeoff, else the first AOI corner, else the first raw waypoint; the
    /// height is the terrain there.
    fn define_reference(&self, plan: &FlightPlan) -> Option<GeoPosition> {
        let anchor = plan
            .takeoff()
            .map(|t| t.position)
            .or_else(|| plan.aois().find_map(|a| a.corners().first().copied()))
            .or_else(|| plan.statements.iter().find_map(Statement::anchor_position))?;
        let ground = self.ctx.elevation.elevation(anchor.lat, anchor.lon);
        debug!(lat = anchor.lat, lon = anchor.lon, alt = ground, "plan reference defined");
        Some(GeoPosition::new(anchor.lat, anchor.lon, ground))
    }

    /// Structural validity per AOI, ahead of any geometry.
    fn topology_pass(&self, plan: &mut FlightPlan) {
        let copter = self.ctx.hardware.platform.copter_mode;
        for aoi in plan.aois_mut() {
            aoi.derived.last_error = None;
            let required = aoi.plan_type.min_corners();
            let actual = aoi.corners().len();
            if actual < required {
                aoi.fail(RecomputeError::TooFewCorners { required, actual });
            } else if aoi.plan_type.requires_copter() && !copter {
                aoi.fail(RecomputeError::AoiTypeNotSupported);
            }
        }
    }

    fn geometry_pass(&self, plan: &mut FlightPlan, reference: GeoPosition) {
        let env = PlanEnv {
            hw: &self.ctx.hardware,
            config: &self.ctx.config,
            elevation: self.ctx.elevation.as_ref(),
            reference,
        };
        let photo = plan.photo.clone();
        for idx in plan.recomputable_indices() {
            let prev = plan.previous_position(idx);
            let next = plan.next_position(idx);
            let Some(aoi) = plan.aoi_mut(idx) else { continue };
            if let Err(e) = compute_aoi(aoi, &env, &photo, prev, next) {
                aoi.fail(e);
            }
        }
    }

    /// Check each connector and add climb waypoints over what it hits.
    fn insert_avoidance(&self, plan: &mut FlightPlan, frame: &CoordinateFrame) -> EngineResult<()> {
        let checker = CollisionChecker::new(
            frame,
            self.ctx.elevation.as_ref(),
            self.ctx.config.collision_margin_m,
            self.ctx.hardware.platform.min_ground_distance_m,
        )
        .with_aois(plan.aois());
        if checker.obstacle_count() == 0 && self.ctx.hardware.platform.min_ground_distance_m <= 0.0 {
            return Ok(());
        }

        let hops = connectors(plan, self.ctx.config.min_height_over_takeoff_m);
        let mut climbs: Vec<(f64, Connector)> = Vec::new();
        for hop in hops {
            let seg = Segment::new(frame.to_local(&hop.from), frame.to_local(&hop.to));
            let hits = checker.check_with_terrain(&seg, !hop.touches_ground);
            let Some(required) = required_clearance(&hits) else {
                continue;
            };
            if !required.is_finite() {
                let aoi = hits
                    .iter()
                    .find(|h| !h.required_height().is_finite())
                    .map_or_else(String::new, |h| h.obstacle.clone());
                return Err(EngineError::UnreachableObstacle { aoi });
            }
            if !plan.jump_over_obstacles {
                warn!(obstacles = hits.len(), "connector collides, jump over disabled");
                continue;
            }
            climbs.push((required + self.ctx.config.jump_safety_margin_m, hop));
        }

        let speed = plan.photo.max_ground_speed_mps;
        for (height, hop) in climbs {
            // endpoints already at or above the clearance stay as they are
            let climb = |pos: GeoPosition| {
                (pos.alt <= height).then(|| {
                    let mut wp = Waypoint::new(GeoPosition::new(pos.lat, pos.lon, height));
                    wp.alt_mode = AltAssertMode::Jump;
                    wp.speed_mps = speed;
                    wp.stop_time_s = JUMP_STOP_S;
                    wp.label = JUMP_LABEL.to_string();
                    wp
                })
            };
            let (over_from, over_to) = (climb(hop.from), climb(hop.to));
            match (hop.from_aoi, hop.to_aoi) {
                (Some(from), Some(to)) => {
                    append_to(plan, from, over_from);
                    prepend_to(plan, to, [over_to]);
                }
                (Some(from), None) => {
                    append_to(plan, from, over_from);
                    append_to(plan, from, over_to);
                }
                (None, Some(to)) => prepend_to(plan, to, [over_from, over_to]),
                (None, None) => {
                    if over_from.is_some() || over_to.is_some() {
                        return Err(EngineError::NoContainerForAvoidance);
                    }
                }
            }
            debug!(height, "climb waypoints inserted over obstacle");
        }
        Ok(())
    }

    fn postprocess(&self, plan: &mut FlightPlan, frame: &CoordinateFrame) {
        let photo = plan.photo.clone();
        for aoi in plan.aois_mut() {
            let pp = PathPostprocessor {
                hw: &self.ctx.hardware,
                photo: &photo,
                config: &self.ctx.config,
                frame,
                elevation: self.ctx.elevation.as_ref(),
                crop_height_min_m: Some(aoi.params().crop_height_min_m),
            };
            let wps = std::mem::take(&mut aoi.derived.waypoints);
            aoi.derived.waypoints = pp.run(wps);
        }
    }

    fn update_safety_height(&self, plan: &mut FlightPlan) {
        let highest = plan
            .waypoints()
            .iter()
            .map(|w| w.position.alt)
            .fold(f64::NEG_INFINITY, f64::max);
        let floor = plan.takeoff().map_or(0.0, |t| t.position.alt) + self.ctx.config.min_height_over_takeoff_m;
        if let Some(events) = plan.event_list_mut() {
            if events.auto_safety_height {
                events.safety_altitude_m = highest.max(floor);
            }
        }
    }
}

/// Straight hop between two consecutive plan elements.
#[derive(Debug, Clone, Copy)]
pub struct Connector {
    pub from: GeoPosition,
    pub to: GeoPosition,
    /// Statement index of the AOI the hop leaves
    pub from_aoi: Option<usize>,
    /// Statement index of the AOI the hop enters
    pub to_aoi: Option<usize>,
    /// Ends at the landing
    pub touches_ground: bool,
}

fn append_to(plan: &mut FlightPlan, aoi: usize, wp: Option<Waypoint>) {
    if let (Some(aoi), Some(wp)) = (plan.aoi_mut(aoi), wp) {
        aoi.derived.waypoints.push(wp);
    }
}

fn prepend_to<const N: usize>(plan: &mut FlightPlan, aoi: usize, wps: [Option<Waypoint>; N]) {
    if let Some(aoi) = plan.aoi_mut(aoi) {
        aoi.derived.waypoints.splice(0..0, wps.into_iter().flatten());
    }
}

/// Connectors in flying order: takeoff → AOIs and raw waypoints → landing.
///
/// The flight leaves the takeoff `takeoff_climb_m` above it, so the first
/// hop starts in the air.
pub fn connectors(plan: &FlightPlan, takeoff_climb_m: f64) -> Vec<Connector> {
    struct Element {
        first: GeoPosition,
        last: GeoPosition,
        aoi: Option<usize>,
        ground: bool,
    }
    let point = |p: GeoPosition, ground: bool| Element {
        first: p,
        last: p,
        aoi: None,
        ground,
    };
    let elements: Vec<Element> = plan
        .statements
        .iter()
        .enumerate()
        .filter_map(|(i, s)| match s {
            Statement::Aoi(a) => Some(Element {
                first: a.first_waypoint()?.position,
                last: a.last_waypoint()?.position,
                aoi: Some(i),
                ground: false,
            }),
            Statement::Takeoff(_) => s
                .anchor_position()
                .map(|p| point(GeoPosition::new(p.lat, p.lon, p.alt + takeoff_climb_m), false)),
            Statement::Landing(_) => s.anchor_position().map(|p| point(p, true)),
            other => other.anchor_position().map(|p| point(p, false)),
        })
        .collect();

    elements
        .windows(2)
        .filter(|w| w[0].last != w[1].first)
        .map(|w| Connector {
            from: w[0].last,
            to: w[1].first,
            from_aoi: w[0].aoi,
            to_aoi: w[1].aoi,
            touches_ground: w[0].ground || w[1].ground,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AreaOfInterest, EventList, PlanType, Takeoff};

    fn engine() -> Engine {
        Engine::new(EngineContext::new(HardwareConfiguration::default()))
    }

    #[test]
    fn test_overlapping_request_is_dropped() {
        let engine = engine();
        let _guard = engine.try_begin().unwrap();
        assert_eq!(engine.status(), RecomputeStatus::Running);
        let mut plan = FlightPlan::new("p");
        assert_eq!(engine.recompute(&mut plan).unwrap(), RecomputeStatus::StaleRequestDropped);
    }

    #[test]
    fn test_guard_released_after_failed_pass() {
        let engine = engine();
        let mut plan = FlightPlan::new("p");
        let landing = crate::models::Landing {
            position: GeoPosition::new(47.0, 8.0, 0.0),
            active: true,
        };
        plan.push(Statement::Landing(landing.clone())).push(Statement::Landing(landing));
        let mut rx = engine.subscribe();
        assert!(engine.recompute(&mut plan).is_err());
        assert_eq!(engine.status(), RecomputeStatus::Idle);
        let event = rx.try_recv().unwrap();
        assert!(!event.applied);
    }

    #[test]
    fn test_one_change_event_per_pass() {
        let engine = engine();
        let mut plan = FlightPlan::new("p");
        let corners = vec![
            GeoPosition::new(47.0, 8.0, 0.0),
            GeoPosition::new(47.001, 8.0, 0.0),
            GeoPosition::new(47.001, 8.001, 0.0),
        ];
        plan.push(Statement::Takeoff(Takeoff {
            position: GeoPosition::new(47.0, 8.0, 0.0),
        }))
        .push(Statement::Aoi(Box::new(AreaOfInterest::new("field", PlanType::Polygon, corners))))
        .push(Statement::EventList(EventList {
            auto_safety_height: true,
            safety_altitude_m: 0.0,
        }));
        let mut rx = engine.subscribe();
        assert_eq!(engine.recompute(&mut plan).unwrap(), RecomputeStatus::Idle);
        let event = rx.try_recv().unwrap();
        assert!(event.applied);
        assert!(event.waypoints > 0);
        assert!(rx.try_recv().is_err());
        let safety = plan.event_list().unwrap().safety_altitude_m;
        assert!(safety >= 50.0 - 1e-6);
    }
}
