//! Recompute pipeline integration tests.
//!
//! Plans are built in memory over flat terrain and run through the engine.

use std::sync::Arc;

use fp_core::geometry::haversine_distance;
use fp_core::hull::{self, HullOptions};
use fp_core::models::AltAssertMode;
use fp_core::recompute::connectors;
use fp_core::{
    AltitudeAdjustMode, AreaOfInterest, ElevationModel, Engine, EngineConfig, EngineContext, EngineError,
    FlightPlan, GeoPosition, HardwareConfiguration, Landing, PlanType, RecomputeError, RecomputeStatus,
    SpeedMode, Statement, Takeoff, TerrainGrid, Waypoint,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn pos(lat: f64, lon: f64) -> GeoPosition {
    GeoPosition::new(lat, lon, 0.0)
}

fn engine() -> Engine {
    Engine::new(EngineContext::new(HardwareConfiguration::default()))
}

fn plan_with(aois: Vec<AreaOfInterest>) -> FlightPlan {
    let mut plan = FlightPlan::new("survey");
    plan.push(Statement::Takeoff(Takeoff { position: pos(47.0, 8.0) }));
    for aoi in aois {
        plan.push(Statement::Aoi(Box::new(aoi)));
    }
    plan
}

fn field(lat: f64, lon: f64, size_deg: f64) -> AreaOfInterest {
    AreaOfInterest::new(
        "field",
        PlanType::Polygon,
        vec![
            pos(lat, lon),
            pos(lat + size_deg, lon),
            pos(lat + size_deg, lon + size_deg),
            pos(lat, lon + size_deg),
        ],
    )
}

fn waypoints(plan: &FlightPlan) -> Vec<Waypoint> {
    plan.waypoints().into_iter().cloned().collect()
}

/// Recomputing an unchanged plan must reproduce the same waypoints.
#[test]
fn test_recompute_is_idempotent() {
    let engine = engine();
    let mut plan = plan_with(vec![field(47.001, 8.0, 0.001)]);

    assert_eq!(engine.recompute(&mut plan).unwrap(), RecomputeStatus::Idle);
    let first = waypoints(&plan);
    assert!(!first.is_empty());
    assert!(plan.reference.is_some());

    engine.recompute(&mut plan).unwrap();
    assert_eq!(waypoints(&plan), first);
    assert!(plan.aois().all(|a| !a.is_dirty()));
}

/// Per-AOI speed optimisation must not leak into the plan settings and
/// from there into the next pass.
#[test]
fn test_recompute_is_idempotent_with_automatic_speed() {
    let engine = engine();
    let mut low = field(47.001, 8.0, 0.001);
    low.params_mut().altitude_m = 50.0;
    let mut high = field(47.003, 8.0, 0.001);
    high.params_mut().altitude_m = 100.0;
    let mut plan = plan_with(vec![low, high]);
    plan.photo.speed_mode = SpeedMode::AutomaticConstant;
    let requested = plan.photo.max_ground_speed_mps;

    engine.recompute(&mut plan).unwrap();
    let first = waypoints(&plan);
    engine.recompute(&mut plan).unwrap();

    assert_eq!(waypoints(&plan), first);
    assert_eq!(plan.photo.max_ground_speed_mps, requested);
    let optimal: Vec<f64> = plan.aois().map(|a| a.derived.optimal_speed_mps).collect();
    assert!(optimal[1] > optimal[0]);
}

#[test]
fn test_waypoint_ids_are_sequential() {
    let engine = engine();
    let mut plan = plan_with(vec![field(47.001, 8.0, 0.001)]);
    engine.recompute(&mut plan).unwrap();
    let ids: Vec<u32> = plan.waypoints().iter().map(|w| w.id).collect();
    let expected: Vec<u32> = (1..=ids.len() as u32).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_too_few_corners_recorded_on_aoi() {
    let engine = engine();
    let aoi = AreaOfInterest::new("strip", PlanType::Polygon, vec![pos(47.001, 8.0), pos(47.002, 8.0)]);
    let mut plan = plan_with(vec![aoi]);

    assert!(engine.recompute(&mut plan).is_ok());
    let aoi = plan.find_aoi("strip").unwrap();
    assert_eq!(
        aoi.last_error(),
        Some(&RecomputeError::TooFewCorners { required: 3, actual: 2 })
    );
    assert!(aoi.derived.waypoints.is_empty());
}

#[test]
fn test_corridor_length_matches_geodesic_distance() {
    let engine = engine();
    let (a, b) = (pos(47.001, 8.0), pos(47.001, 8.01));
    let aoi = AreaOfInterest::new("road", PlanType::Corridor, vec![a, b]);
    let mut plan = plan_with(vec![aoi]);
    engine.recompute(&mut plan).unwrap();

    let length = plan.find_aoi("road").unwrap().derived.corridor_length_m;
    let expected = haversine_distance(a.lat, a.lon, b.lat, b.lon);
    assert!((length - expected).abs() / expected < 5e-3, "{length} vs {expected}");
}

#[test]
fn test_random_polygons_have_non_negative_area() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..50 {
        let n = rng.random_range(3..8);
        let corners = (0..n)
            .map(|_| pos(47.0 + rng.random_range(0.0..0.002), 8.0 + rng.random_range(0.0..0.002)))
            .collect();
        let aoi = AreaOfInterest::new("random", PlanType::Polygon, corners);
        let geo = hull::compute(
            &aoi,
            0.0,
            HullOptions {
                angle_step_deg: 5.0,
                line_spacing: None,
                altitude_m: 50.0,
            },
        )
        .unwrap();
        assert!(geo.area_m2.is_finite() && geo.area_m2 >= 0.0);
    }
}

#[test]
fn test_oversized_area_rejected() {
    let config = EngineConfig {
        max_num_pics: 10,
        ..Default::default()
    };
    let engine = Engine::new(EngineContext::new(HardwareConfiguration::default()).with_config(config));
    let mut plan = plan_with(vec![field(47.001, 8.0, 0.01)]);

    engine.recompute(&mut plan).unwrap();
    let aoi = plan.find_aoi("field").unwrap();
    assert_eq!(aoi.last_error(), Some(&RecomputeError::TooManyPoints { limit: 10 }));
    assert!(!plan.all_aois_size_valid);
}

/// A no-fly zone between takeoff and the survey forces a climb before the
/// first survey waypoint.
#[test]
fn test_climb_inserted_over_no_fly_zone() {
    let engine = engine();
    let zone = AreaOfInterest::new(
        "zone",
        PlanType::NoFlyZonePoly,
        vec![pos(47.001, 7.998), pos(47.002, 7.998), pos(47.002, 8.002), pos(47.001, 8.002)],
    );
    let mut plan = plan_with(vec![zone, field(47.003, 7.9995, 0.001)]);
    engine.recompute(&mut plan).unwrap();

    let survey = plan.find_aoi("field").unwrap();
    let climb = survey.first_waypoint().unwrap();
    assert_eq!(climb.alt_mode, AltAssertMode::Jump);
    // 100 m zone ceiling plus the 1 m jump margin
    assert!((climb.position.alt - 101.0).abs() < 1e-6);

    // climb above the takeoff, then above the survey start, both hovering
    let wps = &survey.derived.waypoints;
    assert!((wps[0].position.lat - 47.0).abs() < 1e-9 && (wps[0].position.lon - 8.0).abs() < 1e-9);
    assert_eq!(wps[1].alt_mode, AltAssertMode::Jump);
    assert!((wps[1].position.lat - wps[2].position.lat).abs() < 1e-9);
    assert!((wps[1].position.lon - wps[2].position.lon).abs() < 1e-9);
    for jump in &wps[..2] {
        assert_eq!(jump.stop_time_s, 1.0);
        assert_eq!(jump.speed_mps, plan.photo.max_ground_speed_mps);
        assert!(!jump.trigger_image);
    }
    assert_ne!(wps[2].alt_mode, AltAssertMode::Jump);
}

/// With no AOI after the obstacle both climbs go to the end of the AOI
/// before it.
#[test]
fn test_climbs_toward_landing_appended_to_last_aoi() {
    let engine = engine();
    let zone = AreaOfInterest::new(
        "zone",
        PlanType::NoFlyZonePoly,
        vec![pos(47.001, 7.998), pos(47.002, 7.998), pos(47.002, 8.002), pos(47.001, 8.002)],
    );
    let mut plan = FlightPlan::new("survey");
    plan.push(Statement::Takeoff(Takeoff { position: pos(47.0045, 8.0) }))
        .push(Statement::Aoi(Box::new(zone)))
        .push(Statement::Aoi(Box::new(field(47.003, 7.9995, 0.001))))
        .push(Statement::Landing(Landing {
            position: pos(47.0, 8.0),
            active: true,
        }));
    engine.recompute(&mut plan).unwrap();

    let wps = &plan.find_aoi("field").unwrap().derived.waypoints;
    assert_ne!(wps[0].alt_mode, AltAssertMode::Jump);
    let n = wps.len();
    let (over_last, over_landing) = (&wps[n - 2], &wps[n - 1]);
    assert_eq!(over_last.alt_mode, AltAssertMode::Jump);
    assert_eq!(over_landing.alt_mode, AltAssertMode::Jump);
    assert!((over_landing.position.lat - 47.0).abs() < 1e-9);
    assert!((over_landing.position.alt - 101.0).abs() < 1e-6);
    assert!((over_last.position.lat - wps[n - 3].position.lat).abs() < 1e-9);
}

#[test]
fn test_takeoff_connector_leaves_above_takeoff() {
    let engine = engine();
    let mut plan = plan_with(vec![field(47.001, 8.0, 0.001)]);
    engine.recompute(&mut plan).unwrap();

    let hops = connectors(&plan, 10.0);
    assert_eq!(hops.len(), 1);
    assert!((hops[0].from.alt - 10.0).abs() < 1e-9);
    assert!(!hops[0].touches_ground);
    assert_eq!(hops[0].to_aoi, Some(1));
}

/// Fixed-wing plans keep their waypoints exactly as planned.
#[test]
fn test_fixed_wing_skips_postprocessing() {
    let mut hw = HardwareConfiguration::default();
    hw.platform.copter_mode = false;
    hw.platform.min_waypoint_separation_m = 1_000.0;
    let fixed_wing = Engine::new(EngineContext::new(hw.clone()));
    let mut plan = plan_with(vec![field(47.001, 8.0, 0.001)]);
    fixed_wing.recompute(&mut plan).unwrap();
    assert!(plan.waypoints().len() > 2);

    hw.platform.copter_mode = true;
    let copter = Engine::new(EngineContext::new(hw));
    let mut plan = plan_with(vec![field(47.001, 8.0, 0.001)]);
    copter.recompute(&mut plan).unwrap();
    assert_eq!(plan.waypoints().len(), 1);
}

#[test]
fn test_follow_terrain_flies_constant_height_over_ground() {
    // ground rises 100 m eastward over 0.01 degrees of longitude
    let ramp = TerrainGrid::new(46.99, 8.0, 0.02, 0.01, 2, 2, vec![400.0, 500.0, 400.0, 500.0]).unwrap();
    let engine = Engine::new(
        EngineContext::new(HardwareConfiguration::default()).with_elevation(Arc::new(ramp.clone())),
    );
    let mut aoi = field(47.001, 8.0, 0.002);
    aoi.params_mut().altitude_m = 50.0;
    aoi.params_mut().gsd_m = None;
    let mut plan = plan_with(vec![aoi]);
    plan.photo.altitude_adjust_mode = AltitudeAdjustMode::FollowTerrain;
    engine.recompute(&mut plan).unwrap();

    let reference = plan.reference.unwrap().alt;
    assert!((reference - 400.0).abs() < 1e-6);
    let wps = &plan.find_aoi("field").unwrap().derived.waypoints;
    for wp in wps {
        let ground = ramp.elevation(wp.position.lat, wp.position.lon) - reference;
        assert!((wp.position.alt - ground - 50.0).abs() < 1e-6);
    }
    let (lo, hi) = wps
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), w| (lo.min(w.position.alt), hi.max(w.position.alt)));
    assert!(hi - lo > 5.0);

    plan.photo.altitude_adjust_mode = AltitudeAdjustMode::ConstantOverReference;
    engine.recompute(&mut plan).unwrap();
    let wps = &plan.find_aoi("field").unwrap().derived.waypoints;
    assert!(wps.iter().all(|w| (w.position.alt - 50.0).abs() < 1e-6));
}

/// A connector that enters the allowed volume from outside is fine.
#[test]
fn test_takeoff_outside_geofence_reaches_aoi_inside() {
    let engine = engine();
    let fence = AreaOfInterest::new(
        "fence",
        PlanType::GeofencePoly,
        vec![pos(46.995, 7.99), pos(47.01, 7.99), pos(47.01, 8.01), pos(46.995, 8.01)],
    );
    let mut plan = FlightPlan::new("fenced");
    plan.push(Statement::Takeoff(Takeoff { position: pos(46.99, 8.0) }))
        .push(Statement::Aoi(Box::new(fence)))
        .push(Statement::Aoi(Box::new(field(47.003, 8.0, 0.001))));

    assert_eq!(engine.recompute(&mut plan).unwrap(), RecomputeStatus::Idle);
    let wps = plan.waypoints();
    assert!(!wps.is_empty());
    assert!(wps.iter().all(|w| w.alt_mode != AltAssertMode::Jump));
}

#[test]
fn test_geofence_exit_aborts_and_keeps_plan() {
    let engine = engine();
    let fence = AreaOfInterest::new(
        "fence",
        PlanType::GeofencePoly,
        vec![pos(46.99, 7.99), pos(46.995, 7.99), pos(46.995, 8.01), pos(46.99, 8.01)],
    );
    let mut plan = plan_with(vec![fence, field(47.003, 8.0, 0.001)]);

    let result = engine.recompute(&mut plan);
    assert!(matches!(result, Err(EngineError::UnreachableObstacle { ref aoi }) if aoi == "fence"));
    assert!(plan.reference.is_none());
    assert!(plan.waypoints().is_empty());
    assert_eq!(engine.status(), RecomputeStatus::Idle);
}

#[test]
fn test_plan_without_positions_is_a_no_op() {
    let engine = engine();
    let mut plan = FlightPlan::new("empty");
    assert_eq!(engine.recompute(&mut plan).unwrap(), RecomputeStatus::Idle);
    assert!(plan.reference.is_none());
}

/// Forward overlap beyond what speed and trigger interval allow is flagged
/// until the user accepts the reduction.
#[test]
fn test_overlap_warning_cleared_after_reduction() {
    let engine = engine();
    let mut plan = plan_with(vec![field(47.001, 8.0, 0.001)]);
    plan.photo.max_ground_speed_mps = 10.0;
    engine.recompute(&mut plan).unwrap();
    let idx = plan.recomputable_indices()[0];
    let aoi = plan.aoi(idx).unwrap();
    assert!(aoi.derived.overlap_warning);
    let max_possible = aoi.derived.overlap_in_flight_max_possible;
    assert!(max_possible < aoi.params().overlap_in_flight);

    plan.aoi_mut(idx).unwrap().reduce_overlap();
    engine.recompute(&mut plan).unwrap();
    let aoi = plan.aoi(idx).unwrap();
    assert!(!aoi.derived.overlap_warning);
    assert_eq!(aoi.params().overlap_in_flight, max_possible);
}
