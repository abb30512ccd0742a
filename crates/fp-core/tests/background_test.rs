//! Background object-coverage integration tests.

use fp_core::background::PROGRESS_DONE;
use fp_core::{
    apply_object_coverage, spawn_object_coverage, AreaOfInterest, Engine, EngineContext, FlightPlan,
    GeoPosition, HardwareConfiguration, PlanType, RecomputeError, Statement, Takeoff,
};

fn block() -> AreaOfInterest {
    AreaOfInterest::new(
        "hall",
        PlanType::Copter3d,
        vec![
            GeoPosition::new(47.0005, 8.0, 0.0),
            GeoPosition::new(47.0007, 8.0, 0.0),
            GeoPosition::new(47.0007, 8.0003, 0.0),
            GeoPosition::new(47.0005, 8.0003, 0.0),
        ],
    )
}

fn plan() -> FlightPlan {
    let mut plan = FlightPlan::new("inspection");
    plan.push(Statement::Takeoff(Takeoff {
        position: GeoPosition::new(47.0, 8.0, 0.0),
    }))
    .push(Statement::Aoi(Box::new(block())));
    plan
}

#[test]
fn test_object_coverage_missing_until_computed() {
    let engine = Engine::new(EngineContext::new(HardwareConfiguration::default()));
    let mut plan = plan();
    engine.recompute(&mut plan).unwrap();
    let aoi = plan.find_aoi("hall").unwrap();
    assert_eq!(aoi.last_error(), Some(&RecomputeError::NoWaypoints));
}

#[tokio::test]
async fn test_coverage_lines_feed_next_recompute() {
    let engine = Engine::new(EngineContext::new(HardwareConfiguration::default()));
    let mut plan = plan();
    engine.recompute(&mut plan).unwrap();
    let reference = plan.reference.unwrap();

    let aoi = plan.find_aoi("hall").unwrap();
    let task = spawn_object_coverage(aoi, engine.context(), reference).unwrap();
    let progress = task.progress_watch();
    let lines = task.join().await.unwrap();
    assert!(!lines.is_empty());
    assert_eq!(*progress.borrow(), PROGRESS_DONE);

    let idx = plan.recomputable_indices()[0];
    apply_object_coverage(plan.aoi_mut(idx).unwrap(), lines);
    engine.recompute(&mut plan).unwrap();

    let aoi = plan.find_aoi("hall").unwrap();
    assert!(aoi.last_error().is_none());
    assert!(!aoi.derived.waypoints.is_empty());
}
