//! Connector collision integration tests.

use fp_core::collision::required_clearance;
use fp_core::geometry::Vec3;
use fp_core::windmill::{WindmillGeometry, WindmillParams};
use fp_core::{CollisionChecker, CoordinateFrame, FlatElevation, GeoPosition, Obstacle, Segment};

fn block() -> Obstacle {
    let square = vec![
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(10.0, 0.0, 0.0),
        Vec3::new(10.0, 10.0, 0.0),
        Vec3::new(0.0, 10.0, 0.0),
    ];
    Obstacle::prism("block", square, 0.0, 20.0)
}

#[test]
fn test_segment_through_block_needs_full_height() {
    let seg = Segment::new(Vec3::new(5.0, -5.0, 10.0), Vec3::new(5.0, 15.0, 10.0));
    let hit = block().check(&seg, 1.0).unwrap();
    assert_eq!(hit.obstacle, "block");
    assert!(hit.clearance.min <= 0.0 && hit.clearance.max >= 20.0);
}

#[test]
fn test_segment_above_block_is_clear() {
    let seg = Segment::new(Vec3::new(5.0, -5.0, 25.0), Vec3::new(5.0, 15.0, 25.0));
    assert!(block().check(&seg, 1.0).is_none());
}

#[test]
fn test_checker_reports_highest_requirement() {
    let frame = CoordinateFrame::new(GeoPosition::new(47.0, 8.0, 500.0));
    let ground = FlatElevation::new(500.0);
    let mut checker = CollisionChecker::new(&frame, &ground, 1.0, 0.0);
    checker.add_obstacle(block());

    let geo = WindmillGeometry::new(&WindmillParams::default(), Vec3::new(5.0, 40.0, 0.0), 0.0);
    checker.add_obstacle(Obstacle::windmill("turbine", geo, true));
    assert_eq!(checker.obstacle_count(), 2);

    let seg = Segment::new(Vec3::new(5.0, -20.0, 30.0), Vec3::new(5.0, 80.0, 30.0));
    let hits = checker.check(&seg);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].obstacle, "turbine");
    let total = WindmillParams::default().total_height();
    assert!((required_clearance(&hits).unwrap() - total).abs() < 1e-9);
}

#[test]
fn test_ground_connectors_skip_terrain() {
    let frame = CoordinateFrame::new(GeoPosition::new(47.0, 8.0, 500.0));
    let ground = FlatElevation::new(500.0);
    let checker = CollisionChecker::new(&frame, &ground, 1.0, 5.0);

    let climb_out = Segment::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(100.0, 0.0, 50.0));
    assert!(checker.check_with_terrain(&climb_out, false).is_empty());
    let hits = checker.check(&climb_out);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].clearance.min, 0.0);
    assert!((hits[0].clearance.max - 55.0).abs() < 1e-3);
}
