//! Plan tree data model.
//!
//! A [`FlightPlan`] owns an ordered list of [`Statement`]s. Areas of interest
//! carry user input (corners, [`AoiParameters`]) plus derived state that is
//! thrown away and rebuilt on every recompute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult, RecomputeError};
use crate::footprint::ScanSizes;
use crate::frame::{AoiFrame, GeoPosition};
use crate::geometry::{normalize_deg, MinMax, Vec3};
use crate::hardware::PhotoSettings;
use crate::windmill::WindmillParams;

// ==== Pattern types ====

/// Coverage algorithm selected for an area of interest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    /// Parallel raster lines over a polygon
    #[default]
    Polygon,
    /// Two perpendicular raster passes
    City,
    Corridor,
    Spiral,
    /// Square spiral around a point
    Search,
    Star,
    Poi,
    Panorama,
    Tower,
    Windmill,
    Building,
    Facade,
    /// Free 3-D object coverage, computed in the background
    Copter3d,
    /// Waypoints imported from a target list
    TargetPoints,
    NoFlyZonePoly,
    NoFlyZoneCirc,
    GeofencePoly,
    GeofenceCirc,
}

impl PlanType {
    pub fn min_corners(self) -> usize {
        match self {
            PlanType::Polygon
            | PlanType::City
            | PlanType::Building
            | PlanType::Copter3d
            | PlanType::NoFlyZonePoly
            | PlanType::GeofencePoly => 3,
            PlanType::Corridor | PlanType::Facade => 2,
            _ => 1,
        }
    }

    /// Whether the pattern produces flight waypoints at all.
    pub fn has_waypoints(self) -> bool {
        !self.is_no_fly_zone() && !self.is_geofence()
    }

    pub fn is_no_fly_zone(self) -> bool {
        matches!(self, PlanType::NoFlyZonePoly | PlanType::NoFlyZoneCirc)
    }

    pub fn is_geofence(self) -> bool {
        matches!(self, PlanType::GeofencePoly | PlanType::GeofenceCirc)
    }

    /// Volumes connectors are checked against.
    pub fn is_obstacle(self) -> bool {
        self.is_no_fly_zone()
            || matches!(
                self,
                PlanType::Building | PlanType::Tower | PlanType::Facade | PlanType::Windmill
            )
    }

    /// Patterns a fixed wing cannot fly (hovering, vertical columns, gimbal work).
    pub fn requires_copter(self) -> bool {
        matches!(
            self,
            PlanType::Copter3d
                | PlanType::Tower
                | PlanType::Windmill
                | PlanType::Building
                | PlanType::Facade
                | PlanType::Poi
                | PlanType::Panorama
                | PlanType::TargetPoints
                | PlanType::Star
        )
    }

    /// Structures scanned in vertical columns up to a crop height.
    pub fn needs_heights(self) -> bool {
        matches!(
            self,
            PlanType::Tower | PlanType::Windmill | PlanType::Building | PlanType::Facade | PlanType::Copter3d
        )
    }

    /// Nadir patterns whose height can track the terrain below each waypoint.
    pub fn follows_terrain(self) -> bool {
        matches!(
            self,
            PlanType::Polygon | PlanType::City | PlanType::Corridor | PlanType::Spiral | PlanType::Search | PlanType::Star
        )
    }

    pub fn uses_vertical_start_capture(self) -> bool {
        matches!(self, PlanType::Building | PlanType::Facade | PlanType::Tower | PlanType::Windmill)
    }

    pub fn permutes_lines(self) -> bool {
        matches!(self, PlanType::Polygon | PlanType::City | PlanType::Corridor)
    }

    /// Patterns planned in a frame with a fixed heading instead of the user yaw.
    pub fn fixed_scan_yaw(self) -> Option<f64> {
        match self {
            PlanType::Windmill => Some(90.0),
            PlanType::Facade => Some(0.0),
            _ => None,
        }
    }
}

// ==== Scan settings ====

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    TowardLanding,
    /// Start at the line end closest to the previous waypoint
    #[default]
    FromStarting,
    CornerXminYmin,
    CornerXminYmax,
    CornerXmaxYmin,
    CornerXmaxYmax,
    Left,
    Right,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartCapture {
    #[default]
    EndOfLine,
    InsideLine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpPattern {
    LineByLine,
    #[default]
    Interleaving,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalScanPattern {
    /// One flight line per column
    #[default]
    UpDown,
    /// One flight line per height row
    LeftRight,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartCaptureVertically {
    Up,
    #[default]
    Down,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacadeScanningSide {
    #[default]
    Left,
    Right,
}

/// How the autopilot treats a waypoint's altitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AltAssertMode {
    #[default]
    Asserted,
    Jump,
    Linear,
    Unasserted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeightReference {
    #[default]
    AboveGround,
    AboveSeaLevel,
    /// Relative to the plan reference altitude
    AboveReference,
}

/// Optional floor and ceiling of a no-fly zone or geofence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictionHeights {
    pub floor_enabled: bool,
    pub floor_m: f64,
    pub floor_reference: HeightReference,
    pub ceiling_enabled: bool,
    pub ceiling_m: f64,
    pub ceiling_reference: HeightReference,
}

impl Default for RestrictionHeights {
    fn default() -> Self {
        Self {
            floor_enabled: true,
            floor_m: 0.0,
            floor_reference: HeightReference::AboveGround,
            ceiling_enabled: true,
            ceiling_m: 100.0,
            ceiling_reference: HeightReference::AboveGround,
        }
    }
}

/// User-facing scan parameters of one area of interest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AoiParameters {
    /// Flight altitude (or stand-off distance for vertical patterns), meters
    pub altitude_m: f64,
    /// Target ground sample distance; overrides `altitude_m` when set
    pub gsd_m: Option<f64>,
    pub overlap_in_flight: f64,
    pub overlap_in_flight_min: f64,
    pub overlap_parallel: f64,
    /// Corridor width, or radius for circular patterns
    pub corridor_width_m: f64,
    pub corridor_min_lines: u32,
    /// Compass heading of the scan lines
    pub yaw_deg: f64,
    pub scan_direction: ScanDirection,
    pub start_capture: StartCapture,
    pub jump_pattern: JumpPattern,
    pub vertical_scan_pattern: VerticalScanPattern,
    pub start_capture_vertically: StartCaptureVertically,
    pub facade_scanning_side: FacadeScanningSide,
    pub single_direction: bool,
    /// Orbit counter-clockwise (seen from above) when true
    pub circle_left: bool,
    pub add_ceiling: bool,
    pub crop_height_min_m: f64,
    pub crop_height_max_m: f64,
    pub min_object_distance_m: f64,
    pub max_object_distance_m: f64,
    pub min_ground_distance_m: f64,
    pub max_yaw_roll_change_deg: f64,
    pub max_pitch_change_deg: f64,
    pub camera_pitch_offset_deg: f64,
    pub pitch_offset_line_begin_deg: f64,
    pub restriction: RestrictionHeights,
    pub windmill: WindmillParams,
    /// `;`-separated target list for [`PlanType::TargetPoints`]
    pub target_points: Option<String>,
    /// Overlaps the user accepted after a feasibility warning
    pub accepted_overlap_in_flight: Option<f64>,
    pub accepted_overlap_in_flight_min: Option<f64>,
}

impl Default for AoiParameters {
    fn default() -> Self {
        Self {
            altitude_m: 50.0,
            gsd_m: None,
            overlap_in_flight: 85.0,
            overlap_in_flight_min: 75.0,
            overlap_parallel: 65.0,
            corridor_width_m: 100.0,
            corridor_min_lines: 3,
            yaw_deg: 0.0,
            scan_direction: ScanDirection::default(),
            start_capture: StartCapture::default(),
            jump_pattern: JumpPattern::default(),
            vertical_scan_pattern: VerticalScanPattern::default(),
            start_capture_vertically: StartCaptureVertically::default(),
            facade_scanning_side: FacadeScanningSide::default(),
            single_direction: false,
            circle_left: true,
            add_ceiling: true,
            crop_height_min_m: 0.0,
            crop_height_max_m: 50.0,
            min_object_distance_m: 5.0,
            max_object_distance_m: 1000.0,
            min_ground_distance_m: 10.0,
            max_yaw_roll_change_deg: 15.0,
            max_pitch_change_deg: 45.0,
            camera_pitch_offset_deg: 0.0,
            pitch_offset_line_begin_deg: 0.0,
            restriction: RestrictionHeights::default(),
            windmill: WindmillParams::default(),
            target_points: None,
            accepted_overlap_in_flight: None,
            accepted_overlap_in_flight_min: None,
        }
    }
}

// ==== Orientation, waypoints, lines ====

/// Camera orientation in degrees. `pitch` is stored offset by 90
/// (0 = straight down, 90 = horizontal); `yaw` is a compass heading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Orientation {
    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { roll, pitch, yaw }
    }

    /// Largest absolute angular change over the three axes.
    pub fn max_abs_delta(&self, other: &Orientation) -> f64 {
        normalize_deg(self.roll - other.roll)
            .abs()
            .max(normalize_deg(self.pitch - other.pitch).abs())
            .max(normalize_deg(self.yaw - other.yaw).abs())
    }
}

/// Engine output: one position the vehicle flies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(default)]
    pub id: u32,
    /// Altitude is relative to the plan reference point
    pub position: GeoPosition,
    #[serde(default)]
    pub alt_mode: AltAssertMode,
    #[serde(default)]
    pub speed_mps: f64,
    /// Hover time in seconds, 0 flies through
    #[serde(default)]
    pub stop_time_s: f64,
    #[serde(default)]
    pub trigger_image: bool,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub begins_flight_line: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_distance_m: Option<f64>,
}

impl Waypoint {
    pub fn new(position: GeoPosition) -> Self {
        Self {
            id: 0,
            position,
            alt_mode: AltAssertMode::Asserted,
            speed_mps: 0.0,
            stop_time_s: 0.0,
            trigger_image: false,
            orientation: Orientation::default(),
            begins_flight_line: false,
            label: String::new(),
            target_distance_m: None,
        }
    }

    pub fn has_stop(&self) -> bool {
        self.stop_time_s > 0.0
    }
}

/// One point of a flight line in AOI-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePoint {
    pub pos: Vec3,
    pub orientation: Option<Orientation>,
}

impl LinePoint {
    pub fn new(pos: Vec3) -> Self {
        Self { pos, orientation: None }
    }

    pub fn oriented(pos: Vec3, orientation: Orientation) -> Self {
        Self {
            pos,
            orientation: Some(orientation),
        }
    }
}

/// Ordered polyline in the AOI frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightLine {
    pub points: Vec<LinePoint>,
    pub line_index: usize,
    /// Cross-track coordinate of a straight raster line
    pub parallel_coordinate: f64,
    /// Raster line runs along y instead of x
    pub rot90: bool,
    pub forward: bool,
    /// Straight raster line (images spaced along it later)
    pub linear: bool,
}

impl FlightLine {
    /// Straight raster line at `parallel` spanning `span` along the flight axis.
    pub fn raster(parallel: f64, span: MinMax, line_index: usize, rot90: bool) -> Self {
        let (a, b) = if rot90 {
            (Vec3::new(parallel, span.min, 0.0), Vec3::new(parallel, span.max, 0.0))
        } else {
            (Vec3::new(span.min, parallel, 0.0), Vec3::new(span.max, parallel, 0.0))
        };
        Self {
            points: vec![LinePoint::new(a), LinePoint::new(b)],
            line_index,
            parallel_coordinate: parallel,
            rot90,
            forward: true,
            linear: true,
        }
    }

    /// Free-form polyline without orientations.
    pub fn path(points: Vec<Vec3>, line_index: usize, parallel: f64, rot90: bool) -> Self {
        Self {
            points: points.into_iter().map(LinePoint::new).collect(),
            line_index,
            parallel_coordinate: parallel,
            rot90,
            forward: true,
            linear: false,
        }
    }

    /// Polyline with a camera orientation at every point.
    pub fn oriented(points: Vec<LinePoint>, line_index: usize) -> Self {
        Self {
            points,
            line_index,
            parallel_coordinate: 0.0,
            rot90: false,
            forward: true,
            linear: false,
        }
    }

    pub fn first(&self) -> Option<&Vec3> {
        self.points.first().map(|p| &p.pos)
    }

    pub fn last(&self) -> Option<&Vec3> {
        self.points.last().map(|p| &p.pos)
    }

    pub fn positions(&self) -> Vec<Vec3> {
        self.points.iter().map(|p| p.pos).collect()
    }

    /// Switch start and end, reversing the flying direction.
    pub fn mirror(&mut self) {
        self.points.reverse();
        self.forward = !self.forward;
    }

    /// Extend both ends outward along the first and last segment.
    pub fn enlarge(&mut self, start_m: f64, end_m: f64) {
        let n = self.points.len();
        if n < 2 {
            return;
        }
        let d_start = self.points[0].pos - self.points[1].pos;
        if d_start.norm() > 1e-12 {
            self.points[0].pos += d_start.normalize() * start_m;
        }
        let d_end = self.points[n - 1].pos - self.points[n - 2].pos;
        if d_end.norm() > 1e-12 {
            self.points[n - 1].pos += d_end.normalize() * end_m;
        }
    }

    pub fn length(&self) -> f64 {
        self.points.windows(2).map(|w| (w[1].pos - w[0].pos).norm()).sum()
    }

    /// Shift a straight line so the camera footprint center, not the
    /// autopilot, travels over the planned track.
    pub fn apply_cam_centrency(&mut self, in_flight: f64, parallel: f64) {
        if in_flight == 0.0 && parallel == 0.0 {
            return;
        }
        let sign = if self.forward { -1.0 } else { 1.0 };
        self.parallel_coordinate += sign * parallel;
        for p in &mut self.points {
            if self.rot90 {
                p.pos.x += sign * parallel;
                p.pos.y += sign * in_flight;
            } else {
                p.pos.x += sign * in_flight;
                p.pos.y += sign * parallel;
            }
        }
    }
}

// ==== Area of interest ====

/// Cached results of the last recompute. Never serialized.
#[derive(Debug, Clone, Default)]
pub struct AoiDerived {
    pub frame: Option<AoiFrame>,
    pub corners_local: Vec<Vec3>,
    pub hull_local: Vec<Vec3>,
    pub hull: Vec<GeoPosition>,
    pub area_m2: f64,
    pub corridor_length_m: f64,
    /// Extent of the local corners (x along the scan heading)
    pub length_x: f64,
    pub length_y: f64,
    pub altitude_m: f64,
    pub gsd_m: f64,
    pub sizes: ScanSizes,
    pub optimal_speed_mps: f64,
    pub flight_lines: Vec<FlightLine>,
    pub waypoints: Vec<Waypoint>,
    pub last_error: Option<RecomputeError>,
    pub valid_size: bool,
    pub overlap_in_flight_max_possible: f64,
    pub overlap_warning: bool,
    /// Lines delivered by the background object-coverage task
    pub object_coverage: Option<Vec<FlightLine>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaOfInterest {
    pub name: String,
    pub plan_type: PlanType,
    #[serde(default)]
    corners: Vec<GeoPosition>,
    #[serde(default)]
    params: AoiParameters,
    #[serde(skip)]
    pub derived: AoiDerived,
    #[serde(skip, default = "default_dirty")]
    dirty: bool,
}

fn default_dirty() -> bool {
    true
}

impl AreaOfInterest {
    pub fn new(name: impl Into<String>, plan_type: PlanType, corners: Vec<GeoPosition>) -> Self {
        Self {
            name: name.into(),
            plan_type,
            corners,
            params: AoiParameters::default(),
            derived: AoiDerived::default(),
            dirty: true,
        }
    }

    pub fn with_params(mut self, params: AoiParameters) -> Self {
        self.params = params;
        self.dirty = true;
        self
    }

    pub fn corners(&self) -> &[GeoPosition] {
        &self.corners
    }

    pub fn set_corners(&mut self, corners: Vec<GeoPosition>) {
        self.corners = corners;
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.dirty = true;
        self.derived.object_coverage = None;
    }

    pub fn params(&self) -> &AoiParameters {
        &self.params
    }

    /// Mutable access to the scan parameters; marks derived state stale.
    pub fn params_mut(&mut self) -> &mut AoiParameters {
        self.invalidate();
        &mut self.params
    }

    /// Parameter access for the planner itself; keeps derived state.
    pub(crate) fn params_internal_mut(&mut self) -> &mut AoiParameters {
        &mut self.params
    }

    pub fn set_plan_type(&mut self, plan_type: PlanType) {
        self.plan_type = plan_type;
        self.invalidate();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Record a per-AOI failure and drop everything generated so far.
    pub fn fail(&mut self, err: RecomputeError) {
        tracing::warn!(aoi = %self.name, error = %err, "AOI recompute failed");
        self.derived.flight_lines.clear();
        self.derived.waypoints.clear();
        self.derived.last_error = Some(err);
    }

    pub fn last_error(&self) -> Option<&RecomputeError> {
        self.derived.last_error.as_ref()
    }

    /// Accept the reduced in-flight overlap after a feasibility warning.
    pub fn reduce_overlap(&mut self) {
        let max_possible = self.derived.overlap_in_flight_max_possible;
        let p = &mut self.params;
        let reduced = p.overlap_in_flight.min(max_possible);
        let reduced_min = p.overlap_in_flight_min.min(max_possible);
        p.accepted_overlap_in_flight = Some(reduced);
        p.accepted_overlap_in_flight_min = Some(reduced_min);
        p.overlap_in_flight = reduced;
        p.overlap_in_flight_min = reduced_min;
        self.dirty = true;
    }

    /// First generated waypoint, if any.
    pub fn first_waypoint(&self) -> Option<&Waypoint> {
        self.derived.waypoints.first()
    }

    pub fn last_waypoint(&self) -> Option<&Waypoint> {
        self.derived.waypoints.last()
    }
}

// ==== Statements ====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Takeoff {
    /// Altitude relative to the plan reference
    pub position: GeoPosition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Landing {
    pub position: GeoPosition,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreApproach {
    pub position: GeoPosition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventList {
    /// Raise the safety altitude to the highest waypoint after each recompute
    #[serde(default = "default_true")]
    pub auto_safety_height: bool,
    #[serde(default)]
    pub safety_altitude_m: f64,
}

fn default_true() -> bool {
    true
}

/// Closed set of plan tree nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Takeoff(Takeoff),
    Aoi(Box<AreaOfInterest>),
    Waypoint(Waypoint),
    Landing(Landing),
    PreApproach(PreApproach),
    EventList(EventList),
}

impl Statement {
    /// Position a neighbour would fly from or to, if the node has one.
    pub fn anchor_position(&self) -> Option<GeoPosition> {
        match self {
            Statement::Takeoff(t) => Some(t.position),
            Statement::Waypoint(w) => Some(w.position),
            Statement::PreApproach(p) => Some(p.position),
            Statement::Landing(l) if l.active => Some(l.position),
            _ => None,
        }
    }
}

// ==== Flight plan ====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightPlan {
    #[serde(default)]
    pub name: String,
    /// Plan origin; `alt` is the WGS84 height of the reference
    #[serde(default)]
    pub reference: Option<GeoPosition>,
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub photo: PhotoSettings,
    /// Insert climb waypoints over obstacles hit by connectors
    #[serde(default = "default_true")]
    pub jump_over_obstacles: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub all_aois_size_valid: bool,
}

impl Default for FlightPlan {
    fn default() -> Self {
        Self {
            name: String::new(),
            reference: None,
            statements: Vec::new(),
            photo: PhotoSettings::default(),
            jump_over_obstacles: true,
            updated_at: None,
            all_aois_size_valid: true,
        }
    }
}

impl FlightPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, statement: Statement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    /// Structural checks that make a recompute meaningless when violated.
    pub fn validate(&self) -> EngineResult<()> {
        let active_landings = self
            .statements
            .iter()
            .filter(|s| matches!(s, Statement::Landing(l) if l.active))
            .count();
        if active_landings > 1 {
            return Err(EngineError::InvalidInput(format!(
                "{active_landings} active landing points, at most one allowed"
            )));
        }
        Ok(())
    }

    pub fn takeoff(&self) -> Option<&Takeoff> {
        self.statements.iter().find_map(|s| match s {
            Statement::Takeoff(t) => Some(t),
            _ => None,
        })
    }

    /// The active landing point, if any.
    pub fn landing(&self) -> Option<&Landing> {
        self.statements.iter().find_map(|s| match s {
            Statement::Landing(l) if l.active => Some(l),
            _ => None,
        })
    }

    pub fn event_list(&self) -> Option<&EventList> {
        self.statements.iter().find_map(|s| match s {
            Statement::EventList(e) => Some(e),
            _ => None,
        })
    }

    pub fn event_list_mut(&mut self) -> Option<&mut EventList> {
        self.statements.iter_mut().find_map(|s| match s {
            Statement::EventList(e) => Some(e),
            _ => None,
        })
    }

    pub fn aois(&self) -> impl Iterator<Item = &AreaOfInterest> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Aoi(a) => Some(a.as_ref()),
            _ => None,
        })
    }

    pub fn aois_mut(&mut self) -> impl Iterator<Item = &mut AreaOfInterest> {
        self.statements.iter_mut().filter_map(|s| match s {
            Statement::Aoi(a) => Some(a.as_mut()),
            _ => None,
        })
    }

    pub fn aoi(&self, index: usize) -> Option<&AreaOfInterest> {
        match self.statements.get(index)? {
            Statement::Aoi(a) => Some(a),
            _ => None,
        }
    }

    pub fn aoi_mut(&mut self, index: usize) -> Option<&mut AreaOfInterest> {
        match self.statements.get_mut(index)? {
            Statement::Aoi(a) => Some(a),
            _ => None,
        }
    }

    pub fn find_aoi(&self, name: &str) -> Option<&AreaOfInterest> {
        self.aois().find(|a| a.name == name)
    }

    /// Statement indices of every recomputable node, in plan order.
    pub fn recomputable_indices(&self) -> Vec<usize> {
        self.statements
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Statement::Aoi(_)))
            .map(|(i, _)| i)
            .collect()
    }

    /// Last known position before statement `index`: a previous AOI's last
    /// waypoint or any positioned node, falling back to the takeoff.
    pub fn previous_position(&self, index: usize) -> Option<GeoPosition> {
        let end = index.min(self.statements.len());
        self.statements[..end]
            .iter()
            .rev()
            .find_map(|s| match s {
                Statement::Aoi(a) => a.last_waypoint().map(|w| w.position),
                Statement::Landing(_) => None,
                other => other.anchor_position(),
            })
            .or_else(|| self.takeoff().map(|t| t.position))
    }

    /// First position after statement `index`. Later AOIs contribute their
    /// first corner since they are not planned yet. Falls back to the active
    /// landing, then the takeoff.
    pub fn next_position(&self, index: usize) -> Option<GeoPosition> {
        self.statements
            .iter()
            .skip(index + 1)
            .find_map(|s| match s {
                Statement::Aoi(a) if a.plan_type.has_waypoints() => a.corners().first().copied(),
                Statement::Aoi(_) | Statement::Takeoff(_) => None,
                other => other.anchor_position(),
            })
            .or_else(|| self.landing().map(|l| l.position))
            .or_else(|| self.takeoff().map(|t| t.position))
    }

    /// Flattened waypoint sequence in flying order.
    pub fn waypoints(&self) -> Vec<&Waypoint> {
        let mut out = Vec::new();
        for s in &self.statements {
            match s {
                Statement::Aoi(a) => out.extend(a.derived.waypoints.iter()),
                Statement::Waypoint(w) => out.push(w),
                _ => {}
            }
        }
        out
    }

    /// Mutable waypoint containers (one per AOI, one per raw waypoint).
    pub fn waypoint_containers_mut(&mut self) -> Vec<&mut [Waypoint]> {
        let mut out: Vec<&mut [Waypoint]> = Vec::new();
        for s in &mut self.statements {
            match s {
                Statement::Aoi(a) => out.push(a.derived.waypoints.as_mut_slice()),
                Statement::Waypoint(w) => out.push(std::slice::from_mut(w)),
                _ => {}
            }
        }
        out
    }

    /// Renumber every waypoint from 1 in flying order.
    pub fn reassign_ids(&mut self) {
        let mut next = 1u32;
        for container in self.waypoint_containers_mut() {
            for wp in container.iter_mut() {
                wp.id = next;
                next += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(lat: f64, lon: f64) -> GeoPosition {
        GeoPosition::new(lat, lon, 0.0)
    }

    #[test]
    fn test_min_corners_by_pattern() {
        assert_eq!(PlanType::Polygon.min_corners(), 3);
        assert_eq!(PlanType::Corridor.min_corners(), 2);
        assert_eq!(PlanType::Tower.min_corners(), 1);
        assert!(!PlanType::GeofenceCirc.has_waypoints());
        assert!(PlanType::Building.is_obstacle());
        assert!(!PlanType::GeofencePoly.is_obstacle());
    }

    #[test]
    fn test_param_mutation_marks_dirty() {
        let mut aoi = AreaOfInterest::new("a", PlanType::Polygon, vec![pos(1.0, 1.0)]);
        aoi.mark_clean();
        assert!(!aoi.is_dirty());
        aoi.params_mut().overlap_parallel = 70.0;
        assert!(aoi.is_dirty());
        aoi.mark_clean();
        aoi.set_corners(vec![]);
        assert!(aoi.is_dirty());
    }

    #[test]
    fn test_fail_clears_generated_state() {
        let mut aoi = AreaOfInterest::new("a", PlanType::Polygon, vec![]);
        aoi.derived.waypoints.push(Waypoint::new(pos(1.0, 1.0)));
        aoi.fail(RecomputeError::AreaTooSmall);
        assert!(aoi.derived.waypoints.is_empty());
        assert_eq!(aoi.last_error(), Some(&RecomputeError::AreaTooSmall));
    }

    #[test]
    fn test_two_active_landings_rejected() {
        let mut plan = FlightPlan::new("p");
        let landing = Landing { position: pos(1.0, 1.0), active: true };
        plan.push(Statement::Landing(landing.clone()))
            .push(Statement::Landing(landing));
        assert!(matches!(plan.validate(), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_reassign_ids_in_flying_order() {
        let mut plan = FlightPlan::new("p");
        let mut aoi = AreaOfInterest::new("a", PlanType::Polygon, vec![]);
        aoi.derived.waypoints = vec![Waypoint::new(pos(1.0, 1.0)), Waypoint::new(pos(1.0, 2.0))];
        plan.push(Statement::Waypoint(Waypoint::new(pos(0.0, 1.0))))
            .push(Statement::Aoi(Box::new(aoi)));
        plan.reassign_ids();
        let ids: Vec<u32> = plan.waypoints().iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_statement_json_is_tagged() {
        let json = r#"{"kind": "landing", "position": {"lat": 1.0, "lon": 2.0}}"#;
        let s: Statement = serde_json::from_str(json).unwrap();
        assert!(matches!(s, Statement::Landing(Landing { active: true, .. })));
    }

    #[test]
    fn test_mirror_and_enlarge() {
        let mut line = FlightLine::raster(5.0, MinMax::new(0.0, 10.0), 0, false);
        line.enlarge(1.0, 2.0);
        assert_eq!(line.first().unwrap().x, -1.0);
        assert_eq!(line.last().unwrap().x, 12.0);
        line.mirror();
        assert!(!line.forward);
        assert_eq!(line.first().unwrap().x, 12.0);
        assert!((line.length() - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_orientation_delta_wraps() {
        let a = Orientation::new(0.0, 90.0, 350.0);
        let b = Orientation::new(0.0, 80.0, 10.0);
        assert!((a.max_abs_delta(&b) - 20.0).abs() < 1e-9);
    }
}
