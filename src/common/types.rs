//! Common types used throughout kino_replanner

use std::fmt;

use nalgebra::{UnitQuaternion, Vector3};

use crate::common::error::{PlannerError, PlannerResult};

/// Positions closer than this are considered the same point when stitching segments
pub const CONTINUITY_TOLERANCE: f64 = 1e-6;

/// Vehicle configuration: position, velocity and acceleration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct State3D {
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    pub acc: Vector3<f64>,
}

impl State3D {
    pub fn new(pos: Vector3<f64>, vel: Vector3<f64>, acc: Vector3<f64>) -> Self {
        Self { pos, vel, acc }
    }

    /// State at rest at the given position
    pub fn at_rest(pos: Vector3<f64>) -> Self {
        Self { pos, vel: Vector3::zeros(), acc: Vector3::zeros() }
    }

    pub fn origin() -> Self {
        Self::at_rest(Vector3::zeros())
    }

    pub fn is_finite(&self) -> bool {
        is_finite_vector(&self.pos) && is_finite_vector(&self.vel) && is_finite_vector(&self.acc)
    }
}

/// Vehicle pose: position plus orientation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose3D {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Pose3D {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self { position, orientation }
    }

    /// Pose with a yaw-only orientation
    pub fn from_yaw(position: Vector3<f64>, yaw: f64) -> Self {
        Self { position, orientation: UnitQuaternion::from_euler_angles(0.0, 0.0, yaw) }
    }

    pub fn yaw(&self) -> f64 {
        self.orientation.euler_angles().2
    }

    /// Unit vector of the heading projected onto the horizontal plane
    pub fn heading_direction(&self) -> Vector3<f64> {
        let yaw = self.yaw();
        Vector3::new(yaw.cos(), yaw.sin(), 0.0)
    }
}

/// Axis-aligned box over which the distance field and the search are valid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: Vector3<f64>,
    pub end: Vector3<f64>,
}

impl Window {
    /// Create a window from two corners in any order
    pub fn new(a: Vector3<f64>, b: Vector3<f64>) -> Self {
        Self { start: a.inf(&b), end: a.sup(&b) }
    }

    pub fn size(&self) -> Vector3<f64> {
        self.end - self.start
    }

    pub fn center(&self) -> Vector3<f64> {
        (self.start + self.end) * 0.5
    }

    pub fn volume(&self) -> f64 {
        let s = self.size();
        s.x * s.y * s.z
    }

    /// Closed containment test
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.start[i] && p[i] <= self.end[i])
    }

    /// Containment in the interior shrunk by `margin` on every face
    pub fn contains_with_margin(&self, p: &Vector3<f64>, margin: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.start[i] + margin[i] && p[i] <= self.end[i] - margin[i])
    }

    /// Intersection with another box, `None` when they do not overlap
    pub fn intersection(&self, other: &Window) -> Option<Window> {
        let start = self.start.sup(&other.start);
        let end = self.end.inf(&other.end);
        if (0..3).all(|i| start[i] <= end[i]) {
            Some(Window { start, end })
        } else {
            None
        }
    }

    /// Smallest box containing this one and `p`
    pub fn expanded_to_include(&self, p: &Vector3<f64>) -> Window {
        Window { start: self.start.inf(p), end: self.end.sup(p) }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[({:.2}, {:.2}, {:.2}) -> ({:.2}, {:.2}, {:.2})]",
            self.start.x, self.start.y, self.start.z, self.end.x, self.end.y, self.end.z
        )
    }
}

/// Outcome of a single search invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlannerStatus {
    /// Goal reached within tolerance
    Reached,
    /// Search truncated at the window boundary; partial trajectory is usable
    InProgress,
    /// Open set exhausted or budget elapsed
    NoPathFound,
    /// Inputs rejected before searching
    Invalid,
}

impl PlannerStatus {
    /// Whether the search produced a trajectory worth consuming
    pub fn has_trajectory(&self) -> bool {
        matches!(self, PlannerStatus::Reached | PlannerStatus::InProgress)
    }
}

impl fmt::Display for PlannerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlannerStatus::Reached => "reached",
            PlannerStatus::InProgress => "in-progress",
            PlannerStatus::NoPathFound => "no-path-found",
            PlannerStatus::Invalid => "invalid",
        };
        write!(f, "{}", name)
    }
}

/// States sampled at a fixed time step from one search invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySegment {
    states: Vec<State3D>,
    dt: f64,
}

impl TrajectorySegment {
    pub fn new(states: Vec<State3D>, dt: f64) -> Self {
        Self { states, dt }
    }

    pub fn states(&self) -> &[State3D] {
        &self.states
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn first(&self) -> Option<&State3D> {
        self.states.first()
    }

    pub fn last(&self) -> Option<&State3D> {
        self.states.last()
    }

    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.states.iter().map(|s| s.pos).collect()
    }

    /// Time spanned by the samples
    pub fn duration(&self) -> f64 {
        self.states.len().saturating_sub(1) as f64 * self.dt
    }

    pub fn path_length(&self) -> f64 {
        self.states.windows(2).map(|w| (w[1].pos - w[0].pos).norm()).sum()
    }
}

/// Append-only concatenation of accepted segments
#[derive(Debug, Clone, Default)]
pub struct GlobalTrajectory {
    segments: Vec<TrajectorySegment>,
}

impl GlobalTrajectory {
    pub fn new() -> Self {
        Self { segments: Vec::new() }
    }

    /// Append a segment, enforcing that it starts where the trajectory ends.
    pub fn append(&mut self, segment: TrajectorySegment) -> PlannerResult<()> {
        let first = segment
            .first()
            .ok_or_else(|| PlannerError::InvalidState("cannot append an empty segment".to_string()))?;
        if let Some(tail) = self.tail() {
            let gap = (tail.pos - first.pos).norm();
            if gap > CONTINUITY_TOLERANCE {
                return Err(PlannerError::InvalidState(format!(
                    "segment starts {:.3} away from the trajectory tail",
                    gap
                )));
            }
        }
        self.segments.push(segment);
        Ok(())
    }

    pub fn segments(&self) -> &[TrajectorySegment] {
        &self.segments
    }

    pub fn states(&self) -> impl Iterator<Item = &State3D> {
        self.segments.iter().flat_map(|s| s.states().iter())
    }

    /// Last state of the last segment
    pub fn tail(&self) -> Option<&State3D> {
        self.segments.last().and_then(|s| s.last())
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn path_length(&self) -> f64 {
        self.segments.iter().map(|s| s.path_length()).sum()
    }
}

pub fn is_finite_vector(v: &Vector3<f64>) -> bool {
    v.iter().all(|c| c.is_finite())
}

/// Per-axis sanity check: every coordinate finite and strictly inside `±bound`.
pub fn is_position_bounded(p: &Vector3<f64>, bound: f64) -> bool {
    p.iter().all(|c| c.is_finite() && c.abs() < bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_normalizes_corners() {
        let w = Window::new(Vector3::new(6.0, -1.0, 3.0), Vector3::new(-1.0, 6.0, 0.0));
        assert_eq!(w.start, Vector3::new(-1.0, -1.0, 0.0));
        assert_eq!(w.end, Vector3::new(6.0, 6.0, 3.0));
        assert!((w.volume() - 147.0).abs() < 1e-10);
    }

    #[test]
    fn test_window_margin_containment() {
        let w = Window::new(Vector3::zeros(), Vector3::new(8.0, 6.0, 6.0));
        let margin = Vector3::new(0.5, 0.5, 0.5);
        assert!(w.contains(&Vector3::new(0.2, 3.0, 3.0)));
        assert!(!w.contains_with_margin(&Vector3::new(0.2, 3.0, 3.0), &margin));
        assert!(w.contains_with_margin(&Vector3::new(4.0, 3.0, 3.0), &margin));
    }

    #[test]
    fn test_window_intersection() {
        let a = Window::new(Vector3::zeros(), Vector3::new(4.0, 4.0, 4.0));
        let b = Window::new(Vector3::new(2.0, 2.0, 2.0), Vector3::new(6.0, 6.0, 6.0));
        let c = Window::new(Vector3::new(5.0, 5.0, 5.0), Vector3::new(6.0, 6.0, 6.0));
        assert_eq!(a.intersection(&b).unwrap().size(), Vector3::new(2.0, 2.0, 2.0));
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_position_bound_is_per_axis() {
        assert!(is_position_bounded(&Vector3::new(1.0, -2.0, 3.0), 1000.0));
        assert!(!is_position_bounded(&Vector3::new(1.0, 5000.0, 3.0), 1000.0));
        assert!(!is_position_bounded(&Vector3::new(1.0, 2.0, f64::NAN), 1000.0));
        assert!(!is_position_bounded(&Vector3::new(f64::INFINITY, 0.0, 0.0), 1000.0));
    }

    #[test]
    fn test_global_trajectory_continuity() {
        let a = TrajectorySegment::new(
            vec![State3D::at_rest(Vector3::zeros()), State3D::at_rest(Vector3::new(1.0, 0.0, 0.0))],
            0.08,
        );
        let b = TrajectorySegment::new(
            vec![State3D::at_rest(Vector3::new(1.0, 0.0, 0.0)), State3D::at_rest(Vector3::new(2.0, 0.0, 0.0))],
            0.08,
        );
        let gap = TrajectorySegment::new(vec![State3D::at_rest(Vector3::new(5.0, 0.0, 0.0))], 0.08);

        let mut traj = GlobalTrajectory::new();
        traj.append(a).unwrap();
        traj.append(b).unwrap();
        assert!(traj.append(gap).is_err());
        assert_eq!(traj.len(), 4);
        assert_eq!(traj.tail().unwrap().pos, Vector3::new(2.0, 0.0, 0.0));
        assert!((traj.path_length() - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_pose_heading() {
        let pose = Pose3D::from_yaw(Vector3::zeros(), std::f64::consts::FRAC_PI_2);
        let dir = pose.heading_direction();
        assert!(dir.x.abs() < 1e-10);
        assert!((dir.y - 1.0).abs() < 1e-10);
    }
}
