//! Incremental replanning loop
//!
//! Each call to [`ReplanningLoop::step`] runs one planning iteration:
//! read the latest inputs, rebuild the distance field, search from the tail
//! of the global trajectory and append the result. After the first segment
//! of an episode a new search only runs once the vehicle pose enters the
//! stale margin of the current window; the next window is placed around the
//! vehicle and stretched to cover the tail.

use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, error, info, warn};

use crate::common::{
    is_position_bounded, GlobalTrajectory, PlannerConfig, PlannerError, PlannerResult, PlannerStatus, Pose3D,
    State3D, TrajectorySegment, Window,
};
use crate::mapping::{DistanceField, OccupancyVolume, WindowManager};
use crate::mission_planning::inputs::{GoalRequest, InputSnapshot, PlannerInputs, Versioned};
use crate::mission_planning::output::{PathMessage, PathSink};
use crate::mission_planning::state_machine::{AbortReason, LoopEvent, LoopPhase, PhaseTracker};
use crate::path_planning::kinodynamic::{KinodynamicAstar, SearchRequest};

/// Result of a single iteration
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// No goal yet, no first pose, or the vehicle is still well inside the window
    Waiting,
    /// The search failed and the iteration will be repeated
    Retrying { attempts: u32, status: PlannerStatus },
    /// A segment was appended to the global trajectory
    SegmentAccepted { status: PlannerStatus, samples: usize },
    /// The episode is over
    Finished(LoopPhase),
}

/// Statistics of a finished episode
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub segments: usize,
    pub samples: usize,
    pub path_length: f64,
    pub searches: usize,
}

/// Drop samples with non-finite or out-of-range coordinates
pub fn retain_bounded(states: Vec<State3D>, bound: f64) -> Vec<State3D> {
    let total = states.len();
    let kept: Vec<State3D> = states
        .into_iter()
        .filter(|s| s.is_finite() && is_position_bounded(&s.pos, bound))
        .collect();
    if kept.len() < total {
        warn!("dropped {} of {} samples outside +/-{}", total - kept.len(), total, bound);
    }
    kept
}

/// Sequences window updates, field builds and searches for one goal at a time
pub struct ReplanningLoop {
    config: PlannerConfig,
    inputs: PlannerInputs,
    window_manager: WindowManager,
    distance_field: DistanceField,
    planner: KinodynamicAstar,
    tracker: PhaseTracker,
    trajectory: GlobalTrajectory,
    goal: Option<Vector3<f64>>,
    goal_version: u64,
    next_start: Option<State3D>,
    reference_pose: Option<Pose3D>,
    start_heading: Option<f64>,
    orientation: UnitQuaternion<f64>,
    failures: u32,
    segments: usize,
    searches: usize,
    force_initial_guess: bool,
    last_request: Option<SearchRequest>,
}

impl ReplanningLoop {
    pub fn new(config: PlannerConfig, inputs: PlannerInputs) -> Self {
        Self {
            window_manager: WindowManager::new(&config.window),
            distance_field: DistanceField::from_config(&config.map),
            planner: KinodynamicAstar::new(config.search.clone()),
            config,
            inputs,
            tracker: PhaseTracker::new(),
            trajectory: GlobalTrajectory::new(),
            goal: None,
            goal_version: 0,
            next_start: None,
            reference_pose: None,
            start_heading: None,
            orientation: UnitQuaternion::identity(),
            failures: 0,
            segments: 0,
            searches: 0,
            force_initial_guess: false,
            last_request: None,
        }
    }

    pub fn inputs(&self) -> &PlannerInputs {
        &self.inputs
    }

    pub fn phase(&self) -> &LoopPhase {
        self.tracker.current()
    }

    pub fn tracker(&self) -> &PhaseTracker {
        &self.tracker
    }

    pub fn trajectory(&self) -> &GlobalTrajectory {
        &self.trajectory
    }

    pub fn goal(&self) -> Option<Vector3<f64>> {
        self.goal
    }

    pub fn window(&self) -> Option<&Window> {
        self.window_manager.current()
    }

    /// Pose recorded when the episode was initialized
    pub fn reference_pose(&self) -> Option<&Pose3D> {
        self.reference_pose.as_ref()
    }

    /// `90 - compass` in degrees, captured at episode start
    pub fn start_heading(&self) -> Option<f64> {
        self.start_heading
    }

    /// Orientation attached to every published pose of this episode
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        self.orientation
    }

    /// Searches run since construction
    pub fn search_count(&self) -> usize {
        self.searches
    }

    /// Request handed to the most recent search
    pub fn last_request(&self) -> Option<&SearchRequest> {
        self.last_request.as_ref()
    }

    /// Run one planning iteration.
    ///
    /// Returns `Err(MapNotReady)` without searching until an occupancy volume
    /// has been published. Unrecoverable errors also abort the episode.
    pub fn step(&mut self, sink: &mut dyn PathSink) -> PlannerResult<StepOutcome> {
        if self.inputs.is_shutdown() {
            return Ok(self.shutdown());
        }

        let snapshot = self.inputs.snapshot();
        if snapshot.restart_requested {
            info!("restart requested; next search uses an initial guess");
            self.force_initial_guess = true;
        }
        if let Some(goal) = &snapshot.goal {
            if goal.version != self.goal_version {
                self.accept_goal(goal, snapshot.pose.is_some());
            }
        }

        match self.tracker.current().clone() {
            LoopPhase::AwaitingGoal => return Ok(StepOutcome::Waiting),
            LoopPhase::AwaitingFirstPose => {
                if snapshot.pose.is_none() {
                    return Ok(StepOutcome::Waiting);
                }
                self.tracker.handle(LoopEvent::PoseReceived);
            }
            phase if phase.is_terminal() => return Ok(StepOutcome::Finished(phase)),
            _ => {}
        }

        let Some(volume) = snapshot.volume.as_ref().map(|v| v.value.clone()) else {
            debug!("no occupancy volume yet; deferring");
            return Err(PlannerError::MapNotReady);
        };

        if self.next_start.is_none() {
            match self.initialize_episode(&snapshot) {
                Some(start) => self.next_start = Some(start),
                None => return Ok(StepOutcome::Waiting),
            }
        }
        let Some(vehicle) = snapshot.pose.map(|p| p.position) else {
            return Ok(StepOutcome::Waiting);
        };

        self.plan_iteration(&volume, &vehicle, sink)
    }

    /// Step until the episode finishes or `max_iterations` is reached
    pub fn run(&mut self, sink: &mut dyn PathSink, max_iterations: usize) -> PlannerResult<EpisodeSummary> {
        for _ in 0..max_iterations {
            match self.step(sink) {
                Ok(StepOutcome::Finished(phase)) => return self.finish(&phase),
                Ok(_) => {}
                Err(e) if e.is_recoverable() => debug!("iteration deferred: {}", e),
                Err(e) => return Err(e),
            }
        }
        Err(PlannerError::InvalidState(format!("episode unfinished after {} iterations", max_iterations)))
    }

    fn finish(&self, phase: &LoopPhase) -> PlannerResult<EpisodeSummary> {
        match phase {
            LoopPhase::GoalReached => Ok(EpisodeSummary {
                segments: self.trajectory.segments().len(),
                samples: self.trajectory.len(),
                path_length: self.trajectory.path_length(),
                searches: self.searches,
            }),
            LoopPhase::Aborted(reason @ AbortReason::RetriesExhausted { .. }) => {
                Err(PlannerError::NoPathFound(reason.description()))
            }
            LoopPhase::Aborted(AbortReason::SegmentLimit { segments }) => {
                Err(PlannerError::GoalUnreachableInWindow(*segments))
            }
            LoopPhase::Aborted(AbortReason::Fatal { message }) => Err(PlannerError::ResourceExhausted(message.clone())),
            LoopPhase::Aborted(AbortReason::Shutdown) => Err(PlannerError::Shutdown),
            other => Err(PlannerError::InvalidState(format!("episode stopped in phase {}", other))),
        }
    }

    fn shutdown(&mut self) -> StepOutcome {
        if self.tracker.current() != &LoopPhase::Aborted(AbortReason::Shutdown) {
            info!("shutdown requested; stopping with {} segments", self.trajectory.segments().len());
            self.tracker.handle(LoopEvent::Shutdown);
        }
        StepOutcome::Finished(self.tracker.current().clone())
    }

    fn accept_goal(&mut self, goal: &Versioned<GoalRequest>, pose_known: bool) {
        let position = goal.value.position(self.config.replan.goal_altitude);
        info!("new goal ({:.2}, {:.2}, {:.2})", position.x, position.y, position.z);
        self.goal_version = goal.version;
        self.goal = Some(position);
        self.trajectory.clear();
        self.window_manager.reset();
        self.planner.reset();
        self.next_start = None;
        self.reference_pose = None;
        self.start_heading = None;
        self.failures = 0;
        self.segments = 0;
        self.tracker.handle(LoopEvent::GoalAccepted { pose_known });
    }

    /// Capture the episode reference and build the first start state
    fn initialize_episode(&mut self, snapshot: &InputSnapshot) -> Option<State3D> {
        let pose = snapshot.pose?;
        let replan = &self.config.replan;

        let start = pose.position + pose.heading_direction() * replan.start_offset;
        self.start_heading = snapshot.heading.map(|compass| 90.0 - compass);
        self.orientation = if replan.compensate_heading {
            let yaw = self.start_heading.map_or(pose.yaw(), f64::to_radians);
            UnitQuaternion::from_euler_angles(0.0, 0.0, yaw)
        } else {
            pose.orientation
        };
        self.reference_pose = Some(pose);
        self.window_manager.reset();
        self.force_initial_guess = true;

        info!(
            "episode start at ({:.2}, {:.2}, {:.2}), heading {:?}",
            start.x, start.y, start.z, self.start_heading
        );
        Some(State3D::new(start, Vector3::zeros(), Vector3::from(replan.initial_acceleration)))
    }

    fn plan_iteration(
        &mut self,
        volume: &OccupancyVolume,
        vehicle: &Vector3<f64>,
        sink: &mut dyn PathSink,
    ) -> PlannerResult<StepOutcome> {
        let (Some(start), Some(goal)) = (self.next_start, self.goal) else {
            return Err(PlannerError::InvalidState("planning without a start or goal".to_string()));
        };

        // after the first segment, replan only once the vehicle drifts into the window margin
        let pending_retry = self.failures > 0;
        let window = match self.window_manager.current().copied() {
            Some(window) if pending_retry => window,
            Some(_) if !self.window_manager.needs_update(vehicle) => {
                debug!("vehicle ({:.2}, {:.2}, {:.2}) inside the window; waiting", vehicle.x, vehicle.y, vehicle.z);
                return Ok(StepOutcome::Waiting);
            }
            _ => {
                self.window_manager.set_travel_direction(goal - vehicle);
                self.window_manager.set_map_bounds(Some(volume.bounds()));
                let window = self.window_manager.compute_window_covering(vehicle, &start.pos);
                info!("window {}", window);
                window
            }
        };

        let field = match self.distance_field.build(Some(volume), &window, self.config.map.unknown_is_free) {
            Ok(field) => field,
            Err(e) => {
                if !e.is_recoverable() {
                    error!("distance field build failed: {}", e);
                    self.tracker.handle(LoopEvent::Fatal(e.to_string()));
                }
                return Err(e);
            }
        };
        if self.config.visualization.publish_costmap {
            sink.publish_costmap(&field.costmap_cells(self.config.visualization.costmap_max_distance));
        }

        self.planner.reset();
        self.planner.init(window, start.pos);
        let request = SearchRequest::new(start, goal, Vector3::zeros())
            .with_initial_guess(self.force_initial_guess)
            .with_time_budget(self.config.search.time_budget());
        self.searches += 1;
        self.last_request = Some(request);
        let status = self.planner.search(&field, &request);
        debug!("search {} finished: {} ({} nodes)", self.searches, status, self.planner.node_count());

        let samples = if status.has_trajectory() {
            retain_bounded(self.planner.get_trajectory(self.config.replan.delta_t), self.config.replan.position_bound)
        } else {
            Vec::new()
        };
        // the field is dropped here; it never outlives the iteration
        drop(field);

        if samples.is_empty() {
            self.failures += 1;
            let retry = self.config.replan.retry.allows(self.failures);
            warn!("search failed ({}), attempt {}", status, self.failures);
            self.tracker.handle(LoopEvent::SearchFailed { retry, attempts: self.failures });
            self.planner.reset();
            if !retry {
                error!("giving up: {}", self.tracker.current());
                return Ok(StepOutcome::Finished(self.tracker.current().clone()));
            }
            let reported = if status.has_trajectory() { PlannerStatus::NoPathFound } else { status };
            return Ok(StepOutcome::Retrying { attempts: self.failures, status: reported });
        }

        self.tracker.handle(LoopEvent::SegmentFound);
        if self.inputs.is_shutdown() {
            return Ok(self.shutdown());
        }

        let segment = TrajectorySegment::new(samples, self.config.replan.delta_t);
        let tail = segment.last().copied();
        let reached = status == PlannerStatus::Reached;
        let sample_count = segment.len();
        let message = PathMessage::from_segment(self.segments, &segment, self.orientation, reached);
        self.trajectory.append(segment)?;
        self.segments += 1;
        self.failures = 0;
        self.force_initial_guess = false;
        self.next_start = tail;
        self.planner.reset();
        sink.publish_path(&message);

        let segment_limit = match self.config.replan.max_segments {
            Some(max) if !reached && self.segments >= max => Some(self.segments),
            _ => None,
        };
        self.tracker.handle(LoopEvent::SegmentAppended { reached, segment_limit });

        match self.tracker.current() {
            LoopPhase::GoalReached => {
                info!(
                    "goal reached: {} segments, {:.2} m",
                    self.trajectory.segments().len(),
                    self.trajectory.path_length()
                );
                Ok(StepOutcome::Finished(LoopPhase::GoalReached))
            }
            phase @ LoopPhase::Aborted(_) => {
                warn!("episode aborted: {}", phase);
                Ok(StepOutcome::Finished(phase.clone()))
            }
            _ => Ok(StepOutcome::SegmentAccepted { status, samples: sample_count }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::VoxelState;
    use crate::mission_planning::output::RecordingSink;

    fn test_config() -> PlannerConfig {
        let mut config = PlannerConfig::default();
        config.search.time_budget_ms = 5_000;
        config
    }

    fn open_volume() -> OccupancyVolume {
        let bounds = Window::new(Vector3::new(-2.0, -4.0, 0.0), Vector3::new(14.0, 4.0, 4.0));
        OccupancyVolume::free_space(&bounds, 0.1).unwrap()
    }

    fn loop_with(config: PlannerConfig) -> (ReplanningLoop, PlannerInputs) {
        let inputs = PlannerInputs::new();
        (ReplanningLoop::new(config, inputs.clone()), inputs)
    }

    #[test]
    fn test_waits_for_goal() {
        let (mut planner, inputs) = loop_with(test_config());
        let mut sink = RecordingSink::new();
        inputs.publish_occupancy(open_volume());
        assert_eq!(planner.step(&mut sink).unwrap(), StepOutcome::Waiting);

        inputs.publish_goal(GoalRequest::new(3.0, 0.0, Some(1.0)));
        assert_eq!(planner.step(&mut sink).unwrap(), StepOutcome::Waiting);
        assert_eq!(planner.phase(), &LoopPhase::AwaitingFirstPose);
        assert_eq!(planner.search_count(), 0);
    }

    #[test]
    fn test_map_not_ready_performs_no_search() {
        let (mut planner, inputs) = loop_with(test_config());
        let mut sink = RecordingSink::new();
        inputs.publish_goal(GoalRequest::new(3.0, 0.0, Some(1.0)));
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));

        let err = planner.step(&mut sink).unwrap_err();
        assert!(matches!(err, PlannerError::MapNotReady));
        assert!(err.is_recoverable());
        assert_eq!(planner.search_count(), 0);
        assert!(planner.trajectory().is_empty());
        assert!(sink.paths.is_empty());
    }

    /// Step like a vehicle that flies each accepted segment to its end
    fn drive(
        planner: &mut ReplanningLoop,
        inputs: &PlannerInputs,
        sink: &mut RecordingSink,
        max_iterations: usize,
    ) -> PlannerResult<EpisodeSummary> {
        for _ in 0..max_iterations {
            match planner.step(sink)? {
                StepOutcome::SegmentAccepted { .. } => {
                    let pose = *sink.last_path().unwrap().poses.last().unwrap();
                    inputs.publish_pose(pose);
                }
                StepOutcome::Finished(phase) => return planner.finish(&phase),
                _ => {}
            }
        }
        Err(PlannerError::InvalidState("episode unfinished".to_string()))
    }

    fn move_to_tail(planner: &ReplanningLoop, inputs: &PlannerInputs) {
        let tail = planner.trajectory().tail().unwrap().pos;
        inputs.publish_pose(Pose3D::from_yaw(tail, 0.0));
    }

    #[test]
    fn test_reaches_goal_across_windows() {
        let (mut planner, inputs) = loop_with(test_config());
        let mut sink = RecordingSink::new();
        inputs.publish_occupancy(open_volume());
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(10.0, 0.0, Some(1.0)));

        let summary = drive(&mut planner, &inputs, &mut sink, 40).unwrap();
        assert_eq!(planner.phase(), &LoopPhase::GoalReached);
        assert!(summary.segments >= 2);
        assert_eq!(summary.searches, summary.segments);
        assert_eq!(sink.paths.len(), summary.segments);
        assert!(sink.paths.last().unwrap().is_final);

        let first = planner.trajectory().states().next().unwrap();
        assert!((first.pos - Vector3::new(0.5, 0.0, 1.0)).norm() < 1e-9);
        let segments = planner.trajectory().segments();
        for pair in segments.windows(2) {
            let gap = (pair[0].last().unwrap().pos - pair[1].first().unwrap().pos).norm();
            assert!(gap <= 1e-6);
        }
        let tail = planner.trajectory().tail().unwrap();
        assert!((tail.pos - Vector3::new(10.0, 0.0, 1.0)).norm() <= 0.1);
    }

    #[test]
    fn test_stationary_vehicle_defers_replanning() {
        let (mut planner, inputs) = loop_with(test_config());
        let mut sink = RecordingSink::new();
        let vehicle = Vector3::new(0.0, 0.0, 1.0);
        inputs.publish_occupancy(open_volume());
        inputs.publish_pose(Pose3D::from_yaw(vehicle, 0.0));
        inputs.publish_goal(GoalRequest::new(10.0, 0.0, Some(1.0)));

        let outcome = planner.step(&mut sink).unwrap();
        assert!(matches!(outcome, StepOutcome::SegmentAccepted { status: PlannerStatus::InProgress, .. }));
        let window = *planner.window().unwrap();
        assert!(window.contains(&vehicle));

        for _ in 0..5 {
            assert_eq!(planner.step(&mut sink).unwrap(), StepOutcome::Waiting);
        }
        assert_eq!(planner.search_count(), 1);
        assert_eq!(planner.trajectory().segments().len(), 1);
        assert_eq!(sink.paths.len(), 1);
        assert_eq!(planner.window(), Some(&window));

        move_to_tail(&planner, &inputs);
        let outcome = planner.step(&mut sink).unwrap();
        assert!(matches!(outcome, StepOutcome::SegmentAccepted { .. } | StepOutcome::Finished(LoopPhase::GoalReached)));
        assert_eq!(planner.search_count(), 2);
        let moved = planner.window().unwrap();
        assert_ne!(moved, &window);
        assert!(moved.contains(&planner.trajectory().segments()[0].last().unwrap().pos));
    }

    #[test]
    fn test_restart_forces_initial_guess_once() {
        let (mut planner, inputs) = loop_with(test_config());
        let mut sink = RecordingSink::new();
        let bounds = Window::new(Vector3::new(-2.0, -4.0, 0.0), Vector3::new(34.0, 4.0, 4.0));
        inputs.publish_occupancy(OccupancyVolume::free_space(&bounds, 0.1).unwrap());
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(30.0, 0.0, Some(1.0)));

        assert!(matches!(planner.step(&mut sink).unwrap(), StepOutcome::SegmentAccepted { .. }));
        assert!(planner.last_request().unwrap().use_initial_guess);

        move_to_tail(&planner, &inputs);
        assert!(matches!(planner.step(&mut sink).unwrap(), StepOutcome::SegmentAccepted { .. }));
        assert!(!planner.last_request().unwrap().use_initial_guess);

        inputs.request_restart();
        move_to_tail(&planner, &inputs);
        assert!(matches!(planner.step(&mut sink).unwrap(), StepOutcome::SegmentAccepted { .. }));
        assert!(planner.last_request().unwrap().use_initial_guess);

        move_to_tail(&planner, &inputs);
        assert!(matches!(planner.step(&mut sink).unwrap(), StepOutcome::SegmentAccepted { .. }));
        assert!(!planner.last_request().unwrap().use_initial_guess);
        assert_eq!(planner.search_count(), 4);
    }

    #[test]
    fn test_oversized_window_aborts_without_search() {
        let mut config = test_config();
        config.map.max_cells = 10;
        let (mut planner, inputs) = loop_with(config);
        let mut sink = RecordingSink::new();
        inputs.publish_occupancy(open_volume());
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(10.0, 0.0, Some(1.0)));

        let err = planner.step(&mut sink).unwrap_err();
        assert!(matches!(err, PlannerError::ResourceExhausted(_)));
        assert!(!err.is_recoverable());
        assert!(matches!(planner.phase(), LoopPhase::Aborted(AbortReason::Fatal { .. })));
        assert_eq!(planner.search_count(), 0);
        assert!(planner.trajectory().is_empty());
        assert!(sink.paths.is_empty());

        assert!(matches!(
            planner.step(&mut sink).unwrap(),
            StepOutcome::Finished(LoopPhase::Aborted(AbortReason::Fatal { .. }))
        ));
        assert_eq!(planner.search_count(), 0);
    }

    #[test]
    fn test_retry_exhaustion_aborts() {
        let mut config = test_config();
        config.replan.retry.max_retries = Some(1);
        let (mut planner, inputs) = loop_with(config);
        let mut sink = RecordingSink::new();

        let bounds = Window::new(Vector3::new(-2.0, -4.0, 0.0), Vector3::new(8.0, 4.0, 3.0));
        let mut volume = OccupancyVolume::free_space(&bounds, 0.1).unwrap();
        volume.fill_box(&bounds, VoxelState::Occupied);
        volume.fill_box(&Window::new(Vector3::new(0.2, -0.3, 0.7), Vector3::new(0.8, 0.3, 1.3)), VoxelState::Free);
        inputs.publish_occupancy(volume);
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(5.0, 0.0, Some(1.0)));

        let outcome = planner.step(&mut sink).unwrap();
        assert!(matches!(outcome, StepOutcome::Retrying { attempts: 1, .. }));
        assert_eq!(planner.phase(), &LoopPhase::Initializing);

        let err = planner.run(&mut sink, 10).unwrap_err();
        assert!(matches!(err, PlannerError::NoPathFound(_)));
        assert_eq!(planner.phase(), &LoopPhase::Aborted(AbortReason::RetriesExhausted { attempts: 2 }));
        assert_eq!(planner.search_count(), 2);
        assert!(planner.trajectory().is_empty());
    }

    #[test]
    fn test_segment_limit() {
        let mut config = test_config();
        config.replan.max_segments = Some(1);
        let (mut planner, inputs) = loop_with(config);
        let mut sink = RecordingSink::new();
        inputs.publish_occupancy(open_volume());
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(12.0, 0.0, Some(1.0)));

        let err = planner.run(&mut sink, 10).unwrap_err();
        assert!(matches!(err, PlannerError::GoalUnreachableInWindow(1)));
        assert_eq!(planner.trajectory().segments().len(), 1);
    }

    #[test]
    fn test_new_goal_resets_episode() {
        let (mut planner, inputs) = loop_with(test_config());
        let mut sink = RecordingSink::new();
        inputs.publish_occupancy(open_volume());
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(2.5, 0.0, Some(1.0)));
        planner.run(&mut sink, 20).unwrap();
        assert_eq!(planner.phase(), &LoopPhase::GoalReached);

        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(2.5, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(5.0, 1.0, None));
        planner.step(&mut sink).unwrap();
        assert_eq!(planner.goal(), Some(Vector3::new(5.0, 1.0, 3.0)));
        assert_eq!(planner.trajectory().segments().len(), 1);
        let first = planner.trajectory().states().next().unwrap();
        assert!((first.pos - Vector3::new(3.0, 0.0, 1.0)).norm() < 1e-9);
        assert!(planner.tracker().visited().contains(&LoopPhase::Initializing));
    }

    #[test]
    fn test_shutdown_between_iterations() {
        let (mut planner, inputs) = loop_with(test_config());
        let mut sink = RecordingSink::new();
        inputs.publish_occupancy(open_volume());
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(12.0, 0.0, Some(1.0)));

        assert!(matches!(planner.step(&mut sink).unwrap(), StepOutcome::SegmentAccepted { .. }));
        let samples = planner.trajectory().len();
        inputs.request_shutdown();

        let err = planner.run(&mut sink, 5).unwrap_err();
        assert!(matches!(err, PlannerError::Shutdown));
        assert_eq!(planner.trajectory().len(), samples);
        assert_eq!(planner.phase(), &LoopPhase::Aborted(AbortReason::Shutdown));
    }

    #[test]
    fn test_heading_compensation() {
        let mut config = test_config();
        config.replan.compensate_heading = true;
        let (mut planner, inputs) = loop_with(config);
        let mut sink = RecordingSink::new();
        inputs.publish_occupancy(open_volume());
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_heading(30.0);
        inputs.publish_goal(GoalRequest::new(2.5, 0.0, Some(1.0)));
        planner.step(&mut sink).unwrap();

        assert_eq!(planner.start_heading(), Some(60.0));
        let yaw = planner.orientation().euler_angles().2;
        assert!((yaw - 60.0_f64.to_radians()).abs() < 1e-9);
        let path = sink.last_path().unwrap();
        assert!(path.poses.iter().all(|p| p.orientation == planner.orientation()));
    }

    #[test]
    fn test_costmap_published_per_build() {
        let (mut planner, inputs) = loop_with(test_config());
        let mut sink = RecordingSink::new();
        let mut volume = open_volume();
        volume.fill_box(&Window::new(Vector3::new(2.0, 1.0, 0.0), Vector3::new(2.3, 1.3, 4.0)), VoxelState::Occupied);
        inputs.publish_occupancy(volume);
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0));
        inputs.publish_goal(GoalRequest::new(3.0, 0.0, Some(1.0)));
        let summary = planner.run(&mut sink, 20).unwrap();

        assert_eq!(sink.costmaps.len(), summary.searches);
        assert!(sink.costmaps[0].iter().any(|c| c.distance == 0.0));
    }

    #[test]
    fn test_retain_bounded() {
        let states = vec![
            State3D::at_rest(Vector3::new(1.0, 2.0, 3.0)),
            State3D::at_rest(Vector3::new(1.0, 5000.0, 3.0)),
            State3D::at_rest(Vector3::new(f64::NAN, 0.0, 0.0)),
            State3D::new(Vector3::zeros(), Vector3::new(f64::INFINITY, 0.0, 0.0), Vector3::zeros()),
        ];
        let kept = retain_bounded(states, 1000.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].pos, Vector3::new(1.0, 2.0, 3.0));
    }
}
