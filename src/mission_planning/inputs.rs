//! Ingestion of asynchronous planner inputs
//!
//! Producers on other threads replace the latest occupancy volume, pose,
//! goal and heading through a cloneable [`PlannerInputs`] handle. The
//! planning loop takes one [`InputSnapshot`] at the top of each iteration,
//! so nothing it reads can change while a search runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;
use parking_lot::Mutex;
use tracing::debug;

use crate::common::{PlannerResult, Pose3D};
use crate::mapping::{OccupancySnapshot, OccupancyVolume};

/// Goal request; `z` falls back to the configured goal altitude
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalRequest {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl GoalRequest {
    pub fn new(x: f64, y: f64, z: Option<f64>) -> Self {
        Self { x, y, z }
    }

    pub fn position(&self, default_altitude: f64) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z.unwrap_or(default_altitude))
    }
}

/// Value tagged with a monotonically increasing version
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

#[derive(Debug, Default)]
struct LatestInputs {
    volume: Option<Versioned<Arc<OccupancyVolume>>>,
    pose: Option<Pose3D>,
    goal: Option<Versioned<GoalRequest>>,
    heading: Option<f64>,
    restart_requested: bool,
    next_version: u64,
}

impl LatestInputs {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

/// Consistent view of the inputs for one iteration
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    pub volume: Option<Versioned<Arc<OccupancyVolume>>>,
    pub pose: Option<Pose3D>,
    pub goal: Option<Versioned<GoalRequest>>,
    /// Compass heading in degrees
    pub heading: Option<f64>,
    /// Set once per request; taking the snapshot clears it
    pub restart_requested: bool,
}

/// Shared handle used by producers and the planning loop
#[derive(Debug, Clone, Default)]
pub struct PlannerInputs {
    latest: Arc<Mutex<LatestInputs>>,
    shutdown: Arc<AtomicBool>,
}

impl PlannerInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the occupancy volume wholesale
    pub fn publish_occupancy(&self, volume: OccupancyVolume) {
        let mut latest = self.latest.lock();
        let version = latest.bump();
        debug!("occupancy volume v{} with {} occupied voxels", version, volume.occupied_count());
        latest.volume = Some(Versioned { value: Arc::new(volume), version });
    }

    /// Decode an external snapshot and publish it
    pub fn publish_snapshot(&self, snapshot: &OccupancySnapshot) -> PlannerResult<()> {
        let volume = OccupancyVolume::from_snapshot(snapshot)?;
        self.publish_occupancy(volume);
        Ok(())
    }

    pub fn publish_pose(&self, pose: Pose3D) {
        self.latest.lock().pose = Some(pose);
    }

    /// Start a new episode towards `goal`
    pub fn publish_goal(&self, goal: GoalRequest) {
        let mut latest = self.latest.lock();
        let version = latest.bump();
        latest.goal = Some(Versioned { value: goal, version });
    }

    /// Compass heading in degrees
    pub fn publish_heading(&self, heading: f64) {
        self.latest.lock().heading = Some(heading);
    }

    /// Ask the loop to seed its next search with an initial guess
    pub fn request_restart(&self) {
        self.latest.lock().restart_requested = true;
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Take a consistent copy of the latest inputs
    pub fn snapshot(&self) -> InputSnapshot {
        let mut latest = self.latest.lock();
        let restart_requested = std::mem::take(&mut latest.restart_requested);
        InputSnapshot {
            volume: latest.volume.clone(),
            pose: latest.pose,
            goal: latest.goal.clone(),
            heading: latest.heading,
            restart_requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Window;
    use crate::mapping::VoxelState;
    use std::thread;

    #[test]
    fn test_goal_altitude_default() {
        let goal = GoalRequest::new(4.0, -2.0, None);
        assert_eq!(goal.position(3.0), Vector3::new(4.0, -2.0, 3.0));
        let goal = GoalRequest::new(4.0, -2.0, Some(1.5));
        assert_eq!(goal.position(3.0), Vector3::new(4.0, -2.0, 1.5));
    }

    #[test]
    fn test_latest_value_semantics() {
        let inputs = PlannerInputs::new();
        assert!(inputs.snapshot().volume.is_none());

        inputs.publish_goal(GoalRequest::new(1.0, 0.0, None));
        inputs.publish_goal(GoalRequest::new(2.0, 0.0, None));
        inputs.publish_pose(Pose3D::from_yaw(Vector3::zeros(), 0.0));
        inputs.publish_pose(Pose3D::from_yaw(Vector3::new(1.0, 0.0, 0.0), 0.0));

        let snap = inputs.snapshot();
        let goal = snap.goal.unwrap();
        assert_eq!(goal.value.x, 2.0);
        assert_eq!(goal.version, 2);
        assert_eq!(snap.pose.unwrap().position.x, 1.0);
    }

    #[test]
    fn test_restart_is_consumed_once() {
        let inputs = PlannerInputs::new();
        inputs.request_restart();
        assert!(inputs.snapshot().restart_requested);
        assert!(!inputs.snapshot().restart_requested);
    }

    #[test]
    fn test_publish_from_other_thread() {
        let inputs = PlannerInputs::new();
        let producer = inputs.clone();
        let handle = thread::spawn(move || {
            let bounds = Window::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0));
            let mut volume = OccupancyVolume::free_space(&bounds, 0.1).unwrap();
            volume.set_state(&Vector3::new(0.5, 0.5, 0.5), VoxelState::Occupied);
            producer.publish_occupancy(volume);
            producer.request_shutdown();
        });
        handle.join().unwrap();

        let snap = inputs.snapshot();
        assert_eq!(snap.volume.unwrap().value.occupied_count(), 1);
        assert!(inputs.is_shutdown());
    }

    #[test]
    fn test_bad_snapshot_rejected() {
        let inputs = PlannerInputs::new();
        let snapshot = OccupancySnapshot { origin: [0.0; 3], resolution: 0.1, dims: [2, 2, 2], cells: vec![0; 3] };
        assert!(inputs.publish_snapshot(&snapshot).is_err());
        assert!(inputs.snapshot().volume.is_none());
    }
}
