//! Outputs of the replanning loop

use nalgebra::UnitQuaternion;

use crate::common::{Pose3D, TrajectorySegment};
use crate::mapping::CostmapVoxel;

/// Poses of one accepted segment
#[derive(Debug, Clone, PartialEq)]
pub struct PathMessage {
    /// Index of the segment within the episode
    pub sequence: usize,
    /// Sample time step [s]
    pub dt: f64,
    pub poses: Vec<Pose3D>,
    /// Last segment of the episode
    pub is_final: bool,
}

impl PathMessage {
    /// Attach the episode's fixed orientation to every sample of `segment`
    pub fn from_segment(sequence: usize, segment: &TrajectorySegment, orientation: UnitQuaternion<f64>, is_final: bool) -> Self {
        let poses = segment.states().iter().map(|s| Pose3D::new(s.pos, orientation)).collect();
        Self { sequence, dt: segment.dt(), poses, is_final }
    }
}

/// Consumer of planner outputs
pub trait PathSink {
    fn publish_path(&mut self, path: &PathMessage);

    fn publish_costmap(&mut self, _cells: &[CostmapVoxel]) {}
}

/// Sink that keeps everything it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub paths: Vec<PathMessage>,
    pub costmaps: Vec<Vec<CostmapVoxel>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_path(&self) -> Option<&PathMessage> {
        self.paths.last()
    }

    pub fn pose_count(&self) -> usize {
        self.paths.iter().map(|p| p.poses.len()).sum()
    }
}

impl PathSink for RecordingSink {
    fn publish_path(&mut self, path: &PathMessage) {
        self.paths.push(path.clone());
    }

    fn publish_costmap(&mut self, cells: &[CostmapVoxel]) {
        self.costmaps.push(cells.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::State3D;
    use nalgebra::Vector3;

    #[test]
    fn test_path_message_uses_fixed_orientation() {
        let segment = TrajectorySegment::new(
            vec![State3D::at_rest(Vector3::zeros()), State3D::at_rest(Vector3::new(0.1, 0.0, 0.0))],
            0.08,
        );
        let orientation = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.7);
        let msg = PathMessage::from_segment(3, &segment, orientation, false);
        assert_eq!(msg.poses.len(), 2);
        assert!(msg.poses.iter().all(|p| p.orientation == orientation));
        assert_eq!(msg.poses[1].position, Vector3::new(0.1, 0.0, 0.0));

        let mut sink = RecordingSink::new();
        sink.publish_path(&msg);
        sink.publish_costmap(&[]);
        assert_eq!(sink.pose_count(), 2);
        assert_eq!(sink.costmaps.len(), 1);
        assert_eq!(sink.last_path().unwrap().sequence, 3);
    }
}
