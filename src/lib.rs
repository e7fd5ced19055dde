//! kino_replanner - incremental local-window kinodynamic trajectory planning
//!
//! This crate plans collision-free, dynamically feasible trajectories for a
//! vehicle that only sees a bounded region around itself. Each iteration
//! builds a distance field over the current window, runs a kinodynamic A*
//! search from the end of the trajectory so far and appends the result.

// Core modules
pub mod common;
pub mod utils;

// Algorithm modules
pub mod mapping;
pub mod path_planning;
pub mod mission_planning;

// Re-export common types for convenience
pub use common::{GlobalTrajectory, PlannerStatus, Pose3D, State3D, TrajectorySegment, Window};
pub use common::{DistanceQuery, TrajectoryKind, TrajectorySource};
pub use common::{PlannerConfig, PlannerError, PlannerResult};
pub use mapping::{DistanceField, DistanceFieldSnapshot, OccupancyVolume, WindowManager};
pub use path_planning::kinodynamic::{KinodynamicAstar, SearchRequest};
pub use mission_planning::{GoalRequest, PathSink, PlannerInputs, ReplanningLoop};
