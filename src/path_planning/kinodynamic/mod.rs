//! Kinodynamic Search Module
//!
//! Searches position/velocity space with constant-acceleration motion
//! primitives and returns time-sampled trajectories inside the current
//! planning window.
//!
//! # Components
//!
//! - `motion_model`: double-integrator transitions, input grid and cubic shots
//! - `heuristic`: obstacle-free boundary-value cost
//! - `kinodynamic_astar`: the search itself
//!
//! # Example
//!
//! ```no_run
//! use kino_replanner::common::{State3D, Window};
//! use kino_replanner::mapping::{DistanceField, OccupancyVolume};
//! use kino_replanner::path_planning::kinodynamic::{KinodynamicAstar, SearchRequest};
//! use nalgebra::Vector3;
//!
//! let window = Window::new(Vector3::new(-1.0, -3.0, -2.0), Vector3::new(7.0, 3.0, 4.0));
//! let volume = OccupancyVolume::free_space(&window, 0.1).unwrap();
//! let field = DistanceField::new(5.0, 20_000_000).build(Some(&volume), &window, true).unwrap();
//!
//! let start = State3D::at_rest(Vector3::new(0.0, 0.0, 1.0));
//! let mut planner = KinodynamicAstar::with_defaults();
//! planner.init(window, start.pos);
//! let request = SearchRequest::new(start, Vector3::new(2.0, 0.0, 1.0), Vector3::zeros());
//! let status = planner.search(&field, &request);
//! let samples = planner.get_trajectory(0.08);
//! ```
//!
//! # References
//!
//! - Zhou, B., et al. "Robust and Efficient Quadrotor Trajectory Generation for Fast Autonomous Flight"
//! - Mueller, M., et al. "A Computationally Efficient Motion Primitive for Quadrocopter Trajectory Generation"

pub mod motion_model;
pub mod heuristic;
pub mod kinodynamic_astar;

// Re-exports
pub use motion_model::{input_set, state_transit, CubicShot, Piece, Primitive};
pub use heuristic::{boundary_cost, estimate_heuristic, HeuristicEstimate};
pub use kinodynamic_astar::{KinodynamicAstar, SearchPhase, SearchRequest};
