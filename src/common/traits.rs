//! Common traits defining the seams between the planner components

use nalgebra::Vector3;

use crate::common::types::{State3D, Window};

/// Read-only distance-to-obstacle queries over a bounded window
pub trait DistanceQuery {
    /// Euclidean distance to the nearest obstacle.
    ///
    /// Points outside [`DistanceQuery::window`] report `0.0`.
    fn distance_at(&self, point: &Vector3<f64>) -> f64;

    /// Region over which the distances are valid
    fn window(&self) -> &Window;

    fn is_occupied(&self, point: &Vector3<f64>) -> bool {
        self.distance_at(point) <= 0.0
    }
}

/// Representation a trajectory source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryKind {
    /// Raw samples of the kinodynamic motion primitives
    RawKinodynamicSamples,
    /// Higher-order curve fitted through the raw path
    SmoothedCurve,
}

/// Anything that can hand the replanning loop a sampled trajectory
pub trait TrajectorySource {
    fn kind(&self) -> TrajectoryKind;

    /// Sample the most recent result at a fixed time step
    fn sample(&self, dt: f64) -> Vec<State3D>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WallAtX {
        window: Window,
        wall_x: f64,
    }

    impl DistanceQuery for WallAtX {
        fn distance_at(&self, point: &Vector3<f64>) -> f64 {
            if !self.window.contains(point) {
                return 0.0;
            }
            (self.wall_x - point.x).max(0.0)
        }

        fn window(&self) -> &Window {
            &self.window
        }
    }

    #[test]
    fn test_default_is_occupied() {
        let field = WallAtX {
            window: Window::new(Vector3::zeros(), Vector3::new(10.0, 1.0, 1.0)),
            wall_x: 5.0,
        };
        assert!(!field.is_occupied(&Vector3::new(1.0, 0.5, 0.5)));
        assert!(field.is_occupied(&Vector3::new(6.0, 0.5, 0.5)));
        assert!(field.is_occupied(&Vector3::new(-1.0, 0.5, 0.5)));
    }
}
