//! Utility modules for kino_replanner

pub mod visualization;

pub use visualization::{colors, PathStyle, PointStyle, Projection, Visualizer};
