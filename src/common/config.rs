//! Configuration loading for the local replanner
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Vectors are written as `[x, y, z]` arrays.

use std::path::Path;
use std::time::Duration;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::common::error::{PlannerError, PlannerResult};

/// Top-level planner configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub window: WindowConfig,
    pub map: MapConfig,
    pub search: SearchConfig,
    pub replan: ReplanConfig,
    pub visualization: VisualizationConfig,
}

/// Local window sizing and staleness
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window size along x, y, z
    pub extent: [f64; 3],
    /// Distance kept between the vehicle and the rear face along the travel direction
    pub back_offset: f64,
    /// The window is stale once the position is closer than this to any face
    pub stale_margin: f64,
    /// Clamp window corners to the occupancy volume bounds
    pub clamp_to_map: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            extent: [8.0, 6.0, 6.0],
            back_offset: 1.0,
            stale_margin: 0.5,
            clamp_to_map: true,
        }
    }
}

impl WindowConfig {
    pub fn extent_vector(&self) -> Vector3<f64> {
        Vector3::from(self.extent)
    }
}

/// Distance field construction
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MapConfig {
    /// Treat unobserved voxels as free space
    pub unknown_is_free: bool,
    /// Distances are clamped to this value [m]
    pub max_distance: f64,
    /// Upper bound on voxels in one distance field
    pub max_cells: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            unknown_is_free: true,
            max_distance: 5.0,
            max_cells: 20_000_000,
        }
    }
}

/// Kinodynamic search parameters
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Position discretization of the closed set [m]
    pub resolution: f64,
    /// Time discretization used by dynamic search [s]
    pub time_resolution: f64,
    /// Duration of a regular motion primitive [s]
    pub max_tau: f64,
    /// Duration of the seeded primitives of an initial-guess search [s]
    pub init_max_tau: f64,
    /// Per-axis velocity limit [m/s]
    pub max_vel: f64,
    /// Per-axis acceleration limit [m/s^2]
    pub max_acc: f64,
    /// Acceleration samples per axis (odd values include zero)
    pub acc_samples: usize,
    /// Weight of elapsed time against control effort
    pub w_time: f64,
    /// Heuristic inflation; 1.0 keeps the search optimal
    pub lambda_heu: f64,
    /// Node pool size
    pub max_nodes: usize,
    /// Samples closer than this to an obstacle are rejected [m]
    pub clearance: f64,
    /// Euclidean position tolerance for reaching the goal [m]
    pub goal_tolerance: f64,
    /// Euclidean velocity tolerance for reaching the goal [m/s]
    pub velocity_tolerance: f64,
    /// Per-axis distance from the goal at which one-shot connections are tried [m]
    pub shot_radius: f64,
    /// Default wall-clock budget of one search [ms]
    pub time_budget_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            resolution: 0.1,
            time_resolution: 0.8,
            max_tau: 0.6,
            init_max_tau: 0.8,
            max_vel: 2.0,
            max_acc: 2.0,
            acc_samples: 5,
            w_time: 10.0,
            lambda_heu: 5.0,
            max_nodes: 100_000,
            clearance: 0.0,
            goal_tolerance: 0.1,
            velocity_tolerance: 0.5,
            shot_radius: 1.0,
            time_budget_ms: 500,
        }
    }
}

impl SearchConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

/// Bound on consecutive failed searches in one iteration
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// `None` retries forever; an external watchdog must then bound the episode.
    /// Written as `0` in TOML.
    #[serde(with = "retry_limit")]
    pub max_retries: Option<u32>,
}

/// TOML has no null, so an unbounded retry limit is spelled `0`
mod retry_limit {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(value.unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        let limit = u32::deserialize(deserializer)?;
        Ok((limit > 0).then_some(limit))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: Some(5) }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn allows(&self, failures: u32) -> bool {
        self.max_retries.map_or(true, |max| failures <= max)
    }
}

/// Replanning loop behaviour
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplanConfig {
    /// Sample time step of emitted trajectories [s]
    pub delta_t: f64,
    /// The first start state is placed this far ahead of the vehicle [m]
    pub start_offset: f64,
    /// Goal altitude used when the goal request carries no z [m]
    pub goal_altitude: f64,
    /// Samples with any coordinate magnitude at or above this are dropped
    pub position_bound: f64,
    /// Acceleration of the first start state
    pub initial_acceleration: [f64; 3],
    /// Hardware mode: orientation follows the compass heading captured at episode start
    pub compensate_heading: bool,
    pub retry: RetryPolicy,
    /// Abort after this many window-limited segments without reaching the goal
    pub max_segments: Option<usize>,
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            delta_t: 0.08,
            start_offset: 0.5,
            goal_altitude: 3.0,
            position_bound: 1000.0,
            initial_acceleration: [1.0, 1.0, 1.0],
            compensate_heading: false,
            retry: RetryPolicy::default(),
            max_segments: None,
        }
    }
}

/// Costmap feed
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub publish_costmap: bool,
    /// Only voxels closer than this to an obstacle are exported [m]
    pub costmap_max_distance: f64,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            publish_costmap: true,
            costmap_max_distance: 1.0,
        }
    }
}

impl PlannerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> PlannerResult<Self> {
        let config: PlannerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PlannerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> PlannerResult<()> {
        fn positive(name: &str, value: f64) -> PlannerResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(PlannerError::InvalidParameter(format!("{} must be positive, got {}", name, value)))
            }
        }

        for (axis, &e) in self.window.extent.iter().enumerate() {
            positive(&format!("window.extent[{}]", axis), e)?;
            if self.window.back_offset * 2.0 >= e {
                return Err(PlannerError::InvalidParameter(format!(
                    "window.back_offset {} must be below half of extent[{}] = {}",
                    self.window.back_offset, axis, e
                )));
            }
        }
        if self.window.stale_margin < 0.0 || self.window.stale_margin >= self.window.back_offset {
            return Err(PlannerError::InvalidParameter(
                "window.stale_margin must be in [0, back_offset)".to_string(),
            ));
        }

        positive("map.max_distance", self.map.max_distance)?;
        if self.map.max_cells == 0 {
            return Err(PlannerError::InvalidParameter("map.max_cells must be non-zero".to_string()));
        }

        let s = &self.search;
        positive("search.resolution", s.resolution)?;
        positive("search.time_resolution", s.time_resolution)?;
        positive("search.max_tau", s.max_tau)?;
        positive("search.init_max_tau", s.init_max_tau)?;
        positive("search.max_vel", s.max_vel)?;
        positive("search.max_acc", s.max_acc)?;
        positive("search.w_time", s.w_time)?;
        positive("search.goal_tolerance", s.goal_tolerance)?;
        positive("search.velocity_tolerance", s.velocity_tolerance)?;
        if s.lambda_heu < 1.0 {
            return Err(PlannerError::InvalidParameter("search.lambda_heu must be at least 1.0".to_string()));
        }
        if s.acc_samples < 2 {
            return Err(PlannerError::InvalidParameter("search.acc_samples must be at least 2".to_string()));
        }
        if s.max_nodes == 0 {
            return Err(PlannerError::InvalidParameter("search.max_nodes must be non-zero".to_string()));
        }

        positive("replan.delta_t", self.replan.delta_t)?;
        positive("replan.position_bound", self.replan.position_bound)?;
        if self.replan.start_offset < 0.0 {
            return Err(PlannerError::InvalidParameter("replan.start_offset must be non-negative".to_string()));
        }

        Ok(())
    }
}
