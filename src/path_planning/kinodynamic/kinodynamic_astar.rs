//! Kinodynamic A* over a windowed distance field
//!
//! Nodes carry position and velocity. Edges are constant-acceleration
//! primitives, the edge cost is `(|u|^2 + w_time) * tau`, and the heuristic is
//! the obstacle-free boundary-value cost from [`super::heuristic`]. Close to the
//! goal the search tries an analytic cubic "shot"; a primitive that leaves the
//! window through a face the goal lies beyond becomes a boundary node, and
//! expanding one ends the search with [`PlannerStatus::InProgress`].
//!
//! Reference: Zhou, B., Gao, F., et al. (2019).
//! "Robust and Efficient Quadrotor Trajectory Generation for Fast Autonomous Flight"

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};

use super::heuristic::estimate_heuristic;
use super::motion_model::{input_set, CubicShot, Piece, Primitive};
use crate::common::{
    is_finite_vector, DistanceQuery, PlannerStatus, SearchConfig, State3D, TrajectoryKind,
    TrajectorySource, Window,
};

/// Factors applied to the heuristic's optimal duration when a shot violates a limit
const SHOT_TIME_STRETCH: [f64; 5] = [1.0, 1.25, 1.5, 2.0, 3.0];

/// Everything one search invocation needs besides the distance field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRequest {
    pub start_pos: Vector3<f64>,
    pub start_vel: Vector3<f64>,
    pub start_acc: Vector3<f64>,
    pub goal_pos: Vector3<f64>,
    pub goal_vel: Vector3<f64>,
    /// Seed the first expansion with the current acceleration and a straight-line push
    pub use_initial_guess: bool,
    /// Key the closed set by arrival time as well as position
    pub dynamic_search: bool,
    /// Wall-clock limit; zero falls back to the configured budget
    pub time_budget: Duration,
}

impl SearchRequest {
    pub fn new(start: State3D, goal_pos: Vector3<f64>, goal_vel: Vector3<f64>) -> Self {
        Self {
            start_pos: start.pos,
            start_vel: start.vel,
            start_acc: start.acc,
            goal_pos,
            goal_vel,
            use_initial_guess: false,
            dynamic_search: false,
            time_budget: Duration::ZERO,
        }
    }

    pub fn with_initial_guess(mut self, enabled: bool) -> Self {
        self.use_initial_guess = enabled;
        self
    }

    pub fn with_dynamic_search(mut self, enabled: bool) -> Self {
        self.dynamic_search = enabled;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    fn is_finite(&self) -> bool {
        [self.start_pos, self.start_vel, self.start_acc, self.goal_pos, self.goal_vel]
            .iter()
            .all(is_finite_vector)
    }
}

/// Lifecycle of one search invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    Searching,
    Reached,
    InProgress,
    NoPathFound,
}

type VoxelKey = (i64, i64, i64, i64);

#[derive(Debug, Clone, Copy)]
struct PathNode {
    pos: Vector3<f64>,
    vel: Vector3<f64>,
    /// Primitive that led here from the parent
    input: Vector3<f64>,
    duration: f64,
    g: f64,
    time: f64,
    key: VoxelKey,
    boundary: bool,
    parent_index: Option<usize>,
}

/// Open-set entry: lowest f first, then lower h, then lower g, then insertion order
#[derive(Debug)]
struct QueueEntry {
    f: OrderedFloat<f64>,
    h: OrderedFloat<f64>,
    g: OrderedFloat<f64>,
    seq: usize,
    index: usize,
}

impl Eq for QueueEntry {}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior
        (other.f, other.h, other.g, other.seq).cmp(&(self.f, self.h, self.g, self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum SweepResult {
    Clear,
    /// Left the window towards the goal; holds the last in-window sample time
    Exited(f64),
    Blocked,
}

/// Kinodynamic A* planner
pub struct KinodynamicAstar {
    config: SearchConfig,
    inputs: Vec<Vector3<f64>>,
    window: Option<Window>,
    origin: Vector3<f64>,
    phase: SearchPhase,
    nodes: Vec<PathNode>,
    open_set: BinaryHeap<QueueEntry>,
    open_index: HashMap<VoxelKey, usize>,
    closed_set: HashSet<VoxelKey>,
    seq: usize,
    terminal: Option<usize>,
    shot: Option<CubicShot>,
    goal: Option<(Vector3<f64>, Vector3<f64>)>,
    dynamic: bool,
}

impl KinodynamicAstar {
    pub fn new(config: SearchConfig) -> Self {
        let inputs = input_set(config.max_acc, config.acc_samples);
        Self {
            config,
            inputs,
            window: None,
            origin: Vector3::zeros(),
            phase: SearchPhase::Idle,
            nodes: Vec::new(),
            open_set: BinaryHeap::new(),
            open_index: HashMap::new(),
            closed_set: HashSet::new(),
            seq: 0,
            terminal: None,
            shot: None,
            goal: None,
            dynamic: false,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SearchConfig::default())
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    /// Bind the planner to a window; `current_position` anchors the voxel grid
    pub fn init(&mut self, window: Window, current_position: Vector3<f64>) {
        self.window = Some(window);
        self.origin = current_position;
    }

    /// Discard all search state and return to `Idle`
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.open_set.clear();
        self.open_index.clear();
        self.closed_set.clear();
        self.seq = 0;
        self.terminal = None;
        self.shot = None;
        self.goal = None;
        self.dynamic = false;
        self.phase = SearchPhase::Idle;
    }

    /// Number of nodes created by the last search
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn search(&mut self, field: &dyn DistanceQuery, request: &SearchRequest) -> PlannerStatus {
        if self.phase != SearchPhase::Idle {
            warn!("search called in phase {:?}; reset first", self.phase);
            return PlannerStatus::Invalid;
        }
        let window = match self.window {
            Some(window) => window,
            None => {
                warn!("search called before init");
                return PlannerStatus::Invalid;
            }
        };
        if !request.is_finite() {
            warn!("search rejected non-finite request");
            return PlannerStatus::Invalid;
        }
        if !window.contains(&request.start_pos) {
            warn!(
                "start ({:.2}, {:.2}, {:.2}) outside window {}",
                request.start_pos.x, request.start_pos.y, request.start_pos.z, window
            );
            return PlannerStatus::Invalid;
        }

        self.phase = SearchPhase::Searching;
        self.goal = Some((request.goal_pos, request.goal_vel));
        self.dynamic = request.dynamic_search;
        let status = self.run(field, &window, request);
        self.phase = match status {
            PlannerStatus::Reached => SearchPhase::Reached,
            PlannerStatus::InProgress => SearchPhase::InProgress,
            _ => SearchPhase::NoPathFound,
        };
        status
    }

    fn run(&mut self, field: &dyn DistanceQuery, window: &Window, request: &SearchRequest) -> PlannerStatus {
        let budget = if request.time_budget.is_zero() { self.config.time_budget() } else { request.time_budget };
        let started = Instant::now();
        let goal = request.goal_pos;
        let goal_vel = request.goal_vel;
        let start_distance = (request.start_pos - goal).norm();

        let start = PathNode {
            pos: request.start_pos,
            vel: request.start_vel,
            input: request.start_acc,
            duration: 0.0,
            g: 0.0,
            time: 0.0,
            key: self.voxel_key(&request.start_pos, 0.0),
            boundary: false,
            parent_index: None,
        };
        let h = self.heuristic(&start.pos, &start.vel, &goal, &goal_vel);
        self.push_node(start, h);

        let mut init_search = request.use_initial_guess;
        let mut expanded = 0usize;

        while let Some(entry) = self.open_set.pop() {
            if started.elapsed() > budget {
                warn!("kinodynamic search timed out after {} expansions", expanded);
                return PlannerStatus::NoPathFound;
            }

            let index = entry.index;
            let current = self.nodes[index];
            if !current.boundary {
                if self.open_index.get(&current.key) != Some(&index) || self.closed_set.contains(&current.key) {
                    continue;
                }
                self.open_index.remove(&current.key);
                self.closed_set.insert(current.key);
            }
            expanded += 1;

            if current.boundary {
                info!("window boundary reached after {} expansions, g = {:.2}", expanded, current.g);
                self.terminal = Some(index);
                return PlannerStatus::InProgress;
            }

            let offset = current.pos - goal;
            if offset.amax() <= self.config.shot_radius {
                if let Some(shot) = self.compute_shot(field, window, &current, &goal, &goal_vel) {
                    info!("goal connected after {} expansions, g = {:.2}", expanded, current.g);
                    self.terminal = Some(index);
                    self.shot = Some(shot);
                    return PlannerStatus::Reached;
                }
            }
            if offset.norm() <= self.config.goal_tolerance
                && (current.vel - goal_vel).norm() <= self.config.velocity_tolerance
            {
                info!("goal reached after {} expansions, g = {:.2}", expanded, current.g);
                self.terminal = Some(index);
                return PlannerStatus::Reached;
            }

            let candidates = self.primitives_for(&current, &goal, request.start_acc, init_search);
            init_search = false;

            for (input, tau) in candidates {
                let prim = Primitive::new(current.pos, current.vel, input, tau);
                let end = prim.end_state();
                if end.vel.amax() > self.config.max_vel + 1e-9 {
                    continue;
                }
                let time = current.time + tau;
                let key = self.voxel_key(&end.pos, time);
                if key == current.key || self.closed_set.contains(&key) {
                    continue;
                }

                match self.sweep(field, window, &prim, &goal) {
                    SweepResult::Blocked => continue,
                    SweepResult::Exited(t_last) => {
                        let cut = Primitive::new(current.pos, current.vel, input, t_last);
                        let edge = cut.end_state();
                        if (edge.pos - goal).norm() >= start_distance {
                            continue;
                        }
                        let node = PathNode {
                            pos: edge.pos,
                            vel: edge.vel,
                            input,
                            duration: t_last,
                            g: current.g + cut.cost(self.config.w_time),
                            time: current.time + t_last,
                            key,
                            boundary: true,
                            parent_index: Some(index),
                        };
                        let h = self.heuristic(&node.pos, &node.vel, &goal, &goal_vel);
                        self.push_node(node, h);
                    }
                    SweepResult::Clear => {
                        let g = current.g + prim.cost(self.config.w_time);
                        if let Some(&existing) = self.open_index.get(&key) {
                            if g >= self.nodes[existing].g {
                                continue;
                            }
                        }
                        let node = PathNode {
                            pos: end.pos,
                            vel: end.vel,
                            input,
                            duration: tau,
                            g,
                            time,
                            key,
                            boundary: false,
                            parent_index: Some(index),
                        };
                        let h = self.heuristic(&node.pos, &node.vel, &goal, &goal_vel);
                        let new_index = self.push_node(node, h);
                        self.open_index.insert(key, new_index);
                    }
                }

                if self.nodes.len() >= self.config.max_nodes {
                    warn!("node pool exhausted ({} nodes)", self.nodes.len());
                    return PlannerStatus::NoPathFound;
                }
            }
        }

        debug!("open set exhausted after {} expansions", expanded);
        PlannerStatus::NoPathFound
    }

    fn push_node(&mut self, node: PathNode, h: f64) -> usize {
        let index = self.nodes.len();
        let f = node.g + self.config.lambda_heu * h;
        self.open_set.push(QueueEntry {
            f: OrderedFloat(f),
            h: OrderedFloat(h),
            g: OrderedFloat(node.g),
            seq: self.seq,
            index,
        });
        self.seq += 1;
        if !node.boundary && node.parent_index.is_none() {
            self.open_index.insert(node.key, index);
        }
        self.nodes.push(node);
        index
    }

    fn heuristic(&self, pos: &Vector3<f64>, vel: &Vector3<f64>, goal: &Vector3<f64>, goal_vel: &Vector3<f64>) -> f64 {
        estimate_heuristic(pos, vel, goal, goal_vel, self.config.w_time).cost
    }

    fn primitives_for(
        &self,
        node: &PathNode,
        goal: &Vector3<f64>,
        start_acc: Vector3<f64>,
        init_search: bool,
    ) -> Vec<(Vector3<f64>, f64)> {
        let mut candidates = Vec::with_capacity(self.inputs.len() + 2);
        if init_search {
            let limit = self.config.max_acc;
            candidates.push((start_acc.map(|a| a.clamp(-limit, limit)), self.config.init_max_tau));
            let toward = goal - node.pos;
            if toward.norm() > 1e-9 {
                candidates.push((toward.normalize() * limit, self.config.init_max_tau));
            }
        }
        candidates.extend(self.inputs.iter().map(|u| (*u, self.config.max_tau)));
        candidates
    }

    /// Sample a primitive at no more than `resolution` spacing
    fn sweep(&self, field: &dyn DistanceQuery, window: &Window, prim: &Primitive, goal: &Vector3<f64>) -> SweepResult {
        let reach = (prim.vel.norm() + prim.input.norm() * prim.duration) * prim.duration;
        let steps = ((reach / self.config.resolution).ceil() as usize).max(1);
        let mut last_inside = None;
        for k in 1..=steps {
            let t = prim.duration * k as f64 / steps as f64;
            let p = prim.state_at(t).pos;
            if !window.contains(&p) {
                return match last_inside {
                    Some(t_last) if exits_toward_goal(window, &p, goal) => SweepResult::Exited(t_last),
                    _ => SweepResult::Blocked,
                };
            }
            if self.is_blocked(field, &p) {
                return SweepResult::Blocked;
            }
            last_inside = Some(t);
        }
        SweepResult::Clear
    }

    fn is_blocked(&self, field: &dyn DistanceQuery, p: &Vector3<f64>) -> bool {
        field.is_occupied(p) || field.distance_at(p) <= self.config.clearance
    }

    fn compute_shot(
        &self,
        field: &dyn DistanceQuery,
        window: &Window,
        node: &PathNode,
        goal: &Vector3<f64>,
        goal_vel: &Vector3<f64>,
    ) -> Option<CubicShot> {
        if !window.contains(goal) {
            return None;
        }
        let estimate = estimate_heuristic(&node.pos, &node.vel, goal, goal_vel, self.config.w_time);
        let base = estimate.optimal_time.max(self.config.max_tau * 0.5);

        'stretch: for factor in SHOT_TIME_STRETCH {
            let shot = CubicShot::new(node.pos, node.vel, *goal, *goal_vel, base * factor);
            if shot.max_velocity() > self.config.max_vel + 1e-9 || shot.max_acceleration() > self.config.max_acc + 1e-9 {
                continue;
            }
            let reach = shot.max_velocity() * shot.duration();
            let steps = ((reach / self.config.resolution).ceil() as usize).max(1);
            for k in 1..=steps {
                let p = shot.state_at(shot.duration() * k as f64 / steps as f64).pos;
                if !window.contains(&p) || self.is_blocked(field, &p) {
                    continue 'stretch;
                }
            }
            return Some(shot);
        }
        None
    }

    fn voxel_key(&self, pos: &Vector3<f64>, time: f64) -> VoxelKey {
        let idx = (pos - self.origin) / self.config.resolution;
        let t = if self.dynamic { (time / self.config.time_resolution).floor() as i64 } else { 0 };
        (idx.x.floor() as i64, idx.y.floor() as i64, idx.z.floor() as i64, t)
    }

    /// Pieces from the start to the terminal node, then the shot if any
    fn pieces(&self) -> Vec<Piece> {
        let mut pieces = Vec::new();
        let mut current = self.terminal;
        while let Some(index) = current {
            let node = &self.nodes[index];
            if let Some(parent) = node.parent_index {
                let from = &self.nodes[parent];
                pieces.push(Piece::Primitive(Primitive::new(from.pos, from.vel, node.input, node.duration)));
            }
            current = node.parent_index;
        }
        pieces.reverse();
        if let Some(shot) = self.shot {
            pieces.push(Piece::Shot(shot));
        }
        pieces
    }

    /// Sample the last result at a fixed time step.
    ///
    /// The sequence starts with the start state and ends with the terminal
    /// state (the goal itself after a successful shot). Empty unless the last
    /// search returned `Reached` or `InProgress`.
    pub fn get_trajectory(&self, dt: f64) -> Vec<State3D> {
        if !matches!(self.phase, SearchPhase::Reached | SearchPhase::InProgress) || dt <= 0.0 {
            return Vec::new();
        }
        let Some(start) = self.nodes.first() else {
            return Vec::new();
        };
        let pieces = self.pieces();
        let total: f64 = pieces.iter().map(Piece::duration).sum();

        let mut states = Vec::new();
        let mut piece_index = 0;
        let mut piece_start = 0.0;
        let mut k = 0usize;
        loop {
            let t = k as f64 * dt;
            if t >= total - 1e-9 {
                break;
            }
            while piece_index + 1 < pieces.len() && t >= piece_start + pieces[piece_index].duration() {
                piece_start += pieces[piece_index].duration();
                piece_index += 1;
            }
            states.push(pieces[piece_index].state_at(t - piece_start));
            k += 1;
        }

        let terminal = match pieces.last() {
            Some(Piece::Shot(shot)) => {
                let mut end = shot.state_at(shot.duration());
                if let Some((goal, goal_vel)) = self.goal {
                    end.pos = goal;
                    end.vel = goal_vel;
                }
                end
            }
            Some(piece) => piece.state_at(piece.duration()),
            None => State3D::new(start.pos, start.vel, start.input),
        };
        states.push(terminal);
        states
    }
}

impl TrajectorySource for KinodynamicAstar {
    fn kind(&self) -> TrajectoryKind {
        TrajectoryKind::RawKinodynamicSamples
    }

    fn sample(&self, dt: f64) -> Vec<State3D> {
        self.get_trajectory(dt)
    }
}

/// Whether `p` left `window` only through faces the goal lies beyond
fn exits_toward_goal(window: &Window, p: &Vector3<f64>, goal: &Vector3<f64>) -> bool {
    (0..3).all(|i| {
        if p[i] < window.start[i] {
            goal[i] < window.start[i]
        } else if p[i] > window.end[i] {
            goal[i] > window.end[i]
        } else {
            true
        }
    })
}
