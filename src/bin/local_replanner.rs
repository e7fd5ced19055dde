//! Local replanner demo
//!
//! Builds a synthetic pillar field, feeds it to the replanning loop together
//! with a simulated vehicle that jumps to the end of every published segment,
//! and plots the resulting trajectory.

use std::path::PathBuf;

use clap::Parser;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use kino_replanner::mapping::VoxelState;
use kino_replanner::mission_planning::{LoopPhase, RecordingSink, StepOutcome};
use kino_replanner::utils::{Projection, Visualizer};
use kino_replanner::{
    GoalRequest, OccupancyVolume, PlannerConfig, PlannerError, PlannerInputs, PlannerResult, Pose3D, ReplanningLoop,
    Window,
};

#[derive(Parser, Debug)]
#[command(name = "local_replanner", about = "Incremental kinodynamic replanning through a pillar field")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "16.0")]
    goal_x: f64,

    #[arg(long, default_value = "0.0")]
    goal_y: f64,

    /// Goal altitude; the configured default is used when omitted
    #[arg(long)]
    goal_z: Option<f64>,

    /// Number of random pillars
    #[arg(long, default_value = "25")]
    obstacles: usize,

    #[arg(long, default_value = "7")]
    seed: u64,

    #[arg(long, default_value = "200")]
    max_iterations: usize,

    /// Compass heading in degrees published before the goal
    #[arg(long)]
    heading: Option<f64>,

    /// Save top-down and side views as `<prefix>_top.png` and `<prefix>_side.png`
    #[arg(long)]
    save: Option<String>,

    /// Open interactive gnuplot windows
    #[arg(long)]
    show: bool,
}

fn pillar_field(bounds: &Window, resolution: f64, count: usize, keep_clear: &[Vector3<f64>], rng: &mut StdRng) -> PlannerResult<OccupancyVolume> {
    let mut volume = OccupancyVolume::free_space(bounds, resolution)?;
    let mut placed = 0;
    let mut attempts = 0;
    while placed < count && attempts < count * 20 {
        attempts += 1;
        let x = rng.gen_range(bounds.start.x + 2.0..bounds.end.x - 2.0);
        let y = rng.gen_range(bounds.start.y + 0.5..bounds.end.y - 0.5);
        let half = rng.gen_range(0.15..0.45);
        let center = Vector3::new(x, y, 0.0);
        if keep_clear.iter().any(|p| (Vector3::new(p.x, p.y, 0.0) - center).norm() < 1.0 + half) {
            continue;
        }
        volume.fill_box(
            &Window::new(Vector3::new(x - half, y - half, bounds.start.z), Vector3::new(x + half, y + half, bounds.end.z)),
            VoxelState::Occupied,
        );
        placed += 1;
    }
    info!("placed {} pillars, {} occupied voxels", placed, volume.occupied_count());
    Ok(volume)
}

fn main() -> PlannerResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kino_replanner=info,local_replanner=info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            info!("loading configuration from {:?}", path);
            PlannerConfig::from_file(path)?
        }
        None => PlannerConfig::default(),
    };

    let start = Pose3D::from_yaw(Vector3::new(0.0, 0.0, 1.0), 0.0);
    let goal = GoalRequest::new(args.goal_x, args.goal_y, args.goal_z);
    let goal_position = goal.position(config.replan.goal_altitude);

    let bounds = Window::new(
        Vector3::new(-2.0, -6.0, 0.0),
        Vector3::new(goal_position.x.max(start.position.x) + 4.0, 6.0, goal_position.z.max(4.0) + 1.0),
    );
    let mut rng = StdRng::seed_from_u64(args.seed);
    let volume = pillar_field(&bounds, config.search.resolution, args.obstacles, &[start.position, goal_position], &mut rng)?;
    let obstacles = volume.occupied_centers();

    let inputs = PlannerInputs::new();
    let mut replanner = ReplanningLoop::new(config, inputs.clone());
    let mut sink = RecordingSink::new();

    inputs.publish_occupancy(volume);
    inputs.publish_pose(start);
    if let Some(heading) = args.heading {
        inputs.publish_heading(heading);
    }
    inputs.publish_goal(goal);

    let mut finished = None;
    for iteration in 0..args.max_iterations {
        match replanner.step(&mut sink) {
            Ok(StepOutcome::SegmentAccepted { status, samples }) => {
                info!("iteration {}: {} with {} samples", iteration, status, samples);
                // the simulated vehicle tracks the segment to its end
                if let Some(pose) = sink.last_path().and_then(|p| p.poses.last()) {
                    inputs.publish_pose(*pose);
                }
            }
            Ok(StepOutcome::Retrying { attempts, status }) => warn!("iteration {}: {}, attempt {}", iteration, status, attempts),
            Ok(StepOutcome::Waiting) => {}
            Ok(StepOutcome::Finished(phase)) => {
                finished = Some(phase);
                break;
            }
            Err(e) if e.is_recoverable() => warn!("iteration {} deferred: {}", iteration, e),
            Err(e) => return Err(e),
        }
    }

    let trajectory = replanner.trajectory();
    match &finished {
        Some(phase) => info!(
            "finished in phase {}: {} segments, {} samples, {:.2} m",
            phase,
            trajectory.segments().len(),
            trajectory.len(),
            trajectory.path_length()
        ),
        None => warn!("stopped after {} iterations in phase {}", args.max_iterations, replanner.phase()),
    }

    if args.save.is_some() || args.show {
        let slice: Vec<Vector3<f64>> = obstacles.into_iter().filter(|p| (p.z - goal_position.z).abs() < 0.5).collect();
        for projection in [Projection::TopDown, Projection::Side] {
            let mut vis = Visualizer::new(projection);
            vis.set_title("Local kinodynamic replanning")
                .plot_obstacles(&slice)
                .plot_trajectory(trajectory)
                .plot_start(start.position)
                .plot_goal(goal_position);
            if let Some(window) = replanner.window() {
                vis.plot_window(window);
            }
            if projection == Projection::Side {
                vis.set_aspect_ratio(None);
            }
            if let Some(prefix) = &args.save {
                let suffix = if projection == Projection::TopDown { "top" } else { "side" };
                let path = format!("{}_{}.png", prefix, suffix);
                vis.save_png(&path, 1200, 600)?;
                info!("saved {}", path);
            }
            if args.show {
                vis.show()?;
            }
        }
    }

    match finished {
        Some(LoopPhase::GoalReached) => Ok(()),
        Some(phase) => Err(PlannerError::InvalidState(format!("episode ended in {}", phase))),
        None => Err(PlannerError::InvalidState("iteration limit reached".to_string())),
    }
}
