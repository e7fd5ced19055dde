//! Visualization utilities for kino_replanner
//!
//! Plots 2D projections of 3D planning results using gnuplot. Layers are
//! collected first and drawn onto a single axes when the plot is rendered.

use gnuplot::{AutoOption, AxesCommon, Caption, Color, Figure, LineWidth, PointSize, PointSymbol};
use nalgebra::Vector3;

use crate::common::{GlobalTrajectory, PlannerError, PlannerResult, Window};

/// Color palette for consistent styling
pub mod colors {
    pub const BLACK: &str = "#000000";
    pub const RED: &str = "#FF0000";
    pub const GREEN: &str = "#00FF00";
    pub const BLUE: &str = "#0000FF";
    pub const ORANGE: &str = "#FFA500";
    pub const GRAY: &str = "#808080";

    // Semantic colors
    pub const OBSTACLE: &str = BLACK;
    pub const START: &str = GREEN;
    pub const GOAL: &str = BLUE;
    pub const PATH: &str = RED;
    pub const SEGMENT_END: &str = ORANGE;
    pub const WINDOW: &str = GRAY;
}

/// Plane the 3D data is projected onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// x horizontal, y vertical
    TopDown,
    /// x horizontal, z vertical
    Side,
}

impl Projection {
    fn project(&self, p: &Vector3<f64>) -> (f64, f64) {
        match self {
            Projection::TopDown => (p.x, p.y),
            Projection::Side => (p.x, p.z),
        }
    }

    fn labels(&self) -> (&'static str, &'static str) {
        match self {
            Projection::TopDown => ("X [m]", "Y [m]"),
            Projection::Side => ("X [m]", "Z [m]"),
        }
    }
}

/// Style for path rendering
#[derive(Debug, Clone)]
pub struct PathStyle {
    pub color: String,
    pub line_width: f64,
    pub caption: String,
}

impl PathStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            line_width: 2.0,
            caption: caption.to_string(),
        }
    }

    pub fn with_line_width(mut self, width: f64) -> Self {
        self.line_width = width;
        self
    }
}

impl Default for PathStyle {
    fn default() -> Self {
        Self::new(colors::PATH, "Trajectory")
    }
}

/// Style for point rendering
#[derive(Debug, Clone)]
pub struct PointStyle {
    pub color: String,
    pub size: f64,
    pub symbol: char,
    pub caption: String,
}

impl PointStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            size: 1.0,
            symbol: 'O',
            caption: caption.to_string(),
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_symbol(mut self, symbol: char) -> Self {
        self.symbol = symbol;
        self
    }
}

#[derive(Debug, Clone)]
enum Layer {
    Line(Vec<Vector3<f64>>, PathStyle),
    Points(Vec<Vector3<f64>>, PointStyle),
}

/// Projected plot of trajectories, obstacles and windows
pub struct Visualizer {
    projection: Projection,
    title: String,
    layers: Vec<Layer>,
    x_range: Option<(f64, f64)>,
    y_range: Option<(f64, f64)>,
    aspect_ratio: Option<f64>,
}

impl Visualizer {
    pub fn new(projection: Projection) -> Self {
        Self {
            projection,
            title: String::new(),
            layers: Vec::new(),
            x_range: None,
            y_range: None,
            aspect_ratio: Some(1.0),
        }
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Set the plot title
    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.title = title.to_string();
        self
    }

    /// Set X axis range
    pub fn set_x_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.x_range = Some((min, max));
        self
    }

    /// Set Y axis range
    pub fn set_y_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.y_range = Some((min, max));
        self
    }

    /// Set aspect ratio (None for auto)
    pub fn set_aspect_ratio(&mut self, ratio: Option<f64>) -> &mut Self {
        self.aspect_ratio = ratio;
        self
    }

    /// Plot a polyline through `points`
    pub fn plot_path(&mut self, points: &[Vector3<f64>], style: &PathStyle) -> &mut Self {
        if !points.is_empty() {
            self.layers.push(Layer::Line(points.to_vec(), style.clone()));
        }
        self
    }

    /// Plot the global trajectory and mark where each segment ends
    pub fn plot_trajectory(&mut self, trajectory: &GlobalTrajectory) -> &mut Self {
        let points: Vec<Vector3<f64>> = trajectory.states().map(|s| s.pos).collect();
        self.plot_path(&points, &PathStyle::default());

        let ends: Vec<Vector3<f64>> = trajectory.segments().iter().filter_map(|s| s.last()).map(|s| s.pos).collect();
        self.plot_points(&ends, &PointStyle::new(colors::SEGMENT_END, "Segment ends").with_symbol('x'))
    }

    pub fn plot_obstacles(&mut self, obstacles: &[Vector3<f64>]) -> &mut Self {
        self.plot_points(
            obstacles,
            &PointStyle::new(colors::OBSTACLE, "Obstacles").with_symbol('S').with_size(0.5),
        )
    }

    /// Outline of a planning window in the current projection
    pub fn plot_window(&mut self, window: &Window) -> &mut Self {
        let (a, b) = (window.start, window.end);
        let corners = match self.projection {
            Projection::TopDown => [(a.x, a.y), (b.x, a.y), (b.x, b.y), (a.x, b.y), (a.x, a.y)],
            Projection::Side => [(a.x, a.z), (b.x, a.z), (b.x, b.z), (a.x, b.z), (a.x, a.z)],
        };
        let outline: Vec<Vector3<f64>> = corners
            .iter()
            .map(|&(u, v)| match self.projection {
                Projection::TopDown => Vector3::new(u, v, 0.0),
                Projection::Side => Vector3::new(u, 0.0, v),
            })
            .collect();
        self.plot_path(&outline, &PathStyle::new(colors::WINDOW, "Window").with_line_width(1.0))
    }

    pub fn plot_points(&mut self, points: &[Vector3<f64>], style: &PointStyle) -> &mut Self {
        if !points.is_empty() {
            self.layers.push(Layer::Points(points.to_vec(), style.clone()));
        }
        self
    }

    pub fn plot_start(&mut self, point: Vector3<f64>) -> &mut Self {
        self.plot_points(&[point], &PointStyle::new(colors::START, "Start").with_size(1.5))
    }

    pub fn plot_goal(&mut self, point: Vector3<f64>) -> &mut Self {
        self.plot_points(&[point], &PointStyle::new(colors::GOAL, "Goal").with_size(1.5))
    }

    /// Draw every layer onto a fresh figure
    pub fn render(&self) -> Figure {
        let mut figure = Figure::new();
        let axes = figure.axes2d();
        let (x_label, y_label) = self.projection.labels();

        if !self.title.is_empty() {
            axes.set_title(&self.title, &[]);
        }
        axes.set_x_label(x_label, &[]);
        axes.set_y_label(y_label, &[]);
        if let Some((min, max)) = self.x_range {
            axes.set_x_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some((min, max)) = self.y_range {
            axes.set_y_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some(ratio) = self.aspect_ratio {
            axes.set_aspect_ratio(AutoOption::Fix(ratio));
        }

        for layer in &self.layers {
            match layer {
                Layer::Line(points, style) => {
                    let (x, y) = self.split(points);
                    axes.lines(&x, &y, &[Caption(&style.caption), Color(&style.color), LineWidth(style.line_width)]);
                }
                Layer::Points(points, style) => {
                    let (x, y) = self.split(points);
                    axes.points(
                        &x,
                        &y,
                        &[Caption(&style.caption), Color(&style.color), PointSymbol(style.symbol), PointSize(style.size)],
                    );
                }
            }
        }
        figure
    }

    fn split(&self, points: &[Vector3<f64>]) -> (Vec<f64>, Vec<f64>) {
        points.iter().map(|p| self.projection.project(p)).unzip()
    }

    /// Render and show the plot
    pub fn show(&self) -> PlannerResult<()> {
        self.render().show().map(|_| ()).map_err(gnuplot_error)
    }

    /// Render and save the plot to a PNG file
    pub fn save_png(&self, path: &str, width: u32, height: u32) -> PlannerResult<()> {
        self.render().save_to_png(path, width, height).map_err(gnuplot_error)
    }
}

fn gnuplot_error<E: std::fmt::Display>(e: E) -> PlannerError {
    PlannerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
