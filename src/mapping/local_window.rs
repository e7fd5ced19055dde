//! Local planning window
//!
//! Keeps a fixed-size box ahead of the vehicle. The box is only moved when the
//! tracked position drifts into its outer margin, so consecutive iterations
//! share one window instead of re-centering on every tick.

use nalgebra::Vector3;
use tracing::debug;

use crate::common::{Window, WindowConfig};

/// Tracks the current window and decides when it must be rebuilt
#[derive(Debug, Clone)]
pub struct WindowManager {
    extent: Vector3<f64>,
    back_offset: f64,
    stale_margin: f64,
    clamp_to_map: bool,
    travel_direction: Vector3<f64>,
    map_bounds: Option<Window>,
    current: Option<Window>,
}

impl WindowManager {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            extent: config.extent_vector(),
            back_offset: config.back_offset,
            stale_margin: config.stale_margin,
            clamp_to_map: config.clamp_to_map,
            travel_direction: Vector3::x(),
            map_bounds: None,
            current: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&WindowConfig::default())
    }

    /// Direction the window leans towards; zero or non-finite input is ignored
    pub fn set_travel_direction(&mut self, direction: Vector3<f64>) {
        let norm = direction.norm();
        if norm.is_finite() && norm > 1e-9 {
            self.travel_direction = direction / norm;
        }
    }

    pub fn travel_direction(&self) -> Vector3<f64> {
        self.travel_direction
    }

    /// Bounds of the mapped region used to clamp new windows
    pub fn set_map_bounds(&mut self, bounds: Option<Window>) {
        self.map_bounds = bounds;
    }

    pub fn current(&self) -> Option<&Window> {
        self.current.as_ref()
    }

    /// Forget the current window so the next check reports it stale
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// True when no window exists yet or `position` left the safe interior
    pub fn needs_update(&self, position: &Vector3<f64>) -> bool {
        match &self.current {
            None => true,
            Some(window) => {
                let margin = Vector3::repeat(self.stale_margin);
                !window.contains_with_margin(position, &margin)
            }
        }
    }

    /// Compute and record a new window for `position`.
    ///
    /// The position sits `back_offset` inside the rear face along the travel
    /// direction, which leaves the rest of the extent for forward range.
    pub fn compute_window(&mut self, position: &Vector3<f64>) -> Window {
        let half = self.extent * 0.5;
        let lean = (half - Vector3::repeat(self.back_offset)).component_mul(&self.travel_direction);
        let center = position + lean;
        let mut window = Window::new(center - half, center + half);

        if self.clamp_to_map {
            if let Some(bounds) = &self.map_bounds {
                window = window.intersection(bounds).unwrap_or(window);
            }
        }
        // never clamp the position itself out of the window
        let margin = Vector3::repeat(self.stale_margin);
        window = window
            .expanded_to_include(&(position - margin))
            .expanded_to_include(&(position + margin));

        debug!("window recomputed around ({:.2}, {:.2}, {:.2}): {}", position.x, position.y, position.z, window);
        self.current = Some(window);
        window
    }

    /// Compute a window for the vehicle at `position` that also keeps the
    /// planning `frontier` inside its safe interior.
    pub fn compute_window_covering(&mut self, position: &Vector3<f64>, frontier: &Vector3<f64>) -> Window {
        let window = self.compute_window(position);
        let margin = Vector3::repeat(self.stale_margin);
        if window.contains_with_margin(frontier, &margin) {
            return window;
        }
        let covering = window
            .expanded_to_include(&(frontier - margin))
            .expanded_to_include(&(frontier + margin));
        debug!("window grown to cover frontier ({:.2}, {:.2}, {:.2}): {}", frontier.x, frontier.y, frontier.z, covering);
        self.current = Some(covering);
        covering
    }
}
