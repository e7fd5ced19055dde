//! Double-integrator motion model
//!
//! Every edge of the search applies a constant acceleration for a fixed
//! duration. The final connection to the goal is a per-axis cubic that
//! matches position and velocity at both ends.

use itertools::iproduct;
use nalgebra::Vector3;

use crate::common::State3D;

/// Position and velocity after holding `input` for `tau` seconds
pub fn state_transit(pos: &Vector3<f64>, vel: &Vector3<f64>, input: &Vector3<f64>, tau: f64) -> (Vector3<f64>, Vector3<f64>) {
    let next_pos = pos + vel * tau + input * (0.5 * tau * tau);
    let next_vel = vel + input * tau;
    (next_pos, next_vel)
}

/// Uniform acceleration grid with `samples` values per axis in `[-max_acc, max_acc]`
pub fn input_set(max_acc: f64, samples: usize) -> Vec<Vector3<f64>> {
    let samples = samples.max(2);
    let step = 2.0 * max_acc / (samples - 1) as f64;
    let values: Vec<f64> = (0..samples).map(|i| -max_acc + step * i as f64).collect();
    iproduct!(values.iter(), values.iter(), values.iter())
        .map(|(&ax, &ay, &az)| Vector3::new(ax, ay, az))
        .collect()
}

/// Constant-acceleration segment starting from a known state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Primitive {
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    pub input: Vector3<f64>,
    pub duration: f64,
}

impl Primitive {
    pub fn new(pos: Vector3<f64>, vel: Vector3<f64>, input: Vector3<f64>, duration: f64) -> Self {
        Self { pos, vel, input, duration }
    }

    pub fn state_at(&self, t: f64) -> State3D {
        let (pos, vel) = state_transit(&self.pos, &self.vel, &self.input, t);
        State3D::new(pos, vel, self.input)
    }

    pub fn end_state(&self) -> State3D {
        self.state_at(self.duration)
    }

    /// Time spent with control effort `|u|^2` plus a time penalty
    pub fn cost(&self, w_time: f64) -> f64 {
        (self.input.norm_squared() + w_time) * self.duration
    }
}

/// Cubic polynomial per axis: `p(t) = a t^3 + b t^2 + v0 t + p0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicShot {
    a: Vector3<f64>,
    b: Vector3<f64>,
    v0: Vector3<f64>,
    p0: Vector3<f64>,
    duration: f64,
}

impl CubicShot {
    /// Connect `(p0, v0)` to `(p1, v1)` in exactly `duration` seconds
    pub fn new(p0: Vector3<f64>, v0: Vector3<f64>, p1: Vector3<f64>, v1: Vector3<f64>, duration: f64) -> Self {
        let t = duration;
        let dp = p1 - p0 - v0 * t;
        let dv = v1 - v0;
        let a = dv / (t * t) - dp * (2.0 / (t * t * t));
        let b = dp * (3.0 / (t * t)) - dv / t;
        Self { a, b, v0, p0, duration }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn state_at(&self, t: f64) -> State3D {
        let pos = self.a * t.powi(3) + self.b * t.powi(2) + self.v0 * t + self.p0;
        let vel = self.a * (3.0 * t * t) + self.b * (2.0 * t) + self.v0;
        let acc = self.a * (6.0 * t) + self.b * 2.0;
        State3D::new(pos, vel, acc)
    }

    /// Largest per-axis acceleration magnitude; acceleration is linear so the ends bound it
    pub fn max_acceleration(&self) -> f64 {
        let start = self.b * 2.0;
        let end = self.a * (6.0 * self.duration) + self.b * 2.0;
        start.amax().max(end.amax())
    }

    /// Largest per-axis velocity magnitude over `[0, duration]`
    pub fn max_velocity(&self) -> f64 {
        let mut best = self.v0.amax().max(self.state_at(self.duration).vel.amax());
        for i in 0..3 {
            // interior extremum where 6 a t + 2 b = 0
            if self.a[i].abs() > 1e-12 {
                let t = -self.b[i] / (3.0 * self.a[i]);
                if t > 0.0 && t < self.duration {
                    let v = 3.0 * self.a[i] * t * t + 2.0 * self.b[i] * t + self.v0[i];
                    best = best.max(v.abs());
                }
            }
        }
        best
    }
}

/// One timed piece of a reconstructed trajectory
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Piece {
    Primitive(Primitive),
    Shot(CubicShot),
}

impl Piece {
    pub fn duration(&self) -> f64 {
        match self {
            Piece::Primitive(p) => p.duration,
            Piece::Shot(s) => s.duration(),
        }
    }

    pub fn state_at(&self, t: f64) -> State3D {
        match self {
            Piece::Primitive(p) => p.state_at(t),
            Piece::Shot(s) => s.state_at(t),
        }
    }
}
