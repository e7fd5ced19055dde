//! Obstacle-free boundary-value cost used as the search heuristic
//!
//! For a double integrator moving from `(p0, v0)` to `(p1, v1)` in time `T`,
//! the minimum of `integral(|u|^2) + w T` is
//!
//! ```text
//! J(T) = 12 |dp|^2 / T^3 - 12 dp.(v0 + v1) / T^2 + 4 (|v0|^2 + v0.v1 + |v1|^2) / T + w T
//! ```
//!
//! with `dp = p1 - p0`. Minimizing over every `T > 0` gives a lower bound on
//! the cost of any primitive chain between the two states.

use nalgebra::Vector3;

/// Estimated cost-to-go and the duration that achieves it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicEstimate {
    pub cost: f64,
    pub optimal_time: f64,
}

/// Boundary-value cost for a fixed duration
pub fn boundary_cost(p0: &Vector3<f64>, v0: &Vector3<f64>, p1: &Vector3<f64>, v1: &Vector3<f64>, duration: f64, w_time: f64) -> f64 {
    let t = duration;
    let dp = p1 - p0;
    12.0 * dp.norm_squared() / t.powi(3) - 12.0 * dp.dot(&(v0 + v1)) / t.powi(2)
        + 4.0 * (v0.norm_squared() + v0.dot(v1) + v1.norm_squared()) / t
        + w_time * t
}

/// Minimum of [`boundary_cost`] over all positive durations
pub fn estimate_heuristic(p0: &Vector3<f64>, v0: &Vector3<f64>, p1: &Vector3<f64>, v1: &Vector3<f64>, w_time: f64) -> HeuristicEstimate {
    let dp = p1 - p0;
    // dJ/dT * T^4 = w T^4 + c3 T^2 + c2 T + c1
    let c1 = -36.0 * dp.norm_squared();
    let c2 = 24.0 * (v0 + v1).dot(&dp);
    let c3 = -4.0 * (v0.norm_squared() + v0.dot(v1) + v1.norm_squared());

    let mut best = HeuristicEstimate { cost: f64::INFINITY, optimal_time: 0.0 };
    for t in depressed_quartic_roots(c3 / w_time, c2 / w_time, c1 / w_time) {
        if t <= 1e-9 {
            continue;
        }
        let cost = boundary_cost(p0, v0, p1, v1, t, w_time);
        if cost < best.cost {
            best = HeuristicEstimate { cost, optimal_time: t };
        }
    }

    if best.cost.is_finite() {
        best.cost = best.cost.max(0.0);
        best
    } else {
        HeuristicEstimate { cost: 0.0, optimal_time: 0.0 }
    }
}

/// Real roots of `x^4 + p x^2 + q x + r = 0` (Ferrari)
pub fn depressed_quartic_roots(p: f64, q: f64, r: f64) -> Vec<f64> {
    let mut roots = Vec::with_capacity(4);

    if q.abs() < 1e-12 {
        // biquadratic in y = x^2
        let disc = p * p - 4.0 * r;
        if disc < 0.0 {
            return roots;
        }
        let sq = disc.sqrt();
        for y in [(-p + sq) * 0.5, (-p - sq) * 0.5] {
            if y >= 0.0 {
                let x = y.sqrt();
                roots.push(x);
                roots.push(-x);
            }
        }
        return roots;
    }

    let m = resolvent_root(p, q, r);
    let s = (2.0 * m - p).max(0.0).sqrt();
    if s < 1e-12 {
        return roots;
    }
    let k = q / (2.0 * s);
    for (b, c) in [(-s, m + k), (s, m - k)] {
        let disc = b * b - 4.0 * c;
        if disc >= 0.0 {
            let sq = disc.sqrt();
            roots.push((-b + sq) * 0.5);
            roots.push((-b - sq) * 0.5);
        }
    }
    roots
}

/// Root of `8 m^3 - 4 p m^2 - 8 r m + 4 p r - q^2` with `2 m > p`
fn resolvent_root(p: f64, q: f64, r: f64) -> f64 {
    let f = |m: f64| 8.0 * m.powi(3) - 4.0 * p * m * m - 8.0 * r * m + 4.0 * p * r - q * q;

    let lo_start = 0.5 * p;
    let mut lo = lo_start;
    let mut width = 1.0;
    let mut hi = lo + width;
    for _ in 0..200 {
        if f(hi) > 0.0 {
            break;
        }
        lo = hi;
        width *= 2.0;
        hi = lo_start + width;
    }

    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if f(mid) > 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
        if hi - lo <= 1e-15 * hi.abs().max(1.0) {
            break;
        }
    }
    0.5 * (lo + hi)
}
