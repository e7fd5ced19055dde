//! Windowed Euclidean distance field
//!
//! Computes exact Euclidean distances from every voxel of the current window
//! to the nearest occupied voxel. The 3D transform is separable: one
//! Felzenszwalb & Huttenlocher lower-envelope pass along each axis.
//!
//! Reference: Felzenszwalb & Huttenlocher, "Distance Transforms of Sampled
//! Functions", Theory of Computing (2012).

use itertools::iproduct;
use nalgebra::Vector3;
use tracing::debug;

use crate::common::{DistanceQuery, MapConfig, PlannerError, PlannerResult, Window};
use crate::mapping::occupancy_volume::{cells_along, OccupancyVolume, VoxelState};

/// Squared distance standing in for "no obstacle in range". Finite so the
/// envelope intersections never evaluate `inf - inf`.
const FAR: f64 = 1e20;

/// Voxel exported on the costmap visualization feed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostmapVoxel {
    pub center: Vector3<f64>,
    pub distance: f64,
}

/// 1D squared distance transform of `f` into `d`.
///
/// `v` must hold at least `f.len()` entries and `z` at least `f.len() + 1`.
fn dt_1d(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }

    let intersect = |q: usize, p: usize| -> f64 {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    let mut k = 0usize;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;

    for q in 1..n {
        let mut s = intersect(q, v[k]);
        while s <= z[k] {
            // z[0] is -inf, so k never underflows
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate().take(n) {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let diff = q as f64 - v[k] as f64;
        *out = diff * diff + f[v[k]];
    }
}

fn try_buffer<T: Clone>(len: usize, value: T) -> PlannerResult<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| PlannerError::ResourceExhausted(format!("distance field buffer of {} entries: {}", len, e)))?;
    buf.resize(len, value);
    Ok(buf)
}

/// Builder for [`DistanceFieldSnapshot`]s
#[derive(Debug, Clone)]
pub struct DistanceField {
    max_distance: f64,
    max_cells: usize,
}

impl DistanceField {
    pub fn new(max_distance: f64, max_cells: usize) -> Self {
        Self { max_distance, max_cells }
    }

    pub fn from_config(config: &MapConfig) -> Self {
        Self::new(config.max_distance, config.max_cells)
    }

    /// Compute the distance field of `volume` over `window`.
    ///
    /// Voxels outside the volume are unknown. Unknown voxels are free when
    /// `unknown_is_free` is set and obstacles otherwise.
    pub fn build(
        &self,
        volume: Option<&OccupancyVolume>,
        window: &Window,
        unknown_is_free: bool,
    ) -> PlannerResult<DistanceFieldSnapshot> {
        let volume = volume.ok_or(PlannerError::MapNotReady)?;
        let resolution = volume.resolution();
        let size = window.size();
        if !(0..3).all(|i| size[i].is_finite() && size[i] > 0.0) {
            return Err(PlannerError::InvalidParameter(format!("degenerate window {}", window)));
        }

        let dims = [
            cells_along(size.x, resolution),
            cells_along(size.y, resolution),
            cells_along(size.z, resolution),
        ];
        let cells = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .filter(|&n| n <= self.max_cells)
            .ok_or_else(|| {
                PlannerError::ResourceExhausted(format!(
                    "window {} needs {:?} voxels, limit is {}",
                    window, dims, self.max_cells
                ))
            })?;

        let mut data = try_buffer(cells, FAR)?;
        let mut occupied = 0usize;
        for (z, y, x) in iproduct!(0..dims[2], 0..dims[1], 0..dims[0]) {
            let center = window.start
                + Vector3::new(
                    (x as f64 + 0.5) * resolution,
                    (y as f64 + 0.5) * resolution,
                    (z as f64 + 0.5) * resolution,
                );
            let blocked = match volume.state_at(&center) {
                VoxelState::Occupied => true,
                VoxelState::Unknown => !unknown_is_free,
                VoxelState::Free => false,
            };
            if blocked {
                data[x + dims[0] * (y + dims[1] * z)] = 0.0;
                occupied += 1;
            }
        }

        let longest = dims.iter().copied().max().unwrap_or(1);
        let mut line = try_buffer(longest, 0.0)?;
        let mut out = try_buffer(longest, 0.0)?;
        let mut v = try_buffer(longest, 0usize)?;
        let mut z = try_buffer(longest + 1, 0.0)?;

        let strides = [1, dims[0], dims[0] * dims[1]];
        for axis in 0..3 {
            let (a, b) = match axis {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let n = dims[axis];
            for (i, j) in iproduct!(0..dims[a], 0..dims[b]) {
                let base = i * strides[a] + j * strides[b];
                for k in 0..n {
                    line[k] = data[base + k * strides[axis]];
                }
                dt_1d(&line[..n], &mut out[..n], &mut v, &mut z);
                for k in 0..n {
                    data[base + k * strides[axis]] = out[k];
                }
            }
        }

        let max_distance = self.max_distance;
        for value in data.iter_mut() {
            *value = (value.sqrt() * resolution).min(max_distance);
        }

        debug!(
            "distance field over {} built: {:?} voxels, {} blocked",
            window, dims, occupied
        );

        Ok(DistanceFieldSnapshot {
            window: *window,
            resolution,
            dims,
            distances: data,
            max_distance,
        })
    }
}

/// Read-only distance grid valid for one planning iteration
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceFieldSnapshot {
    window: Window,
    resolution: f64,
    dims: [usize; 3],
    distances: Vec<f64>,
    max_distance: f64,
}

impl DistanceFieldSnapshot {
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    fn cell_index(&self, p: &Vector3<f64>) -> Option<usize> {
        if !self.window.contains(p) {
            return None;
        }
        let mut idx = [0usize; 3];
        for i in 0..3 {
            let f = ((p[i] - self.window.start[i]) / self.resolution).floor();
            idx[i] = (f.max(0.0) as usize).min(self.dims[i] - 1);
        }
        Some(idx[0] + self.dims[0] * (idx[1] + self.dims[1] * idx[2]))
    }

    fn cell_center(&self, x: usize, y: usize, z: usize) -> Vector3<f64> {
        self.window.start
            + Vector3::new(
                (x as f64 + 0.5) * self.resolution,
                (y as f64 + 0.5) * self.resolution,
                (z as f64 + 0.5) * self.resolution,
            )
    }

    /// Voxels closer than `max_distance` to an obstacle, obstacles included
    pub fn costmap_cells(&self, max_distance: f64) -> Vec<CostmapVoxel> {
        let [nx, ny, nz] = self.dims;
        iproduct!(0..nz, 0..ny, 0..nx)
            .filter_map(|(z, y, x)| {
                let distance = self.distances[x + nx * (y + ny * z)];
                (distance < max_distance).then(|| CostmapVoxel {
                    center: self.cell_center(x, y, z),
                    distance,
                })
            })
            .collect()
    }

    pub fn occupied_count(&self) -> usize {
        self.distances.iter().filter(|&&d| d <= 0.0).count()
    }
}

impl DistanceQuery for DistanceFieldSnapshot {
    fn distance_at(&self, point: &Vector3<f64>) -> f64 {
        self.cell_index(point).map_or(0.0, |i| self.distances[i])
    }

    fn window(&self) -> &Window {
        &self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bounds() -> Window {
        Window::new(Vector3::zeros(), Vector3::new(4.0, 4.0, 4.0))
    }

    fn field() -> DistanceField {
        DistanceField::new(5.0, 1_000_000)
    }

    #[test]
    fn test_dt_1d_single_obstacle() {
        let f = [FAR, FAR, 0.0, FAR, FAR];
        let mut d = [0.0; 5];
        let mut v = [0usize; 5];
        let mut z = [0.0; 6];
        dt_1d(&f, &mut d, &mut v, &mut z);
        assert_eq!(d, [4.0, 1.0, 0.0, 1.0, 4.0]);
    }

    #[test]
    fn test_map_not_ready() {
        let result = field().build(None, &bounds(), true);
        assert!(matches!(result, Err(PlannerError::MapNotReady)));
    }

    #[test]
    fn test_single_obstacle_distances() {
        let volume = OccupancyVolume::from_points(&[Vector3::new(2.05, 2.05, 2.05)], &bounds(), 0.1).unwrap();
        let snapshot = field().build(Some(&volume), &bounds(), true).unwrap();

        assert_eq!(snapshot.dims(), [40, 40, 40]);
        assert!(snapshot.is_occupied(&Vector3::new(2.05, 2.05, 2.05)));
        assert_relative_eq!(snapshot.distance_at(&Vector3::new(2.55, 2.05, 2.05)), 0.5, epsilon = 1e-9);
        assert_relative_eq!(
            snapshot.distance_at(&Vector3::new(2.35, 2.45, 2.05)),
            (0.3f64.powi(2) + 0.4f64.powi(2)).sqrt(),
            epsilon = 1e-9
        );
        assert_eq!(snapshot.occupied_count(), 1);
    }

    #[test]
    fn test_distances_clamped_and_outside_is_zero() {
        let volume = OccupancyVolume::free_space(&bounds(), 0.2).unwrap();
        let snapshot = DistanceField::new(1.5, 1_000_000)
            .build(Some(&volume), &bounds(), true)
            .unwrap();
        assert_relative_eq!(snapshot.distance_at(&Vector3::new(1.0, 1.0, 1.0)), 1.5);
        assert_eq!(snapshot.distance_at(&Vector3::new(-1.0, 1.0, 1.0)), 0.0);
        assert!(snapshot.is_occupied(&Vector3::new(5.0, 1.0, 1.0)));
    }

    #[test]
    fn test_unknown_policy() {
        // volume covers only the lower half of the window
        let half = Window::new(Vector3::zeros(), Vector3::new(4.0, 4.0, 2.0));
        let volume = OccupancyVolume::free_space(&half, 0.2).unwrap();

        let optimistic = field().build(Some(&volume), &bounds(), true).unwrap();
        assert!(!optimistic.is_occupied(&Vector3::new(2.0, 2.0, 3.0)));

        let conservative = field().build(Some(&volume), &bounds(), false).unwrap();
        assert!(conservative.is_occupied(&Vector3::new(2.0, 2.0, 3.0)));
        assert_relative_eq!(conservative.distance_at(&Vector3::new(2.1, 2.1, 1.7)), 0.4, epsilon = 1e-9);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let points: Vec<Vector3<f64>> = (0..20)
            .map(|i| Vector3::new(0.2 * i as f64, 1.0 + 0.1 * i as f64, 2.0))
            .collect();
        let volume = OccupancyVolume::from_points(&points, &bounds(), 0.1).unwrap();
        let window = Window::new(Vector3::new(0.5, 0.5, 0.5), Vector3::new(3.5, 3.5, 3.5));

        let a = field().build(Some(&volume), &window, true).unwrap();
        let b = field().build(Some(&volume), &window, true).unwrap();
        for (x, y, z) in iproduct!(0..7, 0..7, 0..7) {
            let p = Vector3::new(0.5 + 0.45 * x as f64, 0.5 + 0.45 * y as f64, 0.5 + 0.45 * z as f64);
            assert_eq!(a.distance_at(&p), b.distance_at(&p));
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_oversized_window_is_resource_exhausted() {
        let volume = OccupancyVolume::free_space(&bounds(), 0.1).unwrap();
        let result = DistanceField::new(5.0, 100).build(Some(&volume), &bounds(), true);
        assert!(matches!(result, Err(PlannerError::ResourceExhausted(_))));
    }

    #[test]
    fn test_costmap_cells() {
        let volume = OccupancyVolume::from_points(&[Vector3::new(2.1, 2.1, 2.1)], &bounds(), 0.2).unwrap();
        let snapshot = field().build(Some(&volume), &bounds(), true).unwrap();
        let cells = snapshot.costmap_cells(0.25);
        // the obstacle plus its six face neighbours
        assert_eq!(cells.len(), 7);
        assert!(cells.iter().any(|c| c.distance == 0.0));
    }
}
