//! Occupancy volume
//!
//! Dense voxel grid holding the latest occupancy snapshot. A volume is never
//! merged incrementally: each snapshot replaces the previous volume wholesale.

use itertools::iproduct;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::common::{PlannerError, PlannerResult, Window};

/// Snapshot cell values at or above this are occupied
pub const OCCUPIED_THRESHOLD: i8 = 50;

/// Number of voxels of size `resolution` needed to cover `length`.
///
/// Quotients within 1e-6 of an integer are not rounded up.
pub fn cells_along(length: f64, resolution: f64) -> usize {
    ((length / resolution - 1e-6).ceil().max(1.0)) as usize
}

/// Occupancy of one voxel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VoxelState {
    Unknown,
    Free,
    Occupied,
}

impl VoxelState {
    /// Decode a snapshot cell: negative = unknown, `>= OCCUPIED_THRESHOLD` = occupied
    pub fn from_cell(value: i8) -> Self {
        if value < 0 {
            VoxelState::Unknown
        } else if value >= OCCUPIED_THRESHOLD {
            VoxelState::Occupied
        } else {
            VoxelState::Free
        }
    }
}

/// External occupancy snapshot format.
///
/// Cells are laid out x-fastest, then y, then z.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    pub origin: [f64; 3],
    pub resolution: f64,
    pub dims: [usize; 3],
    pub cells: Vec<i8>,
}

/// Axis-aligned voxel grid
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyVolume {
    origin: Vector3<f64>,
    resolution: f64,
    dims: [usize; 3],
    cells: Vec<VoxelState>,
}

impl OccupancyVolume {
    /// Create a volume with every voxel set to `state`
    pub fn filled(origin: Vector3<f64>, dims: [usize; 3], resolution: f64, state: VoxelState) -> PlannerResult<Self> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(PlannerError::InvalidParameter(format!("resolution must be positive, got {}", resolution)));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(PlannerError::InvalidParameter(format!("volume dimensions must be non-zero, got {:?}", dims)));
        }
        let count = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .ok_or_else(|| PlannerError::ResourceExhausted(format!("volume {:?} overflows", dims)))?;
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(count)
            .map_err(|e| PlannerError::ResourceExhausted(format!("occupancy volume of {} voxels: {}", count, e)))?;
        cells.resize(count, state);
        Ok(Self { origin, resolution, dims, cells })
    }

    /// Create a volume of unobserved voxels
    pub fn new(origin: Vector3<f64>, dims: [usize; 3], resolution: f64) -> PlannerResult<Self> {
        Self::filled(origin, dims, resolution, VoxelState::Unknown)
    }

    /// Observed, obstacle-free volume covering `bounds`
    pub fn free_space(bounds: &Window, resolution: f64) -> PlannerResult<Self> {
        let dims = Self::dims_for(bounds, resolution)?;
        Self::filled(bounds.start, dims, resolution, VoxelState::Free)
    }

    /// Free volume covering `bounds` with the voxels containing `points` occupied
    pub fn from_points(points: &[Vector3<f64>], bounds: &Window, resolution: f64) -> PlannerResult<Self> {
        let mut volume = Self::free_space(bounds, resolution)?;
        for p in points {
            volume.set_state(p, VoxelState::Occupied);
        }
        Ok(volume)
    }

    /// Decode an external snapshot into a volume
    pub fn from_snapshot(snapshot: &OccupancySnapshot) -> PlannerResult<Self> {
        let mut volume = Self::new(Vector3::from(snapshot.origin), snapshot.dims, snapshot.resolution)
            .map_err(|e| PlannerError::Snapshot(e.to_string()))?;
        if snapshot.cells.len() != volume.cells.len() {
            return Err(PlannerError::Snapshot(format!(
                "expected {} cells for dims {:?}, got {}",
                volume.cells.len(),
                snapshot.dims,
                snapshot.cells.len()
            )));
        }
        for (cell, &value) in volume.cells.iter_mut().zip(snapshot.cells.iter()) {
            *cell = VoxelState::from_cell(value);
        }
        Ok(volume)
    }

    /// Decode a JSON-encoded [`OccupancySnapshot`]
    pub fn from_json(json: &str) -> PlannerResult<Self> {
        let snapshot: OccupancySnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(&snapshot)
    }

    /// Encode back into the external snapshot format
    pub fn to_snapshot(&self) -> OccupancySnapshot {
        let cells = self
            .cells
            .iter()
            .map(|c| match c {
                VoxelState::Unknown => -1,
                VoxelState::Free => 0,
                VoxelState::Occupied => 100,
            })
            .collect();
        OccupancySnapshot {
            origin: [self.origin.x, self.origin.y, self.origin.z],
            resolution: self.resolution,
            dims: self.dims,
            cells,
        }
    }

    fn dims_for(bounds: &Window, resolution: f64) -> PlannerResult<[usize; 3]> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(PlannerError::InvalidParameter(format!("resolution must be positive, got {}", resolution)));
        }
        let size = bounds.size();
        Ok([
            cells_along(size.x, resolution),
            cells_along(size.y, resolution),
            cells_along(size.z, resolution),
        ])
    }

    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Minimum and maximum corners of the mapped region
    pub fn bounds(&self) -> Window {
        let extent = Vector3::new(
            self.dims[0] as f64 * self.resolution,
            self.dims[1] as f64 * self.resolution,
            self.dims[2] as f64 * self.resolution,
        );
        Window::new(self.origin, self.origin + extent)
    }

    fn linear_index(&self, idx: [usize; 3]) -> usize {
        idx[0] + self.dims[0] * (idx[1] + self.dims[1] * idx[2])
    }

    /// Voxel containing `p`, `None` outside the mapped region
    pub fn voxel_index(&self, p: &Vector3<f64>) -> Option<[usize; 3]> {
        let mut idx = [0usize; 3];
        for i in 0..3 {
            let f = ((p[i] - self.origin[i]) / self.resolution).floor();
            if !f.is_finite() || f < 0.0 || f >= self.dims[i] as f64 {
                return None;
            }
            idx[i] = f as usize;
        }
        Some(idx)
    }

    pub fn voxel_center(&self, idx: [usize; 3]) -> Vector3<f64> {
        Vector3::new(
            self.origin.x + (idx[0] as f64 + 0.5) * self.resolution,
            self.origin.y + (idx[1] as f64 + 0.5) * self.resolution,
            self.origin.z + (idx[2] as f64 + 0.5) * self.resolution,
        )
    }

    /// Occupancy at `p`; everything outside the mapped region is unknown
    pub fn state_at(&self, p: &Vector3<f64>) -> VoxelState {
        match self.voxel_index(p) {
            Some(idx) => self.cells[self.linear_index(idx)],
            None => VoxelState::Unknown,
        }
    }

    /// Set the voxel containing `p`; returns false when `p` is outside the volume
    pub fn set_state(&mut self, p: &Vector3<f64>, state: VoxelState) -> bool {
        match self.voxel_index(p) {
            Some(idx) => {
                let i = self.linear_index(idx);
                self.cells[i] = state;
                true
            }
            None => false,
        }
    }

    /// Set every voxel whose center lies inside `region`
    pub fn fill_box(&mut self, region: &Window, state: VoxelState) {
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for i in 0..3 {
            let first = ((region.start[i] - self.origin[i]) / self.resolution - 0.5).ceil().max(0.0);
            let last = ((region.end[i] - self.origin[i]) / self.resolution - 0.5).floor() + 1.0;
            let last = last.min(self.dims[i] as f64);
            if !(first.is_finite() && last.is_finite()) || last <= first {
                return;
            }
            lo[i] = first as usize;
            hi[i] = last as usize;
        }
        for (z, y, x) in iproduct!(lo[2]..hi[2], lo[1]..hi[1], lo[0]..hi[0]) {
            let idx = [x, y, z];
            if region.contains(&self.voxel_center(idx)) {
                let i = self.linear_index(idx);
                self.cells[i] = state;
            }
        }
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c == VoxelState::Occupied).count()
    }

    /// Centers of all occupied voxels
    pub fn occupied_centers(&self) -> Vec<Vector3<f64>> {
        let [nx, ny, nz] = self.dims;
        iproduct!(0..nz, 0..ny, 0..nx)
            .map(|(z, y, x)| [x, y, z])
            .filter(|&idx| self.cells[self.linear_index(idx)] == VoxelState::Occupied)
            .map(|idx| self.voxel_center(idx))
            .collect()
    }
}
