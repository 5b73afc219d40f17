use crate::EvalError;
use rad_plan_data::Structure;
use rad_plan_world::{Grid3, interp};
use serde::{Deserialize, Serialize};

/// Upper bound on `max_dose / bin_width`; the bin width adapts so the
/// histogram never exceeds this resolution.
pub const MAX_BINS: usize = 2048;

/// Cumulative dose-volume histogram of one structure.
///
/// `edges[i]` is the dose at the start of bin `i` (uniform spacing, starting
/// at 0); `cumulative[i]` is the fraction of the structure volume receiving
/// at least `edges[i]`. By construction `cumulative[0] = 1`, the curve is
/// non-increasing, and the final bin lies beyond the maximum dose so it ends
/// at 0.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dvh {
    edges: Vec<f64>,
    cumulative: Vec<f64>,
    voxels: usize,
    voxel_volume_mm3: f64,
    d_mean: f64,
}

/// Builds the cumulative DVH of `structure` over `dose`.
///
/// # Errors
///
/// Fails when the mask geometry disagrees with the dose grid, the mask is
/// empty, or the dose contains non-finite values.
pub fn dvh(structure: &Structure, dose: &Grid3<f32>) -> Result<Dvh, EvalError> {
    if structure.mask.dims() != dose.dims() {
        return Err(EvalError::GeometryMismatch {
            name: structure.name.clone(),
            expected: *dose.dims(),
            got: *structure.mask.dims(),
        });
    }
    let indices = structure.voxel_indices();
    if indices.is_empty() {
        return Err(EvalError::EmptyStructure(structure.name.clone()));
    }
    let data = dose.data();
    let mut max_dose = 0.0f64;
    let mut sum = 0.0f64;
    for &i in &indices {
        let d = data[i] as f64;
        if !d.is_finite() {
            return Err(EvalError::NonFiniteDose);
        }
        max_dose = max_dose.max(d);
        sum += d;
    }

    let bin_width = if max_dose > 0.0 {
        max_dose / MAX_BINS as f64
    } else {
        1.0
    };
    let n_bins = (max_dose / bin_width).floor() as usize + 2;
    let mut histogram = vec![0usize; n_bins];
    for &i in &indices {
        let bin = ((data[i] as f64 / bin_width) as usize).min(n_bins - 1);
        histogram[bin] += 1;
    }

    // Cumulative-from-high: fraction of voxels receiving at least edge[i].
    let n = indices.len();
    let mut cumulative = vec![0.0f64; n_bins];
    let mut above = 0usize;
    for i in (0..n_bins).rev() {
        above += histogram[i];
        cumulative[i] = above as f64 / n as f64;
    }
    let edges = (0..n_bins).map(|i| i as f64 * bin_width).collect();

    Ok(Dvh {
        edges,
        cumulative,
        voxels: n,
        voxel_volume_mm3: structure.mask.voxel_volume_mm3(),
        d_mean: sum / n as f64,
    })
}

impl Dvh {
    /// Dose-axis bin edges in Gy.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Cumulative volume fraction per bin edge.
    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }

    pub fn voxels(&self) -> usize {
        self.voxels
    }

    pub fn d_mean(&self) -> f64 {
        self.d_mean
    }

    /// Largest dose still received by (practically) the whole volume.
    pub fn d_min(&self) -> f64 {
        let threshold = 1.0 - 0.5 / self.voxels as f64;
        self.largest_edge_with_cumulative_at_least(threshold)
    }

    /// Largest dose received by any part of the volume.
    pub fn d_max(&self) -> f64 {
        for i in (0..self.edges.len()).rev() {
            if self.cumulative[i] > 0.0 {
                return self.edges[i];
            }
        }
        0.0
    }

    /// `D_x`: the dose received by at least `x` percent of the volume
    /// (inverse cumulative lookup).
    pub fn d_at_percent(&self, x: f64) -> f64 {
        self.largest_edge_with_cumulative_at_least(x / 100.0)
    }

    /// `V_x`: the volume fraction receiving at least `dose_gy` (forward
    /// lookup with linear interpolation between bin edges).
    pub fn v_at_dose(&self, dose_gy: f64) -> f64 {
        if dose_gy <= 0.0 {
            return 1.0;
        }
        let last = self.edges.len() - 1;
        if dose_gy >= self.edges[last] {
            return 0.0;
        }
        let idx = (dose_gy / (self.edges[1] - self.edges[0])) as usize;
        let idx = idx.min(last - 1);
        interp::linear(
            dose_gy,
            self.edges[idx],
            self.edges[idx + 1],
            self.cumulative[idx],
            self.cumulative[idx + 1],
        )
    }

    /// Minimum dose of the hottest 2 cm³ of the structure, looked up through
    /// the absolute voxel volume.
    pub fn d2cc(&self) -> f64 {
        let fraction = 2000.0 / (self.voxels as f64 * self.voxel_volume_mm3);
        self.largest_edge_with_cumulative_at_least(fraction.min(1.0))
    }

    fn largest_edge_with_cumulative_at_least(&self, fraction: f64) -> f64 {
        for i in (0..self.edges.len()).rev() {
            if self.cumulative[i] >= fraction {
                return self.edges[i];
            }
        }
        0.0
    }
}
