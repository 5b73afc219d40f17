use rad_plan_data::Modality;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Default edge length of the cubic kernel grid. Must be odd so the kernel
/// has a central voxel.
pub const DEFAULT_KERNEL_SIZE: usize = 11;

/// A precomputed 3D point-spread kernel on an odd cubic grid, normalized so
/// its values sum to 1.
#[derive(Debug, Clone)]
pub struct DoseKernel {
    size: usize,
    data: Vec<f64>,
}

impl DoseKernel {
    /// Builds a kernel by evaluating `f` at every offset `(dx, dy, dz)` in mm
    /// from the kernel center, then normalizing to sum 1.
    fn from_fn<F: Fn(f64, f64, f64) -> f64>(size: usize, spacing_mm: f64, f: F) -> Self {
        debug_assert!(size % 2 == 1, "kernel size must be odd");
        let half = (size / 2) as isize;
        let mut data = Vec::with_capacity(size * size * size);
        let mut sum = 0.0;
        for dz in -half..=half {
            for dy in -half..=half {
                for dx in -half..=half {
                    let v = f(
                        dx as f64 * spacing_mm,
                        dy as f64 * spacing_mm,
                        dz as f64 * spacing_mm,
                    )
                    .max(0.0);
                    sum += v;
                    data.push(v);
                }
            }
        }
        if sum > 0.0 {
            for v in &mut data {
                *v /= sum;
            }
        }
        Self { size, data }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn half(&self) -> isize {
        (self.size / 2) as isize
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Iterates `(dx, dy, dz, value)` over all kernel offsets in voxels.
    pub fn offsets(&self) -> impl Iterator<Item = (isize, isize, isize, f64)> + '_ {
        let half = self.half();
        let size = self.size as isize;
        self.data.iter().enumerate().map(move |(i, &v)| {
            let i = i as isize;
            let dx = i % size - half;
            let dy = (i / size) % size - half;
            let dz = i / (size * size) - half;
            (dx, dy, dz, v)
        })
    }
}

/// Lateral spread of a photon kernel in mm.
fn photon_sigma_mm(energy_mv: f64) -> f64 {
    2.0 + 0.35 * energy_mv
}

/// Lateral spread of an electron kernel in mm. Electrons scatter harder, so
/// the spread grows faster with energy.
fn electron_sigma_mm(energy_mev: f64) -> f64 {
    1.5 + 0.55 * energy_mev
}

/// CSDA-style proton range in water, mm (Bragg–Kleeman rule).
pub fn proton_range_mm(energy_mev: f64) -> f64 {
    0.022 * energy_mev.powf(1.77)
}

/// Builds the point-spread kernel for a `(modality, energy)` pair.
///
/// Photon and electron kernels are isotropic Gaussians whose width depends on
/// modality and energy; the proton kernel is a radial Gaussian with a
/// Bragg-peak profile along the kernel z-axis, amplified by roughly a factor
/// of six at the peak. `sigma_scale` lets an algorithm sharpen or broaden the
/// base kernel.
pub fn build_kernel(
    modality: Modality,
    energy: f64,
    spacing_mm: f64,
    sigma_scale: f64,
    size: usize,
) -> DoseKernel {
    match modality {
        Modality::Photon => {
            let sigma = photon_sigma_mm(energy) * sigma_scale;
            DoseKernel::from_fn(size, spacing_mm, |dx, dy, dz| {
                let r2 = dx * dx + dy * dy + dz * dz;
                (-r2 / (2.0 * sigma * sigma)).exp()
            })
        }
        Modality::Electron => {
            let sigma = electron_sigma_mm(energy) * sigma_scale;
            DoseKernel::from_fn(size, spacing_mm, |dx, dy, dz| {
                let r2 = dx * dx + dy * dy + dz * dz;
                (-r2 / (2.0 * sigma * sigma)).exp()
            })
        }
        Modality::Proton => {
            let radial_sigma = (2.0 + 0.01 * energy) * sigma_scale;
            let half_extent = (size / 2) as f64 * spacing_mm;
            // The Bragg peak sits at the particle range; inside a local
            // kernel it is pinned to the distal edge for clinical energies.
            let peak_z = proton_range_mm(energy).min(half_extent);
            DoseKernel::from_fn(size, spacing_mm, move |dx, dy, dz| {
                let r2 = dx * dx + dy * dy;
                let radial = (-r2 / (2.0 * radial_sigma * radial_sigma)).exp();
                let axial = if dz <= peak_z {
                    1.0 + 5.0 * (-(dz - peak_z).powi(2) / (2.0 * 3.0f64.powi(2))).exp()
                } else {
                    6.0 * (-((dz - peak_z) / 1.5).powi(2)).exp()
                };
                radial * axial
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct KernelKey {
    modality: Modality,
    energy_milli: u64,
    spacing_micro: u64,
    scale_milli: u64,
}

/// Cache of dose kernels keyed by (modality, energy, resolution, scale).
///
/// Kernels are computed once and shared; the cache is safe to use from the
/// parallel per-beam loops.
#[derive(Debug, Default)]
pub struct KernelCache {
    inner: Mutex<HashMap<KernelKey, Arc<DoseKernel>>>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        modality: Modality,
        energy: f64,
        spacing_mm: f64,
        sigma_scale: f64,
    ) -> Arc<DoseKernel> {
        let key = KernelKey {
            modality,
            energy_milli: (energy * 1e3).round() as u64,
            spacing_micro: (spacing_mm * 1e6).round() as u64,
            scale_milli: (sigma_scale * 1e3).round() as u64,
        };
        let mut map = self.inner.lock().expect("kernel cache poisoned");
        map.entry(key)
            .or_insert_with(|| {
                debug!("Building {modality} kernel for {energy} at {spacing_mm} mm");
                Arc::new(build_kernel(
                    modality,
                    energy,
                    spacing_mm,
                    sigma_scale,
                    DEFAULT_KERNEL_SIZE,
                ))
            })
            .clone()
    }
}
