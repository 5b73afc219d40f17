use crate::DoseEngineError;
use crate::aperture::Aperture;
use crate::hu::HuDensityTable;
use crate::kernel::KernelCache;
use crate::montecarlo::{self, MonteCarloSettings};
use crate::raytrace;
use nalgebra::Vector3;
use rad_plan_data::{Beam, ControlPoint, Modality, Plan, StructureSet};
use rad_plan_world::{CancelToken, Grid3, RunBudget, geometry, interp};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Leaf pairs used when a beam carries no explicit MLC sequence.
pub const DEFAULT_LEAF_PAIRS: usize = 20;

/// Dose-calculation algorithm family.
///
/// The deterministic algorithms share the per-beam convolution loop and
/// differ in how the point-spread kernel is shaped; `MonteCarlo` replaces the
/// convolution with batched particle transport. `Acuros` is accepted as a
/// configuration value and mapped onto the deterministic path with a
/// sharpened kernel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    CollapsedCone,
    PencilBeam,
    Aaa,
    Acuros,
    MonteCarlo,
}

impl Algorithm {
    /// Kernel width multiplier relative to the collapsed-cone baseline.
    pub fn sigma_scale(&self) -> f64 {
        match self {
            Algorithm::CollapsedCone => 1.0,
            Algorithm::PencilBeam => 0.75,
            Algorithm::Aaa => 1.1,
            Algorithm::Acuros => 0.9,
            Algorithm::MonteCarlo => 1.0,
        }
    }

    pub fn is_deterministic(&self) -> bool {
        !matches!(self, Algorithm::MonteCarlo)
    }
}

impl FromStr for Algorithm {
    type Err = DoseEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "collapsed_cone" => Ok(Algorithm::CollapsedCone),
            "pencil_beam" => Ok(Algorithm::PencilBeam),
            "aaa" => Ok(Algorithm::Aaa),
            "acuros" => Ok(Algorithm::Acuros),
            "monte_carlo" => Ok(Algorithm::MonteCarlo),
            t => Err(DoseEngineError::UnknownAlgorithm(t.into())),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Algorithm::CollapsedCone => "collapsed_cone",
            Algorithm::PencilBeam => "pencil_beam",
            Algorithm::Aaa => "aaa",
            Algorithm::Acuros => "acuros",
            Algorithm::MonteCarlo => "monte_carlo",
        };
        write!(f, "{}", s)
    }
}

/// Why a computation returned early.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialReason {
    Cancelled,
    TimedOut,
}

/// Completion status of a dose computation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputeStatus {
    Complete,
    Partial(PartialReason),
}

impl ComputeStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, ComputeStatus::Complete)
    }
}

/// Engine-level knobs; the HU table is supplied separately.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub algorithm: Algorithm,
    /// Dose-grid resolution in mm. `None` computes on the CT grid.
    pub resolution_mm: Option<f64>,
    pub monte_carlo: MonteCarloSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::CollapsedCone,
            resolution_mm: None,
            monte_carlo: MonteCarloSettings::default(),
        }
    }
}

/// Result of a full plan dose computation.
#[derive(Debug, Clone)]
pub struct DoseOutput {
    pub dose: Grid3<f32>,
    pub status: ComputeStatus,
    pub warnings: Vec<String>,
}

/// Per-control-point unit-weight dose fields, in plan order.
#[derive(Debug, Clone)]
pub struct InfluenceOutput {
    pub fields: Vec<Grid3<f32>>,
    pub status: ComputeStatus,
}

/// Model-based dose engine.
///
/// Owns the HU → density table and the kernel cache; all computation methods
/// take the patient model by reference and are safe to call repeatedly.
pub struct DoseEngine {
    settings: EngineSettings,
    hu_table: HuDensityTable,
    kernels: KernelCache,
}

impl DoseEngine {
    pub fn new(settings: EngineSettings, hu_table: HuDensityTable) -> Self {
        Self {
            settings,
            hu_table,
            kernels: KernelCache::new(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Converts the CT to relative electron density on the same grid.
    pub fn density(&self, ct: &Grid3<i16>) -> Grid3<f32> {
        self.hu_table.density_volume(ct)
    }

    /// Computes the absorbed-dose grid of `plan` on the CT geometry.
    ///
    /// Beams are accumulated one by one; cancellation and the wall-clock
    /// budget are observed between beams (and between Monte Carlo batches),
    /// returning the most recent consistent grid with a partial status.
    /// After accumulation the grid is scaled so the mean PTV dose equals the
    /// prescription; a missing PTV downgrades that step to a warning.
    pub fn compute_dose(
        &self,
        plan: &Plan,
        ct: &Grid3<i16>,
        structures: &StructureSet,
        cancel: &CancelToken,
        budget: &RunBudget,
    ) -> Result<DoseOutput, DoseEngineError> {
        plan.validate()?;
        structures.validate_geometry(ct)?;
        let plan = materialize_plan(plan);
        let density = self.density(ct);
        let calc_density = self.calc_grid(&density);

        let n = calc_density.len();
        let mut total = alloc_field(n)?;
        let mut warnings = Vec::new();
        let mut status = ComputeStatus::Complete;
        let mut depth_cache: HashMap<[i64; 6], Arc<Grid3<f32>>> = HashMap::new();

        for beam in &plan.beams {
            if cancel.is_cancelled() {
                status = ComputeStatus::Partial(PartialReason::Cancelled);
                break;
            }
            if budget.expired() {
                status = ComputeStatus::Partial(PartialReason::TimedOut);
                break;
            }
            if self.settings.algorithm.is_deterministic() {
                for cp in &beam.control_points {
                    let scale = cp.weight * beam.mu_fraction;
                    if scale == 0.0 {
                        continue;
                    }
                    let field =
                        self.control_point_dose(beam, cp, &calc_density, &mut depth_cache);
                    for (t, f) in total.iter_mut().zip(field.iter()) {
                        *t += f * scale as f32;
                    }
                }
            } else {
                let (field, mc_status) = montecarlo::beam_dose(
                    beam,
                    &calc_density,
                    &self.settings.monte_carlo,
                    cancel,
                    budget,
                );
                for (t, f) in total.iter_mut().zip(field.iter()) {
                    *t += f * beam.mu_fraction as f32;
                }
                if let ComputeStatus::Partial(reason) = mc_status {
                    status = ComputeStatus::Partial(reason);
                    break;
                }
            }
            if total.iter().any(|v| !v.is_finite()) {
                return Err(DoseEngineError::NumericFailure(beam.id.clone()));
            }
        }
        depth_cache.clear();

        let mut dose = grid_from_field(&calc_density, total)?;
        if !calc_density.same_geometry(&density) {
            dose = resample_trilinear(&dose, &density);
        }

        match structures.target() {
            Some(ptv) => {
                if normalize_to_target(&mut dose, &ptv.mask, plan.prescription.total_dose_gy)
                    .is_none()
                {
                    let msg = format!(
                        "Mean dose in PTV [{}] is zero; normalization skipped",
                        ptv.name
                    );
                    warn!("{msg}");
                    warnings.push(msg);
                }
            }
            None => {
                let msg = "Plan has no PTV structure; dose normalization skipped".to_string();
                warn!("{msg}");
                warnings.push(msg);
            }
        }

        Ok(DoseOutput {
            dose,
            status,
            warnings,
        })
    }

    /// Computes one unit-weight dose field per control point, in plan order.
    ///
    /// The fields carry the beam MU fraction but not the control-point
    /// weight, so a plan dose is the weighted sum of these fields; the
    /// optimizer exploits that linearity. Always uses the deterministic
    /// convolution path, also when the engine is configured for Monte Carlo.
    pub fn compute_influence(
        &self,
        plan: &Plan,
        ct: &Grid3<i16>,
        cancel: &CancelToken,
        budget: &RunBudget,
    ) -> Result<InfluenceOutput, DoseEngineError> {
        plan.validate()?;
        let plan = materialize_plan(plan);
        let density = self.density(ct);
        let calc_density = self.calc_grid(&density);
        if !self.settings.algorithm.is_deterministic() {
            debug!("Influence fields use the deterministic path under Monte Carlo");
        }

        let mut fields = Vec::new();
        let mut status = ComputeStatus::Complete;
        let mut depth_cache: HashMap<[i64; 6], Arc<Grid3<f32>>> = HashMap::new();
        'beams: for beam in &plan.beams {
            if cancel.is_cancelled() {
                status = ComputeStatus::Partial(PartialReason::Cancelled);
                break 'beams;
            }
            if budget.expired() {
                status = ComputeStatus::Partial(PartialReason::TimedOut);
                break 'beams;
            }
            for cp in &beam.control_points {
                let raw = self.control_point_dose(beam, cp, &calc_density, &mut depth_cache);
                let scaled: Vec<f32> = raw
                    .iter()
                    .map(|v| v * beam.mu_fraction as f32)
                    .collect();
                let mut grid = grid_from_field(&calc_density, scaled)?;
                if !calc_density.same_geometry(&density) {
                    grid = resample_trilinear(&grid, &density);
                }
                if grid.data().iter().any(|v| !v.is_finite()) {
                    return Err(DoseEngineError::NumericFailure(beam.id.clone()));
                }
                fields.push(grid);
            }
        }
        Ok(InfluenceOutput { fields, status })
    }

    /// The density volume the dose is computed on: the CT grid, or a coarser
    /// grid when a dose resolution is configured.
    fn calc_grid(&self, density: &Grid3<f32>) -> Grid3<f32> {
        let Some(res) = self.settings.resolution_mm else {
            return density.clone();
        };
        let spacing = density.spacing();
        if spacing.iter().all(|&s| (s - res).abs() < 1e-6) {
            return density.clone();
        }
        let extent = density.extent_mm();
        let dims = [
            (extent[0] / res).ceil().max(1.0) as usize,
            (extent[1] / res).ceil().max(1.0) as usize,
            (extent[2] / res).ceil().max(1.0) as usize,
        ];
        let coarse = Grid3::from_vec(
            dims,
            [res; 3],
            *density.origin(),
            vec![0.0f32; dims[0] * dims[1] * dims[2]],
        )
        .and_then(|g| g.with_direction(*density.direction()))
        .expect("calc grid geometry is valid");
        resample_trilinear(density, &coarse)
    }

    /// Unit-weight dose field of a single control point on the calc grid.
    fn control_point_dose(
        &self,
        beam: &Beam,
        cp: &ControlPoint,
        density: &Grid3<f32>,
        depth_cache: &mut HashMap<[i64; 6], Arc<Grid3<f32>>>,
    ) -> Vec<f32> {
        let d = geometry::beam_direction(cp.gantry_deg, beam.couch_deg);
        let (u, w) = geometry::perpendicular_basis(&d);
        let iso = Vector3::new(
            beam.isocenter_mm[0],
            beam.isocenter_mm[1],
            beam.isocenter_mm[2],
        );
        let source = geometry::source_position(&iso, &d, beam.ssd_mm);

        // Static beams share one depth field per source position.
        let key = [
            (d.x * 1e6).round() as i64,
            (d.y * 1e6).round() as i64,
            (d.z * 1e6).round() as i64,
            (source.x * 1e3).round() as i64,
            (source.y * 1e3).round() as i64,
            (source.z * 1e3).round() as i64,
        ];
        let depth = depth_cache
            .entry(key)
            .or_insert_with(|| Arc::new(raytrace::radiological_depth(density, &source)))
            .clone();

        let aperture = Aperture::new(cp, beam.field_height_mm, beam.collimator_deg);
        let mu = linear_attenuation_per_mm(beam.modality, beam.energy);
        let ssd = beam.ssd_mm;
        let wedge = beam.wedge;

        let dims = *density.dims();
        let (nx, ny) = (dims[0], dims[1]);
        let slab = nx * ny;

        let mut fluence = vec![0.0f32; density.len()];
        fluence
            .par_chunks_mut(slab)
            .enumerate()
            .for_each(|(z, chunk)| {
                for y in 0..ny {
                    for x in 0..nx {
                        let pos = density.voxel_center(x, y, z);
                        // Behind-the-source voxels get nothing.
                        if (pos - source).dot(&d) < 0.0 {
                            continue;
                        }
                        let offset = pos - iso;
                        let uc = offset.dot(&u);
                        let wc = offset.dot(&w);
                        if !aperture.contains(uc, wc) {
                            continue;
                        }
                        let depth_v = depth.data()[z * slab + y * nx + x] as f64;
                        let inv_sq = (ssd / (ssd + depth_v)).powi(2);
                        let atten = (-mu * depth_v).exp();
                        let mut f = inv_sq * atten;
                        if let Some(wedge) = wedge {
                            f *= wedge_factor(&wedge, uc, wc);
                        }
                        chunk[y * nx + x] = f as f32;
                    }
                }
            });

        let min_spacing = density
            .spacing()
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let kernel = self.kernels.get_or_build(
            beam.modality,
            beam.energy,
            min_spacing,
            self.settings.algorithm.sigma_scale(),
        );
        let offsets: Vec<(isize, isize, isize, f64)> = kernel.offsets().collect();

        let mut dose = vec![0.0f32; density.len()];
        dose.par_chunks_mut(slab)
            .enumerate()
            .for_each(|(z, chunk)| {
                let z = z as isize;
                for y in 0..ny as isize {
                    for x in 0..nx as isize {
                        let mut acc = 0.0f64;
                        for &(dx, dy, dz, k) in &offsets {
                            let sx = x + dx;
                            let sy = y + dy;
                            let sz = z + dz;
                            if sx < 0
                                || sy < 0
                                || sz < 0
                                || sx >= nx as isize
                                || sy >= ny as isize
                                || sz >= dims[2] as isize
                            {
                                continue;
                            }
                            let i = sx as usize + nx * (sy as usize + ny * sz as usize);
                            acc += k * fluence[i] as f64;
                        }
                        chunk[(y * nx as isize + x) as usize] = acc as f32;
                    }
                }
            });
        dose
    }
}

/// Linear wedge modulation at aperture coordinates `(u, w)`, clamped to a
/// minimum transmission of 0.1. Angle 0 is the identity.
fn wedge_factor(wedge: &rad_plan_data::Wedge, u: f64, w: f64) -> f64 {
    let orientation = wedge.orientation_deg.to_radians();
    let t = u * orientation.cos() + w * orientation.sin();
    let gradient = wedge.angle_deg.to_radians().tan() / 100.0;
    (1.0 - t * gradient).max(0.1)
}

/// Effective linear attenuation coefficient in water, 1/mm.
fn attenuation_anchors(modality: Modality) -> &'static [(f64, f64)] {
    match modality {
        Modality::Photon => &[
            (4.0, 0.0055),
            (6.0, 0.0049),
            (10.0, 0.0041),
            (15.0, 0.0036),
            (18.0, 0.0034),
        ],
        Modality::Electron => &[(6.0, 0.040), (9.0, 0.027), (12.0, 0.020), (20.0, 0.012)],
        Modality::Proton => &[(70.0, 0.0012), (150.0, 0.0008), (250.0, 0.0006)],
    }
}

pub(crate) fn linear_attenuation_per_mm(modality: Modality, energy: f64) -> f64 {
    let anchors = attenuation_anchors(modality);
    let first = anchors[0];
    let last = anchors[anchors.len() - 1];
    if energy <= first.0 {
        return first.1;
    }
    if energy >= last.0 {
        return last.1;
    }
    let hi = anchors.partition_point(|&(e, _)| e <= energy);
    let (x0, y0) = anchors[hi - 1];
    let (x1, y1) = anchors[hi];
    interp::linear(energy, x0, x1, y0, y1)
}

/// Expands a beam into explicit control points.
///
/// An explicit control-point list wins; otherwise an arc is sampled at
/// roughly one control point per 2° of sweep (a degenerate arc collapses to
/// a single control point), and a static beam becomes one open field.
pub fn expand_control_points(beam: &Beam) -> Vec<ControlPoint> {
    if !beam.control_points.is_empty() {
        return beam.control_points.clone();
    }
    if let Some(arc) = &beam.arc {
        let sweep = arc.sweep_deg();
        if sweep < 1e-9 {
            return vec![ControlPoint::open(
                arc.start_deg,
                beam.field_width_mm,
                beam.field_height_mm,
                DEFAULT_LEAF_PAIRS,
                1.0,
            )];
        }
        let n = ((sweep / 2.0).round() as usize).max(2);
        let signed = arc.direction.sign() * sweep;
        return (0..n)
            .map(|i| {
                let gantry =
                    (arc.start_deg + signed * i as f64 / (n - 1) as f64).rem_euclid(360.0);
                ControlPoint::open(
                    gantry,
                    beam.field_width_mm,
                    beam.field_height_mm,
                    DEFAULT_LEAF_PAIRS,
                    1.0 / n as f64,
                )
            })
            .collect();
    }
    vec![ControlPoint::open(
        beam.gantry_deg,
        beam.field_width_mm,
        beam.field_height_mm,
        DEFAULT_LEAF_PAIRS,
        1.0,
    )]
}

/// Returns a copy of the plan where every beam carries explicit control
/// points, so the weight vector has a stable length and ordering.
pub fn materialize_plan(plan: &Plan) -> Plan {
    let mut plan = plan.clone();
    for beam in &mut plan.beams {
        if beam.control_points.is_empty() {
            beam.control_points = expand_control_points(beam);
        }
    }
    plan
}

/// Scales the grid so the mean dose inside `mask` equals `target_gy`.
///
/// Returns the applied scale factor, or `None` when the mask is empty or its
/// mean dose is zero (the grid is then left untouched).
pub fn normalize_to_target(
    dose: &mut Grid3<f32>,
    mask: &Grid3<bool>,
    target_gy: f64,
) -> Option<f64> {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (v, &m) in dose.data().iter().zip(mask.data().iter()) {
        if m {
            sum += *v as f64;
            count += 1;
        }
    }
    if count == 0 || sum <= 0.0 {
        return None;
    }
    let mean = sum / count as f64;
    let scale = target_gy / mean;
    dose.data_mut().iter_mut().for_each(|v| *v = (*v as f64 * scale) as f32);
    Some(scale)
}

fn alloc_field(n: usize) -> Result<Vec<f32>, DoseEngineError> {
    let mut field = Vec::new();
    field
        .try_reserve_exact(n)
        .map_err(|_| DoseEngineError::ResourceExhausted(n))?;
    field.resize(n, 0.0f32);
    Ok(field)
}

fn grid_from_field(template: &Grid3<f32>, field: Vec<f32>) -> Result<Grid3<f32>, DoseEngineError> {
    Ok(Grid3::from_vec(
        *template.dims(),
        *template.spacing(),
        *template.origin(),
        field,
    )?
    .with_direction(*template.direction())?)
}

/// Trilinearly resamples `src` onto the geometry of `like`.
///
/// Sample points outside `src` clamp to its border voxels. Both grids must
/// share origin and direction, which holds for the engine's internal
/// calc-resolution grids.
pub(crate) fn resample_trilinear(src: &Grid3<f32>, like: &Grid3<f32>) -> Grid3<f32> {
    let sdims = *src.dims();
    let sspacing = *src.spacing();
    let mut out = like.like(0.0f32);
    let dims = *out.dims();
    let spacing = *out.spacing();
    let (nx, ny) = (dims[0], dims[1]);
    let slab = nx * ny;
    let data = src.data();

    let value_at = |x: usize, y: usize, z: usize| -> f64 {
        data[x + sdims[0] * (y + sdims[1] * z)] as f64
    };

    out.data_mut()
        .par_chunks_mut(slab)
        .enumerate()
        .for_each(|(z, chunk)| {
            for y in 0..ny {
                for x in 0..nx {
                    // Fractional index into the source grid.
                    let fx = x as f64 * spacing[0] / sspacing[0];
                    let fy = y as f64 * spacing[1] / sspacing[1];
                    let fz = z as f64 * spacing[2] / sspacing[2];
                    let x0 = (fx.floor().max(0.0) as usize).min(sdims[0] - 1);
                    let y0 = (fy.floor().max(0.0) as usize).min(sdims[1] - 1);
                    let z0 = (fz.floor().max(0.0) as usize).min(sdims[2] - 1);
                    let x1 = (x0 + 1).min(sdims[0] - 1);
                    let y1 = (y0 + 1).min(sdims[1] - 1);
                    let z1 = (z0 + 1).min(sdims[2] - 1);
                    let v = interp::trilinear(
                        fx.min(sdims[0] as f64 - 1.0),
                        fy.min(sdims[1] as f64 - 1.0),
                        fz.min(sdims[2] as f64 - 1.0),
                        x0 as f64,
                        x1 as f64,
                        y0 as f64,
                        y1 as f64,
                        z0 as f64,
                        z1 as f64,
                        value_at(x0, y0, z0),
                        value_at(x1, y0, z0),
                        value_at(x0, y1, z0),
                        value_at(x1, y1, z0),
                        value_at(x0, y0, z1),
                        value_at(x1, y0, z1),
                        value_at(x0, y1, z1),
                        value_at(x1, y1, z1),
                    );
                    chunk[y * nx + x] = v as f32;
                }
            }
        });
    out
}
