use crate::objective::{ObjectiveReport, ObjectiveValue, paddick_ci, penalty};
use crate::{OptimError, project_weights};
use rad_plan_data::{Objective, ObjectiveKind, StructureSet};
use rad_plan_world::Grid3;
use tracing::warn;

/// Per-structure dose columns: voxel indices of the mask and, per control
/// point, the unit-weight dose at exactly those voxels.
struct StructureColumns {
    name: String,
    indices: Vec<usize>,
    /// `columns[cp][k]` is the dose of influence field `cp` at `indices[k]`.
    columns: Vec<Vec<f32>>,
}

impl StructureColumns {
    fn build(name: &str, indices: Vec<usize>, influence: &[Grid3<f32>]) -> Self {
        let columns = influence
            .iter()
            .map(|field| {
                let data = field.data();
                indices.iter().map(|&i| data[i]).collect()
            })
            .collect();
        Self {
            name: name.to_string(),
            indices,
            columns,
        }
    }

    /// Composes `Σ w_cp · column_cp` for the structure's voxels.
    fn compose(&self, w: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0f64; self.indices.len()];
        for (col, &wi) in self.columns.iter().zip(w.iter()) {
            if wi == 0.0 {
                continue;
            }
            for (o, &v) in out.iter_mut().zip(col.iter()) {
                *o += wi * v as f64;
            }
        }
        out
    }
}

/// The objective oracle both optimizer backends share.
///
/// Dose is linear in the weight vector, `dose(w) = Σ wᵢ · fieldᵢ`, so the
/// oracle precomputes the influence dose at the voxels of every structure an
/// objective references and evaluates `f(w)` without touching the full grid.
/// The same PTV-mean normalization the dose engine applies is folded in, so
/// objectives always see prescription-scaled dose. Only Conformity
/// objectives, whose isodose volume spans the whole grid, fall back to a
/// full composition.
pub struct DoseOracle<'a> {
    influence: &'a [Grid3<f32>],
    objectives: Vec<(Objective, usize)>,
    structures: Vec<StructureColumns>,
    ptv: Option<StructureColumns>,
    conformity_masks: Vec<Option<&'a Grid3<bool>>>,
    prescription_gy: f64,
}

impl<'a> DoseOracle<'a> {
    /// Builds the oracle.
    ///
    /// Objectives whose structure has no mask are dropped with a warning
    /// (MissingStructure is locally recoverable). Influence fields must agree
    /// on geometry with each other and with the masks.
    pub fn new(
        influence: &'a [Grid3<f32>],
        objectives: &[Objective],
        structures: &'a StructureSet,
        prescription_gy: f64,
    ) -> Result<Self, OptimError> {
        if influence.is_empty() {
            return Err(OptimError::NoInfluence);
        }
        let n_voxels = influence[0].len();
        for (i, field) in influence.iter().enumerate().skip(1) {
            if !field.same_geometry(&influence[0]) {
                return Err(OptimError::InfluenceGeometryMismatch(i));
            }
        }

        let mut columns: Vec<StructureColumns> = Vec::new();
        let mut kept: Vec<(Objective, usize)> = Vec::new();
        let mut conformity_masks: Vec<Option<&Grid3<bool>>> = Vec::new();
        for objective in objectives {
            let Some(structure) = structures.get(&objective.structure) else {
                warn!(
                    "Objective references unknown structure [{}]; skipped",
                    objective.structure
                );
                continue;
            };
            if structure.mask.len() != n_voxels {
                return Err(OptimError::MaskLengthMismatch {
                    name: structure.name.clone(),
                    expected: n_voxels,
                    got: structure.mask.len(),
                });
            }
            let idx = match columns.iter().position(|c| c.name == objective.structure) {
                Some(idx) => idx,
                None => {
                    columns.push(StructureColumns::build(
                        &structure.name,
                        structure.voxel_indices(),
                        influence,
                    ));
                    columns.len() - 1
                }
            };
            conformity_masks.push(
                (objective.kind == ObjectiveKind::Conformity).then_some(&structure.mask),
            );
            kept.push((objective.clone(), idx));
        }

        let ptv = structures.target().and_then(|ptv| {
            if ptv.mask.len() != n_voxels {
                return None;
            }
            Some(StructureColumns::build(
                &ptv.name,
                ptv.voxel_indices(),
                influence,
            ))
        });

        Ok(Self {
            influence,
            objectives: kept,
            structures: columns,
            ptv,
            conformity_masks,
            prescription_gy,
        })
    }

    pub fn n_weights(&self) -> usize {
        self.influence.len()
    }

    /// Normalization factor mirroring the engine: prescription over mean PTV
    /// dose, or 1 when there is no PTV or its dose is zero.
    fn norm_scale(&self, w: &[f64]) -> f64 {
        let Some(ptv) = &self.ptv else {
            return 1.0;
        };
        let doses = ptv.compose(w);
        if doses.is_empty() {
            return 1.0;
        }
        let mean = doses.iter().sum::<f64>() / doses.len() as f64;
        if mean > 0.0 {
            self.prescription_gy / mean
        } else {
            1.0
        }
    }

    /// Total weighted objective at `w`.
    pub fn evaluate(&self, w: &[f64]) -> Result<f64, OptimError> {
        Ok(self.evaluate_report(w)?.total)
    }

    /// Total objective plus the per-objective breakdown at `w`.
    pub fn evaluate_report(&self, w: &[f64]) -> Result<ObjectiveReport, OptimError> {
        if w.len() != self.influence.len() {
            return Err(OptimError::WeightLengthMismatch(
                w.len(),
                self.influence.len(),
            ));
        }
        let scale = self.norm_scale(w);

        // Sorted, normalized doses per referenced structure.
        let sorted_per_structure: Vec<Vec<f64>> = self
            .structures
            .iter()
            .map(|columns| {
                let mut doses = columns.compose(w);
                doses.iter_mut().for_each(|d| *d *= scale);
                doses.sort_by(f64::total_cmp);
                doses
            })
            .collect();

        // Conformity needs the prescription isodose volume over the grid.
        let full_dose = self
            .conformity_masks
            .iter()
            .any(Option::is_some)
            .then(|| self.compose_scaled(w, scale));

        let mut report = ObjectiveReport::default();
        for ((objective, sidx), mask) in self.objectives.iter().zip(&self.conformity_masks) {
            let sorted = &sorted_per_structure[*sidx];
            let conformity = mask.map(|mask| {
                let dose = full_dose.as_ref().expect("composed for conformity");
                let mut tv = 0usize;
                let mut piv = 0usize;
                let mut tv_piv = 0usize;
                for (&d, &m) in dose.iter().zip(mask.data().iter()) {
                    let hot = d >= objective.dose_gy;
                    if m {
                        tv += 1;
                        if hot {
                            tv_piv += 1;
                        }
                    }
                    if hot {
                        piv += 1;
                    }
                }
                (tv_piv, tv, piv)
            });
            let p = penalty(objective, sorted, conformity);
            report.total += objective.weight * p;
            report.per_objective.push(ObjectiveValue {
                structure: objective.structure.clone(),
                kind: objective.kind,
                penalty: p,
                weighted: objective.weight * p,
            });
        }
        if !report.total.is_finite() {
            return Err(OptimError::NumericFailure);
        }
        Ok(report)
    }

    fn compose_scaled(&self, w: &[f64], scale: f64) -> Vec<f64> {
        let mut out = vec![0.0f64; self.influence[0].len()];
        for (field, &wi) in self.influence.iter().zip(w.iter()) {
            if wi == 0.0 {
                continue;
            }
            for (o, &v) in out.iter_mut().zip(field.data().iter()) {
                *o += wi * v as f64;
            }
        }
        out.iter_mut().for_each(|v| *v *= scale);
        out
    }

    /// Composes the full dose grid `Σ wᵢ · fieldᵢ` (without normalization),
    /// e.g. to hand the optimized dose back to the engine pipeline.
    pub fn compose(&self, w: &[f64]) -> Result<Grid3<f32>, OptimError> {
        if w.len() != self.influence.len() {
            return Err(OptimError::WeightLengthMismatch(
                w.len(),
                self.influence.len(),
            ));
        }
        let raw = self.compose_scaled(w, 1.0);
        let mut grid = self.influence[0].like(0.0f32);
        for (o, v) in grid.data_mut().iter_mut().zip(raw.iter()) {
            *o = *v as f32;
        }
        Ok(grid)
    }

    /// A uniform starting vector of the right length.
    pub fn uniform_weights(&self) -> Vec<f64> {
        let mut w = vec![1.0; self.n_weights()];
        project_weights(&mut w);
        w
    }

    /// Reference Paddick conformity of the composed dose at the prescription
    /// isodose, for reporting.
    pub fn paddick_at_prescription(&self, w: &[f64], mask: &Grid3<bool>) -> f64 {
        let scale = self.norm_scale(w);
        let dose = self.compose_scaled(w, scale);
        let mut tv = 0usize;
        let mut piv = 0usize;
        let mut tv_piv = 0usize;
        for (&d, &m) in dose.iter().zip(mask.data().iter()) {
            let hot = d >= self.prescription_gy;
            if m {
                tv += 1;
                if hot {
                    tv_piv += 1;
                }
            }
            if hot {
                piv += 1;
            }
        }
        paddick_ci(tv_piv, tv, piv)
    }
}
