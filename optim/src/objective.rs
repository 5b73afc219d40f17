use rad_plan_data::{Objective, ObjectiveKind, StructureSet};
use rad_plan_world::Grid3;
use tracing::warn;

/// Value of a single objective after evaluation.
#[derive(Clone, Debug)]
pub struct ObjectiveValue {
    pub structure: String,
    pub kind: ObjectiveKind,
    pub penalty: f64,
    pub weighted: f64,
}

/// Total weighted objective plus the per-objective breakdown.
#[derive(Clone, Debug, Default)]
pub struct ObjectiveReport {
    pub total: f64,
    pub per_objective: Vec<ObjectiveValue>,
}

/// Dose exceeded by exactly `volume_pct` percent of the structure volume:
/// index `⌊(1 − v/100)·N⌋` into the ascending-sorted dose vector, clamped to
/// the last element.
pub(crate) fn dvh_dose_at(sorted: &[f64], volume_pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((1.0 - volume_pct / 100.0) * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Paddick conformity index `TV_PIV² / (TV · PIV)`.
///
/// `tv` is the target volume in voxels, `piv` the prescription isodose
/// volume, and `tv_piv` their intersection. Degenerate inputs (empty target
/// or empty isodose volume) give 0; the index is 1 exactly when
/// `TV = PIV = TV_PIV`.
pub fn paddick_ci(tv_piv: usize, tv: usize, piv: usize) -> f64 {
    if tv == 0 || piv == 0 {
        return 0.0;
    }
    (tv_piv * tv_piv) as f64 / (tv * piv) as f64
}

/// Per-objective penalty over the ascending-sorted structure doses.
///
/// `conformity` supplies `(tv_piv, tv, piv)` voxel counts for the Conformity
/// kind, which needs the prescription isodose volume over the whole grid.
pub(crate) fn penalty(
    objective: &Objective,
    sorted: &[f64],
    conformity: Option<(usize, usize, usize)>,
) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let target = objective.dose_gy;
    match objective.kind {
        ObjectiveKind::MaxDose => {
            let max = sorted[sorted.len() - 1];
            if max > target { (max - target).powi(2) } else { 0.0 }
        }
        ObjectiveKind::MinDose => {
            let min = sorted[0];
            if min < target { (target - min).powi(2) } else { 0.0 }
        }
        ObjectiveKind::MaxDvh => {
            let d = dvh_dose_at(sorted, objective.volume_pct);
            if d > target { (d - target).powi(2) } else { 0.0 }
        }
        ObjectiveKind::MinDvh => {
            let d = dvh_dose_at(sorted, objective.volume_pct);
            if d < target { (target - d).powi(2) } else { 0.0 }
        }
        ObjectiveKind::MeanDose => {
            let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
            (mean - target).powi(2)
        }
        ObjectiveKind::Conformity => {
            let (tv_piv, tv, piv) = conformity.unwrap_or((0, 0, 0));
            1.0 - paddick_ci(tv_piv, tv, piv)
        }
        ObjectiveKind::Homogeneity => {
            let d2 = dvh_dose_at(sorted, 2.0);
            let d98 = dvh_dose_at(sorted, 98.0);
            if d98 > 0.0 {
                (d2 / d98 - 1.0).powi(2) * 100.0
            } else {
                0.0
            }
        }
        ObjectiveKind::Uniformity => {
            let n = sorted.len() as f64;
            let mean = sorted.iter().sum::<f64>() / n;
            if mean > 0.0 {
                let var = sorted.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
                var / (mean * mean) * 100.0
            } else {
                0.0
            }
        }
    }
}

/// Conformity voxel counts for one structure/target dose over a dose grid.
pub(crate) fn conformity_counts(
    dose: &Grid3<f32>,
    mask: &Grid3<bool>,
    target: f64,
) -> (usize, usize, usize) {
    let mut tv = 0usize;
    let mut piv = 0usize;
    let mut tv_piv = 0usize;
    for (&d, &m) in dose.data().iter().zip(mask.data().iter()) {
        let hot = d as f64 >= target;
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
}

/// Evaluates all objectives over a dose grid.
///
/// Objectives referencing a structure without a mask are skipped with a
/// warning; everything else follows the penalty table, and the total is the
/// weight-scaled sum.
pub fn evaluate(
    objectives: &[Objective],
    dose: &Grid3<f32>,
    structures: &StructureSet,
) -> ObjectiveReport {
    let mut report = ObjectiveReport::default();
    for objective in objectives {
        let Some(structure) = structures.get(&objective.structure) else {
            warn!(
                "Objective references unknown structure [{}]; skipped",
                objective.structure
            );
            continue;
        };
        let mut doses: Vec<f64> = structure
            .voxel_indices()
            .iter()
            .map(|&i| dose.data()[i] as f64)
            .collect();
        doses.sort_by(f64::total_cmp);
        let conformity = (objective.kind == ObjectiveKind::Conformity)
            .then(|| conformity_counts(dose, &structure.mask, objective.dose_gy));
        let p = penalty(objective, &doses, conformity);
        report.total += objective.weight * p;
        report.per_objective.push(ObjectiveValue {
            structure: objective.structure.clone(),
            kind: objective.kind,
            penalty: p,
            weighted: objective.weight * p,
        });
    }
    report
}
