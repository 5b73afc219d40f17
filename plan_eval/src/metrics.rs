use crate::dvh::Dvh;
use rad_plan_data::StructureSet;
use rad_plan_world::Grid3;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Scalar plan-quality indices around the prescription isodose.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanMetrics {
    /// Simple conformity index `V_ref / V_PTV`.
    pub ci: f64,
    /// Paddick conformity index `TV_PIV² / (TV · PIV)`.
    pub ci_paddick: f64,
    /// Homogeneity index `(D₂ − D₉₈) / D₅₀` over the PTV.
    pub hi: f64,
    /// Gradient index `V_50% / V_100%`.
    pub gi: f64,
    /// Voxels anywhere above 107% of the prescription.
    pub hot_spot_voxels: usize,
    /// PTV voxels below 95% of the prescription.
    pub cold_spot_voxels: usize,
    /// Hottest voxel in the grid, Gy.
    pub global_max_gy: f64,
}

fn count_at_least(dose: &Grid3<f32>, threshold: f64) -> usize {
    dose.data()
        .iter()
        .filter(|&&d| d as f64 >= threshold)
        .count()
}

/// Simple conformity index: total volume receiving the prescription over the
/// PTV volume. An empty PTV gives 0.
pub fn conformity_index(dose: &Grid3<f32>, ptv_mask: &Grid3<bool>, rx_gy: f64) -> f64 {
    let tv = ptv_mask.data().iter().filter(|&&m| m).count();
    if tv == 0 {
        return 0.0;
    }
    count_at_least(dose, rx_gy) as f64 / tv as f64
}

/// Paddick conformity index `TV_PIV² / (TV · PIV)` at the prescription
/// isodose; 0 for degenerate inputs, 1 exactly when the isodose volume
/// coincides with the target.
pub fn paddick_conformity(dose: &Grid3<f32>, ptv_mask: &Grid3<bool>, rx_gy: f64) -> f64 {
    let mut tv = 0usize;
    let mut piv = 0usize;
    let mut tv_piv = 0usize;
    for (&d, &m) in dose.data().iter().zip(ptv_mask.data().iter()) {
        let hot = d as f64 >= rx_gy;
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
    if tv == 0 || piv == 0 {
        return 0.0;
    }
    (tv_piv * tv_piv) as f64 / (tv * piv) as f64
}

/// Homogeneity index `(D₂ − D₉₈) / D₅₀` from a PTV DVH; 0 when D₅₀ is 0.
pub fn homogeneity_index(dvh: &Dvh) -> f64 {
    let d50 = dvh.d_at_percent(50.0);
    if d50 <= 0.0 {
        return 0.0;
    }
    (dvh.d_at_percent(2.0) - dvh.d_at_percent(98.0)) / d50
}

/// Gradient index: volume receiving half the prescription over the volume
/// receiving the full prescription. 0 (with a warning) when nothing reaches
/// the prescription.
pub fn gradient_index(dose: &Grid3<f32>, rx_gy: f64) -> f64 {
    let v100 = count_at_least(dose, rx_gy);
    if v100 == 0 {
        warn!("No voxel reaches the prescription dose; gradient index undefined");
        return 0.0;
    }
    count_at_least(dose, rx_gy / 2.0) as f64 / v100 as f64
}

/// Computes the full metric set for a plan dose.
///
/// Returns `None` (with a warning) when the structure set has no PTV, since
/// every index is defined relative to the target.
pub fn plan_metrics(
    dose: &Grid3<f32>,
    structures: &StructureSet,
    ptv_dvh: &Dvh,
    rx_gy: f64,
) -> Option<PlanMetrics> {
    let Some(ptv) = structures.target() else {
        warn!("Structure set has no PTV; plan metrics skipped");
        return None;
    };
    let hot_threshold = 1.07 * rx_gy;
    let cold_threshold = 0.95 * rx_gy;
    let data = dose.data();
    let mask = ptv.mask.data();
    let mut hot = 0usize;
    let mut cold = 0usize;
    let mut global_max = 0.0f64;
    for (i, &d) in data.iter().enumerate() {
        let d = d as f64;
        global_max = global_max.max(d);
        if d > hot_threshold {
            hot += 1;
        }
        if mask[i] && d < cold_threshold {
            cold += 1;
        }
    }
    Some(PlanMetrics {
        ci: conformity_index(dose, &ptv.mask, rx_gy),
        ci_paddick: paddick_conformity(dose, &ptv.mask, rx_gy),
        hi: homogeneity_index(ptv_dvh),
        gi: gradient_index(dose, rx_gy),
        hot_spot_voxels: hot,
        cold_spot_voxels: cold,
        global_max_gy: global_max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvh::dvh;
    use rad_plan_data::{Structure, StructureRole};

    /// A 6³ grid with a 2³ target; target voxels get `inside_gy`, the rest
    /// `outside_gy`.
    fn two_level_dose(inside_gy: f32, outside_gy: f32) -> (Grid3<f32>, StructureSet) {
        let mut dose = Grid3::new([6, 6, 6], [2.0; 3], [0.0; 3], outside_gy).unwrap();
        let mut mask = dose.like(false);
        for z in 2..4 {
            for y in 2..4 {
                for x in 2..4 {
                    dose.set(x, y, z, inside_gy).unwrap();
                    mask.set(x, y, z, true).unwrap();
                }
            }
        }
        let mut structures = StructureSet::new();
        structures
            .insert(Structure::new("PTV", StructureRole::Ptv, mask))
            .unwrap();
        (dose, structures)
    }

    #[test]
    fn test_perfectly_conformal_dose() {
        let (dose, structures) = two_level_dose(2.0, 0.5);
        let ptv = structures.get("PTV").unwrap();
        assert!((paddick_conformity(&dose, &ptv.mask, 2.0) - 1.0).abs() < 1e-12);
        assert!((conformity_index(&dose, &ptv.mask, 2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_paddick_penalizes_spill() {
        let (mut dose, structures) = two_level_dose(2.0, 0.5);
        // Dose spills outside the target.
        dose.set(0, 0, 0, 2.5).unwrap();
        dose.set(5, 5, 5, 2.5).unwrap();
        let ptv = structures.get("PTV").unwrap();
        let ci = paddick_conformity(&dose, &ptv.mask, 2.0);
        assert!(ci > 0.0 && ci < 1.0);
        // 8 of 10 isodose voxels are in the target: CI = 8²/(8·10).
        assert!((ci - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_paddick_degenerate_inputs() {
        let (dose, structures) = two_level_dose(1.0, 0.5);
        let ptv = structures.get("PTV").unwrap();
        // Nothing reaches the prescription.
        assert_eq!(paddick_conformity(&dose, &ptv.mask, 2.0), 0.0);
    }

    #[test]
    fn test_homogeneity_zero_for_uniform_target() {
        let (dose, structures) = two_level_dose(70.0, 0.0);
        let ptv = structures.get("PTV").unwrap();
        let curve = dvh(ptv, &dose).unwrap();
        assert_eq!(homogeneity_index(&curve), 0.0);
    }

    #[test]
    fn test_gradient_index() {
        let (mut dose, _) = two_level_dose(2.0, 0.0);
        // Put a 1 Gy shell voxel next to the target.
        dose.set(1, 2, 2, 1.0).unwrap();
        let gi = gradient_index(&dose, 2.0);
        // 9 voxels ≥ 1 Gy over 8 voxels ≥ 2 Gy.
        assert!((gi - 9.0 / 8.0).abs() < 1e-12);
        let cold = Grid3::new([4, 4, 4], [1.0; 3], [0.0; 3], 0.0f32).unwrap();
        assert_eq!(gradient_index(&cold, 2.0), 0.0);
    }

    #[test]
    fn test_plan_metrics_hot_and_cold_spots() {
        let (mut dose, structures) = two_level_dose(2.0, 0.5);
        // One hot voxel outside, one cold voxel inside the target.
        dose.set(0, 0, 0, 2.5).unwrap();
        dose.set(2, 2, 2, 1.0).unwrap();
        let ptv = structures.get("PTV").unwrap();
        let curve = dvh(ptv, &dose).unwrap();
        let metrics = plan_metrics(&dose, &structures, &curve, 2.0).unwrap();
        assert_eq!(metrics.hot_spot_voxels, 1);
        assert_eq!(metrics.cold_spot_voxels, 1);
        assert!((metrics.global_max_gy - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_plan_metrics_without_ptv() {
        let (dose, _) = two_level_dose(2.0, 0.5);
        let structures = StructureSet::new();
        let mask = dose.like(true);
        let s = Structure::new("Any", StructureRole::Other, mask);
        let curve = dvh(&s, &dose).unwrap();
        assert!(plan_metrics(&dose, &structures, &curve, 2.0).is_none());
    }
}
