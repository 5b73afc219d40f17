use crate::oracle::DoseOracle;
use crate::{OptimError, OptimStatus, OptimizerOutcome, project_weights};
use rad_plan_world::{CancelToken, RunBudget};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Settings of the gradient-descent backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientSettings {
    pub max_iterations: usize,
    /// Stop when `|f_prev − f|` drops below this.
    pub convergence_threshold: f64,
    pub learning_rate: f64,
    /// Forward finite-difference step.
    pub fd_step: f64,
}

impl Default for GradientSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-5,
            learning_rate: 0.05,
            fd_step: 1e-5,
        }
    }
}

/// Minimizes the objective by projected gradient descent.
///
/// The gradient is computed by forward finite differences, one objective
/// evaluation per weight, parallel across weight indices. Each update clamps
/// to `w ≥ 0` and renormalizes to `Σw = 1`; when an update increases the
/// objective the learning rate is halved. The best vector seen is returned,
/// so the result never degrades the initial objective.
pub fn optimize(
    oracle: &DoseOracle<'_>,
    settings: &GradientSettings,
    cancel: &CancelToken,
    budget: &RunBudget,
) -> Result<OptimizerOutcome, OptimError> {
    let mut w = oracle.uniform_weights();
    let initial = oracle.evaluate(&w)?;
    let mut best_w = w.clone();
    let mut best_f = initial;
    let mut f_prev = initial;
    let mut eta = settings.learning_rate;
    let mut status = OptimStatus::MaxIterations;
    let mut iterations = 0usize;
    let mut history = Vec::new();

    for iter in 0..settings.max_iterations {
        if cancel.is_cancelled() {
            status = OptimStatus::Cancelled;
            break;
        }
        if budget.expired() {
            status = OptimStatus::TimedOut;
            break;
        }
        iterations = iter + 1;

        let f_base = oracle.evaluate(&w)?;
        let h = settings.fd_step;
        let gradient: Vec<f64> = (0..w.len())
            .into_par_iter()
            .map(|i| {
                let mut probe = w.clone();
                probe[i] += h;
                oracle.evaluate(&probe).map(|f| (f - f_base) / h)
            })
            .collect::<Result<_, _>>()?;
        if gradient.iter().any(|g| !g.is_finite()) {
            return Err(OptimError::NumericFailure);
        }

        for (wi, g) in w.iter_mut().zip(gradient.iter()) {
            *wi = (*wi - eta * g).max(0.0);
        }
        project_weights(&mut w);

        let f = oracle.evaluate(&w)?;
        if f < best_f {
            best_f = f;
            best_w.clone_from(&w);
        } else if f > f_prev {
            eta *= 0.5;
        }
        history.push(best_f);
        debug!("gradient iteration {iter}: f = {f:.6e}, eta = {eta:.3e}");

        if (f_prev - f).abs() < settings.convergence_threshold {
            status = OptimStatus::Converged;
            break;
        }
        f_prev = f;
    }

    if status == OptimStatus::MaxIterations {
        warn!(
            "Gradient descent did not converge within {} iterations; returning best-so-far",
            settings.max_iterations
        );
    }

    Ok(OptimizerOutcome {
        weights: best_w,
        initial_objective: initial,
        final_objective: best_f,
        iterations,
        history,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rad_plan_data::{Objective, ObjectiveKind, Structure, StructureRole, StructureSet};
    use rad_plan_world::Grid3;

    /// One "good" field hitting the PTV and one "bad" field hitting the OAR.
    fn fixture() -> (Vec<Grid3<f32>>, StructureSet) {
        let field = |values: [f32; 4]| {
            Grid3::from_vec([4, 1, 1], [1.0; 3], [0.0; 3], values.to_vec()).unwrap()
        };
        let fields = vec![field([2.0, 2.0, 0.0, 0.0]), field([2.0, 2.0, 4.0, 4.0])];
        let mask = |a: usize, b: usize| {
            let mut m = Grid3::new([4, 1, 1], [1.0; 3], [0.0; 3], false).unwrap();
            m.set(a, 0, 0, true).unwrap();
            m.set(b, 0, 0, true).unwrap();
            m
        };
        let mut structures = StructureSet::new();
        structures
            .insert(Structure::new("PTV", StructureRole::Ptv, mask(0, 1)))
            .unwrap();
        structures
            .insert(Structure::new("OAR", StructureRole::Oar, mask(2, 3)))
            .unwrap();
        (fields, structures)
    }

    fn objectives() -> Vec<Objective> {
        vec![
            Objective::new("PTV", ObjectiveKind::MeanDose, 2.0).with_weight(10.0),
            Objective::new("OAR", ObjectiveKind::MaxDose, 0.5).with_weight(1.0),
        ]
    }

    #[test]
    fn test_descent_improves_and_respects_the_simplex() {
        let (fields, structures) = fixture();
        let objectives = objectives();
        let oracle = DoseOracle::new(&fields, &objectives, &structures, 2.0).unwrap();
        let outcome = optimize(
            &oracle,
            &GradientSettings::default(),
            &CancelToken::new(),
            &RunBudget::unlimited(),
        )
        .unwrap();
        assert!(outcome.final_objective <= outcome.initial_objective);
        assert!((outcome.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(outcome.weights.iter().all(|&v| v >= 0.0));
        // The OAR-hitting field should lose weight.
        assert!(outcome.weights[0] > outcome.weights[1]);
    }

    #[test]
    fn test_zero_gradient_step_preserves_the_objective() {
        let (fields, structures) = fixture();
        let objectives = objectives();
        let oracle = DoseOracle::new(&fields, &objectives, &structures, 2.0).unwrap();
        let w = oracle.uniform_weights();
        let before = oracle.evaluate(&w).unwrap();
        // A step with learning rate 0 leaves w untouched.
        let mut stepped = w.clone();
        for wi in stepped.iter_mut() {
            *wi = (*wi - 0.0).max(0.0);
        }
        project_weights(&mut stepped);
        let after = oracle.evaluate(&stepped).unwrap();
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn test_cancelled_run_reports_status() {
        let (fields, structures) = fixture();
        let objectives = objectives();
        let oracle = DoseOracle::new(&fields, &objectives, &structures, 2.0).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = optimize(
            &oracle,
            &GradientSettings::default(),
            &cancel,
            &RunBudget::unlimited(),
        )
        .unwrap();
        assert_eq!(outcome.status, OptimStatus::Cancelled);
        assert_eq!(outcome.final_objective, outcome.initial_objective);
    }

    #[test]
    fn test_finite_difference_gradient_is_consistent() {
        let (fields, structures) = fixture();
        let objectives = objectives();
        let oracle = DoseOracle::new(&fields, &objectives, &structures, 2.0).unwrap();
        let w = vec![0.3, 0.7];
        let h = 1e-5;
        let f0 = oracle.evaluate(&w).unwrap();
        let mut probe = w.clone();
        probe[1] += h;
        let f1 = oracle.evaluate(&probe).unwrap();
        let g = (f1 - f0) / h;
        // The gradient against the OAR max-dose penalty must be positive:
        // more weight on the second field raises the OAR dose.
        assert!(g > 0.0);
    }
}
