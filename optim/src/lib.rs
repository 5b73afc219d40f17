pub mod genetic;
pub mod gradient;
mod objective;
mod oracle;

pub use genetic::GeneticSettings;
pub use gradient::GradientSettings;
pub use objective::{ObjectiveReport, ObjectiveValue, evaluate, paddick_ci};
pub use oracle::DoseOracle;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum OptimError {
    #[error("There are no influence fields to optimize over")]
    NoInfluence,
    #[error("Influence field [{0}] does not match the geometry of field [0]")]
    InfluenceGeometryMismatch(usize),
    #[error("Structure [{name}] mask length [{got}] does not match the dose grid [{expected}]")]
    MaskLengthMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Objective function produced a non-finite value")]
    NumericFailure,
    #[error("Weight vector length [{0}] does not match the influence fields [{1}]")]
    WeightLengthMismatch(usize, usize),
}

/// How an optimization run ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimStatus {
    /// The convergence criterion was met.
    Converged,
    /// The iteration budget ran out before convergence.
    MaxIterations,
    Cancelled,
    TimedOut,
}

/// Result of either optimizer backend.
///
/// The returned weights always satisfy `w ≥ 0`, `Σw = 1` and
/// `final_objective ≤ initial_objective`: both backends track and return the
/// best vector seen.
#[derive(Clone, Debug)]
pub struct OptimizerOutcome {
    pub weights: Vec<f64>,
    pub initial_objective: f64,
    pub final_objective: f64,
    pub iterations: usize,
    /// Best objective seen up to and including each iteration/generation.
    pub history: Vec<f64>,
    pub status: OptimStatus,
}

/// Projects onto the simplex used by both backends: clamp negatives to zero
/// and rescale to sum 1, falling back to uniform weights when everything is
/// zero.
pub(crate) fn project_weights(w: &mut [f64]) {
    let n = w.len();
    if n == 0 {
        return;
    }
    for v in w.iter_mut() {
        if !v.is_finite() || *v < 0.0 {
            *v = 0.0;
        }
    }
    let sum: f64 = w.iter().sum();
    if sum > 0.0 {
        for v in w.iter_mut() {
            *v /= sum;
        }
    } else {
        let uniform = 1.0 / n as f64;
        w.iter_mut().for_each(|v| *v = uniform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_weights_clamps_and_normalizes() {
        let mut w = vec![0.5, -0.25, 1.5];
        project_weights(&mut w);
        assert_eq!(w[1], 0.0);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((w[0] - 0.25).abs() < 1e-12);
        assert!((w[2] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_project_weights_uniform_fallback() {
        let mut w = vec![-1.0, 0.0, -2.0, 0.0];
        project_weights(&mut w);
        assert!(w.iter().all(|&v| (v - 0.25).abs() < 1e-12));
    }
}
