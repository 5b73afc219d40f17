mod dvh;
mod metrics;

pub use dvh::{Dvh, MAX_BINS, dvh};
pub use metrics::{
    PlanMetrics, conformity_index, gradient_index, homogeneity_index, paddick_conformity,
    plan_metrics,
};

#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    #[error("Structure [{0}] has an empty mask")]
    EmptyStructure(String),
    #[error("Structure [{name}] mask dimensions {got:?} do not match the dose grid {expected:?}")]
    GeometryMismatch {
        name: String,
        expected: [usize; 3],
        got: [usize; 3],
    },
    #[error("Dose grid contains non-finite values")]
    NonFiniteDose,
}
