pub mod aperture;
pub mod engine;
pub mod hu;
pub mod kernel;
pub mod montecarlo;
pub mod raytrace;

pub use engine::{
    Algorithm, ComputeStatus, DoseEngine, DoseOutput, EngineSettings, InfluenceOutput,
    PartialReason, expand_control_points, materialize_plan, normalize_to_target,
};
pub use hu::HuDensityTable;
pub use montecarlo::MonteCarloSettings;

#[derive(thiserror::Error, Debug)]
pub enum DoseEngineError {
    #[error(transparent)]
    Grid(#[from] rad_plan_world::GridError),
    #[error(transparent)]
    Plan(#[from] rad_plan_data::PlanError),
    #[error(transparent)]
    Structures(#[from] rad_plan_data::StructureSetError),
    #[error(transparent)]
    HuTable(#[from] hu::HuTableError),
    #[error("Unknown dose algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("Non-finite dose while accumulating beam [{0}]")]
    NumericFailure(String),
    #[error("Failed to allocate a dose buffer of {0} voxels")]
    ResourceExhausted(usize),
}
