mod bundle;
mod config;
mod controller;
pub mod phantom;

pub use bundle::{BundleError, DoseGridData, PlanBundle};
pub use config::{
    ConfigError, DoseCalculationConfig, EngineConfig, MonteCarloConfig, OptimAlgorithm,
    OptimizationConfig,
};
pub use controller::{
    ControllerError, PlanController, PlanReport, RunOptions, StructureBio,
};
