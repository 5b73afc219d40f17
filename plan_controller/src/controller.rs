use crate::config::{EngineConfig, OptimAlgorithm};
use rad_plan_bio_dose::{AlphaBetaTable, bed, eqd2, eud, ntcp_lkb, tcp_logistic};
use rad_plan_data::{Plan, StructureRole, StructureSet};
use rad_plan_dose_engine::{
    ComputeStatus, DoseEngine, DoseEngineError, EngineSettings, HuDensityTable,
    MonteCarloSettings, materialize_plan,
};
use rad_plan_eval::{Dvh, EvalError, PlanMetrics, dvh, plan_metrics};
use rad_plan_optim::{
    DoseOracle, GeneticSettings, GradientSettings, ObjectiveReport, OptimError, OptimStatus,
    genetic, gradient,
};
use rad_plan_world::{CancelToken, Grid3, RunBudget};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reporting parameters of the biological models. Targets use the logistic
/// TCP with the prescription as D₅₀; organs at risk use generic LKB values.
const TCP_GAMMA50: f64 = 2.0;
const TARGET_EUD_N: f64 = 1.0;
const OAR_EUD_N: f64 = 0.3;
const NTCP_TD50_GY: f64 = 45.0;
const NTCP_M: f64 = 0.15;

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("Plan validation failed: {0}")]
    Plan(#[from] rad_plan_data::PlanError),
    #[error("Structure set rejected: {0}")]
    Structures(#[from] rad_plan_data::StructureSetError),
    #[error("Dose engine: {0}")]
    Engine(#[from] DoseEngineError),
    #[error("Optimizer: {0}")]
    Optimizer(#[from] OptimError),
    #[error("DVH of structure [{structure}]: {source}")]
    Dvh {
        structure: String,
        #[source]
        source: EvalError,
    },
    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-run knobs that are not part of the persistent configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cancel: CancelToken,
    /// Wall-clock budget; expiry returns the most recent consistent state
    /// with a partial status.
    pub timeout: Option<Duration>,
    /// Seed for the genetic optimizer and Monte Carlo transport.
    pub seed: u64,
}

/// Biological indices of one structure, derived from its dose distribution.
#[derive(Debug, Clone)]
pub struct StructureBio {
    pub structure: String,
    pub alpha_beta_gy: f64,
    pub bed_gy: f64,
    pub eqd2_gy: f64,
    pub eud_gy: f64,
    pub tcp: Option<f64>,
    pub ntcp: Option<f64>,
}

/// Everything the pipeline produces for one plan.
#[derive(Debug, Clone)]
pub struct PlanReport {
    pub dose: Grid3<f32>,
    /// Optimized (or initial) weight vector, one entry per control point.
    pub weights: Vec<f64>,
    pub initial_objective: Option<f64>,
    /// Oracle objective at the returned weights; never above the initial.
    pub optimized_objective: Option<f64>,
    pub final_objective: Option<ObjectiveReport>,
    pub optimizer_status: Option<OptimStatus>,
    pub dvhs: Vec<(String, Dvh)>,
    pub metrics: Option<PlanMetrics>,
    pub bio: Vec<StructureBio>,
    pub status: ComputeStatus,
    pub warnings: Vec<String>,
}

/// End-to-end plan controller.
///
/// Prepares the patient model, runs the optimizer over precomputed influence
/// fields, computes the final dose with the configured algorithm and reduces
/// it to DVHs, plan metrics and biological indices.
pub struct PlanController {
    config: EngineConfig,
    hu_table: HuDensityTable,
    alpha_beta: AlphaBetaTable,
    pool: rayon::ThreadPool,
}

impl PlanController {
    /// Validates the configuration, loads the HU table and builds the worker
    /// pool.
    pub fn new(config: EngineConfig) -> Result<Self, ControllerError> {
        config.validate()?;
        let hu_table = match &config.dose_calculation.hu_to_density_table {
            Some(path) => HuDensityTable::load(path).map_err(DoseEngineError::from)?,
            None => HuDensityTable::default(),
        };
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = config.dose_calculation.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;
        Ok(Self {
            config,
            hu_table,
            alpha_beta: AlphaBetaTable::default(),
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the α/β table, e.g. with site-protocol overrides.
    pub fn with_alpha_beta(mut self, table: AlphaBetaTable) -> Self {
        self.alpha_beta = table;
        self
    }

    /// Runs the full pipeline for one plan.
    pub fn run(
        &self,
        plan: &Plan,
        ct: &Grid3<i16>,
        structures: &StructureSet,
        options: &RunOptions,
    ) -> Result<PlanReport, ControllerError> {
        self.pool.install(|| self.run_inner(plan, ct, structures, options))
    }

    fn run_inner(
        &self,
        plan: &Plan,
        ct: &Grid3<i16>,
        structures: &StructureSet,
        options: &RunOptions,
    ) -> Result<PlanReport, ControllerError> {
        plan.validate()?;
        structures.validate_geometry(ct)?;
        let budget = match options.timeout {
            Some(timeout) => RunBudget::with_timeout(timeout),
            None => RunBudget::unlimited(),
        };

        let engine = DoseEngine::new(
            EngineSettings {
                algorithm: self.config.dose_calculation.algorithm,
                resolution_mm: self.config.dose_calculation.resolution_mm,
                monte_carlo: MonteCarloSettings {
                    particles_per_batch: self.config.monte_carlo.num_particles_per_iteration,
                    target_uncertainty: self.config.monte_carlo.target_uncertainty,
                    max_batches: self.config.monte_carlo.max_iterations,
                    seed: options.seed,
                },
            },
            self.hu_table.clone(),
        );

        let mut plan = materialize_plan(plan);
        let mut warnings = Vec::new();
        let mut initial_objective = None;
        let mut optimized_objective = None;
        let mut optimizer_status = None;

        if !plan.objectives.is_empty() {
            info!(
                "Optimizing {} control-point weights against {} objectives",
                plan.total_control_points(),
                plan.objectives.len()
            );
            let influence = engine.compute_influence(&plan, ct, &options.cancel, &budget)?;
            if influence.status.is_complete() {
                let oracle = DoseOracle::new(
                    &influence.fields,
                    &plan.objectives,
                    structures,
                    plan.prescription.total_dose_gy,
                )?;
                let outcome = match self.config.optimization.algorithm {
                    OptimAlgorithm::Gradient => gradient::optimize(
                        &oracle,
                        &GradientSettings {
                            max_iterations: self.config.optimization.max_iterations,
                            convergence_threshold: self.config.optimization.convergence_threshold,
                            ..GradientSettings::default()
                        },
                        &options.cancel,
                        &budget,
                    )?,
                    OptimAlgorithm::Genetic => genetic::optimize(
                        &oracle,
                        &GeneticSettings {
                            population_size: self.config.optimization.population_size,
                            max_generations: self.config.optimization.max_iterations,
                            mutation_rate: self.config.optimization.mutation_rate,
                            crossover_rate: self.config.optimization.crossover_rate,
                            seed: options.seed,
                            ..GeneticSettings::default()
                        },
                        &options.cancel,
                        &budget,
                    )?,
                };
                debug!(
                    "Optimizer finished after {} iterations: {:?}",
                    outcome.iterations, outcome.status
                );
                if outcome.status == OptimStatus::MaxIterations {
                    warnings.push(format!(
                        "Optimizer stopped unconverged after {} iterations; best-so-far weights kept",
                        outcome.iterations
                    ));
                }
                plan.apply_weights(&outcome.weights)?;
                initial_objective = Some(outcome.initial_objective);
                optimized_objective = Some(outcome.final_objective);
                optimizer_status = Some(outcome.status);
            } else {
                let msg = "Influence computation interrupted; optimization skipped".to_string();
                warn!("{msg}");
                warnings.push(msg);
            }
        }

        let output = engine.compute_dose(&plan, ct, structures, &options.cancel, &budget)?;
        warnings.extend(output.warnings);
        let dose = output.dose;

        let mut dvhs = Vec::new();
        for structure in structures.iter() {
            match dvh(structure, &dose) {
                Ok(curve) => dvhs.push((structure.name.clone(), curve)),
                Err(EvalError::EmptyStructure(name)) => {
                    let msg = format!("Structure [{name}] has an empty mask; DVH skipped");
                    warn!("{msg}");
                    warnings.push(msg);
                }
                Err(source) => {
                    return Err(ControllerError::Dvh {
                        structure: structure.name.clone(),
                        source,
                    });
                }
            }
        }

        let metrics = structures.target().and_then(|ptv| {
            dvhs.iter()
                .find(|(name, _)| *name == ptv.name)
                .and_then(|(_, ptv_dvh)| {
                    plan_metrics(&dose, structures, ptv_dvh, plan.prescription.total_dose_gy)
                })
        });

        let final_objective = (!plan.objectives.is_empty())
            .then(|| rad_plan_optim::evaluate(&plan.objectives, &dose, structures));

        let bio = self.biological_indices(&plan, &dose, structures);

        Ok(PlanReport {
            dose,
            weights: plan.weights(),
            initial_objective,
            optimized_objective,
            final_objective,
            optimizer_status,
            dvhs,
            metrics,
            bio,
            status: output.status,
            warnings,
        })
    }

    /// BED/EQD2 from the mean structure dose plus EUD-based TCP (targets)
    /// and LKB NTCP (organs at risk).
    fn biological_indices(
        &self,
        plan: &Plan,
        dose: &Grid3<f32>,
        structures: &StructureSet,
    ) -> Vec<StructureBio> {
        let fractions = plan.prescription.fractions;
        let mut bio = Vec::new();
        for structure in structures.iter() {
            let doses: Vec<f64> = structure
                .voxel_indices()
                .iter()
                .map(|&i| dose.data()[i] as f64)
                .collect();
            if doses.is_empty() {
                continue;
            }
            let mean = doses.iter().sum::<f64>() / doses.len() as f64;
            let d_fx = mean / fractions as f64;
            if d_fx <= 0.0 {
                debug!(
                    "Structure [{}] receives no dose; biological indices skipped",
                    structure.name
                );
                continue;
            }
            let is_target = structure.role == StructureRole::Ptv;
            let ab = self.alpha_beta.alpha_beta(&structure.name, is_target);
            let (Ok(bed_gy), Ok(eqd2_gy)) =
                (bed(d_fx, fractions, ab), eqd2(d_fx, fractions, ab))
            else {
                continue;
            };
            let eud_n = if is_target { TARGET_EUD_N } else { OAR_EUD_N };
            let Ok(eud_gy) = eud(&doses, eud_n) else {
                continue;
            };
            let tcp = is_target
                .then(|| {
                    tcp_logistic(plan.prescription.total_dose_gy, TCP_GAMMA50, eud_gy).ok()
                })
                .flatten();
            let ntcp = (structure.role == StructureRole::Oar)
                .then(|| ntcp_lkb(NTCP_TD50_GY, NTCP_M, OAR_EUD_N, eud_gy).ok())
                .flatten();
            bio.push(StructureBio {
                structure: structure.name.clone(),
                alpha_beta_gy: ab,
                bed_gy,
                eqd2_gy,
                eud_gy,
                tcp,
                ntcp,
            });
        }
        bio
    }
}
