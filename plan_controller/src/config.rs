use rad_plan_dose_engine::Algorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("dose_calculation.resolution_mm must be positive, got {0}")]
    InvalidResolution(f64),
    #[error("dose_calculation.threads must be at least 1")]
    InvalidThreads,
    #[error("optimization.max_iterations must be at least 1")]
    InvalidMaxIterations,
    #[error("optimization.convergence_threshold must be positive, got {0}")]
    InvalidConvergenceThreshold(f64),
    #[error("optimization.population_size must be at least 2")]
    InvalidPopulationSize,
    #[error("optimization.{0} must lie in [0, 1], got {1}")]
    InvalidRate(&'static str, f64),
    #[error("monte_carlo.num_particles_per_iteration must be at least 1")]
    InvalidParticleCount,
    #[error("monte_carlo.target_uncertainty must be positive, got {0}")]
    InvalidTargetUncertainty(f64),
    #[error("monte_carlo.max_iterations must be at least 1")]
    InvalidMonteCarloIterations,
}

/// Weight-optimization backend.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimAlgorithm {
    #[default]
    Gradient,
    Genetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DoseCalculationConfig {
    pub algorithm: Algorithm,
    /// Dose-grid resolution in mm; omitted means the CT grid resolution.
    pub resolution_mm: Option<f64>,
    /// Worker threads; omitted means one per core.
    pub threads: Option<usize>,
    /// Two-column HU/density anchor file; omitted means the built-in table.
    pub hu_to_density_table: Option<PathBuf>,
}

impl Default for DoseCalculationConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::CollapsedCone,
            resolution_mm: None,
            threads: None,
            hu_to_density_table: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizationConfig {
    pub algorithm: OptimAlgorithm,
    pub max_iterations: usize,
    pub convergence_threshold: f64,
    /// Genetic backend only.
    pub population_size: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            algorithm: OptimAlgorithm::Gradient,
            max_iterations: 200,
            convergence_threshold: 1e-5,
            population_size: 30,
            mutation_rate: 0.05,
            crossover_rate: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonteCarloConfig {
    pub num_particles_per_iteration: usize,
    pub target_uncertainty: f64,
    pub max_iterations: usize,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            num_particles_per_iteration: 20_000,
            target_uncertainty: 0.02,
            max_iterations: 20,
        }
    }
}

/// The recognized configuration surface of the planning engine.
///
/// Every field has a default, so an empty document is a valid configuration.
/// Unknown keys and unknown algorithm names fail at parse time; range
/// violations fail in [`EngineConfig::validate`]. Both are fatal at setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub dose_calculation: DoseCalculationConfig,
    pub optimization: OptimizationConfig,
    pub monte_carlo: MonteCarloConfig,
}

impl EngineConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(res) = self.dose_calculation.resolution_mm {
            if !(res.is_finite() && res > 0.0) {
                return Err(ConfigError::InvalidResolution(res));
            }
        }
        if self.dose_calculation.threads == Some(0) {
            return Err(ConfigError::InvalidThreads);
        }
        let opt = &self.optimization;
        if opt.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations);
        }
        if !(opt.convergence_threshold.is_finite() && opt.convergence_threshold > 0.0) {
            return Err(ConfigError::InvalidConvergenceThreshold(
                opt.convergence_threshold,
            ));
        }
        if opt.population_size < 2 {
            return Err(ConfigError::InvalidPopulationSize);
        }
        if !(0.0..=1.0).contains(&opt.mutation_rate) {
            return Err(ConfigError::InvalidRate("mutation_rate", opt.mutation_rate));
        }
        if !(0.0..=1.0).contains(&opt.crossover_rate) {
            return Err(ConfigError::InvalidRate(
                "crossover_rate",
                opt.crossover_rate,
            ));
        }
        let mc = &self.monte_carlo;
        if mc.num_particles_per_iteration == 0 {
            return Err(ConfigError::InvalidParticleCount);
        }
        if !(mc.target_uncertainty.is_finite() && mc.target_uncertainty > 0.0) {
            return Err(ConfigError::InvalidTargetUncertainty(mc.target_uncertainty));
        }
        if mc.max_iterations == 0 {
            return Err(ConfigError::InvalidMonteCarloIterations);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.dose_calculation.algorithm, Algorithm::CollapsedCone);
        assert_eq!(config.optimization.algorithm, OptimAlgorithm::Gradient);
    }

    #[test]
    fn test_full_document_round_trip() {
        let text = r#"
[dose_calculation]
algorithm = "pencil_beam"
resolution_mm = 2.5
threads = 8

[optimization]
algorithm = "genetic"
max_iterations = 120
convergence_threshold = 1e-6
population_size = 40
mutation_rate = 0.1
crossover_rate = 0.7

[monte_carlo]
num_particles_per_iteration = 50000
target_uncertainty = 0.01
max_iterations = 10
"#;
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.dose_calculation.algorithm, Algorithm::PencilBeam);
        assert_eq!(config.dose_calculation.resolution_mm, Some(2.5));
        assert_eq!(config.dose_calculation.threads, Some(8));
        assert_eq!(config.optimization.algorithm, OptimAlgorithm::Genetic);
        assert_eq!(config.optimization.population_size, 40);
        assert_eq!(config.monte_carlo.num_particles_per_iteration, 50_000);
    }

    #[test]
    fn test_unknown_algorithm_is_fatal() {
        let err = EngineConfig::from_toml_str("[dose_calculation]\nalgorithm = \"magic\"\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
        let err = EngineConfig::from_toml_str("[optimization]\nalgorithm = \"annealing\"\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_key_is_fatal() {
        let err = EngineConfig::from_toml_str("[dose_calculation]\nalgorthm = \"aaa\"\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_out_of_range_values() {
        let err = EngineConfig::from_toml_str("[dose_calculation]\nresolution_mm = -1.0\n");
        assert!(matches!(err, Err(ConfigError::InvalidResolution(_))));
        let err = EngineConfig::from_toml_str("[dose_calculation]\nthreads = 0\n");
        assert!(matches!(err, Err(ConfigError::InvalidThreads)));
        let err = EngineConfig::from_toml_str("[optimization]\nmutation_rate = 1.5\n");
        assert!(matches!(err, Err(ConfigError::InvalidRate("mutation_rate", _))));
        let err = EngineConfig::from_toml_str("[monte_carlo]\ntarget_uncertainty = 0.0\n");
        assert!(matches!(err, Err(ConfigError::InvalidTargetUncertainty(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "[dose_calculation]").unwrap();
        writeln!(file, "algorithm = \"aaa\"").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.dose_calculation.algorithm, Algorithm::Aaa);
    }
}
