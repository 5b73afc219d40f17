use crate::oracle::DoseOracle;
use crate::{OptimError, OptimStatus, OptimizerOutcome, project_weights};
use rad_plan_world::{CancelToken, RunBudget};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Settings of the genetic backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneticSettings {
    pub population_size: usize,
    pub max_generations: usize,
    /// Per-gene mutation probability.
    pub mutation_rate: f64,
    /// Per-child one-point crossover probability.
    pub crossover_rate: f64,
    /// Stop early once the best fitness drops below this.
    pub fitness_threshold: f64,
    pub seed: u64,
}

impl Default for GeneticSettings {
    fn default() -> Self {
        Self {
            population_size: 30,
            max_generations: 50,
            mutation_rate: 0.05,
            crossover_rate: 0.8,
            fitness_threshold: 1e-4,
            seed: 0,
        }
    }
}

const TOURNAMENT_SIZE: usize = 3;
const MUTATION_SPAN: f64 = 0.2;

/// Minimizes the objective with a seeded genetic search.
///
/// Fitness is the objective itself. Each generation keeps the best 10% as
/// elites and refills the population by tournament selection (k = 3),
/// one-point crossover, per-gene uniform mutation in `[−0.2, 0.2]` clamped to
/// `[0, 1]`, and simplex renormalization. The run is deterministic for a
/// given seed, and elitism makes the best fitness monotone non-increasing
/// over generations.
pub fn optimize(
    oracle: &DoseOracle<'_>,
    settings: &GeneticSettings,
    cancel: &CancelToken,
    budget: &RunBudget,
) -> Result<OptimizerOutcome, OptimError> {
    let n = oracle.n_weights();
    let pop_size = settings.population_size.max(2);
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);

    // Seed the population with the uniform vector plus random simplex points.
    let mut population: Vec<Vec<f64>> = Vec::with_capacity(pop_size);
    population.push(oracle.uniform_weights());
    while population.len() < pop_size {
        let mut w: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        project_weights(&mut w);
        population.push(w);
    }

    let mut fitness = evaluate_population(oracle, &population)?;
    let initial = best_of(&fitness).1;
    let mut status = OptimStatus::MaxIterations;
    let mut generations = 0usize;
    let mut history = Vec::new();

    for generation in 0..settings.max_generations {
        if cancel.is_cancelled() {
            status = OptimStatus::Cancelled;
            break;
        }
        if budget.expired() {
            status = OptimStatus::TimedOut;
            break;
        }
        generations = generation + 1;

        // Rank ascending by fitness (lower objective is fitter).
        let mut order: Vec<usize> = (0..pop_size).collect();
        order.sort_by(|&a, &b| fitness[a].partial_cmp(&fitness[b]).expect("finite fitness"));

        let elite_count = (pop_size / 10).max(1);
        let mut next: Vec<Vec<f64>> = order[..elite_count]
            .iter()
            .map(|&i| population[i].clone())
            .collect();

        while next.len() < pop_size {
            let p1 = tournament(&fitness, &mut rng);
            let p2 = tournament(&fitness, &mut rng);
            let mut child = if rng.gen_bool(settings.crossover_rate.clamp(0.0, 1.0)) {
                crossover(&population[p1], &population[p2], &mut rng)
            } else {
                population[p1].clone()
            };
            for gene in child.iter_mut() {
                if rng.gen_bool(settings.mutation_rate.clamp(0.0, 1.0)) {
                    *gene = (*gene + rng.gen_range(-MUTATION_SPAN..MUTATION_SPAN)).clamp(0.0, 1.0);
                }
            }
            project_weights(&mut child);
            next.push(child);
        }

        population = next;
        fitness = evaluate_population(oracle, &population)?;
        let best = best_of(&fitness).1;
        history.push(best);
        debug!("generation {generation}: best fitness {best:.6e}");
        if best < settings.fitness_threshold {
            status = OptimStatus::Converged;
            break;
        }
    }

    if status == OptimStatus::MaxIterations {
        warn!(
            "Genetic search did not reach the fitness threshold within {} generations",
            settings.max_generations
        );
    }

    let (best_idx, best_f) = best_of(&fitness);
    Ok(OptimizerOutcome {
        weights: population[best_idx].clone(),
        initial_objective: initial,
        final_objective: best_f.min(initial),
        iterations: generations,
        history,
        status,
    })
}

fn evaluate_population(
    oracle: &DoseOracle<'_>,
    population: &[Vec<f64>],
) -> Result<Vec<f64>, OptimError> {
    population
        .par_iter()
        .map(|w| oracle.evaluate(w))
        .collect()
}

fn best_of(fitness: &[f64]) -> (usize, f64) {
    let mut best = (0usize, f64::INFINITY);
    for (i, &f) in fitness.iter().enumerate() {
        if f < best.1 {
            best = (i, f);
        }
    }
    best
}

/// Tournament selection over `k` uniformly drawn individuals.
fn tournament(fitness: &[f64], rng: &mut ChaCha8Rng) -> usize {
    let mut winner = rng.gen_range(0..fitness.len());
    for _ in 1..TOURNAMENT_SIZE {
        let challenger = rng.gen_range(0..fitness.len());
        if fitness[challenger] < fitness[winner] {
            winner = challenger;
        }
    }
    winner
}

/// One-point crossover.
fn crossover(p1: &[f64], p2: &[f64], rng: &mut ChaCha8Rng) -> Vec<f64> {
    let n = p1.len();
    if n < 2 {
        return p1.to_vec();
    }
    let point = rng.gen_range(1..n);
    let mut child = Vec::with_capacity(n);
    child.extend_from_slice(&p1[..point]);
    child.extend_from_slice(&p2[point..]);
    child
}
