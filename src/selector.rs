//! Binary asset selection
//!
//! Picks a buy/skip vector `b` minimizing `bᵗΣb − λ·μᵗb`, phrased as a QUBO.
//! Two strategies answer the same problem:
//! - the layered eigen-solver in [`crate::qaoa`], when its backend is compiled in
//! - a seeded random search that always produces an answer
//!
//! The caller never picks the strategy and never sees an eigen-solver failure.

use crate::config::{BinaryConfig, SolverConfig};
use crate::error::{PortfolioError, Result};
use crate::qaoa::LayeredEigenSolver;
use crate::universe::{validate_risk_aversion, AssetUniverse};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Quadratic coefficients at or below this magnitude are left out of the QUBO.
pub const COEFFICIENT_CUTOFF: f64 = 1e-12;

// Backend presence is fixed at build time, so probe once per process.
static EXACT_BACKEND_PRESENT: Lazy<bool> = Lazy::new(|| {
    let present = cfg!(feature = "qaoa");
    if present {
        info!("eigen-solver backend available for binary selection");
    } else {
        info!("eigen-solver backend not compiled in - binary selection uses heuristic search");
    }
    present
});

pub fn exact_backend_available() -> bool {
    *EXACT_BACKEND_PRESENT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    EigenSolver,
    Heuristic,
}

/// A non-empty 0/1 inclusion vector and its objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinarySelection {
    pub selection: Vec<u8>,
    pub objective: f64,
    pub strategy: StrategyKind,
}

impl BinarySelection {
    pub fn selected_count(&self) -> usize {
        self.selection.iter().filter(|&&b| b == 1).count()
    }
}

/// Why the eigen-solver strategy could not answer a call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendUnavailable {
    #[error("eigen-solver backend is not compiled in")]
    NotCompiled,
    #[error("eigen-solver backend is disabled by configuration")]
    Disabled,
    #[error("{assets} assets exceed the {max_qubits}-qubit limit")]
    TooManyQubits { assets: usize, max_qubits: usize },
    #[error("{reps} layers exceed the {max_reps}-layer limit")]
    TooManyLayers { reps: usize, max_reps: usize },
    #[error("QUBO energies are not finite")]
    NonFiniteEnergy,
    #[error("no non-empty bitstring survived readout")]
    EmptyReadout,
}

/// `minimize Σ cᵢbᵢ + Σ_{i≤j} Qᵢⱼbᵢbⱼ` over `b ∈ {0,1}ⁿ`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuboProblem {
    pub linear: Vec<f64>,
    /// Upper-triangle entries `(i, j, Qᵢⱼ)` with `i ≤ j`
    pub quadratic: Vec<(usize, usize, f64)>,
}

impl QuboProblem {
    /// Linear term `cᵢ = −λμᵢ`, diagonal `Qᵢᵢ = Σᵢᵢ`. The off-diagonal pair
    /// `Σᵢⱼ + Σⱼᵢ` is folded into `Qᵢⱼ` (i < j) so the QUBO energy equals
    /// `bᵗΣb − λ·μᵗb` exactly; this is not the upper triangle `Σᵢⱼ` alone.
    ///
    /// [`COEFFICIENT_CUTOFF`] applies to the folded `|Qᵢⱼ|`, not to `|Σᵢⱼ|`:
    /// `Σᵢⱼ = 0.5, Σⱼᵢ = −0.5` drops the pair entirely.
    pub fn from_universe(universe: &AssetUniverse, lambda: f64) -> Self {
        let n = universe.len();
        let cov = universe.cov();
        let linear = universe.mu().iter().map(|m| -lambda * m).collect();

        let mut quadratic = Vec::new();
        for i in 0..n {
            for j in i..n {
                let q = if i == j { cov[(i, i)] } else { cov[(i, j)] + cov[(j, i)] };
                // NaN is kept so the eigen-solver sees it and bails out
                if q.is_nan() || q.abs() > COEFFICIENT_CUTOFF {
                    quadratic.push((i, j, q));
                }
            }
        }

        Self { linear, quadratic }
    }

    pub fn num_vars(&self) -> usize {
        self.linear.len()
    }

    /// Energy of the bitstring whose bit `i` is asset `i`.
    pub fn energy(&self, state: usize) -> f64 {
        let bit = |i: usize| (state >> i) & 1 == 1;
        let linear: f64 = self
            .linear
            .iter()
            .enumerate()
            .filter(|(i, _)| bit(*i))
            .map(|(_, c)| c)
            .sum();
        let quadratic: f64 = self
            .quadratic
            .iter()
            .filter(|(i, j, _)| bit(*i) && bit(*j))
            .map(|(_, _, q)| q)
            .sum();
        linear + quadratic
    }
}

/// Everything a strategy needs for one call.
#[derive(Debug, Clone)]
pub struct SelectionProblem<'a> {
    pub universe: &'a AssetUniverse,
    pub lambda: f64,
    pub reps: usize,
    pub qubo: QuboProblem,
}

impl<'a> SelectionProblem<'a> {
    pub fn new(universe: &'a AssetUniverse, lambda: f64, reps: usize) -> Self {
        Self {
            universe,
            lambda,
            reps,
            qubo: QuboProblem::from_universe(universe, lambda),
        }
    }
}

/// A way of solving the selection QUBO.
pub trait QuboStrategy {
    fn kind(&self) -> StrategyKind;

    fn solve(&self, problem: &SelectionProblem<'_>) -> std::result::Result<BinarySelection, BackendUnavailable>;
}

/// Capped Monte-Carlo search over random inclusion vectors.
///
/// Adequate only for very small universes: the sample budget does not grow with `n`.
#[derive(Debug, Clone)]
pub struct HeuristicSearch {
    seed: u64,
    max_samples: usize,
}

impl HeuristicSearch {
    pub fn new(config: &BinaryConfig) -> Self {
        Self {
            seed: config.seed,
            max_samples: config.max_samples,
        }
    }

    /// Draw `min(max_samples, 2ⁿ)` vectors from `rng` and keep the first one with
    /// the smallest objective. All-zero draws select the highest-return asset.
    pub fn search<R: Rng + ?Sized>(&self, problem: &SelectionProblem<'_>, rng: &mut R) -> BinarySelection {
        let universe = problem.universe;
        let n = universe.len();
        let fallback = universe.best_return_index();

        let mut best: Option<(Vec<u8>, f64)> = None;
        for _ in 0..sample_budget(self.max_samples, n) {
            let mut bits: Vec<u8> = (0..n).map(|_| u8::from(rng.gen::<bool>())).collect();
            if bits.iter().all(|&b| b == 0) {
                bits[fallback] = 1;
            }

            let objective = universe.selection_objective(&bits, problem.lambda);
            let improved = match &best {
                Some((_, best_objective)) => objective < *best_objective,
                None => true,
            };
            if improved {
                best = Some((bits, objective));
            }
        }

        // sample_budget is at least one, so a draw was always recorded
        let (selection, objective) = best.unwrap_or_else(|| {
            let mut bits = vec![0; n];
            bits[fallback] = 1;
            let objective = universe.selection_objective(&bits, problem.lambda);
            (bits, objective)
        });

        BinarySelection {
            selection,
            objective,
            strategy: StrategyKind::Heuristic,
        }
    }
}

impl QuboStrategy for HeuristicSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Heuristic
    }

    fn solve(&self, problem: &SelectionProblem<'_>) -> std::result::Result<BinarySelection, BackendUnavailable> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        Ok(self.search(problem, &mut rng))
    }
}

/// Number of heuristic draws: `min(max_samples, 2ⁿ)`, never zero.
pub fn sample_budget(max_samples: usize, n: usize) -> usize {
    let combinations = u32::try_from(n)
        .ok()
        .and_then(|bits| 1usize.checked_shl(bits))
        .unwrap_or(usize::MAX);
    max_samples.min(combinations).max(1)
}

/// Choose a binary selection of assets. Never returns an all-zero vector.
pub fn select_binary(mu: &[f64], cov: &[Vec<f64>], lambda: f64, reps: usize) -> Result<BinarySelection> {
    select_binary_with(mu, cov, lambda, reps, &SolverConfig::default())
}

pub fn select_binary_with(
    mu: &[f64],
    cov: &[Vec<f64>],
    lambda: f64,
    reps: usize,
    config: &SolverConfig,
) -> Result<BinarySelection> {
    validate_risk_aversion(lambda)?;
    if reps == 0 {
        return Err(PortfolioError::InvalidParameter {
            name: "reps",
            reason: "must be at least 1".to_string(),
        });
    }
    let universe = AssetUniverse::new(mu, cov)?;
    let problem = SelectionProblem::new(&universe, lambda, reps);
    Ok(select(&problem, &config.binary))
}

/// Try the eigen-solver, fall back to the heuristic on any failure.
pub fn select(problem: &SelectionProblem<'_>, config: &BinaryConfig) -> BinarySelection {
    let outcome = exact_strategy(config, problem.universe.len()).and_then(|solver| solver.solve(problem));

    let selection = match outcome {
        Ok(selection) => selection,
        Err(reason) => {
            match reason {
                BackendUnavailable::NotCompiled | BackendUnavailable::Disabled => {
                    debug!("using heuristic search: {}", reason)
                }
                _ => warn!("eigen-solver failed ({}) - falling back to heuristic search", reason),
            }
            let heuristic = HeuristicSearch::new(config);
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            heuristic.search(problem, &mut rng)
        }
    };

    debug!(
        "binary selection via {:?}: {} of {} assets, objective {:.6}",
        selection.strategy,
        selection.selected_count(),
        selection.selection.len(),
        selection.objective
    );
    selection
}

fn exact_strategy(config: &BinaryConfig, assets: usize) -> std::result::Result<LayeredEigenSolver, BackendUnavailable> {
    if !exact_backend_available() {
        return Err(BackendUnavailable::NotCompiled);
    }
    if !config.exact_backend {
        return Err(BackendUnavailable::Disabled);
    }
    LayeredEigenSolver::try_new(config, assets)
}
