use crate::config::{ContinuousConfig, SolverConfig};
use crate::error::Result;
use crate::universe::{validate_risk_aversion, AssetUniverse};
use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// Spectral step lengths are kept within this factor of 1/L either way.
const STEP_RANGE: f64 = 1e6;
// Armijo constant for the non-monotone line search.
const SUFFICIENT_DECREASE: f64 = 1e-4;
// Number of recent objective values the line search compares against.
const NONMONOTONE_MEMORY: usize = 10;
// Consecutive steps without meaningful objective change before the iterate is
// taken as numerically stationary.
const STALL_WINDOW: usize = 5;

/// Continuous allocation over the assets of a universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousAllocation {
    /// Fraction of capital per asset, each in [0, 1], summing to 1
    pub weights: Vec<f64>,
    /// Achieved objective `wᵗΣw − λ·μᵗw`
    pub objective: f64,
    /// Whether the solver reached a stationary point within tolerance
    pub success: bool,
    /// Solver status message
    pub message: String,
    /// Projected-gradient iterations performed
    pub iterations: usize,
}

/// Termination reason of the projected-gradient solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Converged,
    IterationLimit,
    LineSearchStalled,
    NonFinite,
}

impl SolverStatus {
    pub fn message(&self) -> &'static str {
        match self {
            SolverStatus::Converged => "Optimization terminated successfully",
            SolverStatus::IterationLimit => "Iteration limit reached",
            SolverStatus::LineSearchStalled => "Line search could not make progress",
            SolverStatus::NonFinite => "Objective is not finite",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SolverStatus::Converged)
    }
}

/// Minimize `wᵗΣw − λ·μᵗw` subject to `Σw = 1` and `0 ≤ w ≤ 1`, starting
/// from the uniform allocation.
///
/// Only malformed input is an error. A solve that does not converge returns
/// `success = false` with the best iterate and a status message.
pub fn optimize_continuous(mu: &[f64], cov: &[Vec<f64>], lambda: f64) -> Result<ContinuousAllocation> {
    optimize_continuous_with(mu, cov, lambda, &SolverConfig::default())
}

pub fn optimize_continuous_with(
    mu: &[f64],
    cov: &[Vec<f64>],
    lambda: f64,
    config: &SolverConfig,
) -> Result<ContinuousAllocation> {
    validate_risk_aversion(lambda)?;
    let universe = AssetUniverse::new(mu, cov)?;
    Ok(solve(&universe, lambda, &config.continuous))
}

/// Spectral projected gradient on the probability simplex.
///
/// The simplex `{Σw = 1, w ≥ 0}` already implies `w ≤ 1`, so projecting onto
/// it keeps every iterate feasible. Step lengths follow Barzilai-Borwein and
/// the line search accepts any point below the worst of the last few
/// objectives. A single local solve from the uniform start; non-convex inputs
/// end at whichever stationary point it reaches.
///
/// Converged means the KKT residual is within `tolerance · max(1, ‖∇f‖∞)`, or
/// the objective stopped changing (relative to `objective_tolerance`) for
/// several consecutive steps.
pub fn solve(universe: &AssetUniverse, lambda: f64, config: &ContinuousConfig) -> ContinuousAllocation {
    let n = universe.len();
    let mut w = DVector::from_element(n, 1.0 / n as f64);
    let mut f = universe.objective(&w, lambda);
    let mut grad = universe.gradient(&w, lambda);

    let lipschitz = 2.0 * universe.cov().norm();
    let base_step = if lipschitz > 0.0 && lipschitz.is_finite() { 1.0 / lipschitz } else { 1.0 };
    let (min_alpha, max_alpha) = (base_step / STEP_RANGE, base_step * STEP_RANGE);
    let mut alpha = base_step;

    let mut recent = VecDeque::from([f]);
    let mut best = (w.clone(), f);
    let mut iterations = 0;
    let mut stalled_steps = 0;
    let status = loop {
        if !f.is_finite() {
            break SolverStatus::NonFinite;
        }
        let scale = grad.amax().max(1.0);
        if kkt_residual(&w, &grad) <= config.tolerance * scale || stalled_steps >= STALL_WINDOW {
            break SolverStatus::Converged;
        }
        if iterations >= config.max_iterations {
            break SolverStatus::IterationLimit;
        }
        iterations += 1;

        let direction = project_onto_simplex(&(&w - centered(&grad) * alpha)) - &w;
        let slope = grad.dot(&direction);
        let reference = recent.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut t = 1.0;
        let accepted = loop {
            let candidate = &w + &direction * t;
            let f_candidate = universe.objective(&candidate, lambda);
            let bound = reference + SUFFICIENT_DECREASE * t * slope;
            if f_candidate <= bound + f64::EPSILON * reference.abs().max(1.0) {
                break Some((candidate, f_candidate));
            }
            t *= 0.5;
            if t < config.min_step {
                break None;
            }
        };
        let Some((candidate, f_candidate)) = accepted else {
            break SolverStatus::LineSearchStalled;
        };

        let next_grad = universe.gradient(&candidate, lambda);
        let s = &candidate - &w;
        let y = &next_grad - &grad;
        let curvature = s.dot(&y);
        alpha = if curvature > 0.0 {
            (s.norm_squared() / curvature).clamp(min_alpha, max_alpha)
        } else {
            max_alpha
        };

        if (f - f_candidate).abs() <= config.objective_tolerance * f.abs().max(1.0) {
            stalled_steps += 1;
        } else {
            stalled_steps = 0;
        }

        recent.push_back(f_candidate);
        if recent.len() > NONMONOTONE_MEMORY {
            recent.pop_front();
        }
        w = candidate;
        f = f_candidate;
        grad = next_grad;
        if f < best.1 {
            best = (w.clone(), f);
        }
    };

    // Non-monotone steps can end above an earlier iterate when the solve is cut short
    if !status.is_success() && best.1 < f {
        (w, f) = best;
    }

    let weights: Vec<f64> = w.iter().map(|v| v.clamp(0.0, 1.0)).collect();
    if status.is_success() {
        debug!("continuous solve converged after {} iterations, objective {:.6}", iterations, f);
    } else {
        warn!("continuous solve stopped after {} iterations: {}", iterations, status.message());
    }

    ContinuousAllocation {
        weights,
        objective: f,
        success: status.is_success(),
        message: status.message().to_string(),
        iterations,
    }
}

/// Infinity norm of the projected-gradient step `w − P(w − ∇f)`; zero exactly at KKT points.
fn kkt_residual(w: &DVector<f64>, grad: &DVector<f64>) -> f64 {
    (w - project_onto_simplex(&(w - centered(grad)))).amax()
}

// The simplex projection ignores a common shift, so dropping the mean keeps
// large steps from eating into precision.
fn centered(grad: &DVector<f64>) -> DVector<f64> {
    grad.add_scalar(-grad.mean())
}

/// Euclidean projection onto the probability simplex (sort and threshold).
pub fn project_onto_simplex(v: &DVector<f64>) -> DVector<f64> {
    let mut sorted: Vec<f64> = v.iter().copied().collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, &u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (j + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }

    v.map(|x| (x - theta).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity(n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect()
    }

    fn assert_feasible(weights: &[f64]) {
        let total: f64 = weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-6, "weights sum to {}", total);
        for w in weights {
            assert!((0.0..=1.0).contains(w), "weight out of bounds: {}", w);
        }
    }

    #[test]
    fn test_projection_onto_simplex() {
        let p = project_onto_simplex(&DVector::from_vec(vec![0.025, 0.05, 0.0125]));
        let shift = (1.0 - 0.0875) / 3.0;
        assert_relative_eq!(p[0], 0.025 + shift, epsilon = 1e-12);
        assert_relative_eq!(p[1], 0.05 + shift, epsilon = 1e-12);
        assert_relative_eq!(p[2], 0.0125 + shift, epsilon = 1e-12);

        let p = project_onto_simplex(&DVector::from_vec(vec![3.0, -1.0, 0.5]));
        assert_eq!(p.as_slice(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_identity_covariance_closed_form() {
        let mu = [0.1, 0.2, 0.05];
        let result = optimize_continuous(&mu, &identity(3), 0.5).unwrap();
        assert!(result.success, "{}", result.message);
        assert_feasible(&result.weights);

        // KKT with Σ = I: w_i = 1/3 + λ/2 · (μ_i − mean μ)
        let mean = mu.iter().sum::<f64>() / 3.0;
        for (w, m) in result.weights.iter().zip(mu) {
            assert_relative_eq!(*w, 1.0 / 3.0 + 0.25 * (m - mean), epsilon = 1e-6);
        }
        assert!(result.weights[1] > result.weights[0]);
        assert!(result.weights[0] > result.weights[2]);
    }

    #[test]
    fn test_correlated_universe_converges() {
        // Σ = AAᵗ with strongly correlated assets
        let a = [[0.9, -0.3, 0.2], [0.1, 0.8, -0.5], [0.4, 0.4, 0.1]];
        let cov: Vec<Vec<f64>> = (0..3)
            .map(|i| (0..3).map(|j| (0..3).map(|k| a[i][k] * a[j][k]).sum()).collect())
            .collect();
        let mu = [-0.167, 0.161, -0.125];
        let result = optimize_continuous(&mu, &cov, 1.0).unwrap();
        assert!(result.success, "{}", result.message);
        assert!(result.iterations < SolverConfig::default().continuous.max_iterations);
        assert_feasible(&result.weights);

        let universe = AssetUniverse::new(&mu, &cov).unwrap();
        let mut grid_best = f64::INFINITY;
        for i in 0..=200 {
            for j in 0..=(200 - i) {
                let w = DVector::from_vec(vec![i as f64 / 200.0, j as f64 / 200.0, (200 - i - j) as f64 / 200.0]);
                grid_best = grid_best.min(universe.objective(&w, 1.0));
            }
        }
        assert!(result.objective <= grid_best + 1e-9, "{} vs grid {}", result.objective, grid_best);
    }

    #[test]
    fn test_zero_inputs_keep_uniform_start() {
        let zeros = vec![vec![0.0; 4]; 4];
        let result = optimize_continuous(&[0.0; 4], &zeros, 2.0).unwrap();
        assert!(result.success);
        assert_eq!(result.iterations, 0);
        assert_relative_eq!(result.objective, 0.0);
        for w in &result.weights {
            assert_relative_eq!(*w, 0.25);
        }
    }

    #[test]
    fn test_single_asset_takes_everything() {
        let result = optimize_continuous(&[0.3], &[vec![0.04]], 1.0).unwrap();
        assert!(result.success);
        assert_eq!(result.weights, vec![1.0]);
        assert_relative_eq!(result.objective, 0.04 - 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_objective_reaches_vertex() {
        let zeros = vec![vec![0.0; 2]; 2];
        let result = optimize_continuous(&[0.1, 0.2], &zeros, 1.0).unwrap();
        assert!(result.success, "{}", result.message);
        assert_relative_eq!(result.weights[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(result.weights[1], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_concave_problem_stays_feasible() {
        let neg = vec![vec![-1.0, 0.0], vec![0.0, -1.0]];
        let result = optimize_continuous(&[0.1, 0.0], &neg, 1.0).unwrap();
        assert!(result.success, "{}", result.message);
        assert_feasible(&result.weights);
        assert_relative_eq!(result.weights[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(result.objective, -1.1, epsilon = 1e-9);
    }

    #[test]
    fn test_iteration_limit_reports_failure() {
        let mut config = SolverConfig::default();
        config.continuous.max_iterations = 0;
        let result = optimize_continuous_with(&[0.1, 0.2, 0.05], &identity(3), 0.5, &config).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Iteration limit reached");
        assert_feasible(&result.weights);
    }

    #[test]
    fn test_non_finite_objective_reports_failure() {
        let cov = vec![vec![f64::INFINITY, 0.0], vec![0.0, 1.0]];
        let result = optimize_continuous(&[0.1, 0.2], &cov, 0.5).unwrap();
        assert!(!result.success);
        assert_eq!(result.message, SolverStatus::NonFinite.message());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(optimize_continuous(&[0.1, 0.2], &identity(3), 0.5).is_err());
        assert!(optimize_continuous(&[0.1, 0.2], &identity(2), -1.0).is_err());
    }
}
