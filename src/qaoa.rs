//! Layered variational eigen-solver for the selection QUBO
//!
//! The QUBO Hamiltonian is diagonal in the computational basis, so the state
//! is a plain vector of `2ⁿ` amplitudes. Each layer applies a phase separation
//! by the (normalized) energy followed by a transverse-field mixer. SPSA tunes
//! the layer angles against the expected energy.
//!
//! The readout keeps the lowest-energy non-empty bitstring whose probability is
//! above `amplitude_cutoff`. After a few layers nearly every basis state clears
//! that cutoff, so in practice the readout scans all `2ⁿ` states and the answer
//! is the exact non-empty minimum whatever `reps` and the tuned angles are.
//! Layer depth and tuning decide which states carry weight, not which one wins.

use crate::config::BinaryConfig;
use crate::selector::{BackendUnavailable, BinarySelection, QuboStrategy, SelectionProblem, StrategyKind};
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustfft::num_complex::Complex64;

/// Hard cap on SPSA iterations, whatever the configuration says.
pub const MAX_SPSA_ITERATIONS: usize = 20;
/// Hard cap on qubits; 2^24 amplitudes is already 256 MiB.
pub const MAX_SUPPORTED_QUBITS: usize = 24;
/// Hard cap on layers; each SPSA evaluation costs `reps · n · 2ⁿ`.
pub const MAX_SUPPORTED_LAYERS: usize = 64;

// SPSA gain schedule: a_k = A / (k+1)^ALPHA, c_k = C / (k+1)^GAMMA
const SPSA_A: f64 = 0.2;
const SPSA_C: f64 = 0.1;
const SPSA_ALPHA: f64 = 0.602;
const SPSA_GAMMA: f64 = 0.101;

// Starting angles follow a linear ramp up to this value
const RAMP_ANGLE: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct LayeredEigenSolver {
    max_reps: usize,
    spsa_iterations: usize,
    amplitude_cutoff: f64,
    seed: u64,
}

impl LayeredEigenSolver {
    pub fn try_new(config: &BinaryConfig, assets: usize) -> Result<Self, BackendUnavailable> {
        let max_qubits = config.max_qubits.min(MAX_SUPPORTED_QUBITS);
        if assets > max_qubits {
            return Err(BackendUnavailable::TooManyQubits { assets, max_qubits });
        }

        Ok(Self {
            max_reps: config.max_reps.min(MAX_SUPPORTED_LAYERS),
            spsa_iterations: config.spsa_iterations.min(MAX_SPSA_ITERATIONS),
            amplitude_cutoff: config.amplitude_cutoff,
            seed: config.seed,
        })
    }

    /// Expected normalized energy of the state prepared by `angles`.
    fn expectation(energies: &[f64], n: usize, angles: &[f64]) -> f64 {
        prepare_state(energies, n, angles)
            .iter()
            .zip(energies)
            .map(|(a, e)| a.norm_sqr() * e)
            .sum()
    }

    /// SPSA over `[γ₁..γₚ, β₁..βₚ]`, returning the best angles evaluated.
    fn tune(&self, energies: &[f64], n: usize, reps: usize) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut theta = initial_angles(reps);
        let mut best_value = Self::expectation(energies, n, &theta);
        let mut best = theta.clone();

        for k in 0..self.spsa_iterations {
            let step = (k + 1) as f64;
            let a_k = SPSA_A / step.powf(SPSA_ALPHA);
            let c_k = SPSA_C / step.powf(SPSA_GAMMA);

            let delta: Vec<f64> = (0..theta.len())
                .map(|_| if rng.gen::<bool>() { 1.0 } else { -1.0 })
                .collect();
            let plus: Vec<f64> = theta.iter().zip(&delta).map(|(t, d)| t + c_k * d).collect();
            let minus: Vec<f64> = theta.iter().zip(&delta).map(|(t, d)| t - c_k * d).collect();
            let slope =
                (Self::expectation(energies, n, &plus) - Self::expectation(energies, n, &minus)) / (2.0 * c_k);

            // delta entries are ±1, so dividing by them is multiplying
            for (t, d) in theta.iter_mut().zip(&delta) {
                *t -= a_k * slope * d;
            }

            let value = Self::expectation(energies, n, &theta);
            if value < best_value {
                best_value = value;
                best = theta.clone();
            }
        }

        debug!("SPSA finished: expected normalized energy {:.6}", best_value);
        best
    }
}

impl QuboStrategy for LayeredEigenSolver {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EigenSolver
    }

    fn solve(&self, problem: &SelectionProblem<'_>) -> Result<BinarySelection, BackendUnavailable> {
        let n = problem.qubo.num_vars();
        if n > MAX_SUPPORTED_QUBITS {
            return Err(BackendUnavailable::TooManyQubits {
                assets: n,
                max_qubits: MAX_SUPPORTED_QUBITS,
            });
        }
        if problem.reps > self.max_reps {
            return Err(BackendUnavailable::TooManyLayers {
                reps: problem.reps,
                max_reps: self.max_reps,
            });
        }
        let dim = 1usize << n;

        let energies: Vec<f64> = (0..dim).map(|state| problem.qubo.energy(state)).collect();
        if energies.iter().any(|e| !e.is_finite()) {
            return Err(BackendUnavailable::NonFiniteEnergy);
        }

        // Keep phases in a sane range whatever the scale of Σ and μ
        let scale = energies.iter().fold(0.0_f64, |m, e| m.max(e.abs()));
        let normalized: Vec<f64> = if scale > 0.0 {
            energies.iter().map(|e| e / scale).collect()
        } else {
            energies.clone()
        };

        let angles = self.tune(&normalized, n, problem.reps);
        let state = prepare_state(&normalized, n, &angles);

        // index 0 is the empty selection and is never a candidate
        let mut chosen: Option<(usize, f64)> = None;
        for (index, amplitude) in state.iter().enumerate().skip(1) {
            if amplitude.norm_sqr() <= self.amplitude_cutoff {
                continue;
            }
            let energy = energies[index];
            if chosen.map_or(true, |(_, best)| energy < best) {
                chosen = Some((index, energy));
            }
        }
        let (index, _) = chosen.ok_or(BackendUnavailable::EmptyReadout)?;

        let selection: Vec<u8> = (0..n).map(|i| ((index >> i) & 1) as u8).collect();
        let objective = problem.universe.selection_objective(&selection, problem.lambda);
        Ok(BinarySelection {
            selection,
            objective,
            strategy: StrategyKind::EigenSolver,
        })
    }
}

/// Linear ramp: phase angles grow and mixer angles shrink layer by layer.
fn initial_angles(reps: usize) -> Vec<f64> {
    let p = reps as f64;
    let gammas = (0..reps).map(|l| RAMP_ANGLE * (l + 1) as f64 / p);
    let betas = (0..reps).map(|l| RAMP_ANGLE * (reps - l) as f64 / p);
    gammas.chain(betas).collect()
}

/// Uniform superposition evolved through `angles.len() / 2` layers.
fn prepare_state(energies: &[f64], n: usize, angles: &[f64]) -> Vec<Complex64> {
    let dim = energies.len();
    let reps = angles.len() / 2;
    let mut state = vec![Complex64::new(1.0 / (dim as f64).sqrt(), 0.0); dim];

    for layer in 0..reps {
        let (gamma, beta) = (angles[layer], angles[reps + layer]);

        for (amplitude, &energy) in state.iter_mut().zip(energies) {
            *amplitude *= Complex64::from_polar(1.0, -gamma * energy);
        }

        // exp(-iβX) on every qubit
        let cos = Complex64::new(beta.cos(), 0.0);
        let sin = Complex64::new(0.0, -beta.sin());
        for qubit in 0..n {
            let mask = 1usize << qubit;
            for index in (0..dim).filter(|i| i & mask == 0) {
                let (a0, a1) = (state[index], state[index | mask]);
                state[index] = cos * a0 + sin * a1;
                state[index | mask] = sin * a0 + cos * a1;
            }
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::AssetUniverse;
    use approx::assert_relative_eq;

    fn solver() -> LayeredEigenSolver {
        LayeredEigenSolver::try_new(&BinaryConfig::default(), 3).unwrap()
    }

    #[test]
    fn test_state_stays_normalized() {
        let energies = [0.0, -0.3, 0.5, 1.0, -1.0, 0.2, 0.7, -0.4];
        let state = prepare_state(&energies, 3, &[0.4, 1.1, 0.9, 0.3]);
        let total: f64 = state.iter().map(|a| a.norm_sqr()).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_angles_keep_uniform_superposition() {
        let energies = [0.0, 1.0, -1.0, 0.5];
        let state = prepare_state(&energies, 2, &[0.0, 0.0]);
        for a in state {
            assert_relative_eq!(a.norm_sqr(), 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_initial_angles_ramp() {
        let angles = initial_angles(2);
        assert_eq!(angles.len(), 4);
        assert_relative_eq!(angles[0], 0.4);
        assert_relative_eq!(angles[1], 0.8);
        assert_relative_eq!(angles[2], 0.8);
        assert_relative_eq!(angles[3], 0.4);
    }

    #[test]
    fn test_rejects_oversized_universe() {
        let config = BinaryConfig {
            max_qubits: 4,
            ..BinaryConfig::default()
        };
        let err = LayeredEigenSolver::try_new(&config, 5).unwrap_err();
        assert_eq!(err, BackendUnavailable::TooManyQubits { assets: 5, max_qubits: 4 });

        let config = BinaryConfig {
            max_qubits: 64,
            ..BinaryConfig::default()
        };
        assert!(LayeredEigenSolver::try_new(&config, 30).is_err());
    }

    #[test]
    fn test_too_many_layers_is_reported() {
        let config = BinaryConfig {
            max_reps: 3,
            ..BinaryConfig::default()
        };
        let universe = AssetUniverse::new(&[0.1], &[vec![1.0]]).unwrap();
        let solver = LayeredEigenSolver::try_new(&config, 1).unwrap();

        let problem = SelectionProblem::new(&universe, 0.5, 4);
        assert_eq!(
            solver.solve(&problem).unwrap_err(),
            BackendUnavailable::TooManyLayers { reps: 4, max_reps: 3 }
        );

        let problem = SelectionProblem::new(&universe, 0.5, usize::MAX);
        assert!(solver.solve(&problem).is_err());
    }

    #[test]
    fn test_layer_limit_is_capped() {
        let config = BinaryConfig {
            max_reps: usize::MAX,
            ..BinaryConfig::default()
        };
        let solver = LayeredEigenSolver::try_new(&config, 2).unwrap();
        assert_eq!(solver.max_reps, MAX_SUPPORTED_LAYERS);
    }

    #[test]
    fn test_spsa_iterations_are_capped() {
        let config = BinaryConfig {
            spsa_iterations: 500,
            ..BinaryConfig::default()
        };
        let solver = LayeredEigenSolver::try_new(&config, 2).unwrap();
        assert_eq!(solver.spsa_iterations, MAX_SPSA_ITERATIONS);
    }

    #[test]
    fn test_never_returns_empty_selection() {
        // every non-empty selection costs more than selecting nothing
        let universe = AssetUniverse::new(&[-1.0, -1.0], &[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let problem = SelectionProblem::new(&universe, 0.5, 1);
        let result = solver().solve(&problem).unwrap();
        assert_eq!(result.selection, vec![1, 0]);
        assert_relative_eq!(result.objective, 1.5);
    }

    #[test]
    fn test_non_finite_energy_is_reported() {
        let cov = vec![vec![f64::NAN, 0.0], vec![0.0, 1.0]];
        let universe = AssetUniverse::new(&[0.1, 0.2], &cov).unwrap();
        let problem = SelectionProblem::new(&universe, 0.5, 1);
        assert_eq!(solver().solve(&problem).unwrap_err(), BackendUnavailable::NonFiniteEnergy);
    }

    #[test]
    fn test_solve_is_deterministic() {
        let cov = vec![vec![0.1, 0.03, 0.0], vec![0.03, 0.2, 0.0], vec![0.0, 0.0, 0.05]];
        let universe = AssetUniverse::new(&[0.2, 0.25, 0.02], &cov).unwrap();
        let problem = SelectionProblem::new(&universe, 1.5, 3);
        let first = solver().solve(&problem).unwrap();
        let second = solver().solve(&problem).unwrap();
        assert_eq!(first.selection, second.selection);
        assert_eq!(first.objective, second.objective);
    }
}
