use crate::error::{PortfolioError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Solver settings for every optimizer in the crate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub continuous: ContinuousConfig,
    pub binary: BinaryConfig,
}

/// Settings for the continuous mean-variance solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousConfig {
    /// Maximum projected-gradient iterations
    pub max_iterations: usize,
    /// KKT residual (infinity norm), relative to `max(1, ‖∇f‖∞)`, accepted as converged
    pub tolerance: f64,
    /// Relative objective decrease below which an accepted step counts as no progress
    pub objective_tolerance: f64,
    /// Line search gives up once its step fraction falls below this
    pub min_step: f64,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-6,
            objective_tolerance: 1e-12,
            min_step: 1e-16,
        }
    }
}

/// Settings for the binary selector and its two strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    /// Allow the eigen-solver strategy when the backend is compiled in
    pub exact_backend: bool,
    /// Largest universe handed to the eigen-solver (statevector holds 2^n amplitudes)
    pub max_qubits: usize,
    /// Most layers handed to the eigen-solver (capped at 64); deeper requests use the heuristic
    pub max_reps: usize,
    /// SPSA iterations tuning the layer angles (capped at 20)
    pub spsa_iterations: usize,
    /// Readout ignores bitstrings with probability at or below this
    pub amplitude_cutoff: f64,
    /// Seed for the heuristic draws and the SPSA perturbations
    pub seed: u64,
    /// Sample budget of the heuristic search
    pub max_samples: usize,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            exact_backend: true,
            max_qubits: 16,
            max_reps: 16,
            spsa_iterations: 20,
            amplitude_cutoff: 1e-12,
            seed: 42,
            max_samples: 16,
        }
    }
}

impl SolverConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            PortfolioError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json(&contents)
            .map_err(|e| PortfolioError::Config(format!("failed to parse '{}': {}", path.display(), e)))
    }

    /// Load a config from `path`. If missing or invalid, returns the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{} - using default solver settings", e);
                Self::default()
            }
        }
    }

    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
