//! Portfolio decision support: long-only mean-variance allocation, binary
//! asset selection over a QUBO, and spectral features of return series.

pub mod config;
pub mod error;
pub mod input;
pub mod portfolio;
pub mod qaoa;
pub mod selector;
pub mod service;
pub mod spectrum;
pub mod universe;

pub use config::SolverConfig;
pub use error::{PortfolioError, Result};
pub use portfolio::{optimize_continuous, optimize_continuous_with, ContinuousAllocation};
pub use selector::{select_binary, select_binary_with, BinarySelection, StrategyKind};
pub use spectrum::{extract_spectrum, SpectralFeatures};
