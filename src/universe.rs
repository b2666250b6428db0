//! Asset universe shared by both optimizers
//!
//! This module handles:
//! - Validating the shape of expected returns and covariance
//! - Evaluating the mean-variance objective `wᵗΣw − λ·μᵗw`
//! - Its gradient for the continuous solver

use crate::error::{PortfolioError, Result};
use nalgebra::{DMatrix, DVector};

/// Expected returns and covariance for an ordered set of assets.
///
/// The covariance is taken as given: no symmetry, PSD or conditioning
/// checks are applied, so a non-PSD matrix may make the problem non-convex.
#[derive(Debug, Clone)]
pub struct AssetUniverse {
    mu: DVector<f64>,
    cov: DMatrix<f64>,
}

impl AssetUniverse {
    pub fn new(mu: &[f64], cov: &[Vec<f64>]) -> Result<Self> {
        let n = mu.len();
        if n == 0 {
            return Err(PortfolioError::ShapeMismatch("asset universe is empty".to_string()));
        }
        if cov.len() != n {
            return Err(PortfolioError::ShapeMismatch(format!(
                "mu has {} entries but cov has {} rows",
                n,
                cov.len()
            )));
        }
        if let Some((row, values)) = cov.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(PortfolioError::ShapeMismatch(format!(
                "cov row {} has {} columns, expected {}",
                row,
                values.len(),
                n
            )));
        }

        Ok(Self {
            mu: DVector::from_column_slice(mu),
            cov: DMatrix::from_fn(n, n, |i, j| cov[i][j]),
        })
    }

    /// Number of assets (always at least one).
    pub fn len(&self) -> usize {
        self.mu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mu.is_empty()
    }

    pub fn mu(&self) -> &DVector<f64> {
        &self.mu
    }

    pub fn cov(&self) -> &DMatrix<f64> {
        &self.cov
    }

    /// Mean-variance objective `wᵗΣw − λ·μᵗw`, evaluated as a plain quadratic form.
    pub fn objective(&self, w: &DVector<f64>, lambda: f64) -> f64 {
        w.dot(&(&self.cov * w)) - lambda * self.mu.dot(w)
    }

    /// Gradient of [`objective`](Self::objective): `(Σ + Σᵗ)w − λμ`.
    pub fn gradient(&self, w: &DVector<f64>, lambda: f64) -> DVector<f64> {
        &self.cov * w + self.cov.tr_mul(w) - &self.mu * lambda
    }

    /// Objective of a 0/1 inclusion vector.
    pub fn selection_objective(&self, bits: &[u8], lambda: f64) -> f64 {
        let b = DVector::from_iterator(bits.len(), bits.iter().map(|&bit| f64::from(bit)));
        self.objective(&b, lambda)
    }

    /// Index of the largest expected return; the first index wins ties.
    pub fn best_return_index(&self) -> usize {
        let mut best = 0;
        for (i, &value) in self.mu.iter().enumerate().skip(1) {
            if value > self.mu[best] {
                best = i;
            }
        }
        best
    }
}

/// Risk aversion must be a finite, non-negative scalar.
pub fn validate_risk_aversion(lambda: f64) -> Result<()> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(PortfolioError::InvalidParameter {
            name: "lambda",
            reason: format!("must be finite and non-negative, got {}", lambda),
        });
    }
    Ok(())
}
