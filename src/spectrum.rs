//! Frequency-domain features of a price or return series.

use crate::error::{PortfolioError, Result};
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Shortest series accepted.
pub const MIN_SAMPLES: usize = 8;
/// Upper edge (exclusive) of the low band, in cycles per sample.
pub const LOW_BAND_EDGE: f64 = 0.1;
/// Upper edge (exclusive) of the mid band; everything above up to Nyquist is high.
pub const MID_BAND_EDGE: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralFeatures {
    /// Bin frequencies `k / m`, `⌊m/2⌋ + 1` entries
    pub freqs: Vec<f64>,
    /// `|X_k| / m` per bin
    pub magnitude: Vec<f64>,
    pub stats: SpectrumStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumStats {
    pub n: usize,
    /// Sum of squared magnitudes
    pub total_energy: f64,
    pub band_energy: BandEnergy,
}

/// Sum of magnitudes per frequency band.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergy {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl BandEnergy {
    fn add(&mut self, freq: f64, magnitude: f64) {
        if freq < LOW_BAND_EDGE {
            self.low += magnitude;
        } else if freq < MID_BAND_EDGE {
            self.mid += magnitude;
        } else {
            self.high += magnitude;
        }
    }
}

/// One-sided magnitude spectrum of the de-meaned series plus summary stats.
///
/// `NaN` samples count as missing: they are left out of the mean and sit at
/// zero after de-meaning.
pub fn extract_spectrum(series: &[f64]) -> Result<SpectralFeatures> {
    let m = series.len();
    if m < MIN_SAMPLES {
        return Err(PortfolioError::InsufficientData {
            required: MIN_SAMPLES,
            actual: m,
        });
    }

    let mut buffer: Vec<Complex64> = demean(series).into_iter().map(|x| Complex64::new(x, 0.0)).collect();
    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(m).process(&mut buffer);

    let bins = m / 2 + 1;
    let length = m as f64;
    let magnitude: Vec<f64> = buffer[..bins].iter().map(|c| c.norm() / length).collect();
    let freqs: Vec<f64> = (0..bins).map(|k| k as f64 / length).collect();

    let mut band_energy = BandEnergy::default();
    for (&freq, &mag) in freqs.iter().zip(&magnitude) {
        band_energy.add(freq, mag);
    }
    let total_energy = magnitude.iter().map(|x| x * x).sum();

    Ok(SpectralFeatures {
        freqs,
        magnitude,
        stats: SpectrumStats {
            n: m,
            total_energy,
            band_energy,
        },
    })
}

fn demean(series: &[f64]) -> Vec<f64> {
    let (sum, count) = series
        .iter()
        .filter(|x| !x.is_nan())
        .fold((0.0, 0usize), |(sum, count), x| (sum + x, count + 1));
    let mean = if count > 0 { sum / count as f64 } else { 0.0 };

    series
        .iter()
        .map(|x| if x.is_nan() { 0.0 } else { x - mean })
        .collect()
}
