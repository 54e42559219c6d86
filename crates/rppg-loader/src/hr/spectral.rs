//! Spectral heart rate for pulsatile signals without discrete beats.
//!
//! The window is z-normalized, transformed into a single-segment Welch PSD
//! and the dominant in-band frequency refined with its two neighbours.

use ndarray::Array1;
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;

use crate::config::HrConfig;
use crate::error::{LoaderError, Result};

/// Overlap ratio of the Welch estimate. A single segment spans the whole
/// window so it has no effect on the result.
pub const WELCH_OVERLAP: f64 = 0.5;

/// One-sided power spectral density.
#[derive(Debug, Clone, PartialEq)]
pub struct Psd {
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
}

/// Zero mean, unit variance; `epsilon` guards constant windows.
pub fn normalize(signal: &[f64], epsilon: f64) -> Array1<f64> {
    let x = Array1::from(signal.to_vec());
    let mean = x.mean().unwrap_or(0.0);
    let std = x.std(0.0);
    (x - mean) / (std + epsilon)
}

/// Periodic Hann window, as used for spectral estimation.
fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// Welch PSD with one Hann segment covering the whole signal, constant
/// detrend and density scaling.
pub fn welch_single_segment(signal: &[f64], sample_rate: f64) -> Result<Psd> {
    let n = signal.len();
    if n == 0 {
        return Err(LoaderError::InvalidArgument("empty signal".into()));
    }
    if !(sample_rate > 0.0) {
        return Err(LoaderError::InvalidArgument(format!(
            "sample rate must be positive, got {}",
            sample_rate
        )));
    }

    let mean = signal.iter().sum::<f64>() / n as f64;
    let window = hann(n);
    let window_power: f64 = window.iter().map(|w| w * w).sum();

    let mut buffer: Vec<Complex64> = signal
        .iter()
        .zip(&window)
        .map(|(x, w)| Complex64::new((x - mean) * w, 0.0))
        .collect();
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    let bins = n / 2 + 1;
    // a zero-energy window (n == 1) leaves window_power at 0
    let scale = if window_power > 0.0 {
        1.0 / (sample_rate * window_power)
    } else {
        0.0
    };
    let power = buffer
        .iter()
        .take(bins)
        .enumerate()
        .map(|(k, c)| {
            let one_sided = k != 0 && !(n % 2 == 0 && k == n / 2);
            let p = c.norm_sqr() * scale;
            if one_sided {
                2.0 * p
            } else {
                p
            }
        })
        .collect();
    let freqs = (0..bins).map(|k| k as f64 * sample_rate / n as f64).collect();

    Ok(Psd { freqs, power })
}

/// Dominant frequency strictly inside `(lo, hi)`, refined by a weighted
/// average over the peak bin and its neighbours. Weights are each bin's
/// power above the smallest of the three. `None` when no bin lies inside
/// the band.
pub fn dominant_frequency(psd: &Psd, [lo, hi]: [f64; 2]) -> Option<f64> {
    let first = psd.freqs.iter().position(|f| *f > lo)?;
    let last = psd.freqs.iter().rposition(|f| *f < hi)?;
    if first > last {
        return None;
    }

    let mut peak = first;
    for k in first..=last {
        if psd.power[k] > psd.power[peak] {
            peak = k;
        }
    }

    let neighbours = [
        peak.saturating_sub(1),
        peak,
        (peak + 1).min(psd.power.len() - 1),
    ];
    let floor = neighbours
        .iter()
        .map(|k| psd.power[*k])
        .fold(f64::INFINITY, f64::min);
    let weights: Vec<f64> = neighbours.iter().map(|k| psd.power[*k] - floor).collect();
    let total: f64 = weights.iter().sum();

    let freq = if total > 0.0 {
        neighbours
            .iter()
            .zip(&weights)
            .map(|(k, w)| psd.freqs[*k] * w / total)
            .sum()
    } else {
        psd.freqs[peak]
    };
    Some(freq.clamp(lo, hi))
}

pub struct SpectralEstimator {
    band_hz: [f64; 2],
    epsilon: f64,
}

impl SpectralEstimator {
    pub fn new(band_hz: [f64; 2], epsilon: f64) -> Self {
        Self { band_hz, epsilon }
    }

    pub fn from_config(config: &HrConfig) -> Self {
        Self::new(config.spectral_band_hz, config.normalize_epsilon)
    }

    /// Dominant frequency in Hz. `invert` flips negative-going pulses.
    pub fn estimate_hz(&self, signal: &[f64], sample_rate: f64, invert: bool) -> Result<Option<f64>> {
        if signal.len() < 2 {
            return Err(LoaderError::InvalidArgument(format!(
                "spectral estimation needs at least 2 samples, got {}",
                signal.len()
            )));
        }
        let mut x = normalize(signal, self.epsilon);
        if invert {
            x.mapv_inplace(|v| -v);
        }
        let psd = welch_single_segment(x.as_slice().unwrap_or(&[]), sample_rate)?;
        Ok(dominant_frequency(&psd, self.band_hz))
    }

    pub fn estimate_bpm(&self, signal: &[f64], sample_rate: f64, invert: bool) -> Result<Option<f64>> {
        Ok(self.estimate_hz(signal, sample_rate, invert)?.map(|hz| hz * 60.0))
    }
}
