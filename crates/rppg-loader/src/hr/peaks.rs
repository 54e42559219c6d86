//! Peak-interval heart rate.
//!
//! Beats are located by a [`PeakDetector`]; each consecutive pair yields an
//! instantaneous rate `60 * fs / Δsamples`. Rates outside the plausible band
//! are dropped and the rest averaged.

use serde::Serialize;

use crate::config::HrConfig;
use crate::error::{LoaderError, Result};

/// Beat locator for a sampled cardiac signal.
pub trait PeakDetector {
    /// Ascending sample indices of detected beats.
    fn detect(&self, signal: &[f64], sample_rate: f64) -> Vec<usize>;
}

impl<D: PeakDetector + ?Sized> PeakDetector for Box<D> {
    fn detect(&self, signal: &[f64], sample_rate: f64) -> Vec<usize> {
        (**self).detect(signal, sample_rate)
    }
}

/// Local maxima above `mean + k * std`, at least `min_distance_sec` apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalMaximaDetector {
    pub threshold_k_std: f64,
    pub min_distance_sec: f64,
}

impl Default for LocalMaximaDetector {
    fn default() -> Self {
        Self {
            threshold_k_std: 0.5,
            min_distance_sec: 0.3,
        }
    }
}

impl LocalMaximaDetector {
    pub fn from_config(config: &HrConfig) -> Self {
        Self {
            threshold_k_std: config.peak_threshold_k_std,
            min_distance_sec: config.peak_min_distance_sec,
        }
    }
}

impl PeakDetector for LocalMaximaDetector {
    fn detect(&self, signal: &[f64], sample_rate: f64) -> Vec<usize> {
        let n = signal.len();
        if n < 3 {
            return vec![];
        }

        let mean = signal.iter().sum::<f64>() / n as f64;
        let std = (signal.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        let threshold = mean + self.threshold_k_std * std;
        let refractory = (self.min_distance_sec * sample_rate) as usize;

        let mut peaks: Vec<usize> = Vec::new();
        for i in 1..n - 1 {
            if signal[i] > threshold
                && signal[i] > signal[i - 1]
                && signal[i] >= signal[i + 1]
                && peaks.last().map_or(true, |last| i - last >= refractory)
            {
                peaks.push(i);
            }
        }
        peaks
    }
}

/// `60 * sample_rate / Δ` for each consecutive peak pair.
pub fn instantaneous_rates(peaks: &[usize], sample_rate: f64) -> Vec<f64> {
    peaks
        .windows(2)
        .filter(|pair| pair[1] > pair[0])
        .map(|pair| 60.0 * sample_rate / (pair[1] - pair[0]) as f64)
        .collect()
}

/// Mean of rates strictly inside `(lo, hi)`; 0 when none survive.
pub fn mean_rate_in_band(rates: &[f64], [lo, hi]: [f64; 2]) -> f64 {
    let kept: Vec<f64> = rates.iter().copied().filter(|r| *r > lo && *r < hi).collect();
    if kept.is_empty() {
        return 0.0;
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakEstimate {
    /// Mean in-band rate, 0 when unknown
    pub bpm: f64,
    pub peaks: Vec<usize>,
    pub rates: Vec<f64>,
}

pub struct PeakIntervalEstimator<D = LocalMaximaDetector> {
    detector: D,
    band_bpm: [f64; 2],
}

impl PeakIntervalEstimator<LocalMaximaDetector> {
    pub fn from_config(config: &HrConfig) -> Self {
        Self::with_detector(LocalMaximaDetector::from_config(config), config.peak_band_bpm)
    }
}

impl<D: PeakDetector> PeakIntervalEstimator<D> {
    pub fn with_detector(detector: D, band_bpm: [f64; 2]) -> Self {
        Self { detector, band_bpm }
    }

    pub fn estimate(&self, signal: &[f64], sample_rate: f64) -> Result<PeakEstimate> {
        if signal.len() < 2 {
            return Err(LoaderError::InvalidArgument(format!(
                "peak-interval estimation needs at least 2 samples, got {}",
                signal.len()
            )));
        }
        if !(sample_rate > 0.0) {
            return Err(LoaderError::InvalidArgument(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }

        let peaks = self.detector.detect(signal, sample_rate);
        let rates = instantaneous_rates(&peaks, sample_rate);
        let bpm = mean_rate_in_band(&rates, self.band_bpm);
        Ok(PeakEstimate { bpm, peaks, rates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn pulse_train(bpm: f64, fs: f64, seconds: f64) -> Vec<f64> {
        let n = (fs * seconds) as usize;
        (0..n)
            .map(|i| {
                let phase = (i as f64 / fs * bpm / 60.0).fract();
                // narrow Gaussian beat once per period over a slow baseline
                (-((phase - 0.5) * 20.0).powi(2)).exp() + 0.1 * (2.0 * PI * phase).cos()
            })
            .collect()
    }

    struct Fixed(Vec<usize>);

    impl PeakDetector for Fixed {
        fn detect(&self, _signal: &[f64], _sample_rate: f64) -> Vec<usize> {
            self.0.clone()
        }
    }

    #[test]
    fn test_instantaneous_rates() {
        let rates = instantaneous_rates(&[0, 100, 250], 100.0);
        assert_relative_eq!(rates[0], 60.0);
        assert_relative_eq!(rates[1], 40.0);
    }

    #[test]
    fn test_band_filter_is_strict() {
        assert_relative_eq!(mean_rate_in_band(&[30.0, 240.0, 60.0, 80.0], [30.0, 240.0]), 70.0);
        assert_relative_eq!(mean_rate_in_band(&[10.0, 300.0], [30.0, 240.0]), 0.0);
    }

    #[test]
    fn test_estimate_with_fixed_peaks() {
        // 20 samples apart at 10 Hz is 30 BPM exactly, excluded by the band
        let estimator = PeakIntervalEstimator::with_detector(Fixed(vec![0, 20, 28, 36]), [30.0, 240.0]);
        let estimate = estimator.estimate(&[0.0; 40], 10.0).unwrap();
        assert_eq!(estimate.rates.len(), 3);
        assert_relative_eq!(estimate.bpm, 75.0);
    }

    #[test]
    fn test_local_maxima_detector_recovers_rate() {
        let fs = 250.0;
        let signal = pulse_train(72.0, fs, 20.0);
        let estimator = PeakIntervalEstimator::from_config(&HrConfig::default());
        let estimate = estimator.estimate(&signal, fs).unwrap();
        assert!(estimate.peaks.len() >= 20);
        assert_relative_eq!(estimate.bpm, 72.0, epsilon = 1.0);
    }

    #[test]
    fn test_flat_signal_is_unknown() {
        let estimator = PeakIntervalEstimator::from_config(&HrConfig::default());
        let estimate = estimator.estimate(&[1.0; 500], 100.0).unwrap();
        assert!(estimate.peaks.is_empty());
        assert_eq!(estimate.bpm, 0.0);
    }

    #[test]
    fn test_short_window_is_invalid() {
        let estimator = PeakIntervalEstimator::from_config(&HrConfig::default());
        assert!(matches!(
            estimator.estimate(&[1.0], 100.0),
            Err(LoaderError::InvalidArgument(_))
        ));
        assert!(estimator.estimate(&[], 100.0).is_err());
    }
}
